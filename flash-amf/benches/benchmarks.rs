use flash_amf::packet::{Header, Message, Packet};
use flash_amf::types::{AMFVersion, Element, Traits, Value};
use std::rc::Rc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

fn echo_packet() -> Packet {
    Packet {
        version: AMFVersion::AMF0,
        headers: vec![],
        messages: vec![Message {
            target_uri: "rpc.echo".to_string(),
            response_uri: "/1".to_string(),
            contents: Rc::new(Value::from("hello")),
        }],
    }
}

fn object_graph_packet() -> Packet {
    let traits = Rc::new(Traits::sealed("com.example.Point", ["x", "y"]));
    let points: Vec<Rc<Value>> = (0..64)
        .map(|n| {
            Rc::new(Value::Object(Rc::clone(&traits), vec![
                Element::new("x", n),
                Element::new("y", f64::from(n) / 2.0),
            ]))
        })
        .collect();

    let contents = Rc::new(Value::StrictArray(points));
    Packet {
        version: AMFVersion::AMF3,
        headers: vec![Header {
            name: "Credentials".to_string(),
            must_understand: false,
            value: Rc::new(Value::from("token")),
        }],
        messages: vec![Message {
            target_uri: "rpc.points".to_string(),
            response_uri: "/2".to_string(),
            contents,
        }],
    }
}

fn string_table_packet() -> Packet {
    let contents = Rc::new(Value::StrictArray(
        (0..256)
            .map(|n| Rc::new(Value::from(format!("key-{}", n % 16))))
            .collect(),
    ));
    Packet {
        version: AMFVersion::AMF3,
        headers: vec![],
        messages: vec![Message {
            target_uri: "rpc.strings".to_string(),
            response_uri: "/3".to_string(),
            contents,
        }],
    }
}

macro_rules! auto_bench {
        ($([$name: ident, $packet: expr]),*) => {
            fn criterion_benchmark(c: &mut Criterion) {
                $(
                    c.bench_function(concat!("parse_", stringify!($name)), |b| {
                        let input_bytes = flash_amf::encode_packet(&$packet).unwrap();
                        b.iter(|| {
                            black_box(flash_amf::decode_packet(&input_bytes).unwrap());
                        })
                    });
                    c.bench_function(concat!("write_", stringify!($name)), |b| {
                        let packet = $packet;
                        b.iter(|| {
                            black_box(flash_amf::encode_packet(&packet).unwrap());
                        })
                    });
                )*
            }
        }
    }

auto_bench! {
        [echo, echo_packet()],
        [object_graph, object_graph_packet()],
        [string_table, string_table_packet()]
}
