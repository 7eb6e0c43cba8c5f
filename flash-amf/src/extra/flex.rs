//! Externalizable types used by Flex remoting
//!
//! Collections and proxies wrap a single AMF3 value. The small message types (`DSK`, `DSA`, `DSC`)
//! are written as a chain of levels, each a run of flag bytes followed by the values the flags select.

use crate::amf3::external::{ExternalCodec, ExternalRegistry};
use crate::amf3::read::AMF3Decoder;
use crate::amf3::write::AMF3Encoder;
use crate::errors::Error;
use crate::nom_utils::AMFResult;
use crate::types::{Element, Traits};
use nom::number::complete::be_u8;

/// Set on a flag byte when another flag byte follows
const NEXT_FLAG: u8 = 0b1000_0000;

/// Flag bits available in one flag byte
const FLAG_BITS: usize = 7;

/// The fields selected by each flag byte of a level, in bit order
type Level = &'static [&'static [&'static str]];

const ABSTRACT_MESSAGE: Level = &[
    &[
        "body",
        "clientId",
        "destination",
        "headers",
        "messageId",
        "timestamp",
        "timeToLive",
    ],
    &["clientIdBytes", "messageIdBytes"],
];

const ASYNC_MESSAGE: Level = &[&["correlationId", "correlationIdBytes"]];

const ACKNOWLEDGE_MESSAGE: Level = &[];

const COMMAND_MESSAGE: Level = &[&["operation"]];

/// Wraps a single value stored under one member name
struct WrapperCodec {
    member: &'static str,
}

impl ExternalCodec for WrapperCodec {
    fn decode<'a>(
        &self,
        i: &'a [u8],
        _traits: &Traits,
        decoder: &mut AMF3Decoder,
    ) -> AMFResult<'a, Vec<Element>> {
        let (i, value) = decoder.parse_single_element(i)?;
        Ok((
            i,
            vec![Element {
                name: self.member.to_string(),
                value,
            }],
        ))
    }

    fn encode(
        &self,
        elements: &[Element],
        _traits: &Traits,
        encoder: &mut AMF3Encoder,
    ) -> Result<Vec<u8>, Error> {
        let element = elements
            .iter()
            .find(|e| e.name == self.member)
            .ok_or_else(|| Error::MissingSealedMember(self.member.to_string()))?;

        let mut out = Vec::new();
        encoder.write_value(&mut out, &element.value)?;
        Ok(out)
    }
}

fn read_flags(i: &[u8]) -> AMFResult<'_, Vec<u8>> {
    let mut flags = Vec::new();

    let mut i = i;
    loop {
        let (j, flag) = be_u8(i)?;
        i = j;
        flags.push(flag);
        if flag & NEXT_FLAG == 0 {
            return Ok((i, flags));
        }
    }
}

fn decode_level<'a>(
    i: &'a [u8],
    level: Level,
    decoder: &mut AMF3Decoder,
    elements: &mut Vec<Element>,
) -> AMFResult<'a, ()> {
    let (mut i, flags) = read_flags(i)?;

    for (block, flag) in flags.iter().enumerate() {
        let names = level.get(block).copied().unwrap_or_default();
        for bit in 0..FLAG_BITS {
            if flag & (1 << bit) == 0 {
                continue;
            }

            let (j, value) = decoder.parse_single_element(i)?;
            i = j;
            match names.get(bit) {
                Some(name) => elements.push(Element {
                    name: name.to_string(),
                    value,
                }),
                // Fields added by newer versions of a level are read and dropped
                None => log::debug!("Skipping unknown message field {} of flag byte {}", bit, block),
            }
        }
    }

    Ok((i, ()))
}

fn encode_level(
    elements: &[Element],
    level: Level,
    encoder: &mut AMF3Encoder,
    out: &mut Vec<u8>,
) -> Result<(), Error> {
    let mut flags = Vec::with_capacity(level.len());
    let mut values = Vec::new();
    for names in level {
        let mut flag = 0u8;
        for (bit, name) in names.iter().enumerate() {
            if let Some(element) = elements.iter().find(|e| e.name == *name) {
                flag |= 1 << bit;
                values.push(&element.value);
            }
        }
        flags.push(flag);
    }

    while flags.len() > 1 && flags.last() == Some(&0) {
        flags.pop();
    }
    if flags.is_empty() {
        flags.push(0);
    }

    let last = flags.len() - 1;
    for (index, flag) in flags.iter().enumerate() {
        out.push(if index < last { flag | NEXT_FLAG } else { *flag });
    }
    for value in values {
        encoder.write_value(out, value)?;
    }

    Ok(())
}

/// A message type made of consecutive levels
struct MessageCodec {
    levels: &'static [Level],
}

impl ExternalCodec for MessageCodec {
    fn decode<'a>(
        &self,
        i: &'a [u8],
        _traits: &Traits,
        decoder: &mut AMF3Decoder,
    ) -> AMFResult<'a, Vec<Element>> {
        let mut elements = Vec::new();

        let mut i = i;
        for &level in self.levels {
            let (j, _) = decode_level(i, level, decoder, &mut elements)?;
            i = j;
        }

        Ok((i, elements))
    }

    fn encode(
        &self,
        elements: &[Element],
        traits: &Traits,
        encoder: &mut AMF3Encoder,
    ) -> Result<Vec<u8>, Error> {
        let known = |name: &str| {
            self.levels
                .iter()
                .flat_map(|level| level.iter())
                .any(|names| names.iter().any(|n| *n == name))
        };
        for element in elements.iter().filter(|e| !known(&e.name)) {
            log::debug!(
                "Dropping member {:?} unknown to {:?}",
                element.name,
                traits.alias
            );
        }

        let mut out = Vec::new();
        for &level in self.levels {
            encode_level(elements, level, encoder, &mut out)?;
        }
        Ok(out)
    }
}

/// Register the flex codecs into the given registry
pub fn register_codecs(registry: &mut ExternalRegistry) {
    for alias in [
        "flex.messaging.io.ArrayCollection",
        "flex.messaging.io.ArrayList",
    ] {
        registry.register(alias, WrapperCodec { member: "source" });
    }

    for alias in [
        "flex.messaging.io.ObjectProxy",
        "flex.messaging.io.ManagedObjectProxy",
        "flex.messaging.io.SerializationProxy",
    ] {
        registry.register(alias, WrapperCodec { member: "object" });
    }

    const ACKNOWLEDGE: &[Level] = &[ABSTRACT_MESSAGE, ASYNC_MESSAGE, ACKNOWLEDGE_MESSAGE];
    const ASYNC: &[Level] = &[ABSTRACT_MESSAGE, ASYNC_MESSAGE];
    const COMMAND: &[Level] = &[ABSTRACT_MESSAGE, ASYNC_MESSAGE, COMMAND_MESSAGE];

    for (alias, levels) in [
        ("DSK", ACKNOWLEDGE),
        ("flex.messaging.messages.AcknowledgeMessageExt", ACKNOWLEDGE),
        ("DSA", ASYNC),
        ("flex.messaging.messages.AsyncMessageExt", ASYNC),
        ("DSC", COMMAND),
        ("flex.messaging.messages.CommandMessageExt", COMMAND),
    ] {
        registry.register(alias, MessageCodec { levels });
    }
}

#[cfg(test)]
mod tests {
    use crate::amf3::read::AMF3Decoder;
    use crate::amf3::write::AMF3Encoder;
    use crate::types::{Element, Traits, Value};
    use std::rc::Rc;

    fn encode(value: &Rc<Value>) -> Vec<u8> {
        let mut out = Vec::new();
        AMF3Encoder::default().write_value(&mut out, value).unwrap();
        out
    }

    fn decode(data: &[u8]) -> Rc<Value> {
        let (rest, value) = AMF3Decoder::default().parse_single_element(data).unwrap();
        assert!(rest.is_empty());
        value
    }

    #[test]
    fn array_collection() {
        let source = Value::StrictArray(vec![Value::from(1), Value::from(2)].into_iter().collect());
        let value = Rc::new(Value::Object(
            Rc::new(Traits::externalizable("flex.messaging.io.ArrayCollection")),
            vec![Element::new("source", source)],
        ));

        let bytes = encode(&value);
        assert_eq!(&bytes[..3], &[0x0a, 0x07, 0x43]);
        assert_eq!(&bytes[bytes.len() - 7..], &[0x09, 0x05, 0x01, 0x04, 0x01, 0x04, 0x02]);
        assert_eq!(decode(&bytes), value);
    }

    #[test]
    fn acknowledge_message() {
        let value = Rc::new(Value::Object(Rc::new(Traits::externalizable("DSK")), vec![
            Element::new("body", "ok"),
            Element::new("messageId", "m1"),
            Element::new("correlationId", "c1"),
        ]));

        let bytes = encode(&value);
        // traits, alias, then the three flag levels
        assert_eq!(
            &bytes[..10],
            &[0x0a, 0x07, 0x07, b'D', b'S', b'K', 0x11, 0x06, 0x05, b'o']
        );
        assert_eq!(decode(&bytes), value);
    }

    #[test]
    fn unknown_message_fields_are_skipped() {
        // DSC with only an unknown field in the command level
        let data = [
            0x0a, 0x07, 0x07, b'D', b'S', b'C', // traits
            0x00, // abstract
            0x00, // async
            0x02, 0x06, 0x03, b'x', // command, field 1 is unknown
        ];
        let value = decode(&data);
        let Value::Object(traits, elements) = &*value else {
            panic!("expected an object")
        };
        assert_eq!(traits.alias, "DSC");
        assert!(elements.is_empty());
    }
}
