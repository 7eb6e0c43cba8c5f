//! A structured document view of values and packets
//!
//! Every value maps to a [`Node`] tagged with its type. Complex values carry an `id` attribute and
//! later occurrences of the same shared value become `reference ref="id"` nodes, shared traits become
//! `traits ref="id"`. Back-references into a value that was still being decoded keep their raw wire
//! index as `reference index="n"`. Converting a node back with [`Node::to_value`] rebuilds the same
//! sharing, so the result encodes to the same bytes as the original.

use crate::errors::Error;
use crate::packet::{Header, Message, Packet};
use crate::reference_table::CacheKey;
use crate::types::{AMFVersion, Attribute, Element, Traits, Value};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use enumset::EnumSet;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// The element names of the document vocabulary
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Tag {
    Packet,
    Header,
    Message,
    Null,
    Undefined,
    Boolean,
    Integer,
    Double,
    String,
    Date,
    Xml,
    ByteArray,
    Array,
    Object,
    Traits,
    Sealed,
    Member,
    Reference,
    Amf3,
}

impl Tag {
    /// The element name of this tag
    pub fn name(self) -> &'static str {
        match self {
            Tag::Packet => "packet",
            Tag::Header => "header",
            Tag::Message => "message",
            Tag::Null => "null",
            Tag::Undefined => "undefined",
            Tag::Boolean => "boolean",
            Tag::Integer => "integer",
            Tag::Double => "double",
            Tag::String => "string",
            Tag::Date => "date",
            Tag::Xml => "xml",
            Tag::ByteArray => "bytearray",
            Tag::Array => "array",
            Tag::Object => "object",
            Tag::Traits => "traits",
            Tag::Sealed => "sealed",
            Tag::Member => "member",
            Tag::Reference => "reference",
            Tag::Amf3 => "amf3",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single element of a document
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// The element name
    pub tag: Tag,

    /// Attributes in the order they were added
    pub attributes: Vec<(String, String)>,

    /// Text content, only used by leaf values
    pub text: Option<String>,

    /// Child elements
    pub children: Vec<Node>,
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidDocument(message.into())
}

fn parse_text<T: FromStr>(node: &Node) -> Result<T, Error> {
    let text = node.text.as_deref().unwrap_or_default();
    text.parse()
        .map_err(|_| invalid(format!("invalid {} value {:?}", node.tag, text)))
}

/// A double as text, NaN also keeps its exact bits so the payload survives
fn with_double(node: Node, n: f64) -> Node {
    if n.is_nan() {
        node.with_attribute("bits", format!("{:#018x}", n.to_bits()))
            .with_text(n.to_string())
    } else {
        node.with_text(n.to_string())
    }
}

fn parse_double(node: &Node) -> Result<f64, Error> {
    let Some(bits) = node.attribute("bits") else {
        return parse_text(node);
    };
    bits.strip_prefix("0x")
        .and_then(|hex| u64::from_str_radix(hex, 16).ok())
        .map(f64::from_bits)
        .ok_or_else(|| invalid(format!("invalid bits attribute {:?} on {}", bits, node.tag)))
}

fn parse_attribute<T: FromStr>(node: &Node, name: &str) -> Result<T, Error> {
    let value = node.required_attribute(name)?;
    value
        .parse()
        .map_err(|_| invalid(format!("invalid {} attribute {:?} on {}", name, value, node.tag)))
}

impl Node {
    /// An empty node
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            attributes: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    fn with_attribute(mut self, name: &str, value: impl ToString) -> Self {
        self.attributes.push((name.to_string(), value.to_string()));
        self
    }

    fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Get the value of an attribute
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn required_attribute(&self, name: &str) -> Result<&str, Error> {
        self.attribute(name)
            .ok_or_else(|| invalid(format!("{} is missing the {} attribute", self.tag, name)))
    }

    fn flag(&self, name: &str) -> bool {
        self.attribute(name) == Some("true")
    }

    fn single_child(&self) -> Result<&Node, Error> {
        match self.children.as_slice() {
            [child] => Ok(child),
            children => Err(invalid(format!(
                "{} must have exactly one child, found {}",
                self.tag,
                children.len()
            ))),
        }
    }

    /// Build the document of a single value
    pub fn from_value(value: &Rc<Value>) -> Node {
        NodeWriter::default().value(value)
    }

    /// Rebuild the value described by this document
    pub fn to_value(&self) -> Result<Rc<Value>, Error> {
        NodeReader::default().value(self)
    }

    fn write_markup(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        write!(f, "{}<{}", indent, self.tag)?;
        for (name, value) in self.attributes.iter() {
            write!(f, " {}=\"{}\"", name, Escaped(value))?;
        }

        match (&self.text, self.children.is_empty()) {
            (None, true) => writeln!(f, "/>"),
            (Some(text), true) => writeln!(f, ">{}</{}>", Escaped(text), self.tag),
            (text, false) => {
                writeln!(f, ">")?;
                if let Some(text) = text {
                    writeln!(f, "{}  {}", indent, Escaped(text))?;
                }
                for child in self.children.iter() {
                    child.write_markup(f, depth + 1)?;
                }
                writeln!(f, "{}</{}>", indent, self.tag)
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_markup(f, 0)
    }
}

/// Markup escaping for text and attribute values
struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            match c {
                '&' => f.write_str("&amp;")?,
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '"' => f.write_str("&quot;")?,
                c => write!(f, "{}", c)?,
            }
        }
        Ok(())
    }
}

/// Assigns document ids to shared values and traits of one scope
#[derive(Default)]
struct NodeWriter {
    values: HashMap<CacheKey, usize>,
    traits: HashMap<CacheKey, usize>,
}

impl NodeWriter {
    fn member(&mut self, element: &Element) -> Node {
        Node::new(Tag::Member)
            .with_attribute("name", &element.name)
            .with_child(self.value(&element.value))
    }

    fn traits(&mut self, traits: &Rc<Traits>) -> Node {
        let key = CacheKey::from_rc(traits);
        if let Some(id) = self.traits.get(&key) {
            return Node::new(Tag::Traits).with_attribute("ref", id);
        }
        let id = self.traits.len();
        self.traits.insert(key, id);

        let mut node = Node::new(Tag::Traits)
            .with_attribute("id", id)
            .with_attribute("alias", &traits.alias)
            .with_attribute("dynamic", traits.is_dynamic())
            .with_attribute("externalizable", traits.is_externalizable());
        for name in traits.sealed_members.iter() {
            node = node.with_child(Node::new(Tag::Sealed).with_attribute("name", name));
        }
        node
    }

    fn value(&mut self, value: &Rc<Value>) -> Node {
        match value.as_ref() {
            Value::Null => Node::new(Tag::Null),
            Value::Undefined => Node::new(Tag::Undefined),
            Value::Bool(b) => Node::new(Tag::Boolean).with_text(b.to_string()),
            Value::Integer(i) => Node::new(Tag::Integer).with_text(i.to_string()),
            Value::Number(n) => with_double(Node::new(Tag::Double), *n),
            Value::String(s) => Node::new(Tag::String).with_text(&**s),
            Value::Reference(index) => Node::new(Tag::Reference).with_attribute("index", index),
            Value::AMF3(inner) => Node::new(Tag::Amf3).with_child(self.value(inner)),
            _ => self.complex(value),
        }
    }

    fn complex(&mut self, value: &Rc<Value>) -> Node {
        let key = CacheKey::from_rc(value);
        if let Some(id) = self.values.get(&key) {
            return Node::new(Tag::Reference).with_attribute("ref", id);
        }
        let id = self.values.len();
        self.values.insert(key, id);

        match value.as_ref() {
            Value::Date(ms) => with_double(Node::new(Tag::Date).with_attribute("id", id), *ms),
            Value::XML(content, e4x) => {
                let node = Node::new(Tag::Xml).with_attribute("id", id);
                let node = if *e4x {
                    node.with_attribute("e4x", true)
                } else {
                    node
                };
                node.with_text(content.as_str())
            }
            Value::ByteArray(bytes) => Node::new(Tag::ByteArray)
                .with_attribute("id", id)
                .with_text(STANDARD.encode(bytes)),
            Value::StrictArray(dense) => {
                let mut node = Node::new(Tag::Array)
                    .with_attribute("id", id)
                    .with_attribute("length", dense.len());
                for item in dense {
                    node = node.with_child(self.value(item));
                }
                node
            }
            Value::ECMAArray(dense, assoc) => {
                let mut node = Node::new(Tag::Array)
                    .with_attribute("id", id)
                    .with_attribute("length", dense.len())
                    .with_attribute("associative", true);
                for item in dense {
                    node = node.with_child(self.value(item));
                }
                for element in assoc {
                    node = node.with_child(self.member(element));
                }
                node
            }
            Value::Object(traits, elements) => {
                let mut node = Node::new(Tag::Object)
                    .with_attribute("id", id)
                    .with_child(self.traits(traits));
                for element in elements {
                    node = node.with_child(self.member(element));
                }
                node
            }
            // Only complex values reach this point
            _ => Node::new(Tag::Undefined),
        }
    }
}

/// Resolves document ids back to shared values and traits
#[derive(Default)]
struct NodeReader {
    values: HashMap<String, Rc<Value>>,
    traits: HashMap<String, Rc<Traits>>,
}

impl NodeReader {
    fn member(&mut self, node: &Node) -> Result<Element, Error> {
        Ok(Element {
            name: node.required_attribute("name")?.to_string(),
            value: self.value(node.single_child()?)?,
        })
    }

    fn traits(&mut self, node: &Node) -> Result<Rc<Traits>, Error> {
        if node.tag != Tag::Traits {
            return Err(invalid(format!("expected traits, found {}", node.tag)));
        }

        if let Some(id) = node.attribute("ref") {
            return self
                .traits
                .get(id)
                .cloned()
                .ok_or_else(|| invalid(format!("unknown traits reference {:?}", id)));
        }

        let mut attributes = EnumSet::empty();
        if node.flag("dynamic") {
            attributes |= Attribute::Dynamic;
        }
        if node.flag("externalizable") {
            attributes |= Attribute::External;
        }

        let sealed_members = node
            .children
            .iter()
            .map(|child| match child.tag {
                Tag::Sealed => Ok(child.required_attribute("name")?.to_string()),
                tag => Err(invalid(format!("unexpected {} in traits", tag))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let traits = Rc::new(Traits {
            alias: node.required_attribute("alias")?.to_string(),
            attributes,
            sealed_members,
        });
        if let Some(id) = node.attribute("id") {
            self.traits.insert(id.to_string(), Rc::clone(&traits));
        }
        Ok(traits)
    }

    fn array(&mut self, node: &Node) -> Result<Value, Error> {
        let mut dense = Vec::new();
        let mut assoc = Vec::new();
        for child in node.children.iter() {
            if child.tag == Tag::Member {
                assoc.push(self.member(child)?);
            } else {
                dense.push(self.value(child)?);
            }
        }

        let length: usize = parse_attribute(node, "length")?;
        if length != dense.len() {
            return Err(invalid(format!(
                "array declares length {} but has {} values",
                length,
                dense.len()
            )));
        }

        if node.flag("associative") {
            Ok(Value::ECMAArray(dense, assoc))
        } else if assoc.is_empty() {
            Ok(Value::StrictArray(dense))
        } else {
            Err(invalid("members in a non-associative array"))
        }
    }

    fn object(&mut self, node: &Node) -> Result<Value, Error> {
        let Some((traits, members)) = node.children.split_first() else {
            return Err(invalid("object without traits"));
        };
        let traits = self.traits(traits)?;
        let elements = members
            .iter()
            .map(|member| self.member(member))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Object(traits, elements))
    }

    fn value(&mut self, node: &Node) -> Result<Rc<Value>, Error> {
        let value = match node.tag {
            Tag::Null => Value::Null,
            Tag::Undefined => Value::Undefined,
            Tag::Boolean => Value::Bool(parse_text(node)?),
            Tag::Integer => Value::Integer(parse_text(node)?),
            Tag::Double => Value::Number(parse_double(node)?),
            Tag::String => Value::String(Rc::from(node.text.as_deref().unwrap_or_default())),
            Tag::Date => Value::Date(parse_double(node)?),
            Tag::Xml => Value::XML(node.text.clone().unwrap_or_default(), node.flag("e4x")),
            Tag::ByteArray => {
                let text = node.text.as_deref().unwrap_or_default();
                let bytes = STANDARD
                    .decode(text)
                    .map_err(|e| invalid(format!("invalid bytearray: {}", e)))?;
                Value::ByteArray(bytes)
            }
            Tag::Array => self.array(node)?,
            Tag::Object => self.object(node)?,
            Tag::Amf3 => Value::AMF3(self.value(node.single_child()?)?),
            Tag::Reference => {
                if let Some(id) = node.attribute("ref") {
                    return self
                        .values
                        .get(id)
                        .cloned()
                        .ok_or_else(|| invalid(format!("unknown reference {:?}", id)));
                }
                Value::Reference(parse_attribute(node, "index")?)
            }
            tag @ (Tag::Packet
            | Tag::Header
            | Tag::Message
            | Tag::Traits
            | Tag::Sealed
            | Tag::Member) => return Err(invalid(format!("{} is not a value", tag))),
        };

        let value = Rc::new(value);
        if let Some(id) = node.attribute("id") {
            self.values.insert(id.to_string(), Rc::clone(&value));
        }
        Ok(value)
    }
}

/// Build the document of a packet, each header and message value with its own id scope
pub fn from_packet(packet: &Packet) -> Node {
    let mut node = Node::new(Tag::Packet).with_attribute("version", u16::from(packet.version));

    for header in packet.headers.iter() {
        node = node.with_child(
            Node::new(Tag::Header)
                .with_attribute("name", &header.name)
                .with_attribute("mustUnderstand", header.must_understand)
                .with_child(Node::from_value(&header.value)),
        );
    }

    for message in packet.messages.iter() {
        node = node.with_child(
            Node::new(Tag::Message)
                .with_attribute("target", &message.target_uri)
                .with_attribute("response", &message.response_uri)
                .with_child(Node::from_value(&message.contents)),
        );
    }

    node
}

/// Rebuild a packet from its document
pub fn to_packet(node: &Node) -> Result<Packet, Error> {
    if node.tag != Tag::Packet {
        return Err(invalid(format!("expected packet, found {}", node.tag)));
    }

    let version: u16 = parse_attribute(node, "version")?;
    let version = AMFVersion::try_from(version).map_err(Error::InvalidVersion)?;

    let mut headers = Vec::new();
    let mut messages = Vec::new();
    for child in node.children.iter() {
        match child.tag {
            Tag::Header => headers.push(Header {
                name: child.required_attribute("name")?.to_string(),
                must_understand: child.flag("mustUnderstand"),
                value: child.single_child()?.to_value()?,
            }),
            Tag::Message => messages.push(Message {
                target_uri: child.required_attribute("target")?.to_string(),
                response_uri: child.required_attribute("response")?.to_string(),
                contents: child.single_child()?.to_value()?,
            }),
            tag => return Err(invalid(format!("unexpected {} in packet", tag))),
        }
    }

    Ok(Packet {
        version,
        headers,
        messages,
    })
}

#[cfg(test)]
mod tests {
    use super::{from_packet, to_packet, Node, Tag};
    use crate::amf0::write::AMF0Encoder;
    use crate::amf3::write::AMF3Encoder;
    use crate::errors::{Error, ErrorCategory};
    use crate::packet::{Message, Packet};
    use crate::types::{AMFVersion, Element, Traits, Value};
    use std::rc::Rc;

    fn amf3(value: &Rc<Value>) -> Vec<u8> {
        let mut out = Vec::new();
        AMF3Encoder::default().write_value(&mut out, value).unwrap();
        out
    }

    fn amf0(value: &Rc<Value>) -> Vec<u8> {
        let mut out = Vec::new();
        AMF0Encoder::default().write_value(&mut out, value).unwrap();
        out
    }

    fn graph() -> Rc<Value> {
        let traits = Rc::new(Traits::sealed("Point", ["x"]));
        let shared = Rc::new(Value::Object(Rc::clone(&traits), vec![Element::new("x", 1)]));
        let other = Rc::new(Value::Object(traits, vec![Element::new("x", 2.5)]));
        let cyclic = Rc::new(Value::Object(Rc::new(Traits::default()), vec![Element::new(
            "self",
            Value::Reference(6),
        )]));

        Rc::new(Value::ECMAArray(
            vec![
                Rc::clone(&shared),
                other,
                shared,
                Rc::new(Value::ByteArray(vec![0, 1, 2, 254])),
                Rc::new(Value::XML("<a/>".into(), true)),
                cyclic,
            ],
            vec![
                Element::new("when", Value::Date(1.5e12)),
                Element::new("empty", ""),
                Element::new("big", Value::Integer(1 << 30)),
                Element::new("nothing", Value::Undefined),
            ],
        ))
    }

    #[test]
    fn round_trip_is_byte_exact() {
        let value = graph();
        let node = Node::from_value(&value);
        let rebuilt = node.to_value().unwrap();

        assert_eq!(amf3(&rebuilt), amf3(&value));
    }

    #[test]
    fn associative_flag_survives() {
        for value in [
            Value::ECMAArray(vec![], vec![]),
            Value::StrictArray(vec![]),
        ] {
            let value = Rc::new(value);
            let rebuilt = Node::from_value(&value).to_value().unwrap();
            assert_eq!(amf0(&rebuilt), amf0(&value));
        }
    }

    #[test]
    fn sharing_is_restored() {
        let rebuilt = Node::from_value(&graph()).to_value().unwrap();
        let Value::ECMAArray(dense, _) = &*rebuilt else {
            panic!("expected an ecma array")
        };
        assert!(Rc::ptr_eq(&dense[0], &dense[2]));

        let (Value::Object(a, _), Value::Object(b, _)) = (&*dense[0], &*dense[1]) else {
            panic!("expected objects")
        };
        assert!(Rc::ptr_eq(a, b));
    }

    #[test]
    fn markup() {
        let value = Rc::new(Value::Object(Rc::new(Traits::dynamic("T")), vec![
            Element::new("a", "x < y"),
            Element::new("b", Value::Null),
        ]));

        let expected = concat!(
            "<object id=\"0\">\n",
            "  <traits id=\"0\" alias=\"T\" dynamic=\"true\" externalizable=\"false\"/>\n",
            "  <member name=\"a\">\n",
            "    <string>x &lt; y</string>\n",
            "  </member>\n",
            "  <member name=\"b\">\n",
            "    <null/>\n",
            "  </member>\n",
            "</object>\n",
        );
        assert_eq!(Node::from_value(&value).to_string(), expected);
    }

    #[test]
    fn packet_round_trip() {
        let packet = Packet {
            version: AMFVersion::AMF3,
            headers: vec![],
            messages: vec![Message {
                target_uri: "rpc.echo".into(),
                response_uri: "/1".into(),
                contents: Rc::new(Value::Number(42.0)),
            }],
        };

        let node = from_packet(&packet);
        assert_eq!(node.tag, Tag::Packet);
        assert_eq!(node.attribute("version"), Some("3"));
        assert_eq!(to_packet(&node).unwrap(), packet);
    }

    #[test]
    fn nan_payload_survives() {
        let nan = f64::from_bits(0x7ff8_0000_0000_0001);
        let value = Rc::new(Value::StrictArray(vec![
            Rc::new(Value::Number(nan)),
            Rc::new(Value::Date(f64::from_bits(0xfff8_0000_0000_00ff))),
            Rc::new(Value::Number(f64::NEG_INFINITY)),
            Rc::new(Value::Number(-0.0)),
        ]));

        let node = Node::from_value(&value);
        assert_eq!(
            node.children[0].attribute("bits"),
            Some("0x7ff8000000000001")
        );
        assert_eq!(node.children[2].attribute("bits"), None);

        let rebuilt = node.to_value().unwrap();
        assert_eq!(amf3(&rebuilt), amf3(&value));
        assert_eq!(amf0(&rebuilt), amf0(&value));
    }

    #[test]
    fn malformed_documents() {
        let unknown_ref = Node::new(Tag::Reference).with_attribute("ref", 7);
        let err = unknown_ref.to_value().unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
        assert_eq!(err.category(), ErrorCategory::Serialization);

        let bad_int = Node::new(Tag::Integer).with_text("twelve");
        assert!(matches!(bad_int.to_value(), Err(Error::InvalidDocument(_))));

        let bad_bits = Node::new(Tag::Double).with_attribute("bits", "nan");
        assert!(matches!(bad_bits.to_value(), Err(Error::InvalidDocument(_))));

        let no_traits = Node::new(Tag::Object);
        assert!(matches!(no_traits.to_value(), Err(Error::InvalidDocument(_))));

        let bad_version = Node::new(Tag::Packet).with_attribute("version", 2);
        assert_eq!(to_packet(&bad_version), Err(Error::InvalidVersion(2)));
    }
}
