//! Handles encoding AMF3
use crate::amf3::external::ExternalRegistry;
use crate::amf3::length::Length;
use crate::amf3::TypeMarker;
use crate::errors::Error;
use crate::reference_table::{CacheKey, ElementCache, IdentityTable};
use crate::types::{Element, Traits, Value};
use crate::MAX_NESTING_DEPTH;
use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;
use std::rc::Rc;

const U29_MAX: u32 = 0x1fff_ffff;

/// The smallest value that can be sent as an AMF3 integer
pub const INTEGER_MIN: i64 = -(1 << 28);

/// The largest value that can be sent as an AMF3 integer
pub const INTEGER_MAX: i64 = (1 << 28) - 1;

/// Write a U29, values above 2^29 - 1 can't be represented
#[allow(clippy::unusual_byte_groupings)]
pub(crate) fn write_u29<W: Write>(writer: &mut W, n: u32) -> Result<(), Error> {
    if n > U29_MAX {
        return Err(Error::U29OutOfRange(u64::from(n)));
    }

    if n < 0x80 {
        writer.write_u8(n as u8)?;
    } else if n < 0x4000 {
        writer.write_u8((((n >> 7) & 0b0111_1111) | 0b1000_0000) as u8)?;
        writer.write_u8((n & 0b0111_1111) as u8)?;
    } else if n < 0x20_0000 {
        writer.write_u8((((n >> 14) & 0b0111_1111) | 0b1000_0000) as u8)?;
        writer.write_u8((((n >> 7) & 0b0111_1111) | 0b1000_0000) as u8)?;
        writer.write_u8((n & 0b0111_1111) as u8)?;
    } else {
        writer.write_u8((((n >> 22) & 0b0111_1111) | 0b1000_0000) as u8)?;
        writer.write_u8((((n >> 15) & 0b0111_1111) | 0b1000_0000) as u8)?;
        writer.write_u8((((n >> 8) & 0b0111_1111) | 0b1000_0000) as u8)?;
        writer.write_u8((n & 0b1111_1111) as u8)?;
    }

    Ok(())
}

/// Build a U29 header from an index or count shifted left, with the given low flag bits
fn u29_header(value: usize, shift: u32, flags: u32) -> Result<u32, Error> {
    let header = ((value as u64) << shift) | u64::from(flags);
    u32::try_from(header)
        .ok()
        .filter(|h| *h <= U29_MAX)
        .ok_or(Error::U29OutOfRange(header))
}

/// Handles encoding AMF3
///
/// An encoder holds the reference tables of one scope. Objects are matched by identity (the address of
/// their `Rc`), strings and traits by equality.
#[derive(Debug)]
pub struct AMF3Encoder {
    /// The table used to cache repeated strings
    string_reference_table: ElementCache<String>,

    /// The table used to cache repeated trait definitions
    trait_reference_table: ElementCache<Traits>,

    /// The table used to cache repeated objects
    object_reference_table: IdentityTable,

    /// Codecs used for handling externalized types
    pub external_encoders: ExternalRegistry,

    /// Number of values currently being written
    pub(crate) depth: usize,
}

impl Default for AMF3Encoder {
    fn default() -> Self {
        Self::new(ExternalRegistry::with_defaults())
    }
}

impl AMF3Encoder {
    /// Create an encoder with an empty scope that uses the given external codecs
    pub fn new(external_encoders: ExternalRegistry) -> Self {
        Self {
            string_reference_table: ElementCache::default(),
            trait_reference_table: ElementCache::default(),
            object_reference_table: IdentityTable::default(),
            external_encoders,
            depth: 0,
        }
    }

    pub(crate) fn write_int<W: Write>(&self, writer: &mut W, i: i32) -> Result<(), Error> {
        write_u29(writer, (i as u32) & U29_MAX)
    }

    /// Write a string, as a reference if it was already written in this scope
    pub fn write_string<W: Write>(&mut self, writer: &mut W, s: &str) -> Result<(), Error> {
        if s.is_empty() {
            return Length::Size(0).write(writer);
        }

        let len = u32::try_from(s.len()).map_err(|_| Error::PacketTooLarge)?;
        let len = self.string_reference_table.to_length_store(s.to_string(), len);
        len.write(writer)?;
        if len.is_size() {
            writer.write_all(s.as_bytes())?;
        }

        Ok(())
    }

    fn write_type_marker<W: Write>(&self, writer: &mut W, s: TypeMarker) -> Result<(), Error> {
        writer.write_u8(s as u8)?;
        Ok(())
    }

    fn write_number_element<W: Write>(&self, writer: &mut W, i: f64) -> Result<(), Error> {
        self.write_type_marker(writer, TypeMarker::Number)?;
        writer.write_f64::<BigEndian>(i)?;
        Ok(())
    }

    fn write_boolean_element<W: Write>(&self, writer: &mut W, b: bool) -> Result<(), Error> {
        if b {
            self.write_type_marker(writer, TypeMarker::True)
        } else {
            self.write_type_marker(writer, TypeMarker::False)
        }
    }

    fn write_integer_element<W: Write>(&self, writer: &mut W, i: i64) -> Result<(), Error> {
        if !(INTEGER_MIN..=INTEGER_MAX).contains(&i) {
            log::trace!("Integer {} is out of range, writing as a double", i);
            return self.write_number_element(writer, i as f64);
        }

        self.write_type_marker(writer, TypeMarker::Integer)?;
        self.write_int(writer, i as i32)
    }

    fn write_string_element<W: Write>(&mut self, writer: &mut W, s: &str) -> Result<(), Error> {
        self.write_type_marker(writer, TypeMarker::String)?;
        self.write_string(writer, s)
    }

    /// Write the marker of a complex value, then either a reference to an earlier write of the same
    /// value or the value itself through `body`
    ///
    /// The value is registered before `body` runs so that children can refer to it.
    fn write_reference_or<W: Write>(
        &mut self,
        writer: &mut W,
        value: &Rc<Value>,
        marker: TypeMarker,
        body: impl FnOnce(&mut Self, &mut W) -> Result<(), Error>,
    ) -> Result<(), Error> {
        self.write_type_marker(writer, marker)?;

        let key = CacheKey::from_rc(value);
        if let Some(index) = self.object_reference_table.get(key) {
            return Length::Reference(index).write(writer);
        }
        self.object_reference_table.insert(key, marker as u8);

        body(self, writer)
    }

    fn write_raw_reference<W: Write>(&self, writer: &mut W, index: u32) -> Result<(), Error> {
        let index = index as usize;
        let marker = self.object_reference_table.marker(index)?;
        writer.write_u8(marker)?;
        Length::Reference(index).write(writer)
    }

    fn write_traits<W: Write>(&mut self, writer: &mut W, traits: &Traits) -> Result<(), Error> {
        if let Some(index) = self.trait_reference_table.get_index(traits) {
            return write_u29(writer, u29_header(index, 2, 0b01)?);
        }
        self.trait_reference_table.store(traits.clone());

        let mut flags = 0b0011;
        if traits.is_externalizable() {
            flags |= 0b0100;
        }
        if traits.is_dynamic() {
            flags |= 0b1000;
        }
        write_u29(writer, u29_header(traits.sealed_members.len(), 4, flags)?)?;

        self.write_string(writer, &traits.alias)?;
        for name in traits.sealed_members.iter() {
            self.write_string(writer, name)?;
        }

        Ok(())
    }

    fn write_object_body<W: Write>(
        &mut self,
        writer: &mut W,
        traits: &Traits,
        elements: &[Element],
    ) -> Result<(), Error> {
        self.write_traits(writer, traits)?;

        if traits.is_externalizable() {
            let codec = self
                .external_encoders
                .get(&traits.alias)
                .ok_or_else(|| Error::UnresolvedExternal(traits.alias.clone()))?;
            let payload = codec.encode(elements, traits, self)?;
            writer.write_all(&payload)?;
            return Ok(());
        }

        for name in traits.sealed_members.iter() {
            let element = elements
                .iter()
                .find(|e| &e.name == name)
                .ok_or_else(|| Error::MissingSealedMember(name.clone()))?;
            self.write_value(writer, &element.value)?;
        }

        let mut dynamic = elements
            .iter()
            .filter(|e| !traits.sealed_members.contains(&e.name))
            .peekable();

        if traits.is_dynamic() {
            for element in dynamic {
                if element.name.is_empty() {
                    log::warn!("Skipping dynamic member with an empty name");
                    continue;
                }
                self.write_string(writer, &element.name)?;
                self.write_value(writer, &element.value)?;
            }
            self.write_string(writer, "")?;
        } else if dynamic.peek().is_some() {
            log::debug!(
                "Dropping {} members not declared by sealed type {:?}",
                dynamic.count(),
                traits.alias
            );
        }

        Ok(())
    }

    fn write_array_body<W: Write>(
        &mut self,
        writer: &mut W,
        dense: &[Rc<Value>],
        assoc: &[Element],
    ) -> Result<(), Error> {
        let len = u32::try_from(dense.len()).map_err(|_| Error::PacketTooLarge)?;
        Length::Size(len).write(writer)?;

        for element in assoc {
            if element.name.is_empty() {
                log::warn!("Skipping associative array entry with an empty key");
                continue;
            }
            self.write_string(writer, &element.name)?;
            self.write_value(writer, &element.value)?;
        }
        self.write_string(writer, "")?;

        for value in dense {
            self.write_value(writer, value)?;
        }

        Ok(())
    }

    fn write_bytes_body<W: Write>(&self, writer: &mut W, bytes: &[u8]) -> Result<(), Error> {
        let len = u32::try_from(bytes.len()).map_err(|_| Error::PacketTooLarge)?;
        Length::Size(len).write(writer)?;
        writer.write_all(bytes)?;
        Ok(())
    }

    /// Write a single value including its type marker
    pub fn write_value<W: Write>(&mut self, writer: &mut W, value: &Rc<Value>) -> Result<(), Error> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(Error::NestingTooDeep(MAX_NESTING_DEPTH));
        }

        self.depth += 1;
        let result = self.write_marked_value(writer, value);
        self.depth -= 1;
        result
    }

    fn write_marked_value<W: Write>(&mut self, writer: &mut W, value: &Rc<Value>) -> Result<(), Error> {
        match value.as_ref() {
            Value::Undefined => self.write_type_marker(writer, TypeMarker::Undefined),
            Value::Null => self.write_type_marker(writer, TypeMarker::Null),
            Value::Bool(b) => self.write_boolean_element(writer, *b),
            Value::Integer(i) => self.write_integer_element(writer, *i),
            Value::Number(n) => self.write_number_element(writer, *n),
            Value::String(s) => self.write_string_element(writer, s),
            Value::XML(content, e4x) => {
                let marker = if *e4x {
                    TypeMarker::Xml
                } else {
                    TypeMarker::XmlDoc
                };
                self.write_reference_or(writer, value, marker, |this, writer| {
                    this.write_bytes_body(writer, content.as_bytes())
                })
            }
            Value::Date(ms) => self.write_reference_or(writer, value, TypeMarker::Date, |_this, writer| {
                Length::Size(0).write(writer)?;
                writer.write_f64::<BigEndian>(*ms)?;
                Ok(())
            }),
            Value::ByteArray(bytes) => {
                self.write_reference_or(writer, value, TypeMarker::ByteArray, |this, writer| {
                    this.write_bytes_body(writer, bytes)
                })
            }
            Value::StrictArray(dense) => {
                self.write_reference_or(writer, value, TypeMarker::Array, |this, writer| {
                    this.write_array_body(writer, dense, &[])
                })
            }
            Value::ECMAArray(dense, assoc) => {
                self.write_reference_or(writer, value, TypeMarker::Array, |this, writer| {
                    this.write_array_body(writer, dense, assoc)
                })
            }
            Value::Object(traits, elements) => {
                self.write_reference_or(writer, value, TypeMarker::Object, |this, writer| {
                    this.write_object_body(writer, traits, elements)
                })
            }
            Value::Reference(index) => self.write_raw_reference(writer, *index),
            // Already in AMF3, the escape has no meaning here
            Value::AMF3(inner) => self.write_value(writer, inner),
        }
    }
}

#[cfg(test)]
mod write_number_tests {
    use super::{write_u29, AMF3Encoder};
    use crate::errors::Error;
    use crate::types::Value;
    use std::rc::Rc;

    fn u29(n: u32) -> Vec<u8> {
        let mut v = Vec::new();
        write_u29(&mut v, n).unwrap();
        v
    }

    fn integer(i: i64) -> Vec<u8> {
        let mut v = Vec::new();
        AMF3Encoder::default()
            .write_value(&mut v, &Rc::new(Value::Integer(i)))
            .unwrap();
        v
    }

    #[test]
    fn test_write_1byte_number() {
        assert_eq!(u29(0b00101011), &[0b00101011]);
        assert_eq!(u29(127), &[0x7f]);
    }

    #[test]
    fn test_write_boundaries() {
        assert_eq!(u29(128), &[0x81, 0x00]);
        assert_eq!(u29(16383), &[0xff, 0x7f]);
        assert_eq!(u29(16384), &[0x81, 0x80, 0x00]);
        assert_eq!(u29(2097151), &[0xff, 0xff, 0x7f]);
        assert_eq!(u29(2097152), &[0x80, 0xc0, 0x80, 0x00]);
        assert_eq!(u29(0x1fff_ffff), &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_write_out_of_range() {
        let mut v = Vec::new();
        assert_eq!(
            write_u29(&mut v, 0x2000_0000),
            Err(Error::U29OutOfRange(0x2000_0000))
        );
        assert!(v.is_empty());
    }

    #[test]
    fn test_write_integer_limits() {
        assert_eq!(integer(268435455), &[0x04, 0xbf, 0xff, 0xff, 0xff]);
        assert_eq!(integer(-268435456), &[0x04, 0xc0, 0x80, 0x80, 0x00]);
        assert_eq!(integer(-1), &[0x04, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_integer_promotion() {
        let mut expected = vec![0x05];
        expected.extend_from_slice(&268435456f64.to_be_bytes());
        assert_eq!(integer(268435456), expected);

        let mut expected = vec![0x05];
        expected.extend_from_slice(&(-268435457f64).to_be_bytes());
        assert_eq!(integer(-268435457), expected);
    }
}

#[cfg(test)]
mod write_value_tests {
    use super::AMF3Encoder;
    use crate::amf3::read::AMF3Decoder;
    use crate::errors::Error;
    use crate::types::{Element, Traits, Value};
    use crate::MAX_NESTING_DEPTH;
    use std::rc::Rc;

    fn encode(value: Value) -> Result<Vec<u8>, Error> {
        let mut v = Vec::new();
        AMF3Encoder::default().write_value(&mut v, &Rc::new(value))?;
        Ok(v)
    }

    #[test]
    fn empty_strings_are_never_referenced() {
        let value = Value::StrictArray((0..100).map(|_| Value::from("")).collect());
        let bytes = encode(value).unwrap();

        let mut expected = vec![0x09, 0x81, 0x49, 0x01];
        for _ in 0..100 {
            expected.extend_from_slice(&[0x06, 0x01]);
        }
        assert_eq!(bytes, expected);
    }

    #[test]
    fn repeated_strings_are_referenced() {
        let value = Value::StrictArray(vec![Value::from("ab"), Value::from("ab")].into_iter().collect());
        assert_eq!(
            encode(value).unwrap(),
            &[0x09, 0x05, 0x01, 0x06, 0x05, b'a', b'b', 0x06, 0x00]
        );
    }

    #[test]
    fn shared_object_is_written_once() {
        let inner = Rc::new(Value::Object(Rc::new(Traits::default()), vec![]));
        let outer = Value::StrictArray(vec![Rc::clone(&inner), Rc::clone(&inner)]);
        assert_eq!(
            encode(outer).unwrap(),
            &[0x09, 0x05, 0x01, 0x0a, 0x0b, 0x01, 0x01, 0x0a, 0x02]
        );
    }

    #[test]
    fn equal_traits_are_referenced() {
        let traits = Traits::sealed("Point", ["x"]);
        let a = Value::Object(Rc::new(traits.clone()), vec![Element::new("x", 1)]);
        let b = Value::Object(Rc::new(traits), vec![Element::new("x", 2)]);
        let bytes = encode(Value::StrictArray(vec![a, b].into_iter().collect())).unwrap();

        assert_eq!(
            bytes,
            &[
                0x09, 0x05, 0x01, // array
                0x0a, 0x13, 0x0b, b'P', b'o', b'i', b'n', b't', 0x03, b'x', 0x04, 0x01, // first
                0x0a, 0x01, 0x04, 0x02, // second, traits reference 0
            ]
        );

        let (_, decoded) = AMF3Decoder::default().parse_single_element(&bytes).unwrap();
        let Value::StrictArray(items) = &*decoded else {
            panic!("expected an array")
        };
        let (Value::Object(ta, _), Value::Object(tb, _)) = (&*items[0], &*items[1]) else {
            panic!("expected objects")
        };
        assert!(Rc::ptr_eq(ta, tb));
    }

    #[test]
    fn missing_sealed_member() {
        let value = Value::Object(Rc::new(Traits::sealed("Point", ["x", "y"])), vec![
            Element::new("x", 1),
        ]);
        assert_eq!(encode(value), Err(Error::MissingSealedMember("y".into())));
    }

    #[test]
    fn unresolved_external() {
        let value = Value::Object(Rc::new(Traits::externalizable("com.example.Unknown")), vec![]);
        assert_eq!(
            encode(value),
            Err(Error::UnresolvedExternal("com.example.Unknown".into()))
        );
    }

    #[test]
    fn raw_reference_uses_target_marker() {
        let traits = Rc::new(Traits::default());
        let value = Value::Object(traits, vec![Element::new("self", Value::Reference(0))]);
        let bytes = encode(value).unwrap();
        assert_eq!(
            bytes,
            &[0x0a, 0x0b, 0x01, 0x09, b's', b'e', b'l', b'f', 0x0a, 0x00, 0x01]
        );
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let mut value = Rc::new(Value::Null);
        for _ in 0..MAX_NESTING_DEPTH {
            value = Rc::new(Value::StrictArray(vec![value]));
        }

        let mut encoder = AMF3Encoder::default();
        let mut v = Vec::new();
        assert_eq!(
            encoder.write_value(&mut v, &value),
            Err(Error::NestingTooDeep(MAX_NESTING_DEPTH))
        );
        assert_eq!(encoder.depth, 0);

        let Value::StrictArray(items) = &*value else {
            panic!("expected an array")
        };
        assert!(encode(Value::clone(&items[0])).is_ok());
    }

    #[test]
    fn dangling_raw_reference() {
        assert_eq!(
            encode(Value::Reference(4)),
            Err(Error::InvalidReference { index: 4, len: 0 })
        );
    }
}
