//! Support for encoding AMF0
use crate::amf0::{requires_amf3, TypeMarker};
use crate::amf3::external::ExternalRegistry;
use crate::amf3::write::AMF3Encoder;
use crate::errors::Error;
use crate::nom_utils::write_string;
use crate::reference_table::{CacheKey, IdentityTable};
use crate::types::{Element, Traits, Value};
use crate::MAX_NESTING_DEPTH;
use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;
use std::rc::Rc;

fn write_type_marker<W: Write>(writer: &mut W, type_: TypeMarker) -> Result<(), Error> {
    writer.write_u8(type_ as u8)?;
    Ok(())
}

fn write_number_element<W: Write>(writer: &mut W, n: f64) -> Result<(), Error> {
    write_type_marker(writer, TypeMarker::Number)?;
    writer.write_f64::<BigEndian>(n)?;
    Ok(())
}

fn write_bool_element<W: Write>(writer: &mut W, b: bool) -> Result<(), Error> {
    write_type_marker(writer, TypeMarker::Boolean)?;
    writer.write_u8(u8::from(b))?;
    Ok(())
}

fn write_long_string_content<W: Write>(writer: &mut W, s: &str) -> Result<(), Error> {
    let len = u32::try_from(s.len()).map_err(|_| Error::PacketTooLarge)?;
    writer.write_u32::<BigEndian>(len)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn write_string_element<W: Write>(writer: &mut W, s: &str) -> Result<(), Error> {
    if s.len() > usize::from(u16::MAX) {
        write_type_marker(writer, TypeMarker::LongString)?;
        write_long_string_content(writer, s)
    } else {
        write_type_marker(writer, TypeMarker::String)?;
        write_string(writer, s)
    }
}

fn write_date_element<W: Write>(writer: &mut W, ms: f64) -> Result<(), Error> {
    write_type_marker(writer, TypeMarker::Date)?;
    writer.write_f64::<BigEndian>(ms)?;
    // Timezone, readers ignore it
    writer.write_i16::<BigEndian>(0)?;
    Ok(())
}

fn write_xml_element<W: Write>(writer: &mut W, content: &str) -> Result<(), Error> {
    write_type_marker(writer, TypeMarker::Xml)?;
    write_long_string_content(writer, content)
}

fn write_object_end<W: Write>(writer: &mut W) -> Result<(), Error> {
    writer.write_u16::<BigEndian>(0)?;
    write_type_marker(writer, TypeMarker::ObjectEnd)
}

/// Handles encoding AMF0
///
/// Objects and arrays are matched by identity (the address of their `Rc`) and written as references
/// after their first occurrence. AMF3-only values are escaped with the AVM+ marker.
#[derive(Debug)]
pub struct AMF0Encoder {
    /// The table used to cache repeated objects
    object_reference_table: IdentityTable,

    /// Codecs used for handling externalized types inside AMF3 escapes
    pub external_encoders: ExternalRegistry,

    /// Number of values currently being written
    depth: usize,
}

impl Default for AMF0Encoder {
    fn default() -> Self {
        Self::new(ExternalRegistry::with_defaults())
    }
}

impl AMF0Encoder {
    /// Create an encoder with an empty scope that uses the given external codecs
    pub fn new(external_encoders: ExternalRegistry) -> Self {
        Self {
            object_reference_table: IdentityTable::default(),
            external_encoders,
            depth: 0,
        }
    }

    fn write_reference<W: Write>(&self, writer: &mut W, index: usize) -> Result<(), Error> {
        let index = u16::try_from(index).map_err(|_| Error::PacketTooLarge)?;
        write_type_marker(writer, TypeMarker::Reference)?;
        writer.write_u16::<BigEndian>(index)?;
        Ok(())
    }

    /// Write `value` as a reference if it was already written in this scope, otherwise register it
    /// and write it with `body`
    fn write_referencable<W: Write>(
        &mut self,
        writer: &mut W,
        value: &Rc<Value>,
        marker: TypeMarker,
        body: impl FnOnce(&mut Self, &mut W) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let key = CacheKey::from_rc(value);
        if let Some(index) = self.object_reference_table.get(key) {
            return self.write_reference(writer, index);
        }

        self.object_reference_table.insert(key, marker as u8);
        write_type_marker(writer, marker)?;
        body(self, writer)
    }

    fn write_properties<'e, W: Write>(
        &mut self,
        writer: &mut W,
        properties: impl IntoIterator<Item = (&'e str, &'e Rc<Value>)>,
    ) -> Result<(), Error> {
        for (name, value) in properties {
            write_string(writer, name)?;
            self.write_value(writer, value)?;
        }
        write_object_end(writer)
    }

    fn write_object_element<W: Write>(
        &mut self,
        writer: &mut W,
        value: &Rc<Value>,
        traits: &Traits,
        elements: &[Element],
    ) -> Result<(), Error> {
        let marker = if traits.is_anonymous() {
            TypeMarker::Object
        } else {
            TypeMarker::TypedObject
        };

        self.write_referencable(writer, value, marker, |this, writer| {
            if !traits.is_anonymous() {
                write_string(writer, &traits.alias)?;
            }
            this.write_properties(writer, elements.iter().map(|e| (e.name(), &e.value)))
        })
    }

    fn write_ecma_array_element<W: Write>(
        &mut self,
        writer: &mut W,
        value: &Rc<Value>,
        dense: &[Rc<Value>],
        assoc: &[Element],
    ) -> Result<(), Error> {
        self.write_referencable(writer, value, TypeMarker::MixedArrayStart, |this, writer| {
            let count = u32::try_from(dense.len() + assoc.len()).map_err(|_| Error::PacketTooLarge)?;
            writer.write_u32::<BigEndian>(count)?;

            for (index, item) in dense.iter().enumerate() {
                write_string(writer, &index.to_string())?;
                this.write_value(writer, item)?;
            }
            this.write_properties(writer, assoc.iter().map(|e| (e.name(), &e.value)))
        })
    }

    fn write_strict_array_element<W: Write>(
        &mut self,
        writer: &mut W,
        value: &Rc<Value>,
        elements: &[Rc<Value>],
    ) -> Result<(), Error> {
        self.write_referencable(writer, value, TypeMarker::Array, |this, writer| {
            let count = u32::try_from(elements.len()).map_err(|_| Error::PacketTooLarge)?;
            writer.write_u32::<BigEndian>(count)?;
            for element in elements {
                this.write_value(writer, element)?;
            }
            Ok(())
        })
    }

    fn write_raw_reference<W: Write>(&self, writer: &mut W, index: u32) -> Result<(), Error> {
        let index = index as usize;
        // Make sure the target exists in this scope
        self.object_reference_table.marker(index)?;
        self.write_reference(writer, index)
    }

    /// Switch to AMF3 for exactly this value, with a fresh AMF3 scope
    pub(crate) fn write_amf3_element<W: Write>(
        &self,
        writer: &mut W,
        value: &Rc<Value>,
    ) -> Result<(), Error> {
        log::trace!("Escaping value to AMF3");
        write_type_marker(writer, TypeMarker::AMF3)?;
        let mut encoder = AMF3Encoder::new(self.external_encoders.clone());
        encoder.depth = self.depth;
        encoder.write_value(writer, value)
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
        if requires_amf3(value) {
            return self.write_amf3_element(writer, value);
        }

        match value.as_ref() {
            Value::Number(n) => write_number_element(writer, *n),
            Value::Bool(b) => write_bool_element(writer, *b),
            Value::String(s) => write_string_element(writer, s),
            Value::Null => write_type_marker(writer, TypeMarker::Null),
            Value::Undefined => write_type_marker(writer, TypeMarker::Undefined),
            Value::Date(ms) => write_date_element(writer, *ms),
            Value::XML(content, _) => write_xml_element(writer, content),
            Value::Object(traits, elements) => {
                self.write_object_element(writer, value, traits, elements)
            }
            Value::ECMAArray(dense, assoc) => {
                self.write_ecma_array_element(writer, value, dense, assoc)
            }
            Value::StrictArray(elements) => {
                self.write_strict_array_element(writer, value, elements)
            }
            Value::Reference(index) => self.write_raw_reference(writer, *index),
            Value::AMF3(inner) => self.write_amf3_element(writer, inner),
            // Always escaped above
            Value::Integer(_) | Value::ByteArray(_) => self.write_amf3_element(writer, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AMF0Encoder;
    use crate::amf0::read::AMF0Decoder;
    use crate::errors::Error;
    use crate::types::{Element, Traits, Value};
    use crate::MAX_NESTING_DEPTH;
    use std::rc::Rc;

    fn encode(value: &Rc<Value>) -> Result<Vec<u8>, Error> {
        let mut v = Vec::new();
        AMF0Encoder::default().write_value(&mut v, value)?;
        Ok(v)
    }

    #[test]
    fn object_with_end_marker() {
        let value = Rc::new(Value::Object(Rc::new(Traits::default()), vec![
            Element::new("a", Value::Null),
        ]));
        assert_eq!(
            encode(&value).unwrap(),
            &[0x03, 0x00, 0x01, b'a', 0x05, 0x00, 0x00, 0x09]
        );
    }

    #[test]
    fn typed_object_writes_alias() {
        let value = Rc::new(Value::Object(Rc::new(Traits::dynamic("T")), vec![]));
        assert_eq!(encode(&value).unwrap(), &[0x10, 0x00, 0x01, b'T', 0x00, 0x00, 0x09]);
    }

    #[test]
    fn shared_object_becomes_reference() {
        let inner = Rc::new(Value::Object(Rc::new(Traits::default()), vec![]));
        let value = Rc::new(Value::StrictArray(vec![Rc::clone(&inner), inner]));
        assert_eq!(
            encode(&value).unwrap(),
            &[0x0a, 0x00, 0x00, 0x00, 0x02, 0x03, 0x00, 0x00, 0x09, 0x07, 0x00, 0x01]
        );
    }

    #[test]
    fn ecma_array_writes_true_size() {
        let value = Rc::new(Value::ECMAArray(
            vec![Value::from(1.0)].into_iter().collect(),
            vec![Element::new("k", true)],
        ));
        let bytes = encode(&value).unwrap();
        assert_eq!(&bytes[..5], &[0x08, 0x00, 0x00, 0x00, 0x02]);

        let (_, decoded) = AMF0Decoder::default().parse_single_element(&bytes).unwrap();
        let entries: Vec<_> = decoded
            .ecma_entries()
            .unwrap()
            .into_iter()
            .map(|(k, _)| k.into_owned())
            .collect();
        assert_eq!(entries, ["0", "k"]);
    }

    #[test]
    fn long_strings_switch_marker() {
        let long = "x".repeat(70_000);
        let bytes = encode(&Rc::new(Value::from(long.as_str()))).unwrap();
        assert_eq!(&bytes[..5], &[0x0c, 0x00, 0x01, 0x11, 0x70]);
        assert_eq!(bytes.len(), 5 + 70_000);
    }

    #[test]
    fn amf3_only_values_are_escaped() {
        assert_eq!(encode(&Rc::new(Value::Integer(42))).unwrap(), &[0x11, 0x04, 0x2a]);
        assert_eq!(
            encode(&Rc::new(Value::ByteArray(vec![1, 2]))).unwrap(),
            &[0x11, 0x0c, 0x05, 0x01, 0x02]
        );

        let sealed = Rc::new(Value::Object(Rc::new(Traits::sealed("P", ["x"])), vec![
            Element::new("x", Value::Null),
        ]));
        assert_eq!(
            encode(&sealed).unwrap(),
            &[0x11, 0x0a, 0x13, 0x03, b'P', 0x03, b'x', 0x01]
        );
    }

    #[test]
    fn escape_round_trip_is_byte_exact() {
        let data = [0x11, 0x0a, 0x0b, 0x01, 0x03, b'a', 0x06, 0x03, b'b', 0x01];
        let (_, value) = AMF0Decoder::default().parse_single_element(&data).unwrap();
        assert!(matches!(*value, Value::AMF3(_)));
        assert_eq!(encode(&value).unwrap(), &data);
    }

    #[test]
    fn self_reference_round_trip() {
        let data = [
            0x03, 0x00, 0x02, b'm', b'e', 0x07, 0x00, 0x00, 0x00, 0x00, 0x09,
        ];
        let (_, value) = AMF0Decoder::default().parse_single_element(&data).unwrap();
        assert_eq!(encode(&value).unwrap(), &data);
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let mut value = Rc::new(Value::Null);
        for _ in 0..MAX_NESTING_DEPTH {
            value = Rc::new(Value::Object(Rc::new(Traits::default()), vec![Element::shared(
                "a", &value,
            )]));
        }
        assert_eq!(encode(&value), Err(Error::NestingTooDeep(MAX_NESTING_DEPTH)));

        // The escaped half keeps counting from where AMF0 left off
        let mut value = Rc::new(Value::Integer(1));
        for _ in 0..MAX_NESTING_DEPTH / 2 {
            value = Rc::new(Value::Object(Rc::new(Traits::sealed("S", ["a"])), vec![
                Element::shared("a", &value),
            ]));
        }
        for _ in 0..MAX_NESTING_DEPTH / 2 {
            value = Rc::new(Value::StrictArray(vec![value]));
        }
        assert_eq!(encode(&value), Err(Error::NestingTooDeep(MAX_NESTING_DEPTH)));
    }

    #[test]
    fn dangling_reference() {
        assert_eq!(
            encode(&Rc::new(Value::Reference(0))),
            Err(Error::InvalidReference { index: 0, len: 0 })
        );
    }
}
