//! Support for decoding AMF3 data
use crate::amf3::external::ExternalRegistry;
use crate::amf3::length::Length;
use crate::amf3::TypeMarker;
use crate::errors::Error;
use crate::nom_utils::{fail, take_str, AMFResult};
use crate::reference_table::{DecodeTable, ObjectTable};
use crate::types::{Attribute, Element, Traits, Value};
use crate::MAX_NESTING_DEPTH;
use enumset::EnumSet;
use nom::bytes::complete::take;
use nom::number::complete::{be_f64, be_u8};
use std::rc::Rc;

const INLINE_TRAITS_FLAG: u32 = 0b001;
const EXTERNALIZABLE_FLAG: u32 = 0b010;
const DYNAMIC_FLAG: u32 = 0b100;

#[cfg(fuzzing)]
/// For fuzzing
pub fn fuzz_read_int_signed(i: &[u8]) -> AMFResult<'_, i32> {
    read_int_signed(i)
}

/// Read a U29 and reinterpret it as a signed 29-bit integer
pub(crate) fn read_int_signed(i: &[u8]) -> AMFResult<'_, i32> {
    let (i, value) = read_int(i)?;
    let value = value as i32;

    // Sign extend from 29 bits
    if value & 0x1000_0000 != 0 {
        Ok((i, value - 0x2000_0000))
    } else {
        Ok((i, value))
    }
}

#[cfg(fuzzing)]
/// For fuzzing
pub fn fuzz_read_int(i: &[u8]) -> AMFResult<'_, u32> {
    read_int(i)
}

/// Read a U29, at most 4 bytes of which the last contributes all 8 bits
pub(crate) fn read_int(i: &[u8]) -> AMFResult<'_, u32> {
    // Read the first byte of the number
    let (mut i, num) = be_u8(i)?;
    let mut value = u32::from(num & 0b0111_1111);
    // Check if we have another byte
    if num & 0b1000_0000 == 0 {
        return Ok((i, value));
    }

    for _ in 0..2 {
        let (j, num) = be_u8(i)?;
        i = j;
        value = (value << 7) | u32::from(num & 0b0111_1111);
        // Check if we have another byte
        if num & 0b1000_0000 == 0 {
            return Ok((i, value));
        }
    }
    let (i, num) = be_u8(i)?;
    value = (value << 8) | u32::from(num);

    Ok((i, value))
}

fn read_length(i: &[u8]) -> AMFResult<'_, Length> {
    let (i, val) = read_int(i)?;
    Ok((i, Length::from_u29(val)))
}

fn parse_element_int(i: &[u8]) -> AMFResult<'_, Rc<Value>> {
    let (i, v) = read_int_signed(i)?;
    Ok((i, Rc::new(Value::Integer(i64::from(v)))))
}

fn parse_element_number(i: &[u8]) -> AMFResult<'_, Rc<Value>> {
    let (i, v) = be_f64(i)?;
    Ok((i, Rc::new(Value::Number(v))))
}

fn read_type_marker(i: &[u8]) -> AMFResult<'_, TypeMarker> {
    let (i, type_) = be_u8(i)?;
    match TypeMarker::try_from(type_) {
        Ok(type_) => Ok((i, type_)),
        Err(type_) => Err(nom::Err::Error(Error::UnknownTypeMarker(type_))),
    }
}

/// Handles decoding AMF3
///
/// A decoder holds the reference tables of one scope, use a fresh decoder for every top level value.
#[derive(Debug)]
pub struct AMF3Decoder {
    /// The table used to cache repeated strings
    pub(crate) string_reference_table: DecodeTable<Rc<str>>,

    /// The table used to cache repeated trait definitions
    pub(crate) trait_reference_table: DecodeTable<Rc<Traits>>,

    /// The table used to cache repeated objects
    pub(crate) object_reference_table: ObjectTable,

    /// Codecs used for handling externalized types
    pub external_decoders: ExternalRegistry,

    /// Number of values currently being parsed
    pub(crate) depth: usize,
}

impl Default for AMF3Decoder {
    fn default() -> Self {
        Self::new(ExternalRegistry::with_defaults())
    }
}

impl AMF3Decoder {
    /// Create a decoder with an empty scope that uses the given external codecs
    pub fn new(external_decoders: ExternalRegistry) -> Self {
        Self {
            string_reference_table: DecodeTable::default(),
            trait_reference_table: DecodeTable::default(),
            object_reference_table: ObjectTable::default(),
            external_decoders,
            depth: 0,
        }
    }

    fn parse_element_string<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        let (i, s) = self.parse_string(i)?;
        Ok((i, Rc::new(Value::String(s))))
    }

    /// Read a string, resolving references against the string table of this scope
    ///
    /// The empty string is never entered into the table.
    pub fn parse_string<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<str>> {
        let (i, len) = read_length(i)?;

        match len {
            Length::Size(0) => Ok((i, Rc::from(""))),
            Length::Size(len) => {
                let (i, s) = take_str(i, len)?;
                let s: Rc<str> = Rc::from(s);
                self.string_reference_table.push(Rc::clone(&s));
                Ok((i, s))
            }
            Length::Reference(index) => match self.string_reference_table.get(index) {
                Ok(s) => Ok((i, s)),
                Err(e) => fail(e),
            },
        }
    }

    /// `flags` is the object header with the object reference bit removed
    fn parse_traits<'a>(&mut self, i: &'a [u8], flags: u32) -> AMFResult<'a, Rc<Traits>> {
        if flags & INLINE_TRAITS_FLAG == 0 {
            return match self.trait_reference_table.get((flags >> 1) as usize) {
                Ok(traits) => Ok((i, traits)),
                Err(e) => fail(e),
            };
        }

        let (i, alias) = self.parse_string(i)?;

        let mut attributes = EnumSet::empty();
        if flags & EXTERNALIZABLE_FLAG != 0 {
            attributes |= Attribute::External;
        }
        if flags & DYNAMIC_FLAG != 0 {
            attributes |= Attribute::Dynamic;
        }

        let member_count = (flags >> 3) as usize;
        // Every member name takes at least one byte
        if i.len() < member_count {
            return fail(Error::OutOfBounds);
        }

        let mut i = i;
        let mut sealed_members = Vec::with_capacity(member_count);
        for _ in 0..member_count {
            let (j, name) = self.parse_string(i)?;
            sealed_members.push(name.to_string());
            i = j;
        }

        let traits = Rc::new(Traits {
            alias: alias.to_string(),
            attributes,
            sealed_members,
        });
        self.trait_reference_table.push(Rc::clone(&traits));
        Ok((i, traits))
    }

    /// Read the leading U29 of a reference-capable value, either resolving a reference or reserving a
    /// slot and reading the value with `parser`
    fn parse_reference_or_val<'a>(
        &mut self,
        i: &'a [u8],
        parser: impl FnOnce(&mut Self, &'a [u8], u32) -> AMFResult<'a, Value>,
    ) -> AMFResult<'a, Rc<Value>> {
        let (i, len) = read_length(i)?;

        match len {
            Length::Reference(index) => match self.object_reference_table.resolve(index) {
                Ok(value) => Ok((i, value)),
                Err(e) => fail(e),
            },
            Length::Size(len) => {
                let index = self.object_reference_table.reserve();
                let (i, value) = parser(self, i, len)?;
                Ok((i, self.object_reference_table.complete(index, value)))
            }
        }
    }

    fn parse_object_static<'a>(
        &mut self,
        i: &'a [u8],
        traits: &Traits,
        elements: &mut Vec<Element>,
    ) -> AMFResult<'a, ()> {
        let mut i = i;
        for name in traits.sealed_members.iter() {
            let (j, value) = self.parse_single_element(i)?;
            elements.push(Element {
                name: name.clone(),
                value,
            });
            i = j;
        }
        Ok((i, ()))
    }

    fn parse_object_dynamic<'a>(
        &mut self,
        i: &'a [u8],
        elements: &mut Vec<Element>,
    ) -> AMFResult<'a, ()> {
        let mut i = i;
        loop {
            let (j, name) = self.parse_string(i)?;
            if name.is_empty() {
                return Ok((j, ()));
            }
            let (j, value) = self.parse_single_element(j)?;
            elements.push(Element {
                name: name.to_string(),
                value,
            });
            i = j;
        }
    }

    pub(crate) fn parse_element_object<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        let (i, len) = read_length(i)?;

        let flags = match len {
            Length::Reference(index) => {
                return match self.object_reference_table.resolve(index) {
                    Ok(value) => Ok((i, value)),
                    Err(e) => fail(e),
                };
            }
            Length::Size(flags) => flags,
        };

        let (i, traits) = self.parse_traits(i, flags)?;
        let index = self.object_reference_table.reserve();

        let mut elements = Vec::new();
        let i = if traits.is_externalizable() {
            let Some(codec) = self.external_decoders.get(&traits.alias) else {
                return fail(Error::UnresolvedExternal(traits.alias.clone()));
            };
            let (i, external) = codec.decode(i, &traits, self)?;
            elements = external;
            i
        } else {
            let (i, _) = self.parse_object_static(i, &traits, &mut elements)?;
            if traits.is_dynamic() {
                self.parse_object_dynamic(i, &mut elements)?.0
            } else {
                i
            }
        };

        let value = Value::Object(traits, elements);
        Ok((i, self.object_reference_table.complete(index, value)))
    }

    fn parse_element_byte_array<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        self.parse_reference_or_val(i, |_this, i, len| {
            let (i, bytes) = take(len)(i)?;
            Ok((i, Value::ByteArray(bytes.to_vec())))
        })
    }

    fn parse_element_array<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        self.parse_reference_or_val(i, |this, i, length| {
            let length = length as usize;
            // There must be at least `length` bytes to read this, this prevents OOM errors with v.large arrays
            if i.len() < length {
                return fail(Error::OutOfBounds);
            }

            let mut i = i;
            let mut assoc = Vec::new();
            loop {
                let (j, key) = this.parse_string(i)?;
                i = j;
                if key.is_empty() {
                    break;
                }
                let (j, value) = this.parse_single_element(i)?;
                i = j;
                assoc.push(Element {
                    name: key.to_string(),
                    value,
                });
            }

            let mut dense = Vec::with_capacity(length);
            for _ in 0..length {
                let (j, value) = this.parse_single_element(i)?;
                i = j;
                dense.push(value);
            }

            if assoc.is_empty() {
                Ok((i, Value::StrictArray(dense)))
            } else {
                Ok((i, Value::ECMAArray(dense, assoc)))
            }
        })
    }

    fn parse_element_date<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        self.parse_reference_or_val(i, |_this, i, _len| {
            let (i, ms) = be_f64(i)?;
            Ok((i, Value::Date(ms)))
        })
    }

    fn parse_element_xml<'a>(&mut self, i: &'a [u8], e4x: bool) -> AMFResult<'a, Rc<Value>> {
        self.parse_reference_or_val(i, |_this, i, len| {
            let (i, data) = take_str(i, len)?;
            Ok((i, Value::XML(data.to_string(), e4x)))
        })
    }

    /// Parse a single AMF3 element from the input
    pub fn parse_single_element<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        if self.depth >= MAX_NESTING_DEPTH {
            return fail(Error::NestingTooDeep(MAX_NESTING_DEPTH));
        }

        self.depth += 1;
        let result = self.parse_marked_element(i);
        self.depth -= 1;
        result
    }

    fn parse_marked_element<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        let (i, type_) = read_type_marker(i)?;

        match type_ {
            TypeMarker::Undefined => Ok((i, Rc::new(Value::Undefined))),
            TypeMarker::Null => Ok((i, Rc::new(Value::Null))),
            TypeMarker::False => Ok((i, Rc::new(Value::Bool(false)))),
            TypeMarker::True => Ok((i, Rc::new(Value::Bool(true)))),
            TypeMarker::Integer => parse_element_int(i),
            TypeMarker::Number => parse_element_number(i),
            TypeMarker::String => self.parse_element_string(i),
            TypeMarker::XmlDoc => self.parse_element_xml(i, false),
            TypeMarker::Date => self.parse_element_date(i),
            TypeMarker::Array => self.parse_element_array(i),
            TypeMarker::Object => self.parse_element_object(i),
            TypeMarker::Xml => self.parse_element_xml(i, true),
            TypeMarker::ByteArray => self.parse_element_byte_array(i),
            TypeMarker::VectorInt
            | TypeMarker::VectorUInt
            | TypeMarker::VectorDouble
            | TypeMarker::VectorObject
            | TypeMarker::Dictionary => fail(Error::UnsupportedType(type_ as u8)),
        }
    }
}


#[cfg(test)]
mod read_value_tests {
    use super::AMF3Decoder;
    use crate::errors::Error;
    use crate::MAX_NESTING_DEPTH;
    use crate::types::Value;
    use std::rc::Rc;

    #[test]
    fn string_reference_is_shared() {
        // ["ab", "ab"]
        let data = [0x09, 0x05, 0x01, 0x06, 0x05, b'a', b'b', 0x06, 0x00];
        let (rest, value) = AMF3Decoder::default().parse_single_element(&data).unwrap();
        assert!(rest.is_empty());

        let Value::StrictArray(items) = &*value else {
            panic!("expected an array, got {:?}", value)
        };
        let (Value::String(a), Value::String(b)) = (&*items[0], &*items[1]) else {
            panic!("expected strings")
        };
        assert!(Rc::ptr_eq(a, b));
    }

    #[test]
    fn empty_string_is_not_referencable() {
        // ["", <string ref 0>]
        let data = [0x09, 0x05, 0x01, 0x06, 0x01, 0x06, 0x00];
        let res = AMF3Decoder::default().parse_single_element(&data);
        assert_eq!(
            res,
            Err(nom::Err::Failure(Error::InvalidReference { index: 0, len: 0 }))
        );
    }

    #[test]
    fn self_reference_is_kept_as_reference() {
        // { self: <object ref 0> }
        let data = [
            0x0a, 0x0b, 0x01, 0x09, b's', b'e', b'l', b'f', 0x0a, 0x00, 0x01,
        ];
        let (_, value) = AMF3Decoder::default().parse_single_element(&data).unwrap();
        assert_eq!(**value.get("self").unwrap(), Value::Reference(0));
    }

    #[test]
    fn vectors_are_not_supported() {
        let res = AMF3Decoder::default().parse_single_element(&[0x0d, 0x01, 0x00]);
        assert_eq!(res, Err(nom::Err::Failure(Error::UnsupportedType(0x0d))));
    }

    #[test]
    fn unknown_marker() {
        let res = AMF3Decoder::default().parse_single_element(&[0x42]);
        assert_eq!(res, Err(nom::Err::Error(Error::UnknownTypeMarker(0x42))));
    }

    fn nested_arrays(levels: usize) -> Vec<u8> {
        // [[[ ... [] ... ]]]
        let mut data = [0x09, 0x03, 0x01].repeat(levels);
        data.extend_from_slice(&[0x09, 0x01, 0x01]);
        data
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let data = [0x09, 0x03, 0x01].repeat(200_000);
        let res = AMF3Decoder::default().parse_single_element(&data);
        assert_eq!(
            res,
            Err(nom::Err::Failure(Error::NestingTooDeep(MAX_NESTING_DEPTH)))
        );
    }

    #[test]
    fn nesting_up_to_the_limit_is_accepted() {
        let data = nested_arrays(MAX_NESTING_DEPTH - 1);
        let (rest, _) = AMF3Decoder::default().parse_single_element(&data).unwrap();
        assert!(rest.is_empty());

        let data = nested_arrays(MAX_NESTING_DEPTH);
        assert!(AMF3Decoder::default().parse_single_element(&data).is_err());
    }

    #[test]
    fn depth_is_restored_after_a_failure() {
        let mut decoder = AMF3Decoder::default();
        assert!(decoder.parse_single_element(&[0x09, 0x03, 0x01, 0x42]).is_err());
        assert_eq!(decoder.depth, 0);
    }
}
