//! Support for decoding AMF0 data
use crate::amf0::{requires_amf3, TypeMarker};
use crate::amf3::external::ExternalRegistry;
use crate::amf3::read::AMF3Decoder;
use crate::errors::Error;
use crate::nom_utils::{fail, parse_string, take_str, AMFResult};
use crate::reference_table::ObjectTable;
use crate::types::{Element, Traits, Value};
use crate::MAX_NESTING_DEPTH;
use nom::number::complete::{be_f64, be_i16, be_u16, be_u32, be_u8};
use std::rc::Rc;

fn parse_element_number(i: &[u8]) -> AMFResult<'_, Value> {
    let (i, v) = be_f64(i)?;
    Ok((i, Value::Number(v)))
}

fn parse_element_bool(i: &[u8]) -> AMFResult<'_, Value> {
    let (i, num) = be_u8(i)?;
    Ok((i, Value::Bool(num > 0)))
}

fn parse_element_string(i: &[u8]) -> AMFResult<'_, Value> {
    let (i, s) = parse_string(i)?;
    Ok((i, Value::String(Rc::from(s))))
}

fn parse_long_string(i: &[u8]) -> AMFResult<'_, &str> {
    let (i, length) = be_u32(i)?;
    take_str(i, length)
}

fn parse_element_long_string(i: &[u8]) -> AMFResult<'_, Value> {
    let (i, s) = parse_long_string(i)?;
    Ok((i, Value::String(Rc::from(s))))
}

fn parse_element_date(i: &[u8]) -> AMFResult<'_, Value> {
    let (i, millis) = be_f64(i)?;
    // Timezone offset, always ignored by readers
    let (i, _time_zone) = be_i16(i)?;

    Ok((i, Value::Date(millis)))
}

fn parse_element_xml(i: &[u8]) -> AMFResult<'_, Value> {
    let (i, content) = parse_long_string(i)?;
    Ok((i, Value::XML(content.to_string(), false)))
}

fn read_type_marker(i: &[u8]) -> AMFResult<'_, TypeMarker> {
    let (i, type_) = be_u8(i)?;
    match TypeMarker::try_from(type_) {
        Ok(type_) => Ok((i, type_)),
        Err(type_) => Err(nom::Err::Error(Error::UnknownTypeMarker(type_))),
    }
}

/// Handles decoding AMF0
///
/// A decoder holds the object reference table of one scope, use a fresh decoder for every top level
/// value. Values escaped to AMF3 get their own AMF3 scope.
#[derive(Debug)]
pub struct AMF0Decoder {
    /// The table used to resolve object references
    object_reference_table: ObjectTable,

    /// Codecs used for handling externalized types inside AMF3 escapes
    pub external_decoders: ExternalRegistry,

    /// Number of values currently being parsed
    depth: usize,
}

impl Default for AMF0Decoder {
    fn default() -> Self {
        Self::new(ExternalRegistry::with_defaults())
    }
}

impl AMF0Decoder {
    /// Create a decoder with an empty scope that uses the given external codecs
    pub fn new(external_decoders: ExternalRegistry) -> Self {
        Self {
            object_reference_table: ObjectTable::default(),
            external_decoders,
            depth: 0,
        }
    }

    /// Read a property map up to its end marker, the empty name followed by `ObjectEnd`
    fn parse_properties<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Vec<Element>> {
        let mut out = Vec::new();

        let mut i = i;
        loop {
            let (j, name) = parse_string(i)?;
            if name.is_empty() && j.first() == Some(&(TypeMarker::ObjectEnd as u8)) {
                return Ok((&j[1..], out));
            }

            let (j, value) = self.parse_single_element(j)?;
            out.push(Element {
                name: name.to_string(),
                value,
            });
            i = j;
        }
    }

    /// Reserve a reference slot, read the value with `parser` and fill the slot
    fn parse_referencable<'a>(
        &mut self,
        i: &'a [u8],
        parser: impl FnOnce(&mut Self, &'a [u8]) -> AMFResult<'a, Value>,
    ) -> AMFResult<'a, Rc<Value>> {
        let index = self.object_reference_table.reserve();
        let (i, value) = parser(self, i)?;
        Ok((i, self.object_reference_table.complete(index, value)))
    }

    fn parse_element_object<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        self.parse_referencable(i, |this, i| {
            let (i, elements) = this.parse_properties(i)?;
            Ok((i, Value::Object(Rc::new(Traits::default()), elements)))
        })
    }

    fn parse_element_typed_object<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        let (i, alias) = parse_string(i)?;
        self.parse_referencable(i, |this, i| {
            let (i, elements) = this.parse_properties(i)?;
            Ok((i, Value::Object(Rc::new(Traits::dynamic(alias)), elements)))
        })
    }

    fn parse_element_mixed_array<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        self.parse_referencable(i, |this, i| {
            let (i, declared) = be_u32(i)?;
            let (i, elements) = this.parse_properties(i)?;
            if declared as usize != elements.len() {
                log::debug!(
                    "ECMA array declared {} entries but contained {}",
                    declared,
                    elements.len()
                );
            }
            Ok((i, Value::ECMAArray(Vec::new(), elements)))
        })
    }

    fn parse_element_array<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        self.parse_referencable(i, |this, i| {
            let (i, length) = be_u32(i)?;
            let length = length as usize;

            // There must be at least `length` bytes to read this, this prevents OOM errors with v.large arrays
            if i.len() < length {
                return fail(Error::OutOfBounds);
            }

            let mut i = i;
            let mut elements = Vec::with_capacity(length);
            for _ in 0..length {
                let (j, value) = this.parse_single_element(i)?;
                elements.push(value);
                i = j;
            }

            Ok((i, Value::StrictArray(elements)))
        })
    }

    fn parse_element_reference<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        let (i, index) = be_u16(i)?;
        match self.object_reference_table.resolve(usize::from(index)) {
            Ok(value) => Ok((i, value)),
            Err(e) => fail(e),
        }
    }

    fn parse_element_amf3<'a>(&mut self, i: &'a [u8]) -> AMFResult<'a, Rc<Value>> {
        log::trace!("Switching to AMF3 for one value");
        let mut decoder = AMF3Decoder::new(self.external_decoders.clone());
        decoder.depth = self.depth;
        let (i, value) = decoder.parse_single_element(i)?;

        // AMF3-only values are escaped again on write
        if requires_amf3(&value) {
            return Ok((i, value));
        }
        Ok((i, Rc::new(Value::AMF3(value))))
    }

    /// Parse a single AMF0 element from the input
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

        let simple = match type_ {
            TypeMarker::Number => parse_element_number(i),
            TypeMarker::Boolean => parse_element_bool(i),
            TypeMarker::String => parse_element_string(i),
            TypeMarker::Null => Ok((i, Value::Null)),
            TypeMarker::Undefined => Ok((i, Value::Undefined)),
            TypeMarker::Date => parse_element_date(i),
            TypeMarker::LongString => parse_element_long_string(i),
            TypeMarker::Xml => parse_element_xml(i),
            TypeMarker::Object => return self.parse_element_object(i),
            TypeMarker::TypedObject => return self.parse_element_typed_object(i),
            TypeMarker::MixedArrayStart => return self.parse_element_mixed_array(i),
            TypeMarker::Array => return self.parse_element_array(i),
            TypeMarker::Reference => return self.parse_element_reference(i),
            TypeMarker::AMF3 => return self.parse_element_amf3(i),
            TypeMarker::MovieClip | TypeMarker::Unsupported | TypeMarker::RecordSet => {
                return fail(Error::UnsupportedType(type_ as u8));
            }
            TypeMarker::ObjectEnd => return fail(Error::UnexpectedObjectEnd),
        };

        let (i, value) = simple?;
        Ok((i, Rc::new(value)))
    }
}
