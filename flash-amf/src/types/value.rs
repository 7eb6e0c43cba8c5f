use super::{Element, Traits};
use std::borrow::Cow;
use std::rc::Rc;

/// A single or compound value
///
/// Values that are back-referenced on the wire decode to clones of the same `Rc`, so sharing can be
/// observed with `Rc::ptr_eq` and is reproduced when encoding.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Represent the type number (amf0) and double (amf3)
    Number(f64),

    /// Represents the type boolean (amf0) and both the true/false type (amf3)
    Bool(bool),

    /// Represent both the string (amf0/3) and long string type (amf0)
    String(Rc<str>),

    /// Represents the object type in both amf0 and amf3, with the properties in wire order
    Object(Rc<Traits>, Vec<Element>),

    /// Represent the null type
    Null,

    /// Represent the undefined type
    Undefined,

    /// Represent ECMA-Arrays (amf0) and associative arrays (amf3, even if they contain a dense part)
    /// Format is (dense part, associative part)
    ECMAArray(Vec<Rc<Value>>, Vec<Element>),

    /// Represent a strict array (amf0) or a dense array (amf3)
    StrictArray(Vec<Rc<Value>>),

    /// Represent a date as milliseconds since the epoch, UTC
    Date(f64),

    /// Represent the XML type, (value, is_e4x)
    /// `is_e4x` is only set for the amf3 `XML` type, both `XMLDocument` types leave it unset
    XML(String, bool),

    /// Represent an amf3 element embedded in an AMF0 stream
    ///
    /// Only produced for values that also have an AMF0 form. Integers, byte arrays, E4X XML and
    /// objects with sealed or externalizable traits are always escaped and decode without it.
    AMF3(Rc<Value>),

    /// Represent the integer type (u29) (amf3)
    /// Values outside of the signed 29-bit range are written as a double
    Integer(i64),

    /// Represent the bytearray type (amf3)
    ByteArray(Vec<u8>),

    /// A back-reference into the object table of the current scope
    ///
    /// Only produced when the referenced value was still being decoded (a cycle), other
    /// references resolve to the shared value directly
    Reference(u32),
}

impl Value {
    /// Can this value take a slot in the object reference table
    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            Value::Object(..)
                | Value::ECMAArray(..)
                | Value::StrictArray(_)
                | Value::Date(_)
                | Value::XML(..)
                | Value::ByteArray(_)
        )
    }

    /// Get the keyed view of an associative array, dense indices first then the named keys
    ///
    /// Returns `None` for any other value.
    pub fn ecma_entries(&self) -> Option<Vec<(Cow<'_, str>, &Rc<Value>)>> {
        if let Value::ECMAArray(dense, assoc) = self {
            let dense = dense
                .iter()
                .enumerate()
                .map(|(i, v)| (Cow::Owned(i.to_string()), v));
            let assoc = assoc.iter().map(|e| (Cow::Borrowed(e.name()), &e.value));
            Some(dense.chain(assoc).collect())
        } else {
            None
        }
    }

    /// Look up a property of an object or associative array by name
    pub fn get(&self, name: &str) -> Option<&Rc<Value>> {
        match self {
            Value::Object(_, elements) | Value::ECMAArray(_, elements) => {
                elements.iter().find(|e| e.name == name).map(|e| &e.value)
            }
            Value::AMF3(inner) => inner.get(name),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::ByteArray(bytes)
    }
}

impl FromIterator<Value> for Vec<Rc<Value>> {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        iter.into_iter().map(Rc::new).collect()
    }
}
