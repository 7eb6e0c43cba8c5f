/// Support for reading AMF0 data
pub mod read;
/// AMF0 type markers
mod type_marker;
/// Support for writing AMF0 data
pub mod write;

pub(crate) use type_marker::TypeMarker;

use crate::types::{Traits, Value};

/// Does this value only exist in AMF3, so must be escaped when written in an AMF0 context
pub(crate) fn requires_amf3(value: &Value) -> bool {
    match value {
        Value::Integer(_) | Value::ByteArray(_) => true,
        Value::XML(_, e4x) => *e4x,
        Value::Object(traits, _) => needs_amf3_traits(traits),
        _ => false,
    }
}

fn needs_amf3_traits(traits: &Traits) -> bool {
    traits.is_externalizable() || !traits.sealed_members.is_empty()
}
