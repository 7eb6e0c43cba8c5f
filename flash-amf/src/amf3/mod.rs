/// Support for externalizable types
pub mod external;
/// Abstraction over the AMF3 length and reference types
pub(crate) mod length;
/// Reading of AMF3 data
pub mod read;
/// AMF3 type markers
mod type_marker;
/// Writing of AMF3 data
pub mod write;

pub(crate) use type_marker::TypeMarker;
