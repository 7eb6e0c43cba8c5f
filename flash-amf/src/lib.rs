//! Encoding and decoding of Action Message Format (AMF0 / AMF3) values and remoting packets
//!
//! ```
//! use flash_amf::packet::{Message, Packet};
//! use flash_amf::types::{AMFVersion, Value};
//! use std::rc::Rc;
//!
//! let packet = Packet {
//!     version: AMFVersion::AMF3,
//!     headers: vec![],
//!     messages: vec![Message {
//!         target_uri: "rpc.echo".to_string(),
//!         response_uri: "/1".to_string(),
//!         contents: Rc::new(Value::Integer(42)),
//!     }],
//! };
//!
//! let bytes = flash_amf::encode_packet(&packet).expect("Unable to encode packet");
//! let decoded = flash_amf::decode_packet(&bytes).expect("Unable to decode packet");
//! assert_eq!(decoded, packet);
//! ```

/// Reading and Writing of the AMF0 format
pub mod amf0;
/// Reading and Writing of the AMF3 format
pub mod amf3;
/// A structured document view of values and packets
pub mod document;
/// Error type used by all decoding and encoding
pub mod errors;
/// Extra types
pub mod extra;
mod nom_utils;
/// Reading and Writing of AMF remoting packets
pub mod packet;
mod reference_table;
/// Mapping typed objects to application types
pub mod registry;
/// Types used for representing AMF values
pub mod types;

#[cfg(feature = "serde")]
#[macro_use]
extern crate serde;

pub use nom_utils::AMFResult;

/// How deep arrays and objects may nest before decoding or encoding gives up
///
/// Every codec recurses once per level, so this bounds stack use for hostile input. An AMF3 escape
/// inside AMF0 continues counting from the level it appears at.
pub const MAX_NESTING_DEPTH: usize = 128;

use crate::amf0::read::AMF0Decoder;
use crate::amf0::write::AMF0Encoder;
use crate::amf3::read::AMF3Decoder;
use crate::amf3::write::AMF3Encoder;
use crate::errors::Error;
use crate::packet::Packet;
use crate::types::{AMFVersion, Value};
use std::rc::Rc;

/// Decode a complete packet
pub fn decode_packet(i: &[u8]) -> Result<Packet, Error> {
    packet::read::parse(i)
}

/// Encode a packet, with the length of every value set to the unknown sentinel
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, Error> {
    packet::write::write_to_bytes(packet, false)
}

/// Decode a single value in its own reference scope, returning it with the unread input
pub fn decode_value(i: &[u8], version: AMFVersion) -> Result<(&[u8], Rc<Value>), Error> {
    let result = match version {
        AMFVersion::AMF0 => AMF0Decoder::default().parse_single_element(i),
        AMFVersion::AMF3 => AMF3Decoder::default().parse_single_element(i),
    };
    Ok(result?)
}

/// Encode a single value in its own reference scope
pub fn encode_value(value: &Rc<Value>, version: AMFVersion) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    match version {
        AMFVersion::AMF0 => AMF0Encoder::default().write_value(&mut out, value)?,
        AMFVersion::AMF3 => AMF3Encoder::default().write_value(&mut out, value)?,
    }
    Ok(out)
}
