//! Handles writing of AMF packets

use crate::amf0::write::AMF0Encoder;
use crate::amf3::external::ExternalRegistry;
use crate::errors::Error;
use crate::nom_utils::write_string;
use crate::packet::{Header, Message, Packet};
use crate::types::{AMFVersion, Value};
use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;
use std::rc::Rc;

/// Written in place of a value's byte length when exact lengths aren't requested
const UNKNOWN_LENGTH: u32 = u32::MAX;

/// Body values start in AMF0, AMF3 packets escape every one of them
fn write_body_value<W: Write>(
    writer: &mut W,
    value: &Rc<Value>,
    version: AMFVersion,
    externals: &ExternalRegistry,
) -> Result<(), Error> {
    let mut encoder = AMF0Encoder::new(externals.clone());
    match (version, value.as_ref()) {
        (AMFVersion::AMF0, _) => encoder.write_value(writer, value),
        (AMFVersion::AMF3, Value::AMF3(inner)) => encoder.write_amf3_element(writer, inner),
        (AMFVersion::AMF3, _) => encoder.write_amf3_element(writer, value),
    }
}

/// Encode a top level value in its own scope, prefixed by its length field
fn write_value_with_length<W: Write>(
    writer: &mut W,
    value: &Rc<Value>,
    version: AMFVersion,
    exact_lengths: bool,
    externals: &ExternalRegistry,
) -> Result<(), Error> {
    if exact_lengths {
        let mut buffer = Vec::new();
        write_body_value(&mut buffer, value, version, externals)?;
        let length = u32::try_from(buffer.len()).map_err(|_| Error::PacketTooLarge)?;
        writer.write_u32::<BigEndian>(length)?;
        writer.write_all(&buffer)?;
    } else {
        writer.write_u32::<BigEndian>(UNKNOWN_LENGTH)?;
        write_body_value(writer, value, version, externals)?;
    }

    Ok(())
}

fn write_header<W: Write>(
    writer: &mut W,
    header: &Header,
    version: AMFVersion,
    exact_lengths: bool,
    externals: &ExternalRegistry,
) -> Result<(), Error> {
    write_string(writer, &header.name)?;
    writer.write_u8(u8::from(header.must_understand))?;
    write_value_with_length(writer, &header.value, version, exact_lengths, externals)
}

fn write_message<W: Write>(
    writer: &mut W,
    message: &Message,
    version: AMFVersion,
    exact_lengths: bool,
    externals: &ExternalRegistry,
) -> Result<(), Error> {
    write_string(writer, &message.target_uri)?;
    write_string(writer, &message.response_uri)?;
    write_value_with_length(writer, &message.contents, version, exact_lengths, externals)
}

/// Write a packet, encoding externalizable objects with the given codecs
pub fn write_packet_with<W: Write>(
    mut writer: W,
    packet: &Packet,
    exact_lengths: bool,
    externals: &ExternalRegistry,
) -> Result<(), Error> {
    log::debug!(
        "Writing {} packet with {} headers and {} messages",
        packet.version,
        packet.headers.len(),
        packet.messages.len()
    );

    writer.write_u16::<BigEndian>(packet.version.into())?;

    let header_count = u16::try_from(packet.headers.len()).map_err(|_| Error::PacketTooLarge)?;
    writer.write_u16::<BigEndian>(header_count)?;
    for header in &packet.headers {
        write_header(&mut writer, header, packet.version, exact_lengths, externals)?;
    }

    let message_count = u16::try_from(packet.messages.len()).map_err(|_| Error::PacketTooLarge)?;
    writer.write_u16::<BigEndian>(message_count)?;
    for message in &packet.messages {
        write_message(&mut writer, message, packet.version, exact_lengths, externals)?;
    }

    Ok(())
}

/// Write a packet to a writer
///
/// With `exact_lengths` every value is encoded to a scratch buffer first so its byte length can be
/// written, otherwise the length fields hold `0xFFFFFFFF`.
pub fn write_packet<W: Write>(writer: W, packet: &Packet, exact_lengths: bool) -> Result<(), Error> {
    write_packet_with(writer, packet, exact_lengths, &ExternalRegistry::with_defaults())
}

/// Write a packet to a vec of bytes
pub fn write_to_bytes(packet: &Packet, exact_lengths: bool) -> Result<Vec<u8>, Error> {
    let mut buffer = vec![];
    write_packet(&mut buffer, packet, exact_lengths)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::write_to_bytes;
    use crate::packet::{Header, Packet};
    use crate::types::{AMFVersion, Value};
    use std::rc::Rc;

    fn packet_with_header(value: Value) -> Packet {
        Packet {
            version: AMFVersion::AMF0,
            headers: vec![Header {
                name: "h".to_string(),
                must_understand: true,
                value: Rc::new(value),
            }],
            messages: vec![],
        }
    }

    #[test]
    fn sentinel_length() {
        let bytes = write_to_bytes(&packet_with_header(Value::Null), false).unwrap();
        assert_eq!(
            bytes,
            &[
                0x00, 0x00, 0x00, 0x01, 0x00, 0x01, b'h', 0x01, 0xff, 0xff, 0xff, 0xff, 0x05,
                0x00, 0x00
            ]
        );
    }

    #[test]
    fn amf3_packets_escape_every_value() {
        let mut packet = packet_with_header(Value::Null);
        packet.version = AMFVersion::AMF3;
        let bytes = write_to_bytes(&packet, false).unwrap();
        assert_eq!(&bytes[12..14], &[0x11, 0x01]);

        // Already escaped values are not escaped twice
        packet.headers[0].value = Rc::new(Value::AMF3(Rc::new(Value::Null)));
        assert_eq!(write_to_bytes(&packet, false).unwrap(), bytes);
    }

    #[test]
    fn exact_length() {
        let bytes = write_to_bytes(&packet_with_header(Value::Bool(true)), true).unwrap();
        assert_eq!(
            bytes,
            &[
                0x00, 0x00, 0x00, 0x01, 0x00, 0x01, b'h', 0x01, 0x00, 0x00, 0x00, 0x02, 0x01,
                0x01, 0x00, 0x00
            ]
        );
    }
}
