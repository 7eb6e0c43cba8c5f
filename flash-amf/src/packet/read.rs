//! Handles reading of AMF packets
use crate::amf0::read::AMF0Decoder;
use crate::amf3::external::ExternalRegistry;
use crate::errors::Error;
use crate::nom_utils::{fail, parse_string, AMFResult};
use crate::packet::{Header, Message, Packet};
use crate::types::{AMFVersion, Value};
use nom::combinator::all_consuming;
use nom::multi::length_count;
use nom::number::complete::{be_u16, be_u32, be_u8};
use std::io::Read;
use std::rc::Rc;

fn parse_version(i: &[u8]) -> AMFResult<'_, AMFVersion> {
    let (i, version) = be_u16(i)?;
    match AMFVersion::try_from(version) {
        Ok(version) => Ok((i, version)),
        Err(version) => fail(Error::InvalidVersion(version)),
    }
}

/// Read a header or message value in its own scope
///
/// AMF3 packets escape every value, the escape is removed again here.
fn parse_body_value<'a>(
    i: &'a [u8],
    version: AMFVersion,
    externals: &ExternalRegistry,
) -> AMFResult<'a, Rc<Value>> {
    let (i, value) = AMF0Decoder::new(externals.clone()).parse_single_element(i)?;
    match (version, value.as_ref()) {
        (AMFVersion::AMF3, Value::AMF3(inner)) => Ok((i, Rc::clone(inner))),
        _ => Ok((i, value)),
    }
}

fn parse_header<'a>(
    i: &'a [u8],
    version: AMFVersion,
    externals: &ExternalRegistry,
) -> AMFResult<'a, Header> {
    let (i, name) = parse_string(i)?;
    let (i, must_understand) = be_u8(i)?;
    let (i, _length) = be_u32(i)?;
    log::debug!("Reading header {:?}", name);
    let (i, value) = parse_body_value(i, version, externals)?;

    Ok((
        i,
        Header {
            name: name.to_string(),
            must_understand: must_understand != 0,
            value,
        },
    ))
}

fn parse_message<'a>(
    i: &'a [u8],
    version: AMFVersion,
    externals: &ExternalRegistry,
) -> AMFResult<'a, Message> {
    let (i, target_uri) = parse_string(i)?;
    let (i, response_uri) = parse_string(i)?;
    let (i, _length) = be_u32(i)?;
    log::debug!("Reading message {:?} -> {:?}", target_uri, response_uri);
    let (i, contents) = parse_body_value(i, version, externals)?;

    Ok((
        i,
        Message {
            target_uri: target_uri.to_string(),
            response_uri: response_uri.to_string(),
            contents,
        },
    ))
}

/// Read a given buffer as a packet, decoding externalizable objects with the given codecs
///
/// Every header and message value is read with its own reference scope. In AMF3 packets a value
/// escaped to AMF3 is returned without its [`Value::AMF3`] wrapper.
pub fn parse_incomplete_with<'a>(
    i: &'a [u8],
    externals: &ExternalRegistry,
) -> AMFResult<'a, Packet> {
    let (i, version) = parse_version(i)?;
    log::debug!("Reading {} packet", version);

    let (i, headers) = length_count(be_u16, |i| parse_header(i, version, externals))(i)?;
    let (i, messages) = length_count(be_u16, |i| parse_message(i, version, externals))(i)?;
    log::debug!(
        "Read {} headers and {} messages",
        headers.len(),
        messages.len()
    );

    Ok((
        i,
        Packet {
            version,
            headers,
            messages,
        },
    ))
}

/// Read a given buffer as a packet
///
/// Unlike parse, this function will not error if the entire slice isn't consumed
/// and will return the data that was not parsed
pub fn parse_incomplete(i: &[u8]) -> AMFResult<'_, Packet> {
    parse_incomplete_with(i, &ExternalRegistry::with_defaults())
}

/// Read a given slice as a packet
///
/// This function will return an error if the slice could not be parsed or if the entire slice
/// was not consumed
pub fn parse(i: &[u8]) -> Result<Packet, Error> {
    let (_, packet) = all_consuming(parse_incomplete)(i)?;
    Ok(packet)
}

/// Read a packet from a reader, consuming it to the end
pub fn read_packet<R: Read>(mut reader: R) -> Result<Packet, Error> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    parse(&data)
}
