use crate::errors::Error;
use byteorder::{BigEndian, WriteBytesExt};
use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;
use nom::ToUsize;
use std::io::Write;

/// The result of a nom parser in this crate
pub type AMFResult<'a, T> = IResult<&'a [u8], T, Error>;

/// Abort the current parse with a non-recoverable error
pub(crate) fn fail<'a, T>(e: Error) -> AMFResult<'a, T> {
    Err(nom::Err::Failure(e))
}

pub(crate) fn take_str(i: &[u8], length: impl ToUsize) -> AMFResult<'_, &str> {
    let (i, bytes) = take(length)(i)?;
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok((i, s)),
        Err(_) => fail(Error::InvalidString),
    }
}

/// Read a u16 length prefixed UTF-8 string
pub(crate) fn parse_string(i: &[u8]) -> AMFResult<'_, &str> {
    let (i, length) = be_u16(i)?;
    take_str(i, length)
}

/// Write a u16 length prefixed UTF-8 string
pub(crate) fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<(), Error> {
    let length = u16::try_from(s.len()).map_err(|_| Error::PacketTooLarge)?;
    writer.write_u16::<BigEndian>(length)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}
