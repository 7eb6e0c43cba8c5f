use crate::amf3::write::write_u29;
use crate::errors::Error;
use std::io::Write;

const REFERENCE_FLAG: u32 = 0x01;

/// The leading U29 of a reference-capable AMF3 value
#[derive(Copy, Clone, Debug, Eq, Ord, PartialOrd, PartialEq)]
pub(crate) enum Length {
    /// An inline value, with a value-specific length or flag field
    Size(u32),

    /// A back-reference into the relevant table
    Reference(usize),
}

impl Length {
    /// Split a decoded U29 on its low reference bit
    pub(crate) fn from_u29(val: u32) -> Self {
        if val & REFERENCE_FLAG == 0 {
            Length::Reference((val >> 1) as usize)
        } else {
            Length::Size(val >> 1)
        }
    }

    pub(crate) fn is_size(&self) -> bool {
        matches!(self, Length::Size(_))
    }

    /// The U29 this length is written as
    pub(crate) fn to_u29(self) -> Result<u32, Error> {
        let (value, flag) = match self {
            Length::Size(x) => (u64::from(x), REFERENCE_FLAG),
            Length::Reference(x) => (x as u64, 0),
        };
        let shifted = (value << 1) | u64::from(flag);
        u32::try_from(shifted).map_err(|_| Error::U29OutOfRange(shifted))
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        write_u29(writer, self.to_u29()?)
    }
}
