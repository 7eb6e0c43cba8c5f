use nom::error::{ErrorKind, FromExternalError, ParseError};
use thiserror::Error;

/// The broad class an [`Error`] belongs to
///
/// Callers use this to tell corrupt input apart from input that is valid but uses a feature this
/// crate does not implement.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// The byte layout is malformed
    Format,

    /// The bytes are well formed but describe something invalid
    Serialization,

    /// A legal marker that is intentionally not implemented
    NotSupported,

    /// The underlying stream failed
    Io,
}

/// Enum for representing decoding and encoding errors
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// Out of bounds decoding, the input ended in the middle of a value
    #[error("Out of bounds")]
    OutOfBounds,

    /// The packet version marker was neither 0 nor 3
    #[error("Invalid packet version {0}")]
    InvalidVersion(u16),

    /// A type marker that is not part of the format
    #[error("Unknown type marker {0:#04x}")]
    UnknownTypeMarker(u8),

    /// An object end marker was found where a value was expected
    #[error("Unexpected object end marker")]
    UnexpectedObjectEnd,

    /// A string was not valid UTF-8
    #[error("Invalid UTF-8 string")]
    InvalidString,

    /// A type marker that is part of the format but is not supported
    #[error("Unsupported type {0:#04x}")]
    UnsupportedType(u8),

    /// A reference pointed outside of the current reference table
    #[error("Reference {index} is out of range, {len} entries available")]
    InvalidReference {
        /// The index that was requested
        index: usize,

        /// The number of entries in the table at that point
        len: usize,
    },

    /// An externalizable object was found for which no codec is registered
    #[error("No external codec registered for {0:?}")]
    UnresolvedExternal(String),

    /// An object with sealed traits is missing a value for one of its members
    #[error("Missing value for sealed member {0:?}")]
    MissingSealedMember(String),

    /// A value does not fit in a 29-bit unsigned integer
    #[error("Value {0} does not fit in a U29")]
    U29OutOfRange(u64),

    /// A string, array or packet section is too large for its length prefix
    #[error("Packet too large")]
    PacketTooLarge,

    /// Arrays and objects are nested deeper than [`MAX_NESTING_DEPTH`](crate::MAX_NESTING_DEPTH)
    #[error("Values nested deeper than {0} levels")]
    NestingTooDeep(usize),

    /// A type handle that the registry did not hand out
    #[error("Type handle {0} is not registered")]
    UnknownTypeHandle(usize),

    /// A structured document could not be converted back into values
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// An error from the underlying reader or writer
    #[error("IO error: {0}")]
    IoError(String, std::io::ErrorKind),

    /// A nom internal error, `remaining` is the number of unconsumed input bytes
    #[error("Nom internal error {kind:?} with {remaining} bytes remaining")]
    Nom {
        /// Bytes left in the input when the error occurred
        remaining: usize,

        /// The failing nom combinator
        kind: ErrorKind,
    },
}

impl Error {
    /// Get the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::OutOfBounds
            | Error::InvalidVersion(_)
            | Error::UnknownTypeMarker(_)
            | Error::UnexpectedObjectEnd
            | Error::InvalidString
            | Error::Nom { .. } => ErrorCategory::Format,
            Error::InvalidReference { .. }
            | Error::UnresolvedExternal(_)
            | Error::MissingSealedMember(_)
            | Error::U29OutOfRange(_)
            | Error::PacketTooLarge
            | Error::NestingTooDeep(_)
            | Error::UnknownTypeHandle(_)
            | Error::InvalidDocument(_) => ErrorCategory::Serialization,
            Error::UnsupportedType(_) => ErrorCategory::NotSupported,
            Error::IoError(_, _) => ErrorCategory::Io,
        }
    }
}

impl<'a> ParseError<&'a [u8]> for Error {
    fn from_error_kind(input: &'a [u8], kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Eof => Error::OutOfBounds,
            kind => Error::Nom {
                remaining: input.len(),
                kind,
            },
        }
    }

    fn append(_: &[u8], _: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a, E> FromExternalError<&'a [u8], E> for Error {
    fn from_external_error(input: &'a [u8], kind: ErrorKind, _e: E) -> Self {
        Error::from_error_kind(input, kind)
    }
}

impl From<nom::Err<Error>> for Error {
    fn from(e: nom::Err<Error>) -> Self {
        match e {
            nom::Err::Error(e) | nom::Err::Failure(e) => e,
            nom::Err::Incomplete(_) => Error::OutOfBounds,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::OutOfBounds,
            kind => Error::IoError(e.to_string(), kind),
        }
    }
}
