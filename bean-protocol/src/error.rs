//! Handles creation/conversion of errors.

use nom::error::{Error as NomError};
use thiserror::Error;

/// Everything that can go wrong while reading a request. Parse errors borrow the input they
/// choked on, so they can't outlive the buffer being parsed.
#[derive(Error, Debug, PartialEq)]
pub enum Error<'a> {
    /// A tube name was longer than tube names are allowed to be.
    #[error("Bad tube name")]
    BadTubeName,

    /// There was a problem converting bytes, which are expected to be utf8-encoded,
    /// into a string.
    #[error("Error converting bytes to utf8 string")]
    Conversion(#[from] std::str::Utf8Error),

    /// A job body wasn't followed by a CRLF. Holds the announced body size so the caller can
    /// skip past it.
    #[error("Expected CRLF after job body")]
    ExpectedCrlf(u64),

    /// A put announced a body bigger than we accept. Holds the announced size so the caller
    /// can skip past the body.
    #[error("Job too big: {0} bytes")]
    JobTooBig(u64),

    /// There was an error parsing the protocol
    #[error("Error parsing the protocol")]
    Parse(NomError<&'a [u8]>),

    /// The parser needs more data before it can make a decision
    #[error("Incomplete data")]
    ParseIncomplete(nom::Needed),

    /// An unknown command was encountered
    #[error("Unknown command: {0}")]
    UnknownRequest(&'a str),
}

impl<'a> From<NomError<&'a [u8]>> for Error<'a> {
    fn from(err: NomError<&'a [u8]>) -> Self {
        Self::Parse(err)
    }
}

/// Wraps our precious [`Error`] type in an `std::result::Result`.
pub type Result<'a, T> = std::result::Result<T, Error<'a>>;
