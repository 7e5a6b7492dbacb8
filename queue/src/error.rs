//! The main error enum for the engine lives here, and documents the various
//! conditions that can arise while interacting with the broker.
//!
//! Note that a reservation running out of time is *not* an error: that's a regular
//! [`ReserveOutcome`](crate::reserve::ReserveOutcome).

use crate::{
    job::JobID,
};
use thiserror::Error;

/// This is our error enum. It contains an entry for any part of the system in
/// which an expectation is not met or a problem occurs.
#[derive(Error, Debug, PartialEq)]
pub enum Error {
    /// An empty tube list was sent. Shame.
    #[error("Tube list cannot be empty")]
    TubeListEmpty,

    /// Tube not found
    #[error("That tube wasn't found: {0}")]
    TubeNotFound(String),

    /// That job wasn't found, or isn't in a state that allows the operation
    #[error("Job not found: {0}")]
    JobNotFound(JobID),

    /// A tube's scheduling loop is no longer running. This only happens after the
    /// loop detected corrupted state and bailed out.
    #[error("Tube loop stopped: {0}")]
    TubeGone(String),

    /// Bad configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Wraps `std::result::Result` around our `Error` enum
pub type Result<T> = std::result::Result<T, Error>;

/// Bail out of a tube loop after finding its holders in a state that should be impossible.
///
/// Holder bookkeeping cannot be trusted after this, so the loop panics (taking only its
/// own tube down) rather than handing out jobs from corrupted heaps.
macro_rules! malformed {
    ($($arg:tt)+) => {{
        tracing::error!("malformed tube state -- {}", format_args!($($arg)+));
        panic!("malformed tube state -- {}", format_args!($($arg)+));
    }}
}

pub(crate) use malformed;
