//! Error types shared by every layer of the scanner

use thiserror::Error;

use crate::vfs::AddressError;

/// Errors produced while scanning an evidence set
#[derive(Debug, Error)]
pub enum ScanError {
    /// The address could not be parsed. Fatal to the single operation only.
    #[error("malformed address: {0}")]
    MalformedAddress(#[from] AddressError),

    /// A requested scanner or a declared dependency is not registered
    #[error("unknown scanner: {0}")]
    UnknownScanner(String),

    /// An external decoder rejected a member or signature hit
    #[error("decode error at {address}: {reason}")]
    Decode { address: String, reason: String },

    /// A scanner returned an error from process/slack/finish
    #[error("scanner {scanner} failed on {address}: {reason}")]
    ScannerFailure {
        scanner: String,
        address: String,
        reason: String,
    },

    /// A scanner panicked inside process/slack/finish
    #[error("scanner {scanner} panicked on {address}: {message}")]
    ScannerPanic {
        scanner: String,
        address: String,
        message: String,
    },

    /// File too large or too fragmented to be worth reading
    #[error("skipping {address}: {reason}")]
    ResourceBound { address: String, reason: String },

    /// The persistent store could not be reached. Fatal to the run.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ScanError {
    pub fn decode(address: impl ToString, reason: impl ToString) -> Self {
        ScanError::Decode {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors that must abort the whole run rather than a single scanner
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::StoreUnavailable(_))
    }
}

impl From<rusqlite::Error> for ScanError {
    fn from(e: rusqlite::Error) -> Self {
        ScanError::StoreUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
