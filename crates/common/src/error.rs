//! Common error types

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No matching device, ambiguous match, or a missing config/interface/endpoint.
    /// `teardown` holds whatever went wrong while unwinding a partial acquisition.
    #[error("Discovery error: {reason}")]
    Discovery {
        reason: String,
        teardown: TeardownErrors,
    },

    #[error("Transfer error: {0}")]
    Transfer(#[from] rusb::Error),

    /// The device answered the AOA version query with something other than 1 or 2
    #[error("Unsupported AOA protocol version: {0}")]
    Protocol(u16),

    /// Malformed inbound JSON, or a report that cannot be framed
    #[error("Codec error: {0}")]
    Codec(#[from] protocol::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Teardown failed: {0}")]
    Teardown(TeardownErrors),
}

impl Error {
    pub fn discovery(reason: impl Into<String>) -> Self {
        Error::Discovery {
            reason: reason.into(),
            teardown: TeardownErrors::default(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One failed release step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    pub step: &'static str,
    pub error: rusb::Error,
}

/// Every failure seen while releasing a resource chain, in release order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownErrors {
    failures: Vec<TeardownFailure>,
}

impl TeardownErrors {
    pub fn push(&mut self, step: &'static str, error: rusb::Error) {
        self.failures.push(TeardownFailure { step, error });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TeardownFailure> {
        self.failures.iter()
    }

    /// `Ok(())` when nothing failed, otherwise one compound [`Error::Teardown`]
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown(self))
        }
    }
}

impl fmt::Display for TeardownErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.step, failure.error)?;
        }
        Ok(())
    }
}
