//! Crate-wide error type
//!
//! High resistance is not an error. It ends a run through
//! [`RefineOutcome::AbortedHighResistance`](crate::refine::RefineOutcome). Numeric degeneracy in a
//! sweep is not an error either, it is substituted in the analysis. What is left here are genuine
//! failures: the supply or a log file went away, or the preferences are unusable.

use thiserror::Error;
use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error
{
    /// Transport or log file failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The supply answered a query with something that is not a number
    #[error("supply answered `{request}` with {reply:?}, expected a number")]
    BadReply { request: String, reply: String },

    /// A finite retry budget was configured and ran out
    #[error("supply did not answer `{request}` after {attempts} attempts")]
    NoReply { request: String, attempts: u32 },

    /// The remote end closed the stream
    #[error("supply closed the connection")]
    Disconnected,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error
{
    /// Whether the supply itself is unreachable, as opposed to a local problem
    pub fn is_transport(&self) -> bool
    {
        matches!(self, Self::NoReply { .. } | Self::Disconnected)
    }
}
