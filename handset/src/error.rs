//! Error types for handset driver operations.

use std::io;

use handset_proto::{Code, Status};

/// Alias for `Result<T, handset::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by device operations.
///
/// The split between [`Error::Transport`] and [`Error::Status`] is decided
/// where bytes leave or enter the socket, never by inspecting messages.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The call could not complete: connection refused or lost, companion
    /// crashed, or the companion reported itself unavailable.
    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),

    /// The companion completed the call with a non-OK status.
    #[error("companion returned {0}")]
    Status(Status),

    /// The capability is not implemented by this driver or protocol.
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// Name of the capability.
        operation: &'static str,
    },

    /// A local file, directory, or sink operation failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The accessibility payload was not valid JSON for the element tree.
    #[error("malformed accessibility tree: {0}")]
    Json(#[from] serde_json::Error),

    /// The companion sent a message that does not fit the call.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Misuse of a screen recording handle.
    #[error("recording: {0}")]
    Recording(String),

    /// The main step of a composite operation succeeded but a follow-up
    /// step did not.
    #[error("{operation} incomplete: {}", failures.join("; "))]
    Incomplete {
        /// Name of the composite operation.
        operation: &'static str,
        /// One description per failed follow-up step.
        failures: Vec<String>,
    },
}

impl Error {
    /// Builds a transport error from any displayable cause.
    pub(crate) fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(io::Error::new(io::ErrorKind::NotConnected, msg.into()))
    }

    /// Converts a failed trailer into an error.
    ///
    /// `Unavailable` means the companion could not serve the call at all,
    /// which is the same class of failure as a dropped connection.
    pub(crate) fn from_status(status: Status) -> Self {
        if status.code == Code::Unavailable {
            Self::Transport(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                status.to_string(),
            ))
        } else {
            Self::Status(status)
        }
    }

    /// Returns `true` if the call could not complete and a reconnect may help.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` for [`Error::Unsupported`].
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Status returned by the companion, if this is an application error.
    pub const fn status(&self) -> Option<&Status> {
        match self {
            Self::Status(s) => Some(s),
            _ => None,
        }
    }
}
