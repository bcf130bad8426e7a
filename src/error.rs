use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while parsing a container or driving a session
#[derive(Debug, Error)]
pub enum AirTunesError {
    /// The container is structurally broken (short read, impossible box
    /// size, missing required box)
    #[error("malformed container: {message}")]
    ContainerMalformed {
        /// Description of what was wrong with the container
        message: String,
    },

    /// Socket or file I/O failure
    #[error("network error: {0}")]
    Network(#[from] io::Error),

    /// The receiver sent something the protocol does not allow
    #[error("protocol violation: {message}")]
    Protocol {
        /// Description of the violation
        message: String,
    },

    /// Digest authentication was rejected
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the failure
        message: String,
    },

    /// The receiver reported it is busy (it is most likely already
    /// playing audio for another sender)
    #[error("receiver busy (status {status}); it is probably playing audio already")]
    ReceiverBusy {
        /// The status code the receiver answered with
        status: u16,
    },

    /// A control request was answered with a failure status
    #[error("{method} request failed with status {status}")]
    RequestFailed {
        /// The request method
        method: &'static str,
        /// The status code the receiver answered with
        status: u16,
    },

    /// A seek was requested past the end of the track
    #[error("seek offset {offset:?} is past the end of the track")]
    SeekOutOfRange {
        /// The requested intra-file offset
        offset: Duration,
    },

    /// Failure inside the audio pump
    #[error("playback error: {message}")]
    Playback {
        /// Description of the failure
        message: String,
    },
}

impl AirTunesError {
    pub(crate) fn container(message: impl Into<String>) -> Self {
        Self::ContainerMalformed {
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn playback(message: impl Into<String>) -> Self {
        Self::Playback {
            message: message.into(),
        }
    }

    /// Check whether this error means the receiver refused the session
    /// because it is already in use
    #[must_use]
    pub fn is_receiver_busy(&self) -> bool {
        matches!(self, Self::ReceiverBusy { .. })
    }
}

/// Result type alias for AirTunes operations
pub type Result<T> = std::result::Result<T, AirTunesError>;
