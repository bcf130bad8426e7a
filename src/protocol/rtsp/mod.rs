//! RAOP's RTSP-derived control protocol
//!
//! Requests are built into a single buffer and sent in one write;
//! responses are kept as raw bytes and probed lazily.

pub mod auth;
/// The request/response correlation client
pub mod client;
/// Outbound request builder
pub mod request;
/// Inbound response prober
pub mod response;
#[cfg(test)]
mod tests;

pub use client::{RequestBody, RtspClient};
pub use request::RtspRequest;
pub use response::RtspResponse;

/// RTSP methods used by the RAOP session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Probe the connection (and the receiver's authentication demands)
    Options,
    /// Announce the stream parameters (SDP body)
    Announce,
    /// Set up the transport and obtain the audio port
    Setup,
    /// Start the receiver recording the audio channel
    Record,
    /// Send a parameter such as the volume
    SetParameter,
    /// Drop the receiver's buffered audio
    Flush,
    /// Tear the session down
    Teardown,
}

impl Method {
    /// The literal method name on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Announce => "ANNOUNCE",
            Method::Setup => "SETUP",
            Method::Record => "RECORD",
            Method::SetParameter => "SET_PARAMETER",
            Method::Flush => "FLUSH",
            Method::Teardown => "TEARDOWN",
        }
    }
}

impl std::str::FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPTIONS" => Ok(Method::Options),
            "ANNOUNCE" => Ok(Method::Announce),
            "SETUP" => Ok(Method::Setup),
            "RECORD" => Ok(Method::Record),
            "SET_PARAMETER" => Ok(Method::SetParameter),
            "FLUSH" => Ok(Method::Flush),
            "TEARDOWN" => Ok(Method::Teardown),
            _ => Err(()),
        }
    }
}
