//! # airtunes
//!
//! A resource-frugal AirTunes (RAOP) client. It parses the MPEG-4
//! container of an Apple Lossless file, negotiates an RTSP-derived
//! session with an AirPort Express receiver, and pumps the raw ALAC
//! frames over a TCP audio channel -- no transcoding, no decoding.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use airtunes::{parse_file, RaopSession, SampleCursor};
//!
//! # async fn example() -> airtunes::Result<()> {
//! let descriptor = parse_file("track.m4a")?;
//! let cursor = SampleCursor::open("track.m4a", &descriptor).await?;
//!
//! let mut session = RaopSession::connect("192.168.1.10", 5000, None).await?;
//! session.play(&descriptor, cursor, Duration::ZERO).await?;
//! session.wait().await?;
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// M4A container parsing and sample iteration
pub mod container;
/// Error types
pub mod error;
/// TCP byte channels
pub mod net;
/// RTSP and SDP protocol pieces
pub mod protocol;
/// The session engine and audio pump
pub mod raop;
/// Test support (mock receiver, container fixtures)
pub mod testing;

pub use container::{parse_file, Encoding, ParseStatus, SampleCursor, TrackDescriptor};
pub use error::{AirTunesError, Result};
pub use raop::{PlaybackState, RaopSession};
