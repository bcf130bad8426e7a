//! The RAOP session engine
//!
//! Sequences the control handshake against the receiver, owns both TCP
//! channels, and runs the background task pumping framed ALAC samples.

mod pump;
mod session;

pub use session::{PlaybackState, RaopSession};
