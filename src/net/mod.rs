//! TCP byte-channel transport

mod channel;

pub use channel::{open_channel_count, Channel};
