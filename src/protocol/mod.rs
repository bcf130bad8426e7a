//! Wire protocols spoken towards the receiver

pub mod rtsp;
pub mod sdp;
