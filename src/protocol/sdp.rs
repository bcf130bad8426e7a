//! Bodies carried by ANNOUNCE and SET_PARAMETER requests

use std::net::IpAddr;

/// The SDP body announcing an ALAC stream.
///
/// The `fmtp` line fixes 4096 frames per packet, 16-bit samples and two
/// channels; only the timescale comes from the container.
#[must_use]
pub fn announce_body(local_ip: IpAddr, remote_ip: IpAddr, timescale: u32) -> String {
    format!(
        "v=0\r\n\
         o=iTunes 1 O IN IP4 {local_ip}\r\n\
         s=iTunes\r\n\
         c=IN IP4 {remote_ip}\r\n\
         t=0 0\r\n\
         m=audio 0 RTP/AVP 96\r\n\
         a=rtpmap:96 AppleLossless\r\n\
         a=fmtp:96 4096 0 16 40 10 14 2 255 0 0 {timescale}\r\n"
    )
}

/// The `text/parameters` body carrying a volume in decibels.
#[must_use]
pub fn volume_body(db: f32) -> String {
    format!("volume: {}\r\n", format_db(db))
}

/// One decimal is the receiver's expected shape; fall back to two when
/// one would not round-trip the value (the -29.99 dB mute boundary).
fn format_db(db: f32) -> String {
    let short = format!("{db:.1}");
    if short.parse::<f32>() == Ok(db) {
        short
    } else {
        format!("{db:.2}")
    }
}
