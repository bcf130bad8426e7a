use bytes::BytesMut;

use crate::error::{AirTunesError, Result};
use crate::net::Channel;

/// Initial receive buffer size; most responses fit in one read.
const RECEIVE_BUFFER_INITIAL: usize = 1024;
/// Growth step when a response spans multiple TCP segments.
const RECEIVE_BUFFER_INCREMENT: usize = 512;

/// An inbound RTSP response.
///
/// The raw bytes are retained and probed on demand; nothing is parsed up
/// front. The object is reused across the session, keeping its buffer.
#[derive(Debug, Default)]
pub struct RtspResponse {
    buffer: BytesMut,
    len: usize,
}

impl RtspResponse {
    /// Create an empty response.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(RECEIVE_BUFFER_INITIAL),
            len: 0,
        }
    }

    /// Build a response from already-received bytes (tests).
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut response = Self::new();
        response.buffer.clear();
        response.buffer.extend_from_slice(bytes);
        response.len = bytes.len();
        response
    }

    /// The raw response bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// Receive one response from the channel.
    ///
    /// Reads into the buffer; as long as a read filled it completely and
    /// the channel still has data queued, the buffer grows and reading
    /// continues. This reassembles responses split across TCP segments.
    ///
    /// # Errors
    /// [`AirTunesError::Network`] on socket failure,
    /// [`AirTunesError::Protocol`] when the peer closes before sending
    /// anything.
    pub async fn receive(&mut self, channel: &mut Channel) -> Result<()> {
        let mut capacity = RECEIVE_BUFFER_INITIAL.max(self.buffer.capacity());
        self.buffer.resize(capacity, 0);
        self.len = 0;

        loop {
            let received = channel.recv(&mut self.buffer[self.len..capacity]).await?;
            if received == 0 {
                if self.len == 0 {
                    return Err(AirTunesError::protocol(
                        "connection closed before a response arrived",
                    ));
                }
                break;
            }
            self.len += received;

            if self.len == capacity && channel.has_pending_input().await {
                capacity += RECEIVE_BUFFER_INCREMENT;
                self.buffer.resize(capacity, 0);
                continue;
            }
            break;
        }

        tracing::debug!(
            "received RTSP response:\n{}",
            String::from_utf8_lossy(self.as_bytes())
        );
        Ok(())
    }

    /// The status code from the first line.
    ///
    /// # Errors
    /// [`AirTunesError::Protocol`] when the line does not start with
    /// `RTSP/<digit>.<digit><space>` followed by a number.
    pub fn status(&self) -> Result<u16> {
        let bytes = self.as_bytes();
        if bytes.len() < 12 {
            return Err(AirTunesError::protocol(
                "response too short to carry a status line",
            ));
        }
        let prefix_ok = &bytes[..5] == b"RTSP/"
            && bytes[5].is_ascii_digit()
            && bytes[6] == b'.'
            && bytes[7].is_ascii_digit()
            && bytes[8] == b' ';
        if !prefix_ok {
            return Err(AirTunesError::protocol(format!(
                "bad protocol prefix; expected \"RTSP/<digit>.<digit> \", found {:?}",
                String::from_utf8_lossy(&bytes[..9])
            )));
        }
        parse_decimal(&bytes[9..])
            .ok_or_else(|| AirTunesError::protocol("cannot read status value from response"))
    }

    /// Find the value of `key` among the header lines. With a subkey,
    /// scan the value's `;`-separated fields for `subkey=value` (the
    /// returned slice starts past the `=`) or a bare `subkey;` (the
    /// returned slice is empty).
    #[must_use]
    pub fn find_header(&self, key: &str, subkey: Option<&str>) -> Option<&[u8]> {
        // The status line never holds a header; skip it.
        for line in self.as_bytes().split(|&b| b == b'\n').skip(1) {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let Some(rest) = line.strip_prefix(key.as_bytes()) else {
                continue;
            };
            let Some(value) = rest.strip_prefix(b": ") else {
                continue;
            };
            let Some(subkey) = subkey else {
                return Some(value);
            };
            // The first field names the protocol, never a subkey; real
            // subkeys follow the first ';'.
            for field in value.split(|&b| b == b';').skip(1) {
                if let Some(after) = field.strip_prefix(subkey.as_bytes()) {
                    if let Some(assigned) = after.strip_prefix(b"=") {
                        return Some(assigned);
                    }
                    if after.is_empty() {
                        return Some(after);
                    }
                }
            }
            // No subkey on this line; a later line may repeat the key.
        }
        None
    }

    /// The `CSeq` echo. A missing header is tolerated (`None`).
    ///
    /// # Errors
    /// [`AirTunesError::Protocol`] when the header is present but not a
    /// number.
    pub fn sequence_number(&self) -> Result<Option<u32>> {
        match self.find_header("CSeq", None) {
            Some(value) => parse_decimal::<u32>(value)
                .map(Some)
                .ok_or_else(|| AirTunesError::protocol("cannot read CSeq value from response")),
            None => {
                tracing::warn!("no CSeq value in response (continuing anyway)");
                Ok(None)
            }
        }
    }

    /// The `Session` header, a hexadecimal identifier.
    ///
    /// # Errors
    /// [`AirTunesError::Protocol`] when the header is missing or not a
    /// hexadecimal number.
    pub fn session_id(&self) -> Result<u32> {
        let value = self
            .find_header("Session", None)
            .ok_or_else(|| AirTunesError::protocol("no Session value in response"))?;
        parse_hex(value)
            .ok_or_else(|| AirTunesError::protocol("cannot read Session value from response"))
    }

    /// The `server_port` subkey of the `Transport` header.
    ///
    /// # Errors
    /// [`AirTunesError::Protocol`] when the subkey is missing or not a
    /// number.
    pub fn server_port(&self) -> Result<u16> {
        let value = self
            .find_header("Transport", Some("server_port"))
            .ok_or_else(|| AirTunesError::protocol("no Transport:server_port value in response"))?;
        parse_decimal(value).ok_or_else(|| {
            AirTunesError::protocol("cannot read Transport:server_port value from response")
        })
    }

    /// The Digest challenge from `WWW-Authenticate`: `(realm, nonce)`.
    ///
    /// # Errors
    /// [`AirTunesError::Protocol`] when the header is missing, is not a
    /// Digest challenge, has unterminated quoting, or lacks either
    /// field.
    pub fn auth_challenge(&self) -> Result<(String, String)> {
        let value = self
            .find_header("WWW-Authenticate", None)
            .ok_or_else(|| AirTunesError::protocol("no WWW-Authenticate value in response"))?;
        let value = std::str::from_utf8(value)
            .map_err(|_| AirTunesError::protocol("WWW-Authenticate value is not valid UTF-8"))?;

        let Some(mut fields) = value.strip_prefix("Digest ") else {
            return Err(AirTunesError::protocol(format!(
                "WWW-Authenticate names an unknown method: {value:?}"
            )));
        };

        let mut realm = None;
        let mut nonce = None;
        loop {
            fields = fields.trim_start_matches([' ', ',']);
            if fields.is_empty() {
                break;
            }
            let Some(assignment) = fields.find("=\"") else {
                return Err(AirTunesError::protocol(format!(
                    "unknown field {fields:?} in WWW-Authenticate"
                )));
            };
            let name = &fields[..assignment];
            let rest = &fields[assignment + 2..];
            let Some(end_quote) = rest.find('"') else {
                return Err(AirTunesError::protocol(
                    "field value not terminated by a double quote in WWW-Authenticate",
                ));
            };
            let value = &rest[..end_quote];
            match name {
                "realm" => realm = Some(value.to_string()),
                "nonce" => nonce = Some(value.to_string()),
                other => {
                    tracing::warn!("unknown field {other:?} in WWW-Authenticate; skipping it");
                }
            }
            fields = &rest[end_quote + 1..];
        }

        match (realm, nonce) {
            (Some(realm), Some(nonce)) => Ok((realm, nonce)),
            _ => Err(AirTunesError::protocol(
                "challenge incomplete: realm or nonce missing in WWW-Authenticate",
            )),
        }
    }
}

/// Parse the leading decimal digits of `bytes`, skipping leading spaces.
fn parse_decimal<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace())?;
    let digits: &[u8] = match bytes[start..].iter().position(|b| !b.is_ascii_digit()) {
        Some(0) => return None,
        Some(end) => &bytes[start..start + end],
        None => &bytes[start..],
    };
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Parse the leading hexadecimal digits of `bytes`.
fn parse_hex(bytes: &[u8]) -> Option<u32> {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace())?;
    let digits: &[u8] = match bytes[start..]
        .iter()
        .position(|b| !b.is_ascii_hexdigit())
    {
        Some(0) => return None,
        Some(end) => &bytes[start..start + end],
        None => &bytes[start..],
    };
    u32::from_str_radix(std::str::from_utf8(digits).ok()?, 16).ok()
}
