//! Mock AirTunes receiver for exercising the session engine

#![allow(clippy::missing_panics_doc)]

use std::io;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::protocol::rtsp::auth;

/// What the mock receiver should demand and how it should misbehave.
#[derive(Debug, Clone, Default)]
pub struct MockReceiverConfig {
    /// Demand Digest authentication with this realm/nonce/password
    /// triple: the first request is answered 401, a correct
    /// `Authorization` passes, a wrong one earns another 401.
    pub challenge: Option<(String, String, String)>,
    /// Refuse every request with this status ("receiver busy").
    pub busy_status: Option<u16>,
    /// Extra padding header appended to the SETUP response, to push it
    /// across segment boundaries.
    pub setup_padding: usize,
}

/// One request as the mock receiver saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Method name from the request line
    pub method: String,
    /// Request target from the request line
    pub target: String,
    /// Header lines as (name, value) pairs, in arrival order
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// First value of a header, case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Observable state accumulated by the mock receiver.
#[derive(Debug, Clone, Default)]
pub struct MockReceiverState {
    /// Every control request received, in order
    pub requests: Vec<RecordedRequest>,
    /// Framed audio packets (16-byte header plus payload), in order
    pub audio_packets: Vec<Vec<u8>>,
    /// Bodies of SET_PARAMETER requests, in order
    pub parameter_bodies: Vec<String>,
    /// The session id handed out by SETUP
    pub session_id: u32,
    /// Whether a 401 challenge has been issued
    pub challenged: bool,
}

/// An in-process AirTunes receiver: an RTSP control listener plus a TCP
/// audio sink, with a recorded state for assertions.
pub struct MockReceiver {
    /// Port of the RTSP control listener
    pub rtsp_port: u16,
    /// Port of the audio listener, advertised in SETUP responses
    pub audio_port: u16,
    state: Arc<Mutex<MockReceiverState>>,
    shutdown: broadcast::Sender<()>,
}

impl MockReceiver {
    /// Bind both listeners on ephemeral ports and start serving.
    ///
    /// # Errors
    /// Returns the underlying I/O error when a listener cannot bind.
    pub async fn start(config: MockReceiverConfig) -> io::Result<Self> {
        let rtsp_listener = TcpListener::bind("127.0.0.1:0").await?;
        let audio_listener = TcpListener::bind("127.0.0.1:0").await?;
        let rtsp_port = rtsp_listener.local_addr()?.port();
        let audio_port = audio_listener.local_addr()?.port();

        let state = Arc::new(Mutex::new(MockReceiverState {
            session_id: rand::random::<u32>(),
            ..MockReceiverState::default()
        }));
        let (shutdown, _) = broadcast::channel(1);

        let rtsp_state = Arc::clone(&state);
        let rtsp_config = config.clone();
        let mut rtsp_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = rtsp_listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let state = Arc::clone(&rtsp_state);
                        let config = rtsp_config.clone();
                        tokio::spawn(async move {
                            Self::serve_control(stream, state, config, audio_port).await;
                        });
                    }
                    _ = rtsp_shutdown.recv() => break,
                }
            }
        });

        let audio_state = Arc::clone(&state);
        let mut audio_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = audio_listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let state = Arc::clone(&audio_state);
                        tokio::spawn(async move {
                            Self::collect_audio(stream, state).await;
                        });
                    }
                    _ = audio_shutdown.recv() => break,
                }
            }
        });

        Ok(Self {
            rtsp_port,
            audio_port,
            state,
            shutdown,
        })
    }

    /// Snapshot of the accumulated state.
    #[must_use]
    pub fn state(&self) -> MockReceiverState {
        self.state.lock().unwrap().clone()
    }

    /// Method names of all control requests received so far.
    #[must_use]
    pub fn methods_seen(&self) -> Vec<String> {
        self.state()
            .requests
            .iter()
            .map(|r| r.method.clone())
            .collect()
    }

    /// Stop both listeners.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    async fn serve_control(
        mut stream: TcpStream,
        state: Arc<Mutex<MockReceiverState>>,
        config: MockReceiverConfig,
        audio_port: u16,
    ) {
        let mut buffer = Vec::new();
        let mut chunk = vec![0u8; 4096];

        loop {
            let received = match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buffer.extend_from_slice(&chunk[..received]);

            while let Some((request, consumed)) = try_parse_request(&buffer) {
                buffer.drain(..consumed);
                let response = Self::respond(&request, &state, &config, audio_port);
                {
                    let mut state = state.lock().unwrap();
                    state.requests.push(request);
                }
                if stream.write_all(&response).await.is_err() {
                    return;
                }
            }
        }
    }

    fn respond(
        request: &RecordedRequest,
        state: &Arc<Mutex<MockReceiverState>>,
        config: &MockReceiverConfig,
        audio_port: u16,
    ) -> Vec<u8> {
        let cseq = request.header("CSeq").unwrap_or("0").to_string();

        if let Some(status) = config.busy_status {
            return encode_response(status, "Low Bandwidth", &[("CSeq", &cseq)]);
        }

        if let Some((realm, nonce, password)) = &config.challenge {
            let authorized = request
                .header("Authorization")
                .is_some_and(|header| {
                    verify_authorization(header, realm, nonce, password, &request.method)
                });
            if !authorized {
                state.lock().unwrap().challenged = true;
                let challenge = format!("Digest realm=\"{realm}\", nonce=\"{nonce}\"");
                return encode_response(
                    401,
                    "Unauthorized",
                    &[("CSeq", &cseq), ("WWW-Authenticate", &challenge)],
                );
            }
        }

        match request.method.as_str() {
            "SETUP" => {
                let session = format!("{:X}", state.lock().unwrap().session_id);
                let transport = format!(
                    "RTP/AVP/TCP;unicast;interleaved=0-1;mode=record;server_port={audio_port}"
                );
                let padding = "x".repeat(config.setup_padding);
                let mut headers: Vec<(&str, &str)> = vec![
                    ("CSeq", &cseq),
                    ("Session", &session),
                    ("Transport", &transport),
                    ("Audio-Latency", "11025"),
                ];
                if config.setup_padding > 0 {
                    headers.push(("X-Pad", &padding));
                }
                encode_response(200, "OK", &headers)
            }
            "SET_PARAMETER" => {
                let body = String::from_utf8_lossy(&request.body).to_string();
                state.lock().unwrap().parameter_bodies.push(body);
                encode_response(200, "OK", &[("CSeq", &cseq)])
            }
            _ => encode_response(200, "OK", &[("CSeq", &cseq)]),
        }
    }

    async fn collect_audio(mut stream: TcpStream, state: Arc<Mutex<MockReceiverState>>) {
        loop {
            let mut header = [0u8; 16];
            if stream.read_exact(&mut header).await.is_err() {
                return;
            }
            let payload_len =
                usize::from(u16::from_be_bytes([header[2], header[3]]).saturating_sub(12));
            let mut packet = vec![0u8; 16 + payload_len];
            packet[..16].copy_from_slice(&header);
            if stream.read_exact(&mut packet[16..]).await.is_err() {
                return;
            }
            state.lock().unwrap().audio_packets.push(packet);
        }
    }
}

impl Drop for MockReceiver {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Check a Digest `Authorization` header against the configured secret.
/// The uri is taken from the header itself: the digest covers the
/// session URL even for OPTIONS, whose request target is `*`.
fn verify_authorization(
    header: &str,
    realm: &str,
    nonce: &str,
    password: &str,
    method: &str,
) -> bool {
    if !header.starts_with("Digest ") {
        return false;
    }
    if quoted_field(header, "username") != Some(auth::DIGEST_USERNAME)
        || quoted_field(header, "realm") != Some(realm)
        || quoted_field(header, "nonce") != Some(nonce)
    {
        return false;
    }
    match (quoted_field(header, "uri"), quoted_field(header, "response")) {
        (Some(uri), Some(response)) => {
            response
                == auth::digest_response(
                    auth::DIGEST_USERNAME,
                    password,
                    realm,
                    nonce,
                    method,
                    uri,
                )
        }
        _ => false,
    }
}

fn quoted_field<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    let pattern = format!("{name}=\"");
    let start = header.find(&pattern)? + pattern.len();
    let end = header[start..].find('"')? + start;
    Some(&header[start..end])
}

fn encode_response(status: u16, reason: &str, headers: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    let mut bytes = Vec::new();
    write!(&mut bytes, "RTSP/1.0 {status} {reason}\r\n").unwrap();
    for (name, value) in headers {
        write!(&mut bytes, "{name}: {value}\r\n").unwrap();
    }
    write!(&mut bytes, "\r\n").unwrap();
    bytes
}

pub(crate) fn try_parse_request(data: &[u8]) -> Option<(RecordedRequest, usize)> {
    let header_end = data.windows(4).position(|w| w == b"\r\n\r\n")?;
    let header_len = header_end + 4;
    let header_str = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = header_str.lines();

    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    for line in lines {
        if let Some(colon) = line.find(':') {
            let name = line[..colon].trim().to_string();
            let value = line[colon + 1..].trim().to_string();
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = value.parse().unwrap_or(0);
            }
            headers.push((name, value));
        }
    }

    if data.len() < header_len + content_length {
        return None;
    }
    let body = data[header_len..header_len + content_length].to_vec();
    Some((
        RecordedRequest {
            method,
            target,
            headers,
            body,
        },
        header_len + content_length,
    ))
}
