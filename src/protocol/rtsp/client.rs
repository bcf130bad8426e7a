use std::net::IpAddr;

use super::auth;
use super::{Method, RtspRequest, RtspResponse};
use crate::error::{AirTunesError, Result};
use crate::net::Channel;

/// Statuses the receiver uses when it is already playing for someone
/// else. Older firmware answers 453 ("Not Enough Bandwidth"), some
/// answer 354.
const RECEIVER_BUSY_STATUSES: [u16; 2] = [354, 453];
const NEED_AUTHENTICATION: u16 = 401;

/// Digest state across the session's requests.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthState {
    /// The receiver has not asked for authentication
    NotRequested,
    /// A 401 challenge arrived; the next transmission carries the answer
    ChallengePending { realm: String, nonce: String },
    /// A challenged request went through; keep authenticating
    Authenticated { realm: String, nonce: String },
}

/// Body attached to a request.
#[derive(Debug, Clone)]
pub struct RequestBody {
    /// The raw content bytes
    pub content: Vec<u8>,
    /// MIME type for the `Content-Type` header
    pub mime: &'static str,
}

impl RequestBody {
    /// Bundle content with its MIME type.
    #[must_use]
    pub fn new(content: Vec<u8>, mime: &'static str) -> Self {
        Self { content, mime }
    }
}

/// Correlates one request with one response over the control channel.
///
/// Owns the channel, a reusable request/response pair, the `CSeq`
/// counter, the session id and the authentication state. One
/// `send_command` call performs a full exchange including the single
/// authentication retry.
pub struct RtspClient {
    channel: Channel,
    url: String,
    password: String,
    request: RtspRequest,
    response: RtspResponse,
    cseq: u32,
    session_id: u32,
    audio_port: Option<u16>,
    auth: AuthState,
}

impl RtspClient {
    /// Open the control connection to `host:port`.
    ///
    /// The session URL is fixed to `rtsp://<peer-ip>/1`, the path
    /// AirPort Express receivers accept. `password` feeds Digest
    /// authentication if the receiver demands it; without one the
    /// firmware default is used.
    ///
    /// # Errors
    /// Returns [`AirTunesError::Network`] when the connection cannot be
    /// established.
    pub async fn connect(host: &str, port: u16, password: Option<&str>) -> Result<Self> {
        let channel = Channel::connect(host, port).await?;
        let url = format!("rtsp://{}/1", channel.peer_ip()?);
        Ok(Self {
            channel,
            url,
            password: password.unwrap_or(auth::DEFAULT_PASSWORD).to_string(),
            request: RtspRequest::new(Method::Options),
            response: RtspResponse::new(),
            cseq: 0,
            session_id: 0,
            audio_port: None,
            auth: AuthState::NotRequested,
        })
    }

    /// The session URL sent as request target.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Local address of the control connection.
    ///
    /// # Errors
    /// Returns [`AirTunesError::Network`] when the address cannot be
    /// retrieved.
    pub fn local_ip(&self) -> Result<IpAddr> {
        self.channel.local_ip()
    }

    /// Remote address of the control connection.
    ///
    /// # Errors
    /// Returns [`AirTunesError::Network`] when the address cannot be
    /// retrieved.
    pub fn peer_ip(&self) -> Result<IpAddr> {
        self.channel.peer_ip()
    }

    /// Session id assigned by the receiver's SETUP response.
    #[must_use]
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Audio port advertised by the receiver's SETUP response.
    #[must_use]
    pub fn audio_port(&self) -> Option<u16> {
        self.audio_port
    }

    /// Perform one command: build, send, receive, analyze; retry once
    /// with an `Authorization` header when challenged.
    ///
    /// # Errors
    /// [`AirTunesError::ReceiverBusy`] when the receiver is occupied,
    /// [`AirTunesError::AuthenticationFailed`] after a second 401,
    /// [`AirTunesError::RequestFailed`] on other failure statuses,
    /// [`AirTunesError::Protocol`] for malformed responses and
    /// [`AirTunesError::Network`] for transport failures.
    pub async fn send_command(&mut self, method: Method, body: Option<RequestBody>) -> Result<()> {
        let retry_required = self.transmit(method, body.as_ref()).await?;
        if retry_required {
            // The retry carries the Digest answer; being challenged
            // again means the password is wrong.
            if self.transmit(method, body.as_ref()).await? {
                return Err(AirTunesError::AuthenticationFailed {
                    message: "receiver rejected the password".to_string(),
                });
            }
        }

        match self.response.sequence_number()? {
            Some(echoed) if echoed != self.cseq => {
                tracing::warn!(
                    "CSeq in response ({echoed}) does not match the sent CSeq ({})",
                    self.cseq
                );
            }
            _ => {}
        }

        if method == Method::Setup {
            self.session_id = self.response.session_id().map_err(|_| {
                AirTunesError::protocol("SETUP response did not provide a valid \"Session\"")
            })?;
            let port = self.response.server_port().map_err(|_| {
                AirTunesError::protocol(
                    "SETUP response did not provide a valid \"Transport:server_port\"",
                )
            })?;
            self.audio_port = Some(port);
        }

        Ok(())
    }

    /// Close the control connection.
    ///
    /// # Errors
    /// Returns [`AirTunesError::Network`] when the shutdown fails.
    pub async fn close(self) -> Result<()> {
        self.channel.close().await
    }

    /// One request/response round trip. `Ok(true)` means the receiver
    /// challenged and the command must be retried.
    async fn transmit(&mut self, method: Method, body: Option<&RequestBody>) -> Result<bool> {
        self.request.reset(method);
        self.add_method_headers(method);
        if let AuthState::ChallengePending { realm, nonce }
        | AuthState::Authenticated { realm, nonce } = &self.auth
        {
            let header = auth::authorization_header(
                auth::DIGEST_USERNAME,
                &self.password,
                realm,
                nonce,
                method.as_str(),
                &self.url,
            );
            self.request.add_header("Authorization", &header);
        }
        if let Some(body) = body {
            self.request.set_content(&body.content, body.mime);
        }

        let message = self.request.encode(&self.url);
        tracing::debug!(
            "sending RTSP request:\n{}",
            String::from_utf8_lossy(&message)
        );
        self.channel.send(&message).await?;
        self.response.receive(&mut self.channel).await?;

        let status = self.response.status()?;
        match status {
            200 => {}
            201..=299 => {
                tracing::warn!(
                    "response carries success status {status}; this might indicate a warning on the receiver"
                );
            }
            NEED_AUTHENTICATION => {
                let (realm, nonce) = self.response.auth_challenge()?;
                self.auth = AuthState::ChallengePending { realm, nonce };
                return Ok(true);
            }
            _ if RECEIVER_BUSY_STATUSES.contains(&status) => {
                return Err(AirTunesError::ReceiverBusy { status });
            }
            _ => {
                return Err(AirTunesError::RequestFailed {
                    method: method.as_str(),
                    status,
                });
            }
        }
        if let AuthState::ChallengePending { realm, nonce } = &self.auth {
            let (realm, nonce) = (realm.clone(), nonce.clone());
            self.auth = AuthState::Authenticated { realm, nonce };
        }
        Ok(false)
    }

    /// Headers every method needs, plus the method-specific extras.
    /// `CSeq` is incremented on every transmission, retries included.
    fn add_method_headers(&mut self, method: Method) {
        self.cseq += 1;
        self.request.add_header("CSeq", &self.cseq.to_string());

        match method {
            Method::Options | Method::Announce | Method::SetParameter => {}
            Method::Setup => {
                self.request.add_header(
                    "Transport",
                    "RTP/AVP/TCP;unicast;interleaved=0-1;mode=record",
                );
            }
            Method::Record => {
                self.add_session_header();
                self.request.add_header("Range", "npt=0-");
                self.request.add_header("RTP-Info", "seq=0;rtptime=0");
            }
            Method::Flush => {
                self.add_session_header();
                self.request.add_header("RTP-Info", "seq=0;rtptime=0");
            }
            Method::Teardown => {
                self.add_session_header();
            }
        }
    }

    fn add_session_header(&mut self) {
        let session = format!("{:X}", self.session_id);
        self.request.add_header("Session", &session);
    }
}
