use bytes::{BufMut, BytesMut};

use super::Method;

/// Starting capacity of the header buffer; enough for every request this
/// client builds, so growth only happens for oversized auth headers.
const HEADER_BUFFER_INITIAL: usize = 1024;

/// An outbound RTSP request under construction.
///
/// Headers accumulate as raw `name: value\r\n` lines in one buffer. The
/// request object is reused across the whole session; `reset` switches
/// the method while keeping the allocations.
#[derive(Debug)]
pub struct RtspRequest {
    method: Method,
    headers: BytesMut,
    body: Vec<u8>,
}

impl RtspRequest {
    /// Create a request for `method`.
    #[must_use]
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: BytesMut::with_capacity(HEADER_BUFFER_INITIAL),
            body: Vec::new(),
        }
    }

    /// Clear the request for reuse, retaining buffer capacity.
    pub fn reset(&mut self, method: Method) {
        self.method = method;
        self.headers.clear();
        self.body.clear();
    }

    /// The request's method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Append one header line.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.put_slice(name.as_bytes());
        self.headers.put_slice(b": ");
        self.headers.put_slice(value.as_bytes());
        self.headers.put_slice(b"\r\n");
    }

    /// Install the body, adding the matching `Content-Type` and
    /// `Content-Length` headers.
    pub fn set_content(&mut self, content: &[u8], mime: &str) {
        self.add_header("Content-Type", mime);
        self.add_header("Content-Length", &content.len().to_string());
        self.body.clear();
        self.body.extend_from_slice(content);
    }

    /// Serialize into one buffer ready for a single send. The target is
    /// `*` for OPTIONS, the session URL otherwise.
    #[must_use]
    pub fn encode(&self, url: &str) -> Vec<u8> {
        let target = match self.method {
            Method::Options => "*",
            _ => url,
        };
        let method = self.method.as_str();

        let mut message =
            Vec::with_capacity(method.len() + target.len() + 14 + self.headers.len() + 2 + self.body.len());
        message.extend_from_slice(method.as_bytes());
        message.push(b' ');
        message.extend_from_slice(target.as_bytes());
        message.extend_from_slice(b" RTSP/1.0\r\n");
        message.extend_from_slice(&self.headers);
        message.extend_from_slice(b"\r\n");
        message.extend_from_slice(&self.body);
        message
    }
}
