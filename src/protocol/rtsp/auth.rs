//! HTTP-Digest authentication (MD5, no qop) as AirPort receivers demand

use std::fmt::Write as _;

use md5::{Digest, Md5};

/// Username the receiver expects; fixed by the protocol.
pub const DIGEST_USERNAME: &str = "iTunes";
/// Password used when none is configured; matches what the AirPort
/// firmware ships with.
pub const DEFAULT_PASSWORD: &str = "geheim";

/// MD5 over the concatenation of `parts`, as uppercase hex.
#[must_use]
pub fn md5_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02X}");
    }
    hex
}

/// Compute the Digest `response` value.
///
/// `HA1 = MD5(username:realm:password)`, `HA2 = MD5(method:uri)`,
/// `response = MD5(HA1:nonce:HA2)` with every digest rendered as
/// uppercase hex before it is hashed again.
#[must_use]
pub fn digest_response(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
) -> String {
    let ha1 = md5_hex(&[
        username.as_bytes(),
        b":",
        realm.as_bytes(),
        b":",
        password.as_bytes(),
    ]);
    let ha2 = md5_hex(&[method.as_bytes(), b":", uri.as_bytes()]);
    md5_hex(&[
        ha1.as_bytes(),
        b":",
        nonce.as_bytes(),
        b":",
        ha2.as_bytes(),
    ])
}

/// Render the full `Authorization` header value for a request.
#[must_use]
pub fn authorization_header(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
) -> String {
    let response = digest_response(username, password, realm, nonce, method, uri);
    format!(
        "Digest username=\"{username}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\", response=\"{response}\""
    )
}
