use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::net::Channel;
use crate::protocol::rtsp::RtspResponse;

fn response(text: &str) -> RtspResponse {
    RtspResponse::from_bytes(text.as_bytes())
}

#[test]
fn test_status_parsing() {
    assert_eq!(response("RTSP/1.0 200 OK\r\n\r\n").status().unwrap(), 200);
    assert_eq!(
        response("RTSP/1.0 401 Unauthorized\r\n\r\n").status().unwrap(),
        401
    );
}

#[test]
fn test_malformed_status_line_is_rejected() {
    assert!(response("HTTP/1.1 200 OK\r\n\r\n").status().is_err());
    assert!(response("RTSP/x.0 200 OK\r\n\r\n").status().is_err());
    assert!(response("RTSP/1.0 abc\r\n\r\n").status().is_err());
    assert!(response("RTSP/1.0").status().is_err());
}

#[test]
fn test_find_header_plain() {
    let r = response("RTSP/1.0 200 OK\r\nCSeq: 7\r\nAudio-Latency: 11025\r\n\r\n");
    assert_eq!(r.find_header("CSeq", None).unwrap(), b"7");
    assert_eq!(r.find_header("Audio-Latency", None).unwrap(), b"11025");
    assert!(r.find_header("Session", None).is_none());
}

#[test]
fn test_find_header_subkey_forms() {
    let r = response(
        "RTSP/1.0 200 OK\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1;server_port=6000\r\n\r\n",
    );
    assert_eq!(
        r.find_header("Transport", Some("server_port")).unwrap(),
        b"6000"
    );
    // A bare subkey (no `=value`) is found with an empty value.
    assert_eq!(r.find_header("Transport", Some("unicast")).unwrap(), b"");
    assert!(r.find_header("Transport", Some("timing_port")).is_none());
}

#[test]
fn test_sequence_number_is_optional() {
    let r = response("RTSP/1.0 200 OK\r\nSession: 1F\r\n\r\n");
    assert_eq!(r.sequence_number().unwrap(), None);

    let r = response("RTSP/1.0 200 OK\r\nCSeq: 12\r\n\r\n");
    assert_eq!(r.sequence_number().unwrap(), Some(12));
}

#[test]
fn test_session_is_hexadecimal() {
    let r = response("RTSP/1.0 200 OK\r\nSession: 35C387AA\r\n\r\n");
    assert_eq!(r.session_id().unwrap(), 0x35C3_87AA);

    let r = response("RTSP/1.0 200 OK\r\n\r\n");
    assert!(r.session_id().is_err());
}

#[test]
fn test_server_port_extraction() {
    let r = response(
        "RTSP/1.0 200 OK\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;unicast;mode=record;server_port=53561\r\n\r\n",
    );
    assert_eq!(r.server_port().unwrap(), 53561);
}

#[test]
fn test_auth_challenge_extraction() {
    let r = response(
        "RTSP/1.0 401 Unauthorized\r\nWWW-Authenticate: Digest realm=\"airtunes\", nonce=\"abc123\"\r\n\r\n",
    );
    let (realm, nonce) = r.auth_challenge().unwrap();
    assert_eq!(realm, "airtunes");
    assert_eq!(nonce, "abc123");
}

#[test]
fn test_auth_challenge_skips_unknown_fields() {
    let r = response(
        "RTSP/1.0 401 Unauthorized\r\nWWW-Authenticate: Digest opaque=\"xyz\", realm=\"r\", nonce=\"n\"\r\n\r\n",
    );
    let (realm, nonce) = r.auth_challenge().unwrap();
    assert_eq!(realm, "r");
    assert_eq!(nonce, "n");
}

#[test]
fn test_auth_challenge_rejects_damage() {
    // Not Digest.
    let r = response("RTSP/1.0 401 x\r\nWWW-Authenticate: Basic realm=\"r\"\r\n\r\n");
    assert!(r.auth_challenge().is_err());
    // Unterminated quote.
    let r = response("RTSP/1.0 401 x\r\nWWW-Authenticate: Digest realm=\"r\r\n\r\n");
    assert!(r.auth_challenge().is_err());
    // Nonce missing.
    let r = response("RTSP/1.0 401 x\r\nWWW-Authenticate: Digest realm=\"r\"\r\n\r\n");
    assert!(r.auth_challenge().is_err());
}

/// A response bigger than the initial receive buffer, delivered in two
/// TCP segments, must be reassembled intact.
#[tokio::test]
async fn test_receive_reassembles_a_two_segment_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let padding = "x".repeat(1100);
    let message = format!(
        "RTSP/1.0 200 OK\r\nCSeq: 3\r\nSession: 35C387AA\r\nX-Pad: {padding}\r\nTransport: RTP/AVP/TCP;unicast;server_port=6000\r\n\r\n"
    );
    assert!(message.len() > 1024);

    let (channel, accepted) = tokio::join!(
        Channel::connect("127.0.0.1", port),
        listener.accept()
    );
    let mut channel = channel.unwrap();
    let (mut peer, _) = accepted.unwrap();

    // Both segments are on the wire before the client starts reading;
    // the first read fills the 1 KiB buffer, the peek sees the rest.
    peer.write_all(&message.as_bytes()[..900]).await.unwrap();
    peer.write_all(&message.as_bytes()[900..]).await.unwrap();
    peer.flush().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let mut response = RtspResponse::new();
    response.receive(&mut channel).await.unwrap();

    assert_eq!(response.as_bytes(), message.as_bytes());
    assert_eq!(response.status().unwrap(), 200);
    assert_eq!(response.session_id().unwrap(), 0x35C3_87AA);
    assert_eq!(response.server_port().unwrap(), 6000);
}
