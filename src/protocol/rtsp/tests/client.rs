use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::error::AirTunesError;
use crate::protocol::rtsp::auth::{authorization_header, DEFAULT_PASSWORD, DIGEST_USERNAME};
use crate::protocol::rtsp::{Method, RtspClient};
use crate::testing::{try_parse_request, RecordedRequest};

/// A single-connection server answering each request with the next
/// scripted response, recording what it saw.
async fn scripted_server(responses: Vec<String>) -> (u16, JoinHandle<Vec<RecordedRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        let mut buffer = Vec::new();
        let mut chunk = vec![0u8; 4096];
        let mut sent = 0usize;

        loop {
            while let Some((request, consumed)) = try_parse_request(&buffer) {
                buffer.drain(..consumed);
                seen.push(request);
                stream.write_all(responses[sent].as_bytes()).await.unwrap();
                sent += 1;
                if sent == responses.len() {
                    return seen;
                }
            }
            let received = match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return seen,
                Ok(n) => n,
            };
            buffer.extend_from_slice(&chunk[..received]);
        }
    });

    (port, handle)
}

fn ok(cseq: u32) -> String {
    format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\r\n")
}

fn unauthorized(cseq: u32) -> String {
    format!(
        "RTSP/1.0 401 Unauthorized\r\nCSeq: {cseq}\r\nWWW-Authenticate: Digest realm=\"airtunes\", nonce=\"abc123\"\r\n\r\n"
    )
}

#[tokio::test]
async fn test_successful_command_roundtrip() {
    let (port, server) = scripted_server(vec![ok(1)]).await;
    let mut client = RtspClient::connect("127.0.0.1", port, None).await.unwrap();

    client.send_command(Method::Options, None).await.unwrap();

    let requests = server.await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "OPTIONS");
    assert_eq!(requests[0].target, "*");
    assert_eq!(requests[0].header("CSeq"), Some("1"));
    assert_eq!(requests[0].header("Authorization"), None);
}

#[tokio::test]
async fn test_cseq_increases_across_commands() {
    let (port, server) = scripted_server(vec![ok(1), ok(2), ok(3)]).await;
    let mut client = RtspClient::connect("127.0.0.1", port, None).await.unwrap();

    client.send_command(Method::Options, None).await.unwrap();
    client.send_command(Method::Options, None).await.unwrap();
    client.send_command(Method::Options, None).await.unwrap();

    let requests = server.await.unwrap();
    let cseqs: Vec<_> = requests
        .iter()
        .map(|r| r.header("CSeq").unwrap().to_string())
        .collect();
    assert_eq!(cseqs, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_single_authentication_retry() {
    let (port, server) = scripted_server(vec![unauthorized(1), ok(2)]).await;
    let mut client = RtspClient::connect("127.0.0.1", port, None).await.unwrap();

    client.send_command(Method::Options, None).await.unwrap();

    let requests = server.await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header("Authorization"), None);

    let expected = authorization_header(
        DIGEST_USERNAME,
        DEFAULT_PASSWORD,
        "airtunes",
        "abc123",
        "OPTIONS",
        "rtsp://127.0.0.1/1",
    );
    assert_eq!(requests[1].header("Authorization"), Some(expected.as_str()));
    // The retry is a fresh transmission with its own CSeq.
    assert_eq!(requests[1].header("CSeq"), Some("2"));
}

#[tokio::test]
async fn test_second_challenge_fails_the_command() {
    let (port, server) = scripted_server(vec![unauthorized(1), unauthorized(2)]).await;
    let mut client = RtspClient::connect("127.0.0.1", port, Some("wrong")).await.unwrap();

    let outcome = client.send_command(Method::Options, None).await;
    assert!(matches!(
        outcome,
        Err(AirTunesError::AuthenticationFailed { .. })
    ));
    assert_eq!(server.await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_authentication_sticks_to_later_commands() {
    let (port, server) = scripted_server(vec![unauthorized(1), ok(2), ok(3)]).await;
    let mut client = RtspClient::connect("127.0.0.1", port, None).await.unwrap();

    client.send_command(Method::Options, None).await.unwrap();
    client.send_command(Method::Announce, None).await.unwrap();

    let requests = server.await.unwrap();
    assert_eq!(requests.len(), 3);
    // Once authenticated, every request keeps carrying the header.
    assert!(requests[2].header("Authorization").is_some());
}

#[tokio::test]
async fn test_receiver_busy_statuses_are_fatal() {
    for status in [453u16, 354] {
        let busy = format!("RTSP/1.0 {status} Low Bandwidth\r\nCSeq: 1\r\n\r\n");
        let (port, _server) = scripted_server(vec![busy]).await;
        let mut client = RtspClient::connect("127.0.0.1", port, None).await.unwrap();

        let outcome = client.send_command(Method::Record, None).await;
        match outcome {
            Err(AirTunesError::ReceiverBusy { status: got }) => assert_eq!(got, status),
            other => panic!("expected ReceiverBusy, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_other_failure_statuses_are_fatal() {
    let (port, _server) =
        scripted_server(vec!["RTSP/1.0 500 Internal Error\r\nCSeq: 1\r\n\r\n".to_string()]).await;
    let mut client = RtspClient::connect("127.0.0.1", port, None).await.unwrap();

    let outcome = client.send_command(Method::Setup, None).await;
    assert!(matches!(
        outcome,
        Err(AirTunesError::RequestFailed { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_setup_extracts_session_and_audio_port() {
    let setup = "RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: 35C387AA\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1;mode=record;server_port=6000\r\n\r\n".to_string();
    let (port, server) = scripted_server(vec![setup, ok(2)]).await;
    let mut client = RtspClient::connect("127.0.0.1", port, None).await.unwrap();

    client.send_command(Method::Setup, None).await.unwrap();
    assert_eq!(client.session_id(), 0x35C3_87AA);
    assert_eq!(client.audio_port(), Some(6000));

    // The session id rides along on RECORD, uppercase hex.
    client.send_command(Method::Record, None).await.unwrap();
    let requests = server.await.unwrap();
    assert_eq!(requests[1].method, "RECORD");
    assert_eq!(requests[1].header("Session"), Some("35C387AA"));
    assert_eq!(requests[1].header("Range"), Some("npt=0-"));
    assert_eq!(requests[1].header("RTP-Info"), Some("seq=0;rtptime=0"));
}

#[tokio::test]
async fn test_setup_without_session_is_a_protocol_error() {
    let setup =
        "RTSP/1.0 200 OK\r\nCSeq: 1\r\nTransport: RTP/AVP/TCP;server_port=6000\r\n\r\n".to_string();
    let (port, _server) = scripted_server(vec![setup]).await;
    let mut client = RtspClient::connect("127.0.0.1", port, None).await.unwrap();

    let outcome = client.send_command(Method::Setup, None).await;
    assert!(matches!(outcome, Err(AirTunesError::Protocol { .. })));
}
