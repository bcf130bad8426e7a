//! Channel accounting across a full session lifecycle.
//!
//! This lives in its own test binary: the open-channel counter is
//! process-wide, and no other test may race it.

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use airtunes::net::open_channel_count;
use airtunes::testing::{M4aFixture, MockReceiver, MockReceiverConfig};
use airtunes::{parse_file, RaopSession, SampleCursor};

#[tokio::test]
async fn test_every_channel_is_released() {
    assert_eq!(open_channel_count(), 0);

    let fixture = M4aFixture::alac(4096, vec![vec![0x55; 30], vec![0x66; 40]]);
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&fixture.build()).unwrap();
    file.flush().unwrap();

    let descriptor = parse_file(file.path()).unwrap();
    let cursor = SampleCursor::open(file.path(), &descriptor).await.unwrap();

    let receiver = MockReceiver::start(MockReceiverConfig::default()).await.unwrap();
    let mut session = RaopSession::connect("127.0.0.1", receiver.rtsp_port, None)
        .await
        .unwrap();
    assert_eq!(open_channel_count(), 1); // control channel

    session
        .play(&descriptor, cursor, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(open_channel_count(), 2); // control + audio

    tokio::time::sleep(Duration::from_millis(200)).await;
    session.stop().await.unwrap();
    // The pump was joined; its audio channel is gone.
    assert_eq!(open_channel_count(), 1);

    session.close().await;
    assert_eq!(open_channel_count(), 0);
}
