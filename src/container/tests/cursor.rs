use std::time::Duration;

use super::fixture_file;
use crate::container::{parse_file, SampleCursor};
use crate::error::AirTunesError;
use crate::testing::M4aFixture;

fn fixture() -> M4aFixture {
    // Timescale equal to the frames-per-packet makes one sample per
    // second, which keeps seek arithmetic easy to follow.
    M4aFixture::alac(
        4096,
        vec![
            vec![0xa0; 10],
            vec![0xa1; 20],
            vec![0xa2; 30],
            vec![0xa3; 40],
            vec![0xa4; 50],
        ],
    )
}

#[tokio::test]
async fn test_reading_all_samples_consumes_exactly_the_media_data() {
    let fixture = fixture();
    let file = fixture_file(&fixture);
    let descriptor = parse_file(file.path()).unwrap();
    let mut cursor = SampleCursor::open(file.path(), &descriptor).await.unwrap();

    let mut buf = vec![0u8; descriptor.largest_sample_size as usize];
    let mut consumed = 0u32;
    let mut index = 0u32;
    while cursor.has_more().await.unwrap() {
        assert_eq!(cursor.current_index().await.unwrap(), index);
        let size = cursor.next_sample(&mut buf).await.unwrap();
        let expected = &fixture.samples[index as usize];
        assert_eq!(&buf[..size as usize], &expected[..]);
        consumed += size;
        index += 1;
    }

    assert_eq!(index, descriptor.sample_count);
    assert_eq!(consumed, descriptor.total_sample_size);
    assert!(!cursor.has_more().await.unwrap());
}

#[tokio::test]
async fn test_seek_positions_both_cursors() {
    let fixture = fixture();
    let file = fixture_file(&fixture);
    let descriptor = parse_file(file.path()).unwrap();
    let mut cursor = SampleCursor::open(file.path(), &descriptor).await.unwrap();

    cursor.seek_to_time(Duration::from_secs(3)).await.unwrap();
    assert_eq!(cursor.current_index().await.unwrap(), 3);

    let mut buf = vec![0u8; 64];
    let size = cursor.next_sample(&mut buf).await.unwrap();
    assert_eq!(size, 40);
    assert_eq!(&buf[..40], &vec![0xa3u8; 40][..]);
}

#[tokio::test]
async fn test_seek_back_to_start() {
    let fixture = fixture();
    let file = fixture_file(&fixture);
    let descriptor = parse_file(file.path()).unwrap();
    let mut cursor = SampleCursor::open(file.path(), &descriptor).await.unwrap();

    let mut buf = vec![0u8; 64];
    cursor.next_sample(&mut buf).await.unwrap();
    cursor.next_sample(&mut buf).await.unwrap();

    cursor.seek_to_time(Duration::ZERO).await.unwrap();
    assert_eq!(cursor.current_index().await.unwrap(), 0);
    let size = cursor.next_sample(&mut buf).await.unwrap();
    assert_eq!(size, 10);
}

#[tokio::test]
async fn test_seek_past_end_fails_without_side_effects() {
    let fixture = fixture();
    let file = fixture_file(&fixture);
    let descriptor = parse_file(file.path()).unwrap();
    let mut cursor = SampleCursor::open(file.path(), &descriptor).await.unwrap();

    let mut buf = vec![0u8; 64];
    cursor.next_sample(&mut buf).await.unwrap();
    let index_before = cursor.current_index().await.unwrap();

    let outcome = cursor.seek_to_time(Duration::from_secs(5)).await;
    assert!(matches!(
        outcome,
        Err(AirTunesError::SeekOutOfRange { .. })
    ));

    // The failed seek must not have moved either position.
    assert_eq!(cursor.current_index().await.unwrap(), index_before);
    let size = cursor.next_sample(&mut buf).await.unwrap();
    assert_eq!(size, 20);
}

#[tokio::test]
async fn test_sample_larger_than_buffer_is_an_error() {
    let fixture = fixture();
    let file = fixture_file(&fixture);
    let descriptor = parse_file(file.path()).unwrap();
    let mut cursor = SampleCursor::open(file.path(), &descriptor).await.unwrap();

    let mut tiny = vec![0u8; 4];
    assert!(matches!(
        cursor.next_sample(&mut tiny).await,
        Err(AirTunesError::Playback { .. })
    ));
}
