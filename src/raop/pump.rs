use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::container::SampleCursor;
use crate::error::Result;
use crate::net::Channel;

/// Size of the framing header preceding every ALAC sample.
pub(crate) const AUDIO_HEADER_SIZE: usize = 16;

/// The receiver buffers roughly this much audio before it starts
/// playing; progress accounting shifts by it.
const RECEIVER_LAG: Duration = Duration::from_secs(2);

/// State shared between the controlling session and the pump task.
pub(crate) struct PumpShared {
    /// True while audio should flow; the controller clears it to ask the
    /// pump to stop at the next sample boundary.
    pub(crate) streaming: AtomicBool,
    /// Absolute instant playback effectively started (first packet time
    /// plus the receiver lag). Written once by the pump.
    playback_epoch: Mutex<Option<Instant>>,
    /// Completion signal; flips to true when the pump task ends.
    done: watch::Sender<bool>,
}

impl PumpShared {
    pub(crate) fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            streaming: AtomicBool::new(false),
            playback_epoch: Mutex::new(None),
            done,
        }
    }

    /// Subscribe to the pump's completion signal.
    pub(crate) fn done_signal(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    pub(crate) fn reset(&self) {
        let mut epoch = self
            .playback_epoch
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *epoch = None;
        self.done.send_replace(false);
    }

    fn mark_started(&self) {
        let mut epoch = self
            .playback_epoch
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *epoch = Some(Instant::now() + RECEIVER_LAG);
    }

    /// How far into the file playback has come. Zero before the first
    /// packet and while the receiver is still filling its buffer.
    pub(crate) fn progress(&self, start_time: Duration) -> Duration {
        let epoch = *self
            .playback_epoch
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match epoch {
            Some(epoch) => {
                let now = Instant::now();
                match now.checked_duration_since(epoch) {
                    Some(elapsed) => elapsed + start_time,
                    // Receiver lag not elapsed yet; it eats into the
                    // start offset first.
                    None => start_time.saturating_sub(epoch.duration_since(now)),
                }
            }
            None => Duration::ZERO,
        }
    }
}

/// Frame header for one sample: magic byte, big-endian length at bytes
/// 2-3 (sample size plus 12), marker bytes at 4 and 5, zeros elsewhere.
pub(crate) fn frame_header(sample_size: usize) -> [u8; AUDIO_HEADER_SIZE] {
    let mut header = [0u8; AUDIO_HEADER_SIZE];
    header[0] = 0x24;
    #[allow(clippy::cast_possible_truncation)]
    let length = (sample_size as u16).wrapping_add(12).to_be_bytes();
    header[2] = length[0];
    header[3] = length[1];
    header[4] = 0xf0;
    header[5] = 0xff;
    header
}

/// The background task feeding the audio channel.
pub(crate) struct AudioPump {
    cursor: SampleCursor,
    channel: Channel,
    shared: std::sync::Arc<PumpShared>,
    largest_sample_size: u32,
    track_length: Duration,
    start_time: Duration,
}

impl AudioPump {
    pub(crate) fn new(
        cursor: SampleCursor,
        channel: Channel,
        shared: std::sync::Arc<PumpShared>,
        largest_sample_size: u32,
        track_length: Duration,
        start_time: Duration,
    ) -> Self {
        Self {
            cursor,
            channel,
            shared,
            largest_sample_size,
            track_length,
            start_time,
        }
    }

    /// Pump until the file is exhausted or the controller asks to stop,
    /// then wait out the receiver's buffered audio.
    pub(crate) async fn run(mut self) -> Result<()> {
        let outcome = self.pump().await;
        if let Err(err) = &outcome {
            tracing::error!("audio pump stopped early: {err}");
        }
        self.shared.done.send_replace(true);
        outcome
    }

    async fn pump(&mut self) -> Result<()> {
        self.cursor.seek_to_time(self.start_time).await?;
        self.shared.mark_started();
        self.send_frames().await?;
        self.drain().await;
        Ok(())
    }

    async fn send_frames(&mut self) -> Result<()> {
        let mut message = vec![0u8; AUDIO_HEADER_SIZE + self.largest_sample_size as usize];
        tracing::debug!("starting to send audio packets");

        while self.shared.streaming.load(Ordering::Acquire) && self.cursor.has_more().await? {
            let sample_size = self
                .cursor
                .next_sample(&mut message[AUDIO_HEADER_SIZE..])
                .await? as usize;
            message[..AUDIO_HEADER_SIZE].copy_from_slice(&frame_header(sample_size));
            self.channel
                .send(&message[..AUDIO_HEADER_SIZE + sample_size])
                .await?;
        }
        Ok(())
    }

    /// The receiver still holds most of the file in its buffer when the
    /// last packet leaves. Sleep it off in one-second steps, bailing out
    /// as soon as the controller stops the session.
    async fn drain(&mut self) {
        let progress = self.shared.progress(self.start_time);
        let Some(buffered) = self.track_length.checked_sub(progress) else {
            return;
        };
        let mut remaining_seconds = buffered.as_secs() + 1;
        while self.shared.streaming.load(Ordering::Acquire) && remaining_seconds > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            remaining_seconds -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_layout() {
        let header = frame_header(1000);
        assert_eq!(header[0], 0x24);
        assert_eq!(header[1], 0x00);
        assert_eq!(u16::from_be_bytes([header[2], header[3]]), 1012);
        assert_eq!(header[4], 0xf0);
        assert_eq!(header[5], 0xff);
        assert!(header[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_progress_before_start_is_zero() {
        let shared = PumpShared::new();
        assert_eq!(shared.progress(Duration::from_secs(3)), Duration::ZERO);
    }

    #[test]
    fn test_progress_is_clipped_by_receiver_lag() {
        let shared = PumpShared::new();
        shared.mark_started();
        // The epoch lies two seconds in the future; progress stays zero
        // until then but the start offset is preserved afterwards.
        assert_eq!(shared.progress(Duration::ZERO), Duration::ZERO);
    }
}
