use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::pump::{AudioPump, PumpShared};
use crate::container::{SampleCursor, TrackDescriptor};
use crate::error::{AirTunesError, Result};
use crate::net::Channel;
use crate::protocol::rtsp::{Method, RequestBody, RtspClient};
use crate::protocol::sdp;

/// Default playback volume; kept across plays on the same session.
const VOLUME_DEFAULT: f32 = 15.0;
/// Anything below this is sent as muted.
const VOLUME_MIN: f32 = 0.01;
const VOLUME_MUTED: f32 = 0.0;
const VOLUME_MAX: f32 = 30.0;
/// The receiver expects volume as decibels: 0 dB at full scale, -30 dB
/// at the bottom of the dial, -144 dB for mute.
const VOLUME_DB_OFFSET: f32 = -30.0;
const VOLUME_DB_MUTED: f32 = -144.0;

/// Where the session is in its playback lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No audio pump running
    Idle,
    /// The pump is emitting (or draining) audio
    Streaming,
    /// Stop requested; the pump has not been joined yet
    Stopping,
}

/// A playback session against one AirTunes receiver.
///
/// Owns the RTSP control connection and, while playing, the background
/// pump with the audio connection. Volume changes ride the control
/// channel and are safe while the pump writes audio.
pub struct RaopSession {
    host: String,
    rtsp: RtspClient,
    volume: f32,
    start_time: Duration,
    shared: Arc<PumpShared>,
    pump: Option<JoinHandle<Result<()>>>,
}

impl RaopSession {
    /// Open the control connection to the receiver.
    ///
    /// `password` is only used if the receiver demands authentication;
    /// see [`RtspClient::connect`].
    ///
    /// # Errors
    /// Returns [`AirTunesError::Network`] when the connection cannot be
    /// established.
    pub async fn connect(host: &str, port: u16, password: Option<&str>) -> Result<Self> {
        let rtsp = RtspClient::connect(host, port, password).await?;
        Ok(Self {
            host: host.to_string(),
            rtsp,
            volume: VOLUME_DEFAULT,
            start_time: Duration::ZERO,
            shared: Arc::new(PumpShared::new()),
            pump: None,
        })
    }

    /// Start playing the track, beginning `start_time` into the file.
    ///
    /// Performs the full handshake: OPTIONS, ANNOUNCE, SETUP, RECORD and
    /// the initial volume, opens the audio connection to the port the
    /// receiver advertised, then spawns the pump and returns.
    ///
    /// # Errors
    /// Any control-command failure aborts the attempt; see
    /// [`RtspClient::send_command`]. No audio connection is opened
    /// unless SETUP succeeded.
    pub async fn play(
        &mut self,
        descriptor: &TrackDescriptor,
        cursor: SampleCursor,
        start_time: Duration,
    ) -> Result<()> {
        if self.pump.is_some() {
            return Err(AirTunesError::playback("a play is already in progress"));
        }
        self.start_time = start_time;

        self.rtsp.send_command(Method::Options, None).await?;

        let announce = sdp::announce_body(
            self.rtsp.local_ip()?,
            self.rtsp.peer_ip()?,
            descriptor.timescale,
        );
        self.rtsp
            .send_command(
                Method::Announce,
                Some(RequestBody::new(announce.into_bytes(), "application/sdp")),
            )
            .await?;

        self.rtsp.send_command(Method::Setup, None).await?;
        let audio_port = self
            .rtsp
            .audio_port()
            .ok_or_else(|| AirTunesError::protocol("SETUP did not yield an audio port"))?;
        let audio = Channel::connect(&self.host, audio_port).await?;

        self.rtsp.send_command(Method::Record, None).await?;
        self.send_volume().await?;

        self.shared.reset();
        self.shared.streaming.store(true, Ordering::Release);
        let pump = AudioPump::new(
            cursor,
            audio,
            Arc::clone(&self.shared),
            descriptor.largest_sample_size,
            descriptor.length(),
            start_time,
        );
        self.pump = Some(tokio::spawn(pump.run()));
        Ok(())
    }

    /// Current playback state.
    #[must_use]
    pub fn playback_state(&self) -> PlaybackState {
        if self.pump.is_none() {
            PlaybackState::Idle
        } else if self.shared.streaming.load(Ordering::Acquire) {
            PlaybackState::Streaming
        } else {
            PlaybackState::Stopping
        }
    }

    /// Change the volume. Values below the mute threshold mute, values
    /// above the dial maximum are capped. The setting survives across
    /// plays; while streaming it is pushed to the receiver immediately.
    ///
    /// # Errors
    /// See [`RtspClient::send_command`].
    pub async fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.volume = if volume < VOLUME_MIN {
            VOLUME_MUTED
        } else if volume > VOLUME_MAX {
            VOLUME_MAX
        } else {
            volume
        };

        if self.shared.streaming.load(Ordering::Acquire) {
            self.send_volume().await?;
        }
        Ok(())
    }

    /// The configured volume.
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// How far into the file playback has come, accounting for the
    /// receiver's buffering lag and the start offset.
    #[must_use]
    pub fn progress(&self) -> Duration {
        self.shared.progress(self.start_time)
    }

    /// A future resolving once the pump task has finished (either the
    /// file ended and drained, or the pump failed). Does not join the
    /// task and does not borrow the session, so it can be raced against
    /// control operations.
    #[must_use]
    pub fn finished(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut done = self.shared.done_signal();
        async move {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// Stop playback: ask the pump to exit, join it, then FLUSH the
    /// receiver's buffer and TEARDOWN the session. Does nothing when no
    /// playback is active.
    ///
    /// # Errors
    /// The first failure is reported, but the whole sequence always
    /// runs; a failed join does not prevent FLUSH and TEARDOWN.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.shared.streaming.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mut outcome = Ok(());
        if let Err(err) = self.join_pump().await {
            tracing::error!("cannot join audio pump (flushing audio anyway): {err}");
            outcome = Err(err);
        }

        if let Err(err) = self.rtsp.send_command(Method::Flush, None).await {
            if outcome.is_ok() {
                outcome = Err(err);
            } else {
                tracing::error!("FLUSH failed during stop: {err}");
            }
        }
        if let Err(err) = self.rtsp.send_command(Method::Teardown, None).await {
            if outcome.is_ok() {
                outcome = Err(err);
            } else {
                tracing::error!("TEARDOWN failed during stop: {err}");
            }
        }
        outcome
    }

    /// Wait for playback to finish naturally. Returns immediately when
    /// no pump is running.
    ///
    /// # Errors
    /// Propagates a pump failure.
    pub async fn wait(&mut self) -> Result<()> {
        let outcome = self.join_pump().await;
        self.shared.streaming.store(false, Ordering::Release);
        outcome
    }

    /// Tear the session down completely, cancelling any running pump and
    /// closing the control connection. Failures are collected, not
    /// propagated; the session is going away regardless.
    pub async fn close(mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            let _ = pump.await;
        }
        if let Err(err) = self.rtsp.close().await {
            tracing::warn!("control connection did not close cleanly: {err}");
        }
    }

    async fn join_pump(&mut self) -> Result<()> {
        let Some(pump) = self.pump.take() else {
            return Ok(());
        };
        match pump.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(AirTunesError::playback(format!(
                "audio pump task failed: {join_error}"
            ))),
        }
    }

    async fn send_volume(&mut self) -> Result<()> {
        let db = if self.volume >= VOLUME_MIN {
            VOLUME_DB_OFFSET + self.volume
        } else {
            VOLUME_DB_MUTED
        };
        self.rtsp
            .send_command(
                Method::SetParameter,
                Some(RequestBody::new(
                    sdp::volume_body(db).into_bytes(),
                    "text/parameters",
                )),
            )
            .await
    }
}
