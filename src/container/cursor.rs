use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::descriptor::TrackDescriptor;
use crate::error::{AirTunesError, Result};

/// Frames per ALAC packet, as announced in the SDP `fmtp` line. The
/// size table indexes packets of this many frames, so seeking by time
/// divides by it.
const FRAMES_PER_PACKET: u64 = 4096;

/// Random-access sample reader over a parsed M4A file.
///
/// Holds two independent file positions: one walking the 4-byte
/// big-endian entries of the sample-size table, one walking the media
/// data. Two handles keep the hot path free of seeks.
pub struct SampleCursor {
    sizes: File,
    data: File,
    size_table_offset: u64,
    data_offset: u64,
    sample_count: u32,
    timescale: u32,
}

impl SampleCursor {
    /// Open a cursor over `path` using the offsets from `descriptor`.
    /// Both positions start at the first sample.
    ///
    /// # Errors
    /// Returns [`AirTunesError::Network`] when the file cannot be
    /// opened or positioned.
    pub async fn open(path: impl AsRef<Path>, descriptor: &TrackDescriptor) -> Result<Self> {
        let path = path.as_ref();
        let mut sizes = File::open(path).await?;
        let mut data = File::open(path).await?;
        sizes
            .seek(SeekFrom::Start(descriptor.size_table_offset))
            .await?;
        data.seek(SeekFrom::Start(descriptor.data_offset)).await?;
        Ok(Self {
            sizes,
            data,
            size_table_offset: descriptor.size_table_offset,
            data_offset: descriptor.data_offset,
            sample_count: descriptor.sample_count,
            timescale: descriptor.timescale,
        })
    }

    /// Position both cursors at the sample playing at `offset` into the
    /// track. Fails without moving anything when the offset lies past
    /// the last sample.
    ///
    /// # Errors
    /// [`AirTunesError::SeekOutOfRange`] when `offset` is at or past the
    /// end; [`AirTunesError::Network`] on I/O failure.
    pub async fn seek_to_time(&mut self, offset: Duration) -> Result<()> {
        let index = u64::from(self.timescale) * offset.as_secs() / FRAMES_PER_PACKET;
        if index >= u64::from(self.sample_count) {
            return Err(AirTunesError::SeekOutOfRange { offset });
        }

        self.sizes
            .seek(SeekFrom::Start(self.size_table_offset))
            .await?;
        self.data.seek(SeekFrom::Start(self.data_offset)).await?;

        // Sample sizes vary, so the data position is found by walking
        // the table up to the target index.
        for _ in 0..index {
            let sample_size = self.read_sample_size().await?;
            self.data
                .seek(SeekFrom::Current(i64::from(sample_size)))
                .await?;
        }
        Ok(())
    }

    /// Index of the sample the cursor currently points at.
    ///
    /// # Errors
    /// Returns [`AirTunesError::Network`] when the table position cannot
    /// be read back.
    #[allow(clippy::cast_possible_truncation)]
    pub async fn current_index(&mut self) -> Result<u32> {
        let position = self.sizes.stream_position().await?;
        Ok(((position - self.size_table_offset) / 4) as u32)
    }

    /// Whether another sample is available.
    ///
    /// # Errors
    /// Returns [`AirTunesError::Network`] when the table position cannot
    /// be read back.
    pub async fn has_more(&mut self) -> Result<bool> {
        Ok(self.current_index().await? < self.sample_count)
    }

    /// Read the next sample into `out` and advance both cursors.
    /// Returns the sample size in bytes.
    ///
    /// # Errors
    /// [`AirTunesError::Playback`] when `out` is too small for the
    /// sample (the size table disagrees with the descriptor);
    /// [`AirTunesError::Network`] on I/O failure, including a table that
    /// runs past the end of the file.
    pub async fn next_sample(&mut self, out: &mut [u8]) -> Result<u32> {
        let sample_size = self.read_sample_size().await?;
        let len = sample_size as usize;
        if len > out.len() {
            return Err(AirTunesError::playback(format!(
                "sample of {sample_size} bytes does not fit the {}-byte buffer",
                out.len()
            )));
        }
        self.data.read_exact(&mut out[..len]).await?;
        Ok(sample_size)
    }

    async fn read_sample_size(&mut self) -> Result<u32> {
        let mut entry = [0u8; 4];
        self.sizes.read_exact(&mut entry).await?;
        Ok(u32::from_be_bytes(entry))
    }
}
