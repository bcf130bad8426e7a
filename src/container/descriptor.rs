use std::time::Duration;

use crate::error::{AirTunesError, Result};

/// Encoding of the audio samples found in the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// No sample description box seen yet
    #[default]
    Unknown,
    /// Apple Lossless, the format this client streams
    Alac,
    /// AAC; recorded but not streamable without transcoding
    Aac,
}

/// Outcome of a successful parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseStatus {
    /// The container parsed without surprises
    #[default]
    Ok,
    /// The container parsed, but with recoverable oddities (unknown
    /// boxes, redundant values, contradicting encodings)
    ParsedWithWarnings,
}

/// Everything the streaming path needs to know about one M4A file.
///
/// Produced by the parser, immutable afterwards.
#[derive(Debug, Clone)]
pub struct TrackDescriptor {
    /// Timing units per second
    pub timescale: u32,
    /// Track duration in timescale units
    pub duration: u32,
    /// Number of audio samples
    pub sample_count: u32,
    /// Total size of all samples in bytes
    pub total_sample_size: u32,
    /// Size of the largest single sample in bytes
    pub largest_sample_size: u32,
    /// Sample encoding
    pub encoding: Encoding,
    /// Absolute file offset of the media data (`mdat` payload)
    pub data_offset: u64,
    /// Absolute file offset of the per-sample size table (4-byte
    /// big-endian entries inside `stsz`)
    pub size_table_offset: u64,
    /// Whether warnings were recorded during parsing
    pub status: ParseStatus,
}

impl TrackDescriptor {
    /// Track length as wall-clock time.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn length(&self) -> Duration {
        let timescale = u64::from(self.timescale);
        let duration = u64::from(self.duration);
        let secs = duration / timescale;
        let nanos = (duration % timescale) * 1_000_000_000 / timescale;
        Duration::new(secs, nanos as u32)
    }
}

/// Values like duration that are "not set" in MP4 metadata.
const UNSET: u32 = 0;
const UNKNOWN: u32 = 0xffff_ffff;

/// Mutable accumulation state for one parse run.
///
/// The setters implement the container's redundancy rules: several boxes
/// carry a duration, two boxes carry a total sample size, and a file may
/// (wrongly) carry two sample descriptions. First meaningful value wins;
/// disagreements are warnings, not failures.
#[derive(Debug, Default)]
pub(crate) struct DescriptorBuilder {
    timescale: u32,
    duration: u32,
    sample_count: u32,
    total_sample_size: u32,
    largest_sample_size: u32,
    encoding: Encoding,
    data_offset: Option<u64>,
    size_table_offset: Option<u64>,
    status: ParseStatus,
}

impl DescriptorBuilder {
    pub(crate) fn note_warning(&mut self) {
        self.status = ParseStatus::ParsedWithWarnings;
    }

    pub(crate) fn set_timescale(&mut self, timescale: u32) {
        Self::set_time_value(&mut self.timescale, timescale, "timescale", &mut self.status);
    }

    pub(crate) fn set_duration(&mut self, duration: u32) {
        Self::set_time_value(&mut self.duration, duration, "duration", &mut self.status);
    }

    fn set_time_value(field: &mut u32, value: u32, name: &str, status: &mut ParseStatus) {
        if value == UNSET || value == UNKNOWN || *field == value {
            return;
        }
        if *field == UNSET {
            *field = value;
        } else {
            tracing::warn!(
                "multiple different {name} values present; continuing with the latest value {value}"
            );
            *field = value;
            *status = ParseStatus::ParsedWithWarnings;
        }
    }

    pub(crate) fn set_encoding(&mut self, encoding: Encoding) {
        if self.encoding != Encoding::Unknown && self.encoding != encoding {
            tracing::warn!(
                "contradicting encodings in file (both ALAC and AAC); keeping the first one found"
            );
            self.note_warning();
            return;
        }
        self.encoding = encoding;
        if encoding == Encoding::Aac {
            tracing::warn!("file contains AAC samples; this client streams ALAC");
            self.note_warning();
        }
    }

    /// Record a total-sample-size candidate. The `stsz` sum and the
    /// `mdat` payload size both land here; when they disagree the
    /// smaller one is kept so playback never reads past the data.
    pub(crate) fn note_total_sample_size(&mut self, total: u32) {
        if self.total_sample_size == 0 {
            self.total_sample_size = total;
        } else if self.total_sample_size != total {
            tracing::warn!(
                "disagreeing total sample sizes ({} vs {}); playback might be cut off",
                self.total_sample_size,
                total
            );
            self.note_warning();
            if total < self.total_sample_size {
                self.total_sample_size = total;
            }
        }
    }

    pub(crate) fn set_sample_count(&mut self, count: u32) {
        self.sample_count = count;
    }

    pub(crate) fn set_largest_sample_size(&mut self, size: u32) {
        self.largest_sample_size = size;
    }

    pub(crate) fn set_data_offset(&mut self, offset: u64) {
        self.data_offset = Some(offset);
    }

    pub(crate) fn set_size_table_offset(&mut self, offset: u64) {
        self.size_table_offset = Some(offset);
    }

    pub(crate) fn finish(self, file_size: u64) -> Result<TrackDescriptor> {
        let data_offset = self
            .data_offset
            .ok_or_else(|| AirTunesError::container("no \"mdat\" box found"))?;
        let size_table_offset = self
            .size_table_offset
            .ok_or_else(|| AirTunesError::container("no \"stsz\" box found"))?;
        if data_offset > file_size || size_table_offset > file_size {
            return Err(AirTunesError::container(
                "media data or size table offset points past the end of the file",
            ));
        }
        if self.timescale == 0 {
            return Err(AirTunesError::container("no timescale found"));
        }

        Ok(TrackDescriptor {
            timescale: self.timescale,
            duration: self.duration,
            sample_count: self.sample_count,
            total_sample_size: self.total_sample_size,
            largest_sample_size: self.largest_sample_size,
            encoding: self.encoding,
            data_offset,
            size_table_offset,
            status: self.status,
        })
    }
}
