use std::fmt;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use super::descriptor::{DescriptorBuilder, Encoding, TrackDescriptor};
use crate::error::{AirTunesError, Result};

/// Four-character box tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(
    /// The tag bytes as they appear in the file
    pub [u8; 4],
);

impl FourCc {
    /// Build a tag from its four bytes.
    #[must_use]
    pub const fn new(tag: &[u8; 4]) -> Self {
        Self(*tag)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            if byte.is_ascii_graphic() || byte == b' ' {
                fmt::Write::write_char(f, char::from(byte))?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc(\"{self}\")")
    }
}

/// Interpretation of an annotation payload, taken from the low 5 bits of
/// the `data` box flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    /// Untyped bytes
    Binary,
    /// UTF-8 text
    Text,
    /// JPEG image (cover art)
    Jpeg,
    /// PNG image (cover art)
    Png,
    /// Anything else iTunes came up with
    Other(u8),
}

impl MetadataKind {
    #[allow(clippy::cast_possible_truncation)]
    fn from_flags(flags: u32) -> Self {
        match (flags & 0x1f) as u8 {
            0 => Self::Binary,
            1 => Self::Text,
            13 => Self::Jpeg,
            14 => Self::Png,
            other => Self::Other(other),
        }
    }
}

/// Callback receiving iTunes metadata found during parsing.
pub type MetadataHandler<'a> = Box<dyn FnMut(FourCc, &[u8], MetadataKind) + 'a>;

const BRAND_M4A: FourCc = FourCc::new(b"M4A ");
const DATA: FourCc = FourCc::new(b"data");
const NAME: FourCc = FourCc::new(b"name");
const MEAN: FourCc = FourCc::new(b"mean");
const FREEFORM: FourCc = FourCc::new(b"----");

/// iTunes annotation tags whose `data` payload is offered to the
/// metadata handler. Anything else at the `ilst` level is skipped with a
/// warning. Collected from existing M4A libraries; movie/TV tags are
/// deliberately absent, audio files should not carry them.
const ANNOTATION_TAGS: &[[u8; 4]] = &[
    *b"----",
    [0xa9, b'n', b'a', b'm'], // name
    [0xa9, b'A', b'R', b'T'], // artist
    *b"aART",                 // album artist
    [0xa9, b'a', b'l', b'b'], // album
    [0xa9, b'g', b'r', b'p'], // grouping
    [0xa9, b'w', b'r', b't'], // composer
    [0xa9, b'c', b'm', b't'], // comment
    *b"gnre",                 // genre
    [0xa9, b'g', b'e', b'n'], // genre, user defined
    [0xa9, b'd', b'a', b'y'], // release date
    *b"trkn",                 // track number
    *b"disk",
    *b"tmpo",
    *b"cpil",
    *b"desc",
    *b"ldes",
    [0xa9, b'l', b'y', b'r'], // lyrics
    *b"sonm",
    *b"soar",
    *b"soaa",
    *b"soal",
    *b"soco",
    *b"sosn",
    *b"covr", // cover art
    *b"cprt",
    [0xa9, b't', b'o', b'o'], // encoding tool
    [0xa9, b'e', b'n', b'c'], // encoded by
    *b"purd",
    *b"pcst",
    *b"purl",
    *b"keyw",
    *b"catg",
    *b"stik",
    *b"rtng",
    *b"pgap",
    *b"apID",
    *b"akID",
    *b"cnID",
    *b"sfID",
    *b"atID",
    *b"plID",
    *b"geID",
    [0xa9, b's', b't', b'3'],
];

/// Parse the container at `path` into a [`TrackDescriptor`].
///
/// # Errors
/// Returns [`AirTunesError::ContainerMalformed`] for structural damage
/// and [`AirTunesError::Network`] for plain I/O failures. Recoverable
/// oddities only degrade the descriptor's status.
pub fn parse_file(path: impl AsRef<Path>) -> Result<TrackDescriptor> {
    M4aParser::open(path)?.parse()
}

/// One-pass parser over an M4A file.
///
/// Walks the box tree exactly once, filling a descriptor as the
/// interesting boxes go by.
pub struct M4aParser<'a> {
    reader: BufReader<File>,
    file_size: u64,
    builder: DescriptorBuilder,
    metadata_handler: Option<MetadataHandler<'a>>,
}

impl<'a> M4aParser<'a> {
    /// Open the file for parsing.
    ///
    /// # Errors
    /// Returns [`AirTunesError::Network`] when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            file_size,
            builder: DescriptorBuilder::default(),
            metadata_handler: None,
        })
    }

    /// Install a callback receiving iTunes annotation payloads
    /// (title, artist, cover art, ...) as they are encountered.
    #[must_use]
    pub fn with_metadata_handler(
        mut self,
        handler: impl FnMut(FourCc, &[u8], MetadataKind) + 'a,
    ) -> Self {
        self.metadata_handler = Some(Box::new(handler));
        self
    }

    /// Run the walk and produce the descriptor.
    ///
    /// # Errors
    /// See [`parse_file`].
    pub fn parse(mut self) -> Result<TrackDescriptor> {
        while self.parse_next_box(None)? > 0 {}
        self.builder.finish(self.file_size)
    }

    /// Parse one box including its header. Returns the number of bytes
    /// consumed; 0 means a clean end of file, which is only acceptable
    /// at the top level (`container` is `None`). Up to 3 spare trailing
    /// bytes at the end of the file are silently ignored.
    fn parse_next_box(&mut self, container: Option<FourCc>) -> Result<u64> {
        let size = match self.reader.read_u32::<BigEndian>() {
            Ok(value) => u64::from(value),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof && container.is_none() => {
                return Ok(0);
            }
            Err(e) => {
                return Err(AirTunesError::container(format!(
                    "cannot read box size inside {}: {e}",
                    container_name(container)
                )));
            }
        };
        let tag = self.read_fourcc(container)?;
        if size < 8 {
            return Err(AirTunesError::container(format!(
                "box \"{tag}\" declares impossible size {size}"
            )));
        }
        let body = size - 8;

        let start = self.position()?;
        self.dispatch(tag, body)?;
        let consumed = self.position()? - start;

        if consumed < body {
            // A handler (or no handler) left payload behind; skip it.
            tracing::debug!("skipping {} trailing bytes of box \"{tag}\"", body - consumed);
            self.skip_bytes(body - consumed)?;
        } else if consumed > body {
            tracing::warn!(
                "box \"{tag}\" yielded more data than its size declared; continuing, but parsing might fail"
            );
            self.builder.note_warning();
        }

        Ok(8 + body.max(consumed))
    }

    fn dispatch(&mut self, tag: FourCc, body: u64) -> Result<()> {
        match &tag.0 {
            b"ftyp" => self.parse_file_type(tag, body),
            b"moov" | b"trak" | b"udta" | b"mdia" | b"minf" | b"dinf" | b"stbl" | b"ilst" => {
                self.walk_children(tag, body)
            }
            b"mvhd" | b"mdhd" => self.parse_media_header(tag, body),
            b"tkhd" => self.parse_track_header(tag, body),
            b"stsd" => self.parse_sample_descriptions(tag, body),
            b"alac" => {
                self.builder.set_encoding(Encoding::Alac);
                self.skip_bytes(body)
            }
            b"mp4a" => {
                self.builder.set_encoding(Encoding::Aac);
                self.skip_bytes(body)
            }
            b"stts" => self.parse_sample_times(tag),
            b"stsz" => self.parse_sample_sizes(tag),
            b"mdat" => self.parse_media_data(body),
            b"meta" => self.parse_metadata(tag, body),
            b"free" | b"hdlr" | b"dref" | b"smhd" | b"stsc" | b"stco" => self.skip_bytes(body),
            _ if ANNOTATION_TAGS.contains(&tag.0) => self.parse_annotation(tag, body),
            _ => {
                tracing::warn!(
                    "unknown box \"{tag}\" ({body} bytes); skipping it, some information may be lost"
                );
                self.builder.note_warning();
                self.skip_bytes(body)
            }
        }
    }

    /// `ftyp`: the major brand must be `M4A ` with minor version 0;
    /// anything else is worth a warning but not a refusal. Compatible
    /// brands are skipped.
    fn parse_file_type(&mut self, tag: FourCc, body: u64) -> Result<()> {
        if body < 8 {
            return Err(AirTunesError::container("\"ftyp\" box too small"));
        }
        let brand = self.read_fourcc(Some(tag))?;
        let version = self.read_u32(tag)?;
        if brand != BRAND_M4A || version != 0 {
            tracing::warn!(
                "unexpected file type \"{brand}\" version {version:#x} (expected \"{BRAND_M4A}\", 0); continuing, but parsing might fail"
            );
            self.builder.note_warning();
        }
        self.skip_bytes(body - 8)
    }

    /// `mvhd`/`mdhd`: timescale and duration, with creation/modification
    /// times skipped. Version 1 widens the time fields to 64 bits.
    fn parse_media_header(&mut self, tag: FourCc, body: u64) -> Result<()> {
        let (version, _) = self.read_version_and_flags(tag, 0, 0)?;
        let fixed: u64 = if version == 0 { 20 } else { 32 };
        if body < fixed {
            return Err(AirTunesError::container(format!(
                "not enough data in box \"{tag}\""
            )));
        }
        self.skip_bytes(if version == 0 { 8 } else { 16 })?;
        let timescale = self.read_u32(tag)?;
        self.builder.set_timescale(timescale);
        self.read_duration(tag, version)?;
        self.skip_bytes(body - fixed)
    }

    /// `tkhd`: shaped like `mvhd`, except one of its reserved fields
    /// also carries the duration in practice, right before the
    /// documented one.
    fn parse_track_header(&mut self, tag: FourCc, body: u64) -> Result<()> {
        let (version, _) = self.read_version_and_flags(tag, 0, 0x0000_0007)?;
        let fixed: u64 = if version == 0 { 28 } else { 40 };
        if body < fixed {
            return Err(AirTunesError::container(format!(
                "not enough data in box \"{tag}\""
            )));
        }
        self.skip_bytes(if version == 0 { 16 } else { 24 })?;
        let reserved_duration = self.read_u32(tag)?;
        self.builder.set_duration(reserved_duration);
        self.read_duration(tag, version)?;
        self.skip_bytes(body - fixed)
    }

    /// `stsd`: a counted container of sample-description boxes.
    fn parse_sample_descriptions(&mut self, tag: FourCc, body: u64) -> Result<()> {
        self.read_version_and_flags(tag, 0, 0)?;
        if body < 8 {
            return Err(AirTunesError::container("\"stsd\" box too small"));
        }
        self.skip_bytes(4)?; // description count
        self.walk_children(tag, body - 8)
    }

    /// `stts`: duration as the sum over (frame count, frame duration)
    /// runs.
    fn parse_sample_times(&mut self, tag: FourCc) -> Result<()> {
        self.read_version_and_flags(tag, 0, 0)?;
        let entries = self.read_u32(tag)?;
        let mut total: u64 = 0;
        for _ in 0..entries {
            let frame_count = self.read_u32(tag)?;
            let duration = self.read_u32(tag)?;
            total = total.saturating_add(u64::from(frame_count) * u64::from(duration));
        }
        match u32::try_from(total) {
            Ok(total) => self.builder.set_duration(total),
            Err(_) => {
                tracing::warn!("\"stts\" duration sum {total} does not fit 32 bits; ignoring it");
                self.builder.note_warning();
            }
        }
        Ok(())
    }

    /// `stsz`: the per-sample size table. The table itself stays in the
    /// file; only its location, the sample count, the byte total and the
    /// largest entry are extracted.
    fn parse_sample_sizes(&mut self, tag: FourCc) -> Result<()> {
        self.read_version_and_flags(tag, 0, 0)?;
        let fixed_sample_size = self.read_u32(tag)?;
        if fixed_sample_size != 0 {
            tracing::warn!(
                "fixed sample size {fixed_sample_size} where a per-sample table was expected; continuing, but parsing might fail"
            );
            self.builder.note_warning();
        }
        let sample_count = self.read_u32(tag)?;
        self.builder.set_sample_count(sample_count);

        let table_offset = self.position()?;
        self.builder.set_size_table_offset(table_offset);

        let mut total: u64 = 0;
        let mut largest: u32 = 0;
        for _ in 0..sample_count {
            let size = self.read_u32(tag)?;
            total += u64::from(size);
            largest = largest.max(size);
        }
        match u32::try_from(total) {
            Ok(total) => self.builder.note_total_sample_size(total),
            Err(_) => {
                tracing::warn!("sample sizes add up past 32 bits; ignoring the total");
                self.builder.note_warning();
            }
        }
        self.builder.set_largest_sample_size(largest);
        Ok(())
    }

    /// `mdat`: remember where the payload starts; its size doubles as a
    /// second opinion on the total sample size.
    fn parse_media_data(&mut self, body: u64) -> Result<()> {
        let offset = self.position()?;
        self.builder.set_data_offset(offset);
        if let Ok(size) = u32::try_from(body) {
            self.builder.note_total_sample_size(size);
        }
        self.skip_bytes(body)
    }

    /// `meta`: versioned container around `ilst` and friends.
    fn parse_metadata(&mut self, tag: FourCc, body: u64) -> Result<()> {
        self.read_version_and_flags(tag, 0, 0)?;
        if body < 4 {
            return Err(AirTunesError::container("\"meta\" box too small"));
        }
        self.walk_children(tag, body - 4)
    }

    /// An iTunes annotation: a container of `data`/`mean`/`name` boxes.
    fn parse_annotation(&mut self, tag: FourCc, body: u64) -> Result<()> {
        let end = self.position()? + body;
        while self.position()? < end {
            self.parse_apple_data(tag)?;
        }
        if self.position()? > end {
            tracing::warn!(
                "read more data in Apple data boxes than container \"{tag}\" specified; continuing, but parsing might fail"
            );
            self.builder.note_warning();
        }
        Ok(())
    }

    fn parse_apple_data(&mut self, annotation: FourCc) -> Result<()> {
        let size = u64::from(self.read_u32(annotation)?);
        let tag = self.read_fourcc(Some(annotation))?;
        if size < 12 {
            return Err(AirTunesError::container(format!(
                "Apple data box \"{tag}\" inside \"{annotation}\" is too small ({size} bytes)"
            )));
        }
        let is_data = tag == DATA;
        if !is_data && tag != MEAN && tag != NAME {
            tracing::debug!(
                "unexpected Apple data box \"{tag}\" inside \"{annotation}\"; continuing, but parsing might fail"
            );
        }
        let (_, flags) = self.read_version_and_flags(tag, 0, 0x0000_001f)?;
        let mut consumed: u64 = 12;
        if is_data {
            self.skip_bytes(4)?;
            consumed += 4;
        }
        if consumed < size {
            self.handle_metadata(annotation, tag, flags, size - consumed)?;
        } else if consumed > size {
            tracing::warn!(
                "read more data than Apple data box \"{tag}\" declared; continuing, but parsing might fail"
            );
            self.builder.note_warning();
        }
        Ok(())
    }

    fn handle_metadata(
        &mut self,
        annotation: FourCc,
        tag: FourCc,
        flags: u32,
        payload_size: u64,
    ) -> Result<()> {
        if let Some(handler) = self.metadata_handler.as_mut() {
            let len = usize::try_from(payload_size).map_err(|_| {
                AirTunesError::container(format!("metadata payload of {payload_size} bytes"))
            })?;
            let mut payload = vec![0u8; len];
            self.reader.read_exact(&mut payload).map_err(|e| {
                AirTunesError::container(format!("cannot read metadata payload: {e}"))
            })?;
            // Freeform `----` annotations carry the meaning in their
            // child boxes; forward the child tag instead.
            let effective = if annotation == FREEFORM { tag } else { annotation };
            handler(effective, &payload, MetadataKind::from_flags(flags));
        } else {
            self.skip_bytes(payload_size)?;
        }
        Ok(())
    }

    /// Walk child boxes until the container's payload is used up.
    fn walk_children(&mut self, container: FourCc, body: u64) -> Result<()> {
        let end = self.position()? + body;
        while self.position()? < end {
            self.parse_next_box(Some(container))?;
        }
        if self.position()? > end {
            tracing::warn!(
                "read more data in boxes than container \"{container}\" specified; continuing, but parsing might fail"
            );
            self.builder.note_warning();
        }
        Ok(())
    }

    /// Read the 1-byte version and 3-byte flags common to full boxes.
    /// Unexpected versions and flag bits outside `allowed_flags` are
    /// warnings.
    fn read_version_and_flags(
        &mut self,
        tag: FourCc,
        expected_version: u8,
        allowed_flags: u32,
    ) -> Result<(u8, u32)> {
        let word = self.read_u32(tag)?;
        #[allow(clippy::cast_possible_truncation)]
        let version = (word >> 24) as u8;
        let flags = word & 0x00ff_ffff;
        if version != expected_version {
            tracing::warn!(
                "box \"{tag}\" has version {version:#x}, expected {expected_version:#x}; continuing, but parsing might fail"
            );
            self.builder.note_warning();
        }
        if flags & !allowed_flags != 0 {
            tracing::warn!(
                "box \"{tag}\" has flags {flags:#08x} outside the allowed mask {allowed_flags:#08x}; continuing, but parsing might fail"
            );
            self.builder.note_warning();
        }
        Ok((version, flags))
    }

    /// Durations are 32-bit in version 0 boxes and 64-bit in version 1.
    /// 64-bit values are only representable when the high word is all
    /// zeros, or all ones together with an all-ones low word ("unknown").
    fn read_duration(&mut self, tag: FourCc, version: u8) -> Result<()> {
        let mut unknown_duration = false;
        if version == 1 {
            let high = self.read_u32(tag)?;
            if high == 0xffff_ffff {
                unknown_duration = true;
            } else if high != 0 {
                return Err(AirTunesError::container(format!(
                    "cannot handle 64-bit durations above 32 bits in box \"{tag}\""
                )));
            }
        }
        let low = self.read_u32(tag)?;
        if unknown_duration && low != 0xffff_ffff {
            return Err(AirTunesError::container(format!(
                "cannot handle 64-bit durations above 32 bits in box \"{tag}\""
            )));
        }
        self.builder.set_duration(low);
        Ok(())
    }

    fn read_u32(&mut self, tag: FourCc) -> Result<u32> {
        self.reader.read_u32::<BigEndian>().map_err(|e| {
            AirTunesError::container(format!("cannot read data for box \"{tag}\": {e}"))
        })
    }

    fn read_fourcc(&mut self, container: Option<FourCc>) -> Result<FourCc> {
        let mut tag = [0u8; 4];
        self.reader.read_exact(&mut tag).map_err(|e| {
            AirTunesError::container(format!(
                "cannot read box type inside {}: {e}",
                container_name(container)
            ))
        })?;
        Ok(FourCc(tag))
    }

    fn position(&mut self) -> Result<u64> {
        Ok(self.reader.stream_position()?)
    }

    fn skip_bytes(&mut self, count: u64) -> Result<()> {
        let step = i64::try_from(count)
            .map_err(|_| AirTunesError::container(format!("cannot skip {count} bytes")))?;
        self.reader.seek_relative(step)?;
        Ok(())
    }
}

fn container_name(container: Option<FourCc>) -> String {
    container.map_or_else(|| "the file".to_string(), |tag| format!("box \"{tag}\""))
}
