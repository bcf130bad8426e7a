//! Synthesized M4A containers, shaped like iTunes ALAC rips

#![allow(clippy::missing_panics_doc)]

/// Builder for a minimal but well-formed M4A byte stream.
///
/// The box tree mirrors what iTunes produces for ALAC: `ftyp`, a `moov`
/// with movie/track/media headers and the sample table, optional `udta`
/// metadata, and the `mdat` payload.
#[derive(Debug, Clone)]
pub struct M4aFixture {
    /// Timing units per second
    pub timescale: u32,
    /// Raw sample payloads, one per packet
    pub samples: Vec<Vec<u8>>,
    /// Sample-description tag; `alac` unless a test wants `mp4a`
    pub encoding_tag: [u8; 4],
    /// Insert an unrecognized top-level box before `mdat`
    pub unknown_box: bool,
    /// Extra bytes appended to the `mdat` payload, making its size
    /// disagree with the `stsz` sum
    pub mdat_padding: usize,
    /// Track title, stored as a `©nam` annotation
    pub title: Option<String>,
    /// Freeform `----` annotation value (mean/name fixed)
    pub freeform_value: Option<String>,
}

impl M4aFixture {
    /// An ALAC fixture with the given timing and samples.
    #[must_use]
    pub fn alac(timescale: u32, samples: Vec<Vec<u8>>) -> Self {
        Self {
            timescale,
            samples,
            encoding_tag: *b"alac",
            unknown_box: false,
            mdat_padding: 0,
            title: None,
            freeform_value: None,
        }
    }

    /// Total size of all samples.
    #[must_use]
    pub fn total_sample_size(&self) -> u32 {
        u32::try_from(self.samples.iter().map(Vec::len).sum::<usize>()).unwrap_or(u32::MAX)
    }

    /// Size of the largest sample.
    #[must_use]
    pub fn largest_sample_size(&self) -> u32 {
        u32::try_from(self.samples.iter().map(Vec::len).max().unwrap_or(0)).unwrap_or(u32::MAX)
    }

    /// Duration in timescale units (4096 frames per sample).
    #[must_use]
    pub fn duration(&self) -> u32 {
        u32::try_from(self.samples.len()).unwrap_or(u32::MAX) * 4096
    }

    /// Render the container.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut file = boxed(b"ftyp", {
            let mut payload = Vec::new();
            payload.extend_from_slice(b"M4A ");
            payload.extend_from_slice(&0u32.to_be_bytes());
            payload.extend_from_slice(b"M4A ");
            payload.extend_from_slice(b"mp42");
            payload
        });

        let stbl = boxed(b"stbl", {
            let mut children = self.sample_descriptions();
            children.extend(self.sample_times());
            children.extend(self.sample_sizes());
            children.extend(full_box(b"stco", 0, 0, &0u32.to_be_bytes()));
            children
        });
        let minf = boxed(b"minf", stbl);
        let mdia = boxed(b"mdia", {
            let mut children = self.media_header();
            children.extend(minf);
            children
        });
        let trak = boxed(b"trak", {
            let mut children = self.track_header();
            children.extend(mdia);
            children
        });
        let mut moov_children = self.movie_header();
        moov_children.extend(trak);
        if let Some(udta) = self.user_data() {
            moov_children.extend(udta);
        }
        file.extend(boxed(b"moov", moov_children));

        if self.unknown_box {
            file.extend(boxed(b"wxyz", vec![0u8; 4]));
        }

        let mut mdat = Vec::new();
        for sample in &self.samples {
            mdat.extend_from_slice(sample);
        }
        mdat.extend(std::iter::repeat(0u8).take(self.mdat_padding));
        file.extend(boxed(b"mdat", mdat));

        file
    }

    fn movie_header(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&[0u8; 8]); // creation + modification time
        payload.extend_from_slice(&self.timescale.to_be_bytes());
        payload.extend_from_slice(&self.duration().to_be_bytes());
        full_box(b"mvhd", 0, 0, &payload)
    }

    fn media_header(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&[0u8; 8]);
        payload.extend_from_slice(&self.timescale.to_be_bytes());
        payload.extend_from_slice(&self.duration().to_be_bytes());
        full_box(b"mdhd", 0, 0, &payload)
    }

    fn track_header(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&[0u8; 16]); // times, track id, reserved
        payload.extend_from_slice(&self.duration().to_be_bytes()); // reserved, carries the duration
        payload.extend_from_slice(&self.duration().to_be_bytes());
        full_box(b"tkhd", 0, 0x0000_0007, &payload)
    }

    fn sample_descriptions(&self) -> Vec<u8> {
        let description = boxed(&self.encoding_tag, vec![0u8; 28]);
        let mut payload = 1u32.to_be_bytes().to_vec();
        payload.extend(description);
        full_box(b"stsd", 0, 0, &payload)
    }

    fn sample_times(&self) -> Vec<u8> {
        let mut payload = 1u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&u32::try_from(self.samples.len()).unwrap().to_be_bytes());
        payload.extend_from_slice(&4096u32.to_be_bytes());
        full_box(b"stts", 0, 0, &payload)
    }

    fn sample_sizes(&self) -> Vec<u8> {
        let mut payload = 0u32.to_be_bytes().to_vec(); // per-sample sizes follow
        payload.extend_from_slice(&u32::try_from(self.samples.len()).unwrap().to_be_bytes());
        for sample in &self.samples {
            payload.extend_from_slice(&u32::try_from(sample.len()).unwrap().to_be_bytes());
        }
        full_box(b"stsz", 0, 0, &payload)
    }

    fn user_data(&self) -> Option<Vec<u8>> {
        if self.title.is_none() && self.freeform_value.is_none() {
            return None;
        }

        let mut ilst_children = Vec::new();
        if let Some(title) = &self.title {
            ilst_children.extend(boxed(
                &[0xa9, b'n', b'a', b'm'],
                data_box(1, title.as_bytes()),
            ));
        }
        if let Some(value) = &self.freeform_value {
            let mut freeform = full_box(b"mean", 0, 0, b"com.apple.iTunes");
            freeform.extend(full_box(b"name", 0, 0, b"tool"));
            freeform.extend(data_box(1, value.as_bytes()));
            ilst_children.extend(boxed(b"----", freeform));
        }

        let mut meta_payload = 0u32.to_be_bytes().to_vec(); // version + flags
        meta_payload.extend(boxed(b"hdlr", vec![0u8; 24]));
        meta_payload.extend(boxed(b"ilst", ilst_children));
        Some(boxed(b"udta", boxed(b"meta", meta_payload)))
    }
}

/// A `data` box: version/flags (metadata kind in the low flag bits), a
/// reserved word, then the payload.
fn data_box(kind: u32, payload: &[u8]) -> Vec<u8> {
    let mut content = 0u32.to_be_bytes().to_vec(); // reserved
    content.extend_from_slice(payload);
    full_box(b"data", 0, kind, &content)
}

fn boxed(tag: &[u8; 4], payload: Vec<u8>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + payload.len());
    bytes.extend_from_slice(&u32::try_from(payload.len() + 8).unwrap().to_be_bytes());
    bytes.extend_from_slice(tag);
    bytes.extend(payload);
    bytes
}

fn full_box(tag: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut content = ((u32::from(version) << 24) | (flags & 0x00ff_ffff))
        .to_be_bytes()
        .to_vec();
    content.extend_from_slice(payload);
    boxed(tag, content)
}
