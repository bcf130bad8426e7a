//! MPEG-4 (M4A) container handling
//!
//! A one-pass recursive box walker extracts the track description
//! (timescale, duration, sample table and media-data locations); a
//! sample cursor then iterates the raw ALAC frames for streaming.

mod cursor;
mod descriptor;
mod parser;

pub use cursor::SampleCursor;
pub use descriptor::{Encoding, ParseStatus, TrackDescriptor};
pub use parser::{parse_file, FourCc, M4aParser, MetadataKind};
