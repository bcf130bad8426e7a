use super::fixture_file;
use crate::container::{parse_file, Encoding, FourCc, M4aParser, MetadataKind, ParseStatus};
use crate::testing::M4aFixture;

fn sample_payloads() -> Vec<Vec<u8>> {
    vec![vec![0x11; 40], vec![0x22; 100], vec![0x33; 60]]
}

#[test]
fn test_parse_well_formed_alac() {
    let fixture = M4aFixture::alac(44100, sample_payloads());
    let file = fixture_file(&fixture);

    let descriptor = parse_file(file.path()).unwrap();

    assert_eq!(descriptor.timescale, 44100);
    assert_eq!(descriptor.duration, fixture.duration());
    assert_eq!(descriptor.sample_count, 3);
    assert_eq!(descriptor.total_sample_size, 200);
    assert_eq!(descriptor.largest_sample_size, 100);
    assert_eq!(descriptor.encoding, Encoding::Alac);
    assert_eq!(descriptor.status, ParseStatus::Ok);
}

#[test]
fn test_offsets_point_at_table_and_payload() {
    let fixture = M4aFixture::alac(44100, sample_payloads());
    let bytes = fixture.build();
    let file = fixture_file(&fixture);

    let descriptor = parse_file(file.path()).unwrap();

    // The size table holds one big-endian u32 per sample.
    let table = usize::try_from(descriptor.size_table_offset).unwrap();
    let first_entry = u32::from_be_bytes(bytes[table..table + 4].try_into().unwrap());
    assert_eq!(first_entry, 40);

    // The media data starts with the first sample's bytes.
    let data = usize::try_from(descriptor.data_offset).unwrap();
    assert_eq!(&bytes[data..data + 40], &vec![0x11u8; 40][..]);
}

#[test]
fn test_unknown_box_degrades_status_only() {
    let mut fixture = M4aFixture::alac(44100, sample_payloads());
    fixture.unknown_box = true;
    let file = fixture_file(&fixture);

    let descriptor = parse_file(file.path()).unwrap();
    assert_eq!(descriptor.status, ParseStatus::ParsedWithWarnings);
    assert_eq!(descriptor.sample_count, 3);
}

#[test]
fn test_mdat_size_mismatch_keeps_smaller_total() {
    let mut fixture = M4aFixture::alac(44100, sample_payloads());
    fixture.mdat_padding = 64;
    let file = fixture_file(&fixture);

    let descriptor = parse_file(file.path()).unwrap();
    assert_eq!(descriptor.status, ParseStatus::ParsedWithWarnings);
    // stsz sum (200) < mdat payload (264): the smaller wins.
    assert_eq!(descriptor.total_sample_size, 200);
}

#[test]
fn test_mp4a_records_aac_with_warning() {
    let mut fixture = M4aFixture::alac(44100, sample_payloads());
    fixture.encoding_tag = *b"mp4a";
    let file = fixture_file(&fixture);

    let descriptor = parse_file(file.path()).unwrap();
    assert_eq!(descriptor.encoding, Encoding::Aac);
    assert_eq!(descriptor.status, ParseStatus::ParsedWithWarnings);
}

#[test]
fn test_truncated_file_is_fatal() {
    let fixture = M4aFixture::alac(44100, sample_payloads());
    let mut bytes = fixture.build();
    bytes.truncate(40); // cut inside the moov header

    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, &bytes).unwrap();

    assert!(parse_file(file.path()).is_err());
}

#[test]
fn test_missing_mdat_is_fatal() {
    let fixture = M4aFixture::alac(44100, sample_payloads());
    let bytes = fixture.build();
    // Everything up to (but excluding) the mdat box.
    let mdat_at = bytes
        .windows(4)
        .position(|w| w == b"mdat")
        .unwrap()
        - 4;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, &bytes[..mdat_at]).unwrap();

    assert!(parse_file(file.path()).is_err());
}

#[test]
fn test_trailing_garbage_bytes_are_tolerated() {
    let fixture = M4aFixture::alac(44100, sample_payloads());
    let mut bytes = fixture.build();
    bytes.extend_from_slice(&[0xaa, 0xbb]); // 2 spare bytes, less than a box size field

    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, &bytes).unwrap();

    let descriptor = parse_file(file.path()).unwrap();
    assert_eq!(descriptor.sample_count, 3);
}

#[test]
fn test_metadata_handler_receives_title() {
    let mut fixture = M4aFixture::alac(44100, sample_payloads());
    fixture.title = Some("Blue in Green".to_string());
    let file = fixture_file(&fixture);

    let mut seen = Vec::new();
    let parser = M4aParser::open(file.path())
        .unwrap()
        .with_metadata_handler(|tag, payload, kind| {
            seen.push((tag, payload.to_vec(), kind));
        });
    parser.parse().unwrap();

    assert_eq!(seen.len(), 1);
    let (tag, payload, kind) = &seen[0];
    assert_eq!(*tag, FourCc::new(&[0xa9, b'n', b'a', b'm']));
    assert_eq!(payload, b"Blue in Green");
    assert_eq!(*kind, MetadataKind::Text);
}

#[test]
fn test_freeform_annotation_forwards_inner_tags() {
    let mut fixture = M4aFixture::alac(44100, sample_payloads());
    fixture.freeform_value = Some("encoder 1.0".to_string());
    let file = fixture_file(&fixture);

    let mut tags = Vec::new();
    M4aParser::open(file.path())
        .unwrap()
        .with_metadata_handler(|tag, _, _| tags.push(tag))
        .parse()
        .unwrap();

    // mean, name and data all pass their own tag down, not "----".
    assert!(tags.contains(&FourCc::new(b"mean")));
    assert!(tags.contains(&FourCc::new(b"name")));
    assert!(tags.contains(&FourCc::new(b"data")));
    assert!(!tags.contains(&FourCc::new(b"----")));
}

#[test]
fn test_parse_without_handler_skips_metadata() {
    let mut fixture = M4aFixture::alac(44100, sample_payloads());
    fixture.title = Some("Some Title".to_string());
    fixture.freeform_value = Some("tooling".to_string());
    let file = fixture_file(&fixture);

    let descriptor = parse_file(file.path()).unwrap();
    assert_eq!(descriptor.status, ParseStatus::Ok);
    assert_eq!(descriptor.sample_count, 3);
}
