use nfcwav::chunk::FourCc;
use nfcwav::event::{Event, Span};
use nfcwav::io_stream;
use nfcwav::recording::{ExtractOptions, Outcome, Recording};
use nfcwav::{ChunkPayload, ContainerIndex, WavError};
use chrono::DateTime;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const GUANO: &[u8] = b"GUANO|Version: 1.0\nMake: Wildlife Acoustics\nModel: SM4\n\
NFC|Station Name: North Ridge\nNFC|Time Zone: America/Chicago\n";

/// Hand-assembled recorder output: fmt, odd-sized bext-like chunk, guan,
/// data, trailing LIST. 16-bit PCM at 1 kHz where every sample of channel
/// `c` during second `s` holds `s * 16 + c`.
fn recorder_file(channels: u16, seconds: u32) -> Vec<u8> {
    let rate = 1_000u32;
    let block_align = channels * 2;

    let mut body = b"WAVE".to_vec();

    body.extend_from_slice(b"fmt \x10\x00\x00\x00");
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&channels.to_le_bytes());
    body.extend_from_slice(&rate.to_le_bytes());
    body.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
    body.extend_from_slice(&block_align.to_le_bytes());
    body.extend_from_slice(&16u16.to_le_bytes());

    body.extend_from_slice(b"bext\x07\x00\x00\x00SM4BAT\x01\x00");

    body.extend_from_slice(b"guan");
    body.extend_from_slice(&(GUANO.len() as u32).to_le_bytes());
    body.extend_from_slice(GUANO);
    if GUANO.len() % 2 == 1 {
        body.push(0);
    }

    let frames = rate * seconds;
    body.extend_from_slice(b"data");
    body.extend_from_slice(&(frames * block_align as u32).to_le_bytes());
    for i in 0..frames {
        let s = (i / rate) as u16;
        for c in 0..channels {
            body.extend_from_slice(&(s * 16 + c).to_le_bytes());
        }
    }

    body.extend_from_slice(b"LIST\x0c\x00\x00\x00INFOISFT\x00\x00\x00\x00");

    let mut file = b"RIFF".to_vec();
    file.extend_from_slice(&(body.len() as u32).to_le_bytes());
    file.extend_from_slice(&body);
    file
}

fn write_recording(dir: &Path, name: &str, channels: u16, seconds: u32) -> Recording {
    let path = dir.join(name);
    fs::write(&path, recorder_file(channels, seconds)).unwrap();
    Recording::open(&path).unwrap()
}

fn event(start: f64, stop: f64, species: &str) -> Event {
    Event {
        span:         Span::new(start, stop).unwrap(),
        timestamp:    DateTime::parse_from_rfc3339("2024-09-14T02:17:45-05:00").unwrap(),
        engine:       "nh".into(),
        species_code: species.into(),
    }
}

fn first_sample(path: &Path) -> u16 {
    let idx = io_stream::parse(path).unwrap();
    let data = idx.data().unwrap();
    let bytes = fs::read(path).unwrap();
    let at = data.offset as usize;
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

#[test]
fn test_parse_recorder_layout() {
    let dir = TempDir::new().unwrap();
    let rec = write_recording(dir.path(), "NORTH_20240914_020000.WAV", 2, 3);

    let ids: Vec<String> = rec.index().chunks().iter().map(|c| c.id.to_string()).collect();
    assert_eq!(ids, ["RIFF", "fmt ", "bext", "guan", "data", "LIST"]);
    assert_eq!(rec.duration().unwrap(), 3.0);

    let bext = rec.index().get(FourCc(*b"bext")).unwrap();
    assert_eq!(bext.declared_size, 7);
    assert_eq!(bext.padded_size, 8);

    let meta = rec.metadata().unwrap();
    assert_eq!(meta.get("Model"), Some("SM4"));
    assert_eq!(meta.get("NFC|Station Name"), Some("North Ridge"));

    for (i, c) in rec.index().chunks().iter().enumerate() {
        assert_eq!(c.order as usize, i);
    }
}

#[test]
fn test_rewrite_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let rec = write_recording(dir.path(), "src.wav", 2, 2);
    let out = dir.path().join("copy.wav");

    let written = rec.rewrite(&out).unwrap();

    let original = fs::read(rec.path()).unwrap();
    let copy = fs::read(&out).unwrap();
    assert_eq!(copy, original);
    assert_eq!(written.index.riff_size() as usize, copy.len() - 8);
}

#[test]
fn test_rewrite_repairs_riff_size() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad_size.wav");
    let mut bytes = recorder_file(1, 1);
    bytes[4..8].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    let rec = Recording::open(&path).unwrap();
    let out = dir.path().join("fixed.wav");
    rec.rewrite(&out).unwrap();

    let fixed = fs::read(&out).unwrap();
    let riff = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
    assert_eq!(riff as usize, fixed.len() - 8);
    assert_eq!(&fixed[8..], &bytes[8..]);
}

#[test]
fn test_centred_clip() {
    let dir = TempDir::new().unwrap();
    let rec = write_recording(dir.path(), "night.wav", 1, 60);
    let clips = dir.path().join("clips");
    let opts = ExtractOptions { clip_length: 10.0, ..ExtractOptions::default() };

    let outcome = rec.extract_event(&event(10.0, 12.0, "SWTH"), &clips, &opts).unwrap();
    let Outcome::Written(report, path) = outcome else { panic!("expected a new clip") };

    assert_eq!(path, clips.join("20240914-021745-0500-nh-SWTH.WAV"));
    assert_eq!(report.data_bytes, 10 * 2_000);
    assert_eq!(report.index.metadata(), rec.metadata());
    assert_eq!(first_sample(&path), 6 * 16);

    let clip = Recording::open(&path).unwrap();
    assert_eq!(clip.duration().unwrap(), 10.0);
    assert_eq!(clip.index().len(), rec.index().len());
}

#[test]
fn test_edge_clips_are_pinned() {
    let dir = TempDir::new().unwrap();
    let rec = write_recording(dir.path(), "night.wav", 1, 60);
    let clips = dir.path().join("clips");
    let opts = ExtractOptions { clip_length: 10.0, ..ExtractOptions::default() };

    let Outcome::Written(_, left) = rec.extract_event(&event(0.2, 0.6, "GCKI"), &clips, &opts).unwrap() else {
        panic!("expected a new clip")
    };
    assert_eq!(first_sample(&left), 0);

    let Outcome::Written(_, right) = rec.extract_event(&event(59.0, 59.9, "WIWA"), &clips, &opts).unwrap() else {
        panic!("expected a new clip")
    };
    assert_eq!(first_sample(&right), 50 * 16);
    assert_eq!(Recording::open(&right).unwrap().duration().unwrap(), 10.0);
}

#[test]
fn test_existing_clip_is_skipped_unless_forced() {
    let dir = TempDir::new().unwrap();
    let rec = write_recording(dir.path(), "night.wav", 1, 20);
    let clips = dir.path().join("clips");
    let ev = event(5.0, 5.5, "SWTH");

    let opts = ExtractOptions::default();
    assert!(matches!(rec.extract_event(&ev, &clips, &opts).unwrap(), Outcome::Written(..)));
    assert!(matches!(rec.extract_event(&ev, &clips, &opts).unwrap(), Outcome::Skipped(_)));

    let forced = ExtractOptions { force: true, ..ExtractOptions::default() };
    assert!(matches!(rec.extract_event(&ev, &clips, &forced).unwrap(), Outcome::Written(..)));
}

#[test]
fn test_concurrent_clips_share_new_directory() {
    let dir = TempDir::new().unwrap();
    let rec = write_recording(dir.path(), "night.wav", 1, 30);
    let clips = dir.path().join("nested").join("clips");
    let opts = ExtractOptions::default();
    let events: Vec<Event> = (0..8).map(|i| event(i as f64 * 3.0, i as f64 * 3.0 + 1.0, &format!("SP{i}"))).collect();

    let (rec, clips_ref, opts) = (&rec, &clips, &opts);
    std::thread::scope(|s| {
        let handles: Vec<_> = events
            .iter()
            .map(|ev| s.spawn(move || rec.extract_event(ev, clips_ref, opts)))
            .collect();
        for h in handles {
            assert!(matches!(h.join().unwrap().unwrap(), Outcome::Written(..)));
        }
    });
    assert_eq!(fs::read_dir(&clips).unwrap().count(), 8);
}

#[test]
fn test_channel_extraction_streams_in_blocks() {
    let dir = TempDir::new().unwrap();
    let rec = write_recording(dir.path(), "quad.wav", 4, 5);
    let out = dir.path().join("mono").join("ch2.wav");
    let opts = ExtractOptions { block_size: 4_000, ..ExtractOptions::default() };

    let Outcome::Written(report, path) = rec.extract_channel(2, &out, &opts).unwrap() else {
        panic!("expected a new file")
    };

    let original = rec.index().data().unwrap().size;
    assert_eq!(report.data_bytes, original / 4);
    assert_eq!(report.blocks, original.div_ceil(4_000));
    assert!(report.peak_block <= 4_000);

    let mono = Recording::open(&path).unwrap();
    let fmt = mono.format().unwrap();
    assert_eq!(fmt.channels, 1);
    assert_eq!(fmt.block_align, 2);
    assert_eq!(fmt.byte_rate, 2_000);
    assert_eq!(mono.duration().unwrap(), 5.0);
    assert_eq!(mono.metadata(), rec.metadata());
    assert_eq!(first_sample(&path), 2);
}

#[test]
fn test_channel_out_of_range_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let rec = write_recording(dir.path(), "stereo.wav", 2, 1);
    let out = dir.path().join("ch5.wav");

    let err = rec.extract_channel(5, &out, &ExtractOptions::default()).unwrap_err();
    assert!(matches!(err, WavError::ChannelOutOfRange { channel: 5, channels: 2 }));
    assert!(!out.exists());
}

#[test]
fn test_retag_updates_metadata_in_place_order() {
    let dir = TempDir::new().unwrap();
    let rec = write_recording(dir.path(), "src.wav", 1, 1);
    let out = dir.path().join("tagged.wav");

    rec.retag(&out, |m| {
        m.set("NFC|Station Name", "South Marsh");
        m.set("Note", "clear sky");
        m.remove("Model");
    })
    .unwrap();

    let tagged = Recording::open(&out).unwrap();
    let meta = tagged.metadata().unwrap();
    assert_eq!(meta.get("NFC|Station Name"), Some("South Marsh"));
    assert_eq!(meta.get("Note"), Some("clear sky"));
    assert_eq!(meta.get("Model"), None);

    let ids: Vec<String> = tagged.index().chunks().iter().map(|c| c.id.to_string()).collect();
    assert_eq!(ids, ["RIFF", "fmt ", "bext", "guan", "data", "LIST"]);
    assert_eq!(
        fs::metadata(&out).unwrap().len(),
        tagged.index().riff_size() as u64 + 8
    );
}

#[test]
fn test_retag_adds_missing_metadata_chunk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bare.wav");
    let mut bytes = recorder_file(1, 1);
    let at = bytes.windows(4).position(|w| w == b"guan").unwrap();
    bytes[at..at + 4].copy_from_slice(b"junk");
    fs::write(&path, &bytes).unwrap();

    let rec = Recording::open(&path).unwrap();
    assert!(rec.metadata().is_none());

    let out = dir.path().join("tagged.wav");
    rec.retag(&out, |m| m.set("Make", "AudioMoth")).unwrap();

    let tagged = Recording::open(&out).unwrap();
    let last = tagged.index().chunks().last().unwrap();
    assert_eq!(last.id, FourCc::GUAN);
    assert!(matches!(last.payload, ChunkPayload::Metadata(_)));
    assert_eq!(tagged.metadata().unwrap().get("GUANO|Version"), Some("1.0"));
    assert_eq!(tagged.metadata().unwrap().get("Make"), Some("AudioMoth"));
}

#[test]
fn test_refuses_to_overwrite_source() {
    let dir = TempDir::new().unwrap();
    let rec = write_recording(dir.path(), "src.wav", 1, 1);
    let before = fs::read(rec.path()).unwrap();

    assert!(rec.rewrite(rec.path()).is_err());
    assert_eq!(fs::read(rec.path()).unwrap(), before);
}

#[test]
fn test_rejects_non_wave_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("not.wav");
    fs::write(&path, b"RIFF\x04\x00\x00\x00AVI ").unwrap();
    assert!(matches!(
        Recording::open(&path),
        Err(WavError::UnsupportedContainer { .. })
    ));
}

#[test]
fn test_missing_data_fails_only_on_request() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("header_only.wav");
    fs::write(&path, b"RIFF\x1c\x00\x00\x00WAVEfmt \x10\x00\x00\x00\x01\x00\x01\x00\xe8\x03\x00\x00\xd0\x07\x00\x00\x02\x00\x10\x00").unwrap();

    let rec = Recording::open(&path).unwrap();
    assert_eq!(rec.format().unwrap().sample_rate, 1_000);
    assert!(matches!(rec.duration(), Err(WavError::MissingRequiredChunk(id)) if id == FourCc::DATA));

    let copy = dir.path().join("copy.wav");
    let written = rec.rewrite(&copy).unwrap();
    assert_eq!(fs::read(&copy).unwrap(), fs::read(&path).unwrap());
    assert_eq!(written.bytes_written, 36);

    let tagged = dir.path().join("tagged.wav");
    rec.retag(&tagged, |m| m.set("Make", "AudioMoth")).unwrap();
    let tagged = Recording::open(&tagged).unwrap();
    assert_eq!(tagged.metadata().unwrap().get("Make"), Some("AudioMoth"));
    assert!(tagged.index().data().is_err());
}

#[test]
fn test_rejects_zero_sized_foreign_header() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("junk.wav");
    let mut bytes = recorder_file(1, 1);
    bytes[0..8].copy_from_slice(b"JUNK\x00\x00\x00\x00");
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        Recording::open(&path),
        Err(WavError::UnsupportedContainer { riff, .. }) if riff == FourCc(*b"JUNK")
    ));
}

#[test]
fn test_summary_serializes_layout() {
    let dir = TempDir::new().unwrap();
    let rec = write_recording(dir.path(), "night.wav", 2, 1);

    let json: serde_json::Value = serde_json::to_value(rec.summary().unwrap()).unwrap();
    assert_eq!(json["file_name"], "night.wav");
    assert_eq!(json["actual_size"], json["reported_size"]);
    assert_eq!(json["form_type"], "WAVE");
    assert_eq!(json["format"]["channels"], 2);
    assert_eq!(json["metadata"]["NFC"]["Station Name"], "North Ridge");

    let chunks = json["chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 6);
    assert_eq!(chunks[2]["id"], "bext");
    assert_eq!(chunks[2]["preview"], "534d 3442 4154 01");
    assert!(chunks[2].get("bext").is_none());
    assert!(chunks[4].get("preview").is_none());
    assert_eq!(chunks[5]["info"], serde_json::json!([{ "id": "ISFT", "text": "" }]));
}

#[test]
fn test_summary_decodes_broadcast_extension() {
    let dir = TempDir::new().unwrap();
    let rec = write_recording(dir.path(), "plain.wav", 1, 1);

    let mut bext = vec![0u8; 602];
    bext[256..269].copy_from_slice(b"Song Meter SM");
    bext[320..338].copy_from_slice(b"2024-09-1402:00:00");
    let mut info = b"INFOINAM\x06\x00\x00\x00Ridge\x00".to_vec();
    info.extend_from_slice(b"ICMT\x05\x00\x00\x00clear\x00");

    let mut idx = ContainerIndex::new(0, FourCc::WAVE);
    for chunk in rec.index().chunks().iter().skip(1) {
        let payload = match chunk.id.as_bytes() {
            b"bext" => ChunkPayload::Opaque(bext.clone()),
            b"LIST" => ChunkPayload::Opaque(info.clone()),
            _ => chunk.payload.clone(),
        };
        idx.push(chunk.header(), payload);
    }
    let path = dir.path().join("broadcast.wav");
    let mut src = fs::File::open(rec.path()).unwrap();
    io_stream::write_file(&idx, &path, io_stream::open_data(&mut src, rec.index()).unwrap()).unwrap();

    let json = serde_json::to_value(Recording::open(&path).unwrap().summary().unwrap()).unwrap();
    let chunks = json["chunks"].as_array().unwrap();
    assert_eq!(chunks[2]["bext"]["originator"], "Song Meter SM");
    assert_eq!(chunks[2]["bext"]["originator_date"], "2024-09-14");
    assert_eq!(chunks[2]["bext"]["originator_time"], "02:00:00");
    assert_eq!(
        chunks[5]["info"],
        serde_json::json!([{ "id": "INAM", "text": "Ridge" }, { "id": "ICMT", "text": "clear" }])
    );
}
