//! High-level [`Recording`] API, the main embedding surface.
//!
//! ```no_run
//! use nfcwav::recording::{ExtractOptions, Outcome, Recording};
//! use nfcwav::event::Event;
//!
//! let rec = Recording::open("NORTH_20240914_020000.WAV")?;
//! println!("{:.1} s", rec.duration()?);
//!
//! let events: Vec<Event> = serde_json::from_str(&std::fs::read_to_string("events.json")?)?;
//! for ev in &events {
//!     if let Outcome::Skipped(path) = rec.extract_event(ev, "clips", &ExtractOptions::default())? {
//!         println!("exists: {}", path.display());
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::chunk::{padded_size, FourCc};
use crate::error::{Result, WavError};
use crate::event::Event;
use crate::extract::{self, ExtractReport, DEFAULT_BLOCK_SIZE};
use crate::format::FormatDescriptor;
use crate::guano::Metadata;
use crate::index::{ChunkPayload, ContainerIndex};
use crate::io_stream::{self, Written};

// ── ExtractOptions ────────────────────────────────────────────────────────────

/// Configuration for derived-file operations.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Target clip length in seconds; longer detections keep their length.
    pub clip_length: f64,
    /// Overwrite outputs that already exist.
    pub force:       bool,
    /// Streaming block size in bytes, rounded down to whole frames.
    pub block_size:  usize,
    /// Extension for generated clip names.
    pub extension:   String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            clip_length: 5.0,
            force:       false,
            block_size:  DEFAULT_BLOCK_SIZE,
            extension:   "WAV".into(),
        }
    }
}

/// Result of an operation that may skip existing output.
#[derive(Debug)]
pub enum Outcome {
    Written(ExtractReport, PathBuf),
    Skipped(PathBuf),
}

// ── Summary ───────────────────────────────────────────────────────────────────

/// Serialisable overview of a container, for inspection output.
#[derive(Debug, Serialize)]
pub struct Summary<'a> {
    pub file_name:     String,
    pub actual_size:   u64,
    pub reported_size: u64,
    pub form_type:     FourCc,
    pub modified:      Option<DateTime<Utc>>,
    pub duration:      Option<f64>,
    pub format:        Option<&'a FormatDescriptor>,
    pub metadata:      Option<&'a Metadata>,
    pub chunks:        Vec<ChunkSummary>,
}

#[derive(Debug, Serialize)]
pub struct ChunkSummary {
    pub id:            FourCc,
    pub order:         u32,
    pub offset:        u64,
    pub declared_size: u32,
    pub padded_size:   u64,
    /// First bytes of opaque payloads, grouped like `xxd`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview:       Option<String>,
    /// Originator fields of a broadcast-wave `bext` chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bext:          Option<BextSummary>,
    /// Text entries of a `LIST` chunk of type `INFO`, in file order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info:          Option<Vec<InfoEntry>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BextSummary {
    pub originator:      String,
    pub originator_date: String,
    pub originator_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfoEntry {
    pub id:   FourCc,
    pub text: String,
}

const PREVIEW_BYTES: usize = 32;

const BEXT: FourCc = FourCc(*b"bext");
const LIST: FourCc = FourCc(*b"LIST");
const INFO: FourCc = FourCc(*b"INFO");

/// `bext` field ranges: originator, origination date, origination time.
const BEXT_ORIGINATOR: std::ops::Range<usize> = 256..288;
const BEXT_DATE:       std::ops::Range<usize> = 320..330;
const BEXT_TIME:       std::ops::Range<usize> = 330..338;

/// Text up to the first NUL.
fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// `None` when the payload is too short to hold the origination time.
fn decode_bext(payload: &[u8]) -> Option<BextSummary> {
    if payload.len() < BEXT_TIME.end {
        return None;
    }
    Some(BextSummary {
        originator:      c_string(&payload[BEXT_ORIGINATOR]),
        originator_date: c_string(&payload[BEXT_DATE]),
        originator_time: c_string(&payload[BEXT_TIME]),
    })
}

/// Subchunks of an `INFO` list. A subchunk running past the payload keeps
/// whatever text is present and ends the walk.
fn decode_info(payload: &[u8]) -> Option<Vec<InfoEntry>> {
    if payload.len() < 4 || payload[..4] != INFO.0 {
        return None;
    }
    let mut entries = Vec::new();
    let mut at = 4;
    while payload.len().saturating_sub(at) >= 8 {
        let id = FourCc([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]]);
        let size = u32::from_le_bytes([payload[at + 4], payload[at + 5], payload[at + 6], payload[at + 7]]);
        let start = at + 8;
        let end = start.saturating_add(size as usize).min(payload.len());
        entries.push(InfoEntry { id, text: c_string(&payload[start..end]) });
        at = start.saturating_add(padded_size(size) as usize);
    }
    Some(entries)
}

fn hex_preview(bytes: &[u8]) -> String {
    bytes[..bytes.len().min(PREVIEW_BYTES)]
        .chunks(2)
        .map(hex::encode)
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Recording ─────────────────────────────────────────────────────────────────

/// One parsed container on disk.
///
/// The index is built once by [`Recording::open`]; every operation opens
/// its own read-only handle on the source, so a `Recording` can be shared
/// across worker threads.
#[derive(Debug, Clone)]
pub struct Recording {
    path:  PathBuf,
    index: ContainerIndex,
}

impl Recording {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let index = io_stream::parse(&path)?;
        Ok(Self { path, index })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &ContainerIndex {
        &self.index
    }

    pub fn format(&self) -> Result<&FormatDescriptor> {
        self.index.format()
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.index.metadata()
    }

    pub fn duration(&self) -> Result<f64> {
        self.index.duration_seconds()
    }

    pub fn summary(&self) -> Result<Summary<'_>> {
        let stat = fs::metadata(&self.path)?;
        let chunks = self
            .index
            .chunks()
            .iter()
            .map(|c| ChunkSummary {
                id:            c.id,
                order:         c.order,
                offset:        c.offset,
                declared_size: c.declared_size,
                padded_size:   c.padded_size,
                preview:       match &c.payload {
                    ChunkPayload::Opaque(bytes) => Some(hex_preview(bytes)),
                    _ => None,
                },
                bext:          match &c.payload {
                    ChunkPayload::Opaque(bytes) if c.id == BEXT => decode_bext(bytes),
                    _ => None,
                },
                info:          match &c.payload {
                    ChunkPayload::Opaque(bytes) if c.id == LIST => decode_info(bytes),
                    _ => None,
                },
            })
            .collect();

        Ok(Summary {
            file_name:     self.file_name(),
            actual_size:   stat.len(),
            reported_size: self.index.riff_size() as u64 + 8,
            form_type:     self.index.form_type(),
            modified:      stat.modified().ok().map(DateTime::<Utc>::from),
            duration:      self.index.duration_seconds().ok(),
            format:        self.index.format().ok(),
            metadata:      self.index.metadata(),
            chunks,
        })
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn open_source(&self) -> Result<BufReader<File>> {
        Ok(BufReader::new(File::open(&self.path)?))
    }

    // ── Derived files ─────────────────────────────────────────────────────────

    /// Extract the clip for `event` into `clip_dir`, named by
    /// [`Event::clip_file_name`]. An existing clip is left alone unless
    /// `opts.force` is set.
    pub fn extract_event<P: AsRef<Path>>(&self, event: &Event, clip_dir: P, opts: &ExtractOptions) -> Result<Outcome> {
        let clip_dir = clip_dir.as_ref();
        let dest = clip_dir.join(event.clip_file_name(&opts.extension));
        if dest.exists() && !opts.force {
            info!(clip = %dest.display(), "clip exists, skipping");
            return Ok(Outcome::Skipped(dest));
        }
        ensure_dir(clip_dir)?;

        let mut source = self.open_source()?;
        let report = write_output(&self.path, &dest, |out| {
            extract::extract_clip(&self.index, &mut source, event.span, opts.clip_length, out, opts.block_size)
        })?;
        info!(
            clip = %dest.display(),
            start = event.span.start,
            stop = event.span.stop,
            bytes = report.file_bytes,
            "clip written"
        );
        Ok(Outcome::Written(report, dest))
    }

    /// Write channel `channel` alone to `dest`.
    pub fn extract_channel<P: AsRef<Path>>(&self, channel: u16, dest: P, opts: &ExtractOptions) -> Result<Outcome> {
        let dest = dest.as_ref().to_owned();
        if dest.exists() && !opts.force {
            info!(dest = %dest.display(), "output exists, skipping");
            return Ok(Outcome::Skipped(dest));
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }

        let mut source = self.open_source()?;
        let report = write_output(&self.path, &dest, |out| {
            extract::extract_channel(&self.index, &mut source, channel, out, opts.block_size)
        })?;
        info!(dest = %dest.display(), channel, blocks = report.blocks, "channel written");
        Ok(Outcome::Written(report, dest))
    }

    /// Copy the container to `dest` with its metadata block passed through
    /// `edit`. A `guan` chunk carrying `GUANO|Version` is added when the
    /// source has none.
    pub fn retag<P, F>(&self, dest: P, edit: F) -> Result<Written>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut Metadata),
    {
        let mut metadata = self.index.metadata().cloned().unwrap_or_else(|| {
            if self.index.contains(FourCc::GUAN) {
                warn!(file = %self.path.display(), "replacing undecodable metadata block");
            }
            Metadata::versioned()
        });
        edit(&mut metadata);

        let mut index = self.index.clone();
        if self.index.metadata().is_none() && self.index.contains(FourCc::GUAN) {
            index = without_chunk(&index, FourCc::GUAN);
        }
        index.set_metadata(metadata);
        self.rewrite_index(&index, dest.as_ref())
    }

    /// Reconstruct the container at `dest` without changes.
    pub fn rewrite<P: AsRef<Path>>(&self, dest: P) -> Result<Written> {
        self.rewrite_index(&self.index, dest.as_ref())
    }

    fn rewrite_index(&self, index: &ContainerIndex, dest: &Path) -> Result<Written> {
        let mut source = self.open_source()?;
        let written = write_output(&self.path, dest, |out| {
            match io_stream::open_data(&mut source, &self.index) {
                Ok(data) => io_stream::write(index, out, data),
                // Header-only containers carry no payload to stream.
                Err(WavError::MissingRequiredChunk(_)) => io_stream::write(index, out, io::empty()),
                Err(e) => Err(e),
            }
        })?;
        info!(dest = %dest.display(), bytes = written.bytes_written, "container written");
        Ok(written)
    }
}

/// Copy of `index` minus every chunk tagged `id`, reassigning `order`.
fn without_chunk(index: &ContainerIndex, id: FourCc) -> ContainerIndex {
    let mut out = ContainerIndex::new(index.riff_size(), index.form_type());
    for c in index.chunks().iter().skip(1).filter(|c| c.id != id) {
        out.push(c.header(), c.payload.clone());
    }
    out
}

/// Create `dir`, treating a concurrent creator's success as our own.
fn ensure_dir(dir: &Path) -> Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Run `f` against a fresh file at `dest`; on failure the partial file is
/// removed. Refuses to overwrite `source`.
fn write_output<T, F>(source: &Path, dest: &Path, f: F) -> Result<T>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<T>,
{
    if same_file(source, dest) {
        return Err(WavError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to overwrite source {}", source.display()),
        )));
    }

    let mut out = BufWriter::new(File::create(dest)?);
    let result = f(&mut out).and_then(|value| {
        out.flush()?;
        out.get_mut().sync_all()?;
        Ok(value)
    });
    if result.is_err() {
        drop(out);
        if let Err(e) = fs::remove_file(dest) {
            warn!(dest = %dest.display(), error = %e, "could not remove partial output");
        }
    }
    result
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_groups_pairs() {
        assert_eq!(hex_preview(&[0xde, 0xad, 0xbe, 0xef, 0x01]), "dead beef 01");
        assert_eq!(hex_preview(&[0u8; 100]).len(), 16 * 4 + 15);
    }

    #[test]
    fn bext_originator_fields_are_nul_trimmed() {
        let mut payload = vec![0u8; 602];
        payload[256..262].copy_from_slice(b"SM4BAT");
        payload[320..338].copy_from_slice(b"2024-09-1402:00:00");
        let bext = decode_bext(&payload).unwrap();
        assert_eq!(bext.originator, "SM4BAT");
        assert_eq!(bext.originator_date, "2024-09-14");
        assert_eq!(bext.originator_time, "02:00:00");

        assert_eq!(decode_bext(&payload[..337]), None);
    }

    #[test]
    fn info_entries_follow_padding() {
        let payload = b"INFOINAM\x05\x00\x00\x00dusk\x00\x00ICMT\x03\x00\x00\x00ok\x00\x00ISFT\x40\x00\x00\x00cut";
        let info = decode_info(payload).unwrap();
        let pairs: Vec<(String, &str)> = info.iter().map(|e| (e.id.to_string(), e.text.as_str())).collect();
        assert_eq!(pairs, [("INAM".to_string(), "dusk"), ("ICMT".to_string(), "ok"), ("ISFT".to_string(), "cut")]);

        assert_eq!(decode_info(b"adtlltxt"), None);
    }

    #[test]
    fn default_options() {
        let o = ExtractOptions::default();
        assert_eq!(o.clip_length, 5.0);
        assert!(!o.force);
        assert_eq!(o.extension, "WAV");
    }
}
