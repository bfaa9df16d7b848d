//! Time-range clips.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::debug;

use super::{frame_block_size, BlockStream, ExtractReport};
use crate::error::{Result, WavError};
use crate::event::Span;
use crate::format::FormatDescriptor;
use crate::index::{ContainerIndex, DataRegion};
use crate::io_stream;

/// Clip placement in seconds of recording time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipWindow {
    pub start:  f64,
    pub length: f64,
}

/// Place a `target`-second clip around `span` in a `total`-second recording.
///
/// A detection longer than `target` is never cut: the clip grows to the
/// detection. A shorter one is centred, except near either end of the
/// recording where the clip is pinned to that end instead. The result never
/// starts before 0 or runs past `total` unless the clip is longer than the
/// recording, in which case it starts at 0.
pub fn clip_window(span: Span, total: f64, target: f64) -> ClipWindow {
    let duration = span.duration();
    let length = target.max(duration);

    let start = if duration < length {
        let padding = duration / 2.0;
        if span.start < padding {
            0.0
        } else if total - span.stop < padding {
            total - length
        } else {
            span.start + duration / 2.0 - length / 2.0
        }
    } else {
        span.start
    };

    ClipWindow { start: start.min(total - length).max(0.0), length }
}

/// Absolute `(offset, length)` of `window` inside the data payload.
///
/// Seconds are converted with the stored byte rate and rounded, then both
/// ends are snapped down to a frame boundary and clamped to the first
/// `available` payload bytes.
pub fn byte_window(window: ClipWindow, format: &FormatDescriptor, data: DataRegion, available: u64) -> (u64, u64) {
    let rate = format.byte_rate as f64;
    let frame = format.block_align.max(1) as u64;
    let available = available.min(data.size);
    let available = available - available % frame;

    let start = (window.start.max(0.0) * rate).round() as u64;
    let start = (start - start % frame).min(available);
    let length = (window.length.max(0.0) * rate).round() as u64;
    let length = (length - length % frame).min(available - start);

    (data.offset + start, length)
}

/// Cut the clip for `span` out of `source` and write it to `dest`.
///
/// `target` is the desired clip length in seconds. Every chunk other than
/// `data` is carried over from `index` unchanged.
pub fn extract_clip<R, W>(
    index:      &ContainerIndex,
    source:     &mut R,
    span:       Span,
    target:     f64,
    dest:       &mut W,
    block_size: usize,
) -> Result<ExtractReport>
where
    R: Read + Seek,
    W: Write + Seek,
{
    span.validate()?;
    let format = index.format()?;
    let data = index.data()?;
    let total = index.duration_seconds()?;

    let file_len = source.seek(SeekFrom::End(0))?;
    let available = file_len.saturating_sub(data.offset);

    let window = clip_window(span, total, target);
    let (offset, length) = byte_window(window, format, data, available);
    debug!(start = window.start, length = window.length, offset, bytes = length, "clip window");

    source.seek(SeekFrom::Start(offset))?;
    let mut stream = BlockStream::new(
        source.by_ref().take(length),
        frame_block_size(block_size, format.block_align as usize),
    );
    let written = io_stream::write(index, dest, &mut stream)?;

    let data_bytes = written.index.data()?.size;
    if data_bytes != length {
        return Err(WavError::TruncatedPayload { expected: length, actual: data_bytes });
    }

    Ok(ExtractReport {
        index:      written.index,
        data_bytes,
        file_bytes: written.bytes_written,
        blocks:     stream.blocks(),
        peak_block: stream.peak_block(),
    })
}
