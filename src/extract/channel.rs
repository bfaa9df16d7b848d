//! Single-channel extraction.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::debug;

use super::{BlockStream, ExtractReport};
use crate::error::{Result, WavError};
use crate::index::ContainerIndex;
use crate::io_stream;

/// Write a mono copy of `channel` from `source` to `dest`.
///
/// The payload is streamed `block_size` bytes (rounded to whole frames) at
/// a time; memory use does not depend on the payload size. The new `fmt `
/// has one channel and byte rate and block align divided by the original
/// channel count; every other chunk is carried over unchanged.
pub fn extract_channel<R, W>(
    index:      &ContainerIndex,
    source:     &mut R,
    channel:    u16,
    dest:       &mut W,
    block_size: usize,
) -> Result<ExtractReport>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let format = index.format()?;
    if channel >= format.channels {
        return Err(WavError::ChannelOutOfRange { channel, channels: format.channels });
    }
    let width = format.bytes_per_sample()? as usize;
    let frame = format.block_align as usize;
    let data = index.data()?;

    let file_len = source.seek(SeekFrom::End(0))?;
    let available = file_len.saturating_sub(data.offset).min(data.size);
    let frames = available / frame as u64;
    let expected = frames * width as u64;

    let mut derived = index.clone();
    derived.set_format(format.single_channel()?)?;

    debug!(channel, channels = format.channels, frames, "deinterleaving");

    source.seek(SeekFrom::Start(data.offset))?;
    let mut stream = BlockStream::deinterleave(
        source.by_ref().take(frames * frame as u64),
        block_size,
        frame,
        channel as usize * width,
        width,
    );
    let written = io_stream::write(&derived, dest, &mut stream)?;

    let data_bytes = written.index.data()?.size;
    if data_bytes != expected {
        return Err(WavError::TruncatedPayload { expected, actual: data_bytes });
    }

    Ok(ExtractReport {
        index:      written.index,
        data_bytes,
        file_bytes: written.bytes_written,
        blocks:     stream.blocks(),
        peak_block: stream.peak_block(),
    })
}
