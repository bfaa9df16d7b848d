//! Container parser and writer.
//!
//! # Parser
//! [`parse`] walks the file header by header from offset 12 to end of file.
//! `fmt ` and `guan` are decoded, every other chunk except `data` is
//! buffered verbatim, and `data` is skipped over: only its offset and
//! declared size are recorded, so multi-gigabyte payloads never enter
//! memory.
//!
//! # Writer
//! [`write`] replays an index in `order`. `fmt ` and `guan` are re-encoded
//! from their decoded form so edits take effect; the `data` payload is
//! streamed from a caller-supplied reader and its size field reflects the
//! bytes actually copied. The `RIFF` size is written as a placeholder and
//! patched to `file length - 8` once everything else is on disk.
//!
//! # Endianness
//! All size fields are little-endian u32, per RIFF.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, warn};

use crate::chunk::{read_chunk_header, write_header, ChunkHeader, FourCc, CHUNK_HEADER_SIZE};
use crate::error::{Result, WavError};
use crate::format::FormatDescriptor;
use crate::guano::Metadata;
use crate::index::{ChunkPayload, ContainerIndex};

/// `RIFF` header plus form type.
pub const RIFF_HEADER_SIZE: u64 = 12;

/// Largest non-`data` chunk the parser will buffer (64 MiB).
pub const MAX_BUFFERED_CHUNK: u64 = 64 * 1024 * 1024;

// ── Parser ───────────────────────────────────────────────────────────────────

/// Parse the container at `path`. The file is opened read-only.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<ContainerIndex> {
    let mut reader = BufReader::new(File::open(path)?);
    parse_reader(&mut reader)
}

/// Parse a container from any seekable stream.
pub fn parse_reader<R: Read + Seek>(reader: &mut R) -> Result<ContainerIndex> {
    let file_size = reader.seek(SeekFrom::End(0))?;

    let riff = read_chunk_header(reader, 0)?
        .ok_or(WavError::TruncatedHeader { offset: 0, available: 0 })?;
    let mut form = [0u8; 4];
    let form_read = read_up_to(reader, &mut form)?;
    if form_read < form.len() {
        return Err(WavError::TruncatedHeader {
            offset:    CHUNK_HEADER_SIZE,
            available: form_read,
        });
    }
    let form = FourCc(form);
    if riff.id != FourCc::RIFF || form != FourCc::WAVE {
        return Err(WavError::UnsupportedContainer { riff: riff.id, form });
    }
    if riff.declared_size as u64 + CHUNK_HEADER_SIZE != file_size {
        debug!(
            reported = riff.declared_size as u64 + CHUNK_HEADER_SIZE,
            actual = file_size,
            "RIFF size disagrees with file length"
        );
    }

    let mut index = ContainerIndex::new(riff.declared_size, form);
    let mut cursor = RIFF_HEADER_SIZE;

    while cursor < file_size {
        let Some(header) = read_chunk_header(reader, cursor)? else { break };
        if header.id.is_empty() {
            return Err(WavError::EmptyChunkTag { offset: cursor, file_size });
        }
        debug!(
            id = %header.id,
            offset = header.offset,
            size = header.declared_size,
            "chunk"
        );

        let payload = match header.id {
            FourCc::FMT => {
                reject_duplicate(&index, &header)?;
                let raw = read_payload(reader, &header)?;
                let format = FormatDescriptor::decode(&raw)?;
                if !format.is_byte_rate_consistent() {
                    warn!(
                        byte_rate = format.byte_rate,
                        sample_rate = format.sample_rate,
                        block_align = format.block_align,
                        "byte rate disagrees with sample rate * block align; trusting stored value"
                    );
                }
                ChunkPayload::Format(format)
            }
            FourCc::GUAN => {
                reject_duplicate(&index, &header)?;
                let raw = read_payload(reader, &header)?;
                match Metadata::decode(&raw) {
                    Ok(meta) => ChunkPayload::Metadata(meta),
                    Err(e) => {
                        warn!(offset = header.offset, error = %e, "undecodable metadata kept as opaque bytes");
                        ChunkPayload::Opaque(raw)
                    }
                }
            }
            FourCc::DATA => {
                reject_duplicate(&index, &header)?;
                if header.payload_offset() + header.declared_size as u64 > file_size {
                    warn!(
                        declared = header.declared_size,
                        available = file_size.saturating_sub(header.payload_offset()),
                        "data chunk extends past end of file"
                    );
                }
                ChunkPayload::Data { payload_offset: header.payload_offset() }
            }
            _ => ChunkPayload::Opaque(read_payload(reader, &header)?),
        };

        index.push(header, payload);
        cursor = header.end();
    }

    Ok(index)
}

fn reject_duplicate(index: &ContainerIndex, header: &ChunkHeader) -> Result<()> {
    if index.contains(header.id) {
        return Err(WavError::DuplicateChunk { id: header.id, offset: header.offset });
    }
    Ok(())
}

/// Read the unpadded payload of `header`; the reader is left just past it.
fn read_payload<R: Read + Seek>(reader: &mut R, header: &ChunkHeader) -> Result<Vec<u8>> {
    let size = header.declared_size as u64;
    if size > MAX_BUFFERED_CHUNK {
        return Err(WavError::AllocationTooLarge {
            id:        header.id,
            requested: size,
            limit:     MAX_BUFFERED_CHUNK,
        });
    }
    reader.seek(SeekFrom::Start(header.payload_offset()))?;
    let mut buf = Vec::with_capacity(size as usize);
    reader.by_ref().take(size).read_to_end(&mut buf)?;
    if (buf.len() as u64) < size {
        return Err(WavError::TruncatedPayload { expected: size, actual: buf.len() as u64 });
    }
    Ok(buf)
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Seek to the `data` payload and bound reads to its declared size.
pub fn open_data<'a, R: Read + Seek>(reader: &'a mut R, index: &ContainerIndex) -> Result<io::Take<&'a mut R>> {
    let data = index.data()?;
    reader.seek(SeekFrom::Start(data.offset))?;
    Ok(reader.take(data.size))
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Result of [`write`]: the index as laid out in the new file.
#[derive(Debug, Clone)]
pub struct Written {
    pub index:         ContainerIndex,
    pub bytes_written: u64,
}

/// Write `index` to `dest`, taking the `data` payload from `data`.
///
/// `dest` is written from its current position; the returned offsets are
/// relative to that position.
pub fn write<W, D>(index: &ContainerIndex, dest: &mut W, mut data: D) -> Result<Written>
where
    W: Write + Seek,
    D: Read,
{
    let start = dest.stream_position()?;
    let form = index.form_type();

    write_header(dest, FourCc::RIFF, 0)?;
    dest.write_all(form.as_bytes())?;

    let mut out = ContainerIndex::new(0, form);

    for chunk in index.chunks() {
        let offset = dest.stream_position()? - start;
        let (size, payload) = match &chunk.payload {
            ChunkPayload::Riff { .. } => continue,
            ChunkPayload::Format(format) => {
                let size = format.encoded_len();
                write_header(dest, chunk.id, size)?;
                format.write(&mut *dest)?;
                (size, chunk.payload.clone())
            }
            ChunkPayload::Metadata(meta) => {
                let bytes = meta.encode();
                let size = checked_size(bytes.len() as u64)?;
                write_header(dest, chunk.id, size)?;
                dest.write_all(&bytes)?;
                (size, chunk.payload.clone())
            }
            ChunkPayload::Data { .. } => {
                write_header(dest, chunk.id, 0)?;
                let copied = io::copy(&mut data, dest)?;
                let size = checked_size(copied)?;
                let resume = dest.stream_position()?;
                dest.seek(SeekFrom::Start(start + offset + 4))?;
                dest.write_u32::<LittleEndian>(size)?;
                dest.seek(SeekFrom::Start(resume))?;
                (size, ChunkPayload::Data { payload_offset: offset + CHUNK_HEADER_SIZE })
            }
            ChunkPayload::Opaque(bytes) => {
                let size = checked_size(bytes.len() as u64)?;
                write_header(dest, chunk.id, size)?;
                dest.write_all(bytes)?;
                (size, chunk.payload.clone())
            }
        };
        if size % 2 == 1 {
            dest.write_all(&[0])?;
        }
        out.push(ChunkHeader::new(chunk.id, size, offset), payload);
    }

    let end = dest.stream_position()?;
    let riff_size = checked_size(end - start - CHUNK_HEADER_SIZE)?;
    dest.seek(SeekFrom::Start(start + 4))?;
    dest.write_u32::<LittleEndian>(riff_size)?;
    dest.seek(SeekFrom::Start(end))?;
    dest.flush()?;

    out.set_riff_size(riff_size);
    Ok(Written { index: out, bytes_written: end - start })
}

/// Create (or truncate) `path` and [`write`] into it.
pub fn write_file<P: AsRef<Path>, D: Read>(index: &ContainerIndex, path: P, data: D) -> Result<Written> {
    let mut dest = BufWriter::new(File::create(path)?);
    let written = write(index, &mut dest, data)?;
    dest.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(written)
}

fn checked_size(len: u64) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        WavError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{len} bytes exceeds the 4 GiB RIFF size field"),
        ))
    })
}
