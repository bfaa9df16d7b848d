//! Chunk headers: the 8-byte `(tag, size)` prefix shared by every RIFF chunk.
//!
//! Layout (little-endian):
//! - `[0..4]` tag: four ASCII bytes, trailing spaces significant (`"fmt "`)
//! - `[4..8]` declared size: u32, payload length *excluding* the pad byte
//!
//! A chunk with an odd declared size is followed by one pad byte that is
//! never counted in the size field.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{Result, WavError};

pub const CHUNK_HEADER_SIZE: u64 = 8;

// ── FourCc ──────────────────────────────────────────────────────────────────

/// A four-byte chunk tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const RIFF: FourCc = FourCc(*b"RIFF");
    pub const WAVE: FourCc = FourCc(*b"WAVE");
    pub const FMT:  FourCc = FourCc(*b"fmt ");
    pub const DATA: FourCc = FourCc(*b"data");
    /// GUANO embedded metadata.
    pub const GUAN: FourCc = FourCc(*b"guan");

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Four null bytes: what zero-filled trailing garbage decodes to.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 4]
    }
}

impl From<&[u8; 4]> for FourCc {
    fn from(b: &[u8; 4]) -> Self {
        FourCc(*b)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
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

impl Serialize for FourCc {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ── ChunkHeader ─────────────────────────────────────────────────────────────

/// Declared size rounded up to the next even number.
pub fn padded_size(declared: u32) -> u64 {
    let declared = declared as u64;
    declared + declared % 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id:            FourCc,
    /// Size field exactly as stored.
    pub declared_size: u32,
    /// `declared_size` plus the pad byte, if any.
    pub padded_size:   u64,
    /// Absolute offset of the 8-byte header.
    pub offset:        u64,
}

impl ChunkHeader {
    pub fn new(id: FourCc, declared_size: u32, offset: u64) -> Self {
        Self {
            id,
            declared_size,
            padded_size: padded_size(declared_size),
            offset,
        }
    }

    /// Absolute offset of the first payload byte.
    pub fn payload_offset(&self) -> u64 {
        self.offset + CHUNK_HEADER_SIZE
    }

    /// Absolute offset of the next chunk header.
    pub fn end(&self) -> u64 {
        self.payload_offset() + self.padded_size
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        write_header(&mut writer, self.id, self.declared_size)
    }
}

pub(crate) fn write_header<W: Write>(writer: &mut W, id: FourCc, size: u32) -> io::Result<()> {
    writer.write_all(id.as_bytes())?;
    writer.write_u32::<LittleEndian>(size)
}

/// Read the chunk header found at `cursor`.
///
/// Returns `Ok(None)` when `cursor` sits exactly at end of stream. Fewer
/// than eight bytes anywhere else is a [`WavError::TruncatedHeader`]. A
/// zero declared size is only legal on the top-level header at offset 0,
/// whose tag the caller validates; the null tag is passed through so the
/// caller can report trailing garbage.
pub fn read_chunk_header<R: Read + Seek>(reader: &mut R, cursor: u64) -> Result<Option<ChunkHeader>> {
    reader.seek(SeekFrom::Start(cursor))?;

    let mut buf = [0u8; CHUNK_HEADER_SIZE as usize];
    let mut filled = 0usize;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => return Ok(None),
        8 => {}
        available => return Err(WavError::TruncatedHeader { offset: cursor, available }),
    }

    let id = FourCc([buf[0], buf[1], buf[2], buf[3]]);
    let declared_size = (&buf[4..8]).read_u32::<LittleEndian>()?;

    if declared_size == 0 && cursor != 0 && id != FourCc::RIFF && !id.is_empty() {
        return Err(WavError::MalformedChunk { id, offset: cursor });
    }

    Ok(Some(ChunkHeader::new(id, declared_size, cursor)))
}
