//! The container index: every chunk of one RIFF/WAVE file, in file order.
//!
//! Entry 0 is always the synthetic `RIFF` entry (declared size + form type).
//! `order` equals the position in the index and is what the writer replays,
//! so an untouched index reconstructs the original chunk sequence.

use crate::chunk::{ChunkHeader, FourCc, CHUNK_HEADER_SIZE};
use crate::error::{Result, WavError};
use crate::format::FormatDescriptor;
use crate::guano::Metadata;

/// What the engine knows about one chunk's payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload {
    Riff { form_type: FourCc },
    Format(FormatDescriptor),
    Metadata(Metadata),
    /// Audio samples stay on disk; only their absolute offset is kept.
    Data { payload_offset: u64 },
    /// Unpadded payload bytes of any chunk the engine does not interpret.
    Opaque(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id:            FourCc,
    /// Absolute offset of the 8-byte header in the file the index describes.
    pub offset:        u64,
    pub declared_size: u32,
    pub padded_size:   u64,
    pub order:         u32,
    pub payload:       ChunkPayload,
}

impl Chunk {
    pub fn header(&self) -> ChunkHeader {
        ChunkHeader::new(self.id, self.declared_size, self.offset)
    }
}

/// Location and length of the `data` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRegion {
    /// Absolute offset of the first sample byte.
    pub offset: u64,
    /// Declared payload size.
    pub size:   u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerIndex {
    chunks: Vec<Chunk>,
}

impl ContainerIndex {
    pub fn new(riff_size: u32, form_type: FourCc) -> Self {
        Self {
            chunks: vec![Chunk {
                id:            FourCc::RIFF,
                offset:        0,
                declared_size: riff_size,
                padded_size:   riff_size as u64,
                order:         0,
                payload:       ChunkPayload::Riff { form_type },
            }],
        }
    }

    /// Append a chunk discovered (or written) at `header.offset`.
    pub fn push(&mut self, header: ChunkHeader, payload: ChunkPayload) -> &Chunk {
        let order = self.chunks.len() as u32;
        self.chunks.push(Chunk {
            id:            header.id,
            offset:        header.offset,
            declared_size: header.declared_size,
            padded_size:   header.padded_size,
            order,
            payload,
        });
        &self.chunks[self.chunks.len() - 1]
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// First chunk carrying `id`.
    pub fn get(&self, id: FourCc) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: FourCc) -> bool {
        self.get(id).is_some()
    }

    pub fn riff_size(&self) -> u32 {
        self.chunks[0].declared_size
    }

    pub fn form_type(&self) -> FourCc {
        match self.chunks[0].payload {
            ChunkPayload::Riff { form_type } => form_type,
            _ => FourCc::WAVE,
        }
    }

    pub(crate) fn set_riff_size(&mut self, size: u32) {
        self.chunks[0].declared_size = size;
        self.chunks[0].padded_size = size as u64;
    }

    pub fn format(&self) -> Result<&FormatDescriptor> {
        self.chunks
            .iter()
            .find_map(|c| match &c.payload {
                ChunkPayload::Format(f) => Some(f),
                _ => None,
            })
            .ok_or(WavError::MissingRequiredChunk(FourCc::FMT))
    }

    /// Replace the decoded `fmt ` payload.
    pub fn set_format(&mut self, format: FormatDescriptor) -> Result<()> {
        let chunk = self
            .chunks
            .iter_mut()
            .find(|c| matches!(c.payload, ChunkPayload::Format(_)))
            .ok_or(WavError::MissingRequiredChunk(FourCc::FMT))?;
        chunk.declared_size = format.encoded_len();
        chunk.padded_size = crate::chunk::padded_size(chunk.declared_size);
        chunk.payload = ChunkPayload::Format(format);
        Ok(())
    }

    pub fn data(&self) -> Result<DataRegion> {
        self.chunks
            .iter()
            .find_map(|c| match c.payload {
                ChunkPayload::Data { payload_offset } => Some(DataRegion {
                    offset: payload_offset,
                    size:   c.declared_size as u64,
                }),
                _ => None,
            })
            .ok_or(WavError::MissingRequiredChunk(FourCc::DATA))
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.chunks.iter().find_map(|c| match &c.payload {
            ChunkPayload::Metadata(m) => Some(m),
            _ => None,
        })
    }

    /// Replace the metadata block, appending a `guan` chunk after the last
    /// entry when the container has none.
    pub fn set_metadata(&mut self, metadata: Metadata) {
        let size = metadata.encode().len() as u32;
        if let Some(chunk) = self
            .chunks
            .iter_mut()
            .find(|c| matches!(c.payload, ChunkPayload::Metadata(_)))
        {
            chunk.declared_size = size;
            chunk.padded_size = crate::chunk::padded_size(size);
            chunk.payload = ChunkPayload::Metadata(metadata);
            return;
        }
        let offset = self.end_offset();
        self.push(ChunkHeader::new(FourCc::GUAN, size, offset), ChunkPayload::Metadata(metadata));
    }

    /// Playback length: declared `data` size over the stored byte rate.
    pub fn duration_seconds(&self) -> Result<f64> {
        let data = self.data()?;
        self.format()?.seconds_for(data.size)
    }

    /// Offset just past the last indexed chunk.
    fn end_offset(&self) -> u64 {
        match self.chunks.last() {
            Some(c) if c.order > 0 => c.offset + CHUNK_HEADER_SIZE + c.padded_size,
            _ => 12,
        }
    }
}
