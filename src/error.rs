//! Error types for the container engine.

use thiserror::Error;

use crate::chunk::FourCc;
use crate::guano::MetadataError;

/// Everything that can go wrong while parsing, rewriting or extracting from
/// a RIFF/WAVE container.
///
/// Parse-time errors abort processing of the one file being parsed; the
/// caller decides whether to log and move on.
#[derive(Error, Debug)]
pub enum WavError {
    #[error("Truncated chunk header at offset {offset}: only {available} of 8 bytes present")]
    TruncatedHeader { offset: u64, available: usize },

    #[error("Malformed chunk '{id}' at offset {offset}: declared size is zero")]
    MalformedChunk { id: FourCc, offset: u64 },

    #[error("Unsupported container: expected RIFF/WAVE, found {riff}/{form}")]
    UnsupportedContainer { riff: FourCc, form: FourCc },

    #[error("Empty chunk tag at offset {offset} before end of file ({file_size} bytes)")]
    EmptyChunkTag { offset: u64, file_size: u64 },

    #[error("Duplicate '{id}' chunk at offset {offset}")]
    DuplicateChunk { id: FourCc, offset: u64 },

    #[error("Missing required '{0}' chunk")]
    MissingRequiredChunk(FourCc),

    #[error("Invalid format chunk: {0}")]
    InvalidFormat(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Channel {channel} out of range for a {channels}-channel container")]
    ChannelOutOfRange { channel: u16, channels: u16 },

    #[error("Block align {block_align} is not divisible by channel count {channels}")]
    UnevenBlockAlign { block_align: u16, channels: u16 },

    #[error("Truncated payload: expected {expected} bytes, source supplied {actual}")]
    TruncatedPayload { expected: u64, actual: u64 },

    #[error("Chunk '{id}' too large to buffer: {requested} bytes, limit is {limit} bytes")]
    AllocationTooLarge { id: FourCc, requested: u64, limit: u64 },

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WavError>;
