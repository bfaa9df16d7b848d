//! Derived containers: time-bounded clips and single-channel extracts.
//!
//! Both extractors pull the `data` payload through a [`BlockStream`], whose
//! buffer is a fixed number of whole frames regardless of payload size, and
//! hand the stream to [`crate::io_stream::write`] as the new `data` payload.

pub mod channel;
pub mod clip;

pub use channel::extract_channel;
pub use clip::{byte_window, clip_window, extract_clip, ClipWindow};

use std::io::{self, Read};

use crate::index::ContainerIndex;

/// Default streaming block: 1 MiB, rounded down to whole frames.
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// What an extraction produced.
#[derive(Debug, Clone)]
pub struct ExtractReport {
    /// Index of the new file as written.
    pub index:      ContainerIndex,
    /// Bytes in the new `data` payload.
    pub data_bytes: u64,
    /// Total bytes of the new file.
    pub file_bytes: u64,
    /// Blocks pulled from the source.
    pub blocks:     u64,
    /// Largest single block read, in bytes.
    pub peak_block: usize,
}

/// `block_size` rounded down to a whole number of `frame`-byte frames,
/// never less than one frame.
pub fn frame_block_size(block_size: usize, frame: usize) -> usize {
    let frame = frame.max(1);
    (block_size / frame).max(1) * frame
}

/// Which bytes of each frame to keep.
#[derive(Debug, Clone, Copy)]
struct Lane {
    frame:  usize,
    offset: usize,
    width:  usize,
}

/// Fixed-buffer reader over a payload, optionally deinterleaving one
/// channel out of every frame.
pub struct BlockStream<R> {
    inner:      R,
    block:      Vec<u8>,
    block_size: usize,
    out:        Vec<u8>,
    pos:        usize,
    lane:       Option<Lane>,
    blocks:     u64,
    peak_block: usize,
}

impl<R: Read> BlockStream<R> {
    /// Pass-through stream reading `block_size` bytes at a time.
    pub fn new(inner: R, block_size: usize) -> Self {
        Self {
            inner,
            block: Vec::new(),
            block_size: block_size.max(1),
            out: Vec::new(),
            pos: 0,
            lane: None,
            blocks: 0,
            peak_block: 0,
        }
    }

    /// Stream keeping `width` bytes at `offset` out of every `frame` bytes.
    /// `block_size` is rounded down to whole frames; a partial frame at the
    /// end of the payload is dropped.
    pub fn deinterleave(inner: R, block_size: usize, frame: usize, offset: usize, width: usize) -> Self {
        let mut stream = Self::new(inner, frame_block_size(block_size, frame));
        stream.lane = Some(Lane { frame, offset, width });
        stream
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    pub fn peak_block(&self) -> usize {
        self.peak_block
    }

    fn refill(&mut self) -> io::Result<()> {
        self.block.resize(self.block_size, 0);
        let mut filled = 0;
        while filled < self.block_size {
            match self.inner.read(&mut self.block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.block.truncate(filled);
        self.pos = 0;
        if filled == 0 {
            self.out.clear();
            return Ok(());
        }
        self.blocks += 1;
        self.peak_block = self.peak_block.max(filled);

        match self.lane {
            Some(Lane { frame, offset, width }) => {
                self.out.clear();
                for f in self.block.chunks_exact(frame) {
                    self.out.extend_from_slice(&f[offset..offset + width]);
                }
            }
            None => std::mem::swap(&mut self.block, &mut self.out),
        }
        Ok(())
    }
}

impl<R: Read> Read for BlockStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.out.len() {
            self.refill()?;
            if self.out.is_empty() {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.out.len() - self.pos);
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
