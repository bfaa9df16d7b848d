//! The `fmt ` chunk.
//!
//! Layout (little-endian, offsets relative to the payload):
//! - `[0..2]`   format tag (1 = PCM, 0xFFFE = extensible)
//! - `[2..4]`   channel count
//! - `[4..8]`   sample rate (frames per second)
//! - `[8..12]`  byte rate
//! - `[12..14]` block align (bytes per frame, all channels)
//! - `[14..16]` bits per sample
//! - `[16..18]` optional extension size, followed by the extension bytes

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Serialize, Serializer};
use std::io::{self, Write};

use crate::error::{Result, WavError};

pub const WAVE_FORMAT_PCM:        u16 = 0x0001;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Bytes in the mandatory part of the `fmt ` payload.
pub const FMT_BASE_SIZE: usize = 16;

/// Position of the speaker mask inside the extensible extension bytes
/// (after the 2-byte valid-bits field).
const CHANNEL_MASK_RANGE: std::ops::Range<usize> = 2..6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatDescriptor {
    pub format_tag:      u16,
    pub channels:        u16,
    pub sample_rate:     u32,
    pub byte_rate:       u32,
    pub block_align:     u16,
    pub bits_per_sample: u16,
    /// Stored extension size; `None` for a bare 16-byte header.
    pub extension_size:  Option<u16>,
    /// Every byte after the extension size field, whether or not the size
    /// field accounts for all of them.
    #[serde(serialize_with = "as_hex")]
    pub extension:       Vec<u8>,
}

fn as_hex<S: Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(&hex::encode(bytes))
}

impl FormatDescriptor {
    /// Plain PCM descriptor with derived byte rate and block align.
    pub fn pcm(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        let block_align = channels * bits_per_sample.div_ceil(8);
        Self {
            format_tag: WAVE_FORMAT_PCM,
            channels,
            sample_rate,
            byte_rate: sample_rate * block_align as u32,
            block_align,
            bits_per_sample,
            extension_size: None,
            extension: Vec::new(),
        }
    }

    /// Decode from the declared (unpadded) payload bytes.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < FMT_BASE_SIZE {
            return Err(WavError::InvalidFormat(format!(
                "payload is {} bytes, need at least {FMT_BASE_SIZE}",
                payload.len()
            )));
        }
        let mut r = payload;
        let format_tag      = r.read_u16::<LittleEndian>()?;
        let channels        = r.read_u16::<LittleEndian>()?;
        let sample_rate     = r.read_u32::<LittleEndian>()?;
        let byte_rate       = r.read_u32::<LittleEndian>()?;
        let block_align     = r.read_u16::<LittleEndian>()?;
        let bits_per_sample = r.read_u16::<LittleEndian>()?;

        let (extension_size, extension) = if r.len() >= 2 {
            let size = r.read_u16::<LittleEndian>()?;
            (Some(size), r.to_vec())
        } else {
            // A lone trailing byte cannot be a size field; keep it opaque.
            (None, r.to_vec())
        };

        Ok(Self {
            format_tag,
            channels,
            sample_rate,
            byte_rate,
            block_align,
            bits_per_sample,
            extension_size,
            extension,
        })
    }

    pub fn encoded_len(&self) -> u32 {
        let ext = self.extension_size.map_or(0, |_| 2);
        (FMT_BASE_SIZE + ext + self.extension.len()) as u32
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.format_tag)?;
        writer.write_u16::<LittleEndian>(self.channels)?;
        writer.write_u32::<LittleEndian>(self.sample_rate)?;
        writer.write_u32::<LittleEndian>(self.byte_rate)?;
        writer.write_u16::<LittleEndian>(self.block_align)?;
        writer.write_u16::<LittleEndian>(self.bits_per_sample)?;
        if let Some(size) = self.extension_size {
            writer.write_u16::<LittleEndian>(size)?;
        }
        writer.write_all(&self.extension)?;
        Ok(())
    }

    /// `byte_rate == sample_rate * block_align`. Informational only; the
    /// stored byte rate is what duration and offset math use.
    pub fn is_byte_rate_consistent(&self) -> bool {
        self.sample_rate as u64 * self.block_align as u64 == self.byte_rate as u64
    }

    /// Bytes one channel contributes to each frame.
    pub fn bytes_per_sample(&self) -> Result<u16> {
        if self.channels == 0 {
            return Err(WavError::InvalidFormat("channel count is zero".into()));
        }
        if self.block_align == 0 || self.block_align % self.channels != 0 {
            return Err(WavError::UnevenBlockAlign {
                block_align: self.block_align,
                channels:    self.channels,
            });
        }
        Ok(self.block_align / self.channels)
    }

    /// Playback time of `bytes` of payload, in seconds.
    pub fn seconds_for(&self, bytes: u64) -> Result<f64> {
        if self.byte_rate == 0 {
            return Err(WavError::InvalidFormat("byte rate is zero".into()));
        }
        Ok(bytes as f64 / self.byte_rate as f64)
    }

    /// Descriptor for one channel deinterleaved out of this layout.
    pub fn single_channel(&self) -> Result<Self> {
        let bytes_per_sample = self.bytes_per_sample()?;
        let mut out = self.clone();
        out.channels    = 1;
        out.byte_rate   = self.byte_rate / self.channels as u32;
        out.block_align = bytes_per_sample;
        if self.format_tag == WAVE_FORMAT_EXTENSIBLE && out.extension.len() >= CHANNEL_MASK_RANGE.end {
            out.extension[CHANNEL_MASK_RANGE].fill(0);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(f: &FormatDescriptor) -> Vec<u8> {
        let mut buf = Vec::new();
        f.write(&mut buf).unwrap();
        buf
    }

    #[test]
    fn pcm_header_is_sixteen_bytes() {
        let f = FormatDescriptor::pcm(2, 48_000, 16);
        assert_eq!(f.block_align, 4);
        assert_eq!(f.byte_rate, 192_000);
        assert_eq!(f.encoded_len(), 16);
        assert_eq!(encode(&f).len(), 16);
        assert_eq!(FormatDescriptor::decode(&encode(&f)).unwrap(), f);
    }

    #[test]
    fn keeps_extension_bytes_verbatim() {
        let mut raw = encode(&FormatDescriptor::pcm(1, 22_050, 16));
        raw.extend_from_slice(&[4, 0, 0xaa, 0xbb, 0xcc, 0xdd]);
        let f = FormatDescriptor::decode(&raw).unwrap();
        assert_eq!(f.extension_size, Some(4));
        assert_eq!(f.extension, vec![0xaa, 0xbb, 0xcc, 0xdd]);
        assert_eq!(encode(&f), raw);
        assert_eq!(f.encoded_len() as usize, raw.len());
    }

    #[test]
    fn rejects_short_payload() {
        assert!(matches!(
            FormatDescriptor::decode(&[1, 0, 2, 0]),
            Err(WavError::InvalidFormat(_))
        ));
    }

    #[test]
    fn single_channel_divides_rates() {
        let f = FormatDescriptor::pcm(4, 96_000, 24);
        let mono = f.single_channel().unwrap();
        assert_eq!(mono.channels, 1);
        assert_eq!(mono.block_align, 3);
        assert_eq!(mono.byte_rate, 288_000);
        assert!(mono.is_byte_rate_consistent());
    }

    #[test]
    fn extensible_mask_is_cleared() {
        let mut f = FormatDescriptor::pcm(2, 48_000, 16);
        f.format_tag = WAVE_FORMAT_EXTENSIBLE;
        f.extension_size = Some(22);
        f.extension = vec![16, 0, 3, 0, 0, 0];
        f.extension.extend_from_slice(&[0x11; 16]);
        let mono = f.single_channel().unwrap();
        assert_eq!(&mono.extension[..6], &[16, 0, 0, 0, 0, 0]);
        assert_eq!(&mono.extension[6..], &[0x11; 16]);
    }

    #[test]
    fn uneven_block_align_is_rejected() {
        let mut f = FormatDescriptor::pcm(2, 8_000, 8);
        f.block_align = 3;
        assert!(matches!(f.bytes_per_sample(), Err(WavError::UnevenBlockAlign { .. })));
    }
}
