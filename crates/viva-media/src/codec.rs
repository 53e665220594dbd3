//! Telephony audio decoding into fixed-duration PCM frames.

use viva_core::config::VadConfig;
use viva_core::error::DecodeError;
use viva_core::types::AudioEncoding;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

const MULAW_TABLE: [i16; 256] = build_mulaw_table();

const fn build_mulaw_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        let u = !(i as u8);
        let exponent = ((u >> 4) & 0x07) as i32;
        let mantissa = (u & 0x0F) as i32;
        let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
        table[i] = if u & 0x80 != 0 {
            -magnitude as i16
        } else {
            magnitude as i16
        };
        i += 1;
    }
    table
}

/// Expand one G.711 μ-law byte to linear PCM.
#[inline]
pub fn mulaw_to_linear(byte: u8) -> i16 {
    MULAW_TABLE[byte as usize]
}

/// Compress one linear PCM sample to G.711 μ-law.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    pcm = pcm.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// A fixed-duration block of linear PCM samples. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Decodes inbound byte blocks into whole frames.
///
/// A trailing partial frame is carried over and prepended to the next block,
/// so the frames produced never depend on how the stream was chunked.
pub struct FrameDecoder {
    encoding: AudioEncoding,
    frame_size: usize,
    max_block_bytes: usize,
    pending: Vec<i16>,
}

impl FrameDecoder {
    pub fn new(encoding: AudioEncoding, frame_size: usize, max_block_bytes: usize) -> Self {
        Self {
            encoding,
            frame_size: frame_size.max(1),
            max_block_bytes,
            pending: Vec::with_capacity(frame_size),
        }
    }

    pub fn from_config(config: &VadConfig) -> Self {
        Self::new(config.encoding, config.frame_size(), config.max_block_bytes)
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples carried over from the previous block.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Decode a block, returning every whole frame now available.
    ///
    /// A rejected block leaves the carry-over untouched.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Vec<AudioFrame>, DecodeError> {
        if bytes.len() > self.max_block_bytes {
            return Err(DecodeError::TooLarge {
                len: bytes.len(),
                max: self.max_block_bytes,
            });
        }

        match self.encoding {
            AudioEncoding::Mulaw => {
                self.pending.extend(bytes.iter().map(|&b| mulaw_to_linear(b)));
            }
            AudioEncoding::Linear16 => {
                if bytes.len() % 2 != 0 {
                    return Err(DecodeError::OddLength(bytes.len()));
                }
                self.pending.extend(
                    bytes
                        .chunks_exact(2)
                        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]])),
                );
            }
        }

        let whole = self.pending.len() / self.frame_size;
        if whole == 0 {
            return Ok(Vec::new());
        }

        let frames = self.pending[..whole * self.frame_size]
            .chunks_exact(self.frame_size)
            .map(|chunk| AudioFrame::new(chunk.to_vec()))
            .collect();
        self.pending.drain(..whole * self.frame_size);

        Ok(frames)
    }

    /// Drop the carry-over, returning how many samples were discarded.
    pub fn flush(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }
}
