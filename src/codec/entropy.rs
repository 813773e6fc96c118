//! Byte-plane entropy coding
//!
//! Quantization indices are split into same-significance byte planes which
//! are DEFLATE-compressed independently. The high planes of audio-derived
//! integers are nearly constant and compress far better on their own than
//! interleaved with the noisy low bytes.

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::audio::chunk::QuantizedChunk;
use crate::error::CodecError;

/// Compressed planes of one chunk, most significant first.
#[derive(Debug, Clone)]
pub struct EncodedPlanes {
    pub planes: Vec<Bytes>,
    /// Indices clamped because they did not fit the plane width
    pub saturated: usize,
}

/// Byte-plane coder for a fixed chunk shape and plane count.
#[derive(Debug, Clone)]
pub struct BytePlaneCoder {
    frames: usize,
    channels: usize,
    planes: usize,
    level: Compression,
}

impl BytePlaneCoder {
    /// `planes` must be 1, 2 or 4; `level` is the DEFLATE level (0-9).
    pub fn new(frames: usize, channels: usize, planes: usize, level: u32) -> Result<Self, CodecError> {
        if !matches!(planes, 1 | 2 | 4) {
            return Err(CodecError::InvalidPlaneCount(planes));
        }
        Ok(Self {
            frames,
            channels,
            planes,
            level: Compression::new(level.min(9)),
        })
    }

    pub fn plane_count(&self) -> usize {
        self.planes
    }

    /// Representable index range for the configured plane width
    pub fn range(&self) -> (i32, i32) {
        let bits = 8 * self.planes as u32;
        if bits == 32 {
            (i32::MIN, i32::MAX)
        } else {
            (-(1i32 << (bits - 1)), (1i32 << (bits - 1)) - 1)
        }
    }

    /// Bytes in one uncompressed plane
    fn plane_len(&self) -> usize {
        self.frames * self.channels
    }

    /// Split into planes and compress each one.
    pub fn encode(&self, indices: &QuantizedChunk) -> Result<EncodedPlanes, CodecError> {
        if indices.frames() != self.frames || indices.channels() != self.channels {
            return Err(CodecError::ShapeMismatch {
                expected: self.plane_len(),
                actual: indices.len(),
            });
        }

        let (min, max) = self.range();
        let mut saturated = 0;
        let mut raw = vec![Vec::with_capacity(self.plane_len()); self.planes];

        for ch in 0..self.channels {
            for value in indices.iter_channel(ch) {
                let clamped = value.clamp(min, max);
                if clamped != value {
                    saturated += 1;
                }
                let bits = clamped as u32;
                for (p, plane) in raw.iter_mut().enumerate() {
                    let shift = 8 * (self.planes - 1 - p);
                    plane.push((bits >> shift) as u8);
                }
            }
        }

        let planes = raw
            .iter()
            .map(|plane| self.deflate(plane))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EncodedPlanes { planes, saturated })
    }

    /// Inflate the planes and reassemble the indices.
    pub fn decode(&self, planes: &[Bytes]) -> Result<QuantizedChunk, CodecError> {
        if planes.len() != self.planes {
            return Err(CodecError::InvalidPlaneCount(planes.len()));
        }

        let expected = self.plane_len();
        let raw = planes
            .iter()
            .map(|plane| self.inflate(plane, expected))
            .collect::<Result<Vec<_>, _>>()?;

        let shift = 32 - 8 * self.planes as u32;
        let mut out = QuantizedChunk::zeros(self.frames, self.channels);
        for i in 0..expected {
            let mut bits = 0u32;
            for plane in &raw {
                bits = (bits << 8) | plane[i] as u32;
            }
            // Sign-extend from the plane width
            let value = ((bits << shift) as i32) >> shift;
            let (ch, frame) = (i / self.frames, i % self.frames);
            out.set(frame, ch, value);
        }

        Ok(out)
    }

    fn deflate(&self, plane: &[u8]) -> Result<Bytes, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(plane.len() / 2), self.level);
        encoder
            .write_all(plane)
            .map_err(|e| CodecError::DeflateFailed(e.to_string()))?;
        encoder
            .finish()
            .map(Bytes::from)
            .map_err(|e| CodecError::DeflateFailed(e.to_string()))
    }

    fn inflate(&self, plane: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(expected);
        // Read one byte past the expected size to detect oversized planes
        ZlibDecoder::new(plane)
            .take(expected as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::InflateFailed(e.to_string()))?;

        if out.len() != expected {
            return Err(CodecError::ShapeMismatch {
                expected,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn indices(frames: usize, channels: usize, f: impl Fn(usize) -> i32) -> QuantizedChunk {
        let data = (0..frames * channels).map(f).collect();
        QuantizedChunk::from_interleaved(frames, channels, data).unwrap()
    }

    #[test]
    fn test_rejects_bad_plane_count() {
        assert!(BytePlaneCoder::new(16, 2, 3, 6).is_err());
    }

    #[test]
    fn test_round_trip_four_planes() {
        let coder = BytePlaneCoder::new(64, 2, 4, 6).unwrap();
        let q = indices(64, 2, |i| (i as i32 - 64) * 40_000);
        let encoded = coder.encode(&q).unwrap();
        assert_eq!(encoded.planes.len(), 4);
        assert_eq!(encoded.saturated, 0);
        assert_eq!(coder.decode(&encoded.planes).unwrap(), q);
    }

    #[test]
    fn test_narrow_planes_saturate_instead_of_wrapping() {
        let coder = BytePlaneCoder::new(4, 1, 1, 6).unwrap();
        let q = QuantizedChunk::from_interleaved(4, 1, vec![-300, -5, 5, 300]).unwrap();
        let encoded = coder.encode(&q).unwrap();
        assert_eq!(encoded.saturated, 2);

        let decoded = coder.decode(&encoded.planes).unwrap();
        assert_eq!(decoded.data(), &[-128, -5, 5, 127]);
    }

    #[test]
    fn test_high_planes_compress_well() {
        let coder = BytePlaneCoder::new(1024, 2, 2, 6).unwrap();
        let q = indices(1024, 2, |i| ((i * 7919) % 200) as i32 - 100);
        let encoded = coder.encode(&q).unwrap();
        // The high plane is only 0x00/0xFF
        assert!(encoded.planes[0].len() < encoded.planes[1].len());
    }

    #[test]
    fn test_corrupt_plane_is_rejected() {
        let coder = BytePlaneCoder::new(32, 2, 2, 6).unwrap();
        let encoded = coder.encode(&indices(32, 2, |i| i as i32)).unwrap();

        let mut garbage = encoded.planes.clone();
        garbage[1] = Bytes::from_static(b"not a zlib stream");
        assert!(matches!(coder.decode(&garbage), Err(CodecError::InflateFailed(_))));
    }

    #[test]
    fn test_wrong_size_plane_is_rejected() {
        let small = BytePlaneCoder::new(16, 2, 1, 6).unwrap();
        let large = BytePlaneCoder::new(32, 2, 1, 6).unwrap();
        let encoded = large.encode(&indices(32, 2, |i| i as i32)).unwrap();
        assert!(matches!(small.decode(&encoded.planes), Err(CodecError::ShapeMismatch { .. })));
    }

    proptest! {
        #[test]
        fn prop_lossless_within_range(
            values in prop::collection::vec(-32768i32..32768, 32),
        ) {
            let coder = BytePlaneCoder::new(16, 2, 2, 6).unwrap();
            let q = QuantizedChunk::from_interleaved(16, 2, values).unwrap();
            let encoded = coder.encode(&q).unwrap();
            prop_assert_eq!(coder.decode(&encoded.planes).unwrap(), q);
        }
    }
}
