//! Send side of a stream
//!
//! Captured chunk → subband coefficients → indices → byte planes → packet.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::audio::chunk::Chunk;
use crate::codec::entropy::BytePlaneCoder;
use crate::codec::quantizer::{Quantizer, StepTable};
use crate::codec::base_step_table;
use crate::config::Config;
use crate::constants::MAX_UNFRAGMENTED_PACKET;
use crate::control::RateState;
use crate::error::{CodecError, Result};
use crate::protocol::{ChunkPacket, SequenceNumber};
use crate::transform::SubbandTransform;

/// Chunk-to-packet encoder for one outgoing stream
pub struct ChunkEncoder {
    transform: SubbandTransform,
    quantizer: Quantizer,
    coder: BytePlaneCoder,
    /// Steps the controller's global step multiplies
    base: StepTable,
    rate: Arc<RateState>,
    sequence: SequenceNumber,
    chunks_encoded: u64,
    bytes_produced: u64,
    saturated: u64,
}

impl ChunkEncoder {
    /// Build the encoder described by `config`, reading its step from `rate`.
    pub fn new(config: &Config, rate: Arc<RateState>) -> Result<Self> {
        let params = config.temporal_params();
        let base = base_step_table(config, params.layout());
        let quantizer = Quantizer::new(params.band_ranges(), config.quantization.rounding);
        let coder = BytePlaneCoder::new(
            config.audio.frames_per_chunk,
            config.audio.number_of_channels,
            config.entropy.planes,
            config.entropy.compression_level,
        )?;
        let transform = SubbandTransform::new(params, config.transform.stereo);

        Ok(Self {
            transform,
            quantizer,
            coder,
            base,
            rate,
            sequence: SequenceNumber::default(),
            chunks_encoded: 0,
            bytes_produced: 0,
            saturated: 0,
        })
    }

    /// Sequence number the next packet will carry
    pub fn next_sequence(&self) -> SequenceNumber {
        self.sequence
    }

    pub fn base_steps(&self) -> &StepTable {
        &self.base
    }

    /// Encode one captured chunk into a datagram.
    ///
    /// Records the packet size and the chunk's RMS level in the rate counters.
    pub fn encode(&mut self, chunk: &Chunk) -> Result<Bytes> {
        let params = self.transform.params();
        if chunk.frames() != params.frames || chunk.channels() != params.channels {
            return Err(CodecError::ShapeMismatch {
                expected: params.frames * params.channels,
                actual: chunk.len(),
            }
            .into());
        }

        let step = self.rate.step();
        let wire_step = u16::try_from(step).map_err(|_| CodecError::StepOutOfRange(step))?;

        self.rate.counters.record_level(chunk.rms());

        let coeffs = self.transform.analyze(chunk);
        let table = self.base.scaled(step);
        let indices = self.quantizer.quantize(&coeffs, &table);
        let encoded = self.coder.encode(&indices)?;

        if encoded.saturated > 0 {
            warn!(
                "Chunk {}: {} indices saturated to {} byte planes (step {})",
                self.sequence,
                encoded.saturated,
                self.coder.plane_count(),
                step
            );
            self.saturated += encoded.saturated as u64;
        }

        let packet = ChunkPacket::new(self.sequence, wire_step, encoded.planes).pack()?;
        if packet.len() > MAX_UNFRAGMENTED_PACKET {
            trace!("Chunk {}: {} bytes will be fragmented", self.sequence, packet.len());
        } else {
            trace!("Chunk {}: {} bytes at step {}", self.sequence, packet.len(), step);
        }

        self.sequence = self.sequence.next();
        self.chunks_encoded += 1;
        self.bytes_produced += packet.len() as u64;
        self.rate.counters.record_sent(packet.len());

        Ok(packet)
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            chunks_encoded: self.chunks_encoded,
            bytes_produced: self.bytes_produced,
            saturated: self.saturated,
            average_packet_size: if self.chunks_encoded > 0 {
                self.bytes_produced as f32 / self.chunks_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    pub chunks_encoded: u64,
    pub bytes_produced: u64,
    pub saturated: u64,
    pub average_packet_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.audio.frames_per_chunk = 256;
        config
    }

    fn tone(frames: usize, index: usize) -> Chunk {
        let mut chunk = Chunk::zeros(frames, 2);
        for f in 0..frames {
            let t = (index * frames + f) as f64;
            chunk.set(f, 0, (8000.0 * (t * 0.07).sin()) as i16);
            chunk.set(f, 1, (5000.0 * (t * 0.03).sin()) as i16);
        }
        chunk
    }

    #[test]
    fn test_sequence_and_counters_advance() {
        let config = small_config();
        let rate = Arc::new(RateState::new(1));
        let mut encoder = ChunkEncoder::new(&config, rate.clone()).unwrap();

        let first = encoder.encode(&tone(256, 0)).unwrap();
        let second = encoder.encode(&tone(256, 1)).unwrap();
        assert_eq!(&first[..2], &[0, 0]);
        assert_eq!(&second[..2], &[0, 1]);
        assert_eq!(encoder.next_sequence(), SequenceNumber(2));

        let counters = rate.counters.peek();
        assert_eq!(counters.sent_chunks, 2);
        assert_eq!(counters.sent_bytes, (first.len() + second.len()) as u64);
        assert_eq!(counters.rms_count, 2);
        assert_eq!(encoder.stats().chunks_encoded, 2);
    }

    #[test]
    fn test_step_is_carried_in_the_header() {
        let config = small_config();
        let rate = Arc::new(RateState::new(300));
        let mut encoder = ChunkEncoder::new(&config, rate).unwrap();
        let packet = encoder.encode(&tone(256, 0)).unwrap();
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 300);
    }

    #[test]
    fn test_coarser_step_shrinks_packets() {
        let config = small_config();
        let fine_rate = Arc::new(RateState::new(1));
        let coarse_rate = Arc::new(RateState::new(512));
        let mut fine = ChunkEncoder::new(&config, fine_rate).unwrap();
        let mut coarse = ChunkEncoder::new(&config, coarse_rate).unwrap();

        let (mut fine_bytes, mut coarse_bytes) = (0, 0);
        for i in 0..4 {
            fine_bytes += fine.encode(&tone(256, i)).unwrap().len();
            coarse_bytes += coarse.encode(&tone(256, i)).unwrap().len();
        }
        assert!(coarse_bytes < fine_bytes);
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let config = small_config();
        let mut encoder = ChunkEncoder::new(&config, Arc::new(RateState::new(1))).unwrap();
        let result = encoder.encode(&Chunk::zeros(128, 2));
        assert!(matches!(result, Err(Error::Codec(CodecError::ShapeMismatch { .. }))));
        assert_eq!(encoder.next_sequence(), SequenceNumber(0));
    }

    #[test]
    fn test_step_beyond_wire_range_is_rejected() {
        let config = small_config();
        let rate = Arc::new(RateState::new(70_000));
        let mut encoder = ChunkEncoder::new(&config, rate).unwrap();
        let result = encoder.encode(&tone(256, 0));
        assert!(matches!(result, Err(Error::Codec(CodecError::StepOutOfRange(70_000)))));
    }
}
