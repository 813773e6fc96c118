//! Receive side of a stream
//!
//! [`ChunkDecoder`] turns datagrams into dequantized coefficient chunks and
//! keeps the loss accounting. [`ChunkReceiver`] feeds it from the network
//! thread into the jitter buffer; [`Player`] drains the jitter buffer on the
//! audio thread and runs the synthesis.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::audio::buffer::SharedJitterBuffer;
use crate::audio::chunk::{Chunk, CoefficientChunk};
use crate::codec::base_step_table;
use crate::codec::entropy::BytePlaneCoder;
use crate::codec::quantizer::{Quantizer, StepTable};
use crate::config::Config;
use crate::control::RateState;
use crate::error::{CodecError, Result};
use crate::protocol::{ChunkPacket, SequenceNumber};
use crate::transform::SubbandTransform;

/// Datagram-to-coefficients decoder
pub struct ChunkDecoder {
    quantizer: Quantizer,
    coder: BytePlaneCoder,
    base: StepTable,
    rate: Arc<RateState>,
    /// Highest sequence number seen so far
    highest: Option<SequenceNumber>,
    /// Jitter-buffer cells; a jump this far or further reseeds `highest`
    window: i32,
    packets_decoded: u64,
    packets_lost: u64,
    packets_corrupt: u64,
    packets_reordered: u64,
}

impl ChunkDecoder {
    /// Build the decoder described by `config`, reporting into `rate`.
    pub fn new(config: &Config, rate: Arc<RateState>) -> Result<Self> {
        let params = config.temporal_params();
        Ok(Self {
            quantizer: Quantizer::new(params.band_ranges(), config.quantization.rounding),
            coder: BytePlaneCoder::new(
                config.audio.frames_per_chunk,
                config.audio.number_of_channels,
                config.entropy.planes,
                config.entropy.compression_level,
            )?,
            base: base_step_table(config, params.layout()),
            rate,
            highest: None,
            window: config.cells_in_buffer() as i32,
            packets_decoded: 0,
            packets_lost: 0,
            packets_corrupt: 0,
            packets_reordered: 0,
        })
    }

    /// Decode one datagram.
    ///
    /// Malformed packets are logged, counted and dropped; the sequence gap
    /// they leave is then accounted as loss like any other.
    pub fn decode(&mut self, datagram: Bytes) -> Option<(SequenceNumber, CoefficientChunk)> {
        match self.try_decode(datagram) {
            Ok((sequence, coeffs)) => {
                self.track_sequence(sequence);
                self.packets_decoded += 1;
                self.rate.counters.record_received();
                Some((sequence, coeffs))
            }
            Err(e) => {
                debug!("Dropping malformed packet: {}", e);
                self.packets_corrupt += 1;
                None
            }
        }
    }

    fn try_decode(&self, datagram: Bytes) -> std::result::Result<(SequenceNumber, CoefficientChunk), CodecError> {
        let packet = ChunkPacket::unpack(datagram, self.coder.plane_count())?;
        if packet.step == 0 {
            return Err(CodecError::StepOutOfRange(0));
        }
        let indices = self.coder.decode(&packet.planes)?;
        let table = self.base.scaled(packet.step as u32);
        trace!("Chunk {}: decoded at step {}", packet.sequence, packet.step);
        Ok((packet.sequence, self.quantizer.dequantize(&indices, &table)))
    }

    fn track_sequence(&mut self, sequence: SequenceNumber) {
        let Some(highest) = self.highest else {
            self.highest = Some(sequence);
            return;
        };

        let distance = sequence.distance_from(highest);
        if distance >= self.window || distance < -self.window {
            debug!(
                "Chunk {} is {} chunks from highest {}, restarting loss tracking",
                sequence, distance, highest
            );
            self.highest = Some(sequence);
            return;
        }

        if distance > 1 {
            let missing = (distance - 1) as u64;
            trace!("{} packets missing before chunk {}", missing, sequence);
            self.packets_lost += missing;
            self.rate.counters.record_lost(missing);
        } else if distance <= 0 {
            self.packets_reordered += 1;
        }
        if distance > 0 {
            self.highest = Some(sequence);
        }
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        let expected = self.packets_decoded + self.packets_lost;
        DecoderStats {
            packets_decoded: self.packets_decoded,
            packets_lost: self.packets_lost,
            packets_corrupt: self.packets_corrupt,
            packets_reordered: self.packets_reordered,
            loss_rate: if expected > 0 {
                self.packets_lost as f32 / expected as f32
            } else {
                0.0
            },
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub packets_decoded: u64,
    /// Sequence gaps; a late packet filling a gap does not reduce this
    pub packets_lost: u64,
    pub packets_corrupt: u64,
    /// Packets that arrived behind a later one
    pub packets_reordered: u64,
    pub loss_rate: f32,
}

/// Network-thread half of the receive path
pub struct ChunkReceiver {
    decoder: ChunkDecoder,
    jitter: SharedJitterBuffer<i32>,
}

impl ChunkReceiver {
    pub fn new(decoder: ChunkDecoder, jitter: SharedJitterBuffer<i32>) -> Self {
        Self { decoder, jitter }
    }

    /// Decode a datagram and store it for playback.
    ///
    /// Returns the sequence number when the packet was usable.
    pub fn receive(&mut self, datagram: Bytes) -> Option<SequenceNumber> {
        let (sequence, coeffs) = self.decoder.decode(datagram)?;
        self.jitter.lock().insert(sequence, coeffs);
        Some(sequence)
    }

    pub fn stats(&self) -> DecoderStats {
        self.decoder.stats()
    }
}

/// Audio-thread half of the receive path
pub struct Player {
    jitter: SharedJitterBuffer<i32>,
    transform: SubbandTransform,
}

impl Player {
    pub fn new(config: &Config, jitter: SharedJitterBuffer<i32>) -> Self {
        let params = config.temporal_params();
        Self {
            jitter,
            transform: SubbandTransform::new(params, config.transform.stereo),
        }
    }

    /// Take the next chunk from the jitter buffer and synthesize it into `out`.
    pub fn play_into(&mut self, out: &mut Chunk) {
        // Refill the block the synthesizer released last tick
        let mut coeffs = match self.transform.take_spare() {
            Some(block) => block,
            None => {
                let params = self.transform.params();
                CoefficientChunk::zeros(params.frames, params.channels)
            }
        };
        self.jitter.lock().play_into(&mut coeffs);
        let rendered = self.transform.synthesize(coeffs);
        if out.same_shape(&rendered) {
            out.copy_from(&rendered);
        } else {
            out.clear();
        }
    }

    /// Synthesize coefficients that bypass the jitter buffer.
    pub fn render(&mut self, coeffs: CoefficientChunk) -> Chunk {
        self.transform.synthesize(coeffs)
    }

    /// Chunks of delay the synthesis adds on top of the jitter buffer
    pub fn latency_chunks(&self) -> usize {
        self.transform.latency_chunks()
    }
}
