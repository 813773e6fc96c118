//! Chunk codec: quantization, byte-plane entropy coding and the two stream ends
//!
//! The sender runs [`ChunkEncoder`]; the receiver splits its work between a
//! [`ChunkReceiver`] on the network thread and a [`Player`] on the audio
//! thread, with the jitter buffer between them.

pub mod decoder;
pub mod encoder;
pub mod entropy;
pub mod quantizer;

pub use decoder::{ChunkDecoder, ChunkReceiver, DecoderStats, Player};
pub use encoder::{ChunkEncoder, EncoderStats};
pub use entropy::{BytePlaneCoder, EncodedPlanes};
pub use quantizer::{Quantizer, Rounding, StepTable, MINIMAL_STEP};

use crate::config::{Config, StepPolicy};
use crate::control::step_table_for_layout;
use crate::transform::SubbandLayout;

/// Per-subband base steps that the controller's global step multiplies.
///
/// Both ends derive it from the same configuration, so only the multiplier
/// travels on the wire.
pub fn base_step_table(config: &Config, layout: &SubbandLayout) -> StepTable {
    match config.quantization.policy {
        StepPolicy::Global => StepTable::global(MINIMAL_STEP),
        StepPolicy::Perceptual => step_table_for_layout(
            layout,
            config.audio.sample_rate,
            MINIMAL_STEP,
            config.quantization.perceptual_max_step,
        ),
    }
}
