//! Audio chunks and the playback jitter buffer

pub mod buffer;
pub mod chunk;

pub use buffer::{create_shared_jitter_buffer, JitterBuffer, JitterBufferStats, SharedJitterBuffer};
pub use chunk::{saturate_i16, Block, Chunk, CoefficientChunk, QuantizedChunk};
