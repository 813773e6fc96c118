//! # Subband Intercom
//!
//! Real-time full-duplex audio over UDP with a lossy subband codec.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── SENDING SIDE ────────────────────────────────┐
//! │                                                                              │
//! │  Chunk (i16, frames × channels)                                              │
//! │     │                                                                        │
//! │     ▼                                                                        │
//! │  ┌──────────────┐   ┌───────────────────┐   ┌───────────┐   ┌─────────────┐  │
//! │  │  Mid/Side    │──▶│ Lapped DWT / WPT  │──▶│ Quantizer │──▶│ Byte planes │  │
//! │  │ (transform)  │   │   (transform)     │   │  (codec)  │   │  + DEFLATE  │  │
//! │  └──────────────┘   └───────────────────┘   └─────▲─────┘   └──────┬──────┘  │
//! │                                                   │ step           │         │
//! │                                       ┌───────────┴──────────┐     ▼         │
//! │                                       │ Rate controller      │  [seq|step|   │
//! │                                       │ (control, own thread)│   lens|planes]│
//! │                                       └───────────▲──────────┘     │         │
//! └───────────────────────────────────────────────────┼────────────────┼─────────┘
//!                                      sent/received/lost counters     │ UDP
//! ┌───────────────────────────────────────────────────┼────────────────▼─────────┐
//! │                              RECEIVING SIDE       │                          │
//! │  ┌─────────────┐   ┌────────────┐   ┌─────────────┴──┐   ┌────────────────┐  │
//! │  │  Inflate /  │──▶│ Dequantize │──▶│ Jitter buffer  │──▶│ Inverse DWT +  │  │
//! │  │ reassemble  │   │            │   │ (2 × buffered) │   │  Mid/Side      │  │
//! │  └─────────────┘   └────────────┘   └────────────────┘   └───────┬────────┘  │
//! │        receive thread                                            ▼           │
//! │                                                          audio callback      │
//! └──────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod protocol;
pub mod transform;

pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{Session, SessionStats};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: usize = 2;

    /// Default frames per chunk
    pub const DEFAULT_FRAMES_PER_CHUNK: usize = 1024;

    /// Default UDP port
    pub const DEFAULT_UDP_PORT: u16 = 4444;

    /// Largest datagram that avoids IP fragmentation on Ethernet
    pub const MAX_UNFRAGMENTED_PACKET: usize = 1472; // MTU - IP/UDP headers
}
