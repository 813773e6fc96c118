//! Configuration types
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Call [`Config::validate`] before building a session.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::quantizer::Rounding;
use crate::constants::*;
use crate::control::RateLaw;
use crate::error::{Error, Result};
use crate::protocol::CHUNK_NUMBERS;
use crate::transform::{lapped_overlap, Decomposition, TemporalParams, TreeShape, Wavelet};

/// Largest step the 16-bit header field can carry
pub const MAX_WIRE_STEP: u32 = u16::MAX as u32;

/// Complete session configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub transform: TransformConfig,
    pub quantization: QuantizationConfig,
    pub rate_control: RateControlConfig,
    pub buffer: BufferConfig,
    pub entropy: EntropyConfig,
    pub network: NetworkConfig,
}

/// Chunk shape and sample rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub frames_per_chunk: usize,
    pub number_of_channels: usize,
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frames_per_chunk: DEFAULT_FRAMES_PER_CHUNK,
            number_of_channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Whether chunks borrow border samples from their neighbours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverlapMode {
    /// Lapped transform, two chunks of extra latency
    #[default]
    Lapped,
    /// Each chunk transformed on its own
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Mid/side decorrelation (requires two channels)
    pub stereo: bool,
    pub wavelet: Wavelet,
    pub levels: usize,
    /// Full wavelet-packet tree instead of the dyadic one
    pub packets: bool,
    pub overlap: OverlapMode,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            stereo: true,
            wavelet: Wavelet::default(),
            levels: 4,
            packets: false,
            overlap: OverlapMode::Lapped,
        }
    }
}

impl TransformConfig {
    pub fn shape(&self) -> TreeShape {
        if self.packets {
            TreeShape::Packet
        } else {
            TreeShape::Dyadic
        }
    }
}

/// Where the quantization steps come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepPolicy {
    /// One step for every subband
    #[default]
    Global,
    /// Threshold-of-hearing table scaled by the controller's step
    Perceptual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizationConfig {
    /// Floor the controller never goes below
    pub minimal_step: u32,
    /// Ceiling the controller never goes above
    pub max_step: u32,
    pub initial_step: u32,
    pub policy: StepPolicy,
    /// Coarsest entry of the perceptual base table
    pub perceptual_max_step: u32,
    pub rounding: Rounding,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            minimal_step: 1,
            max_step: 1024,
            initial_step: 1,
            policy: StepPolicy::Global,
            perceptual_max_step: 16,
            rounding: Rounding::Round,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateControlConfig {
    pub period_ms: u64,
    pub law: RateLaw,
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            law: RateLaw::LossAdditive,
        }
    }
}

impl RateControlConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Chunks of playback delay; the ring holds twice as many
    pub chunks_to_buffer: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { chunks_to_buffer: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    /// Byte planes per index: 1, 2 or 4
    pub planes: usize,
    /// DEFLATE level, 0-9
    pub compression_level: u32,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            planes: 4,
            compression_level: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind: SocketAddr,
    pub peer: SocketAddr,
    pub send_buffer_size: usize,
    pub recv_buffer_size: usize,
    /// Sleep between empty receive polls
    pub poll_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_UDP_PORT)),
            peer: SocketAddr::from(([127, 0, 0, 1], DEFAULT_UDP_PORT)),
            send_buffer_size: 1 << 20,
            recv_buffer_size: 1 << 20,
            poll_interval_ms: 1,
        }
    }
}

impl NetworkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// `intercom.toml` in the per-user configuration directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "subband", "intercom")
            .map(|dirs| dirs.config_dir().join("intercom.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        let transform = &self.transform;
        let quant = &self.quantization;

        if audio.number_of_channels == 0 {
            return invalid("number_of_channels must be at least 1");
        }
        if transform.stereo && audio.number_of_channels != 2 {
            return invalid("stereo transform requires exactly 2 channels");
        }
        if audio.sample_rate == 0 {
            return invalid("sample_rate must be positive");
        }
        if audio.frames_per_chunk == 0 {
            return invalid("frames_per_chunk must be positive");
        }
        if transform.levels >= usize::BITS as usize
            || audio.frames_per_chunk % (1usize << transform.levels) != 0
        {
            return Err(Error::Config(format!(
                "frames_per_chunk {} is not divisible by 2^{}",
                audio.frames_per_chunk, transform.levels
            )));
        }
        let shortest = audio.frames_per_chunk >> transform.levels;
        if shortest < transform.wavelet.filter_len() / 2 {
            return Err(Error::Config(format!(
                "subbands of {} coefficients are too short for {}",
                shortest,
                transform.wavelet.name()
            )));
        }
        if self.overlap() > audio.frames_per_chunk {
            return Err(Error::Config(format!(
                "overlap {} exceeds frames_per_chunk {}",
                self.overlap(),
                audio.frames_per_chunk
            )));
        }

        if !matches!(self.entropy.planes, 1 | 2 | 4) {
            return invalid("entropy.planes must be 1, 2 or 4");
        }
        if self.entropy.compression_level > 9 {
            return invalid("entropy.compression_level must be 0-9");
        }

        if quant.minimal_step == 0 {
            return invalid("minimal_step must be at least 1");
        }
        if quant.max_step < quant.minimal_step {
            return invalid("max_step must not be below minimal_step");
        }
        if quant.max_step > MAX_WIRE_STEP {
            return Err(Error::Config(format!(
                "max_step {} does not fit the 16-bit wire field",
                quant.max_step
            )));
        }
        if quant.perceptual_max_step == 0 {
            return invalid("perceptual_max_step must be at least 1");
        }

        if self.rate_control.period_ms == 0 {
            return invalid("rate_control.period_ms must be positive");
        }

        let cells = self.cells_in_buffer();
        if self.buffer.chunks_to_buffer == 0 || cells as u32 > CHUNK_NUMBERS / 2 {
            return Err(Error::Config(format!(
                "chunks_to_buffer {} out of range",
                self.buffer.chunks_to_buffer
            )));
        }

        Ok(())
    }

    /// Border samples borrowed from each neighbouring chunk
    pub fn overlap(&self) -> usize {
        match self.transform.overlap {
            OverlapMode::Lapped => lapped_overlap(self.transform.wavelet, self.transform.levels),
            OverlapMode::None => 0,
        }
    }

    pub fn cells_in_buffer(&self) -> usize {
        2 * self.buffer.chunks_to_buffer
    }

    /// Wall-clock length of one chunk
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(
            self.audio.frames_per_chunk as f64 / self.audio.sample_rate.max(1) as f64,
        )
    }

    /// Transform parameters shared by both ends of a stream
    pub fn temporal_params(&self) -> TemporalParams {
        TemporalParams {
            decomposition: Decomposition::new(
                self.transform.wavelet,
                self.transform.shape(),
                self.transform.levels,
            ),
            frames: self.audio.frames_per_chunk,
            channels: self.audio.number_of_channels,
            overlap: self.overlap(),
        }
    }
}

fn invalid(message: &str) -> Result<()> {
    Err(Error::Config(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        config.validate().unwrap();
        assert_eq!(config.cells_in_buffer(), 16);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = Config::from_toml_str(
            r#"
            [audio]
            frames_per_chunk = 512

            [transform]
            wavelet = "haar"
            packets = true
            overlap = "none"

            [quantization]
            policy = "perceptual"
            rounding = "truncate"

            [rate_control.law]
            kind = "conservative_exponential"
            loss_threshold = 3

            [network]
            peer = "10.0.0.2:5000"
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.frames_per_chunk, 512);
        assert_eq!(config.audio.number_of_channels, 2);
        assert_eq!(config.transform.shape(), TreeShape::Packet);
        assert_eq!(config.overlap(), 0);
        assert_eq!(config.quantization.policy, StepPolicy::Perceptual);
        assert_eq!(config.quantization.rounding, Rounding::Truncate);
        assert_eq!(
            config.rate_control.law,
            RateLaw::ConservativeExponential {
                loss_threshold: 3,
                decay: 1.1
            }
        );
        assert_eq!(config.network.peer, "10.0.0.2:5000".parse().unwrap());
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_unknown_enum_value_is_rejected() {
        assert!(Config::from_toml_str("[transform]\nwavelet = \"sym8\"").is_err());
    }

    #[test]
    fn test_validation_rules() {
        let reject = |edit: fn(&mut Config)| {
            let mut config = Config::default();
            edit(&mut config);
            assert!(matches!(config.validate(), Err(Error::Config(_))));
        };

        reject(|c| c.audio.number_of_channels = 0);
        reject(|c| c.audio.number_of_channels = 1);
        reject(|c| c.audio.frames_per_chunk = 1000);
        reject(|c| c.audio.frames_per_chunk = 64);
        reject(|c| c.entropy.planes = 3);
        reject(|c| c.quantization.minimal_step = 0);
        reject(|c| c.quantization.max_step = 0);
        reject(|c| c.quantization.max_step = 70_000);
        reject(|c| c.buffer.chunks_to_buffer = 0);
        reject(|c| c.buffer.chunks_to_buffer = 20_000);
    }

    #[test]
    fn test_mono_without_stereo_is_valid() {
        let mut config = Config::default();
        config.audio.number_of_channels = 1;
        config.transform.stereo = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_derived_values() {
        let config = Config::default();
        assert_eq!(config.overlap(), 128);
        let params = config.temporal_params();
        assert_eq!(params.frames, 1024);
        assert_eq!(params.overlap, 128);
        assert_eq!(params.layout().len(), 5);

        let duration = config.chunk_duration().as_secs_f64();
        assert!((duration - 1024.0 / 44100.0).abs() < 1e-9);
    }
}
