//! Intercom demo
//!
//! Runs a full-duplex session fed by a synthetic tone in place of a capture
//! device. Usage:
//!
//! ```text
//! intercom [CONFIG.toml] [--loopback]
//! ```
//!
//! Without a config path the per-user config file is used when present.
//! `--loopback` sends every packet back to this process instead of UDP.

use anyhow::{Context, Result};
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subband_intercom::{
    audio::Chunk,
    network::{ChannelTransport, Transport, UdpTransport},
    Config, Session,
};

/// Stereo test signal: a tone on the left, a fifth above on the right
struct ToneSource {
    frequency: f64,
    sample_rate: f64,
    phase: f64,
}

impl ToneSource {
    fn new(frequency: f64, sample_rate: u32) -> Self {
        Self {
            frequency,
            sample_rate: sample_rate as f64,
            phase: 0.0,
        }
    }

    fn fill(&mut self, chunk: &mut Chunk) {
        let increment = TAU * self.frequency / self.sample_rate;
        for frame in 0..chunk.frames() {
            let left = 0.3 * self.phase.sin();
            let right = 0.2 * (self.phase * 1.5).sin();
            chunk.set(frame, 0, (left * i16::MAX as f64) as i16);
            if chunk.channels() > 1 {
                chunk.set(frame, 1, (right * i16::MAX as f64) as i16);
            }
            self.phase = (self.phase + increment) % (2.0 * TAU);
        }
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    if let Some(path) = path {
        return Config::load(path).with_context(|| format!("Failed to load {}", path));
    }
    match Config::default_path() {
        Some(path) if path.exists() => {
            tracing::info!("Using config {}", path.display());
            Config::load(&path).with_context(|| format!("Failed to load {}", path.display()))
        }
        _ => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting subband intercom");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let loopback = args.iter().any(|a| a == "--loopback");
    let path = args.iter().find(|a| !a.starts_with("--")).map(String::as_str);

    let config = load_config(path)?;
    config.validate()?;

    let transport: Arc<dyn Transport> = if loopback {
        tracing::info!("Loopback transport");
        Arc::new(ChannelTransport::loopback(4 * config.cells_in_buffer()))
    } else {
        Arc::new(UdpTransport::new(&config.network)?)
    };

    let mut session = Session::start(&config, transport)?;

    let frames = config.audio.frames_per_chunk;
    let channels = config.audio.number_of_channels;
    let mut source = ToneSource::new(440.0, config.audio.sample_rate);
    let mut captured = Chunk::zeros(frames, channels);
    let mut playback = Chunk::zeros(frames, channels);

    let mut ticker = tokio::time::interval(config.chunk_duration());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stats_ticker = tokio::time::interval(Duration::from_secs(5));

    tracing::info!(
        "Chunk period {:.1} ms - press Ctrl+C to stop",
        config.chunk_duration().as_secs_f64() * 1000.0
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                source.fill(&mut captured);
                if let Err(e) = session.process(&captured, &mut playback) {
                    tracing::warn!("Chunk not sent: {}", e);
                }
            }
            _ = stats_ticker.tick() => {
                let stats = session.stats();
                tracing::info!(
                    "Stats: step {}, {} sent ({:.0} B avg), {} decoded, {} lost, {} corrupt, buffer {}/{}, {:.1}% concealed, playback RMS {:.0}",
                    stats.step,
                    stats.encoder.chunks_encoded,
                    stats.encoder.average_packet_size,
                    stats.decoder.packets_decoded,
                    stats.decoder.packets_lost,
                    stats.decoder.packets_corrupt,
                    stats.jitter.level,
                    stats.jitter.capacity,
                    stats.jitter.concealment_rate() * 100.0,
                    playback.rms()
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    session.stop();
    Ok(())
}
