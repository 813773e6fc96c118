//! Full-duplex session: the three threads of a running stream
//!
//! ```text
//!  audio callback ──process()──▶ ChunkEncoder ──▶ Transport ──▶ peer
//!        ▲                                            │
//!        └── Player ◀── JitterBuffer ◀── ChunkReceiver ◀┘  (receive thread)
//!
//!  rate-control thread: RateCounters ──law──▶ step (atomic) ──▶ ChunkEncoder
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::audio::buffer::{create_shared_jitter_buffer, JitterBufferStats, SharedJitterBuffer};
use crate::audio::chunk::Chunk;
use crate::codec::{ChunkDecoder, ChunkEncoder, ChunkReceiver, DecoderStats, EncoderStats, Player};
use crate::config::Config;
use crate::control::{RateController, RateControllerHandle, RateState, StepBounds};
use crate::error::{Error, Result};
use crate::network::Transport;

/// Snapshot of every counter in a session
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub step: u32,
    pub encoder: EncoderStats,
    pub decoder: DecoderStats,
    pub jitter: JitterBufferStats,
    pub send_failures: u64,
}

/// A running stream in both directions
pub struct Session {
    rate: Arc<RateState>,
    encoder: ChunkEncoder,
    player: Player,
    jitter: SharedJitterBuffer<i32>,
    transport: Arc<dyn Transport>,
    running: Arc<AtomicBool>,
    decoder_stats: Arc<Mutex<DecoderStats>>,
    receive_thread: Option<JoinHandle<()>>,
    controller: Option<RateControllerHandle>,
    send_failures: u64,
}

impl Session {
    /// Validate `config`, then spawn the receive and rate-control threads.
    pub fn start(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let quant = &config.quantization;
        let bounds = StepBounds::new(quant.minimal_step, quant.max_step);
        let rate = Arc::new(RateState::new(bounds.clamp(quant.initial_step as i64)));

        let jitter = create_shared_jitter_buffer(
            config.buffer.chunks_to_buffer,
            config.audio.frames_per_chunk,
            config.audio.number_of_channels,
        );
        let encoder = ChunkEncoder::new(config, rate.clone())?;
        let player = Player::new(config, jitter.clone());
        let receiver = ChunkReceiver::new(ChunkDecoder::new(config, rate.clone())?, jitter.clone());

        let running = Arc::new(AtomicBool::new(true));
        let decoder_stats = Arc::new(Mutex::new(DecoderStats::default()));
        let receive_thread = spawn_receiver(
            receiver,
            transport.clone(),
            running.clone(),
            decoder_stats.clone(),
            config.network.poll_interval(),
        )?;

        let controller = RateController::new(
            rate.clone(),
            config.rate_control.law.build(),
            bounds,
            config.rate_control.period(),
        )
        .spawn()?;

        info!(
            "Session started: {} frames x {} channels, {} levels ({}), overlap {}, buffering {} chunks",
            config.audio.frames_per_chunk,
            config.audio.number_of_channels,
            config.transform.levels,
            config.transform.wavelet.name(),
            config.overlap(),
            config.buffer.chunks_to_buffer
        );

        Ok(Self {
            rate,
            encoder,
            player,
            jitter,
            transport,
            running,
            decoder_stats,
            receive_thread: Some(receive_thread),
            controller: Some(controller),
            send_failures: 0,
        })
    }

    /// One audio-callback tick: send `captured`, fill `playback`.
    ///
    /// `playback` is filled on every call. Transport failures are logged
    /// and counted, never returned; an encode failure (a captured chunk of
    /// the wrong shape) is returned after playback has been filled.
    pub fn process(&mut self, captured: &Chunk, playback: &mut Chunk) -> Result<()> {
        let encoded = self.encoder.encode(captured);
        if let Ok(packet) = &encoded {
            if let Err(e) = self.transport.send(packet) {
                self.send_failures += 1;
                warn!("Failed to send chunk: {}", e);
            }
        }
        self.player.play_into(playback);
        encoded.map(|_| ())
    }

    /// Current quantization step
    pub fn step(&self) -> u32 {
        self.rate.step()
    }

    pub fn rate_state(&self) -> &Arc<RateState> {
        &self.rate
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            step: self.rate.step(),
            encoder: self.encoder.stats(),
            decoder: self.decoder_stats.lock().clone(),
            jitter: self.jitter.lock().stats(),
            send_failures: self.send_failures,
        }
    }

    /// Stop both worker threads. Idempotent.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(mut controller) = self.controller.take() {
            controller.stop();
        }
        if let Some(handle) = self.receive_thread.take() {
            if handle.join().is_err() {
                warn!("Receive thread panicked");
            }
        }
        info!("Session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_receiver(
    mut receiver: ChunkReceiver,
    transport: Arc<dyn Transport>,
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<DecoderStats>>,
    poll_interval: std::time::Duration,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("chunk-receive".to_string())
        .spawn(move || {
            debug!("Receive thread started");
            while running.load(Ordering::Acquire) {
                match transport.try_receive() {
                    Some(datagram) => {
                        receiver.receive(datagram);
                        *stats.lock() = receiver.stats();
                    }
                    None => thread::sleep(poll_interval),
                }
            }
            debug!("Receive thread exiting");
        })
        .map_err(Error::Io)
}
