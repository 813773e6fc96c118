//! Random-access jitter buffer
//!
//! A fixed ring of `2 × chunks_to_buffer` chunk slots indexed by sequence
//! number. Arrival order and time are decoupled from playback: chunks are
//! written straight into their slot and played strictly in sequence order.
//! A played slot is zeroed immediately, so a chunk that never arrived and
//! one that was already played both read back as silence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::audio::chunk::Block;
use crate::protocol::SequenceNumber;

/// Jitter buffer over fixed-shape blocks
pub struct JitterBuffer<T> {
    /// Buffer slots indexed by extended sequence number modulo capacity
    slots: Vec<Block<T>>,
    /// Whether each slot holds an unplayed chunk (statistics only)
    filled: Vec<bool>,
    /// Chunks of delay seeded at start-up
    chunks_to_buffer: usize,
    /// Next chunk to play; `None` until the first arrival
    played: Option<SequenceNumber>,
    /// Wraparound-free counter for `played`, used for slot indexing
    played_extended: i64,
    /// Newest sequence number seen
    newest: Option<SequenceNumber>,
    inserted: AtomicUsize,
    played_count: AtomicUsize,
    concealed: AtomicUsize,
    late: AtomicUsize,
    resyncs: AtomicUsize,
}

impl<T: Copy + Default> JitterBuffer<T> {
    /// Create a buffer of `2 × chunks_to_buffer` slots of `frames × channels`.
    pub fn new(chunks_to_buffer: usize, frames: usize, channels: usize) -> Self {
        assert!(chunks_to_buffer > 0, "chunks_to_buffer must be positive");
        let cells = 2 * chunks_to_buffer;

        Self {
            slots: (0..cells).map(|_| Block::zeros(frames, channels)).collect(),
            filled: vec![false; cells],
            chunks_to_buffer,
            played: None,
            played_extended: 0,
            newest: None,
            inserted: AtomicUsize::new(0),
            played_count: AtomicUsize::new(0),
            concealed: AtomicUsize::new(0),
            late: AtomicUsize::new(0),
            resyncs: AtomicUsize::new(0),
        }
    }

    /// Number of slots in the ring
    pub fn cells(&self) -> usize {
        self.slots.len()
    }

    pub fn chunks_to_buffer(&self) -> usize {
        self.chunks_to_buffer
    }

    /// Sequence number that the next [`JitterBuffer::next_to_play`] returns
    pub fn played_chunk_number(&self) -> Option<SequenceNumber> {
        self.played
    }

    /// Newest sequence number inserted so far
    pub fn newest(&self) -> Option<SequenceNumber> {
        self.newest
    }

    pub fn is_synchronized(&self) -> bool {
        self.played.is_some()
    }

    fn slot_index(&self, extended: i64) -> usize {
        extended.rem_euclid(self.cells() as i64) as usize
    }

    /// Seed playback `chunks_to_buffer` chunks behind `sequence` and clear the ring.
    fn synchronize(&mut self, sequence: SequenceNumber) {
        self.played = Some(sequence.wrapping_sub(self.chunks_to_buffer as u16));
        self.played_extended = 0;
        self.newest = None;
        for slot in &mut self.slots {
            slot.clear();
        }
        self.filled.fill(false);
    }

    /// Store a chunk in the slot for its sequence number.
    ///
    /// Late arrivals within one ring of the playback point overwrite
    /// whatever their slot holds. A chunk further away than that means the
    /// stream jumped, and playback is reseeded from it.
    pub fn insert(&mut self, sequence: SequenceNumber, chunk: Block<T>) {
        let played = match self.played {
            Some(played) => played,
            None => {
                debug!("JitterBuffer: first chunk {}, buffering {} chunks", sequence, self.chunks_to_buffer);
                self.synchronize(sequence);
                self.played.unwrap_or(sequence)
            }
        };

        let cells = self.cells() as i32;
        let mut distance = sequence.distance_from(played);
        if distance >= cells || distance < -cells {
            debug!(
                "JitterBuffer: chunk {} is {} chunks from playback point {}, resynchronizing",
                sequence, distance, played
            );
            self.resyncs.fetch_add(1, Ordering::Relaxed);
            self.synchronize(sequence);
            distance = self.chunks_to_buffer as i32;
        } else if distance < 0 {
            trace!("JitterBuffer: late chunk {} ({} behind)", sequence, -distance);
            self.late.fetch_add(1, Ordering::Relaxed);
        }

        let index = self.slot_index(self.played_extended + distance as i64);
        if !self.slots[index].same_shape(&chunk) {
            warn!(
                "JitterBuffer: chunk {} has {}x{} samples, expected {}x{}; dropped",
                sequence,
                chunk.frames(),
                chunk.channels(),
                self.slots[index].frames(),
                self.slots[index].channels()
            );
            return;
        }
        self.slots[index] = chunk;
        self.filled[index] = true;

        if self.newest.map_or(true, |newest| sequence.is_after(newest)) {
            self.newest = Some(sequence);
        }
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the next chunk in sequence order into `out`, zero its slot and advance.
    ///
    /// Before the first arrival this writes silence and does not advance.
    pub fn play_into(&mut self, out: &mut Block<T>) {
        let Some(played) = self.played else {
            out.clear();
            return;
        };

        let index = self.slot_index(self.played_extended);
        if out.same_shape(&self.slots[index]) {
            out.copy_from(&self.slots[index]);
        } else {
            out.clear();
        }
        if !self.filled[index] {
            self.concealed.fetch_add(1, Ordering::Relaxed);
        }

        self.slots[index].clear();
        self.filled[index] = false;
        self.played = Some(played.next());
        self.played_extended += 1;
        self.played_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Take the next chunk in sequence order, leaving a zero chunk in its slot.
    pub fn next_to_play(&mut self) -> Block<T> {
        let (frames, channels) = (self.slots[0].frames(), self.slots[0].channels());
        let mut out = Block::zeros(frames, channels);
        self.play_into(&mut out);
        out
    }

    /// Number of slots holding unplayed chunks
    pub fn level(&self) -> usize {
        self.filled.iter().filter(|&&f| f).count()
    }

    /// Get statistics
    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            level: self.level(),
            capacity: self.cells(),
            inserted: self.inserted.load(Ordering::Relaxed),
            played: self.played_count.load(Ordering::Relaxed),
            concealed: self.concealed.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
        }
    }
}

/// Jitter buffer shared between the receive thread and the audio callback.
///
/// Both sides hold the lock only for a slot write or a slot copy.
pub type SharedJitterBuffer<T> = Arc<Mutex<JitterBuffer<T>>>;

/// Create a new shared jitter buffer
pub fn create_shared_jitter_buffer<T: Copy + Default>(
    chunks_to_buffer: usize,
    frames: usize,
    channels: usize,
) -> SharedJitterBuffer<T> {
    Arc::new(Mutex::new(JitterBuffer::new(chunks_to_buffer, frames, channels)))
}

/// Jitter buffer statistics
#[derive(Debug, Clone, Default)]
pub struct JitterBufferStats {
    pub level: usize,
    pub capacity: usize,
    pub inserted: usize,
    pub played: usize,
    /// Playback ticks that found an empty slot
    pub concealed: usize,
    pub late: usize,
    pub resyncs: usize,
}

impl JitterBufferStats {
    pub fn concealment_rate(&self) -> f32 {
        if self.played == 0 {
            0.0
        } else {
            self.concealed as f32 / self.played as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tagged(value: i32) -> Block<i32> {
        Block::from_interleaved(2, 1, vec![value, value]).unwrap()
    }

    fn seq(n: u16) -> SequenceNumber {
        SequenceNumber(n)
    }

    #[test]
    fn test_silence_before_first_chunk() {
        let mut jitter = JitterBuffer::<i32>::new(2, 2, 1);
        assert_eq!(jitter.next_to_play().data(), &[0, 0]);
        assert!(!jitter.is_synchronized());
    }

    #[test]
    fn test_startup_delay_and_reordering() {
        let mut jitter = JitterBuffer::new(3, 2, 1);

        // Insert out of order
        jitter.insert(seq(10), tagged(10));
        jitter.insert(seq(12), tagged(12));
        jitter.insert(seq(11), tagged(11));
        assert_eq!(jitter.played_chunk_number(), Some(seq(7)));

        // Three chunks of seeded delay, then in order
        let played: Vec<i32> = (0..6).map(|_| jitter.next_to_play().data()[0]).collect();
        assert_eq!(played, vec![0, 0, 0, 10, 11, 12]);
    }

    #[test]
    fn test_slot_cleared_after_play() {
        let mut jitter = JitterBuffer::new(1, 2, 1);
        jitter.insert(seq(5), tagged(5));
        jitter.next_to_play();
        assert_eq!(jitter.next_to_play().data()[0], 5);
        assert_eq!(jitter.level(), 0);

        // A full ring later the same slot reads back as silence
        jitter.next_to_play();
        assert_eq!(jitter.next_to_play().data()[0], 0);
        assert_eq!(jitter.stats().concealed, 3);
    }

    #[test]
    fn test_wraparound_is_continuous() {
        let mut jitter = JitterBuffer::new(4, 2, 1);
        let last = u16::MAX;
        for (i, s) in [last - 1, last, 0, 1].into_iter().enumerate() {
            jitter.insert(seq(s), tagged(i as i32 + 1));
        }

        let played: Vec<i32> = (0..8).map(|_| jitter.next_to_play().data()[0]).collect();
        assert_eq!(played, vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(jitter.stats().resyncs, 0);
    }

    #[test]
    fn test_large_gap_resynchronizes() {
        let mut jitter = JitterBuffer::new(2, 2, 1);
        jitter.insert(seq(100), tagged(1));
        jitter.insert(seq(5000), tagged(2));

        assert_eq!(jitter.stats().resyncs, 1);
        assert_eq!(jitter.played_chunk_number(), Some(seq(4998)));
        let played: Vec<i32> = (0..3).map(|_| jitter.next_to_play().data()[0]).collect();
        assert_eq!(played, vec![0, 0, 2]);
    }

    #[test]
    fn test_wrong_shape_chunk_is_dropped() {
        let mut jitter = JitterBuffer::new(2, 2, 1);
        jitter.insert(seq(3), tagged(3));
        jitter.insert(seq(4), Block::from_interleaved(1, 1, vec![4]).unwrap());
        assert_eq!(jitter.level(), 1);
        assert_eq!(jitter.stats().inserted, 1);

        let played: Vec<i32> = (0..4).map(|_| jitter.next_to_play().data()[0]).collect();
        assert_eq!(played, vec![0, 0, 3, 0]);
        // Two seeded slots and the dropped chunk's slot
        assert_eq!(jitter.stats().concealed, 3);
    }

    #[test]
    fn test_late_arrival_overwrites_slot() {
        let mut jitter = JitterBuffer::new(2, 2, 1);
        jitter.insert(seq(10), tagged(10));
        for _ in 0..4 {
            jitter.next_to_play();
        }
        // 10 arrives again after it was played
        jitter.insert(seq(10), tagged(99));
        assert_eq!(jitter.stats().late, 1);
        // Slot of 10 is also the slot of 14
        let played: Vec<i32> = (0..3).map(|_| jitter.next_to_play().data()[0]).collect();
        assert_eq!(played, vec![0, 0, 99]);
    }

    proptest! {
        #[test]
        fn prop_plays_in_sequence_order(
            start in any::<u16>(),
            delays in prop::collection::vec(0usize..4, 40),
        ) {
            let chunks_to_buffer = 4;
            let count = delays.len();
            let mut buffer = JitterBuffer::new(chunks_to_buffer, 2, 1);

            // Chunk 0 arrives first; every other chunk is displaced by less
            // than `chunks_to_buffer` arrivals
            let mut arrivals: Vec<usize> = (0..count).collect();
            arrivals.sort_by_key(|&i| (if i == 0 { 0 } else { i + delays[i] }, i));

            let mut played = Vec::with_capacity(count + chunks_to_buffer);
            for &i in &arrivals {
                buffer.insert(seq(start.wrapping_add(i as u16)), tagged(i as i32 + 1));
                played.push(buffer.next_to_play().data()[0]);
            }
            for _ in 0..chunks_to_buffer {
                played.push(buffer.next_to_play().data()[0]);
            }

            let expected: Vec<i32> = std::iter::repeat(0)
                .take(chunks_to_buffer)
                .chain(1..=count as i32)
                .collect();
            prop_assert_eq!(played, expected);
            prop_assert_eq!(buffer.stats().concealed, chunks_to_buffer);
            prop_assert_eq!(buffer.level(), 0);
        }
    }
}
