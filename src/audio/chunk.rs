//! Fixed-shape blocks of multi-channel values
//!
//! Every pipeline stage exchanges a `frames × channels` block stored
//! interleaved (frame-major). The element type changes along the way:
//! `i16` samples, `i32` transform coefficients, `i32` quantization indices.

/// A fixed-shape, interleaved `frames × channels` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block<T> {
    frames: usize,
    channels: usize,
    data: Vec<T>,
}

/// Captured or rendered audio
pub type Chunk = Block<i16>;

/// Transform-domain values before quantization (or after dequantization)
pub type CoefficientChunk = Block<i32>;

/// Quantization indices
pub type QuantizedChunk = Block<i32>;

impl<T: Copy + Default> Block<T> {
    /// Create a block filled with zeros.
    pub fn zeros(frames: usize, channels: usize) -> Self {
        Self {
            frames,
            channels,
            data: vec![T::default(); frames * channels],
        }
    }

    /// Wrap interleaved data. Returns `None` if the length does not match the shape.
    pub fn from_interleaved(frames: usize, channels: usize, data: Vec<T>) -> Option<Self> {
        if data.len() != frames * channels {
            return None;
        }
        Some(Self {
            frames,
            channels,
            data,
        })
    }

    /// Build a block from one vector per channel.
    pub fn from_channels(channels: &[Vec<T>]) -> Option<Self> {
        let frames = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != frames) {
            return None;
        }
        let mut block = Self::zeros(frames, channels.len());
        for (ch, values) in channels.iter().enumerate() {
            block.set_channel(ch, values);
        }
        Some(block)
    }

    /// Number of frames
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of channels
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Total number of values
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn same_shape<U>(&self, other: &Block<U>) -> bool {
        self.frames == other.frames && self.channels == other.channels
    }

    /// Value at `(frame, channel)`
    pub fn get(&self, frame: usize, channel: usize) -> T {
        self.data[frame * self.channels + channel]
    }

    pub fn set(&mut self, frame: usize, channel: usize, value: T) {
        self.data[frame * self.channels + channel] = value;
    }

    /// Iterate over one channel.
    pub fn iter_channel(&self, channel: usize) -> impl Iterator<Item = T> + '_ {
        assert!(
            channel < self.channels,
            "Channel index {} out of bounds (channels {})",
            channel,
            self.channels
        );
        self.data.iter().skip(channel).step_by(self.channels).copied()
    }

    /// Copy one channel out into a vector.
    pub fn channel(&self, channel: usize) -> Vec<T> {
        self.iter_channel(channel).collect()
    }

    /// Overwrite one channel. `values` must hold `frames` entries.
    pub fn set_channel(&mut self, channel: usize, values: &[T]) {
        debug_assert_eq!(values.len(), self.frames);
        for (frame, &value) in values.iter().enumerate() {
            self.data[frame * self.channels + channel] = value;
        }
    }

    /// Reset every value to zero, keeping the allocation.
    pub fn clear(&mut self) {
        self.data.fill(T::default());
    }

    /// Copy values from a block of the same shape.
    pub fn copy_from(&mut self, other: &Self) {
        self.data.copy_from_slice(&other.data);
    }

    /// Raw interleaved data
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_inner(self) -> Vec<T> {
        self.data
    }

    /// Apply `f` to every value, producing a block of the same shape.
    pub fn map<U, F>(&self, f: F) -> Block<U>
    where
        F: FnMut(T) -> U,
    {
        Block {
            frames: self.frames,
            channels: self.channels,
            data: self.data.iter().copied().map(f).collect(),
        }
    }
}

impl Chunk {
    /// Root-mean-square level over all channels.
    pub fn rms(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.data.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / self.data.len() as f64).sqrt()
    }
}

/// Saturate a wide value into the `i16` sample range.
pub fn saturate_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_access() {
        let block = Chunk::from_interleaved(3, 2, vec![1, 10, 2, 20, 3, 30]).unwrap();

        assert_eq!(block.channel(0), vec![1, 2, 3]);
        assert_eq!(block.channel(1), vec![10, 20, 30]);
        assert_eq!(block.get(2, 1), 30);
    }

    #[test]
    fn test_shape_validation() {
        assert!(Chunk::from_interleaved(4, 2, vec![0; 7]).is_none());
        assert!(Block::<i32>::from_channels(&[vec![1, 2], vec![3]]).is_none());
    }

    #[test]
    fn test_from_channels_interleaves() {
        let block = Block::<i32>::from_channels(&[vec![1, 2], vec![3, 4]]).unwrap();
        assert_eq!(block.data(), &[1, 3, 2, 4]);
        assert_eq!(block.frames(), 2);
        assert_eq!(block.channels(), 2);
    }

    #[test]
    fn test_saturate() {
        assert_eq!(saturate_i16(40_000), i16::MAX);
        assert_eq!(saturate_i16(-40_000), i16::MIN);
        assert_eq!(saturate_i16(-5), -5);
    }
}
