//! Mid/side inter-channel decorrelation

use crate::audio::chunk::{saturate_i16, Block, Chunk};

/// `mid = left + right`, `side = left - right`.
///
/// Computed in `i32` so nothing is lost. Chunks with other than two
/// channels pass through widened but otherwise unchanged.
pub fn analyze_stereo(chunk: &Chunk) -> Block<i32> {
    let mut out = Block::<i32>::zeros(chunk.frames(), chunk.channels());
    if chunk.channels() != 2 {
        out.data_mut()
            .iter_mut()
            .zip(chunk.data())
            .for_each(|(o, &s)| *o = s as i32);
        return out;
    }

    for (o, frame) in out.data_mut().chunks_exact_mut(2).zip(chunk.data().chunks_exact(2)) {
        let (left, right) = (frame[0] as i32, frame[1] as i32);
        o[0] = left + right;
        o[1] = left - right;
    }
    out
}

/// Inverse of [`analyze_stereo`]: `left = (mid + side) / 2`, `right = (mid - side) / 2`.
///
/// Division floors, so a pair whose sum is odd (only possible after lossy
/// quantization) loses one LSB. Results are saturated into `i16`.
pub fn synthesize_stereo(block: &Block<i32>) -> Chunk {
    let mut out = Chunk::zeros(block.frames(), block.channels());
    if block.channels() != 2 {
        out.data_mut()
            .iter_mut()
            .zip(block.data())
            .for_each(|(o, &v)| *o = saturate_i16(v));
        return out;
    }

    for (o, frame) in out.data_mut().chunks_exact_mut(2).zip(block.data().chunks_exact(2)) {
        let (mid, side) = (frame[0] as i64, frame[1] as i64);
        o[0] = saturate_i16(((mid + side) >> 1).clamp(i32::MIN as i64, i32::MAX as i64) as i32);
        o[1] = saturate_i16(((mid - side) >> 1).clamp(i32::MIN as i64, i32::MAX as i64) as i32);
    }
    out
}
