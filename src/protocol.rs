//! Wire protocol: sequence numbers and packet framing
//!
//! Packet layout (all fields big-endian):
//!
//! ```text
//! ┌──────────┬──────────┬────────────┬─────┬──────────────┬─────────┬─────┬─────────────┐
//! │ seq: u16 │ step: u16│ len_0: u16 │ ... │ len_{k-2}:u16│ plane_0 │ ... │ plane_{k-1} │
//! └──────────┴──────────┴────────────┴─────┴──────────────┴─────────┴─────┴─────────────┘
//! ```
//!
//! The length of the last plane is whatever remains of the datagram.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::error::CodecError;

/// Size of the sequence number space
pub const CHUNK_NUMBERS: u32 = 1 << 16;

/// Bytes before the plane-length table
pub const FIXED_HEADER_SIZE: usize = 4;

/// Chunk sequence number, modulo [`CHUNK_NUMBERS`].
///
/// All comparisons go through [`SequenceNumber::distance_from`] so that
/// `65535 → 0` is an ordinary step forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SequenceNumber(pub u16);

impl SequenceNumber {
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// The following sequence number.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    pub fn wrapping_add(self, n: u16) -> Self {
        Self(self.0.wrapping_add(n))
    }

    pub fn wrapping_sub(self, n: u16) -> Self {
        Self(self.0.wrapping_sub(n))
    }

    /// Signed modular distance `self - origin`, in `[-32768, 32767]`.
    pub fn distance_from(self, origin: SequenceNumber) -> i32 {
        self.0.wrapping_sub(origin.0) as i16 as i32
    }

    /// True if `self` comes after `other` in modular order.
    pub fn is_after(self, other: SequenceNumber) -> bool {
        self.distance_from(other) > 0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An unpacked datagram: sequence number, quantization step and compressed planes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPacket {
    pub sequence: SequenceNumber,
    /// Global quantization step (or multiplier of the perceptual table)
    pub step: u16,
    /// Compressed byte planes, most significant first
    pub planes: Vec<Bytes>,
}

impl ChunkPacket {
    pub fn new(sequence: SequenceNumber, step: u16, planes: Vec<Bytes>) -> Self {
        Self {
            sequence,
            step,
            planes,
        }
    }

    /// Header size for a given plane count
    pub fn header_size(plane_count: usize) -> usize {
        FIXED_HEADER_SIZE + 2 * plane_count.saturating_sub(1)
    }

    /// Serialize to a datagram
    pub fn pack(&self) -> Result<Bytes, CodecError> {
        if self.planes.is_empty() {
            return Err(CodecError::InvalidPlaneCount(0));
        }

        let payload: usize = self.planes.iter().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(Self::header_size(self.planes.len()) + payload);

        buf.put_u16(self.sequence.0);
        buf.put_u16(self.step);

        for (index, plane) in self.planes[..self.planes.len() - 1].iter().enumerate() {
            let len = u16::try_from(plane.len()).map_err(|_| CodecError::PlaneTooLarge {
                plane: index,
                len: plane.len(),
            })?;
            buf.put_u16(len);
        }

        for plane in &self.planes {
            buf.put_slice(plane);
        }

        Ok(buf.freeze())
    }

    /// Parse a datagram carrying `plane_count` planes.
    ///
    /// The plane count is a session constant, so it is not on the wire.
    pub fn unpack(data: Bytes, plane_count: usize) -> Result<Self, CodecError> {
        if !matches!(plane_count, 1 | 2 | 4) {
            return Err(CodecError::InvalidPlaneCount(plane_count));
        }

        let header = Self::header_size(plane_count);
        if data.len() < header {
            return Err(CodecError::Truncated {
                len: data.len(),
                needed: header,
            });
        }

        let mut cursor = &data[..header];
        let sequence = SequenceNumber(cursor.get_u16());
        let step = cursor.get_u16();

        let lengths: Vec<usize> = (0..plane_count - 1)
            .map(|_| cursor.get_u16() as usize)
            .collect();

        let available = data.len() - header;
        let declared: usize = lengths.iter().sum();
        if declared > available {
            return Err(CodecError::PlaneLengthMismatch {
                declared,
                available,
            });
        }

        let mut planes = Vec::with_capacity(plane_count);
        let mut offset = header;
        for len in lengths {
            planes.push(data.slice(offset..offset + len));
            offset += len;
        }
        planes.push(data.slice(offset..));

        if planes.iter().any(Bytes::is_empty) {
            return Err(CodecError::PlaneLengthMismatch {
                declared,
                available,
            });
        }

        Ok(Self {
            sequence,
            step,
            planes,
        })
    }
}
