//! Core data types for sensorgraph
//!
//! This module contains the binary-shape descriptor used by every signal and
//! the decoded values handed to stream and log subscribers.
//!
//! # Main Types
//!
//! - [`DataAttributes`] - Byte layout of a signal (channel sizes, copies, offset, signedness)
//! - [`Value`] - A decoded value (integer, float, vector, bytes, fused parts)
//! - [`Sample`] - A decoded value with its wall-clock timestamp
//!
//! # Attribute Derivation
//!
//! Attributes are never edited in place once attached to a signal. Processing
//! stages derive new attributes through the `derive_*` constructors, which
//! always reset the offset: a processor's output starts at byte 0 of its own
//! notification.

use chrono::{DateTime, Utc};

/// Binary shape of a signal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataAttributes {
    /// Byte width of each sub-channel
    pub sizes: Vec<u8>,
    /// Number of samples packed together
    pub copies: u8,
    /// Byte offset into the raw payload
    pub offset: u8,
    /// Whether the channels are two's complement
    pub signed: bool,
}

impl DataAttributes {
    pub fn new(sizes: impl Into<Vec<u8>>, copies: u8, offset: u8, signed: bool) -> Self {
        Self {
            sizes: sizes.into(),
            copies,
            offset,
            signed,
        }
    }

    /// Single channel of `size` bytes
    pub fn scalar(size: u8, signed: bool) -> Self {
        Self::new(vec![size], 1, 0, signed)
    }

    /// Zero-length signal (events without data)
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0, 0, false)
    }

    /// Bytes for one copy
    #[inline]
    pub fn length(&self) -> u8 {
        self.sizes.iter().sum()
    }

    /// Bytes for all packed copies
    #[inline]
    pub fn unit_length(&self) -> u8 {
        self.length().saturating_mul(self.copies)
    }

    /// Number of sub-channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    pub fn derive_same_shape(&self) -> Self {
        Self::new(self.sizes.clone(), self.copies, 0, self.signed)
    }

    /// Every channel resized to `size`
    pub fn derive_with_size(&self, size: u8) -> Self {
        Self::new(vec![size; self.sizes.len()], self.copies, 0, self.signed)
    }

    pub fn derive_signed(&self, signed: bool) -> Self {
        Self::new(self.sizes.clone(), self.copies, 0, signed)
    }

    pub fn derive_copies(&self, copies: u8) -> Self {
        Self::new(self.sizes.clone(), copies, 0, self.signed)
    }

    /// Attributes of channel `index` alone, keeping its offset in the parent
    pub fn channel(&self, index: usize) -> Option<Self> {
        let size = *self.sizes.get(index)?;
        let offset: u8 = self.offset + self.sizes[..index].iter().sum::<u8>();
        Some(Self::new(vec![size], 1, offset, self.signed))
    }
}

/// A decoded value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Event without payload
    Empty,
    Unsigned(u64),
    Signed(i64),
    Float(f32),
    /// Multi-axis float value (e.g. x, y, z)
    Vector(Vec<f32>),
    Bytes(Vec<u8>),
    /// One value per fused input, in fuse order
    Fused(Vec<Value>),
    /// Accounter prefix (tick count or sample count) plus the wrapped value
    Accounted { prefix: u32, value: Box<Value> },
}

impl Value {
    /// Best-effort numeric view, used by tests and simple consumers
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Unsigned(v) => Some(*v as f64),
            Value::Signed(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Accounted { value, .. } => value.as_f64(),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }
}

/// A timestamped decoded value
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

/// Read an unsigned little-endian integer of up to 8 bytes
pub fn read_unsigned(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)))
}

/// Read a signed little-endian integer of up to 8 bytes
pub fn read_signed(bytes: &[u8]) -> i64 {
    let width = bytes.len().min(8);
    if width == 0 {
        return 0;
    }
    let raw = read_unsigned(&bytes[..width]);
    let shift = 64 - 8 * width as u32;
    ((raw << shift) as i64) >> shift
}
