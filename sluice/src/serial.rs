//! Serial numbers for framing payloads.
//!
//! A serial number is a `u64` stored as 8 little-endian bytes in front of the
//! payload:
//!
//! ```text
//! ┌──────────────┬─────────────────────┐
//! │ serial: u64  │ payload             │
//! │ (8 bytes LE) │ (remaining bytes)   │
//! └──────────────┴─────────────────────┘
//! ```
//!
//! Counters are explicit values: each [`SerialNumbers`] instance counts on its
//! own, so two pipelines never interfere.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SerialError;

/// Size of an encoded serial number.
pub const SERIAL_LEN: usize = 8;

/// A monotonically increasing serial number counter.
///
/// Safe to share between tasks; every call to [`next`](Self::next) returns a
/// distinct value.
#[derive(Debug, Default)]
pub struct SerialNumbers {
    next: AtomicU64,
}

impl SerialNumbers {
    /// A counter whose first value is 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// A counter whose first value is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Take the next serial number.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Prepend the next serial number to `payload`.
    pub fn stamp(&self, payload: &[u8]) -> Vec<u8> {
        prepend(payload, self.next())
    }
}

/// Build a frame of `sn` followed by `payload`.
pub fn prepend(payload: &[u8], sn: u64) -> Vec<u8> {
    let mut frame = Vec::with_capacity(SERIAL_LEN + payload.len());
    frame.extend_from_slice(&sn.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Split a frame into its serial number and the payload after it.
pub fn split(frame: &[u8]) -> Result<(u64, &[u8]), SerialError> {
    if frame.len() < SERIAL_LEN {
        return Err(SerialError::TooShort {
            len: frame.len(),
            expected: SERIAL_LEN,
        });
    }
    let (head, payload) = frame.split_at(SERIAL_LEN);
    let mut bytes = [0u8; SERIAL_LEN];
    bytes.copy_from_slice(head);
    Ok((u64::from_le_bytes(bytes), payload))
}

/// Read the serial number of a frame without touching the payload.
pub fn peek(frame: &[u8]) -> Result<u64, SerialError> {
    split(frame).map(|(sn, _)| sn)
}
