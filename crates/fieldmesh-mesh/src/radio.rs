//! Radio and clock seams for the mesh protocol
//!
//! The protocol never blocks on the radio: transmission is fire-and-forget
//! and reception is a non-blocking poll.

use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::Result;

/// A frame taken off the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    /// Raw frame bytes
    pub data: Bytes,
    /// Link-layer sender, when the radio reports it
    pub sender: Option<u32>,
    /// Signal strength in dBm
    pub rssi: Option<i16>,
}

impl ReceivedFrame {
    /// Frame with no link metadata
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            sender: None,
            rssi: None,
        }
    }
}

/// A half-duplex packet radio
pub trait Radio: Send {
    /// Queue a frame for transmission
    fn transmit(&mut self, frame: &[u8]) -> Result<()>;

    /// Take the next received frame, if any
    fn try_receive(&mut self) -> Option<ReceivedFrame>;
}

/// Source of unix time in whole seconds
pub trait Clock: Send + Sync {
    /// Current unix time
    fn now_secs(&self) -> u32;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u32 {
        chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
    }
}

/// Hand-driven clock; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    /// Start at the given time
    pub fn new(start: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start)),
        }
    }

    /// Move time forward
    pub fn advance(&self, secs: u32) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, secs: u32) {
        self.now.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}
