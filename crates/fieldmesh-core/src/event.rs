//! Sensor events passed from the sampling task to the mesh task
//!
//! The sampling side must never block, so the queue is bounded and a full
//! queue drops the newest event and counts the drop. Events are small `Copy`
//! values; nothing mutable is shared across the boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Default queue depth
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 32;

/// A tagged sensor reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    /// Accelerometer magnitude crossed the motion threshold
    Motion {
        /// Magnitude in g
        magnitude: f32,
        /// Unix seconds
        timestamp: u32,
    },
    /// Microphone level crossed the sound threshold
    Sound {
        /// Level in dB
        level_db: f32,
        /// Unix seconds
        timestamp: u32,
    },
    /// User pressed a button
    Button {
        /// Button index
        id: u8,
        /// Unix seconds
        timestamp: u32,
    },
    /// GNSS fix
    Fix {
        /// Latitude in 1e-7 degrees
        latitude_e7: i32,
        /// Longitude in 1e-7 degrees
        longitude_e7: i32,
        /// Altitude in meters
        altitude_m: i16,
        /// Unix seconds
        timestamp: u32,
    },
    /// Battery reading
    Battery {
        /// Cell voltage in millivolts
        millivolts: u16,
        /// Unix seconds
        timestamp: u32,
    },
}

impl SensorEvent {
    /// Timestamp of the reading
    pub fn timestamp(&self) -> u32 {
        match *self {
            SensorEvent::Motion { timestamp, .. }
            | SensorEvent::Sound { timestamp, .. }
            | SensorEvent::Button { timestamp, .. }
            | SensorEvent::Fix { timestamp, .. }
            | SensorEvent::Battery { timestamp, .. } => timestamp,
        }
    }
}

/// Constructor for a bounded event channel
pub struct EventQueue;

impl EventQueue {
    /// Create a producer/consumer pair with the given capacity
    pub fn bounded(capacity: usize) -> (EventProducer, EventConsumer) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        (
            EventProducer {
                tx,
                dropped: Arc::clone(&dropped),
            },
            EventConsumer { rx, dropped },
        )
    }
}

/// Sampling-side handle; never blocks
#[derive(Clone)]
pub struct EventProducer {
    tx: mpsc::Sender<SensorEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventProducer {
    /// Offer an event; returns false if it was dropped
    pub fn offer(&self, event: SensorEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(?event, "Event queue full or closed, dropping");
                false
            }
        }
    }

    /// Events dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Mesh-side handle
pub struct EventConsumer {
    rx: mpsc::Receiver<SensorEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventConsumer {
    /// Wait for the next event; `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<SensorEvent> {
        self.rx.recv().await
    }

    /// Take an event if one is ready
    pub fn try_recv(&mut self) -> Option<SensorEvent> {
        self.rx.try_recv().ok()
    }

    /// Events dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
