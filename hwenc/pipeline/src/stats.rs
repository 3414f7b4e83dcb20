/*!
    Encoder statistics.
*/

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/**
    Snapshot of an encoder's counters, accumulated over every session.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EncoderStats {
    /// Frames accepted by `encode` after input validation.
    pub frames_submitted: u64,
    /// Frames dropped for flow control.
    pub frames_dropped: u64,
    /// Encoded frames handed to the callback.
    pub frames_delivered: u64,
    /// Key frames handed to the callback.
    pub key_frames_delivered: u64,
    /// Payload bytes handed to the callback.
    pub bytes_delivered: u64,
    /// Bitrate changes accepted by the device.
    pub bitrate_updates: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    frames_submitted: AtomicU64,
    frames_dropped: AtomicU64,
    frames_delivered: AtomicU64,
    key_frames_delivered: AtomicU64,
    bytes_delivered: AtomicU64,
    bitrate_updates: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_submitted(&self) {
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, bytes: usize, key_frame: bool) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(bytes as u64, Ordering::Relaxed);
        if key_frame {
            self.key_frames_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_bitrate_update(&self) {
        self.bitrate_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EncoderStats {
        EncoderStats {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            key_frames_delivered: self.key_frames_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            bitrate_updates: self.bitrate_updates.load(Ordering::Relaxed),
        }
    }
}
