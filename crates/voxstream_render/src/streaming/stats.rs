//! Loader state and counters shared between the loader and render threads.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Where the loader thread is in its request loop.
///
/// ```text
/// Stopped ──start──> Idle ──pop──> ProcessingRequest ──> StagingUpload
///                     ^                                       │
///                     │                                       v
///      RecordForOwnershipTransfer <─────────────────── DeviceCopy
/// ```
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderState {
    /// Not started, or shut down.
    Stopped = 0,
    /// Blocked waiting for a request.
    Idle = 1,
    /// Decoding or validating a request.
    ProcessingRequest = 2,
    /// Writing bytes into the staging buffer.
    StagingUpload = 3,
    /// Copy submitted on the transfer queue, waiting on the fence.
    DeviceCopy = 4,
    /// Handing the completion to the render thread.
    RecordForOwnershipTransfer = 5,
}

impl LoaderState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Idle,
            2 => Self::ProcessingRequest,
            3 => Self::StagingUpload,
            4 => Self::DeviceCopy,
            5 => Self::RecordForOwnershipTransfer,
            _ => Self::Stopped,
        }
    }
}

/// Atomic cell holding a [`LoaderState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new(state: LoaderState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub(crate) fn set(&self, state: LoaderState) {
        self.0.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub(crate) fn get(&self) -> LoaderState {
        LoaderState::from_raw(self.0.load(Ordering::Acquire))
    }
}

/// Request counters. Once the loader has shut down,
/// `requested == completed + failed + discarded`.
#[derive(Debug, Default)]
pub struct LoaderStats {
    /// Requests accepted into the queue.
    pub requested: AtomicU64,
    /// Requests whose copy finished and was handed to the render thread.
    pub completed: AtomicU64,
    /// Requests dropped after an error.
    pub failed: AtomicU64,
    /// Requests still queued at shutdown.
    pub discarded: AtomicU64,
}

/// Plain copy of [`LoaderStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStatsSnapshot {
    /// Requests accepted into the queue.
    pub requested: u64,
    /// Requests handed to the render thread.
    pub completed: u64,
    /// Requests dropped after an error.
    pub failed: u64,
    /// Requests discarded at shutdown.
    pub discarded: u64,
}

impl LoaderStatsSnapshot {
    /// Requests that reached a final outcome.
    #[must_use]
    pub const fn settled(&self) -> u64 {
        self.completed + self.failed + self.discarded
    }
}

impl LoaderStats {
    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> LoaderStatsSnapshot {
        LoaderStatsSnapshot {
            requested: self.requested.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell() {
        let cell = StateCell::new(LoaderState::Stopped);
        cell.set(LoaderState::DeviceCopy);
        assert_eq!(cell.get(), LoaderState::DeviceCopy);
        assert_eq!(LoaderState::from_raw(200), LoaderState::Stopped);
    }

    #[test]
    fn test_snapshot_settled() {
        let stats = LoaderStats::default();
        LoaderStats::add(&stats.requested, 4);
        LoaderStats::add(&stats.completed, 2);
        LoaderStats::add(&stats.failed, 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requested, 4);
        assert_eq!(snapshot.settled(), 3);
    }
}
