//! Per-job mutual exclusion and single-writer published values
//!
//! Jobs never wait on each other: a tick that cannot take its domain lock is
//! dropped. Values that cross domains go through `PublishedValue`, which the
//! writer stores and readers load without any lock.

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

/// A mutual-exclusion domain owned by one watchdog job
pub struct LockDomain<T> {
    name: &'static str,
    inner: Mutex<T>,
    skipped: AtomicU64,
}

impl<T> LockDomain<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: Mutex::new(value),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Attempt the lock without blocking; `None` means the tick must be skipped
    pub fn try_enter(&self) -> Option<MutexGuard<'_, T>> {
        let guard = self.inner.try_lock();
        if guard.is_none() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            trace!("Domain {} busy, skipping tick", self.name);
        }
        guard
    }

    /// Blocking entry for external commands (never used from a tick)
    pub fn enter(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    /// Number of ticks dropped because the domain was busy
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// Lock-free f64 cell with an explicit "absent" state
#[derive(Debug, Default)]
pub struct PublishedValue {
    bits: AtomicU64,
    present: AtomicBool,
}

impl PublishedValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: f64) -> Self {
        let v = Self::new();
        v.publish(value);
        v
    }

    pub fn publish(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        self.present.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.present.store(false, Ordering::Release);
    }

    pub fn get(&self) -> Option<f64> {
        if self.present.load(Ordering::Acquire) {
            Some(f64::from_bits(self.bits.load(Ordering::Relaxed)))
        } else {
            None
        }
    }

    /// Value, or 0.0 when absent
    pub fn get_or_zero(&self) -> f64 {
        self.get().unwrap_or(0.0)
    }
}
