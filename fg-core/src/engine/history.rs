//! Delay compensation and scene-change detection
//!
//! Frame rate reacts to a new power limit roughly 1.3 s after it is set, so the
//! TDP that explains the current frame rate is an older setpoint, not the
//! latest one.

use crate::constants::control;

/// Rolling history of published setpoints, newest first
#[derive(Debug, Clone)]
pub struct SetpointHistory {
    slots: [f64; control::HISTORY_LEN],
    seeded: bool,
}

impl Default for SetpointHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl SetpointHistory {
    pub fn new() -> Self {
        Self {
            slots: [0.0; control::HISTORY_LEN],
            seeded: false,
        }
    }

    /// Record this tick's setpoint; the first one fills every slot
    pub fn push(&mut self, setpoint: f64) {
        if !self.seeded {
            self.slots = [setpoint; control::HISTORY_LEN];
            self.seeded = true;
            return;
        }
        self.slots.copy_within(0..control::HISTORY_LEN - 1, 1);
        self.slots[0] = setpoint;
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Setpoint `ticks_ago` ticks back
    pub fn get(&self, ticks_ago: usize) -> Option<f64> {
        if self.seeded {
            self.slots.get(ticks_ago).copied()
        } else {
            None
        }
    }

    /// TDP that was in effect for the frame rate observed now
    pub fn valid_setpoint(&self) -> Option<f64> {
        if !self.seeded {
            return None;
        }
        let lagged = self.slots[control::HISTORY_LAGGED_SLOT];
        let recent = self.slots[control::HISTORY_RECENT_SLOT];
        Some(lagged + (recent - lagged) * control::HISTORY_BLEND)
    }

    pub fn reset(&mut self) {
        self.seeded = false;
    }
}

/// Fires once the curve prediction error stays large for long enough
#[derive(Debug, Clone)]
pub struct SceneChangeDetector {
    threshold_percent: f64,
    hold_ms: u64,
    elapsed_ms: u64,
}

impl Default for SceneChangeDetector {
    fn default() -> Self {
        Self::new(
            control::SCENE_CHANGE_ERROR_PERCENT,
            control::SCENE_CHANGE_DURATION_MS,
        )
    }
}

impl SceneChangeDetector {
    pub fn new(threshold_percent: f64, hold_ms: u64) -> Self {
        Self {
            threshold_percent,
            hold_ms,
            elapsed_ms: 0,
        }
    }

    /// Feed the observed/expected frame rate ratio for one tick of `tick_ms`
    ///
    /// Returns true when the error has been at or above the threshold for the
    /// whole hold time; the timer restarts after firing.
    pub fn update(&mut self, curve_error: f64, tick_ms: u64) -> bool {
        let error_percent = (curve_error - 1.0).abs() * 100.0;
        if !error_percent.is_finite() || error_percent < self.threshold_percent {
            self.elapsed_ms = 0;
            return false;
        }
        self.elapsed_ms = self.elapsed_ms.saturating_add(tick_ms);
        if self.elapsed_ms >= self.hold_ms {
            self.elapsed_ms = 0;
            return true;
        }
        false
    }

    /// How long the current error streak has lasted
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn reset(&mut self) {
        self.elapsed_ms = 0;
    }
}
