//! Dynamic Sleep Algorithm (§4.E): a per-display multiplier applied to
//! the DDC/CI standard's minimum inter-packet delays, adapted from the
//! observed retry rate.

use std::collections::VecDeque;
use std::time::Duration;

pub const SLEEP_MULTIPLIER_FLOOR: f64 = 0.1;
pub const SLEEP_MULTIPLIER_CEILING: f64 = 10.0;

const WINDOW: usize = 10;
const HIGH_RETRY_RATE: f64 = 0.4;
const LOW_RETRY_RATE: f64 = 0.05;
const INCREASE_FACTOR: f64 = 1.5;
const DECREASE_FACTOR: f64 = 1.25;

/// The three points in a DDC/CI exchange where the standard mandates a
/// minimum delay; each is scaled by the current multiplier (§4.A/§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepClass {
    AfterWrite,
    BeforeRead,
    AfterRead,
}

impl SleepClass {
    /// Minimum delay required by the DDC/CI standard, before scaling.
    fn base_ms(self) -> u64 {
        match self {
            SleepClass::AfterWrite => 50,
            SleepClass::BeforeRead => 40,
            SleepClass::AfterRead => 40,
        }
    }
}

/// DSA state for a single display (§3 `PerDisplaySleepData`).
#[derive(Debug, Clone)]
pub struct PerDisplaySleepData {
    multiplier: f64,
    window: VecDeque<bool>,
    overridden: bool,
}

impl PerDisplaySleepData {
    pub fn new() -> Self {
        Self {
            multiplier: 1.0,
            window: VecDeque::with_capacity(WINDOW),
            overridden: false,
        }
    }

    /// Seed the multiplier from a persisted per-EDID state file (§4.E).
    pub fn with_initial_multiplier(multiplier: f64) -> Self {
        let mut data = Self::new();
        data.multiplier = multiplier.clamp(SLEEP_MULTIPLIER_FLOOR, SLEEP_MULTIPLIER_CEILING);
        data
    }

    /// `--sleep-multiplier`: pins the multiplier and disables adaptation.
    pub fn set_override(&mut self, multiplier: f64) {
        self.multiplier = multiplier.clamp(SLEEP_MULTIPLIER_FLOOR, SLEEP_MULTIPLIER_CEILING);
        self.overridden = true;
        self.window.clear();
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn sleep_duration(&self, class: SleepClass) -> Duration {
        let scaled = class.base_ms() as f64 * self.multiplier;
        Duration::from_micros((scaled * 1000.0).round() as u64)
    }

    /// Feed the outcome of one completed attempt. Every `WINDOW` outcomes
    /// the retry rate is computed and the multiplier transitioned,
    /// hysteretically, per §4.E.
    pub fn record_outcome(&mut self, retried: bool) {
        if self.overridden {
            return;
        }
        self.window.push_back(retried);
        if self.window.len() < WINDOW {
            return;
        }
        let retries = self.window.iter().filter(|r| **r).count();
        let rate = retries as f64 / self.window.len() as f64;
        self.window.clear();

        if rate >= HIGH_RETRY_RATE {
            self.multiplier = (self.multiplier * INCREASE_FACTOR).min(SLEEP_MULTIPLIER_CEILING);
        } else if rate <= LOW_RETRY_RATE && self.multiplier > SLEEP_MULTIPLIER_FLOOR {
            self.multiplier = (self.multiplier / DECREASE_FACTOR).max(SLEEP_MULTIPLIER_FLOOR);
        }
    }
}

impl Default for PerDisplaySleepData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn multiplier_stays_in_bounds() {
        let mut data = PerDisplaySleepData::new();
        for _ in 0..200 {
            for _ in 0..WINDOW {
                data.record_outcome(true);
            }
        }
        assert!(data.multiplier() <= SLEEP_MULTIPLIER_CEILING);

        let mut data = PerDisplaySleepData::new();
        for _ in 0..200 {
            for _ in 0..WINDOW {
                data.record_outcome(false);
            }
        }
        assert!(data.multiplier() >= SLEEP_MULTIPLIER_FLOOR);
    }

    #[test]
    fn consecutive_retries_never_decrease_multiplier() {
        let mut data = PerDisplaySleepData::new();
        let mut last = data.multiplier();
        for _ in 0..5 {
            for _ in 0..WINDOW {
                data.record_outcome(true);
            }
            assert!(data.multiplier() >= last);
            last = data.multiplier();
        }
    }

    #[test]
    fn consecutive_successes_never_increase_multiplier() {
        let mut data = PerDisplaySleepData::with_initial_multiplier(5.0);
        let mut last = data.multiplier();
        for _ in 0..5 {
            for _ in 0..WINDOW {
                data.record_outcome(false);
            }
            assert!(data.multiplier() <= last);
            last = data.multiplier();
        }
    }

    #[test]
    fn override_disables_adaptation() {
        let mut data = PerDisplaySleepData::new();
        data.set_override(3.0);
        for _ in 0..WINDOW {
            data.record_outcome(true);
        }
        assert_eq!(data.multiplier(), 3.0);
    }
}
