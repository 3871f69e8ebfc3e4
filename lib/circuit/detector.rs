//! Detector metadata consulted when turning amplitudes into click statistics.

use crate::error::{ SimError, SimResult };

/// Post-selection condition on the total photon count of a channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Condition {
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
}

impl Condition {
    /// Return `true` if `count` satisfies the condition.
    pub fn holds(&self, count: usize) -> bool {
        match *self {
            Self::Exactly(n) => count == n,
            Self::AtLeast(n) => count >= n,
            Self::AtMost(n) => count <= n,
        }
    }
}

/// How time bins are reported after detection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum TimeResolution {
    /// Keep every time bin.
    #[default]
    Full,
    /// Sum over all time bins; only photon counts per channel and polarization
    /// survive.
    Counter,
    /// Group time bins into periods of the given length, reporting the period
    /// index.
    Period(usize),
}

impl TimeResolution {
    /// Number of reported time bins given `slots` simulated ones.
    pub fn reported_slots(&self, slots: usize) -> usize {
        match *self {
            Self::Full => slots,
            Self::Counter => 1,
            Self::Period(p) => slots.div_ceil(p),
        }
    }

    /// Reported bin for simulated slot `slot`.
    pub fn reported_slot(&self, slot: usize) -> usize {
        match *self {
            Self::Full => slot,
            Self::Counter => 0,
            Self::Period(p) => slot / p,
        }
    }

    /// Part of the slot index that is discarded by [`Self::reported_slot`].
    pub fn traced_slot(&self, slot: usize) -> usize {
        match *self {
            Self::Full => 0,
            Self::Counter => slot,
            Self::Period(p) => slot % p,
        }
    }
}

/// Detector attached to a single channel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Detector {
    pub condition: Option<Condition>,
    /// Probability that each photon is registered.
    pub efficiency: f64,
    /// Probability that the detector is blind in any given time bin.
    pub blink: f64,
    /// Mean number of dark clicks per measurement.
    pub dark_rate: f64,
}

impl Default for Detector {
    fn default() -> Self {
        Self { condition: None, efficiency: 1.0, blink: 0.0, dark_rate: 0.0 }
    }
}

impl Detector {
    /// Create a new ideal detector with no post-selection condition.
    pub fn new() -> Self { Self::default() }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_efficiency(mut self, efficiency: f64) -> Self {
        self.efficiency = efficiency;
        self
    }

    pub fn with_blink(mut self, blink: f64) -> Self {
        self.blink = blink;
        self
    }

    pub fn with_dark_rate(mut self, dark_rate: f64) -> Self {
        self.dark_rate = dark_rate;
        self
    }

    /// Return `true` if the detector neither loses nor adds clicks.
    pub fn is_ideal(&self) -> bool {
        self.efficiency >= 1.0 && self.blink <= 0.0 && self.dark_rate <= 0.0
    }

    pub(crate) fn validate(&self) -> SimResult<()> {
        if !(0.0..=1.0).contains(&self.efficiency) {
            return Err(SimError::config(format!(
                "detector efficiency must be in [0, 1]; got {}",
                self.efficiency,
            )));
        }
        if !(0.0..=1.0).contains(&self.blink) {
            return Err(SimError::config(format!(
                "detector blinking probability must be in [0, 1]; got {}",
                self.blink,
            )));
        }
        if !(self.dark_rate >= 0.0) || !self.dark_rate.is_finite() {
            return Err(SimError::config(format!(
                "dark count rate must be finite and non-negative; got {}",
                self.dark_rate,
            )));
        }
        Ok(())
    }
}
