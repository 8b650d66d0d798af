// src/filter.rs

//! # Low-Pass Filter Primitives
//!
//! First-order low-pass sections and their two- and three-pole cascades
//! (PT1, PT2, PT3), used to condition the derivative terms of the rescue
//! PID loops and to upsample the GPS-rate pitch command to the task rate.
//!
//! Filters are parameterized by a precomputed gain rather than a cutoff
//! frequency, so that a caller with a varying sample interval (GPS data
//! arrives anywhere from 1 Hz to 10 Hz) can recompute the gain on the fly
//! and push it in through [`LowPassFilter::update_cutoff`].

use core::f32::consts::PI;

/// Cutoff adjustment so that two cascaded one-pole sections have the same
/// -3 dB frequency as the single section they replace.
const CUTOFF_CORRECTION_PT2: f32 = 1.553_774;

/// Cutoff adjustment for three cascaded one-pole sections.
const CUTOFF_CORRECTION_PT3: f32 = 1.961_459_2;

/// Gain of a single one-pole section for `cutoff_hz` at sample interval
/// `dt` seconds: `dt / (dt + 1 / (2*pi*f_c))`.
pub fn pt1_filter_gain(cutoff_hz: f32, dt: f32) -> f32 {
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    dt / (rc + dt)
}

/// Per-section gain for a two-pole cascade with overall cutoff `cutoff_hz`.
pub fn pt2_filter_gain(cutoff_hz: f32, dt: f32) -> f32 {
    pt1_filter_gain(cutoff_hz * CUTOFF_CORRECTION_PT2, dt)
}

/// Per-section gain for a three-pole cascade with overall cutoff `cutoff_hz`.
pub fn pt3_filter_gain(cutoff_hz: f32, dt: f32) -> f32 {
    pt1_filter_gain(cutoff_hz * CUTOFF_CORRECTION_PT3, dt)
}

/// Common interface of the one-pole cascade filters.
///
/// `update_cutoff` takes a gain from one of the `*_filter_gain` helpers,
/// letting the caller modulate the cutoff without knowing the filter order.
pub trait LowPassFilter {
    /// Replaces the per-section gain, keeping the filter state.
    fn update_cutoff(&mut self, gain: f32);
    /// Feeds one input sample and returns the filtered output.
    fn apply(&mut self, input: f32) -> f32;
}

/// Single one-pole low-pass section.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pt1Filter {
    state: f32,
    k: f32,
}

impl Pt1Filter {
    /// Creates a section with the given gain and zero initial state.
    pub fn new(gain: f32) -> Self {
        Self { state: 0.0, k: gain }
    }
}

impl LowPassFilter for Pt1Filter {
    fn update_cutoff(&mut self, gain: f32) {
        self.k = gain;
    }

    fn apply(&mut self, input: f32) -> f32 {
        self.state += self.k * (input - self.state);
        self.state
    }
}

/// Two cascaded one-pole sections.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pt2Filter {
    state: f32,
    state1: f32,
    k: f32,
}

impl Pt2Filter {
    /// Creates a cascade with the given per-section gain and zero state.
    pub fn new(gain: f32) -> Self {
        Self {
            state: 0.0,
            state1: 0.0,
            k: gain,
        }
    }
}

impl LowPassFilter for Pt2Filter {
    fn update_cutoff(&mut self, gain: f32) {
        self.k = gain;
    }

    fn apply(&mut self, input: f32) -> f32 {
        self.state1 += self.k * (input - self.state1);
        self.state += self.k * (self.state1 - self.state);
        self.state
    }
}

/// Three cascaded one-pole sections.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pt3Filter {
    state: f32,
    state1: f32,
    state2: f32,
    k: f32,
}

impl Pt3Filter {
    /// Creates a cascade with the given per-section gain and zero state.
    pub fn new(gain: f32) -> Self {
        Self {
            state: 0.0,
            state1: 0.0,
            state2: 0.0,
            k: gain,
        }
    }
}

impl LowPassFilter for Pt3Filter {
    fn update_cutoff(&mut self, gain: f32) {
        self.k = gain;
    }

    fn apply(&mut self, input: f32) -> f32 {
        self.state1 += self.k * (input - self.state1);
        self.state2 += self.k * (self.state1 - self.state2);
        self.state += self.k * (self.state2 - self.state);
        self.state
    }
}
