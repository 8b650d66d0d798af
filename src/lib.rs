// src/lib.rs

//! # GPS Rescue Controller
//!
//! A `no_std`, no-alloc return-to-home flight mode for multirotor flight
//! controllers. When activated by a pilot switch or a loss-of-signal
//! failsafe, the controller takes authority over throttle, pitch, roll and
//! yaw, flies the craft back to the recorded home position and lands it:
//! a phase machine drives three coupled PID loops (altitude to throttle,
//! heading to yaw with a roll mix, velocity to pitch) over noisy,
//! rate-limited sensor streams, supervised by cascaded sanity monitors
//! with policy-driven failure escalation.
//!
//! The crate is a pure control module in a single-threaded environment:
//! the flight-controller scheduler owns a [`GpsRescue`] instance, feeds it
//! a [`RescueInput`] snapshot at a fixed nominal rate, notifies it of
//! fresh GPS packets, and reads the outputs back through accessors. Time
//! comes from an injected monotonic microsecond [`Clock`], so everything
//! down to the 1 Hz supervisor gates is testable with a virtual clock.
//!
//! ## Usage
//!
//! ```
//! use gps_rescue::{GpsRescue, RescueConfig, RescueInput, ArmingControl, DisarmReason};
//!
//! struct Core;
//! impl ArmingControl for Core {
//!     fn set_arming_disabled(&mut self) { /* latch the arm switch */ }
//!     fn disarm(&mut self, _reason: DisarmReason) { /* cut the motors */ }
//! }
//!
//! let config = RescueConfig::new();
//! config.validate().unwrap();
//! let mut rescue = GpsRescue::new(config, || 0u32 /* microsecond clock */);
//! let mut core = Core;
//!
//! // each scheduler tick:
//! let input = RescueInput::default();
//! rescue.update(&input, &mut core);
//! let throttle = rescue.throttle();
//! let yaw_rate = rescue.yaw_rate();
//! let (pitch, roll) = rescue.angles();
//! ```

#![no_std]
#![deny(missing_docs)]

pub mod config;
mod controllers;
pub mod filter;
pub mod pid;
pub mod rescue;
mod sanity;
mod sensor;
pub mod state;
pub mod test_utils;
pub mod time;

pub use config::{
    AltitudeMode, ConfigError, RescueConfig, SanityCheckMode, GPS_MIN_SAT_COUNT, PWM_RANGE_MAX,
    PWM_RANGE_MIN,
};
pub use controllers::GPS_RESCUE_MAX_YAW_RATE;
pub use filter::{
    pt1_filter_gain, pt2_filter_gain, pt3_filter_gain, LowPassFilter, Pt1Filter, Pt2Filter,
    Pt3Filter,
};
pub use rescue::{GpsRescue, GPS_RESCUE_MIN_DESCENT_DIST_M, GPS_RESCUE_TASK_RATE_HZ};
pub use state::{
    ArmingControl, DisarmReason, FailureKind, RescueInput, RescueIntent, RescuePhase, RescueState,
    SensorData,
};
pub use time::{Clock, TimeUs};
