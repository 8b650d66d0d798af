// src/config.rs

//! # Rescue Configuration
//!
//! Plain-struct configuration for the rescue controller, with defaults
//! matching a conservative racing-quad setup. All fields are public; tune
//! them before constructing the controller and run [`RescueConfig::validate`]
//! once at boot to reject windows that cannot work (for example a hover
//! throttle outside the throttle clamp).

use thiserror::Error;

/// Satellite count below which the fix is considered unreliable.
pub const GPS_MIN_SAT_COUNT: u8 = 4;

/// PWM count at the bottom of the throttle channel range.
pub const PWM_RANGE_MIN: u16 = 1000;

/// PWM count at the top of the throttle channel range.
pub const PWM_RANGE_MAX: u16 = 2000;

/// How the cruise (return) altitude is chosen when a rescue starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltitudeMode {
    /// Always climb or descend to the configured initial altitude.
    Fixed,
    /// Current altitude at activation plus the safety buffer.
    Current,
    /// Highest altitude seen this arm cycle plus the safety buffer.
    Max,
}

impl Default for AltitudeMode {
    fn default() -> Self {
        AltitudeMode::Max
    }
}

/// Policy selecting how aggressively detected failures are escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanityCheckMode {
    /// Never abort on supervisor failures; fall back to a timed descent.
    Off,
    /// Any failure aborts the rescue and disarms.
    On,
    /// Abort only when the receiver link is also down.
    FsOnly,
}

impl Default for SanityCheckMode {
    fn default() -> Self {
        SanityCheckMode::FsOnly
    }
}

/// Configuration rejected by [`RescueConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Hover throttle must sit strictly inside the min..max clamp window.
    #[error("hover throttle {hover} outside clamp window {min}..{max}")]
    ThrottleWindow {
        /// Configured minimum throttle.
        min: u16,
        /// Configured maximum throttle.
        max: u16,
        /// Configured hover throttle.
        hover: u16,
    },
    /// A filter cutoff of zero would freeze its filter.
    #[error("filter cutoff must be non-zero")]
    ZeroCutoff,
    /// Climb and descent rates must be non-zero.
    #[error("ascend and descend rates must be non-zero")]
    ZeroRate,
    /// The pitch and roll authority limit must be a usable angle.
    #[error("max rescue angle {0} out of range 1..=80")]
    AngleOutOfRange(u8),
    /// The return groundspeed must be non-zero.
    #[error("rescue groundspeed must be non-zero")]
    ZeroGroundspeed,
}

/// Tunable parameters of the rescue controller.
///
/// Scaled integer fields follow the units used by flight-controller
/// configurators: throttle values are raw PWM counts, rates are cm/s,
/// cutoffs are Hz x 100, the disarm threshold is tenths of a g.
#[derive(Debug, Clone, Copy)]
pub struct RescueConfig {
    /// Altitude P gain.
    pub throttle_p: u8,
    /// Altitude I gain.
    pub throttle_i: u8,
    /// Altitude D gain.
    pub throttle_d: u8,
    /// Throttle that holds altitude in still air, PWM counts.
    pub throttle_hover: u16,
    /// Lowest throttle the rescue may command, PWM counts.
    pub throttle_min: u16,
    /// Highest throttle the rescue may command, PWM counts.
    pub throttle_max: u16,

    /// Velocity P gain.
    pub vel_p: u8,
    /// Velocity I gain.
    pub vel_i: u8,
    /// Velocity D gain.
    pub vel_d: u8,
    /// Velocity D low-pass cutoff, Hz x 100.
    pub pitch_cutoff_hz: u16,
    /// Heading P gain.
    pub yaw_p: u8,
    /// Roll-from-yaw mix strength; 0 disables the roll mix.
    pub roll_mix: u8,

    /// Cruise altitude for [`AltitudeMode::Fixed`], metres.
    pub initial_altitude_m: u16,
    /// Safety buffer added in the Current and Max altitude modes, metres.
    pub rescue_altitude_buffer_m: u16,
    /// Altitude at which the final landing stage begins, metres.
    pub target_landing_altitude_m: u16,
    /// Descent rate, cm/s.
    pub descend_rate: u16,
    /// Climb rate, cm/s.
    pub ascend_rate: u16,
    /// Distance from home at which the descent begins, metres.
    pub descent_distance_m: u16,
    /// Return groundspeed target, cm/s.
    pub rescue_groundspeed: u16,
    /// Maximum pitch and roll authority, degrees.
    pub max_rescue_angle: u8,

    /// Cruise-altitude selection policy.
    pub altitude_mode: AltitudeMode,
    /// Failure escalation policy.
    pub sanity_checks: SanityCheckMode,

    /// Use the magnetometer for heading during the rescue.
    pub use_mag: bool,
    /// Arming without a home fix is permitted (affects escalation).
    pub allow_arming_without_fix: bool,
    /// Keep the recorded maximum altitude across disarms.
    pub gps_set_home_point_once: bool,
    /// Minimum distance from home for a full rescue, metres; closer
    /// activations land or abort instead.
    pub min_rescue_dth: u16,
    /// Impact detection threshold, tenths of a g.
    pub disarm_threshold: u8,

    /// Altitude D low-pass cutoff, Hz x 100.
    pub altitude_d_lpf: u16,
    /// Receiver throttle floor used when rescaling the throttle output.
    pub rx_min_check: u16,
    /// Pilot flies with yaw direction reversed.
    pub yaw_control_reversed: bool,
}

impl RescueConfig {
    /// Creates a configuration with stock defaults.
    pub fn new() -> Self {
        Self {
            throttle_p: 15,
            throttle_i: 15,
            throttle_d: 15,
            throttle_hover: 1275,
            throttle_min: 1100,
            throttle_max: 1600,

            vel_p: 8,
            vel_i: 30,
            vel_d: 20,
            pitch_cutoff_hz: 75,
            yaw_p: 20,
            roll_mix: 150,

            initial_altitude_m: 30,
            rescue_altitude_buffer_m: 10,
            target_landing_altitude_m: 4,
            descend_rate: 150,
            ascend_rate: 750,
            descent_distance_m: 20,
            rescue_groundspeed: 750,
            max_rescue_angle: 32,

            altitude_mode: AltitudeMode::Max,
            sanity_checks: SanityCheckMode::FsOnly,

            use_mag: true,
            allow_arming_without_fix: false,
            gps_set_home_point_once: false,
            min_rescue_dth: 30,
            disarm_threshold: 30,

            altitude_d_lpf: 100,
            rx_min_check: 1050,
            yaw_control_reversed: false,
        }
    }

    /// Rejects configurations the controller cannot fly with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.throttle_min < self.throttle_hover && self.throttle_hover < self.throttle_max) {
            return Err(ConfigError::ThrottleWindow {
                min: self.throttle_min,
                max: self.throttle_max,
                hover: self.throttle_hover,
            });
        }
        if self.pitch_cutoff_hz == 0 || self.altitude_d_lpf == 0 {
            return Err(ConfigError::ZeroCutoff);
        }
        if self.ascend_rate == 0 || self.descend_rate == 0 {
            return Err(ConfigError::ZeroRate);
        }
        if self.max_rescue_angle == 0 || self.max_rescue_angle > 80 {
            return Err(ConfigError::AngleOutOfRange(self.max_rescue_angle));
        }
        if self.rescue_groundspeed == 0 {
            return Err(ConfigError::ZeroGroundspeed);
        }
        Ok(())
    }
}

impl Default for RescueConfig {
    fn default() -> Self {
        Self::new()
    }
}
