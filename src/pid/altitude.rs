// src/pid/altitude.rs

//! # Altitude PID Compute Module
//!
//! Compute callback and control data for the altitude-to-throttle loop.
//! The derivative input arrives pre-filtered (the owning controller runs
//! the vertical-speed estimate through a PT2 before every compute), so the
//! callback only accumulates the integral and passes the terms through.

use piddiy::PidController;

/// Hard bound on the gain-included altitude integral accumulator.
pub const MAX_THROTTLE_ITERM: f32 = 200.0;

/// Control data for one altitude compute step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AltitudeControlData {
    /// Height of the target above the craft in metres; negative when the
    /// craft is above the target.
    pub altitude_error_m: f32,
    /// PT2-filtered vertical-speed estimate, already boosted for fast
    /// descent, used as the derivative term.
    pub filtered_vertical_speed: f32,
    /// Measured interval between altitude samples, seconds.
    pub interval_s: f32,
    /// Configured I gain, folded into the accumulator.
    pub i_gain: f32,
}

/// Altitude compute callback.
///
/// The error is fed in precomputed (metres) because the set point and the
/// measurement both live in centimetres in the caller's state; the
/// accumulator integrates `0.1 * i_gain * error` over the measured sample
/// interval and saturates at [`MAX_THROTTLE_ITERM`], about a 20% throttle
/// contribution.
pub fn compute_altitude(
    pid: &mut PidController<f32, AltitudeControlData>,
    data: AltitudeControlData,
) -> (f32, f32, f32) {
    let error = data.altitude_error_m;
    let integral = (pid.integral + 0.1 * data.i_gain * error * data.interval_s)
        .clamp(-MAX_THROTTLE_ITERM, MAX_THROTTLE_ITERM);

    (error, integral, data.filtered_vertical_speed)
}
