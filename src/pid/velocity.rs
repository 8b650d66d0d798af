// src/pid/velocity.rs

//! # Velocity PID Compute Module
//!
//! Compute callback and control data for the velocity-to-pitch loop. This
//! loop only runs when a fresh GPS packet has arrived, so all of its rate
//! terms are normalized by the measured packet interval rather than the
//! task rate. The integral accumulation is throttled two ways: a relax
//! factor that ramps in over the first seconds of the return (GPS velocity
//! lags badly during the initial acceleration) and a proximity factor that
//! bleeds the accumulator off during the final approach so deceleration
//! does not overshoot the landing point.

use piddiy::PidController;

/// Control data for one velocity compute step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityControlData {
    /// Target minus measured velocity toward home, cm/s; positive means
    /// too slow.
    pub velocity_error_cm_s: f32,
    /// PT1-filtered derivative term, already normalized by the sample
    /// interval.
    pub filtered_derivative: f32,
    /// Sample-interval normalizer: GPS packet interval in seconds x 10.
    pub sample_interval: f32,
    /// Configured I gain, folded into the accumulator.
    pub i_gain: f32,
    /// 0..1 ramp gating integral accumulation at the start of the return.
    pub iterm_relax: f32,
    /// 0..1 factor decaying the accumulator on approach to the landing
    /// area.
    pub proximity_to_landing_area: f32,
    /// Saturation bound for the accumulator; half the pitch angle limit in
    /// degrees x 100.
    pub integral_limit: f32,
}

/// Velocity compute callback.
///
/// A zero `integral_limit` (pitch locked flat) forces the accumulator to
/// zero, which is exactly what the close-range landing profile relies on.
pub fn compute_velocity(
    pid: &mut PidController<f32, VelocityControlData>,
    data: VelocityControlData,
) -> (f32, f32, f32) {
    let error = data.velocity_error_cm_s;
    let mut integral =
        pid.integral + 0.01 * data.i_gain * error * data.sample_interval * data.iterm_relax;
    integral *= data.proximity_to_landing_area;
    integral = integral.clamp(-data.integral_limit, data.integral_limit);

    (error, integral, data.filtered_derivative)
}
