// src/controllers.rs

//! # Attain-Position Controllers
//!
//! The three coupled loops that hold the craft on the rescue plan:
//! altitude to throttle, heading to a yaw rate with a roll mix, and
//! velocity to a pitch angle. The altitude and heading loops run every
//! task tick; the velocity loop runs only when a fresh GPS packet has
//! arrived and its output is upsampled through a PT3 so the 1-10 Hz GPS
//! steps never reach the airframe.

use piddiy::PidController;

use crate::config::{RescueConfig, PWM_RANGE_MIN};
use crate::filter::{
    pt1_filter_gain, pt2_filter_gain, pt3_filter_gain, LowPassFilter, Pt1Filter, Pt2Filter,
    Pt3Filter,
};
use crate::pid::{
    compute_altitude, compute_velocity, AltitudeControlData, VelocityControlData,
};
use crate::state::{RescuePhase, RescueState};

/// Hard bound on the commanded yaw rate, deg/s.
pub const GPS_RESCUE_MAX_YAW_RATE: f32 = 180.0;

/// Controller block owning the PID loops, their filter chain and the
/// outputs consumed by the mixer and the angle-mode stack.
pub(crate) struct AttainPosition {
    altitude_pid: PidController<f32, AltitudeControlData>,
    velocity_pid: PidController<f32, VelocityControlData>,
    throttle_d_lpf: Pt2Filter,
    velocity_d_lpf: Pt1Filter,
    velocity_upsample_lpf: Pt3Filter,
    /// Velocity-loop output held between GPS packets; zero-order-hold
    /// input to the upsample filter.
    pitch_adjustment: f32,
    /// Commanded throttle, PWM counts.
    pub(crate) rescue_throttle: f32,
    /// Commanded yaw rate, deg/s.
    pub(crate) rescue_yaw: f32,
    /// Pitch angle offset for the angle-mode stack, degrees x 100.
    pub(crate) pitch_angle: f32,
    /// Roll angle offset for the angle-mode stack, degrees x 100.
    pub(crate) roll_angle: f32,
}

impl AttainPosition {
    /// Builds the controllers and conditions the filter chain from the
    /// configured cutoffs. Filters are never reset afterwards; they stay
    /// conditioned across rescues.
    pub(crate) fn new(config: &RescueConfig, task_interval_s: f32) -> Self {
        let mut altitude_pid = PidController::new();
        altitude_pid
            .compute_fn(compute_altitude)
            .set_point(0.0)
            .kp(f32::from(config.throttle_p))
            .ki(1.0)
            .kd(f32::from(config.throttle_d));

        let mut velocity_pid = PidController::new();
        velocity_pid
            .compute_fn(compute_velocity)
            .set_point(0.0)
            .kp(f32::from(config.vel_p))
            .ki(1.0)
            .kd(f32::from(config.vel_d));

        let throttle_cutoff_hz = f32::from(config.altitude_d_lpf) / 100.0;
        let velocity_cutoff_hz = f32::from(config.pitch_cutoff_hz) / 100.0;

        Self {
            altitude_pid,
            velocity_pid,
            throttle_d_lpf: Pt2Filter::new(pt2_filter_gain(throttle_cutoff_hz, task_interval_s)),
            velocity_d_lpf: Pt1Filter::new(pt1_filter_gain(velocity_cutoff_hz, 1.0)),
            velocity_upsample_lpf: Pt3Filter::new(pt3_filter_gain(
                velocity_cutoff_hz * 4.0,
                task_interval_s,
            )),
            pitch_adjustment: 0.0,
            rescue_throttle: 0.0,
            rescue_yaw: 0.0,
            pitch_angle: 0.0,
            roll_angle: 0.0,
        }
    }

    /// Runs the controllers for one tick on the current phase and intent.
    pub(crate) fn update(
        &mut self,
        state: &mut RescueState,
        config: &RescueConfig,
        pilot_throttle: f32,
        cos_tilt_angle: f32,
        new_gps_data: bool,
    ) {
        match state.phase {
            RescuePhase::Idle => {
                // outputs while no rescue is active
                self.pitch_angle = 0.0;
                self.roll_angle = 0.0;
                self.rescue_throttle = pilot_throttle;
                return;
            }
            RescuePhase::Initialize => {
                // fresh integrator and previous-error state for each rescue
                self.altitude_pid.integral = 0.0;
                self.altitude_pid.error = 0.0;
                self.velocity_pid.integral = 0.0;
                self.velocity_pid.error = 0.0;
                state.intent.velocity_iterm_accumulator = 0.0;
                state.intent.disarm_threshold = f32::from(config.disarm_threshold) / 10.0;
                return;
            }
            RescuePhase::DoNothing => {
                // slow descent while a sanity failure stands
                self.pitch_angle = 0.0;
                self.roll_angle = 0.0;
                self.rescue_throttle = f32::from(config.throttle_hover) - 100.0;
                return;
            }
            _ => {}
        }

        // Altitude (throttle) controller. The set point starts at current
        // altitude and moves stepwise, so the error stays small and the D
        // term sees the step rate, not the full altitude gap.
        let altitude_error =
            (state.intent.target_altitude_cm - state.sensor.current_altitude_cm) * 0.01;

        let mut vertical_speed = (altitude_error - self.altitude_pid.error)
            / state.sensor.altitude_data_interval_seconds;
        vertical_speed += state.intent.descent_rate_modifier * vertical_speed;
        let filtered_vertical_speed = self.throttle_d_lpf.apply(vertical_speed);

        let throttle_adjustment = self.altitude_pid.compute(AltitudeControlData {
            altitude_error_m: altitude_error,
            filtered_vertical_speed,
            interval_s: state.sensor.altitude_data_interval_seconds,
            i_gain: f32::from(config.throttle_i),
        });

        // Compensates the thrust-vector cosine loss when tilted; with a
        // 1300 hover and 0.2 of correction this adds about 60 counts.
        let tilt_adjustment =
            (1.0 - cos_tilt_angle) * (f32::from(config.throttle_hover) - f32::from(PWM_RANGE_MIN));

        self.rescue_throttle = (f32::from(config.throttle_hover)
            + throttle_adjustment
            + tilt_adjustment)
            .clamp(
                f32::from(config.throttle_min),
                f32::from(config.throttle_max),
            );

        // Heading (yaw) controller, P only, with the attenuator ramping in
        // yaw authority after the rotate phase begins.
        let mut rescue_yaw = (state.sensor.error_angle
            * f32::from(config.yaw_p)
            * state.intent.yaw_attenuator
            * 0.1)
            .clamp(-GPS_RESCUE_MAX_YAW_RATE, GPS_RESCUE_MAX_YAW_RATE);

        // A yaw rate means the craft has drifted sideways, so roll is
        // mixed in for heading tracking, fading to none at 100 deg/s.
        let roll_mix_attenuator = (1.0 - rescue_yaw.abs() * 0.01).clamp(0.0, 1.0);
        let roll_adjustment = -rescue_yaw * f32::from(config.roll_mix) * roll_mix_attenuator;
        let roll_limit = 100.0 * state.intent.roll_angle_limit_deg;
        self.roll_angle = roll_adjustment.clamp(-roll_limit, roll_limit);

        if config.yaw_control_reversed {
            rescue_yaw = -rescue_yaw;
        }
        self.rescue_yaw = rescue_yaw;

        // Velocity (pitch) controller, evaluated only on fresh packets.
        if new_gps_data {
            let sample_interval = state.sensor.gps_data_interval_seconds * 10.0;
            let velocity_error =
                state.intent.target_velocity_cm_s - state.sensor.velocity_to_home_cm_s;

            let raw_derivative = (velocity_error - self.velocity_pid.error) / sample_interval;
            let cutoff_hz =
                state.intent.velocity_pid_cutoff * state.intent.velocity_pid_cutoff_modifier;
            self.velocity_d_lpf.update_cutoff(pt1_filter_gain(
                cutoff_hz,
                state.sensor.gps_data_interval_seconds,
            ));
            let filtered_derivative = self.velocity_d_lpf.apply(raw_derivative);

            let pitch_angle_limit = state.intent.pitch_angle_limit_deg * 100.0;
            let adjustment = self.velocity_pid.compute(VelocityControlData {
                velocity_error_cm_s: velocity_error,
                filtered_derivative,
                sample_interval,
                i_gain: f32::from(config.vel_i),
                iterm_relax: state.intent.velocity_iterm_relax,
                proximity_to_landing_area: state.intent.proximity_to_landing_area,
                integral_limit: 0.5 * pitch_angle_limit,
            });
            self.pitch_adjustment = adjustment.clamp(-pitch_angle_limit, pitch_angle_limit);
            state.intent.velocity_iterm_accumulator = self.velocity_pid.integral;
        }

        // Upsample the held pitch step to the task rate.
        self.pitch_angle = self.velocity_upsample_lpf.apply(self.pitch_adjustment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn make() -> (AttainPosition, RescueState, RescueConfig) {
        let config = RescueConfig::new();
        let attain = AttainPosition::new(&config, 0.01);
        let mut state = RescueState::default();
        state.sensor.altitude_data_interval_seconds = 0.01;
        state.sensor.gps_data_interval_seconds = 0.1;
        state.sensor.gps_rescue_task_interval_seconds = 0.01;
        (attain, state, config)
    }

    /// While idle the pilot throttle passes through and the angle offsets
    /// are zero.
    #[test]
    fn test_idle_passthrough() {
        let (mut attain, mut state, config) = make();
        state.phase = RescuePhase::Idle;

        attain.update(&mut state, &config, 1432.0, 1.0, false);
        assert!(value_close(1432.0, attain.rescue_throttle));
        assert!(value_close(0.0, attain.pitch_angle));
        assert!(value_close(0.0, attain.roll_angle));
    }

    /// Initialize clears the integrators and previous errors and arms the
    /// impact threshold.
    #[test]
    fn test_initialize_resets_integrators() {
        let (mut attain, mut state, config) = make();
        attain.altitude_pid.integral = 55.0;
        attain.velocity_pid.integral = -40.0;
        attain.velocity_pid.error = 7.0;
        state.intent.velocity_iterm_accumulator = -40.0;

        state.phase = RescuePhase::Initialize;
        attain.update(&mut state, &config, 1500.0, 1.0, false);

        assert!(value_close(0.0, attain.altitude_pid.integral));
        assert!(value_close(0.0, attain.velocity_pid.integral));
        assert!(value_close(0.0, attain.velocity_pid.error));
        assert!(value_close(0.0, state.intent.velocity_iterm_accumulator));
        assert!(value_close(3.0, state.intent.disarm_threshold));
    }

    /// The do-nothing fall commands just below hover with level angles.
    #[test]
    fn test_do_nothing_descends_below_hover() {
        let (mut attain, mut state, config) = make();
        state.phase = RescuePhase::DoNothing;

        attain.update(&mut state, &config, 1500.0, 1.0, false);
        assert!(value_close(1175.0, attain.rescue_throttle));
        assert!(value_close(0.0, attain.pitch_angle));
        assert!(value_close(0.0, attain.roll_angle));
    }

    /// With the craft on target and flat, throttle sits at hover.
    #[test]
    fn test_throttle_at_hover_when_on_target() {
        let (mut attain, mut state, config) = make();
        state.phase = RescuePhase::AttainAlt;
        state.sensor.current_altitude_cm = 2000.0;
        state.intent.target_altitude_cm = 2000.0;

        attain.update(&mut state, &config, 1500.0, 1.0, false);
        assert!(
            value_close(1275.0, attain.rescue_throttle),
            "expected hover, got {}",
            attain.rescue_throttle
        );
    }

    /// Throttle output obeys the configured clamp window.
    #[test]
    fn test_throttle_clamped_to_window() {
        let (mut attain, mut state, config) = make();
        state.phase = RescuePhase::AttainAlt;
        state.sensor.current_altitude_cm = 0.0;
        state.intent.target_altitude_cm = 100_000.0;

        attain.update(&mut state, &config, 1500.0, 1.0, false);
        assert!(
            value_close(1600.0, attain.rescue_throttle),
            "huge climb error should pin at max, got {}",
            attain.rescue_throttle
        );

        state.intent.target_altitude_cm = -100_000.0;
        attain.update(&mut state, &config, 1500.0, 1.0, false);
        assert!(
            value_close(1100.0, attain.rescue_throttle),
            "huge descend error should pin at min, got {}",
            attain.rescue_throttle
        );
    }

    /// Tilt feeds forward extra throttle proportional to the cosine loss.
    #[test]
    fn test_tilt_feed_forward() {
        let (mut attain, mut state, config) = make();
        state.phase = RescuePhase::FlyHome;
        state.sensor.current_altitude_cm = 2000.0;
        state.intent.target_altitude_cm = 2000.0;

        attain.update(&mut state, &config, 1500.0, 0.8, false);
        // (1 - 0.8) * (1275 - 1000) = 55 over hover
        assert!(
            value_close(1330.0, attain.rescue_throttle),
            "expected hover plus 55, got {}",
            attain.rescue_throttle
        );
    }

    /// Yaw authority scales with the attenuator and the error angle.
    #[test]
    fn test_yaw_rate_from_error_angle() {
        let (mut attain, mut state, config) = make();
        state.phase = RescuePhase::Rotate;
        state.sensor.error_angle = 10.0;

        state.intent.yaw_attenuator = 0.0;
        attain.update(&mut state, &config, 1500.0, 1.0, false);
        assert!(value_close(0.0, attain.rescue_yaw), "no authority before the ramp");

        state.intent.yaw_attenuator = 1.0;
        attain.update(&mut state, &config, 1500.0, 1.0, false);
        // 10 deg * 20 * 1.0 * 0.1 = 20 deg/s
        assert!(value_close(20.0, attain.rescue_yaw));
    }

    /// The commanded yaw rate saturates at 180 deg/s.
    #[test]
    fn test_yaw_rate_saturates() {
        let (mut attain, mut state, config) = make();
        state.phase = RescuePhase::Rotate;
        state.sensor.error_angle = 180.0;
        state.intent.yaw_attenuator = 1.0;

        attain.update(&mut state, &config, 1500.0, 1.0, false);
        assert!(value_close(GPS_RESCUE_MAX_YAW_RATE, attain.rescue_yaw));
    }

    /// Roll mixes against yaw and fades to zero at 100 deg/s of yaw.
    #[test]
    fn test_roll_mix_fades_with_yaw_rate() {
        let (mut attain, mut state, config) = make();
        state.phase = RescuePhase::FlyHome;
        state.intent.yaw_attenuator = 1.0;
        state.intent.roll_angle_limit_deg = 30.0;

        // 20 deg/s of yaw: attenuator 0.8, roll = -20 * 150 * 0.8 = -2400
        state.sensor.error_angle = 10.0;
        attain.update(&mut state, &config, 1500.0, 1.0, false);
        assert!(
            value_close(-2400.0, attain.roll_angle),
            "expected -2400, got {}",
            attain.roll_angle
        );

        // 100+ deg/s of yaw: no roll at all
        state.sensor.error_angle = 90.0;
        attain.update(&mut state, &config, 1500.0, 1.0, false);
        assert!(value_close(0.0, attain.roll_angle));
    }

    /// The yaw output sign follows the pilot's reversed-yaw setting; the
    /// roll mix does not.
    #[test]
    fn test_yaw_reversed_flips_yaw_only() {
        let (mut attain, mut state, mut config) = make();
        config.yaw_control_reversed = true;
        state.phase = RescuePhase::FlyHome;
        state.intent.yaw_attenuator = 1.0;
        state.intent.roll_angle_limit_deg = 30.0;
        state.sensor.error_angle = 10.0;

        attain.update(&mut state, &config, 1500.0, 1.0, false);
        assert!(value_close(-20.0, attain.rescue_yaw));
        assert!(value_close(-2400.0, attain.roll_angle));
    }

    /// Without a fresh packet the pitch step is held and only the
    /// upsample filter keeps running.
    #[test]
    fn test_pitch_held_between_gps_packets() {
        let (mut attain, mut state, config) = make();
        state.phase = RescuePhase::FlyHome;
        state.intent.pitch_angle_limit_deg = 32.0;
        state.intent.proximity_to_landing_area = 1.0;
        state.intent.velocity_iterm_relax = 1.0;
        state.intent.velocity_pid_cutoff = 0.75;
        state.intent.velocity_pid_cutoff_modifier = 1.0;
        state.intent.target_velocity_cm_s = 500.0;
        state.sensor.velocity_to_home_cm_s = 0.0;

        attain.update(&mut state, &config, 1500.0, 1.0, true);
        let held = attain.pitch_adjustment;
        assert!(held > 0.0, "positive error should pitch forward");

        let mut previous = attain.pitch_angle;
        for _ in 0..50 {
            attain.update(&mut state, &config, 1500.0, 1.0, false);
            assert!(value_close(held, attain.pitch_adjustment), "step must hold");
            assert!(attain.pitch_angle >= previous, "upsampled output must rise smoothly");
            previous = attain.pitch_angle;
        }
        assert!(
            previous <= held,
            "upsampled output approaches the held step from below"
        );
    }

    /// The velocity-loop output respects the pitch angle limit.
    #[test]
    fn test_pitch_clamped_to_angle_limit() {
        let (mut attain, mut state, config) = make();
        state.phase = RescuePhase::FlyHome;
        state.intent.pitch_angle_limit_deg = 10.0;
        state.intent.proximity_to_landing_area = 1.0;
        state.intent.velocity_iterm_relax = 1.0;
        state.intent.velocity_pid_cutoff = 0.75;
        state.intent.velocity_pid_cutoff_modifier = 1.0;
        state.intent.target_velocity_cm_s = 10_000.0;
        state.sensor.velocity_to_home_cm_s = 0.0;

        attain.update(&mut state, &config, 1500.0, 1.0, true);
        assert!(
            value_close(1000.0, attain.pitch_adjustment),
            "pitch step should clamp at 10 degrees, got {}",
            attain.pitch_adjustment
        );
    }

    /// The accumulator mirror tracks the live integral on GPS ticks.
    #[test]
    fn test_velocity_accumulator_mirrored() {
        let (mut attain, mut state, config) = make();
        state.phase = RescuePhase::FlyHome;
        state.intent.pitch_angle_limit_deg = 32.0;
        state.intent.proximity_to_landing_area = 1.0;
        state.intent.velocity_iterm_relax = 1.0;
        state.intent.velocity_pid_cutoff = 0.75;
        state.intent.velocity_pid_cutoff_modifier = 1.0;
        state.intent.target_velocity_cm_s = 300.0;

        attain.update(&mut state, &config, 1500.0, 1.0, true);
        assert!(value_close(
            attain.velocity_pid.integral,
            state.intent.velocity_iterm_accumulator
        ));
        assert!(value_not_close(0.0, state.intent.velocity_iterm_accumulator));
    }
}
