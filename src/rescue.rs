// src/rescue.rs

//! # Rescue Phase Machine and Context
//!
//! [`GpsRescue`] owns every piece of mutable rescue state and is driven by
//! the scheduler at a fixed nominal rate. Each call to [`GpsRescue::update`]
//! runs, in order: activation handling, sensor ingestion, the availability
//! check, the phase machine, the sanity supervisor, and the controllers,
//! then clears the fresh-GPS edge flag. The supervisor runs after the
//! phase machine so its downgrades observe the phase's current choice; the
//! controllers then run on the possibly corrected phase.
//!
//! The rescue is cancelled by the mode arbiter clearing the mode flag:
//! the next update reverts to idle in a single tick, leaving integrators
//! wherever they were (the next activation re-zeroes them).

use log::{debug, warn};

use crate::config::{RescueConfig, PWM_RANGE_MAX, PWM_RANGE_MIN};
use crate::controllers::AttainPosition;
use crate::sanity::{perform_sanity_checks, AvailabilityMonitor, SanityState};
use crate::sensor::{sensor_update, IngestionState};
use crate::state::{
    ArmingControl, DisarmReason, FailureKind, RescueInput, RescuePhase, RescueState,
};
use crate::time::{hz_to_interval, Clock};

/// Nominal rate the scheduler drives [`GpsRescue::update`] at, Hz.
pub const GPS_RESCUE_TASK_RATE_HZ: f32 = 100.0;

/// Shortest descent distance the controller will plan, metres.
pub const GPS_RESCUE_MIN_DESCENT_DIST_M: f32 = 5.0;

/// The GPS rescue controller.
///
/// Construct once at boot with the validated configuration and the
/// monotonic microsecond clock, notify it of fresh GPS packets with
/// [`new_gps_data`](Self::new_gps_data), and call
/// [`update`](Self::update) from the scheduler every tick, rescue active
/// or not. Outputs are read through the accessors; the angle offsets and
/// the yaw/throttle commands are only meaningful while a rescue is
/// active, with idle passthrough behavior otherwise.
pub struct GpsRescue<C: Clock> {
    config: RescueConfig,
    clock: C,
    state: RescueState,
    attain: AttainPosition,
    sanity: SanityState,
    availability: AvailabilityMonitor,
    ingest: IngestionState,
    new_gps_data: bool,
    mag_force_disable: bool,
    initial_altitude_low: bool,
    initial_velocity_low: bool,
    rescue_configured: bool,
    home_fix: bool,
}

impl<C: Clock> GpsRescue<C> {
    /// Builds the controller and conditions its filters from the
    /// configured cutoffs.
    pub fn new(config: RescueConfig, clock: C) -> Self {
        let task_interval_s = hz_to_interval(GPS_RESCUE_TASK_RATE_HZ);

        let mut state = RescueState::default();
        state.sensor.gps_rescue_task_interval_seconds = task_interval_s;
        state.intent.velocity_pid_cutoff = f32::from(config.pitch_cutoff_hz) / 100.0;
        state.intent.velocity_pid_cutoff_modifier = 1.0;

        let attain = AttainPosition::new(&config, task_interval_s);

        Self {
            config,
            clock,
            state,
            attain,
            sanity: SanityState::default(),
            availability: AvailabilityMonitor::default(),
            ingest: IngestionState::default(),
            new_gps_data: false,
            mag_force_disable: false,
            initial_altitude_low: true,
            initial_velocity_low: true,
            rescue_configured: false,
            home_fix: false,
        }
    }

    /// Flags that a fresh GPS packet has arrived since the last tick.
    /// Called from the GPS driver; consumed and cleared by `update`.
    pub fn new_gps_data(&mut self) {
        self.new_gps_data = true;
    }

    /// Runs one tick of the rescue task. Always called, rescue active or
    /// not; the idle phase keeps the return altitude and descent distance
    /// current so a rescue can start with valid targets.
    pub fn update(&mut self, input: &RescueInput, arming: &mut impl ArmingControl) {
        let now_us = self.clock.now_us();

        if !input.rescue_mode_active {
            // Idle tasks still run; this only drops the phase.
            self.stop();
        } else if self.state.phase == RescuePhase::Idle {
            self.start();
            // Seed controller and supervisor baselines; sensor data is
            // not reliable yet on this first pass.
            self.attain.update(
                &mut self.state,
                &self.config,
                input.throttle_command,
                input.cos_tilt_angle,
                self.new_gps_data,
            );
            perform_sanity_checks(
                &mut self.state,
                &mut self.sanity,
                &mut self.mag_force_disable,
                &self.config,
                input,
                now_us,
                arming,
            );
        }

        sensor_update(
            &mut self.state,
            &mut self.ingest,
            input,
            self.new_gps_data,
            now_us,
        );

        self.state.is_available = self.availability.check(input, now_us);

        match self.state.phase {
            RescuePhase::Idle => self.set_return_altitude(input),

            RescuePhase::Initialize => {
                self.state.intent.target_landing_altitude_cm =
                    100.0 * f32::from(self.config.target_landing_altitude_m);
                if !input.gps_fix_home {
                    // No home point recorded at arming. The supervisor
                    // turns this into a disarm, delayed if switch induced;
                    // dropping back to idle instead could mean a flyaway.
                    warn!("rescue started without a home point");
                    self.state.failure = FailureKind::NoHomePoint;
                } else if self.state.sensor.distance_to_home_m
                    < f32::from(self.config.min_rescue_dth)
                {
                    if self.state.sensor.distance_to_home_m < 5.0
                        && self.state.sensor.current_altitude_cm
                            < self.state.intent.target_landing_altitude_cm
                    {
                        // Activated within 5 m of home and on the ground:
                        // instant disarm rather than spinning up beside
                        // the pilot.
                        self.state.phase = RescuePhase::Abort;
                    } else {
                        // Inside the minimum activation distance at any
                        // height: straight down from here.
                        self.enter_close_range_landing();
                    }
                } else {
                    self.enter_attain_alt();
                }
            }

            RescuePhase::AttainAlt => {
                // Step the target until the craft reaches the return
                // altitude. The target may run ahead of a lagging craft;
                // the supervisor aborts if the climb stays blocked.
                let step_rate = if self.initial_altitude_low {
                    f32::from(self.config.ascend_rate)
                } else {
                    -f32::from(self.config.descend_rate)
                };
                let intent = &mut self.state.intent;
                intent.altitude_step =
                    step_rate * self.state.sensor.gps_rescue_task_interval_seconds;

                let current_altitude_low =
                    self.state.sensor.current_altitude_cm < intent.return_altitude_cm;
                if self.initial_altitude_low == current_altitude_low {
                    intent.target_altitude_cm += intent.altitude_step;
                } else {
                    intent.target_altitude_cm = intent.return_altitude_cm;
                    intent.altitude_step = 0.0;
                    debug!("return altitude reached, rotating to home");
                    self.state.phase = RescuePhase::Rotate;
                }

                // Tracking the measured closing speed keeps the velocity
                // P and I terms free of drift-induced error before the
                // return leg begins.
                self.state.intent.target_velocity_cm_s =
                    self.state.sensor.velocity_to_home_cm_s;
            }

            RescuePhase::Rotate => {
                let intent = &mut self.state.intent;
                if intent.yaw_attenuator < 1.0 {
                    // yaw authority comes in over one second
                    intent.yaw_attenuator = (intent.yaw_attenuator
                        + self.state.sensor.gps_rescue_task_interval_seconds)
                        .min(1.0);
                }
                if self.state.sensor.abs_error_angle < 30.0 {
                    intent.pitch_angle_limit_deg = f32::from(self.config.max_rescue_angle);
                    intent.seconds_failing = 0;
                    intent.proximity_to_landing_area = 1.0;
                    debug!("heading acquired, flying home");
                    self.state.phase = RescuePhase::FlyHome;
                }
                self.initial_velocity_low = self.state.sensor.velocity_to_home_cm_s
                    < f32::from(self.config.rescue_groundspeed);
                self.state.intent.target_velocity_cm_s =
                    self.state.sensor.velocity_to_home_cm_s;
            }

            RescuePhase::FlyHome => {
                let task_interval = self.state.sensor.gps_rescue_task_interval_seconds;
                let intent = &mut self.state.intent;
                if intent.yaw_attenuator < 1.0 {
                    intent.yaw_attenuator = (intent.yaw_attenuator + task_interval).min(1.0);
                }

                // Glide the velocity target toward the return groundspeed
                // with a one second time constant, one-sided so crossing
                // the target does not oscillate.
                let groundspeed = f32::from(self.config.rescue_groundspeed);
                let target_velocity_error = groundspeed - intent.target_velocity_cm_s;
                let velocity_target_step = task_interval * target_velocity_error;
                let target_velocity_is_low = intent.target_velocity_cm_s < groundspeed;
                if self.initial_velocity_low == target_velocity_is_low {
                    intent.target_velocity_cm_s += velocity_target_step;
                }

                // Integral accumulation ramps in with a two second time
                // constant; GPS velocity lags badly at the start.
                intent.velocity_iterm_relax +=
                    0.5 * task_interval * (1.0 - intent.velocity_iterm_relax);

                // Stiffer D early for accuracy, smoother later.
                intent.velocity_pid_cutoff_modifier = 2.0 - intent.velocity_iterm_relax;

                // Roll capability grows to half the pitch authority.
                intent.roll_angle_limit_deg = 0.5
                    * intent.velocity_iterm_relax
                    * f32::from(self.config.max_rescue_angle);

                if self.new_gps_data
                    && self.state.sensor.distance_to_home_m <= intent.descent_distance_m
                {
                    intent.seconds_failing = 0;
                    debug!("descent distance reached");
                    self.state.phase = RescuePhase::Descent;
                }
            }

            RescuePhase::Descent => {
                if self.state.sensor.current_altitude_cm
                    < self.state.intent.target_landing_altitude_cm
                {
                    self.state.intent.seconds_failing = 0;
                    debug!("landing altitude reached");
                    self.state.phase = RescuePhase::Landing;
                }
                self.descend();
            }

            RescuePhase::Landing => {
                self.descend();
                self.disarm_on_impact(arming);
            }

            RescuePhase::Complete => self.stop(),

            RescuePhase::Abort => {
                warn!("rescue aborted, disarming");
                arming.set_arming_disabled();
                arming.disarm(DisarmReason::Failsafe);
                self.state.intent.seconds_failing = 0;
                self.stop();
            }

            RescuePhase::DoNothing => self.disarm_on_impact(arming),
        }

        perform_sanity_checks(
            &mut self.state,
            &mut self.sanity,
            &mut self.mag_force_disable,
            &self.config,
            input,
            now_us,
            arming,
        );

        self.attain.update(
            &mut self.state,
            &self.config,
            input.throttle_command,
            input.cos_tilt_angle,
            self.new_gps_data,
        );

        self.rescue_configured = input.rescue_mode_configured;
        self.home_fix = input.gps_fix_home;
        self.new_gps_data = false;
    }

    fn start(&mut self) {
        debug!("rescue starting");
        self.state.phase = RescuePhase::Initialize;
    }

    fn stop(&mut self) {
        self.state.phase = RescuePhase::Idle;
    }

    /// Idle housekeeping: track the highest altitude this arm cycle and
    /// keep the return altitude and descent distance current so a rescue
    /// starts with valid targets.
    fn set_return_altitude(&mut self, input: &RescueInput) {
        let intent = &mut self.state.intent;

        if !input.armed && !self.config.gps_set_home_point_once {
            intent.max_altitude_cm = 0.0;
            return;
        }

        intent.max_altitude_cm = self.state.sensor.current_altitude_cm.max(intent.max_altitude_cm);

        if self.new_gps_data {
            // Seed the target at current altitude so the altitude D term
            // sees no step on the first active tick.
            intent.target_altitude_cm = self.state.sensor.current_altitude_cm;

            intent.descent_distance_m = self.state.sensor.distance_to_home_m.clamp(
                GPS_RESCUE_MIN_DESCENT_DIST_M,
                f32::from(self.config.descent_distance_m),
            );

            let initial_altitude_cm = f32::from(self.config.initial_altitude_m) * 100.0;
            let rescue_altitude_buffer_cm =
                f32::from(self.config.rescue_altitude_buffer_m) * 100.0;
            intent.return_altitude_cm = match self.config.altitude_mode {
                crate::config::AltitudeMode::Fixed => initial_altitude_cm,
                crate::config::AltitudeMode::Current => {
                    self.state.sensor.current_altitude_cm + rescue_altitude_buffer_cm
                }
                crate::config::AltitudeMode::Max => {
                    intent.max_altitude_cm + rescue_altitude_buffer_cm
                }
            };
        }
    }

    /// Entry into the climb toward the return altitude: authority and
    /// schedules zeroed, direction of the climb captured.
    fn enter_attain_alt(&mut self) {
        let intent = &mut self.state.intent;
        intent.seconds_failing = 0;
        self.initial_altitude_low =
            self.state.sensor.current_altitude_cm < intent.return_altitude_cm;
        intent.yaw_attenuator = 0.0;
        intent.target_velocity_cm_s = self.state.sensor.velocity_to_home_cm_s;
        intent.pitch_angle_limit_deg = 0.0;
        intent.roll_angle_limit_deg = 0.0;
        intent.altitude_step = 0.0;
        intent.descent_rate_modifier = 0.0;
        intent.velocity_pid_cutoff_modifier = 1.0;
        intent.proximity_to_landing_area = 0.0;
        intent.velocity_iterm_relax = 0.0;
        debug!("climbing to return altitude");
        self.state.phase = RescuePhase::AttainAlt;
    }

    /// Entry into the pure vertical landing used when the rescue starts
    /// inside the minimum activation distance: flat angles, zero forward
    /// velocity, descent from the current altitude.
    fn enter_close_range_landing(&mut self) {
        let intent = &mut self.state.intent;
        intent.altitude_step = -self.state.sensor.altitude_data_interval_seconds
            * f32::from(self.config.descend_rate);
        intent.target_velocity_cm_s = 0.0;
        intent.pitch_angle_limit_deg = 0.0;
        intent.roll_angle_limit_deg = 0.0;
        intent.proximity_to_landing_area = 0.0;
        intent.target_altitude_cm =
            self.state.sensor.current_altitude_cm + intent.altitude_step;
        debug!("close to home, landing in place");
        self.state.phase = RescuePhase::Landing;
    }

    /// Staged descent toward the landing area, run every tick during the
    /// descent and landing phases.
    fn descend(&mut self) {
        let intent = &mut self.state.intent;

        if self.new_gps_data {
            // Home is treated as a circle of half the landing height so
            // the approach cannot overshoot the home point.
            let distance_to_landing_area_m =
                self.state.sensor.distance_to_home_m - intent.target_landing_altitude_cm / 200.0;
            intent.proximity_to_landing_area =
                (distance_to_landing_area_m / intent.descent_distance_m).clamp(0.0, 1.0);

            // 1.5 when the descent starts, 2.5 when nearly landed.
            intent.velocity_pid_cutoff_modifier = 2.5 - intent.proximity_to_landing_area;

            // Velocity and roll capability shrink with proximity, both
            // zero within the final stretch.
            intent.target_velocity_cm_s =
                f32::from(self.config.rescue_groundspeed) * intent.proximity_to_landing_area;
            intent.roll_angle_limit_deg =
                f32::from(self.config.max_rescue_angle) * intent.proximity_to_landing_area;
        }

        intent.altitude_step = -self.state.sensor.altitude_data_interval_seconds
            * f32::from(self.config.descend_rate);

        // Gentler when the return altitude is under 20 m.
        let descent_attenuator = intent.return_altitude_cm / 2000.0;
        if descent_attenuator < 1.0 {
            intent.altitude_step *= descent_attenuator;
        }

        // Faster from height: up to 3x the configured rate above 50 m.
        intent.descent_rate_modifier = (intent.target_altitude_cm / 5000.0).clamp(0.0, 1.0);
        intent.target_altitude_cm +=
            intent.altitude_step * (1.0 + 2.0 * intent.descent_rate_modifier);
    }

    /// Impact detection while landing or falling: a spike of acceleration
    /// above the configured threshold disarms on the spot.
    fn disarm_on_impact(&mut self, arming: &mut impl ArmingControl) {
        if self.state.sensor.acc_magnitude > self.state.intent.disarm_threshold {
            warn!("impact detected, disarming");
            arming.set_arming_disabled();
            arming.disarm(DisarmReason::GpsRescue);
            self.stop();
        }
    }

    /// Commanded yaw rate, deg/s.
    pub fn yaw_rate(&self) -> f32 {
        self.attain.rescue_yaw
    }

    /// Commanded throttle rescaled from the PWM command domain to 0..1
    /// for the mixer. The pilot's receiver floor is honored so the scale
    /// matches what the raw stick command would produce.
    pub fn throttle(&self) -> f32 {
        let throttle_min = f32::from(self.config.rx_min_check.max(PWM_RANGE_MIN));
        scale_range(
            self.attain.rescue_throttle,
            throttle_min,
            f32::from(PWM_RANGE_MAX),
            0.0,
            1.0,
        )
        .clamp(0.0, 1.0)
    }

    /// Pitch and roll angle offsets for the angle-mode stack, degrees x
    /// 100.
    pub fn angles(&self) -> (f32, f32) {
        (self.attain.pitch_angle, self.attain.roll_angle)
    }

    /// Read access to the full controller state, for telemetry and OSD.
    pub fn state(&self) -> &RescueState {
        &self.state
    }

    /// Whether a rescue could plausibly succeed right now; feeds the OSD
    /// warning whether or not a rescue is active.
    pub fn is_available(&self) -> bool {
        self.state.is_available
    }

    /// Whether the arbiter reports a rescue is configured at all, as a
    /// failsafe procedure or on a switch.
    pub fn is_configured(&self) -> bool {
        self.rescue_configured
    }

    /// Whether the rescue cannot run because no home point is recorded.
    pub fn is_disabled(&self) -> bool {
        !self.home_fix
    }

    /// Whether the attitude estimator should leave the magnetometer out
    /// of the heading solution: either the pilot configured it off or the
    /// supervisor force-disabled it, while a rescue is in progress.
    pub fn disable_mag(&self) -> bool {
        (!self.config.use_mag || self.mag_force_disable)
            && matches!(
                self.state.phase,
                RescuePhase::Initialize
                    | RescuePhase::AttainAlt
                    | RescuePhase::Rotate
                    | RescuePhase::FlyHome
                    | RescuePhase::Descent
                    | RescuePhase::Landing
            )
    }
}

/// Linear rescale of `x` from one range to another.
fn scale_range(x: f32, src_min: f32, src_max: f32, dest_min: f32, dest_max: f32) -> f32 {
    let a = (dest_max - dest_min) * (x - src_min);
    let b = src_max - src_min;
    a / b + dest_min
}
