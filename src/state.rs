// src/state.rs

//! # Rescue Data Model
//!
//! The phase and failure enumerations, the sensor view and intent records,
//! the per-tick collaborator snapshot, and the outbound arming seam. All
//! mutable state lives in these records and is written only by the rescue
//! task; consumers read it through the accessors on
//! [`GpsRescue`](crate::rescue::GpsRescue).

/// Phase of the rescue state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescuePhase {
    /// No rescue active; pilot throttle passes through.
    Idle,
    /// One-tick setup when a rescue starts.
    Initialize,
    /// Climb or descend to the return altitude.
    AttainAlt,
    /// Turn to face home before moving.
    Rotate,
    /// Cruise toward home at the return groundspeed.
    FlyHome,
    /// Staged descent approaching the landing area.
    Descent,
    /// Final descent with impact detection.
    Landing,
    /// Disarm and stop.
    Abort,
    /// Terminal success state; currently never entered.
    Complete,
    /// Timed semi-controlled descent while a failure stands.
    DoNothing,
}

impl Default for RescuePhase {
    fn default() -> Self {
        RescuePhase::Idle
    }
}

/// Failure classification owned by the sanity supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No failure detected.
    Healthy,
    /// Not closing on home despite a velocity target.
    Flyaway,
    /// GPS driver reports unhealthy.
    GpsLost,
    /// Satellite count below minimum for too long.
    LowSats,
    /// Crash-flip recovery engaged during the rescue.
    CrashFlipDetected,
    /// Reserved: craft unable to progress.
    Stalled,
    /// Reserved: activation too close to home.
    TooClose,
    /// No home point was recorded at arming.
    NoHomePoint,
}

impl Default for FailureKind {
    fn default() -> Self {
        FailureKind::Healthy
    }
}

/// Reason passed to the disarm sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisarmReason {
    /// Impact detected while landing or during a timed descent.
    GpsRescue,
    /// Rescue aborted by the sanity policy.
    Failsafe,
    /// Crash-flip recovery engaged.
    CrashProtection,
}

/// Outbound arming commands, implemented by the flight-controller core.
pub trait ArmingControl {
    /// Latches the arm switch off so the craft cannot immediately re-arm.
    fn set_arming_disabled(&mut self);
    /// Disarms the craft.
    fn disarm(&mut self, reason: DisarmReason);
}

/// Conditioned sensor view, updated by ingestion each tick and read-only
/// to the controllers.
///
/// GPS-derived fields hold their last good value across packet gaps; no
/// derivative over them is recomputed on a tick without a fresh packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorData {
    /// Altitude estimate, cm, signed.
    pub current_altitude_cm: f32,
    /// Distance to home, cm, held across GPS gaps.
    pub distance_to_home_cm: f32,
    /// Distance to home, metres, held across GPS gaps.
    pub distance_to_home_m: f32,
    /// Ground speed, cm/s.
    pub ground_speed_cm_s: u16,
    /// Bearing from craft to home, degrees x 10.
    pub direction_to_home: i16,
    /// Acceleration magnitude in g, refreshed only while landing.
    pub acc_magnitude: f32,
    /// GPS driver health.
    pub healthy: bool,
    /// Heading minus bearing-to-home, degrees, normalized to (-180, 180].
    pub error_angle: f32,
    /// Magnitude of the heading error, degrees.
    pub abs_error_angle: f32,
    /// Measured GPS packet interval, seconds.
    pub gps_data_interval_seconds: f32,
    /// Measured altitude sample interval, seconds.
    pub altitude_data_interval_seconds: f32,
    /// Nominal task period, seconds.
    pub gps_rescue_task_interval_seconds: f32,
    /// Closing speed toward home from consecutive packets, cm/s.
    pub velocity_to_home_cm_s: f32,
}

/// The controller's plan: targets, limits and gain schedules, mutated by
/// the phase machine and read by the controllers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RescueIntent {
    /// Highest altitude seen this arm cycle, cm.
    pub max_altitude_cm: f32,
    /// Cruise altitude for the return leg, cm.
    pub return_altitude_cm: f32,
    /// Instantaneous altitude set point, cm.
    pub target_altitude_cm: f32,
    /// Altitude at which the landing stage begins, cm.
    pub target_landing_altitude_cm: f32,
    /// Velocity-toward-home set point, cm/s.
    pub target_velocity_cm_s: f32,
    /// Pitch authority, degrees; zero locks pitch flat.
    pub pitch_angle_limit_deg: f32,
    /// Roll authority, degrees; zero locks roll flat.
    pub roll_angle_limit_deg: f32,
    /// Distance from home at which the descent begins, metres.
    pub descent_distance_m: f32,
    /// Cumulative seconds the active sanity monitor has been failing.
    pub seconds_failing: i8,
    /// Per-tick altitude set-point step, cm.
    pub altitude_step: f32,
    /// 0..1 boost applied to the altitude D term during fast descent.
    pub descent_rate_modifier: f32,
    /// 0..1 ramp of yaw authority after entering the rotate phase.
    pub yaw_attenuator: f32,
    /// Impact detection threshold, g.
    pub disarm_threshold: f32,
    /// Mirror of the live velocity integral accumulator.
    pub velocity_iterm_accumulator: f32,
    /// Base cutoff of the velocity D filter, Hz.
    pub velocity_pid_cutoff: f32,
    /// Multiplier applied to the velocity D cutoff, phase dependent.
    pub velocity_pid_cutoff_modifier: f32,
    /// 0..1 closeness to the landing area; scales velocity, roll and the
    /// integral accumulator during the approach.
    pub proximity_to_landing_area: f32,
    /// 0..1 ramp gating velocity integral accumulation.
    pub velocity_iterm_relax: f32,
}

/// Complete controller state: phase, failure, sensor view, intent and the
/// cached availability verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct RescueState {
    /// Current phase.
    pub phase: RescuePhase,
    /// Current failure classification.
    pub failure: FailureKind,
    /// Conditioned sensor view.
    pub sensor: SensorData,
    /// Targets, limits and schedules.
    pub intent: RescueIntent,
    /// Whether a rescue could succeed right now.
    pub is_available: bool,
}

/// Snapshot of collaborator state for one tick of `update`.
///
/// The scheduler assembles this from the GPS driver, the altitude and
/// attitude estimators, the accelerometer, the RC layer and the mode
/// arbiter. GPS fields carry the driver's latest values every tick; the
/// controller only consumes them on ticks flagged by
/// [`new_gps_data`](crate::rescue::GpsRescue::new_gps_data).
#[derive(Debug, Clone, Copy)]
pub struct RescueInput {
    /// Rescue flight mode is engaged (switch or failsafe).
    pub rescue_mode_active: bool,
    /// Rescue is selected as the failsafe procedure or bound to a switch.
    pub rescue_mode_configured: bool,
    /// Craft is armed.
    pub armed: bool,

    /// GPS driver health.
    pub gps_healthy: bool,
    /// A 3D fix is held.
    pub gps_fix: bool,
    /// A home point was recorded.
    pub gps_fix_home: bool,
    /// Satellites in the solution.
    pub sat_count: u8,
    /// Ground speed, cm/s.
    pub ground_speed_cm_s: u16,
    /// Distance to home, cm.
    pub distance_to_home_cm: f32,
    /// Bearing from craft to home, degrees x 10.
    pub direction_to_home: i16,
    /// Measured GPS packet interval, seconds.
    pub gps_data_interval_seconds: f32,

    /// Altitude estimate, cm.
    pub altitude_cm: f32,
    /// Estimated heading, degrees x 10.
    pub attitude_yaw: i16,
    /// Cosine of the tilt angle; 1 when flat.
    pub cos_tilt_angle: f32,

    /// Raw accelerometer sample, device units, X/Y/Z.
    pub acc_adc: [f32; 3],
    /// Accelerometer reading equal to 1 g.
    pub acc_1g: f32,
    /// Reciprocal of `acc_1g`.
    pub acc_1g_rec: f32,

    /// Pilot throttle command, PWM counts; passed through while idle.
    pub throttle_command: f32,
    /// Receiver link is delivering signal.
    pub rx_is_receiving_signal: bool,
    /// Crash-flip recovery is engaged.
    pub crash_recovery_active: bool,
    /// A magnetometer is present and enabled.
    pub mag_available: bool,
}

impl Default for RescueInput {
    fn default() -> Self {
        Self {
            rescue_mode_active: false,
            rescue_mode_configured: true,
            armed: true,
            gps_healthy: true,
            gps_fix: true,
            gps_fix_home: true,
            sat_count: 12,
            ground_speed_cm_s: 0,
            distance_to_home_cm: 0.0,
            direction_to_home: 0,
            gps_data_interval_seconds: 0.1,
            altitude_cm: 0.0,
            attitude_yaw: 0,
            cos_tilt_angle: 1.0,
            acc_adc: [0.0, 0.0, 1.0],
            acc_1g: 1.0,
            acc_1g_rec: 1.0,
            throttle_command: 1500.0,
            rx_is_receiving_signal: true,
            crash_recovery_active: false,
            mag_available: false,
        }
    }
}
