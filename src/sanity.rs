// src/sanity.rs

//! # Sanity Supervisor
//!
//! Cascaded monitors that decide whether the rescue is still believable:
//! flyaway detection while flying home, satellite-count watching, stuck
//! climb/descent detection, and the budget on the do-nothing fall. The
//! supervisor is the single owner of failure classification; escalation is
//! driven by the configured [`SanityCheckMode`](crate::config::SanityCheckMode)
//! policy. It runs every tick but gates the slow monitors to 1 Hz on the
//! injected clock. The availability monitor lives here too; it feeds the
//! "rescue not available" warning regardless of whether a rescue is active.

use log::warn;

use crate::config::{RescueConfig, GPS_MIN_SAT_COUNT};
use crate::state::{ArmingControl, DisarmReason, FailureKind, RescueInput, RescuePhase, RescueState};
use crate::time::{cmp_time_us, TimeUs};

/// Supervisor state carried between ticks.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SanityState {
    previous_time_us: TimeUs,
    prev_altitude_cm: f32,
    prev_target_altitude_cm: f32,
    previous_distance_to_home_cm: f32,
    seconds_low_sats: i8,
    seconds_doing_nothing: i8,
}

/// Runs the supervisor for one tick.
///
/// Escalation happens before this tick's classification, so a failure
/// raised here is acted on at the next call; the phase machine and the
/// controllers in between observe the downgraded phase.
pub(crate) fn perform_sanity_checks(
    state: &mut RescueState,
    sanity: &mut SanityState,
    mag_force_disable: &mut bool,
    config: &RescueConfig,
    input: &RescueInput,
    now_us: TimeUs,
    arming: &mut impl ArmingControl,
) {
    if state.phase == RescuePhase::Idle {
        state.failure = FailureKind::Healthy;
        return;
    } else if state.phase == RescuePhase::Initialize {
        // fresh baselines each time a rescue starts
        sanity.previous_time_us = now_us;
        sanity.prev_altitude_cm = state.sensor.current_altitude_cm;
        sanity.prev_target_altitude_cm = state.intent.target_altitude_cm;
        sanity.previous_distance_to_home_cm = state.sensor.distance_to_home_cm;
        sanity.seconds_low_sats = 0;
        sanity.seconds_doing_nothing = 0;
    }

    // Disarm via Abort when the policy says so, or for hard receiver loss
    // in failsafe-only mode. Otherwise allow a 20 s semi-controlled
    // descent with impact detection.
    let hard_failsafe = !input.rx_is_receiving_signal;

    if state.failure != FailureKind::Healthy {
        state.phase = RescuePhase::DoNothing;

        match config.sanity_checks {
            crate::config::SanityCheckMode::On => {
                state.phase = RescuePhase::Abort;
            }
            crate::config::SanityCheckMode::FsOnly => {
                if hard_failsafe {
                    state.phase = RescuePhase::Abort;
                }
            }
            crate::config::SanityCheckMode::Off => {
                // Even with checks off: armed without a home fix and with
                // no control link leaves nothing to recover to.
                if config.allow_arming_without_fix && !input.gps_fix_home && hard_failsafe {
                    state.phase = RescuePhase::Abort;
                }
            }
        }
    }

    // Crash detection stays armed in all rescues.
    if input.crash_recovery_active {
        warn!("crash flip detected during rescue, disarming");
        arming.set_arming_disabled();
        arming.disarm(DisarmReason::CrashProtection);
        state.phase = RescuePhase::Idle;
    }

    if !state.sensor.healthy && state.failure != FailureKind::GpsLost {
        warn!("gps driver unhealthy during rescue");
        state.failure = FailureKind::GpsLost;
    }

    // The slow monitors run at 1 Hz.
    let d_time = cmp_time_us(now_us, sanity.previous_time_us);
    if d_time < 1_000_000 {
        return;
    }
    sanity.previous_time_us = now_us;

    // Closing on home is judged from the raw distance delta because the
    // conditioned closing speed holds its last good value when GPS packets
    // stop, which is exactly the case this monitor must catch.
    if state.phase == RescuePhase::FlyHome {
        let velocity_to_home_cm_s =
            sanity.previous_distance_to_home_cm - state.sensor.distance_to_home_cm;
        sanity.previous_distance_to_home_cm = state.sensor.distance_to_home_cm;

        state.intent.seconds_failing +=
            if velocity_to_home_cm_s < 0.5 * state.intent.target_velocity_cm_s {
                1
            } else {
                -1
            };
        state.intent.seconds_failing = state.intent.seconds_failing.clamp(0, 15);
        if state.intent.seconds_failing == 15 {
            if input.mag_available && config.use_mag && !*mag_force_disable {
                // One retry with the magnetometer out of the heading loop;
                // a miscalibrated compass flies the craft away from home.
                warn!("not closing on home, retrying with magnetometer disabled");
                *mag_force_disable = true;
                state.intent.seconds_failing = 0;
            } else {
                warn!("not closing on home, flyaway");
                state.failure = FailureKind::Flyaway;
            }
        }
    }

    sanity.seconds_low_sats += if !input.gps_fix || input.sat_count < GPS_MIN_SAT_COUNT {
        1
    } else {
        -1
    };
    sanity.seconds_low_sats = sanity.seconds_low_sats.clamp(0, 10);
    if sanity.seconds_low_sats == 10 {
        warn!("satellite count low for 10 s");
        state.failure = FailureKind::LowSats;
    }

    // Stuck-altitude checks ignore the sanity mode and apply in every
    // rescue, to handle a craft pinned in a climb or descent.
    let actual_altitude_change = state.sensor.current_altitude_cm - sanity.prev_altitude_cm;
    let target_altitude_change = state.intent.target_altitude_cm - sanity.prev_target_altitude_cm;
    let ratio = actual_altitude_change / target_altitude_change;
    sanity.prev_altitude_cm = state.sensor.current_altitude_cm;
    sanity.prev_target_altitude_cm = state.intent.target_altitude_cm;

    match state.phase {
        RescuePhase::Landing => {
            state.intent.seconds_failing += if ratio > 0.5 { -1 } else { 1 };
            state.intent.seconds_failing = state.intent.seconds_failing.clamp(0, 10);
            if state.intent.seconds_failing == 10 {
                // landing should not take more than 10 s
                state.phase = RescuePhase::Abort;
            }
        }
        RescuePhase::AttainAlt | RescuePhase::Descent => {
            state.intent.seconds_failing += if ratio > 0.5 { -1 } else { 1 };
            state.intent.seconds_failing = state.intent.seconds_failing.clamp(0, 10);
            if state.intent.seconds_failing == 10 {
                // blocked climb or crawl of a descent: drop to landing
                // with impact detection and its own 10 s budget
                state.phase = RescuePhase::Landing;
                state.intent.seconds_failing = 0;
            }
        }
        RescuePhase::DoNothing => {
            sanity.seconds_doing_nothing = (sanity.seconds_doing_nothing + 1).min(20);
            if sanity.seconds_doing_nothing == 20 {
                state.phase = RescuePhase::Abort;
            }
        }
        _ => {}
    }
}

/// Availability monitor behind the "rescue not available" OSD warning.
///
/// Arming already requires the minimum satellite count, so the latches
/// flag the case where a craft that had a good solution has since lost it
/// and a rescue would likely fail. Distance from home is deliberately not
/// considered.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AvailabilityMonitor {
    previous_time_us: TimeUs,
    seconds_low_sats: i8,
    lowsats: bool,
    no_gps_fix: bool,
}

impl AvailabilityMonitor {
    /// Returns whether a rescue could plausibly succeed right now. The
    /// latches refresh at 1 Hz; between refreshes the cached verdict is
    /// returned.
    pub(crate) fn check(&mut self, input: &RescueInput, now_us: TimeUs) -> bool {
        if !input.gps_healthy || !input.gps_fix_home {
            return false;
        }

        let d_time = cmp_time_us(now_us, self.previous_time_us);
        if d_time < 1_000_000 {
            return !(self.no_gps_fix || self.lowsats);
        }
        self.previous_time_us = now_us;

        let mut result = true;

        if !input.gps_fix {
            result = false;
            self.no_gps_fix = true;
        } else {
            self.no_gps_fix = false;
        }

        self.seconds_low_sats = (self.seconds_low_sats
            + if input.sat_count < GPS_MIN_SAT_COUNT { 1 } else { -1 })
        .clamp(0, 2);
        if self.seconds_low_sats == 2 {
            self.lowsats = true;
            result = false;
        } else {
            self.lowsats = false;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SanityCheckMode;
    use crate::test_utils::*;

    const SECOND: TimeUs = 1_000_000;

    struct Harness {
        state: RescueState,
        sanity: SanityState,
        mag_force_disable: bool,
        config: RescueConfig,
        input: RescueInput,
        arming: RecordingArming,
        now_us: TimeUs,
    }

    impl Harness {
        fn new(phase: RescuePhase) -> Self {
            let mut state = RescueState::default();
            state.phase = phase;
            state.sensor.healthy = true;
            Self {
                state,
                sanity: SanityState::default(),
                mag_force_disable: false,
                config: RescueConfig::new(),
                input: RescueInput::default(),
                arming: RecordingArming::default(),
                now_us: 10_000,
            }
        }

        fn tick(&mut self) {
            perform_sanity_checks(
                &mut self.state,
                &mut self.sanity,
                &mut self.mag_force_disable,
                &self.config,
                &self.input,
                self.now_us,
                &mut self.arming,
            );
        }

        fn tick_after_second(&mut self) {
            self.now_us = self.now_us.wrapping_add(SECOND);
            self.tick();
        }
    }

    /// Idle resets any standing failure.
    #[test]
    fn test_idle_resets_failure() {
        let mut h = Harness::new(RescuePhase::Idle);
        h.state.failure = FailureKind::GpsLost;
        h.tick();
        assert_eq!(FailureKind::Healthy, h.state.failure);
    }

    /// Policy On escalates any failure to Abort.
    #[test]
    fn test_sanity_on_aborts_on_failure() {
        let mut h = Harness::new(RescuePhase::FlyHome);
        h.config.sanity_checks = SanityCheckMode::On;
        h.state.failure = FailureKind::LowSats;
        h.tick();
        assert_eq!(RescuePhase::Abort, h.state.phase);
    }

    /// Policy FsOnly downgrades to DoNothing while the link is up and
    /// aborts once it drops.
    #[test]
    fn test_sanity_fs_only_aborts_only_without_link() {
        let mut h = Harness::new(RescuePhase::FlyHome);
        h.config.sanity_checks = SanityCheckMode::FsOnly;
        h.state.failure = FailureKind::LowSats;
        h.tick();
        assert_eq!(RescuePhase::DoNothing, h.state.phase);

        h.input.rx_is_receiving_signal = false;
        h.tick();
        assert_eq!(RescuePhase::Abort, h.state.phase);
    }

    /// Policy Off still aborts for armed-without-fix, no home, no link.
    #[test]
    fn test_sanity_off_override_aborts() {
        let mut h = Harness::new(RescuePhase::FlyHome);
        h.config.sanity_checks = SanityCheckMode::Off;
        h.config.allow_arming_without_fix = true;
        h.state.failure = FailureKind::GpsLost;
        h.input.gps_fix_home = false;
        h.input.rx_is_receiving_signal = false;
        h.tick();
        assert_eq!(RescuePhase::Abort, h.state.phase);
    }

    /// A crash flip disarms immediately and stops the rescue.
    #[test]
    fn test_crash_flip_disarms() {
        let mut h = Harness::new(RescuePhase::FlyHome);
        h.input.crash_recovery_active = true;
        h.tick();
        assert!(h.arming.arming_disabled);
        assert_eq!(Some(DisarmReason::CrashProtection), h.arming.disarmed);
        assert_eq!(RescuePhase::Idle, h.state.phase);
    }

    /// An unhealthy GPS driver classifies as GpsLost.
    #[test]
    fn test_gps_unhealthy_classifies() {
        let mut h = Harness::new(RescuePhase::FlyHome);
        h.state.sensor.healthy = false;
        h.tick();
        assert_eq!(FailureKind::GpsLost, h.state.failure);
    }

    /// Not closing on home for 15 cumulative seconds is a flyaway.
    #[test]
    fn test_flyaway_detection_saturates() {
        let mut h = Harness::new(RescuePhase::FlyHome);
        h.state.intent.target_velocity_cm_s = 1000.0;
        h.state.sensor.distance_to_home_cm = 100_000.0;

        for _ in 0..15 {
            h.tick_after_second();
        }
        assert_eq!(FailureKind::Flyaway, h.state.failure);
        assert_eq!(15, h.state.intent.seconds_failing);
    }

    /// Closing well on home counts the failure budget back down.
    #[test]
    fn test_flyaway_counter_recovers() {
        let mut h = Harness::new(RescuePhase::FlyHome);
        h.state.intent.target_velocity_cm_s = 1000.0;
        h.state.sensor.distance_to_home_cm = 100_000.0;
        h.tick_after_second();
        h.tick_after_second();
        assert_eq!(2, h.state.intent.seconds_failing);

        // now closing at 1000 cm per second
        for _ in 0..3 {
            h.state.sensor.distance_to_home_cm -= 1000.0;
            h.tick_after_second();
        }
        assert_eq!(0, h.state.intent.seconds_failing);
        assert_eq!(FailureKind::Healthy, h.state.failure);
    }

    /// With a usable magnetometer the first saturation disables it and
    /// resets the budget instead of failing; the second saturation fails.
    #[test]
    fn test_flyaway_mag_retry_is_one_shot() {
        let mut h = Harness::new(RescuePhase::FlyHome);
        h.input.mag_available = true;
        h.state.intent.target_velocity_cm_s = 1000.0;
        h.state.sensor.distance_to_home_cm = 100_000.0;

        for _ in 0..15 {
            h.tick_after_second();
        }
        assert!(h.mag_force_disable);
        assert_eq!(FailureKind::Healthy, h.state.failure);
        assert_eq!(0, h.state.intent.seconds_failing);

        for _ in 0..15 {
            h.tick_after_second();
        }
        assert_eq!(FailureKind::Flyaway, h.state.failure);
    }

    /// Ten seconds below the minimum satellite count raises LowSats.
    #[test]
    fn test_low_sats_detection() {
        let mut h = Harness::new(RescuePhase::FlyHome);
        h.input.sat_count = GPS_MIN_SAT_COUNT - 1;
        for _ in 0..10 {
            h.tick_after_second();
        }
        assert_eq!(FailureKind::LowSats, h.state.failure);
    }

    /// A blocked climb downgrades to Landing with a fresh budget.
    #[test]
    fn test_stuck_climb_downgrades_to_landing() {
        let mut h = Harness::new(RescuePhase::AttainAlt);
        // target climbs 100 cm per second, craft does not move
        for _ in 0..10 {
            h.state.intent.target_altitude_cm += 100.0;
            h.tick_after_second();
        }
        assert_eq!(RescuePhase::Landing, h.state.phase);
        assert_eq!(0, h.state.intent.seconds_failing);
    }

    /// A blocked landing aborts after its 10 s budget.
    #[test]
    fn test_stuck_landing_aborts() {
        let mut h = Harness::new(RescuePhase::Landing);
        for _ in 0..10 {
            h.state.intent.target_altitude_cm -= 100.0;
            h.tick_after_second();
        }
        assert_eq!(RescuePhase::Abort, h.state.phase);
    }

    /// A healthy descent keeps the landing budget at zero.
    #[test]
    fn test_tracking_descent_keeps_budget() {
        let mut h = Harness::new(RescuePhase::Landing);
        for _ in 0..10 {
            h.state.intent.target_altitude_cm -= 100.0;
            h.state.sensor.current_altitude_cm -= 90.0;
            h.tick_after_second();
        }
        assert_eq!(RescuePhase::Landing, h.state.phase);
        assert_eq!(0, h.state.intent.seconds_failing);
    }

    /// Twenty seconds of doing nothing aborts.
    #[test]
    fn test_do_nothing_budget_aborts() {
        let mut h = Harness::new(RescuePhase::DoNothing);
        for _ in 0..20 {
            h.tick_after_second();
        }
        assert_eq!(RescuePhase::Abort, h.state.phase);
    }

    /// Availability is false straight away without health or home.
    #[test]
    fn test_availability_requires_health_and_home() {
        let mut monitor = AvailabilityMonitor::default();
        let mut input = RescueInput::default();

        input.gps_healthy = false;
        assert!(!monitor.check(&input, 10_000));

        input.gps_healthy = true;
        input.gps_fix_home = false;
        assert!(!monitor.check(&input, 20_000));
    }

    /// Losing the 3D fix latches unavailability at the next 1 Hz refresh
    /// and the latch clears when the fix returns.
    #[test]
    fn test_availability_fix_latch() {
        let mut monitor = AvailabilityMonitor::default();
        let mut input = RescueInput::default();
        let mut now = SECOND;

        assert!(monitor.check(&input, now));

        input.gps_fix = false;
        now += SECOND;
        assert!(!monitor.check(&input, now));
        // cached verdict between refreshes
        assert!(!monitor.check(&input, now + 1000));

        input.gps_fix = true;
        now += SECOND;
        assert!(monitor.check(&input, now));
    }

    /// Two seconds of low satellite count latch unavailability.
    #[test]
    fn test_availability_low_sats_latch() {
        let mut monitor = AvailabilityMonitor::default();
        let mut input = RescueInput::default();
        input.sat_count = GPS_MIN_SAT_COUNT - 1;
        let mut now = SECOND;

        assert!(monitor.check(&input, now));
        now += SECOND;
        assert!(!monitor.check(&input, now), "second low second should latch");

        input.sat_count = 12;
        now += SECOND;
        // counter back to 1, latch clears
        assert!(monitor.check(&input, now));
    }
}
