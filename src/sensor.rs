// src/sensor.rs

//! # Sensor Ingestion
//!
//! Per-tick conditioning of the collaborator inputs into the
//! [`SensorData`](crate::state::SensorData) view. Altitude and heading
//! update every tick; the GPS-derived quantities refresh only on ticks
//! with a fresh packet and hold their last good value otherwise.

use micromath::F32Ext;

use crate::state::{RescueInput, RescuePhase, RescueState};
use crate::time::TimeUs;

/// Ingestion state carried between ticks.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IngestionState {
    /// Distance at the previous fresh packet; zero before the first one,
    /// which makes the very first closing-speed sample meaningless.
    prev_distance_to_home_cm: f32,
    previous_altitude_time_us: TimeUs,
}

/// Conditions one tick of sensor input into the state's sensor view.
pub(crate) fn sensor_update(
    state: &mut RescueState,
    ingest: &mut IngestionState,
    input: &RescueInput,
    new_gps_data: bool,
    now_us: TimeUs,
) {
    let altitude_interval_us = crate::time::cmp_time_us(now_us, ingest.previous_altitude_time_us);
    state.sensor.altitude_data_interval_seconds = altitude_interval_us as f32 * 0.000_001;
    ingest.previous_altitude_time_us = now_us;

    state.sensor.current_altitude_cm = input.altitude_cm;
    state.sensor.healthy = input.gps_healthy;

    if state.phase == RescuePhase::Landing {
        // Sampled at task rate, not GPS rate, for a quick disarm on
        // touchdown. Subtracting 1 g from Z assumes the craft is near
        // level with respect to the horizon.
        let [x, y, z] = input.acc_adc;
        let z_less_gravity = z - input.acc_1g;
        state.sensor.acc_magnitude =
            (z_less_gravity * z_less_gravity + x * x + y * y).sqrt() * input.acc_1g_rec;
    }

    state.sensor.direction_to_home = input.direction_to_home;
    let mut error_angle =
        (f32::from(input.attitude_yaw) - f32::from(state.sensor.direction_to_home)) * 0.1;
    if error_angle <= -180.0 {
        error_angle += 360.0;
    } else if error_angle > 180.0 {
        error_angle -= 360.0;
    }
    state.sensor.error_angle = error_angle;
    state.sensor.abs_error_angle = error_angle.abs();

    if !new_gps_data {
        // Ground speed, closing speed and distance hold their last good
        // values until the next packet.
        return;
    }

    state.sensor.distance_to_home_cm = input.distance_to_home_cm;
    state.sensor.distance_to_home_m = state.sensor.distance_to_home_cm / 100.0;
    state.sensor.ground_speed_cm_s = input.ground_speed_cm_s;
    state.sensor.gps_data_interval_seconds = input.gps_data_interval_seconds;

    state.sensor.velocity_to_home_cm_s = (ingest.prev_distance_to_home_cm
        - state.sensor.distance_to_home_cm)
        / state.sensor.gps_data_interval_seconds;
    ingest.prev_distance_to_home_cm = state.sensor.distance_to_home_cm;
}
