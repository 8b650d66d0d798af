// src/pid.rs

//! # PID Control Module
//!
//! Compute functions and control data structures for the rescue PID loops,
//! built on `piddiy`'s custom compute callbacks. The altitude and velocity
//! loops each get a callback that reproduces the integrator semantics of
//! the flight-tested controller: the I gain is folded into the accumulator
//! (the `PidController` runs with `ki = 1`), so the anti-windup clamps
//! bound the gain-included sum and a gain change never rescales history.

pub mod altitude;
pub use altitude::*;
pub mod velocity;
pub use velocity::*;
