//! Sensor drivers.
//!
//! Each sensor reads raw samples through a small source trait so the
//! conversion and smoothing logic runs unchanged on the host.

pub mod battery;
