//! Application core: terminal domain logic, zero I/O.
//!
//! Session lifecycle, command dispatch, the scan pipeline, and the service
//! that sequences them.  All interaction with hardware and the backend happens
//! through **port traits** defined in [`ports`], keeping this layer fully
//! testable without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod scan;
pub mod service;
pub mod session;
pub mod wire;
