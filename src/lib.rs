//! Online IMU calibration core over a regex-addressed software bus.
//!
//! Listens to raw magnetometer/accelerometer telemetry published by a remote
//! aircraft, accumulates samples into incremental geometric fits (bounding
//! sphere for the magnetometer, sliding-window orientation coverage for the
//! accelerometer), and issues configuration commands back over the same bus.
//!
//! The bus transport is behind the [`bus::BusClient`] trait so the protocol
//! layer and the calibration engine can be exercised against the in-process
//! [`bus::LoopbackBus`] backend.

pub mod accel;
pub mod aircraft;
pub mod bus;
pub mod config_request;
pub mod error;
pub mod filter;
pub mod report;
pub mod sample;
pub mod session;
pub mod sphere;
pub mod telemetry;
pub mod topic;
