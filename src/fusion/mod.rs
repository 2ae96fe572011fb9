//! Sensor fusion
//!
//! Turns smoothed accelerometer/gyroscope/magnetometer readings into a
//! heading, speed proxy, and confidence score for one device per packet.

pub mod engine;

pub use engine::{FusionEngine, FusionOutput};
