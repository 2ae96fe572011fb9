//! Fusion engine (spec.md §4.2, C4)
//!
//! Derives heading from tilt-compensated magnetometer readings, a speed
//! proxy from smoothed accelerometer magnitude, and a confidence score from
//! smoothed accelerometer Z-axis variance.

use crate::models::RawSensorSample;
use crate::smoothing::SmoothingBuffer;

/// Fused output for a single inbound packet (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionOutput {
    /// Degrees, `[0, 360)`, North = 0, clockwise.
    pub heading: f64,
    /// Speed proxy — accelerometer magnitude, *not* integrated velocity.
    pub speed_mps: f64,
    /// `[0, 1]`, derived from smoothed accelerometer Z-axis variance.
    pub confidence: f64,
    pub should_use_gps: bool,
}

/// Stateless fusion engine, parameterized by the confidence threshold below
/// which the positioning engine should prefer GPS.
#[derive(Debug, Clone, Copy)]
pub struct FusionEngine {
    confidence_threshold: f64,
}

impl FusionEngine {
    pub fn new(confidence_threshold: f64) -> Self {
        Self { confidence_threshold }
    }

    /// Smooth `raw` into `buffer` and derive the fused output.
    ///
    /// The smoothing buffer is owned by the caller (the dispatcher, per the
    /// per-device ownership model) — this keeps the engine itself free of
    /// per-device state.
    pub fn process(&self, buffer: &mut SmoothingBuffer, raw: RawSensorSample) -> FusionOutput {
        let accel = buffer.accel.push_and_mean(raw.accelerometer);
        let _gyro = buffer.gyro.push_and_mean(raw.gyroscope);
        let mag = buffer.mag.push_and_mean(raw.magnetometer);

        let heading = tilt_compensated_heading(accel, mag);
        let speed_mps = accel.magnitude();
        let confidence = accelerometer_confidence(&buffer.accel);

        FusionOutput {
            heading,
            speed_mps,
            confidence,
            should_use_gps: confidence < self.confidence_threshold,
        }
    }
}

/// Heading from tilt-compensated magnetometer, given smoothed accel and mag
/// readings (spec.md §4.2).
fn tilt_compensated_heading(accel: crate::models::Vec3, mag: crate::models::Vec3) -> f64 {
    let gravity = accel.normalize();

    let pitch = (-gravity.x).clamp(-1.0, 1.0).asin();
    let roll = gravity.y.atan2(pitch.cos());

    let mx = mag.x * pitch.cos() + mag.z * pitch.sin();
    let my = mag.x * roll.sin() * pitch.sin() + mag.y * roll.cos() - mag.z * roll.sin() * pitch.cos();

    let heading_rad = (-my).atan2(mx);
    normalize_heading_deg(heading_rad.to_degrees())
}

/// Normalize a heading in degrees to `[0, 360)`, tolerant of negative
/// inputs (spec.md §9 "Numerics").
pub fn normalize_heading_deg(h: f64) -> f64 {
    ((h % 360.0) + 360.0) % 360.0
}

/// Confidence from smoothed accelerometer Z-axis variance (spec.md §4.2).
/// Fewer than two samples returns the documented special case, `0.5`.
fn accelerometer_confidence(accel_buffer: &crate::smoothing::AxisBuffer) -> f64 {
    match accel_buffer.z_variance() {
        None => 0.5,
        Some(variance) => (1.0 - variance / 10.0).clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Vec3;

    fn sample(accel: Vec3, gyro: Vec3, mag: Vec3) -> RawSensorSample {
        RawSensorSample { accelerometer: accel, gyroscope: gyro, magnetometer: mag }
    }

    #[test]
    fn single_sample_confidence_is_one_half() {
        let engine = FusionEngine::new(0.6);
        let mut buffer = SmoothingBuffer::new(5);
        let out = engine.process(
            &mut buffer,
            sample(Vec3::new(0.0, 0.0, 9.81), Vec3::zero(), Vec3::new(20.0, 0.0, 40.0)),
        );
        assert!((out.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn single_sample_speed_proxy_is_accel_magnitude() {
        let engine = FusionEngine::new(0.6);
        let mut buffer = SmoothingBuffer::new(5);
        let out = engine.process(
            &mut buffer,
            sample(Vec3::new(0.0, 0.0, 9.81), Vec3::zero(), Vec3::new(20.0, 0.0, 40.0)),
        );
        assert!((out.speed_mps - 9.81).abs() < 1e-9);
    }

    #[test]
    fn single_sample_heading_is_ninety_degrees() {
        let engine = FusionEngine::new(0.6);
        let mut buffer = SmoothingBuffer::new(5);
        let out = engine.process(
            &mut buffer,
            sample(Vec3::new(0.0, 0.0, 9.81), Vec3::zero(), Vec3::new(20.0, 0.0, 40.0)),
        );
        assert!((out.heading - 90.0).abs() < 1.0, "got {}", out.heading);
    }

    #[test]
    fn outputs_stay_within_documented_ranges() {
        let engine = FusionEngine::new(0.6);
        let mut buffer = SmoothingBuffer::new(5);
        for i in 0..10 {
            let out = engine.process(
                &mut buffer,
                sample(
                    Vec3::new((i as f64).sin(), (i as f64).cos(), 9.81 + i as f64 * 0.1),
                    Vec3::zero(),
                    Vec3::new(20.0, 5.0, 40.0),
                ),
            );
            assert!(out.heading >= 0.0 && out.heading < 360.0);
            assert!((0.0..=1.0).contains(&out.confidence));
            assert!(out.speed_mps >= 0.0);
        }
    }

    #[test]
    fn high_variance_drops_confidence_below_threshold() {
        let engine = FusionEngine::new(0.6);
        let mut buffer = SmoothingBuffer::new(5);
        let mag = Vec3::new(20.0, 0.0, 40.0);
        // Wildly oscillating Z readings to drive up variance.
        for z in [1.0, 20.0, -15.0, 25.0, -20.0] {
            engine.process(&mut buffer, sample(Vec3::new(0.0, 0.0, z), Vec3::zero(), mag));
        }
        let out = engine.process(&mut buffer, sample(Vec3::new(0.0, 0.0, 30.0), Vec3::zero(), mag));
        assert!(out.confidence < 0.6);
        assert!(out.should_use_gps);
    }

    #[test]
    fn normalize_heading_wraps_negative_inputs() {
        assert_eq!(normalize_heading_deg(-30.0), 330.0);
        assert_eq!(normalize_heading_deg(370.0), 10.0);
        assert_eq!(normalize_heading_deg(0.0), 0.0);
    }
}
