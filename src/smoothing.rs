//! Per-device bounded smoothing buffers for accelerometer, gyroscope, and
//! magnetometer streams (spec.md §3 SmoothingBuffer, §4.2, C3).

use std::collections::VecDeque;

use crate::models::Vec3;

/// A bounded FIFO of 3-vector samples for one sensor axis. Length never
/// exceeds the configured window `W`.
#[derive(Debug, Clone)]
pub struct AxisBuffer {
    window: usize,
    samples: VecDeque<Vec3>,
}

impl AxisBuffer {
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1), samples: VecDeque::with_capacity(window.max(1)) }
    }

    /// Push a new sample, trim to the window size, and return the
    /// component-wise arithmetic mean over the current contents.
    pub fn push_and_mean(&mut self, sample: Vec3) -> Vec3 {
        self.samples.push_back(sample);
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
        mean(&self.samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Variance of the Z component across the buffer. `None` with fewer than
    /// two samples (caller applies the spec's special-case default).
    pub fn z_variance(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let zs: Vec<f64> = self.samples.iter().map(|s| s.z).collect();
        let mean_z = zs.iter().sum::<f64>() / zs.len() as f64;
        let variance = zs.iter().map(|z| (z - mean_z).powi(2)).sum::<f64>() / zs.len() as f64;
        Some(variance)
    }
}

fn mean(samples: &VecDeque<Vec3>) -> Vec3 {
    if samples.is_empty() {
        return Vec3::zero();
    }
    let n = samples.len() as f64;
    let sum = samples.iter().fold(Vec3::zero(), |acc, s| {
        Vec3::new(acc.x + s.x, acc.y + s.y, acc.z + s.z)
    });
    Vec3::new(sum.x / n, sum.y / n, sum.z / n)
}

/// The three bounded FIFOs for one device (spec.md §3 SmoothingBuffer).
/// Created on first sample, torn down on disconnect or pruning.
#[derive(Debug, Clone)]
pub struct SmoothingBuffer {
    pub accel: AxisBuffer,
    pub gyro: AxisBuffer,
    pub mag: AxisBuffer,
}

impl SmoothingBuffer {
    pub fn new(window: usize) -> Self {
        Self {
            accel: AxisBuffer::new(window),
            gyro: AxisBuffer::new(window),
            mag: AxisBuffer::new(window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_length_never_exceeds_window() {
        let mut buf = AxisBuffer::new(5);
        for i in 0..20 {
            buf.push_and_mean(Vec3::new(i as f64, 0.0, 0.0));
            assert!(buf.len() <= 5);
        }
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn buffer_length_equals_samples_seen_before_full() {
        let mut buf = AxisBuffer::new(5);
        for i in 1..=3 {
            buf.push_and_mean(Vec3::new(i as f64, 0.0, 0.0));
            assert_eq!(buf.len(), i);
        }
    }

    #[test]
    fn mean_is_component_wise_arithmetic_mean() {
        let mut buf = AxisBuffer::new(3);
        buf.push_and_mean(Vec3::new(1.0, 2.0, 3.0));
        buf.push_and_mean(Vec3::new(3.0, 4.0, 5.0));
        let mean = buf.push_and_mean(Vec3::new(5.0, 0.0, 1.0));
        assert_eq!(mean, Vec3::new(3.0, 2.0, 3.0));
    }

    #[test]
    fn z_variance_is_none_below_two_samples() {
        let mut buf = AxisBuffer::new(5);
        assert_eq!(buf.z_variance(), None);
        buf.push_and_mean(Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(buf.z_variance(), None);
    }

    #[test]
    fn z_variance_is_zero_for_constant_samples() {
        let mut buf = AxisBuffer::new(5);
        buf.push_and_mean(Vec3::new(0.0, 0.0, 9.81));
        buf.push_and_mean(Vec3::new(0.0, 0.0, 9.81));
        assert_eq!(buf.z_variance(), Some(0.0));
    }
}
