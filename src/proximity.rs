//! Proximity scanner (spec.md §4.5, C7): pairwise distance scan over active
//! mobile devices, producing deduplicated-at-source proximity events.

use crate::config::SafetyConfig;
use crate::models::{DeviceState, ProximityEvent, Severity};
use crate::positioning::distance_between;

/// Scan every unordered pair of mobile devices and classify by distance.
/// Base stations are fixed-position anchors, not mobile targets, and are
/// excluded from the scan entirely (spec.md §3).
///
/// `O(n^2)` in active devices, intentionally — see spec.md §4.5.
pub fn scan_proximity(devices: &[DeviceState], safety: &SafetyConfig) -> Vec<ProximityEvent> {
    let mobile: Vec<&DeviceState> = devices.iter().filter(|d| !d.is_base_station).collect();
    let mut events = Vec::new();

    for i in 0..mobile.len() {
        for j in (i + 1)..mobile.len() {
            let a = mobile[i];
            let b = mobile[j];
            let Some(distance) = distance_between(a, b) else { continue };

            let severity = if distance < safety.collision_distance_meters {
                Severity::Collision
            } else if distance < safety.warning_distance_meters {
                Severity::Warning
            } else {
                continue;
            };

            events.push(ProximityEvent {
                device_a: a.device_id.clone(),
                device_b: b.device_id.clone(),
                distance_m: round2(distance),
                severity,
            });
        }
    }

    events
}

/// `scanProximity()` filtered to pairs containing `device_id`.
pub fn scan_proximity_for_device(
    devices: &[DeviceState],
    safety: &SafetyConfig,
    device_id: &str,
) -> Vec<ProximityEvent> {
    scan_proximity(devices, safety)
        .into_iter()
        .filter(|e| e.device_a == device_id || e.device_b == device_id)
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
