//! Alert builder (spec.md §4.6, C8): proximity and speed alert construction
//! with a deduplication window.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::SafetyConfig;
use crate::models::{
    iso_now, speed_key, Alert, AlertKind, DeviceState, ProximityEvent, Severity,
};

/// Mapping from alert-key to last-emitted wall-clock timestamp (spec.md §3
/// DedupTable). Owned by the alert builder; its sweep runs concurrently
/// with emission and must synchronize — hence the `Mutex`.
pub struct AlertBuilder {
    last_emitted: Mutex<HashMap<String, i64>>,
}

impl AlertBuilder {
    pub fn new() -> Self {
        Self { last_emitted: Mutex::new(HashMap::new()) }
    }

    /// Emit iff no entry exists for `key` or the dedup window has elapsed;
    /// on emit, record `now` against `key`.
    pub fn should_emit(&self, key: &str, now: i64, dedup_window_ms: i64) -> bool {
        let mut table = self.last_emitted.lock().expect("dedup table lock poisoned");
        match table.get(key) {
            Some(&last) if now - last <= dedup_window_ms => false,
            _ => {
                table.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Build and dedup-gate a proximity alert for `event`. Returns `None`
    /// when the dedup window hasn't elapsed since the last emission for
    /// this pair.
    pub fn try_proximity_alert(&self, event: &ProximityEvent, now: i64, dedup_window_ms: i64) -> Option<Alert> {
        let key = event.dedup_key();
        if !self.should_emit(&key, now, dedup_window_ms) {
            return None;
        }

        let kind = match event.severity {
            Severity::Collision => AlertKind::CollisionWarning,
            Severity::Warning => AlertKind::ProximityWarning,
        };
        let label = match event.severity {
            Severity::Collision => "COLLISION",
            Severity::Warning => "proximity warning",
        };

        Some(Alert {
            kind,
            severity: event.severity,
            participants: vec![event.device_a.clone(), event.device_b.clone()],
            measurement: event.distance_m,
            message: format!(
                "{label}: {} and {} are {:.2}m apart",
                event.device_a, event.device_b, event.distance_m
            ),
            timestamp: iso_now(),
        })
    }

    /// Build and dedup-gate a speed alert for `device`, when over the
    /// configured limit. Returns `None` when under the limit or when the
    /// dedup window hasn't elapsed.
    pub fn try_speed_alert(&self, device: &DeviceState, now: i64, safety: &SafetyConfig, dedup_window_ms: i64) -> Option<Alert> {
        if device.speed_mps <= safety.max_speed_ms {
            return None;
        }

        let key = speed_key(&device.device_id);
        if !self.should_emit(&key, now, dedup_window_ms) {
            return None;
        }

        let speed = round2(device.speed_mps);
        Some(Alert {
            kind: AlertKind::SpeedExceeded,
            severity: Severity::Warning,
            participants: vec![device.device_id.clone()],
            measurement: speed,
            message: format!(
                "{} exceeded the speed limit: {:.2}m/s (limit {:.2}m/s)",
                device.device_id, speed, safety.max_speed_ms
            ),
            timestamp: iso_now(),
        })
    }

    /// Evict dedup entries older than `2 * dedup_window_ms` (spec.md §4.6).
    pub fn sweep(&self, now: i64, dedup_window_ms: i64) {
        let mut table = self.last_emitted.lock().expect("dedup table lock poisoned");
        let cutoff = 2 * dedup_window_ms;
        table.retain(|_, &mut last| now - last <= cutoff);
    }
}

impl Default for AlertBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warning_event(a: &str, b: &str, distance: f64) -> ProximityEvent {
        ProximityEvent { device_a: a.into(), device_b: b.into(), distance_m: distance, severity: Severity::Warning }
    }

    #[test]
    fn should_emit_is_one_shot_per_dedup_window() {
        let builder = AlertBuilder::new();
        assert!(builder.should_emit("k", 0, 3000));
        assert!(!builder.should_emit("k", 1000, 3000));
        assert!(!builder.should_emit("k", 3000, 3000));
        assert!(builder.should_emit("k", 3001, 3000));
    }

    #[test]
    fn proximity_alert_emits_once_then_dedups() {
        let builder = AlertBuilder::new();
        let event = warning_event("A", "B", 3.33);

        let first = builder.try_proximity_alert(&event, 0, 3000);
        assert!(first.is_some());
        assert_eq!(first.unwrap().kind, AlertKind::ProximityWarning);

        let second = builder.try_proximity_alert(&event, 1000, 3000);
        assert!(second.is_none());

        let third = builder.try_proximity_alert(&event, 3001, 3000);
        assert!(third.is_some());
    }

    #[test]
    fn collision_and_warning_share_the_same_dedup_bucket() {
        let builder = AlertBuilder::new();
        let warning = warning_event("A", "B", 3.33);
        assert!(builder.try_proximity_alert(&warning, 0, 3000).is_some());

        let collision = ProximityEvent { distance_m: 1.1, severity: Severity::Collision, ..warning };
        // Same pair => same dedup key => still gated by the warning's emission.
        assert!(builder.try_proximity_alert(&collision, 500, 3000).is_none());
        let emitted = builder.try_proximity_alert(&collision, 3001, 3000).unwrap();
        assert_eq!(emitted.kind, AlertKind::CollisionWarning);
    }

    #[test]
    fn speed_alert_only_fires_above_the_limit() {
        let builder = AlertBuilder::new();
        let safety = SafetyConfig::default();
        let mut device = DeviceState::new("dev-A".into(), 0);
        device.speed_mps = 10.0;
        assert!(builder.try_speed_alert(&device, 0, &safety, 3000).is_none());

        device.speed_mps = 20.0;
        let alert = builder.try_speed_alert(&device, 0, &safety, 3000).unwrap();
        assert_eq!(alert.kind, AlertKind::SpeedExceeded);
        assert_eq!(alert.measurement, 20.0);
    }

    #[test]
    fn sweep_evicts_entries_older_than_twice_the_dedup_window() {
        let builder = AlertBuilder::new();
        builder.should_emit("k", 0, 3000);
        builder.sweep(5999, 3000);
        assert!(!builder.should_emit("k", 5999, 3000), "entry should still be live at 2x-1ms");

        builder.sweep(6001, 3000);
        // After the sweep evicts it, the next call emits fresh.
        assert!(builder.should_emit("k", 9002, 3000));
    }
}
