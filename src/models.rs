//! Core data models for the telemetry fusion pipeline.
//!
//! All wire-facing types derive `Serialize`/`Deserialize` with `camelCase`
//! field names, matching the event/command contract in the external
//! interface spec.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable device identifier, opaque to the core.
pub type DeviceId = String;

/// 3-D vector for raw accelerometer/gyroscope/magnetometer samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Euclidean magnitude.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction, or the zero vector when the
    /// magnitude is zero (never produces NaN).
    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag > 0.0 {
            Self::new(self.x / mag, self.y / mag, self.z / mag)
        } else {
            Self::zero()
        }
    }
}

/// A GPS fix as carried on an inbound ingest payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsFix {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeaconPosition {
    pub x: f64,
    pub y: f64,
}

/// One neighbor-observed RSSI beacon report, with the beacon's own local
/// planar position (for trilateration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RssiBeacon {
    pub device_id: DeviceId,
    pub rssi: f64,
    pub position: BeaconPosition,
}

/// Inbound sensor packet, as delivered by `Dispatcher::ingest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestPayload {
    pub device_id: DeviceId,
    pub accelerometer: Vec3,
    pub gyroscope: Vec3,
    pub magnetometer: Vec3,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsFix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_base_station: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi_beacons: Option<Vec<RssiBeacon>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// An indoor local-frame position, present only once >= 3 anchors are
/// visible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndoorPosition {
    pub x: f64,
    pub y: f64,
}

/// Last accepted raw sensor triple, kept only for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSensorSample {
    pub accelerometer: Vec3,
    pub gyroscope: Vec3,
    pub magnetometer: Vec3,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Collision,
}

/// Alert kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    ProximityWarning,
    CollisionWarning,
    SpeedExceeded,
}

/// A dispatched alert record (spec.md §3, §4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    /// Device IDs involved: one for a speed alert, two for a proximity
    /// alert.
    pub participants: Vec<DeviceId>,
    /// The measurement backing the alert (meters for proximity, m/s for
    /// speed).
    pub measurement: f64,
    pub message: String,
    pub timestamp: String,
}

/// The authoritative per-device record held by the device store (spec.md §3
/// DeviceState).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub device_id: DeviceId,
    #[serde(default)]
    pub is_base_station: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indoor_position: Option<IndoorPosition>,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub speed_mps: f64,
    #[serde(default)]
    pub confidence: f64,
    pub last_update: i64,
    #[serde(default)]
    pub rssi: HashMap<DeviceId, i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_raw_sensor: Option<RawSensorSample>,
    #[serde(default)]
    pub alerts: VecDeque<Alert>,
}

/// Maximum number of alerts retained per device (spec.md §3).
pub const MAX_DEVICE_ALERTS: usize = 50;

impl DeviceState {
    /// A fresh skeleton record for a device seen for the first time.
    pub fn new(device_id: DeviceId, now_ms: i64) -> Self {
        Self {
            device_id,
            is_base_station: false,
            lat: None,
            lng: None,
            indoor_position: None,
            heading: 0.0,
            speed_mps: 0.0,
            confidence: 0.0,
            last_update: now_ms,
            rssi: HashMap::new(),
            last_raw_sensor: None,
            alerts: VecDeque::new(),
        }
    }

    /// Prepend an alert, truncating to `MAX_DEVICE_ALERTS`.
    pub fn push_alert(&mut self, alert: Alert) {
        self.alerts.push_front(alert);
        self.alerts.truncate(MAX_DEVICE_ALERTS);
    }
}

/// Projection of a device returned by `getSummary` (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummaryEntry {
    pub device_id: DeviceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    pub speed: f64,
    pub is_base_station: bool,
    pub last_updated: i64,
}

/// Aggregate returned by the device store's summary query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub total_devices: usize,
    pub base_stations: usize,
    pub devices: Vec<DeviceSummaryEntry>,
}

/// Unordered proximity pair `{A, B}` with measured distance and severity
/// (spec.md §3 ProximityEvent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityEvent {
    pub device_a: DeviceId,
    pub device_b: DeviceId,
    pub distance_m: f64,
    pub severity: Severity,
}

impl ProximityEvent {
    /// The dedup key for this pair: `proximity:<sorted(A,B)>`.
    pub fn dedup_key(&self) -> String {
        proximity_key(&self.device_a, &self.device_b)
    }
}

/// Build the canonical dedup key for a device pair, independent of argument
/// order (spec.md §3 DedupTable).
pub fn proximity_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("proximity:{a}:{b}")
    } else {
        format!("proximity:{b}:{a}")
    }
}

/// The dedup key for a device's speed alert.
pub fn speed_key(device_id: &str) -> String {
    format!("speed:{device_id}")
}

/// Current UTC time formatted per spec.md's ISO-8601 timestamp requirement.
pub fn iso_now() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.to_rfc3339()
}
