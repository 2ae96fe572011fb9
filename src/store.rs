//! Device store (spec.md §4.3, C5): the authoritative in-memory map of
//! device state, with TTL-based pruning and durable snapshot persistence.
//!
//! An explicit value threaded through the dispatcher — never an ambient
//! global, per the REDESIGN FLAG in spec.md §9.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use chrono::Utc;
use tracing::{info, warn};

use crate::errors::PersistenceError;
use crate::models::{
    DeviceId, DeviceState, DeviceSummaryEntry, IndoorPosition, RawSensorSample, StoreSummary,
};

/// Current wall-clock time in milliseconds, the unit `lastUpdate` is tracked
/// in throughout the store.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A shallow patch applied over an existing (or freshly created) device
/// record. Every field left at its default is left untouched on the
/// existing record.
///
/// `indoor_position` is a double `Option` because the positioning engine
/// must be able to explicitly *clear* it (fewer than 3 visible anchors) as
/// well as leave it untouched (e.g. a bare `register()` skeleton) — `None`
/// means "don't touch", `Some(None)` means "clear", `Some(Some(p))` means
/// "set".
#[derive(Debug, Clone, Default)]
pub struct DevicePatch {
    pub is_base_station: Option<bool>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub indoor_position: Option<Option<IndoorPosition>>,
    pub heading: Option<f64>,
    pub speed_mps: Option<f64>,
    pub confidence: Option<f64>,
    /// Neighbor RSSI observations to merge into the existing map (insert or
    /// overwrite by key; other neighbors are preserved).
    pub rssi_updates: Vec<(DeviceId, i32)>,
    pub last_raw_sensor: Option<RawSensorSample>,
}

/// The device snapshot file shape (spec.md §6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub generated_at: i64,
    pub devices: Vec<DeviceState>,
}

/// The authoritative in-memory device map.
pub struct DeviceStore {
    devices: RwLock<HashMap<DeviceId, DeviceState>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self { devices: RwLock::new(HashMap::new()) }
    }

    /// Shallow-merge `patch` over the existing entry (or a fresh skeleton),
    /// forcing `lastUpdate = now_ms`, and return the merged value.
    pub fn update(&self, id: &str, patch: DevicePatch, now: i64) -> DeviceState {
        let mut devices = self.devices.write().expect("device store lock poisoned");
        let entry = devices
            .entry(id.to_string())
            .or_insert_with(|| DeviceState::new(id.to_string(), now));

        if let Some(is_base_station) = patch.is_base_station {
            entry.is_base_station = is_base_station;
        }
        if let Some(lat) = patch.lat {
            entry.lat = Some(lat);
        }
        if let Some(lng) = patch.lng {
            entry.lng = Some(lng);
        }
        if let Some(indoor) = patch.indoor_position {
            entry.indoor_position = indoor;
        }
        if let Some(heading) = patch.heading {
            entry.heading = heading;
        }
        if let Some(speed_mps) = patch.speed_mps {
            entry.speed_mps = speed_mps;
        }
        if let Some(confidence) = patch.confidence {
            entry.confidence = confidence;
        }
        for (neighbor, rssi) in patch.rssi_updates {
            entry.rssi.insert(neighbor, rssi);
        }
        if let Some(raw) = patch.last_raw_sensor {
            entry.last_raw_sensor = Some(raw);
        }
        entry.last_update = now;

        entry.clone()
    }

    pub fn get(&self, id: &str) -> Option<DeviceState> {
        self.devices.read().expect("device store lock poisoned").get(id).cloned()
    }

    /// A consistent snapshot of every active device, safe to scan without
    /// holding the store lock.
    pub fn get_all(&self) -> Vec<DeviceState> {
        self.devices.read().expect("device store lock poisoned").values().cloned().collect()
    }

    pub fn get_base_stations(&self) -> Vec<DeviceState> {
        self.devices
            .read()
            .expect("device store lock poisoned")
            .values()
            .filter(|d| d.is_base_station)
            .cloned()
            .collect()
    }

    /// Prepend `alert` to the device's alert ring (truncated to 50). No-op
    /// if the device is absent.
    pub fn add_alert(&self, id: &str, alert: crate::models::Alert) {
        let mut devices = self.devices.write().expect("device store lock poisoned");
        if let Some(entry) = devices.get_mut(id) {
            entry.push_alert(alert);
        }
    }

    /// Unconditionally remove a device. Returns `true` if it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.devices.write().expect("device store lock poisoned").remove(id).is_some()
    }

    pub fn get_summary(&self) -> StoreSummary {
        let devices = self.devices.read().expect("device store lock poisoned");
        let base_stations = devices.values().filter(|d| d.is_base_station).count();
        let entries = devices
            .values()
            .map(|d| DeviceSummaryEntry {
                device_id: d.device_id.clone(),
                lat: d.lat,
                lng: d.lng,
                speed: d.speed_mps,
                is_base_station: d.is_base_station,
                last_updated: d.last_update,
            })
            .collect();
        StoreSummary { total_devices: devices.len(), base_stations, devices: entries }
    }

    /// Drop entries whose `lastUpdate` is older than `ttl_ms`, exempting
    /// base stations from pruning (spec.md §9 resolved Open Question).
    /// Returns the IDs of removed devices so the caller can tear down their
    /// smoothing buffers.
    pub fn prune(&self, now: i64, ttl_ms: i64) -> Vec<DeviceId> {
        let mut devices = self.devices.write().expect("device store lock poisoned");
        let stale: Vec<DeviceId> = devices
            .iter()
            .filter(|(_, d)| !d.is_base_station && now - d.last_update > ttl_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            devices.remove(id);
        }
        stale
    }

    /// Replace the whole store contents, e.g. from a loaded snapshot.
    pub fn load_all(&self, devices: Vec<DeviceState>) {
        let mut map = self.devices.write().expect("device store lock poisoned");
        map.clear();
        for device in devices {
            map.insert(device.device_id.clone(), device);
        }
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize the store to `path` via write-to-temp + atomic rename.
/// Persistence failures are logged and never fatal (spec.md §4.3, §7).
pub async fn save_snapshot(path: &Path, store: &DeviceStore) {
    save_device_snapshot(path, store.get_all()).await
}

/// Same as `save_snapshot`, but takes an already-gathered device list
/// instead of the store itself, so a caller can gather the list
/// synchronously and hand the write off to a detached task without holding
/// a reference to the store across an `.await` (spec.md §4.3 "after any
/// mutation, best-effort"; §5 "must not block the dispatcher path").
pub async fn save_device_snapshot(path: &Path, devices: Vec<DeviceState>) {
    if let Err(e) = try_save_snapshot(path, devices).await {
        warn!("snapshot persistence failed: {e}");
    }
}

async fn try_save_snapshot(path: &Path, devices: Vec<DeviceState>) -> Result<(), PersistenceError> {
    let snapshot = DeviceSnapshot { generated_at: now_ms(), devices };
    let json = serde_json::to_vec_pretty(&snapshot)?;

    let tmp_path = path.with_extension("json.tmp");
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Load a snapshot from `path` if present, refreshing every `lastUpdate` to
/// `now` so devices aren't mass-pruned immediately after a restart.
/// Returns an empty `Vec` (never an error) if the file is missing or
/// unparsable — load failures are logged and treated as "no snapshot".
pub async fn load_snapshot(path: &Path, now: i64) -> Vec<DeviceState> {
    match try_load_snapshot(path).await {
        Ok(mut devices) => {
            for device in &mut devices {
                device.last_update = now;
            }
            if !devices.is_empty() {
                info!("loaded {} device(s) from snapshot at {}", devices.len(), path.display());
            }
            devices
        }
        Err(e) => {
            warn!("snapshot load failed, starting with an empty store: {e}");
            Vec::new()
        }
    }
}

async fn try_load_snapshot(path: &Path) -> Result<Vec<DeviceState>, PersistenceError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = tokio::fs::read_to_string(path).await?;
    let snapshot: DeviceSnapshot = serde_json::from_str(&raw)?;
    Ok(snapshot.devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn patch_position(lat: f64, lng: f64) -> DevicePatch {
        DevicePatch { lat: Some(lat), lng: Some(lng), ..Default::default() }
    }

    #[test]
    fn update_creates_fresh_entry_with_forced_timestamp() {
        let store = DeviceStore::new();
        let state = store.update("dev-A", patch_position(1.0, 2.0), 1000);
        assert_eq!(state.device_id, "dev-A");
        assert_eq!(state.last_update, 1000);
        assert_eq!(state.lat, Some(1.0));
    }

    #[test]
    fn update_preserves_unchanged_fields_across_merges() {
        let store = DeviceStore::new();
        store.update("dev-A", patch_position(1.0, 2.0), 1000);
        let patch = DevicePatch { heading: Some(90.0), ..Default::default() };
        let state = store.update("dev-A", patch, 2000);
        assert_eq!(state.lat, Some(1.0));
        assert_eq!(state.lng, Some(2.0));
        assert_eq!(state.heading, 90.0);
        assert_eq!(state.last_update, 2000);
    }

    #[test]
    fn indoor_position_can_be_explicitly_cleared() {
        let store = DeviceStore::new();
        let set = DevicePatch {
            indoor_position: Some(Some(IndoorPosition { x: 1.0, y: 2.0 })),
            ..Default::default()
        };
        store.update("dev-A", set, 1000);
        assert!(store.get("dev-A").unwrap().indoor_position.is_some());

        let clear = DevicePatch { indoor_position: Some(None), ..Default::default() };
        store.update("dev-A", clear, 2000);
        assert!(store.get("dev-A").unwrap().indoor_position.is_none());
    }

    #[test]
    fn rssi_updates_merge_instead_of_replacing() {
        let store = DeviceStore::new();
        let p1 = DevicePatch { rssi_updates: vec![("n1".into(), -50)], ..Default::default() };
        store.update("dev-A", p1, 1000);
        let p2 = DevicePatch { rssi_updates: vec![("n2".into(), -60)], ..Default::default() };
        let state = store.update("dev-A", p2, 2000);
        assert_eq!(state.rssi.get("n1"), Some(&-50));
        assert_eq!(state.rssi.get("n2"), Some(&-60));
    }

    #[test]
    fn prune_removes_only_stale_non_base_stations() {
        let store = DeviceStore::new();
        store.update("stale", patch_position(0.0, 0.0), 0);
        store.update("fresh", patch_position(0.0, 0.0), 29_000);
        let base_patch = DevicePatch { is_base_station: Some(true), ..patch_position(0.0, 0.0) };
        store.update("base", base_patch, 0);

        let removed = store.prune(30_001, 30_000);
        assert_eq!(removed, vec!["stale".to_string()]);
        assert!(store.get("stale").is_none());
        assert!(store.get("fresh").is_some());
        assert!(store.get("base").is_some());
    }

    #[test]
    fn add_alert_truncates_ring_to_fifty() {
        use crate::models::{Alert, AlertKind, Severity};
        let store = DeviceStore::new();
        store.update("dev-A", patch_position(0.0, 0.0), 0);
        for i in 0..60 {
            store.add_alert(
                "dev-A",
                Alert {
                    kind: AlertKind::SpeedExceeded,
                    severity: Severity::Warning,
                    participants: vec!["dev-A".into()],
                    measurement: i as f64,
                    message: "x".into(),
                    timestamp: "t".into(),
                },
            );
        }
        assert_eq!(store.get("dev-A").unwrap().alerts.len(), 50);
    }

    #[test]
    fn get_summary_counts_base_stations_and_total() {
        let store = DeviceStore::new();
        store.update("mobile", patch_position(0.0, 0.0), 0);
        let base_patch = DevicePatch { is_base_station: Some(true), ..patch_position(0.0, 0.0) };
        store.update("base", base_patch, 0);

        let summary = store.get_summary();
        assert_eq!(summary.total_devices, 2);
        assert_eq!(summary.base_stations, 1);
    }

    #[tokio::test]
    async fn snapshot_round_trips_device_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("info.json");

        let store = DeviceStore::new();
        store.update("dev-A", patch_position(10.0, 20.0), 1000);
        store.update("dev-B", patch_position(30.0, 40.0), 2000);

        save_snapshot(&path, &store).await;
        assert!(path.exists());

        let loaded = load_snapshot(&path, 99_999).await;
        assert_eq!(loaded.len(), 2);
        for device in &loaded {
            // lastUpdate is refreshed on load to avoid mass-pruning on restart.
            assert_eq!(device.last_update, 99_999);
        }
        let ids: std::collections::HashSet<_> = loaded.iter().map(|d| d.device_id.clone()).collect();
        assert!(ids.contains("dev-A"));
        assert!(ids.contains("dev-B"));
    }

    #[tokio::test]
    async fn missing_snapshot_file_loads_empty_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let loaded = load_snapshot(&path, 0).await;
        assert!(loaded.is_empty());
    }
}
