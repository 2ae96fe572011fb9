//! Dispatcher (spec.md §4.7, C9): per-packet orchestration wiring every
//! other component together — ingest, fuse, position, scan, alert, emit.
//!
//! Owns the store, the smoothing buffers (one per device), the alert
//! builder, and the event sink. Everything here is transport-agnostic; the
//! WebSocket adapter only ever calls these methods.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::alerts::AlertBuilder;
use crate::config::Config;
use crate::events::{EventSink, PositionUpdate};
use crate::fusion::FusionEngine;
use crate::models::{Alert, DeviceId, DeviceState, IngestPayload, RawSensorSample, StoreSummary};
use crate::positioning;
use crate::proximity;
use crate::smoothing::SmoothingBuffer;
use crate::store::DeviceStore;

/// Central orchestrator for the telemetry fusion pipeline.
pub struct Dispatcher {
    store: DeviceStore,
    alerts: AlertBuilder,
    fusion: FusionEngine,
    config: Config,
    sink: Box<dyn EventSink>,
    buffers: Mutex<HashMap<DeviceId, SmoothingBuffer>>,
    /// When set, every mutation fires a best-effort snapshot write on a
    /// detached task in addition to the periodic timer (spec.md §4.3
    /// "after any mutation, best-effort"). `None` in tests that never wire
    /// up a snapshot path.
    snapshot_path: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(config: Config, sink: Box<dyn EventSink>) -> Self {
        Self {
            store: DeviceStore::new(),
            alerts: AlertBuilder::new(),
            fusion: FusionEngine::new(config.safety.sensor_confidence_threshold),
            config,
            sink,
            buffers: Mutex::new(HashMap::new()),
            snapshot_path: None,
        }
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    /// Enable best-effort persistence after every mutation (spec.md §4.3),
    /// on top of the periodic snapshot timer. Call once at startup, before
    /// the dispatcher is shared across tasks.
    pub fn set_snapshot_path(&mut self, path: PathBuf) {
        self.snapshot_path = Some(path);
    }

    /// Fire a best-effort snapshot write after a mutation (spec.md §4.3).
    /// The device list is gathered synchronously (no I/O); the write
    /// itself runs on a detached task so it never blocks the caller
    /// (spec.md §5 "must not block the dispatcher path"). No-op when no
    /// snapshot path has been configured.
    fn persist_best_effort(&self) {
        if let Some(path) = self.snapshot_path.clone() {
            let devices = self.store.get_all();
            tokio::spawn(async move {
                crate::store::save_device_snapshot(&path, devices).await;
            });
        }
    }

    /// Register a device skeleton without processing a sensor packet yet
    /// (spec.md §4.7 `register`), and send a welcome acknowledgement.
    pub fn register(&self, device_id: &DeviceId, is_base_station: bool, now: i64) {
        let patch = crate::store::DevicePatch { is_base_station: Some(is_base_station), ..Default::default() };
        self.store.update(device_id, patch, now);
        self.sink.registered(device_id.clone(), format!("{device_id} registered"));
        self.persist_best_effort();
    }

    /// Remove a device entirely: drop its store entry, tear down its
    /// smoothing buffers, and broadcast `device:left` (spec.md §4.7
    /// `disconnect`).
    pub fn disconnect(&self, device_id: &DeviceId) {
        self.store.remove(device_id);
        self.buffers.lock().expect("buffer map lock poisoned").remove(device_id);
        self.sink.device_left(device_id.clone());
        self.persist_best_effort();
    }

    /// Process one inbound sensor packet end to end: fuse, position, scan
    /// for proximity/speed hazards, dedup-gate alerts, and emit every
    /// resulting event. Returns the merged device state.
    pub fn ingest(&self, payload: IngestPayload, now: i64) -> DeviceState {
        let device_id = payload.device_id.clone();

        let fused = {
            let mut buffers = self.buffers.lock().expect("buffer map lock poisoned");
            let buffer = buffers
                .entry(device_id.clone())
                .or_insert_with(|| SmoothingBuffer::new(self.config.fusion.smoothing_window));
            let raw = RawSensorSample {
                accelerometer: payload.accelerometer,
                gyroscope: payload.gyroscope,
                magnetometer: payload.magnetometer,
            };
            self.fusion.process(buffer, raw)
        };

        let state = positioning::position_device(&self.store, &self.config, &device_id, &payload, fused, now);

        self.sink.position_update(PositionUpdate {
            device_id: state.device_id.clone(),
            lat: state.lat,
            lng: state.lng,
            heading: state.heading,
            speed_mps: state.speed_mps,
            confidence: state.confidence,
            indoor_pos: state.indoor_position,
            is_base_station: state.is_base_station,
            timestamp: crate::models::iso_now(),
        });

        for alert in self.alerts_for(&state, now) {
            self.store.add_alert(&device_id, alert.clone());
            self.sink.alert(alert);
        }

        self.persist_best_effort();
        state
    }

    /// Dedup-gated proximity and speed alerts this device participates in,
    /// recording emission against the dedup table as a side effect.
    fn alerts_for(&self, state: &DeviceState, now: i64) -> Vec<Alert> {
        let mut out = Vec::new();
        let window = self.config.dedup_window_ms;

        let devices = self.store.get_all();
        for event in proximity::scan_proximity_for_device(&devices, &self.config.safety, &state.device_id) {
            if let Some(alert) = self.alerts.try_proximity_alert(&event, now, window) {
                out.push(alert);
            }
        }

        if let Some(alert) = self.alerts.try_speed_alert(state, now, &self.config.safety, window) {
            out.push(alert);
        }

        out
    }

    /// Raw proximity + speed hazards for the whole world, bypassing the
    /// dedup table entirely (spec.md §4.7 `scanAlerts`, used by periodic
    /// health checks and tests, never by `ingest`).
    pub fn scan_alerts(&self) -> Vec<Alert> {
        let devices = self.store.get_all();
        let mut out: Vec<Alert> = proximity::scan_proximity(&devices, &self.config.safety)
            .into_iter()
            .filter_map(|event| {
                let kind = match event.severity {
                    crate::models::Severity::Collision => crate::models::AlertKind::CollisionWarning,
                    crate::models::Severity::Warning => crate::models::AlertKind::ProximityWarning,
                };
                Some(Alert {
                    kind,
                    severity: event.severity,
                    participants: vec![event.device_a.clone(), event.device_b.clone()],
                    measurement: event.distance_m,
                    message: format!(
                        "{} and {} are {:.2}m apart",
                        event.device_a, event.device_b, event.distance_m
                    ),
                    timestamp: crate::models::iso_now(),
                })
            })
            .collect();

        for device in &devices {
            if device.speed_mps > self.config.safety.max_speed_ms {
                out.push(Alert {
                    kind: crate::models::AlertKind::SpeedExceeded,
                    severity: crate::models::Severity::Warning,
                    participants: vec![device.device_id.clone()],
                    measurement: device.speed_mps,
                    message: format!("{} is over the speed limit", device.device_id),
                    timestamp: crate::models::iso_now(),
                });
            }
        }

        out
    }

    pub fn list_devices(&self) -> Vec<DeviceState> {
        self.store.get_all()
    }

    /// Reply to a `device:list:request` (spec.md §4.7) with the current
    /// active device set.
    pub fn broadcast_device_list(&self) {
        self.sink.device_list(self.store.get_all());
    }

    pub fn summary(&self) -> StoreSummary {
        self.store.get_summary()
    }

    /// Prune stale devices and tear down their smoothing buffers (spec.md
    /// §4.3, periodic background task).
    pub fn prune(&self, now: i64) -> Vec<DeviceId> {
        let removed = self.store.prune(now, self.config.device_ttl_ms);
        if !removed.is_empty() {
            let mut buffers = self.buffers.lock().expect("buffer map lock poisoned");
            for id in &removed {
                buffers.remove(id);
                self.sink.device_left(id.clone());
            }
        }
        removed
    }

    /// Evict stale dedup-table entries (spec.md §4.6, periodic background
    /// task).
    pub fn sweep_alerts(&self, now: i64) {
        self.alerts.sweep(now, self.config.dedup_window_ms);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
