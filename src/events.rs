//! Event dispatch contract (spec.md §6, §9).
//!
//! The source uses an in-process pub/sub (Socket.IO); this is abstracted as
//! a trait so the dispatcher never depends on a transport. Production code
//! binds a `WebSocketAdapter` (`adapter::websocket`); tests inject a
//! `RecordingSink`.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::models::{Alert, DeviceId, DeviceState, IndoorPosition};

/// The `position:update` event payload (spec.md §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub device_id: DeviceId,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub heading: f64,
    pub speed_mps: f64,
    pub confidence: f64,
    pub indoor_pos: Option<IndoorPosition>,
    pub is_base_station: bool,
    pub timestamp: String,
}

/// Everything the dispatcher can emit, for the benefit of sinks that want a
/// single type to match on (e.g. a capturing test sink, or a WebSocket
/// adapter serializing a tagged frame).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    #[serde(rename = "position:update")]
    PositionUpdate(PositionUpdate),
    Alert(Alert),
    #[serde(rename = "device:left")]
    DeviceLeft { device_id: DeviceId },
    Registered { device_id: DeviceId, message: String },
    #[serde(rename = "device:list")]
    DeviceList { devices: Vec<DeviceState> },
}

/// The core's only dependency on the outside world: fan out fused updates
/// and alerts to whatever is subscribed. Never depends on a transport.
pub trait EventSink: Send + Sync {
    fn position_update(&self, update: PositionUpdate);
    fn alert(&self, alert: Alert);
    fn device_left(&self, device_id: DeviceId);
    fn registered(&self, device_id: DeviceId, message: String);
    /// Reply to a `device:list:request` (spec.md §4.7) with the current
    /// active device set.
    fn device_list(&self, devices: Vec<DeviceState>);
}

/// An `EventSink` that captures every event in arrival order, for tests.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of every event recorded so far, in arrival order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("recording sink lock poisoned").clone()
    }
}

impl EventSink for RecordingSink {
    fn position_update(&self, update: PositionUpdate) {
        self.events.lock().expect("recording sink lock poisoned").push(Event::PositionUpdate(update));
    }

    fn alert(&self, alert: Alert) {
        self.events.lock().expect("recording sink lock poisoned").push(Event::Alert(alert));
    }

    fn device_left(&self, device_id: DeviceId) {
        self.events.lock().expect("recording sink lock poisoned").push(Event::DeviceLeft { device_id });
    }

    fn registered(&self, device_id: DeviceId, message: String) {
        self.events
            .lock()
            .expect("recording sink lock poisoned")
            .push(Event::Registered { device_id, message });
    }

    fn device_list(&self, devices: Vec<DeviceState>) {
        self.events.lock().expect("recording sink lock poisoned").push(Event::DeviceList { devices });
    }
}
