//! Positioning engine (spec.md §4.4, C6): chooses GPS vs dead-reckoning,
//! computes an indoor `(x, y)` via trilateration when enough RSSI beacons
//! are visible, and writes the resulting state into the device store.

use nalgebra::Vector2;

use crate::config::Config;
use crate::fusion::FusionOutput;
use crate::geometry::{self, Anchor, LatLng};
use crate::models::{DeviceId, DeviceState, IndoorPosition, IngestPayload, RawSensorSample};
use crate::store::{DevicePatch, DeviceStore};

/// Run the positioning step for one inbound packet and upsert the result
/// into `store`. Returns the merged device state (spec.md §4.4 step 5).
pub fn position_device(
    store: &DeviceStore,
    config: &Config,
    device_id: &DeviceId,
    payload: &IngestPayload,
    fused: FusionOutput,
    now: i64,
) -> DeviceState {
    let prev = store.get(device_id);

    let fallback = LatLng::new(
        prev.as_ref().and_then(|p| p.lat).or(payload.gps.map(|g| g.lat)).unwrap_or(0.0),
        prev.as_ref().and_then(|p| p.lng).or(payload.gps.map(|g| g.lng)).unwrap_or(0.0),
    );

    let position = if fused.should_use_gps && payload.gps.is_some() {
        let gps = payload.gps.unwrap();
        LatLng::new(gps.lat, gps.lng)
    } else if let Some(prev) = prev.as_ref() {
        // Advance from the resolved fallback position (spec.md §4.4 step 1),
        // not just a confirmed prior fix — a device registered without a
        // position yet (e.g. via `register()`) still has a `lastUpdate` to
        // measure `dt` from, and the spec's step 3 advances "(lat,lng)"
        // unconditionally whenever `prev` exists.
        let dt_ms = (now - prev.last_update) as f64;
        geometry::dead_reckon(fallback, fused.heading, fused.speed_mps, dt_ms.max(0.0))
    } else {
        fallback
    };

    let indoor_position = compute_indoor_position(config, payload);

    let patch = DevicePatch {
        is_base_station: payload.is_base_station,
        lat: Some(position.lat),
        lng: Some(position.lng),
        indoor_position: Some(indoor_position),
        heading: Some(fused.heading),
        speed_mps: Some(fused.speed_mps),
        confidence: Some(fused.confidence),
        rssi_updates: payload
            .rssi_beacons
            .iter()
            .flatten()
            .map(|b| (b.device_id.clone(), b.rssi as i32))
            .collect(),
        last_raw_sensor: Some(RawSensorSample {
            accelerometer: payload.accelerometer,
            gyroscope: payload.gyroscope,
            magnetometer: payload.magnetometer,
        }),
    };

    store.update(device_id, patch, now)
}

/// Haversine distance between two devices' outdoor positions, or `None` if
/// either lacks a fix (spec.md §4.4 `distanceBetween`).
pub fn distance_between(a: &DeviceState, b: &DeviceState) -> Option<f64> {
    let (a_lat, a_lng) = (a.lat?, a.lng?);
    let (b_lat, b_lng) = (b.lat?, b.lng?);
    Some(geometry::haversine(LatLng::new(a_lat, a_lng), LatLng::new(b_lat, b_lng)))
}

/// Trilaterate an indoor position from RSSI beacons, when at least
/// `config.indoor.min_base_stations` are present (spec.md §4.4 step 4).
/// Degenerate geometry (collinear/coincident anchors) yields `None`, never
/// a crash (spec.md §4.9).
fn compute_indoor_position(config: &Config, payload: &IngestPayload) -> Option<IndoorPosition> {
    let beacons = payload.rssi_beacons.as_ref()?;
    if beacons.len() < config.indoor.min_base_stations {
        return None;
    }

    let anchors: Vec<Anchor> = beacons
        .iter()
        .map(|b| Anchor {
            position: Vector2::new(b.position.x, b.position.y),
            range_m: geometry::rssi_to_distance(
                b.rssi,
                config.indoor.rssi_measured_at_1m,
                config.indoor.rssi_path_loss_exponent,
            ),
        })
        .collect();

    geometry::trilaterate(anchors[0], anchors[1], anchors[2]).map(|p| IndoorPosition { x: p.x, y: p.y })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BeaconPosition, GpsFix, RssiBeacon, Vec3};

    fn base_payload(device_id: &str) -> IngestPayload {
        IngestPayload {
            device_id: device_id.to_string(),
            accelerometer: Vec3::zero(),
            gyroscope: Vec3::zero(),
            magnetometer: Vec3::zero(),
            gps: None,
            is_base_station: None,
            rssi_beacons: None,
            timestamp: None,
        }
    }

    fn fused(should_use_gps: bool) -> FusionOutput {
        FusionOutput { heading: 0.0, speed_mps: 0.0, confidence: if should_use_gps { 0.1 } else { 0.9 }, should_use_gps }
    }

    #[test]
    fn gps_fallback_uses_gps_fix_when_confidence_is_low() {
        let store = DeviceStore::new();
        let mut payload = base_payload("dev-A");
        payload.gps = Some(GpsFix { lat: 10.0, lng: 20.0, accuracy: None });

        let state = position_device(&store, &Config::default(), &"dev-A".to_string(), &payload, fused(true), 1000);
        assert_eq!(state.lat, Some(10.0));
        assert_eq!(state.lng, Some(20.0));
    }

    #[test]
    fn dead_reckoning_advances_from_prior_fix_without_gps() {
        let store = DeviceStore::new();
        let mut first = base_payload("dev-A");
        first.gps = Some(GpsFix { lat: 0.0, lng: 0.0, accuracy: None });
        position_device(&store, &Config::default(), &"dev-A".to_string(), &first, fused(true), 0);

        let mut second = base_payload("dev-A");
        second.gps = None;
        let moving = FusionOutput { heading: 0.0, speed_mps: 10.0, confidence: 0.9, should_use_gps: false };
        let state = position_device(&store, &Config::default(), &"dev-A".to_string(), &second, moving, 1000);

        assert!(state.lat.unwrap() > 0.0, "expected northward dead reckoning");
    }

    #[test]
    fn dead_reckoning_runs_for_a_registered_device_with_no_confirmed_fix() {
        // A device that only ever went through `register()` has a
        // `lastUpdate` but no `lat`/`lng` yet. Per spec.md §4.4 step 3, the
        // positioning engine must still dead-reckon from the resolved
        // fallback once `prev` exists, rather than skip straight to the
        // unmoved fallback.
        let store = DeviceStore::new();
        let register_patch = DevicePatch { is_base_station: Some(false), ..Default::default() };
        store.update("dev-A", register_patch, 0);

        let mut payload = base_payload("dev-A");
        payload.gps = None;
        let moving = FusionOutput { heading: 0.0, speed_mps: 10.0, confidence: 0.9, should_use_gps: false };
        let state = position_device(&store, &Config::default(), &"dev-A".to_string(), &payload, moving, 1000);

        assert!(state.lat.unwrap() > 0.0, "expected dead reckoning from the (0,0) fallback, not a frozen position");
    }

    #[test]
    fn fewer_than_three_beacons_yields_no_indoor_position() {
        let store = DeviceStore::new();
        let mut payload = base_payload("dev-A");
        payload.rssi_beacons = Some(vec![
            RssiBeacon { device_id: "b1".into(), rssi: -50.0, position: BeaconPosition { x: 0.0, y: 0.0 } },
            RssiBeacon { device_id: "b2".into(), rssi: -55.0, position: BeaconPosition { x: 5.0, y: 0.0 } },
        ]);
        let state = position_device(&store, &Config::default(), &"dev-A".to_string(), &payload, fused(false), 0);
        assert!(state.indoor_position.is_none());
    }

    #[test]
    fn three_or_more_beacons_produce_an_indoor_position() {
        let store = DeviceStore::new();
        let mut payload = base_payload("dev-A");
        payload.rssi_beacons = Some(vec![
            RssiBeacon { device_id: "b1".into(), rssi: -40.0, position: BeaconPosition { x: 0.0, y: 0.0 } },
            RssiBeacon { device_id: "b2".into(), rssi: -40.0, position: BeaconPosition { x: 10.0, y: 0.0 } },
            RssiBeacon { device_id: "b3".into(), rssi: -40.0, position: BeaconPosition { x: 0.0, y: 10.0 } },
        ]);
        let state = position_device(&store, &Config::default(), &"dev-A".to_string(), &payload, fused(false), 0);
        assert!(state.indoor_position.is_some());
    }

    #[test]
    fn distance_between_is_none_without_both_fixes() {
        let a = DeviceState::new("a".into(), 0);
        let mut b = DeviceState::new("b".into(), 0);
        b.lat = Some(1.0);
        b.lng = Some(1.0);
        assert!(distance_between(&a, &b).is_none());
    }
}
