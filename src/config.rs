//! Runtime configuration
//!
//! Thresholds, window sizes, TTLs, and RSSI model constants for the fusion
//! pipeline. All values have sane defaults and can be overridden by
//! environment variables at startup.

/// Safety thresholds driving proximity and speed alerting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyConfig {
    /// Distance below which a pair is classified `collision` (meters).
    pub collision_distance_meters: f64,
    /// Distance below which a pair is classified `warning` (meters).
    pub warning_distance_meters: f64,
    /// Speed above which a device triggers a speed alert (m/s).
    pub max_speed_ms: f64,
    /// Confidence below which the positioning engine prefers GPS.
    pub sensor_confidence_threshold: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            collision_distance_meters: 2.0,
            warning_distance_meters: 5.0,
            max_speed_ms: 15.0,
            sensor_confidence_threshold: 0.6,
        }
    }
}

/// Sensor fusion tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    /// Moving-average window size for accel/gyro/mag buffers.
    pub smoothing_window: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { smoothing_window: 5 }
    }
}

/// Indoor positioning (RSSI trilateration) tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndoorConfig {
    /// Log-distance path-loss exponent `n`.
    pub rssi_path_loss_exponent: f64,
    /// Reference RSSI at 1 meter (dBm).
    pub rssi_measured_at_1m: f64,
    /// Minimum visible anchors required to trilaterate.
    pub min_base_stations: usize,
}

impl Default for IndoorConfig {
    fn default() -> Self {
        Self {
            rssi_path_loss_exponent: 2.0,
            rssi_measured_at_1m: -40.0,
            min_base_stations: 3,
        }
    }
}

/// Top-level configuration for the telemetry fusion core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub safety: SafetyConfig,
    pub fusion: FusionConfig,
    pub indoor: IndoorConfig,
    /// Staleness cutoff after which a device is pruned from the store (ms).
    pub device_ttl_ms: i64,
    /// Minimum interval between two emissions of the same alert key (ms).
    pub dedup_window_ms: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            safety: SafetyConfig::default(),
            fusion: FusionConfig::default(),
            indoor: IndoorConfig::default(),
            device_ttl_ms: 30_000,
            dedup_window_ms: 3_000,
        }
    }
}

impl Config {
    /// Build a default configuration, overlaying any recognized environment
    /// variables that parse cleanly. Unset or unparsable variables fall back
    /// to the default silently — configuration errors are never fatal.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        overlay_f64("SAFETY_COLLISION_DISTANCE_METERS", &mut config.safety.collision_distance_meters);
        overlay_f64("SAFETY_WARNING_DISTANCE_METERS", &mut config.safety.warning_distance_meters);
        overlay_f64("SAFETY_MAX_SPEED_MS", &mut config.safety.max_speed_ms);
        overlay_f64(
            "SAFETY_SENSOR_CONFIDENCE_THRESHOLD",
            &mut config.safety.sensor_confidence_threshold,
        );
        overlay_usize("FUSION_SMOOTHING_WINDOW", &mut config.fusion.smoothing_window);
        overlay_f64("INDOOR_RSSI_PATH_LOSS_EXPONENT", &mut config.indoor.rssi_path_loss_exponent);
        overlay_f64("INDOOR_RSSI_MEASURED_AT_1M", &mut config.indoor.rssi_measured_at_1m);
        overlay_usize("INDOOR_MIN_BASE_STATIONS", &mut config.indoor.min_base_stations);
        overlay_i64("DEVICE_TTL_MS", &mut config.device_ttl_ms);
        overlay_i64("DEDUP_WINDOW_MS", &mut config.dedup_window_ms);

        config
    }
}

fn overlay_f64(key: &str, slot: &mut f64) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(value) = raw.parse() {
            *slot = value;
        }
    }
}

fn overlay_i64(key: &str, slot: &mut i64) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(value) = raw.parse() {
            *slot = value;
        }
    }
}

fn overlay_usize(key: &str, slot: &mut usize) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(value) = raw.parse() {
            *slot = value;
        }
    }
}
