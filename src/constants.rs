//! Central Configuration Constants
//!
//! Single source of truth for all pipeline defaults.
//! Environment overrides are read through the helpers at the bottom.

/// App name
pub const APP_NAME: &str = "Oathkeeper";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Data directory name under the platform local data dir
pub const DATA_DIR_NAME: &str = "oathkeeper";

/// Event database file name
pub const DATABASE_FILE: &str = "oathkeeper_events.db";

/// Persisted pipeline config file name
pub const CONFIG_FILE: &str = "pipeline_config.json";

// ============================================
// Scheduler
// ============================================

/// Default capture interval (milliseconds)
pub const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 2000;

/// Lower bound for the capture interval (milliseconds)
pub const MIN_CAPTURE_INTERVAL_MS: u64 = 500;

/// How long `stop()` waits for an in-flight cycle before abandoning it
pub const DEFAULT_STOP_GRACE_MS: u64 = 5000;

// ============================================
// Severity thresholds
// ============================================

pub const DEFAULT_THRESHOLD_PORN_HIGH: f32 = 0.7;
pub const DEFAULT_THRESHOLD_PORN_MID: f32 = 0.5;
pub const DEFAULT_THRESHOLD_SEXY_HIGH: f32 = 0.8;
pub const DEFAULT_THRESHOLD_SEXY_MID: f32 = 0.6;
pub const DEFAULT_THRESHOLD_HENTAI: f32 = 0.7;

// ============================================
// Model
// ============================================

/// Default model asset file name
pub const DEFAULT_MODEL_FILE: &str = "nsfw_mobilenet_v2.onnx";

/// Square input resolution of the model
pub const MODEL_INPUT_SIZE: u32 = 224;

// ============================================
// Alerts
// ============================================

/// Connect and overall request timeout for webhook posts (milliseconds)
pub const WEBHOOK_TIMEOUT_MS: u64 = 5000;

/// Alerts waiting for the webhook worker; further alerts are dropped
pub const WEBHOOK_QUEUE_CAPACITY: usize = 32;

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Base data directory (`OATHKEEPER_DATA_DIR` or platform local data dir)
pub fn get_data_dir() -> std::path::PathBuf {
    std::env::var("OATHKEEPER_DATA_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join(DATA_DIR_NAME)
        })
}

/// Model path from environment or default location in the data dir
pub fn get_model_path() -> std::path::PathBuf {
    std::env::var("OATHKEEPER_MODEL_PATH")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| get_data_dir().join(DEFAULT_MODEL_FILE))
}

/// Directory the external capture tool drops frames into
pub fn get_spool_dir() -> std::path::PathBuf {
    std::env::var("OATHKEEPER_SPOOL_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| get_data_dir().join("spool"))
}

/// Hex encoded 32-byte store key, provisioned externally
pub fn get_store_key_hex() -> Option<String> {
    std::env::var("OATHKEEPER_STORE_KEY").ok()
}

/// Optional webhook URL for alerts
pub fn get_webhook_url() -> Option<String> {
    std::env::var("OATHKEEPER_WEBHOOK_URL")
        .ok()
        .filter(|s| !s.trim().is_empty())
}

/// Capture interval override
pub fn get_capture_interval_override() -> Option<u64> {
    std::env::var("OATHKEEPER_CAPTURE_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
}

/// Notifications toggle override
pub fn get_notifications_override() -> Option<bool> {
    std::env::var("OATHKEEPER_NOTIFICATIONS")
        .ok()
        .map(|s| s.to_lowercase() != "false" && s != "0")
}
