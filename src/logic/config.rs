//! Pipeline Configuration
//!
//! Process-wide, hot-reloadable settings. Readers take an `Arc` snapshot
//! (never a torn mix of old and new fields); writers validate, persist and
//! swap a whole new snapshot. Invalid writes leave the last-known-good
//! config in effect.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::logic::error::{PipelineError, PipelineResult};
use crate::logic::policy::SeverityThresholds;

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Time between ticks (milliseconds, >= MIN_CAPTURE_INTERVAL_MS)
    pub capture_interval_ms: u64,
    /// Per-label confidence thresholds
    pub thresholds: SeverityThresholds,
    /// Raise user-visible alerts for recorded events
    pub notifications_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture_interval_ms: DEFAULT_CAPTURE_INTERVAL_MS,
            thresholds: SeverityThresholds::default(),
            notifications_enabled: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.capture_interval_ms < MIN_CAPTURE_INTERVAL_MS {
            return Err(PipelineError::ConfigInvalid(format!(
                "capture_interval must be >= {}ms, got {}ms",
                MIN_CAPTURE_INTERVAL_MS, self.capture_interval_ms
            )));
        }
        self.thresholds.validate()
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    /// Read one key as a string
    pub fn get(&self, key: ConfigKey) -> String {
        let t = &self.thresholds;
        match key {
            ConfigKey::CaptureInterval => self.capture_interval_ms.to_string(),
            ConfigKey::ThresholdPorn => t.porn.high.to_string(),
            ConfigKey::ThresholdPornMid => t.porn.mid.to_string(),
            ConfigKey::ThresholdSexy => t.sexy.high.to_string(),
            ConfigKey::ThresholdSexyMid => t.sexy.mid.to_string(),
            ConfigKey::ThresholdHentai => t.hentai.to_string(),
            ConfigKey::EnableNotifications => self.notifications_enabled.to_string(),
        }
    }

    /// Copy with one key replaced. Parses but does not validate.
    pub fn with_value(&self, key: ConfigKey, value: &str) -> PipelineResult<PipelineConfig> {
        let mut next = self.clone();
        let t = &mut next.thresholds;
        match key {
            ConfigKey::CaptureInterval => next.capture_interval_ms = parse_value(key, value)?,
            ConfigKey::ThresholdPorn => t.porn.high = parse_value(key, value)?,
            ConfigKey::ThresholdPornMid => t.porn.mid = parse_value(key, value)?,
            ConfigKey::ThresholdSexy => t.sexy.high = parse_value(key, value)?,
            ConfigKey::ThresholdSexyMid => t.sexy.mid = parse_value(key, value)?,
            ConfigKey::ThresholdHentai => t.hentai = parse_value(key, value)?,
            ConfigKey::EnableNotifications => next.notifications_enabled = parse_value(key, value)?,
        }
        Ok(next)
    }
}

fn parse_value<T: std::str::FromStr>(key: ConfigKey, value: &str) -> PipelineResult<T> {
    value.trim().parse::<T>().map_err(|_| {
        PipelineError::ConfigInvalid(format!("bad value '{}' for {}", value, key.as_str()))
    })
}

// ============================================================================
// CONFIG KEYS
// ============================================================================

/// Enumerated keys of the configuration surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    CaptureInterval,
    ThresholdPorn,
    ThresholdPornMid,
    ThresholdSexy,
    ThresholdSexyMid,
    ThresholdHentai,
    EnableNotifications,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::CaptureInterval,
        ConfigKey::ThresholdPorn,
        ConfigKey::ThresholdPornMid,
        ConfigKey::ThresholdSexy,
        ConfigKey::ThresholdSexyMid,
        ConfigKey::ThresholdHentai,
        ConfigKey::EnableNotifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::CaptureInterval => "capture_interval",
            ConfigKey::ThresholdPorn => "threshold_porn",
            ConfigKey::ThresholdPornMid => "threshold_porn_mid",
            ConfigKey::ThresholdSexy => "threshold_sexy",
            ConfigKey::ThresholdSexyMid => "threshold_sexy_mid",
            ConfigKey::ThresholdHentai => "threshold_hentai",
            ConfigKey::EnableNotifications => "enable_notifications",
        }
    }

    pub fn parse(name: &str) -> PipelineResult<ConfigKey> {
        ConfigKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == name.trim())
            .ok_or_else(|| PipelineError::ConfigInvalid(format!("unknown config key '{}'", name)))
    }
}

// ============================================================================
// CONFIG STORE
// ============================================================================

/// Copy-on-write holder for `PipelineConfig`
pub struct ConfigStore {
    current: RwLock<Arc<PipelineConfig>>,
    /// Serializes writers; readers never take it
    write_lock: Mutex<()>,
    path: Option<PathBuf>,
    generation: AtomicU64,
}

impl ConfigStore {
    /// In-memory store (no persistence)
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self::from_valid(config, None))
    }

    /// Load persisted config from `path`; missing or invalid files fall back
    /// to defaults. Later writes are persisted to `path`.
    pub fn load_or_default(path: &Path) -> Self {
        let config = match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<PipelineConfig>(&content) {
                Ok(cfg) => match cfg.validate() {
                    Ok(()) => {
                        log::info!("Loaded pipeline config from {:?}", path);
                        cfg
                    }
                    Err(e) => {
                        log::warn!("Persisted config rejected ({}), using defaults", e);
                        PipelineConfig::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to parse {:?}: {}", path, e);
                    PipelineConfig::default()
                }
            },
            Err(_) => {
                log::info!("No persisted config at {:?}, using defaults", path);
                PipelineConfig::default()
            }
        };

        Self::from_valid(config, Some(path.to_path_buf()))
    }

    fn from_valid(config: PipelineConfig, path: Option<PathBuf>) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            write_lock: Mutex::new(()),
            path,
            generation: AtomicU64::new(0),
        }
    }

    /// Consistent view of the whole config
    pub fn snapshot(&self) -> Arc<PipelineConfig> {
        self.current.read().clone()
    }

    /// Bumped on every accepted write
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Validate, persist, then publish
    pub fn replace(&self, config: PipelineConfig) -> PipelineResult<Arc<PipelineConfig>> {
        let _writer = self.write_lock.lock();
        self.commit(config)
    }

    /// Read-modify-write under the writer lock
    pub fn update<F>(&self, f: F) -> PipelineResult<Arc<PipelineConfig>>
    where
        F: FnOnce(&mut PipelineConfig),
    {
        let _writer = self.write_lock.lock();
        let mut next = (*self.snapshot()).clone();
        f(&mut next);
        self.commit(next)
    }

    /// Set one key from its string form
    pub fn set(&self, key: ConfigKey, value: &str) -> PipelineResult<Arc<PipelineConfig>> {
        let _writer = self.write_lock.lock();
        let next = self.snapshot().with_value(key, value)?;
        self.commit(next)
    }

    pub fn get(&self, key: ConfigKey) -> String {
        self.snapshot().get(key)
    }

    /// Apply `OATHKEEPER_*` environment overrides (invalid values are logged and skipped)
    pub fn apply_env_overrides(&self) {
        if let Some(interval) = get_capture_interval_override() {
            if let Err(e) = self.update(|c| c.capture_interval_ms = interval) {
                log::warn!("Ignoring OATHKEEPER_CAPTURE_INTERVAL_MS: {}", e);
            }
        }
        if let Some(enabled) = get_notifications_override() {
            if let Err(e) = self.update(|c| c.notifications_enabled = enabled) {
                log::warn!("Ignoring OATHKEEPER_NOTIFICATIONS: {}", e);
            }
        }
    }

    fn commit(&self, config: PipelineConfig) -> PipelineResult<Arc<PipelineConfig>> {
        if let Err(e) = config.validate() {
            log::warn!("Config write rejected: {}", e);
            return Err(e);
        }

        if let Some(path) = &self.path {
            persist(path, &config)?;
        }

        let next = Arc::new(config);
        *self.current.write() = next.clone();
        self.generation.fetch_add(1, Ordering::SeqCst);
        log::debug!("Pipeline config updated: {:?}", next);
        Ok(next)
    }
}

fn persist(path: &Path, config: &PipelineConfig) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PipelineError::Storage(format!("config dir: {}", e)))?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| PipelineError::Storage(format!("config serialize: {}", e)))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| PipelineError::Storage(format!("config write: {}", e)))?;
    fs::rename(&tmp, path).map_err(|e| PipelineError::Storage(format!("config rename: {}", e)))?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
