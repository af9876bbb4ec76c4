//! Runtime configuration, loaded from TOML with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level runtime configuration for the supervisory controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Control-engine scan period (default 100 ms, per the scheduling contract).
    #[serde(with = "humantime_serde")]
    pub scan_period: Duration,

    /// Authority handoff timeout (`handoff_timeout_ms` in the spec).
    #[serde(with = "humantime_serde")]
    pub handoff_timeout: Duration,

    /// Reconciliation staleness threshold: desired state newer than this is
    /// pushed to the RTU automatically on reconnect when `auto_reconcile`.
    #[serde(with = "humantime_serde")]
    pub reconcile_staleness: Duration,

    /// Maximum number of RTUs the registry will accept.
    pub max_devices: usize,

    /// Maximum slots per device (implementation cap, spec recommends >= 64).
    pub max_slots_per_device: usize,

    /// Maximum number of forced-override entries.
    pub max_forced_overrides: usize,

    /// Directory holding one desired-state file per RTU.
    pub persistence_dir: PathBuf,

    /// Name of the POSIX shared-memory object backing the IPC bridge.
    pub shm_name: String,

    /// Supervisor main-loop tick interval (~100 ms).
    #[serde(with = "humantime_serde")]
    pub supervisor_tick: Duration,

    /// Interval between periodic status log lines (~10 s).
    #[serde(with = "humantime_serde")]
    pub status_log_interval: Duration,

    /// Automatically reconcile RTUs on reconnect when the desired state is
    /// fresh enough (see `reconcile_staleness`).
    pub auto_reconcile: bool,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scan_period: Duration::from_millis(100),
            handoff_timeout: Duration::from_millis(5000),
            reconcile_staleness: Duration::from_secs(30),
            max_devices: 256,
            max_slots_per_device: 64,
            max_forced_overrides: 128,
            persistence_dir: PathBuf::from("/var/lib/plantctl/state"),
            shm_name: "/plantctl_region".to_string(),
            supervisor_tick: Duration::from_millis(100),
            status_log_interval: Duration::from_secs(10),
            auto_reconcile: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load from a TOML file, falling back to defaults for absent fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&text)?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "trace" | "debug" | "info" | "warn" | "error".
    pub level: String,
    /// Emit JSON-formatted log lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_literals() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.scan_period, Duration::from_millis(100));
        assert_eq!(cfg.handoff_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.max_forced_overrides, 128);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = RuntimeConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: RuntimeConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.scan_period, cfg.scan_period);
        assert_eq!(back.shm_name, cfg.shm_name);
    }
}
