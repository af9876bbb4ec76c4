//! Plant Supervisory Controller (plantctl)
//!
//! Standalone service that:
//! - Aggregates an RTU fleet over a cyclic-exchange fieldbus abstraction
//! - Drives PID/interlock control on a fixed scan period
//! - Reconciles authority and desired state across reconnects
//! - Exposes a POSIX shared-memory IPC bridge to an external API tier
//!
//! Config path: `PLANTCTL_CONFIG` env var, defaulting to
//! `/etc/plantctl/config.toml`; a missing file falls back to built-in
//! defaults rather than failing start-up.

use anyhow::Context;
use plantctl::clock::SystemClock;
use plantctl::config::RuntimeConfig;
use plantctl::fieldbus::MockFieldbus;
use plantctl::supervisor::{self, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

fn load_config() -> anyhow::Result<RuntimeConfig> {
    let path = std::env::var("PLANTCTL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/plantctl/config.toml"));

    if path.exists() {
        RuntimeConfig::load(&path).with_context(|| format!("loading config from {}", path.display()))
    } else {
        Ok(RuntimeConfig::default())
    }
}

fn run() -> anyhow::Result<()> {
    let cfg = load_config()?;
    plantctl::logging::init(&cfg.logging);

    info!("Starting Plant Supervisory Controller (plantctl)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    supervisor::install_signal_handlers().context("installing INT/TERM signal handlers")?;

    let clock = Arc::new(SystemClock::new());
    let fieldbus = Box::new(MockFieldbus::new());
    let sup = Supervisor::new(cfg, clock, fieldbus).context("wiring supervisor components")?;

    sup.run().context("supervisor main loop")?;
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        plantctl::fatal!("plantctl failed to start: {e:#}");
        std::process::exit(1);
    }
}
