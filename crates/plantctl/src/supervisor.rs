//! Supervisor (component H): wires every other component in the fixed
//! start order, owns the ~100 ms main loop, and tears everything down in
//! reverse on shutdown (spec §4.7).
//!
//! Start order: Registry -> Authority -> Reconciler -> Alarm Evaluator ->
//! Control Engine -> IPC Bridge -> cyclic-exchange collaborator. Stop in
//! reverse.

use crate::alarms::AlarmEvaluator;
use crate::authority::AuthorityManager;
use crate::clock::{Clock, MonoMs};
use crate::config::RuntimeConfig;
use crate::control::forced::ForcedOverrideSet;
use crate::control::ControlEngine;
use crate::error::{CoreError, CoreResult};
use crate::fieldbus::FieldbusCollaborator;
use crate::ipc::IpcBridge;
use crate::reconciler::StateReconciler;
use crate::registry::Registry;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Process-wide shutdown flag, flipped by the INT/TERM handler installed
/// via `install_signal_handlers`. Every running `Supervisor`'s main loop
/// observes it alongside its own `request_stop` flag.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signum: i32) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Install INT/TERM handlers that set the process-wide shutdown flag. Safe
/// to call more than once; each call just re-installs the same handler.
pub fn install_signal_handlers() -> CoreResult<()> {
    let action = SigAction::new(SigHandler::Handler(request_shutdown), SaFlags::empty(), SigSet::empty());
    unsafe {
        signal::sigaction(Signal::SIGINT, &action).map_err(|e| CoreError::Io(e.to_string()))?;
        signal::sigaction(Signal::SIGTERM, &action).map_err(|e| CoreError::Io(e.to_string()))?;
    }
    Ok(())
}

pub struct Supervisor {
    cfg: RuntimeConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<Registry>,
    authority: Arc<AuthorityManager>,
    reconciler: Arc<StateReconciler>,
    alarms: Arc<AlarmEvaluator>,
    control: Arc<ControlEngine>,
    ipc: Arc<IpcBridge>,
    stop: Arc<AtomicBool>,
    control_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Construct every component in the fixed dependency order named above.
    pub fn new(cfg: RuntimeConfig, clock: Arc<dyn Clock>, fieldbus: Box<dyn FieldbusCollaborator>) -> CoreResult<Self> {
        let registry = Arc::new(Registry::new(cfg.max_devices, cfg.max_slots_per_device));
        let authority = Arc::new(AuthorityManager::new(cfg.handoff_timeout.as_millis() as u64));
        let reconciler = Arc::new(StateReconciler::new(
            cfg.persistence_dir.clone(),
            cfg.reconcile_staleness.as_millis() as u64,
            cfg.auto_reconcile,
        ));
        let alarms = Arc::new(AlarmEvaluator::new());

        let forced = Arc::new(ForcedOverrideSet::new(cfg.max_forced_overrides));
        let control = Arc::new(ControlEngine::new(
            Arc::clone(&registry),
            Arc::clone(&clock),
            forced,
            cfg.scan_period.as_millis() as u64,
        ));

        let ipc = Arc::new(IpcBridge::new(
            &cfg.shm_name,
            Arc::clone(&registry),
            Arc::clone(&control),
            Arc::clone(&alarms),
            Arc::clone(&authority),
            fieldbus,
        )?);

        Ok(Self {
            cfg,
            clock,
            registry,
            authority,
            reconciler,
            alarms,
            control,
            ipc,
            stop: Arc::new(AtomicBool::new(false)),
            control_thread: Mutex::new(None),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn authority(&self) -> &Arc<AuthorityManager> {
        &self.authority
    }

    pub fn reconciler(&self) -> &Arc<StateReconciler> {
        &self.reconciler
    }

    pub fn alarms(&self) -> &Arc<AlarmEvaluator> {
        &self.alarms
    }

    pub fn control(&self) -> &Arc<ControlEngine> {
        &self.control
    }

    pub fn ipc(&self) -> &Arc<IpcBridge> {
        &self.ipc
    }

    /// Spawn the control thread and run the main loop until `request_stop`
    /// is called or the process-wide signal flag is set. Each tick refreshes
    /// the IPC snapshot, drains the command slot, checks authority
    /// timeouts, and emits a periodic status log.
    pub fn run(&self) -> CoreResult<()> {
        tracing::info!(scan_period_ms = self.cfg.scan_period.as_millis() as u64, "supervisor starting");
        let handle = self.control.run();
        *self.control_thread.lock().unwrap() = Some(handle);

        let tick_ms = self.cfg.supervisor_tick.as_millis() as u64;
        let status_interval_ms = self.cfg.status_log_interval.as_millis() as u64;
        let mut next_status_log = self.clock.now_ms() + status_interval_ms;

        while !self.stop.load(Ordering::SeqCst) && !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            let now = self.clock.now_ms();

            if let Err(e) = self.ipc.update(now) {
                tracing::error!(error = %e, "ipc snapshot refresh failed");
            }
            if let Err(e) = self.ipc.process_commands(now) {
                tracing::error!(error = %e, "ipc command processing failed");
            }
            self.authority.check_timeouts(now);

            if now >= next_status_log {
                self.log_status(now);
                next_status_log = now + status_interval_ms;
            }

            self.clock.sleep_until(now + tick_ms);
        }

        self.shutdown();
        Ok(())
    }

    fn log_status(&self, now: MonoMs) {
        let stats = self.control.stats();
        tracing::info!(
            now_ms = now,
            devices = self.registry.device_count(),
            alarms = self.alarms.active_snapshot(now).len(),
            scans = stats.scan_count,
            mean_scan_us = stats.mean_scan_us(),
            overruns = stats.overruns,
            "status"
        );
    }

    /// Request the main loop to exit on its next tick check.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Tear down in reverse start order. Only the Control Engine and the
    /// IPC Bridge own background state (a thread and a running flag,
    /// respectively) — the remaining components are plain in-memory data
    /// and need no explicit stop step.
    fn shutdown(&self) {
        tracing::info!("supervisor shutting down");
        self.ipc.set_running(false);
        self.control.stop();
        if let Some(handle) = self.control_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
