//! Control Engine (component E): the periodic supervisory scan — interlocks,
//! then PID loops, then forced-output masking, in that fixed order.

pub mod forced;
pub mod interlock;
pub mod pid;

use crate::clock::{Clock, MonoMs};
use crate::registry::types::{ActuatorCommand, Quality};
use crate::registry::Registry;
use forced::ForcedOverrideSet;
use interlock::Interlock;
use pid::{PidLoop, PidMode, SlotRef};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Owned rollup of one PID loop's identity and runtime state, for the IPC
/// snapshot array.
#[derive(Debug, Clone, Copy)]
pub struct PidSnapshot {
    pub loop_id: u32,
    pub mode: PidMode,
    pub enabled: bool,
    pub setpoint: f32,
    pub last_output: f32,
}

/// Running min/max/mean scan-timing counters (§4.4 "running min/max/mean
/// counters").
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlEngineStats {
    pub scan_count: u64,
    pub last_scan_us: u64,
    pub min_scan_us: u64,
    pub max_scan_us: u64,
    sum_scan_us: u128,
    pub overruns: u64,
}

impl ControlEngineStats {
    pub fn mean_scan_us(&self) -> f64 {
        if self.scan_count == 0 {
            0.0
        } else {
            self.sum_scan_us as f64 / self.scan_count as f64
        }
    }

    fn record(&mut self, elapsed_us: u64, overran: bool) {
        self.scan_count += 1;
        self.last_scan_us = elapsed_us;
        self.min_scan_us = if self.scan_count == 1 { elapsed_us } else { self.min_scan_us.min(elapsed_us) };
        self.max_scan_us = self.max_scan_us.max(elapsed_us);
        self.sum_scan_us += elapsed_us as u128;
        if overran {
            self.overruns += 1;
        }
    }
}

pub struct ControlEngine {
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    pid_loops: Mutex<Vec<PidLoop>>,
    interlocks: Mutex<Vec<Interlock>>,
    forced: Arc<ForcedOverrideSet>,
    scan_period_ms: u64,
    stats: Mutex<ControlEngineStats>,
    stop: Arc<AtomicBool>,
}

impl ControlEngine {
    pub fn new(
        registry: Arc<Registry>,
        clock: Arc<dyn Clock>,
        forced: Arc<ForcedOverrideSet>,
        scan_period_ms: u64,
    ) -> Self {
        Self {
            registry,
            clock,
            pid_loops: Mutex::new(Vec::new()),
            interlocks: Mutex::new(Vec::new()),
            forced,
            scan_period_ms,
            stats: Mutex::new(ControlEngineStats::default()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_pid_loop(&self, pid: PidLoop) {
        self.pid_loops.lock().unwrap().push(pid);
    }

    pub fn add_interlock(&self, il: Interlock) {
        self.interlocks.lock().unwrap().push(il);
    }

    pub fn stats(&self) -> ControlEngineStats {
        *self.stats.lock().unwrap()
    }

    pub fn set_pid_mode(&self, loop_id: u32, mode: pid::PidMode) -> crate::error::CoreResult<()> {
        let mut loops = self.pid_loops.lock().unwrap();
        let l = loops
            .iter_mut()
            .find(|l| l.id == loop_id)
            .ok_or_else(|| crate::error::CoreError::NotFound(format!("pid loop {loop_id}")))?;
        l.mode = mode;
        Ok(())
    }

    pub fn set_pid_setpoint(&self, loop_id: u32, setpoint: f32) -> crate::error::CoreResult<()> {
        let mut loops = self.pid_loops.lock().unwrap();
        let l = loops
            .iter_mut()
            .find(|l| l.id == loop_id)
            .ok_or_else(|| crate::error::CoreError::NotFound(format!("pid loop {loop_id}")))?;
        l.setpoint = setpoint;
        Ok(())
    }

    pub fn reset_interlock(&self, interlock_id: u32) -> crate::error::CoreResult<()> {
        let mut interlocks = self.interlocks.lock().unwrap();
        let il = interlocks
            .iter_mut()
            .find(|i| i.id == interlock_id)
            .ok_or_else(|| crate::error::CoreError::NotFound(format!("interlock {interlock_id}")))?;
        il.reset();
        Ok(())
    }

    /// Owned snapshot of every configured PID loop, for the IPC rollup.
    pub fn pid_snapshots(&self) -> Vec<PidSnapshot> {
        self.pid_loops
            .lock()
            .unwrap()
            .iter()
            .map(|p| PidSnapshot {
                loop_id: p.id,
                mode: p.mode,
                enabled: p.enabled,
                setpoint: p.setpoint,
                last_output: p.last_output(),
            })
            .collect()
    }

    fn read_slot(&self, slot: &SlotRef) -> Option<(f32, Quality)> {
        self.registry.get_sensor(&slot.station, slot.slot).ok().map(|s| (s.value, s.quality))
    }

    fn write_slot(&self, slot: &SlotRef, command: ActuatorCommand) {
        if let Err(e) = self.registry.update_actuator(&slot.station, slot.slot, command) {
            tracing::warn!(station = %slot.station, slot = slot.slot, error = %e, "failed to write actuator command");
        }
    }

    /// Execute exactly one scan: interlocks, then PID loops (skipping any
    /// output an interlock already forced this scan), then forced-output
    /// masking. Individual loop/interlock errors are logged and skipped —
    /// a single slow registry call never aborts the scan.
    pub fn scan(&self, now: MonoMs) {
        let mut forced_this_scan: HashSet<(String, usize)> = HashSet::new();

        {
            let mut interlocks = self.interlocks.lock().unwrap();
            for il in interlocks.iter_mut() {
                let sample = self.read_slot(&il.condition);
                if let Some(cmd) = il.evaluate(sample, now) {
                    self.write_slot(&il.action_target, cmd);
                    forced_this_scan.insert((il.action_target.station.clone(), il.action_target.slot));
                }
            }
        }

        {
            let mut pid_loops = self.pid_loops.lock().unwrap();
            for p in pid_loops.iter_mut() {
                let key = (p.output.station.clone(), p.output.slot);
                if forced_this_scan.contains(&key) {
                    continue;
                }
                let sample = self.read_slot(&p.input);
                if let Some(output) = p.update(sample, None, now) {
                    let cmd = PidLoop::project_output(output);
                    self.write_slot(&p.output, cmd);
                }
            }
        }

        for (key, command) in self.forced.snapshot() {
            self.write_slot(&SlotRef { station: key.station, slot: key.slot }, command);
        }
    }

    /// Spawn the control thread. Returns a join handle; call `stop()` to
    /// request shutdown, which is observed between scans (an in-flight scan
    /// always runs to completion).
    pub fn run(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let engine = Arc::clone(self);
        std::thread::Builder::new()
            .name("control".to_string())
            .spawn(move || engine.scan_loop())
            .expect("failed to spawn control thread")
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn scan_loop(&self) {
        let mut next_scan_ms = self.clock.now_ms() + self.scan_period_ms;
        while !self.stop.load(Ordering::SeqCst) {
            let scan_start = self.clock.now_ms();
            self.scan(scan_start);
            let elapsed_ms = self.clock.now_ms().saturating_sub(scan_start);
            let overran = elapsed_ms > self.scan_period_ms;
            self.stats.lock().unwrap().record(elapsed_ms * 1000, overran);

            if overran {
                // No catch-up spiral: reset the deadline relative to now.
                next_scan_ms = self.clock.now_ms() + self.scan_period_ms;
            } else {
                next_scan_ms += self.scan_period_ms;
            }
            self.clock.sleep_until(next_scan_ms);
        }
    }
}
