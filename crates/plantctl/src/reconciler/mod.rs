//! State Reconciler (component D): per-RTU desired state, persisted across
//! restarts, converged to the RTU after reconnection.

pub mod persistence;
pub mod state;

use crate::clock::MonoMs;
use crate::error::CoreResult;
use crate::registry::types::ActuatorCommand;
use state::{DesiredState, PidMode};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileResult {
    pub synced: usize,
    pub conflicted: usize,
    pub elapsed_ms: u64,
    pub success: bool,
}

/// Observed actual state reported by an RTU on reconnect.
pub struct ActualState<'a> {
    pub actuators: &'a [(usize, ActuatorCommand)],
    pub pid_loops: &'a [(u32, PidMode, f32, bool)],
}

pub struct StateReconciler {
    states: Mutex<HashMap<String, DesiredState>>,
    persistence_dir: PathBuf,
    staleness_ms: u64,
    auto_reconcile: bool,
}

impl StateReconciler {
    pub fn new(persistence_dir: PathBuf, staleness_ms: u64, auto_reconcile: bool) -> Self {
        Self { states: Mutex::new(HashMap::new()), persistence_dir, staleness_ms, auto_reconcile }
    }

    /// Desired state for `station`, creating an empty-but-valid one if
    /// absent. Returns an owned copy.
    pub fn get(&self, station: &str) -> DesiredState {
        let mut states = self.states.lock().unwrap();
        states.entry(station.to_string()).or_insert_with(|| DesiredState::empty(station)).clone()
    }

    pub fn set_actuator(&self, station: &str, slot: usize, command: ActuatorCommand, now: MonoMs) -> CoreResult<()> {
        let mut states = self.states.lock().unwrap();
        let state = states.entry(station.to_string()).or_insert_with(|| DesiredState::empty(station));
        state.set_actuator(slot, command, now);
        let snap = state.clone();
        drop(states);
        persistence::snapshot(&self.persistence_dir, &snap)
    }

    pub fn set_pid_loop(
        &self,
        station: &str,
        loop_id: u32,
        mode: PidMode,
        setpoint: f32,
        enabled: bool,
        now: MonoMs,
    ) -> CoreResult<()> {
        let mut states = self.states.lock().unwrap();
        let state = states.entry(station.to_string()).or_insert_with(|| DesiredState::empty(station));
        state.set_pid_loop(loop_id, mode, setpoint, enabled, now);
        let snap = state.clone();
        drop(states);
        persistence::snapshot(&self.persistence_dir, &snap)
    }

    /// Load a station's desired state from disk. On checksum failure the
    /// state is re-initialised to empty-but-valid, per the persistence
    /// contract ("a mismatch yields CORRUPT and the desired state is
    /// re-initialised to empty-but-valid").
    pub fn restore(&self, station: &str) -> CoreResult<()> {
        let restored = match persistence::restore(&self.persistence_dir, station) {
            Ok(s) => s,
            Err(e) if e.kind_name() == "CORRUPT" => DesiredState::empty(station),
            Err(e) => return Err(e),
        };
        self.states.lock().unwrap().insert(station.to_string(), restored);
        Ok(())
    }

    /// Run the reconciliation algorithm against a reported actual state.
    /// `push_actuator`/`push_pid` are invoked to resolve conflicts when
    /// auto-reconciliation is eligible; `on_conflict` is invoked instead
    /// (and the stored state left untouched) otherwise.
    pub fn reconcile(
        &self,
        station: &str,
        actual: &ActualState<'_>,
        now: MonoMs,
        mut push_actuator: impl FnMut(usize, ActuatorCommand),
        mut push_pid: impl FnMut(u32, PidMode, f32, bool),
        mut on_conflict: impl FnMut(&str, &str),
    ) -> ReconcileResult {
        let start = now;
        let desired = self.get(station);
        let mut synced = 0usize;
        let mut conflicted = 0usize;

        let fresh = now.saturating_sub(desired.timestamp_ms) < self.staleness_ms;
        let should_push = self.auto_reconcile && fresh;

        for (slot, actual_cmd) in actual.actuators {
            if let Some(desired_cmd) = desired.actuator_command(*slot) {
                if desired_cmd == *actual_cmd {
                    synced += 1;
                } else {
                    conflicted += 1;
                    if should_push {
                        push_actuator(*slot, desired_cmd);
                    } else {
                        on_conflict(station, &format!("actuator slot {slot}"));
                    }
                }
            }
        }

        for (loop_id, actual_mode, actual_sp, actual_enabled) in actual.pid_loops {
            if let Some(desired_pid) = desired.pid_loops.iter().find(|p| p.loop_id == *loop_id) {
                let matches = desired_pid.mode == *actual_mode
                    && desired_pid.enabled == *actual_enabled
                    && (desired_pid.setpoint - actual_sp).abs() < f32::EPSILON;
                if matches {
                    synced += 1;
                } else {
                    conflicted += 1;
                    if should_push {
                        push_pid(*loop_id, desired_pid.mode, desired_pid.setpoint, desired_pid.enabled);
                    } else {
                        on_conflict(station, &format!("pid loop {loop_id}"));
                    }
                }
            }
        }

        ReconcileResult {
            synced,
            conflicted,
            elapsed_ms: now.saturating_sub(start),
            success: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::types::CommandCode;

    fn cmd(code: CommandCode, duty: u8) -> ActuatorCommand {
        ActuatorCommand { code, pwm_duty: duty, forced: false }
    }

    #[test]
    fn matching_actual_state_is_synced() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = StateReconciler::new(tmp.path().to_path_buf(), 30_000, true);
        rec.set_actuator("rtu-1", 9, cmd(CommandCode::On, 0), 0).unwrap();

        let actual = ActualState { actuators: &[(9, cmd(CommandCode::On, 0))], pid_loops: &[] };
        let result = rec.reconcile("rtu-1", &actual, 10, |_, _| {}, |_, _, _, _| {}, |_, _| {});
        assert_eq!(result.synced, 1);
        assert_eq!(result.conflicted, 0);
    }

    #[test]
    fn fresh_conflict_pushes_desired_state() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = StateReconciler::new(tmp.path().to_path_buf(), 30_000, true);
        rec.set_actuator("rtu-1", 9, cmd(CommandCode::On, 0), 0).unwrap();

        let actual = ActualState { actuators: &[(9, cmd(CommandCode::Off, 0))], pid_loops: &[] };
        let mut pushed = None;
        let result = rec.reconcile(
            "rtu-1",
            &actual,
            100,
            |slot, c| pushed = Some((slot, c)),
            |_, _, _, _| {},
            |_, _| panic!("should not conflict-callback when pushing"),
        );
        assert_eq!(result.conflicted, 1);
        assert_eq!(pushed, Some((9, cmd(CommandCode::On, 0))));
    }

    #[test]
    fn stale_conflict_emits_callback_and_leaves_state_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = StateReconciler::new(tmp.path().to_path_buf(), 10, true);
        rec.set_actuator("rtu-1", 9, cmd(CommandCode::On, 0), 0).unwrap();

        let actual = ActualState { actuators: &[(9, cmd(CommandCode::Off, 0))], pid_loops: &[] };
        let mut conflicts = Vec::new();
        let result = rec.reconcile(
            "rtu-1",
            &actual,
            1_000, // far past staleness threshold
            |_, _| panic!("should not push when stale"),
            |_, _, _, _| {},
            |station, what| conflicts.push((station.to_string(), what.to_string())),
        );
        assert_eq!(result.conflicted, 1);
        assert_eq!(conflicts.len(), 1);
    }

    #[test]
    fn restore_recovers_from_corruption_as_empty_but_valid() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = StateReconciler::new(tmp.path().to_path_buf(), 30_000, true);
        rec.set_actuator("rtu-1", 9, cmd(CommandCode::On, 0), 0).unwrap();

        let path = persistence::file_path(tmp.path(), "rtu-1");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        rec.restore("rtu-1").unwrap();
        let state = rec.get("rtu-1");
        assert!(state.validate_checksum());
        assert!(state.actuators.is_empty());
    }
}
