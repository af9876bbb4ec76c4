//! Versioned desired-state snapshot (spec §3 "Desired state") and its
//! deterministic checksum.

use crate::registry::types::{ActuatorCommand, CommandCode};
use serde::{Deserialize, Serialize};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PidMode {
    Off,
    Manual,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredActuator {
    pub slot: usize,
    pub command: ActuatorCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredPid {
    pub loop_id: u32,
    pub mode: PidMode,
    pub setpoint: f32,
    pub enabled: bool,
}

/// Fields that participate in the checksum, explicitly excluding `sequence`
/// and `checksum` themselves per the invariant in spec §3.
#[derive(Serialize)]
struct ChecksumView<'a> {
    version: u32,
    timestamp_ms: u64,
    station: &'a str,
    actuators: &'a [DesiredActuator],
    pid_loops: &'a [DesiredPid],
    valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub version: u32,
    pub sequence: u64,
    pub checksum: u32,
    pub timestamp_ms: u64,
    pub station: String,
    pub actuators: Vec<DesiredActuator>,
    pub pid_loops: Vec<DesiredPid>,
    pub valid: bool,
    #[serde(skip)]
    pub dirty: bool,
}

impl DesiredState {
    pub fn empty(station: &str) -> Self {
        let mut s = Self {
            version: FORMAT_VERSION,
            sequence: 0,
            checksum: 0,
            timestamp_ms: 0,
            station: station.to_string(),
            actuators: Vec::new(),
            pid_loops: Vec::new(),
            valid: true,
            dirty: false,
        };
        s.checksum = s.compute_checksum();
        s
    }

    fn checksum_view(&self) -> ChecksumView<'_> {
        ChecksumView {
            version: self.version,
            timestamp_ms: self.timestamp_ms,
            station: &self.station,
            actuators: &self.actuators,
            pid_loops: &self.pid_loops,
            valid: self.valid,
        }
    }

    pub fn compute_checksum(&self) -> u32 {
        let bytes = serde_json::to_vec(&self.checksum_view()).expect("checksum view is always serializable");
        fnv1a32(&bytes)
    }

    pub fn validate_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Mutate the actuator entry for `slot`, bumping sequence/timestamp,
    /// marking dirty, and recomputing the checksum.
    pub fn set_actuator(&mut self, slot: usize, command: ActuatorCommand, now_ms: u64) {
        if let Some(entry) = self.actuators.iter_mut().find(|a| a.slot == slot) {
            entry.command = command;
        } else {
            self.actuators.push(DesiredActuator { slot, command });
        }
        self.touch(now_ms);
    }

    /// Mutate the desired PID-loop entry, bumping sequence/timestamp,
    /// marking dirty, and recomputing the checksum.
    pub fn set_pid_loop(&mut self, loop_id: u32, mode: PidMode, setpoint: f32, enabled: bool, now_ms: u64) {
        if let Some(entry) = self.pid_loops.iter_mut().find(|p| p.loop_id == loop_id) {
            entry.mode = mode;
            entry.setpoint = setpoint;
            entry.enabled = enabled;
        } else {
            self.pid_loops.push(DesiredPid { loop_id, mode, setpoint, enabled });
        }
        self.touch(now_ms);
    }

    fn touch(&mut self, now_ms: u64) {
        self.sequence += 1;
        self.timestamp_ms = now_ms;
        self.dirty = true;
        self.checksum = self.compute_checksum();
    }

    pub fn actuator_command(&self, slot: usize) -> Option<ActuatorCommand> {
        self.actuators.iter().find(|a| a.slot == slot).map(|a| a.command)
    }
}

/// FNV-1a, 32-bit. Deterministic and dependency-free; used only for the
/// desired-state self-checksum, not as a cryptographic hash.
pub fn fnv1a32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for byte in data {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_increments_sequence_and_stays_valid() {
        let mut s = DesiredState::empty("rtu-1");
        let seq0 = s.sequence;
        assert!(s.validate_checksum());
        s.set_actuator(9, ActuatorCommand { code: CommandCode::On, pwm_duty: 0, forced: false }, 100);
        assert_eq!(s.sequence, seq0 + 1);
        assert!(s.validate_checksum());
        assert!(s.dirty);
    }

    #[test]
    fn round_trip_preserves_content_and_checksum() {
        let mut s = DesiredState::empty("rtu-1");
        s.set_actuator(9, ActuatorCommand { code: CommandCode::Pwm, pwm_duty: 42, forced: false }, 5);
        s.set_pid_loop(1, PidMode::Auto, 7.0, true, 6);

        let json = serde_json::to_vec(&s).unwrap();
        let mut back: DesiredState = serde_json::from_slice(&json).unwrap();
        // `dirty` is intentionally not persisted.
        back.dirty = s.dirty;
        assert_eq!(back, s);
        assert!(back.validate_checksum());
    }

    #[test]
    fn checksum_ignores_sequence_field_itself() {
        let mut a = DesiredState::empty("rtu-1");
        a.set_actuator(0, ActuatorCommand::default(), 1);
        let mut b = a.clone();
        // Bump sequence only, bypassing the mutation API.
        b.sequence += 5;
        assert_eq!(a.checksum, b.checksum);
    }

    proptest::proptest! {
        #[test]
        fn sequence_is_strictly_increasing(n in 1u32..30) {
            let mut s = DesiredState::empty("rtu-1");
            let mut last = s.sequence;
            for i in 0..n {
                s.set_actuator(i as usize % 8, ActuatorCommand::default(), i as u64);
                assert_eq!(s.sequence, last + 1);
                assert!(s.validate_checksum());
                last = s.sequence;
            }
        }
    }
}
