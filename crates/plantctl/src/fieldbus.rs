//! Cyclic-exchange collaborator interface (spec §6, §9): the core consumes
//! this trait, never a concrete fieldbus stack. `MockFieldbus` is the
//! in-memory reference implementation used by tests and the end-to-end
//! scenarios.

use crate::registry::types::{ActuatorCommand, SensorSample};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryKind {
    Dcp,
    I2c,
    OneWire,
}

#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub station: String,
    pub vendor_id: u32,
    pub device_id: u32,
}

/// Polymorphic over the capability set {discover, connect, disconnect,
/// pop_commands, push_sample, send_alarm}. The core holds this as
/// `Box<dyn FieldbusCollaborator>`, per §9's "tagged-variant or
/// trait-object representation is appropriate."
pub trait FieldbusCollaborator: Send {
    /// Deliver the latest sample for `station`/`slot` into the core.
    fn push_sample(&mut self, station: &str, slot: usize, sample: SensorSample);

    /// Drain outbound actuator commands the collaborator owes the core
    /// (e.g. a command accepted by the RTU and echoed back).
    fn pop_commands(&mut self, station: &str) -> Vec<(usize, ActuatorCommand)>;

    fn on_device_discovered(&mut self, device: DiscoveredDevice);

    fn on_device_state_changed(&mut self, station: &str, online: bool);

    /// Kick off an identification broadcast of `kind`. Synchronous in this
    /// reference implementation — the cache is populated before the call
    /// returns, so the IPC bridge never needs a separate polling path.
    fn begin_discovery(&mut self, kind: DiscoveryKind);

    /// Snapshot of devices discovered since the last `begin_discovery` of
    /// the same kind.
    fn discovery_cache(&self, kind: DiscoveryKind) -> Vec<DiscoveredDevice>;
}

/// Deterministic in-memory stand-in: samples and commands are queued by
/// test code and drained by the core exactly like a real collaborator
/// would drain them from the wire.
#[derive(Default)]
pub struct MockFieldbus {
    pending_commands: Mutex<HashMap<String, Vec<(usize, ActuatorCommand)>>>,
    discovered: Mutex<HashMap<DiscoveryKindKey, Vec<DiscoveredDevice>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DiscoveryKindKey {
    Dcp,
    I2c,
    OneWire,
}

impl From<DiscoveryKind> for DiscoveryKindKey {
    fn from(k: DiscoveryKind) -> Self {
        match k {
            DiscoveryKind::Dcp => Self::Dcp,
            DiscoveryKind::I2c => Self::I2c,
            DiscoveryKind::OneWire => Self::OneWire,
        }
    }
}

impl MockFieldbus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: seed the cache a subsequent `begin_discovery` call of the
    /// same kind will surface.
    pub fn seed_discovery(&self, kind: DiscoveryKind, devices: Vec<DiscoveredDevice>) {
        self.discovered.lock().unwrap().insert(kind.into(), devices);
    }

    /// Test hook: queue a command as if the RTU had echoed it back.
    pub fn queue_command(&self, station: &str, slot: usize, command: ActuatorCommand) {
        self.pending_commands.lock().unwrap().entry(station.to_string()).or_default().push((slot, command));
    }
}

impl FieldbusCollaborator for MockFieldbus {
    fn push_sample(&mut self, _station: &str, _slot: usize, _sample: SensorSample) {
        // A real collaborator calls into the core here; the mock is driven
        // the other way in tests (core pulls via `pop_commands`).
    }

    fn pop_commands(&mut self, station: &str) -> Vec<(usize, ActuatorCommand)> {
        self.pending_commands.lock().unwrap().remove(station).unwrap_or_default()
    }

    fn on_device_discovered(&mut self, _device: DiscoveredDevice) {}

    fn on_device_state_changed(&mut self, _station: &str, _online: bool) {}

    fn begin_discovery(&mut self, _kind: DiscoveryKind) {
        // Already synchronous: `discovery_cache` reads whatever was seeded.
    }

    fn discovery_cache(&self, kind: DiscoveryKind) -> Vec<DiscoveredDevice> {
        self.discovered.lock().unwrap().get(&DiscoveryKindKey::from(kind)).cloned().unwrap_or_default()
    }
}
