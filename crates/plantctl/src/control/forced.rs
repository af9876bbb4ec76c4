//! Forced-override set (spec §3 "Forced override"): operator-pinned
//! commands that are authoritative over any control-engine-computed
//! output for that slot. Lifetime is "until released" — there is no
//! auto-expiry (an open question in the spec, resolved this way; see
//! DESIGN.md).

use crate::error::{CoreError, CoreResult};
use crate::registry::types::ActuatorCommand;
use std::collections::HashMap;
use std::sync::Mutex;

pub const MAX_FORCED_OVERRIDES: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub station: String,
    pub slot: usize,
}

pub struct ForcedOverrideSet {
    entries: Mutex<HashMap<SlotKey, ActuatorCommand>>,
    cap: usize,
}

impl ForcedOverrideSet {
    pub fn new(cap: usize) -> Self {
        Self { entries: Mutex::new(HashMap::new()), cap }
    }

    /// Pin `command` for `(station, slot)`. Re-applying the same override is
    /// a no-op (same key, same value). Fails with `CapacityFull` if the set
    /// is full and the key is not already present.
    pub fn set_override(&self, station: &str, slot: usize, command: ActuatorCommand) -> CoreResult<()> {
        let key = SlotKey { station: station.to_string(), slot };
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&key) && entries.len() >= self.cap {
            return Err(CoreError::CapacityFull(format!(
                "forced-override set at capacity ({})",
                self.cap
            )));
        }
        entries.insert(key, command);
        Ok(())
    }

    pub fn release_override(&self, station: &str, slot: usize) -> CoreResult<()> {
        let key = SlotKey { station: station.to_string(), slot };
        let mut entries = self.entries.lock().unwrap();
        entries
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("{station}/{slot}")))
    }

    pub fn get(&self, station: &str, slot: usize) -> Option<ActuatorCommand> {
        let key = SlotKey { station: station.to_string(), slot };
        self.entries.lock().unwrap().get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owned snapshot of every active override, for the IPC rollup.
    pub fn snapshot(&self) -> Vec<(SlotKey, ActuatorCommand)> {
        self.entries.lock().unwrap().iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}
