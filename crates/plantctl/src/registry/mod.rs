//! Registry (component B): the single in-memory source of truth for
//! devices, slots, and their latest cyclic I/O state.
//!
//! Every mutation and every read acquires one exclusive mutex per registry.
//! Critical sections never perform I/O or invoke a callback; every value
//! returned to a caller is an owned copy, never an internal borrow.

pub mod types;

use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::Mutex;

pub use types::*;

struct Inner {
    devices: HashMap<String, Device>,
}

pub struct Registry {
    inner: Mutex<Inner>,
    max_devices: usize,
    max_slots_per_device: usize,
}

impl Registry {
    pub fn new(max_devices: usize, max_slots_per_device: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { devices: HashMap::new() }),
            max_devices,
            max_slots_per_device,
        }
    }

    /// Create a device record. Fails with `Duplicate` if the station name is
    /// already present, `CapacityFull` if `max_devices` would be exceeded.
    pub fn add_device(&self, config: DeviceConfig) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.devices.contains_key(&config.station) {
            return Err(CoreError::Duplicate(config.station));
        }
        if inner.devices.len() >= self.max_devices {
            return Err(CoreError::CapacityFull(format!(
                "registry at capacity ({} devices)",
                self.max_devices
            )));
        }
        inner.devices.insert(
            config.station.clone(),
            Device {
                station: config.station,
                ip: config.ip,
                vendor_id: config.vendor_id,
                device_id: config.device_id,
                state: ConnectionState::Offline,
                slots: Vec::new(),
            },
        );
        Ok(())
    }

    /// Remove a device and all of its slot state.
    pub fn remove_device(&self, station: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .devices
            .remove(station)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(station.to_string()))
    }

    /// Install or replace a slot's static configuration. The slot's sample
    /// state is reset to `quality = NotConnected` on replacement. This is
    /// the only path that may change a slot's kind (sensor/actuator/empty).
    pub fn configure_slot(&self, station: &str, slot: usize, config: SlotConfig) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let device = inner
            .devices
            .get_mut(station)
            .ok_or_else(|| CoreError::NotFound(station.to_string()))?;

        if slot >= self.max_slots_per_device {
            return Err(CoreError::CapacityFull(format!(
                "slot {} exceeds implementation cap {}",
                slot, self.max_slots_per_device
            )));
        }
        if slot >= device.slots.len() {
            device.slots.resize(slot + 1, Slot::Empty);
        }
        device.slots[slot] = match config {
            SlotConfig::Empty => Slot::Empty,
            SlotConfig::Sensor(cfg) => {
                Slot::Sensor { config: cfg, sample: SensorSample::default() }
            }
            SlotConfig::Actuator(cfg) => {
                Slot::Actuator { config: cfg, command: ActuatorCommand::default() }
            }
        };
        Ok(())
    }

    /// Write a new sensor sample. Rejected with `NotFound` if the slot does
    /// not exist, `TypeMismatch` if it is not a sensor slot.
    pub fn update_sensor(&self, station: &str, slot: usize, sample: SensorSample) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let device = inner
            .devices
            .get_mut(station)
            .ok_or_else(|| CoreError::NotFound(station.to_string()))?;
        let s = device
            .slots
            .get_mut(slot)
            .ok_or_else(|| CoreError::NotFound(format!("{}/{}", station, slot)))?;
        match s {
            Slot::Sensor { sample: cur, .. } => {
                *cur = sample;
                Ok(())
            }
            _ => Err(CoreError::TypeMismatch(format!("{}/{} is not a sensor slot", station, slot))),
        }
    }

    /// Read the latest sensor sample by value.
    pub fn get_sensor(&self, station: &str, slot: usize) -> CoreResult<SensorSample> {
        let inner = self.inner.lock().unwrap();
        let device = inner
            .devices
            .get(station)
            .ok_or_else(|| CoreError::NotFound(station.to_string()))?;
        let s = device
            .slots
            .get(slot)
            .ok_or_else(|| CoreError::NotFound(format!("{}/{}", station, slot)))?;
        match s {
            Slot::Sensor { sample, .. } => Ok(*sample),
            _ => Err(CoreError::TypeMismatch(format!("{}/{} is not a sensor slot", station, slot))),
        }
    }

    /// Write a new actuator command.
    pub fn update_actuator(&self, station: &str, slot: usize, command: ActuatorCommand) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let device = inner
            .devices
            .get_mut(station)
            .ok_or_else(|| CoreError::NotFound(station.to_string()))?;
        let s = device
            .slots
            .get_mut(slot)
            .ok_or_else(|| CoreError::NotFound(format!("{}/{}", station, slot)))?;
        match s {
            Slot::Actuator { command: cur, .. } => {
                *cur = command;
                Ok(())
            }
            _ => Err(CoreError::TypeMismatch(format!("{}/{} is not an actuator slot", station, slot))),
        }
    }

    /// Read the current actuator command by value. Not part of the spec's
    /// named contract but required by every other reader of actuator state
    /// (control engine forced-output pass, reconciler, IPC snapshot).
    pub fn get_actuator(&self, station: &str, slot: usize) -> CoreResult<ActuatorCommand> {
        let inner = self.inner.lock().unwrap();
        let device = inner
            .devices
            .get(station)
            .ok_or_else(|| CoreError::NotFound(station.to_string()))?;
        let s = device
            .slots
            .get(slot)
            .ok_or_else(|| CoreError::NotFound(format!("{}/{}", station, slot)))?;
        match s {
            Slot::Actuator { command, .. } => Ok(*command),
            _ => Err(CoreError::TypeMismatch(format!("{}/{} is not an actuator slot", station, slot))),
        }
    }

    pub fn set_state(&self, station: &str, new_state: ConnectionState) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let device = inner
            .devices
            .get_mut(station)
            .ok_or_else(|| CoreError::NotFound(station.to_string()))?;
        device.state = new_state;
        Ok(())
    }

    pub fn get_device(&self, station: &str) -> CoreResult<DeviceSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner
            .devices
            .get(station)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(station.to_string()))
    }

    /// Bounded copy of device snapshots, capped at `cap` entries.
    pub fn list_devices(&self, cap: usize) -> Vec<DeviceSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner.devices.values().take(cap).cloned().collect()
    }

    pub fn device_count(&self) -> usize {
        self.inner.lock().unwrap().devices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn dev_config(station: &str) -> DeviceConfig {
        DeviceConfig {
            station: station.to_string(),
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            vendor_id: 1,
            device_id: 1,
        }
    }

    #[test]
    fn add_then_duplicate_fails() {
        let reg = Registry::new(8, 64);
        reg.add_device(dev_config("rtu-1")).unwrap();
        let err = reg.add_device(dev_config("rtu-1")).unwrap_err();
        assert_eq!(err.kind_name(), "DUPLICATE");
    }

    #[test]
    fn capacity_full_rejects_extra_devices() {
        let reg = Registry::new(1, 64);
        reg.add_device(dev_config("rtu-1")).unwrap();
        let err = reg.add_device(dev_config("rtu-2")).unwrap_err();
        assert_eq!(err.kind_name(), "CAPACITY_FULL");
    }

    #[test]
    fn remove_missing_device_not_found() {
        let reg = Registry::new(8, 64);
        let err = reg.remove_device("ghost").unwrap_err();
        assert_eq!(err.kind_name(), "NOT_FOUND");
    }

    #[test]
    fn configure_slot_resets_sample_quality() {
        let reg = Registry::new(8, 64);
        reg.add_device(dev_config("rtu-1")).unwrap();
        reg.configure_slot(
            "rtu-1",
            1,
            SlotConfig::Sensor(SensorConfig {
                measurement: MeasurementType::Ph,
                unit: "pH".into(),
                range_min: 0.0,
                range_max: 14.0,
            }),
        )
        .unwrap();
        let sample = reg.get_sensor("rtu-1", 1).unwrap();
        assert_eq!(sample.quality, Quality::NotConnected);

        reg.update_sensor(
            "rtu-1",
            1,
            SensorSample { value: 6.0, timestamp_ms: 10, iops: 0, quality: Quality::Good },
        )
        .unwrap();
        assert_eq!(reg.get_sensor("rtu-1", 1).unwrap().quality, Quality::Good);

        // Replacing the slot config clears the sample back to NotConnected.
        reg.configure_slot(
            "rtu-1",
            1,
            SlotConfig::Sensor(SensorConfig {
                measurement: MeasurementType::Ph,
                unit: "pH".into(),
                range_min: 0.0,
                range_max: 14.0,
            }),
        )
        .unwrap();
        assert_eq!(reg.get_sensor("rtu-1", 1).unwrap().quality, Quality::NotConnected);
    }

    #[test]
    fn update_sensor_on_actuator_slot_is_type_mismatch() {
        let reg = Registry::new(8, 64);
        reg.add_device(dev_config("rtu-1")).unwrap();
        reg.configure_slot(
            "rtu-1",
            9,
            SlotConfig::Actuator(ActuatorConfig {
                kind: ActuatorKind::Pump,
                pwm_capable: true,
                pwm_min: 0,
                pwm_max: 100,
            }),
        )
        .unwrap();
        let err = reg
            .update_sensor("rtu-1", 9, SensorSample::default())
            .unwrap_err();
        assert_eq!(err.kind_name(), "TYPE_MISMATCH");
    }

    #[test]
    fn repeated_identical_configure_slot_is_idempotent() {
        let reg = Registry::new(8, 64);
        reg.add_device(dev_config("rtu-1")).unwrap();
        let cfg = SlotConfig::Sensor(SensorConfig {
            measurement: MeasurementType::Temperature,
            unit: "C".into(),
            range_min: -10.0,
            range_max: 100.0,
        });
        reg.configure_slot("rtu-1", 0, cfg_clone(&cfg)).unwrap();
        let first = reg.get_device("rtu-1").unwrap();
        reg.configure_slot("rtu-1", 0, cfg_clone(&cfg)).unwrap();
        let second = reg.get_device("rtu-1").unwrap();
        assert_eq!(
            serde_json::to_string(&first.slots).unwrap(),
            serde_json::to_string(&second.slots).unwrap()
        );
    }

    fn cfg_clone(c: &SlotConfig) -> SlotConfig {
        match c {
            SlotConfig::Empty => SlotConfig::Empty,
            SlotConfig::Sensor(s) => SlotConfig::Sensor(s.clone()),
            SlotConfig::Actuator(a) => SlotConfig::Actuator(a.clone()),
        }
    }

    #[test]
    fn list_devices_is_bounded() {
        let reg = Registry::new(8, 64);
        for i in 0..5 {
            reg.add_device(dev_config(&format!("rtu-{i}"))).unwrap();
        }
        assert_eq!(reg.list_devices(3).len(), 3);
        assert_eq!(reg.list_devices(100).len(), 5);
    }
}
