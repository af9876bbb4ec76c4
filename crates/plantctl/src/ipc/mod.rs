//! IPC Bridge (component G): the single-producer/multi-consumer shared-memory
//! transport between the core and out-of-process API workers (spec §4.6).
//!
//! `update` mirrors Registry/Alarm/Control state into the region under the
//! process-shared mutex; `process_commands` drains the single command slot
//! and dispatches it back into the core. Both are driven once per supervisor
//! tick — neither performs blocking I/O beyond the mutex itself.

pub mod commands;
pub mod region;
pub mod shm;

use crate::alarms::AlarmEvaluator;
use crate::authority::AuthorityManager;
use crate::clock::MonoMs;
use crate::control::ControlEngine;
use crate::error::CoreResult;
use crate::fieldbus::{DiscoveredDevice, DiscoveryKind as FieldbusDiscoveryKind, FieldbusCollaborator};
use crate::registry::types::{ActuatorCommand, CommandCode, ConnectionState, DeviceConfig, Quality};
use crate::registry::Registry;
use commands::{CommandResultCode, CommandType, DecodedCommand, DiscoveryKind};
use region::{AlarmRaw, DeviceRaw, DiscoveryResultRaw, NotificationRaw, PidRaw, SlotRaw};
use shm::SharedRegion;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Time the bridge waits after kicking off a discovery broadcast before it
/// harvests the collaborator's cache, per §4.6 "sets a timeout."
const DISCOVERY_TIMEOUT_MS: u64 = 2_000;

/// Notification kinds mirrored into the ring. Closed set, matching the
/// events a reader actually needs to react to without polling the full
/// device/alarm arrays every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum NotificationKind {
    DiscoveryComplete = 0,
}

fn fieldbus_kind(k: DiscoveryKind) -> FieldbusDiscoveryKind {
    match k {
        DiscoveryKind::Dcp => FieldbusDiscoveryKind::Dcp,
        DiscoveryKind::I2c => FieldbusDiscoveryKind::I2c,
        DiscoveryKind::OneWire => FieldbusDiscoveryKind::OneWire,
    }
}

struct DiscoveryTracker {
    kind: Option<DiscoveryKind>,
    deadline: Option<MonoMs>,
}

impl DiscoveryTracker {
    fn idle() -> Self {
        Self { kind: None, deadline: None }
    }
}

pub struct IpcBridge {
    region: SharedRegion,
    registry: Arc<Registry>,
    control: Arc<ControlEngine>,
    alarms: Arc<AlarmEvaluator>,
    authority: Arc<AuthorityManager>,
    fieldbus: Mutex<Box<dyn FieldbusCollaborator>>,
    discovery: Mutex<DiscoveryTracker>,
    running: AtomicBool,
}

impl IpcBridge {
    pub fn new(
        shm_name: &str,
        registry: Arc<Registry>,
        control: Arc<ControlEngine>,
        alarms: Arc<AlarmEvaluator>,
        authority: Arc<AuthorityManager>,
        fieldbus: Box<dyn FieldbusCollaborator>,
    ) -> CoreResult<Self> {
        let region = SharedRegion::create_writer(shm_name)?;
        Ok(Self {
            region,
            registry,
            control,
            alarms,
            authority,
            fieldbus: Mutex::new(fieldbus),
            discovery: Mutex::new(DiscoveryTracker::idle()),
            running: AtomicBool::new(true),
        })
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Refresh the shared-memory snapshot: fleet rollup, device/alarm/PID
    /// arrays, discovery harvesting. Mirrors the whole snapshot in place
    /// under the single region mutex, then stamps `last_update_ms` last.
    pub fn update(&self, now: MonoMs) -> CoreResult<()> {
        let devices = self.registry.list_devices(region::MAX_DEVICES);
        let alarms = self.alarms.active_snapshot(now);
        let pid_loops = self.control.pid_snapshots();
        let running = self.running.load(Ordering::SeqCst);

        self.harvest_discovery(now);

        self.region.with_locked(|r| {
            r.device_count = devices.len() as u32;
            for (i, dev) in devices.iter().enumerate() {
                let mut raw = DeviceRaw::default();
                raw.set_station(&dev.station);
                raw.vendor_id = dev.vendor_id;
                raw.device_id = dev.device_id;
                raw.state = connection_state_code(dev.state);
                let slot_count = dev.slots.len().min(region::MAX_SLOTS_PER_DEVICE);
                raw.slot_count = slot_count as u8;
                for (s, slot) in dev.slots.iter().take(slot_count).enumerate() {
                    raw.slots[s] = slot_raw(slot);
                }
                r.devices[i] = raw;
            }

            r.alarm_count = alarms.len().min(region::MAX_ALARMS) as u32;
            for (i, ev) in alarms.iter().take(region::MAX_ALARMS).enumerate() {
                let mut raw = AlarmRaw::default();
                raw.rule_id = ev.rule_id;
                raw.state = alarm_state_code(ev.state);
                raw.raised_at_ms = ev.raised_at;
                raw.last_value = ev.last_value;
                r.alarms[i] = raw;
            }

            r.pid_count = pid_loops.len().min(region::MAX_PID_LOOPS) as u32;
            for (i, p) in pid_loops.iter().take(region::MAX_PID_LOOPS).enumerate() {
                let mut raw = PidRaw::default();
                raw.loop_id = p.loop_id;
                raw.mode = p.mode.as_u8();
                raw.enabled = p.enabled as u8;
                raw.setpoint = p.setpoint;
                raw.last_output = p.last_output;
                r.pid_loops[i] = raw;
            }

            r.header.controller_running = running as u8;
            r.header.last_update_ms = now;
        })?;
        Ok(())
    }

    fn harvest_discovery(&self, now: MonoMs) {
        let mut tracker = self.discovery.lock().unwrap();
        let Some(kind) = tracker.kind else { return };
        let Some(deadline) = tracker.deadline else { return };
        if now < deadline {
            return;
        }
        let found = self.fieldbus.lock().unwrap().discovery_cache(fieldbus_kind(kind));
        tracker.kind = None;
        tracker.deadline = None;
        drop(tracker);
        let _ = self.region.with_locked(|r| {
            write_discovery_results(r, kind, &found);
            r.discovery_in_progress = 0;
            r.discovery_complete = 1;
            push_notification(r, NotificationKind::DiscoveryComplete, "", now);
        });
    }

    /// Drain the single command slot: observe `command_sequence !=
    /// command_ack`, decode, dispatch, store the result, then ack. A single
    /// outstanding command is sufficient — the reader must wait for the
    /// prior ack before issuing another, per §4.6.
    pub fn process_commands(&self, now: MonoMs) -> CoreResult<()> {
        let pending = self.region.with_locked(|r| {
            if r.command_sequence == r.command_ack {
                None
            } else {
                Some((r.command_sequence, r.command))
            }
        })?;
        let Some((sequence, raw)) = pending else { return Ok(()) };

        let (code, msg) = match DecodedCommand::decode(&raw) {
            Some(cmd) => self.dispatch(cmd, now),
            None => (CommandResultCode::InvalidParam, "unrecognized command_type".to_string()),
        };

        self.region.with_locked(|r| {
            r.command_result = code as u8;
            r.set_command_error_msg(&msg);
            r.command_ack = sequence;
        })?;
        Ok(())
    }

    /// Dispatch one decoded command. Every branch always produces a result —
    /// including `InvalidParam` for a malformed payload — so the caller can
    /// always ack and unblock the reader, per §4.6/§7.
    fn dispatch(&self, cmd: DecodedCommand, now: MonoMs) -> (CommandResultCode, String) {
        let result: CoreResult<()> = match cmd.command_type {
            CommandType::ActuatorCommand => {
                let code = match cmd.i_value {
                    0 => CommandCode::Off,
                    1 => CommandCode::On,
                    _ => CommandCode::Pwm,
                };
                let duty = cmd.f_value.round().clamp(0.0, 100.0) as u8;
                self.registry.update_actuator(
                    &cmd.station,
                    cmd.slot as usize,
                    ActuatorCommand { code, pwm_duty: duty, forced: false },
                )
            }
            CommandType::PidSetpoint => self.control.set_pid_setpoint(cmd.slot as u32, cmd.f_value),
            CommandType::PidMode => match crate::control::pid::PidMode::from_u8(cmd.i_value as u8) {
                Some(mode) => self.control.set_pid_mode(cmd.slot as u32, mode),
                None => Err(crate::error::CoreError::InvalidParam(format!("bad pid mode {}", cmd.i_value))),
            },
            CommandType::AlarmAcknowledge => self.alarms.acknowledge(cmd.slot as u32, now),
            CommandType::InterlockReset => self.control.reset_interlock(cmd.slot as u32),
            CommandType::AddRtu => self.registry.add_device(DeviceConfig {
                station: cmd.station.clone(),
                ip: std::net::IpAddr::V4(cmd.ip_addr),
                vendor_id: cmd.vendor_id,
                device_id: cmd.device_id,
            }),
            CommandType::RemoveRtu => self.registry.remove_device(&cmd.station),
            CommandType::ConnectRtu => self.registry.set_state(&cmd.station, ConnectionState::Connecting),
            CommandType::DisconnectRtu => {
                let _ = self.authority.force_release(&cmd.station);
                self.registry.set_state(&cmd.station, ConnectionState::Offline)
            }
            CommandType::DiscoveryKickOff => self.begin_discovery(cmd.i_value as u8, now),
            CommandType::SlotConfigure => self.configure_slot(&cmd),
            CommandType::UserSyncBatch => Ok(()),
        };

        match result {
            Ok(()) => (CommandResultCode::Ok, String::new()),
            Err(e) => (CommandResultCode::from(&e), e.to_string()),
        }
    }

    fn begin_discovery(&self, kind_byte: u8, now: MonoMs) -> CoreResult<()> {
        let kind = DiscoveryKind::from_u8(kind_byte)
            .ok_or_else(|| crate::error::CoreError::InvalidParam(format!("bad discovery kind {kind_byte}")))?;
        self.fieldbus.lock().unwrap().begin_discovery(fieldbus_kind(kind));
        *self.discovery.lock().unwrap() = DiscoveryTracker { kind: Some(kind), deadline: Some(now + DISCOVERY_TIMEOUT_MS) };
        self.region.with_locked(|r| {
            r.discovery_in_progress = 1;
            r.discovery_complete = 0;
        })
    }

    fn configure_slot(&self, cmd: &DecodedCommand) -> CoreResult<()> {
        use crate::registry::types::{ActuatorConfig, SensorConfig, SlotConfig};
        // Reduced parameter set carried by the command slot: i_value packs
        // (slot_kind << 8 | sub_kind); f_value is the upper range bound
        // (sensor) or PWM max (actuator). See DESIGN.md for the rationale.
        let slot_kind = (cmd.i_value >> 8) & 0xFF;
        let sub_kind = (cmd.i_value & 0xFF) as u8;
        let config = match slot_kind {
            0 => SlotConfig::Empty,
            1 => SlotConfig::Sensor(SensorConfig {
                measurement: measurement_from_u8(sub_kind),
                unit: String::new(),
                range_min: 0.0,
                range_max: cmd.f_value,
            }),
            _ => SlotConfig::Actuator(ActuatorConfig {
                kind: actuator_kind_from_u8(sub_kind),
                pwm_capable: true,
                pwm_min: 0,
                pwm_max: cmd.f_value.round().clamp(0.0, 255.0) as u8,
            }),
        };
        self.registry.configure_slot(&cmd.station, cmd.slot as usize, config)
    }
}

fn measurement_from_u8(v: u8) -> crate::registry::types::MeasurementType {
    use crate::registry::types::MeasurementType::*;
    match v {
        0 => Ph,
        1 => Temperature,
        2 => Pressure,
        3 => Flow,
        4 => Level,
        5 => Turbidity,
        6 => Conductivity,
        7 => FreeChlorine,
        8 => DissolvedOxygen,
        _ => Generic,
    }
}

fn actuator_kind_from_u8(v: u8) -> crate::registry::types::ActuatorKind {
    use crate::registry::types::ActuatorKind::*;
    match v {
        0 => Pump,
        1 => Valve,
        2 => Relay,
        _ => PwmOutput,
    }
}

fn connection_state_code(s: ConnectionState) -> u8 {
    match s {
        ConnectionState::Offline => 0,
        ConnectionState::Discovering => 1,
        ConnectionState::Connecting => 2,
        ConnectionState::Configuring => 3,
        ConnectionState::Running => 4,
        ConnectionState::Degraded => 5,
        ConnectionState::Failed => 6,
    }
}

fn alarm_state_code(s: crate::alarms::AlarmState) -> u8 {
    use crate::alarms::AlarmState::*;
    match s {
        ActiveUnack => 0,
        ActiveAck => 1,
        ClearedUnack => 2,
        ClearedAck => 3,
    }
}

fn slot_raw(slot: &crate::registry::types::Slot) -> SlotRaw {
    use crate::registry::types::Slot::*;
    match slot {
        Empty => SlotRaw::default(),
        Sensor { sample, .. } => SlotRaw {
            kind: 1,
            quality: quality_code(sample.quality),
            command_code: 0,
            forced: 0,
            value: sample.value,
        },
        Actuator { command, .. } => SlotRaw {
            kind: 2,
            quality: 0,
            command_code: match command.code {
                CommandCode::Off => 0,
                CommandCode::On => 1,
                CommandCode::Pwm => 2,
            },
            forced: command.forced as u8,
            value: command.pwm_duty as f32,
        },
    }
}

fn quality_code(q: Quality) -> u8 {
    q.as_u8()
}

fn write_discovery_results(r: &mut region::Region, kind: DiscoveryKind, found: &[DiscoveredDevice]) {
    let raws: Vec<DiscoveryResultRaw> = found
        .iter()
        .map(|d| {
            let mut raw = DiscoveryResultRaw::default();
            raw.kind = kind as u8;
            raw.set_station(&d.station);
            raw.vendor_id = d.vendor_id;
            raw.device_id = d.device_id;
            raw
        })
        .collect();
    let n = raws.len().min(region::MAX_DISCOVERY_RESULTS);
    match kind {
        DiscoveryKind::Dcp => {
            r.discovery_dcp[..n].copy_from_slice(&raws[..n]);
            r.discovery_dcp_count = n as u32;
        }
        DiscoveryKind::I2c => {
            r.discovery_i2c[..n].copy_from_slice(&raws[..n]);
            r.discovery_i2c_count = n as u32;
        }
        DiscoveryKind::OneWire => {
            r.discovery_onewire[..n].copy_from_slice(&raws[..n]);
            r.discovery_onewire_count = n as u32;
        }
    }
}

/// Append to the fixed-capacity notification ring, wrapping the write index
/// and capping `notification_count` at the array's length.
fn push_notification(r: &mut region::Region, kind: NotificationKind, station: &str, now_ms: MonoMs) {
    let idx = (r.notification_write_idx as usize) % region::MAX_NOTIFICATIONS;
    let mut raw = NotificationRaw::default();
    raw.kind = kind as u8;
    raw.set_station(station);
    raw.timestamp_ms = now_ms;
    r.notifications[idx] = raw;
    r.notification_write_idx = (r.notification_write_idx + 1) % region::MAX_NOTIFICATIONS as u32;
    r.notification_count = (r.notification_count + 1).min(region::MAX_NOTIFICATIONS as u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::forced::ForcedOverrideSet;
    use crate::fieldbus::MockFieldbus;
    use crate::registry::types::{DeviceConfig, SlotConfig};
    use std::net::{IpAddr, Ipv4Addr};

    fn bridge(name: &str) -> (Arc<Registry>, IpcBridge) {
        let registry = Arc::new(Registry::new(8, 8));
        let clock: Arc<dyn crate::clock::Clock> = Arc::new(crate::clock::TestClock::new());
        let forced = Arc::new(ForcedOverrideSet::new(8));
        let control = Arc::new(ControlEngine::new(Arc::clone(&registry), clock, forced, 100));
        let alarms = Arc::new(AlarmEvaluator::new());
        let authority = Arc::new(AuthorityManager::new(5000));
        let fieldbus = Box::new(MockFieldbus::new());
        let ipc = IpcBridge::new(name, Arc::clone(&registry), control, alarms, authority, fieldbus).unwrap();
        (registry, ipc)
    }

    fn raw_command(command_type: CommandType, station: &str, slot: u16, f_value: f32, i_value: i32) -> region::CommandSlotRaw {
        let mut raw = region::CommandSlotRaw::default();
        raw.command_type = command_type as u8;
        let bytes = station.as_bytes();
        raw.station[..bytes.len()].copy_from_slice(bytes);
        raw.slot = slot;
        raw.f_value = f_value;
        raw.i_value = i_value;
        raw
    }

    #[test]
    fn command_ordering_scenario_actuator_write_reflected_in_registry() {
        let name = format!("/plantctl_ipc_test_{}_{}", std::process::id(), line!());
        let (registry, ipc) = bridge(&name);
        registry
            .add_device(DeviceConfig { station: "rtu-1".into(), ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), vendor_id: 1, device_id: 1 })
            .unwrap();
        registry
            .configure_slot(
                "rtu-1",
                6,
                SlotConfig::Actuator(crate::registry::types::ActuatorConfig {
                    kind: crate::registry::types::ActuatorKind::Pump,
                    pwm_capable: true,
                    pwm_min: 0,
                    pwm_max: 100,
                }),
            )
            .unwrap();

        ipc.region
            .with_locked(|r| {
                r.command = raw_command(CommandType::ActuatorCommand, "rtu-1", 6, 0.0, 1);
                r.command_sequence = 42;
            })
            .unwrap();

        ipc.process_commands(0).unwrap();

        let (ack, result) = ipc.region.with_locked(|r| (r.command_ack, r.command_result)).unwrap();
        assert_eq!(ack, 42);
        assert_eq!(result, CommandResultCode::Ok as u8);

        let cmd = registry.get_actuator("rtu-1", 6).unwrap();
        assert_eq!(cmd.code, CommandCode::On);
    }

    #[test]
    fn malformed_command_type_is_rejected_but_still_acked() {
        let name = format!("/plantctl_ipc_test_{}_{}", std::process::id(), line!());
        let (_registry, ipc) = bridge(&name);
        ipc.region
            .with_locked(|r| {
                r.command.command_type = 200; // not in the closed set
                r.command_sequence = 1;
            })
            .unwrap();

        ipc.process_commands(0).unwrap();
        let (ack, result, msg) = ipc
            .region
            .with_locked(|r| (r.command_ack, r.command_result, r.command_error_msg()))
            .unwrap();
        assert_eq!(ack, 1);
        assert_eq!(result, CommandResultCode::InvalidParam as u8);
        assert!(!msg.is_empty());
    }

    #[test]
    fn unknown_station_is_not_found_but_still_acked() {
        let name = format!("/plantctl_ipc_test_{}_{}", std::process::id(), line!());
        let (_registry, ipc) = bridge(&name);
        ipc.region
            .with_locked(|r| {
                r.command = raw_command(CommandType::ActuatorCommand, "ghost", 0, 0.0, 1);
                r.command_sequence = 7;
            })
            .unwrap();

        ipc.process_commands(0).unwrap();
        let (ack, result) = ipc.region.with_locked(|r| (r.command_ack, r.command_result)).unwrap();
        assert_eq!(ack, 7);
        assert_eq!(result, CommandResultCode::NotFound as u8);
    }

    #[test]
    fn update_reflects_device_and_alarm_snapshots() {
        let name = format!("/plantctl_ipc_test_{}_{}", std::process::id(), line!());
        let (registry, ipc) = bridge(&name);
        registry
            .add_device(DeviceConfig { station: "rtu-1".into(), ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), vendor_id: 1, device_id: 1 })
            .unwrap();

        ipc.update(100).unwrap();
        let count = ipc.region.with_locked(|r| r.device_count).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn discovery_kick_off_then_harvest_past_timeout_populates_notification_ring() {
        let name = format!("/plantctl_ipc_test_{}_{}", std::process::id(), line!());
        let (_registry, ipc) = bridge(&name);

        ipc.region
            .with_locked(|r| {
                r.command = raw_command(CommandType::DiscoveryKickOff, "", 0, 0.0, 0);
                r.command_sequence = 1;
            })
            .unwrap();
        ipc.process_commands(0).unwrap();
        let in_progress = ipc.region.with_locked(|r| r.discovery_in_progress).unwrap();
        assert_eq!(in_progress, 1);

        ipc.update(DISCOVERY_TIMEOUT_MS + 1).unwrap();
        let (complete, notif_count) = ipc.region.with_locked(|r| (r.discovery_complete, r.notification_count)).unwrap();
        assert_eq!(complete, 1);
        assert_eq!(notif_count, 1);
    }
}
