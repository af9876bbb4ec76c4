//! Device/slot data model (spec §3): station identity, slot layout, and the
//! latest cyclic I/O sample per slot.

use serde::{Deserialize, Serialize};

/// Two-bit OPC-UA-compatible data-quality field accompanying every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Quality {
    Good = 0x00,
    Uncertain = 0x40,
    Bad = 0x80,
    NotConnected = 0xC0,
}

impl Quality {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<u8> for Quality {
    fn from(v: u8) -> Self {
        match v & 0xC0 {
            0x00 => Quality::Good,
            0x40 => Quality::Uncertain,
            0x80 => Quality::Bad,
            _ => Quality::NotConnected,
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::NotConnected
    }
}

/// Connection lifecycle of an RTU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Offline,
    Discovering,
    Connecting,
    Configuring,
    Running,
    Degraded,
    Failed,
}

/// Station-level identity, supplied when a device is registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub station: String,
    pub ip: std::net::IpAddr,
    pub vendor_id: u32,
    pub device_id: u32,
}

/// Sensor measurement category. Open set at the wire level; the core only
/// needs to distinguish them for unit display and range validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    Ph,
    Temperature,
    Pressure,
    Flow,
    Level,
    Turbidity,
    Conductivity,
    FreeChlorine,
    DissolvedOxygen,
    Generic,
}

/// Static configuration of a sensor slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub measurement: MeasurementType,
    pub unit: String,
    pub range_min: f32,
    pub range_max: f32,
}

/// Latest cyclic sample for a sensor slot. Wire format is exactly 5 bytes
/// (4-byte big-endian float + 1-byte quality); the core never decodes the
/// wire itself but preserves all five bytes' worth of information.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub value: f32,
    pub timestamp_ms: u64,
    pub iops: u8,
    pub quality: Quality,
}

impl Default for SensorSample {
    fn default() -> Self {
        Self { value: 0.0, timestamp_ms: 0, iops: 0, quality: Quality::NotConnected }
    }
}

/// Actuator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    Pump,
    Valve,
    Relay,
    PwmOutput,
}

/// Static configuration of an actuator slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    pub kind: ActuatorKind,
    pub pwm_capable: bool,
    pub pwm_min: u8,
    pub pwm_max: u8,
}

/// Actuator command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCode {
    Off,
    On,
    Pwm,
}

/// Current command held for an actuator slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    pub code: CommandCode,
    pub pwm_duty: u8,
    pub forced: bool,
}

impl Default for ActuatorCommand {
    fn default() -> Self {
        Self { code: CommandCode::Off, pwm_duty: 0, forced: false }
    }
}

/// A single slot in a device's modular layout: sensor, actuator, or empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Slot {
    Empty,
    Sensor { config: SensorConfig, sample: SensorSample },
    Actuator { config: ActuatorConfig, command: ActuatorCommand },
}

impl Default for Slot {
    fn default() -> Self {
        Slot::Empty
    }
}

/// Static slot configuration submitted via `configure_slot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SlotConfig {
    Empty,
    Sensor(SensorConfig),
    Actuator(ActuatorConfig),
}

/// Owned device record, exactly as held inside the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub station: String,
    pub ip: std::net::IpAddr,
    pub vendor_id: u32,
    pub device_id: u32,
    pub state: ConnectionState,
    pub slots: Vec<Slot>,
}

/// Owned copy of a device returned to callers (never an internal borrow).
pub type DeviceSnapshot = Device;
