//! Closed command-type set and the typed result code carried back to the
//! reader through the shared-memory command slot (spec §4.6/§7).

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandType {
    ActuatorCommand = 0,
    PidSetpoint = 1,
    PidMode = 2,
    AlarmAcknowledge = 3,
    InterlockReset = 4,
    AddRtu = 5,
    RemoveRtu = 6,
    ConnectRtu = 7,
    DisconnectRtu = 8,
    DiscoveryKickOff = 9,
    SlotConfigure = 10,
    UserSyncBatch = 11,
}

impl CommandType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::ActuatorCommand,
            1 => Self::PidSetpoint,
            2 => Self::PidMode,
            3 => Self::AlarmAcknowledge,
            4 => Self::InterlockReset,
            5 => Self::AddRtu,
            6 => Self::RemoveRtu,
            7 => Self::ConnectRtu,
            8 => Self::DisconnectRtu,
            9 => Self::DiscoveryKickOff,
            10 => Self::SlotConfigure,
            11 => Self::UserSyncBatch,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiscoveryKind {
    Dcp = 0,
    I2c = 1,
    OneWire = 2,
}

impl DiscoveryKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Dcp,
            1 => Self::I2c,
            2 => Self::OneWire,
            _ => return None,
        })
    }
}

/// Typed outcome code stored in `command_result`. `Ok` mirrors a successful
/// apply; every other variant mirrors one `CoreError` taxonomy member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandResultCode {
    Ok = 0,
    InvalidParam = 1,
    NotInitialized = 2,
    NotFound = 3,
    Duplicate = 4,
    CapacityFull = 5,
    TypeMismatch = 6,
    Permission = 7,
    Busy = 8,
    Protocol = 9,
    Corrupt = 10,
    Io = 11,
    Timeout = 12,
}

impl From<&CoreError> for CommandResultCode {
    fn from(e: &CoreError) -> Self {
        match e.kind_name() {
            "INVALID_PARAM" => Self::InvalidParam,
            "NOT_INITIALIZED" => Self::NotInitialized,
            "NOT_FOUND" => Self::NotFound,
            "DUPLICATE" => Self::Duplicate,
            "CAPACITY_FULL" => Self::CapacityFull,
            "TYPE_MISMATCH" => Self::TypeMismatch,
            "PERMISSION" => Self::Permission,
            "BUSY" => Self::Busy,
            "PROTOCOL" => Self::Protocol,
            "CORRUPT" => Self::Corrupt,
            "IO" => Self::Io,
            "TIMEOUT" => Self::Timeout,
            _ => Self::Protocol,
        }
    }
}

/// Decoded, owned form of a command slot — used at the Rust API boundary.
/// The wire form (`region::CommandSlotRaw`) is a fixed-size POD struct;
/// this type is what `IpcBridge::process_commands` actually dispatches.
#[derive(Debug, Clone)]
pub struct DecodedCommand {
    pub command_type: CommandType,
    pub correlation_id: String,
    pub station: String,
    pub slot: u16,
    pub f_value: f32,
    pub i_value: i32,
    pub ip_addr: std::net::Ipv4Addr,
    pub vendor_id: u32,
    pub device_id: u32,
}

impl DecodedCommand {
    /// Decode a raw command slot, rejecting an unrecognized `command_type`
    /// byte with `None` — the caller turns that into an `InvalidParam`
    /// `command_result` rather than panicking on malformed input.
    pub fn decode(raw: &crate::ipc::region::CommandSlotRaw) -> Option<Self> {
        Some(Self {
            command_type: CommandType::from_u8(raw.command_type)?,
            correlation_id: raw.correlation_id(),
            station: raw.station(),
            slot: raw.slot,
            f_value: raw.f_value,
            i_value: raw.i_value,
            ip_addr: std::net::Ipv4Addr::from(raw.ip_addr),
            vendor_id: raw.vendor_id,
            device_id: raw.device_id,
        })
    }
}
