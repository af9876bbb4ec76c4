//! Fixed, `repr(C)` shared-memory region layout (spec §4.6). Every field is
//! plain-old-data: fixed-size arrays of bytes for strings, no pointers, no
//! `Vec`/`String`/`HashMap` — the whole region must be safe to `mmap` into
//! two unrelated address spaces.

pub const MAGIC: u32 = 0x504C_4354; // "PLCT"
pub const VERSION: u32 = 1;

pub const MAX_DEVICES: usize = 64;
pub const MAX_SLOTS_PER_DEVICE: usize = 8;
pub const MAX_ALARMS: usize = 256;
pub const MAX_PID_LOOPS: usize = 64;
pub const MAX_DISCOVERY_RESULTS: usize = 32;
pub const MAX_NOTIFICATIONS: usize = 32;
pub const STATION_LEN: usize = 32;
pub const CORRELATION_LEN: usize = 37;
pub const ERROR_MSG_LEN: usize = 256;

fn write_fixed(dst: &mut [u8], src: &str) {
    let bytes = src.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
    for b in dst.iter_mut().skip(n) {
        *b = 0;
    }
}

fn read_fixed(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SlotRaw {
    /// 0 = empty, 1 = sensor, 2 = actuator.
    pub kind: u8,
    pub quality: u8,
    pub command_code: u8,
    pub forced: u8,
    pub value: f32,
}

impl Default for SlotRaw {
    fn default() -> Self {
        Self { kind: 0, quality: 0, command_code: 0, forced: 0, value: 0.0 }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DeviceRaw {
    pub station: [u8; STATION_LEN],
    pub vendor_id: u32,
    pub device_id: u32,
    pub state: u8,
    pub slot_count: u8,
    _pad: [u8; 2],
    pub slots: [SlotRaw; MAX_SLOTS_PER_DEVICE],
}

impl Default for DeviceRaw {
    fn default() -> Self {
        Self {
            station: [0; STATION_LEN],
            vendor_id: 0,
            device_id: 0,
            state: 0,
            slot_count: 0,
            _pad: [0; 2],
            slots: [SlotRaw::default(); MAX_SLOTS_PER_DEVICE],
        }
    }
}

impl DeviceRaw {
    pub fn station(&self) -> String {
        read_fixed(&self.station)
    }

    pub fn set_station(&mut self, station: &str) {
        write_fixed(&mut self.station, station);
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct AlarmRaw {
    pub rule_id: u32,
    pub state: u8,
    pub priority: u8,
    _pad: [u8; 2],
    pub raised_at_ms: u64,
    pub last_value: f32,
}

impl Default for AlarmRaw {
    fn default() -> Self {
        Self { rule_id: 0, state: 0, priority: 0, _pad: [0; 2], raised_at_ms: 0, last_value: 0.0 }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PidRaw {
    pub loop_id: u32,
    pub mode: u8,
    pub enabled: u8,
    _pad: [u8; 2],
    pub setpoint: f32,
    pub last_output: f32,
}

impl Default for PidRaw {
    fn default() -> Self {
        Self { loop_id: 0, mode: 0, enabled: 0, _pad: [0; 2], setpoint: 0.0, last_output: 0.0 }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DiscoveryResultRaw {
    pub kind: u8,
    _pad: [u8; 3],
    pub station: [u8; STATION_LEN],
    pub vendor_id: u32,
    pub device_id: u32,
}

impl Default for DiscoveryResultRaw {
    fn default() -> Self {
        Self { kind: 0, _pad: [0; 3], station: [0; STATION_LEN], vendor_id: 0, device_id: 0 }
    }
}

impl DiscoveryResultRaw {
    pub fn station(&self) -> String {
        read_fixed(&self.station)
    }

    pub fn set_station(&mut self, station: &str) {
        write_fixed(&mut self.station, station);
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct NotificationRaw {
    pub kind: u8,
    _pad: [u8; 7],
    pub station: [u8; STATION_LEN],
    pub timestamp_ms: u64,
}

impl Default for NotificationRaw {
    fn default() -> Self {
        Self { kind: 0, _pad: [0; 7], station: [0; STATION_LEN], timestamp_ms: 0 }
    }
}

impl NotificationRaw {
    pub fn station(&self) -> String {
        read_fixed(&self.station)
    }

    pub fn set_station(&mut self, station: &str) {
        write_fixed(&mut self.station, station);
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CommandSlotRaw {
    pub command_type: u8,
    _pad: [u8; 3],
    pub correlation_id: [u8; CORRELATION_LEN],
    pub station: [u8; STATION_LEN],
    pub slot: u16,
    _pad2: [u8; 2],
    pub f_value: f32,
    pub i_value: i32,
    /// AddRtu-only: IPv4 address in network byte order, vendor/device ids.
    pub ip_addr: u32,
    pub vendor_id: u32,
    pub device_id: u32,
}

impl Default for CommandSlotRaw {
    fn default() -> Self {
        Self {
            command_type: 0,
            _pad: [0; 3],
            correlation_id: [0; CORRELATION_LEN],
            station: [0; STATION_LEN],
            slot: 0,
            _pad2: [0; 2],
            f_value: 0.0,
            i_value: 0,
            ip_addr: 0,
            vendor_id: 0,
            device_id: 0,
        }
    }
}

impl CommandSlotRaw {
    pub fn station(&self) -> String {
        read_fixed(&self.station)
    }

    pub fn correlation_id(&self) -> String {
        read_fixed(&self.correlation_id)
    }
}

/// Fixed header at byte offset 0. `magic`/`version` never change across a
/// process lifetime; a reader observing a version mismatch must treat the
/// region as unusable.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct RegionHeader {
    pub magic: u32,
    pub version: u32,
    pub last_update_ms: u64,
    pub controller_running: u8,
    _pad: [u8; 7],
}

/// The full region. A single process-shared `pthread_mutex_t` (owned by
/// `shm::SharedRegion`, laid out immediately after the header in the mapped
/// bytes) covers every field below — see `shm.rs`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Region {
    pub header: RegionHeader,

    pub devices: [DeviceRaw; MAX_DEVICES],
    pub device_count: u32,

    pub alarms: [AlarmRaw; MAX_ALARMS],
    pub alarm_count: u32,

    pub pid_loops: [PidRaw; MAX_PID_LOOPS],
    pub pid_count: u32,

    pub command: CommandSlotRaw,
    pub command_sequence: u64,
    pub command_ack: u64,
    pub command_result: u8,
    pub command_error_msg: [u8; ERROR_MSG_LEN],

    pub discovery_dcp: [DiscoveryResultRaw; MAX_DISCOVERY_RESULTS],
    pub discovery_dcp_count: u32,
    pub discovery_i2c: [DiscoveryResultRaw; MAX_DISCOVERY_RESULTS],
    pub discovery_i2c_count: u32,
    pub discovery_onewire: [DiscoveryResultRaw; MAX_DISCOVERY_RESULTS],
    pub discovery_onewire_count: u32,
    pub discovery_in_progress: u8,
    pub discovery_complete: u8,

    pub notifications: [NotificationRaw; MAX_NOTIFICATIONS],
    pub notification_count: u32,
    pub notification_write_idx: u32,
}

impl Region {
    /// In-place zero-and-stamp initialisation, performed once by the writer
    /// immediately after the segment is created and mapped.
    pub fn init(&mut self) {
        self.header = RegionHeader { magic: MAGIC, version: VERSION, last_update_ms: 0, controller_running: 0, _pad: [0; 7] };
        self.devices = [DeviceRaw::default(); MAX_DEVICES];
        self.device_count = 0;
        self.alarms = [AlarmRaw::default(); MAX_ALARMS];
        self.alarm_count = 0;
        self.pid_loops = [PidRaw::default(); MAX_PID_LOOPS];
        self.pid_count = 0;
        self.command = CommandSlotRaw::default();
        self.command_sequence = 0;
        self.command_ack = 0;
        self.command_result = 0;
        self.command_error_msg = [0; ERROR_MSG_LEN];
        self.discovery_dcp = [DiscoveryResultRaw::default(); MAX_DISCOVERY_RESULTS];
        self.discovery_dcp_count = 0;
        self.discovery_i2c = [DiscoveryResultRaw::default(); MAX_DISCOVERY_RESULTS];
        self.discovery_i2c_count = 0;
        self.discovery_onewire = [DiscoveryResultRaw::default(); MAX_DISCOVERY_RESULTS];
        self.discovery_onewire_count = 0;
        self.discovery_in_progress = 0;
        self.discovery_complete = 0;
        self.notifications = [NotificationRaw::default(); MAX_NOTIFICATIONS];
        self.notification_count = 0;
        self.notification_write_idx = 0;
    }

    pub fn set_command_error_msg(&mut self, msg: &str) {
        let bytes = msg.as_bytes();
        let n = bytes.len().min(ERROR_MSG_LEN - 1);
        self.command_error_msg[..n].copy_from_slice(&bytes[..n]);
        for b in self.command_error_msg.iter_mut().skip(n) {
            *b = 0;
        }
    }

    pub fn command_error_msg(&self) -> String {
        read_fixed(&self.command_error_msg)
    }
}

pub const REGION_SIZE: usize = std::mem::size_of::<Region>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_string_round_trips_through_truncation() {
        let mut raw = [0u8; STATION_LEN];
        write_fixed(&mut raw, "rtu-1");
        assert_eq!(read_fixed(&raw), "rtu-1");
    }

    #[test]
    fn region_size_is_stable_and_nonzero() {
        assert!(REGION_SIZE > 0);
    }
}
