//! Atomic on-disk persistence for desired-state snapshots: one file per RTU
//! under a configured directory, write-temp-then-rename, self-checksummed,
//! format version stored in the first 4 bytes.

use super::state::{DesiredState, FORMAT_VERSION};
use crate::error::{CoreError, CoreResult};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn file_path(dir: &Path, station: &str) -> PathBuf {
    dir.join(format!("{station}.state"))
}

/// Snapshot the desired state to disk: write to a temp file in the same
/// directory, then rename over the final path so a crash mid-write never
/// leaves a torn file in place.
pub fn snapshot(dir: &Path, state: &DesiredState) -> CoreResult<()> {
    std::fs::create_dir_all(dir)?;
    let final_path = file_path(dir, &state.station);
    let tmp_path = dir.join(format!(".{}.tmp", state.station));

    let payload = serde_json::to_vec(state).map_err(|e| CoreError::Io(e.to_string()))?;
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(&FORMAT_VERSION.to_le_bytes())?;
        f.write_all(&payload)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

/// Restore a desired-state snapshot. A checksum mismatch yields `Corrupt`;
/// callers must fall back to `DesiredState::empty` in that case, per the
/// reconciler's persistence contract.
pub fn restore(dir: &Path, station: &str) -> CoreResult<DesiredState> {
    let path = file_path(dir, station);
    let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CoreError::NotFound(station.to_string()),
        _ => CoreError::Io(e.to_string()),
    })?;
    if bytes.len() < 4 {
        return Err(CoreError::Corrupt(format!("{station}: truncated state file")));
    }
    let (version_bytes, payload) = bytes.split_at(4);
    let version = u32::from_le_bytes(version_bytes.try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(CoreError::Corrupt(format!(
            "{station}: unsupported format version {version}"
        )));
    }
    let state: DesiredState =
        serde_json::from_slice(payload).map_err(|e| CoreError::Corrupt(format!("{station}: {e}")))?;
    if !state.validate_checksum() {
        return Err(CoreError::Corrupt(format!("{station}: checksum mismatch")));
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::types::{ActuatorCommand, CommandCode};

    #[test]
    fn round_trip_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = DesiredState::empty("rtu-1");
        s.set_actuator(9, ActuatorCommand { code: CommandCode::On, pwm_duty: 0, forced: false }, 42);

        snapshot(tmp.path(), &s).unwrap();
        let mut restored = restore(tmp.path(), "rtu-1").unwrap();
        restored.dirty = s.dirty;
        assert_eq!(restored, s);
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let s = DesiredState::empty("rtu-1");
        snapshot(tmp.path(), &s).unwrap();

        // Flip a byte in the payload to break the checksum.
        let path = file_path(tmp.path(), "rtu-1");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = restore(tmp.path(), "rtu-1").unwrap_err();
        assert_eq!(err.kind_name(), "CORRUPT");
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = restore(tmp.path(), "ghost").unwrap_err();
        assert_eq!(err.kind_name(), "NOT_FOUND");
    }
}
