//! Optional JSON snapshotting of monitor state.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use rp_types::RpResult;

/// Serialize `value` to `path`, writing a sibling temp file first and renaming
/// it into place so readers never see a truncated snapshot.
pub fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> RpResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "snapshot written");
    Ok(())
}

/// Load a snapshot previously written by [`write_snapshot`].
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> RpResult<T> {
    let body = fs::read(path)?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PositionSnapshot;

    #[test]
    fn snapshot_survives_a_write_read_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let snap = PositionSnapshot::empty();
        write_snapshot(&path, &snap).unwrap();
        let loaded: PositionSnapshot = read_snapshot(&path).unwrap();
        assert_eq!(loaded.version, snap.version);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result: RpResult<PositionSnapshot> = read_snapshot(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(rp_types::RpError::Io(_))));
    }
}
