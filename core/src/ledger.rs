//! Scratch ledger shared with emulator-side scripts.
//!
//! The file is reset to an empty JSON list when a fleet starts; scripts
//! append to it while they run.

use std::fs;
use std::io;
use std::path::Path;

/// Contents of a freshly initialized ledger
pub const EMPTY_LEDGER: &str = "[]";

/// Create the parent directory if needed and overwrite `path` with `[]`
pub fn initialize(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, EMPTY_LEDGER)?;
    tracing::debug!(path = %path.display(), "Ledger initialized");
    Ok(())
}

/// Read the ledger back as a list of JSON values
pub fn read(path: &Path) -> io::Result<Vec<serde_json::Value>> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_initialize_creates_directory_and_empty_list() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("temp").join("state.json");

        initialize(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
        assert!(read(&path).unwrap().is_empty());
    }

    #[test]
    fn test_initialize_overwrites_previous_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"[{"instance": 0, "attempt": 12}]"#).unwrap();
        assert_eq!(read(&path).unwrap().len(), 1);

        initialize(&path).unwrap();
        assert!(read(&path).unwrap().is_empty());
    }

    #[test]
    fn test_read_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();
        assert_eq!(read(&path).unwrap_err().kind(), io::ErrorKind::InvalidData);
    }
}
