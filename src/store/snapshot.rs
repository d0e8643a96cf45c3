use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// Write JSON via a sibling temp file and an atomic rename, so a crash
/// mid-write can never leave a truncated snapshot behind.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// A missing or corrupt snapshot loads as the default value.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let Ok(data) = fs::read(path) else {
        return T::default();
    };

    match serde_json::from_slice(&data) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), "corrupt snapshot ignored: {}", e);
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn round_trips_and_tolerates_corruption() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state.json");

        let mut map = HashMap::new();
        map.insert("buy:w:m".to_string(), 1_700_000_000_000u64);
        write_json_atomic(&path, &map)?;

        let loaded: HashMap<String, u64> = read_json_or_default(&path);
        assert_eq!(loaded, map);

        std::fs::write(&path, b"{ not json")?;
        let loaded: HashMap<String, u64> = read_json_or_default(&path);
        assert!(loaded.is_empty());

        let missing: HashMap<String, u64> = read_json_or_default(&dir.path().join("nope.json"));
        assert!(missing.is_empty());
        Ok(())
    }
}
