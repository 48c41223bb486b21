use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Fresh unique path `dir/<prefix>-<uuid>.<ext>`. The directory is created.
pub fn mint_path(dir: &Path, prefix: &str, ext: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    Ok(dir.join(format!("{prefix}-{}.{ext}", Uuid::new_v4())))
}

/// Locate a data file recorded in a meta file. When the recorded path does
/// not exist, a file with the same basename next to the meta file is used.
pub fn resolve_data_path(meta_path: &Path, stored: &Path) -> Result<PathBuf> {
    if stored.exists() {
        return Ok(stored.to_path_buf());
    }
    if let Some(name) = stored.file_name()
        && let Some(dir) = meta_path.parent()
    {
        let sibling = dir.join(name);
        if sibling.exists() {
            tracing::warn!(
                stored = %stored.display(),
                using = %sibling.display(),
                "data file moved; using copy next to meta file"
            );
            return Ok(sibling);
        }
    }
    Err(StoreError::MissingFile(stored.to_path_buf()))
}

pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| StoreError::io(path, e))
}

pub fn write_string(path: &Path, contents: &str) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    }
    fs::write(path, contents).map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_path_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = mint_path(dir.path(), "ppm", "sqlite").unwrap();
        let b = mint_path(dir.path(), "ppm", "sqlite").unwrap();
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("ppm-"));
        assert_eq!(a.extension().unwrap(), "sqlite");
    }

    #[test]
    fn test_resolve_prefers_stored() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data.sqlite");
        fs::write(&data, b"").unwrap();
        let meta = dir.path().join("meta.sqlite");
        assert_eq!(resolve_data_path(&meta, &data).unwrap(), data);
    }

    #[test]
    fn test_resolve_falls_back_to_meta_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data.sqlite"), b"").unwrap();
        let meta = dir.path().join("meta.sqlite");
        let stored = Path::new("/nonexistent/elsewhere/data.sqlite");
        assert_eq!(
            resolve_data_path(&meta, stored).unwrap(),
            dir.path().join("data.sqlite")
        );
    }

    #[test]
    fn test_resolve_missing() {
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().join("meta.sqlite");
        let err = resolve_data_path(&meta, Path::new("/nonexistent/data.sqlite"));
        assert!(matches!(err, Err(StoreError::MissingFile(_))));
    }
}
