//! Scan profile - which folders and offline disks make up the pool.
//!
//! ```toml
//! folders = ["/roms/arcade", "/mnt/usb/arcade"]
//! offline_disks = ["backup-2023"]
//! force_recompute = false
//! use_reported_crc = true
//! ```

use crate::db::OfflineStore;
use crate::error::Result;
use crate::model::FileInformation;
use crate::services::scan::{ScanOptions, collect_pool};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScanProfile {
    pub folders: Vec<PathBuf>,
    pub offline_disks: Vec<String>,
    pub force_recompute: bool,
    pub use_reported_crc: bool,
}

/// Canonical path to the profile: `~/.config/romforge/profile.toml`.
pub fn profile_path() -> PathBuf {
    let config = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    config.join("romforge").join("profile.toml")
}

impl ScanProfile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// The profile at the default location, or `None` when there is no file.
    pub fn load_default() -> Result<Option<Self>> {
        let path = profile_path();
        if !path.exists() {
            return Ok(None);
        }
        log::debug!("Loading scan profile from {}", path.display());
        Self::load(&path).map(Some)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            force_recompute: self.force_recompute,
            use_reported_crc: self.use_reported_crc,
        }
    }

    /// Discover the online folders and append the recorded offline disks.
    pub fn collect_pool(&self, store: &OfflineStore) -> Result<Vec<FileInformation>> {
        let mut offline = Vec::new();
        for disk in &self.offline_disks {
            offline.extend(store.load_disk(disk)?);
        }
        collect_pool(&self.folders, offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerKind;
    use crate::container::test_support::write_file;
    use crate::error::RomError;
    use tempfile::TempDir;

    #[test]
    fn test_load_partial_profile_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profile.toml");
        std::fs::write(&path, "folders = [\"/roms\"]\nuse_reported_crc = true\n").unwrap();

        let profile = ScanProfile::load(&path).unwrap();
        assert_eq!(profile.folders, vec![PathBuf::from("/roms")]);
        assert!(profile.offline_disks.is_empty());
        assert!(profile.scan_options().use_reported_crc);
        assert!(!profile.scan_options().force_recompute);
    }

    #[test]
    fn test_invalid_profile_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profile.toml");
        std::fs::write(&path, "folders = 3").unwrap();
        assert!(matches!(ScanProfile::load(&path), Err(RomError::Profile(_))));
    }

    #[test]
    fn test_pool_combines_folders_and_offline_disks() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("game/a.bin"), b"aaaa");

        let mut store = OfflineStore::open_in_memory().unwrap();
        let offline = FileInformation::new("/media/usb/other", ContainerKind::Folder, "b.bin", 2);
        store.record_disk("usb", std::slice::from_ref(&offline)).unwrap();

        let profile = ScanProfile {
            folders: vec![dir.path().to_path_buf()],
            offline_disks: vec!["usb".into()],
            ..ScanProfile::default()
        };
        let pool = profile.collect_pool(&store).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].relative_path, "a.bin");
        assert_eq!(pool[1], offline);
    }
}
