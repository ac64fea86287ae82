use crate::checksum::Checksums;
use crate::container::ContainerKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One physical file found in a folder or inside an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInformation {
    /// Absolute path of the folder or archive holding the file
    pub container_path: PathBuf,
    pub container_kind: ContainerKind,
    /// Path inside the container, `/` separated
    pub relative_path: String,
    /// Name exactly as stored by the container; used for all I/O
    #[serde(skip)]
    pub entry_name: String,
    /// CRC32 read from archive metadata; may be stale
    #[serde(serialize_with = "serialize_crc")]
    pub reported_crc32: Vec<u8>,
    /// Checksums computed from the bytes, empty until calculated
    pub checksums: Checksums,
    pub size: u64,
    /// Bytes of the payload after any header
    pub data_block_size: u64,
    /// Header bytes skipped before hashing
    pub header_size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub compression: Option<String>,
}

fn serialize_crc<S: serde::Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&crate::checksum::to_hex(bytes))
}

impl FileInformation {
    pub fn new(
        container_path: impl Into<PathBuf>,
        container_kind: ContainerKind,
        relative_path: impl Into<String>,
        size: u64,
    ) -> Self {
        let entry_name = relative_path.into();
        Self {
            container_path: container_path.into(),
            container_kind,
            relative_path: normalize_relative(&entry_name),
            entry_name,
            reported_crc32: Vec::new(),
            checksums: Checksums::default(),
            size,
            data_block_size: size,
            header_size: 0,
            modified: None,
            compression: None,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.container_kind == ContainerKind::Folder
    }

    /// Folder name, or archive file name without its extension.
    pub fn container_name(&self) -> String {
        let name = if self.is_folder() {
            self.container_path.file_name()
        } else {
            self.container_path.file_stem()
        };
        name.map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn all_checksums_calculated(&self) -> bool {
        self.checksums.all_known()
    }

    /// Location on disk for folder entries.
    pub fn disk_path(&self) -> PathBuf {
        self.container_path.join(Path::new(&self.entry_name))
    }

    /// Human readable location; archive entries use `archive#entry`.
    pub fn display_path(&self) -> String {
        if self.is_folder() {
            self.disk_path().display().to_string()
        } else {
            format!("{}#{}", self.container_path.display(), self.relative_path)
        }
    }

    /// File name part of the relative path.
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// Convert platform separators to `/` and strip leading separators.
pub fn normalize_relative(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_for_archive_strips_extension() {
        let file = FileInformation::new("/roms/pacman.zip", ContainerKind::Zip, "pacman.6e", 4096);
        assert_eq!(file.container_name(), "pacman");
        assert_eq!(file.display_path(), "/roms/pacman.zip#pacman.6e");
    }

    #[test]
    fn test_container_name_for_folder_keeps_dots() {
        let file = FileInformation::new("/roms/game.v1", ContainerKind::Folder, "a.bin", 1);
        assert_eq!(file.container_name(), "game.v1");
    }

    #[test]
    fn test_relative_path_normalized() {
        let file = FileInformation::new("/roms/g", ContainerKind::Zip, "\\sub\\a.bin", 1);
        assert_eq!(file.relative_path, "sub/a.bin");
        assert_eq!(file.entry_name, "\\sub\\a.bin");
        assert_eq!(file.file_name(), "a.bin");
    }
}
