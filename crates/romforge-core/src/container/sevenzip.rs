use super::{Container, ContainerKind};
use crate::error::{Result, RomError};
use crate::model::FileInformation;
use sevenz_rust::{Password, SevenZArchiveEntry, SevenZReader, SevenZWriter};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tempfile::NamedTempFile;

/// A 7z archive.
///
/// Solid archives cannot be appended to or shrunk in place, so every write
/// extracts the archive to a staging folder and writes a fresh one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SevenZipContainer;

impl SevenZipContainer {
    /// Add a file from disk. Returns false when the name already exists.
    pub fn add_from_path(archive: &Path, entry_name: &str, source: &Path) -> Result<bool> {
        if SevenZipContainer
            .entry_names(archive)?
            .iter()
            .any(|n| n == entry_name)
        {
            return Ok(false);
        }
        Self::rewrite(archive, None, Some((source, entry_name)))?;
        Ok(true)
    }

    fn rewrite(archive: &Path, drop_entry: Option<&str>, add: Option<(&Path, &str)>) -> Result<()> {
        let dir = archive.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let staging = tempfile::tempdir()?;
        let mut kept = Vec::new();
        if archive.exists() {
            sevenz_rust::decompress_file(archive, staging.path())?;
            kept = SevenZipContainer
                .entry_names(archive)?
                .into_iter()
                .filter(|n| Some(n.as_str()) != drop_entry)
                .collect();
        }

        let temp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = SevenZWriter::new(temp.reopen()?)?;
            for name in &kept {
                let extracted = staging.path().join(name);
                writer.push_archive_entry(
                    SevenZArchiveEntry::from_path(&extracted, name.clone()),
                    Some(File::open(&extracted)?),
                )?;
            }
            if let Some((source, name)) = add {
                writer.push_archive_entry(
                    SevenZArchiveEntry::from_path(source, name.to_string()),
                    Some(File::open(source)?),
                )?;
            }
            writer.finish()?;
        }
        temp.persist(archive).map_err(|e| e.error)?;
        Ok(())
    }
}

impl Container for SevenZipContainer {
    fn kind(&self) -> ContainerKind {
        ContainerKind::SevenZip
    }

    fn get_all_files(&self, path: &Path, _recursive: bool) -> Result<Vec<FileInformation>> {
        let reader = SevenZReader::open(path, Password::empty())?;
        let files = reader
            .archive()
            .files
            .iter()
            .filter(|entry| !entry.is_directory)
            .map(|entry| {
                let mut file = FileInformation::new(path, ContainerKind::SevenZip, &entry.name, entry.size);
                if entry.has_crc {
                    file.reported_crc32 = (entry.crc as u32).to_be_bytes().to_vec();
                }
                file.compression = Some("7z".to_string());
                file
            })
            .collect();
        Ok(files)
    }

    fn read_entry(
        &self,
        file: &FileInformation,
        visit: &mut dyn FnMut(&mut dyn Read) -> Result<()>,
    ) -> Result<()> {
        let mut reader = SevenZReader::open(&file.container_path, Password::empty())?;
        let mut outcome: Option<Result<()>> = None;
        reader.for_each_entries(|entry, data| {
            if entry.name != file.entry_name {
                return Ok(true);
            }
            outcome = Some(visit(data));
            Ok(false)
        })?;
        outcome.unwrap_or_else(|| Err(RomError::entry_not_found(file.display_path())))
    }

    fn entry_names(&self, path: &Path) -> Result<Vec<String>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = SevenZReader::open(path, Password::empty())?;
        Ok(reader
            .archive()
            .files
            .iter()
            .filter(|entry| !entry.is_directory)
            .map(|entry| entry.name.clone())
            .collect())
    }

    fn remove(&self, file: &FileInformation) -> Result<()> {
        let names = self.entry_names(&file.container_path)?;
        if !names.iter().any(|n| n == &file.entry_name) {
            return Err(RomError::entry_not_found(file.display_path()));
        }
        if names.len() == 1 {
            return self.remove_container(&file.container_path);
        }
        Self::rewrite(&file.container_path, Some(&file.entry_name), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::to_hex;
    use crate::container::test_support::{write_7z, write_file};
    use tempfile::TempDir;

    #[test]
    fn test_lists_and_hashes_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.7z");
        write_7z(&path, &[("a.bin", b"test content"), ("b.bin", b"other")]);

        let mut files = SevenZipContainer.get_all_files(&path, true).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].container_name(), "game");

        SevenZipContainer.calculate_checksums(&mut files[0], false).unwrap();
        assert_eq!(to_hex(&files[0].checksums.crc32), "57f4675d");
    }

    #[test]
    fn test_add_and_remove_entries() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("target.7z");
        let source = dir.path().join("src.bin");
        write_file(&source, b"payload");

        assert!(SevenZipContainer::add_from_path(&archive, "x.bin", &source).unwrap());
        assert!(!SevenZipContainer::add_from_path(&archive, "x.bin", &source).unwrap());
        assert!(SevenZipContainer::add_from_path(&archive, "y.bin", &source).unwrap());

        let files = SevenZipContainer.get_all_files(&archive, true).unwrap();
        assert_eq!(files.len(), 2);

        SevenZipContainer.remove(&files[0]).unwrap();
        assert_eq!(SevenZipContainer.entry_names(&archive).unwrap(), vec!["y.bin".to_string()]);

        let remaining = SevenZipContainer.get_all_files(&archive, true).unwrap();
        SevenZipContainer.remove(&remaining[0]).unwrap();
        assert!(!archive.exists());
    }
}
