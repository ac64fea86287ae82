use super::{Container, ContainerKind};
use crate::error::{Result, RomError};
use crate::model::FileInformation;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use walkdir::WalkDir;

/// A plain directory; entries are every regular file below it, archives included.
#[derive(Debug, Clone, Copy, Default)]
pub struct FolderContainer;

impl Container for FolderContainer {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Folder
    }

    fn get_all_files(&self, path: &Path, recursive: bool) -> Result<Vec<FileInformation>> {
        if !path.is_dir() {
            return Err(RomError::UnsupportedContainer(path.to_path_buf()));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();

        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Skipping unreadable entry in {}: {}", path.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    log::debug!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            let relative = entry
                .path()
                .strip_prefix(path)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| entry.file_name().to_string_lossy().to_string());

            let mut file = FileInformation::new(path, ContainerKind::Folder, relative, metadata.len());
            file.modified = metadata.modified().ok().map(DateTime::<Utc>::from);
            files.push(file);
        }

        Ok(files)
    }

    fn read_entry(
        &self,
        file: &FileInformation,
        visit: &mut dyn FnMut(&mut dyn Read) -> Result<()>,
    ) -> Result<()> {
        let mut reader = BufReader::new(File::open(file.disk_path())?);
        visit(&mut reader)
    }

    fn entry_names(&self, path: &Path) -> Result<Vec<String>> {
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        Ok(self
            .get_all_files(path, true)?
            .into_iter()
            .map(|f| f.relative_path)
            .collect())
    }

    fn exists(&self, file: &FileInformation) -> bool {
        file.disk_path().is_file()
    }

    fn copy(&self, file: &FileInformation, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(file.disk_path(), dest)?;
        Ok(())
    }

    fn move_to(&self, file: &FileInformation, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        // Rename fails across devices; fall back to copy and delete.
        if fs::rename(file.disk_path(), dest).is_err() {
            self.copy(file, dest)?;
            self.remove(file)?;
        }
        Ok(())
    }

    fn remove(&self, file: &FileInformation) -> Result<()> {
        fs::remove_file(file.disk_path())?;

        let mut dir = file.disk_path().parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if !current.starts_with(&file.container_path) || current == file.container_path {
                break;
            }
            if fs::remove_dir(&current).is_err() {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::test_support::write_file;
    use tempfile::TempDir;

    #[test]
    fn test_lists_files_with_relative_paths() {
        let dir = TempDir::new().unwrap();
        let game = dir.path().join("game");
        write_file(&game.join("a.bin"), b"aaa");
        write_file(&game.join("disc/b.bin"), b"bb");
        write_file(&game.join("other.zip"), b"zip-ish");

        let files = FolderContainer.get_all_files(&game, true).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(names, vec!["a.bin", "disc/b.bin", "other.zip"]);
        assert_eq!(files[1].size, 2);
        assert_eq!(files[1].container_name(), "game");

        let shallow = FolderContainer.get_all_files(&game, false).unwrap();
        assert_eq!(shallow.len(), 2);
    }

    #[test]
    fn test_remove_prunes_empty_subfolders() {
        let dir = TempDir::new().unwrap();
        let game = dir.path().join("game");
        write_file(&game.join("disc/b.bin"), b"bb");
        write_file(&game.join("keep.bin"), b"k");

        let files = FolderContainer.get_all_files(&game, true).unwrap();
        let nested = files.iter().find(|f| f.relative_path == "disc/b.bin").unwrap();
        FolderContainer.remove(nested).unwrap();

        assert!(!game.join("disc").exists());
        assert!(game.join("keep.bin").exists());
    }

    #[test]
    fn test_move_to_renames() {
        let dir = TempDir::new().unwrap();
        let game = dir.path().join("game");
        write_file(&game.join("a.bin"), b"aaa");
        let files = FolderContainer.get_all_files(&game, true).unwrap();

        let dest = dir.path().join("out/renamed.bin");
        FolderContainer.move_to(&files[0], &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"aaa");
        assert!(!FolderContainer.exists(&files[0]));
    }
}
