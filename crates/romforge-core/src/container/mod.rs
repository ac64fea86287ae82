//! Container abstraction - folders and archives as uniform sources of entries

mod folder;
mod sevenzip;
mod zip;

pub use folder::FolderContainer;
pub use sevenzip::SevenZipContainer;
pub use zip::ZipContainer;

use crate::checksum::hash_reader;
use crate::error::{Result, RomError};
use crate::model::FileInformation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The fixed set of container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Folder,
    Zip,
    #[serde(rename = "7z")]
    SevenZip,
}

impl ContainerKind {
    /// Archive kind by file extension only.
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "zip" => Some(Self::Zip),
            "7z" => Some(Self::SevenZip),
            _ => None,
        }
    }

    /// Kind of an existing path: directories are folders, archives go by extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        if path.is_dir() {
            Some(Self::Folder)
        } else {
            Self::from_extension(path)
        }
    }

    pub fn extension(self) -> Option<&'static str> {
        match self {
            Self::Folder => None,
            Self::Zip => Some("zip"),
            Self::SevenZip => Some("7z"),
        }
    }

    pub fn is_archive(self) -> bool {
        self != Self::Folder
    }

    pub fn container(self) -> &'static dyn Container {
        match self {
            Self::Folder => &FolderContainer,
            Self::Zip => &ZipContainer,
            Self::SevenZip => &SevenZipContainer,
        }
    }

    /// Path of the container holding `game_name` inside `folder`.
    pub fn target_path(self, folder: &Path, game_name: &str) -> PathBuf {
        let name = sanitise_name(game_name);
        match self.extension() {
            Some(ext) => folder.join(format!("{}.{}", name, ext)),
            None => folder.join(name),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Zip => "zip",
            Self::SevenZip => "7z",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerKind {
    type Err = RomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "folder" | "dir" | "loose" => Ok(Self::Folder),
            "zip" => Ok(Self::Zip),
            "7z" | "sevenzip" => Ok(Self::SevenZip),
            other => Err(RomError::invalid(format!("unknown container type '{}'", other))),
        }
    }
}

/// Uniform access to the entries of a folder or archive.
///
/// Enumeration and hashing report failures as values; callers that must keep
/// going over damaged containers log and skip them.
pub trait Container: Send + Sync {
    fn kind(&self) -> ContainerKind;

    /// List the file entries of the container at `path`.
    fn get_all_files(&self, path: &Path, recursive: bool) -> Result<Vec<FileInformation>>;

    /// Open a read stream over one entry and hand it to `visit`.
    fn read_entry(
        &self,
        file: &FileInformation,
        visit: &mut dyn FnMut(&mut dyn Read) -> Result<()>,
    ) -> Result<()>;

    /// Relative names of every entry in the container at `path`.
    fn entry_names(&self, path: &Path) -> Result<Vec<String>>;

    fn exists(&self, file: &FileInformation) -> bool {
        self.entry_names(&file.container_path)
            .map(|names| names.iter().any(|n| n == &file.entry_name))
            .unwrap_or(false)
    }

    /// Extract one entry to `dest` on disk.
    fn copy(&self, file: &FileInformation, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(dest)?);
        self.read_entry(file, &mut |reader: &mut dyn Read| {
            io::copy(reader, &mut out)?;
            Ok(())
        })?;
        out.flush()?;
        Ok(())
    }

    fn move_to(&self, file: &FileInformation, dest: &Path) -> Result<()> {
        self.copy(file, dest)?;
        self.remove(file)
    }

    /// Remove one entry. Archives holding only this entry are deleted outright.
    fn remove(&self, file: &FileInformation) -> Result<()>;

    /// Delete the whole container, ignoring "in use" errors.
    fn remove_container(&self, path: &Path) -> Result<()> {
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if is_ignorable_removal_error(&e) => {
                log::warn!("Could not remove {}: {}", path.display(), e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Compute all four checksums of an entry in one pass.
    ///
    /// No-op when every checksum is already known and `force` is off.
    fn calculate_checksums(&self, file: &mut FileInformation, force: bool) -> Result<()> {
        if !force && file.all_checksums_calculated() {
            return Ok(());
        }

        let header = file.header_size;
        let mut outcome = None;
        self.read_entry(file, &mut |reader: &mut dyn Read| {
            outcome = Some(hash_reader(reader, header)?);
            Ok(())
        })?;

        let (checksums, hashed) =
            outcome.ok_or_else(|| RomError::entry_not_found(file.display_path()))?;
        file.checksums = checksums;
        file.data_block_size = hashed;
        Ok(())
    }
}

fn is_ignorable_removal_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy
    )
}

/// List any container path, dispatching on its kind.
pub fn list_container(path: &Path, recursive: bool) -> Result<Vec<FileInformation>> {
    let kind =
        ContainerKind::from_path(path).ok_or_else(|| RomError::UnsupportedContainer(path.to_path_buf()))?;
    kind.container().get_all_files(path, recursive)
}

/// Files found under a root, plus the containers that could not be read.
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<FileInformation>,
    pub failures: Vec<(PathBuf, RomError)>,
}

impl Discovery {
    fn absorb(&mut self, path: &Path, listed: Result<Vec<FileInformation>>) {
        match listed {
            Ok(mut files) => self.files.append(&mut files),
            Err(e) => {
                log::warn!("Skipping unreadable container {}: {}", path.display(), e);
                self.failures.push((path.to_path_buf(), e));
            }
        }
    }
}

/// Build a file pool from a root folder.
///
/// Loose files directly in `root` belong to a folder container for `root`,
/// each top-level subfolder is a folder container, and every top-level
/// `.zip`/`.7z` file is an archive container. With `recursive`, archives
/// inside subfolders are opened as containers too; ones that fail to open
/// stay plain entries of their folder, as they are without `recursive`.
pub fn discover_pool(root: &Path, recursive: bool) -> Result<Discovery> {
    if !root.is_dir() {
        return Err(RomError::invalid(format!("{} is not a directory", root.display())));
    }

    let mut discovery = Discovery::default();
    let loose = FolderContainer.get_all_files(root, false).map(|files| {
        files
            .into_iter()
            .filter(|f| ContainerKind::from_extension(&f.disk_path()).is_none())
            .collect()
    });
    discovery.absorb(root, loose);

    let mut top_level: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    top_level.sort();

    for path in &top_level {
        if path.is_dir() {
            let files = match FolderContainer.get_all_files(path, true) {
                Ok(files) => files,
                Err(e) => {
                    discovery.absorb(path, Err(e));
                    continue;
                }
            };
            for file in files {
                let nested = ContainerKind::from_extension(&file.disk_path()).filter(|_| recursive);
                match nested.map(|kind| kind.container().get_all_files(&file.disk_path(), true)) {
                    Some(Ok(mut inner)) => discovery.files.append(&mut inner),
                    Some(Err(e)) => {
                        log::debug!("Keeping {} as a plain file: {}", file.display_path(), e);
                        discovery.files.push(file);
                    }
                    None => discovery.files.push(file),
                }
            }
        }
    }

    for path in &top_level {
        if path.is_file()
            && let Some(kind) = ContainerKind::from_extension(path)
        {
            discovery.absorb(path, kind.container().get_all_files(path, true));
        }
    }

    log::debug!(
        "Discovered {} files under {} ({} unreadable containers)",
        discovery.files.len(),
        root.display(),
        discovery.failures.len()
    );
    Ok(discovery)
}

/// Move a whole folder or archive container to `to`.
///
/// Falls back to copying and removing the source when a rename is not
/// possible, e.g. across devices.
pub fn move_container(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        return Err(RomError::invalid(format!("{} already exists", to.display())));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    log::debug!("Rename of {} failed, copying instead", from.display());
    copy_then_remove(from, to)
}

fn copy_then_remove(from: &Path, to: &Path) -> Result<()> {
    let kind =
        ContainerKind::from_path(from).ok_or_else(|| RomError::UnsupportedContainer(from.to_path_buf()))?;
    if kind == ContainerKind::Folder {
        for file in FolderContainer.get_all_files(from, true)? {
            FolderContainer.copy(&file, &to.join(&file.entry_name))?;
        }
    } else {
        fs::copy(from, to)?;
    }
    kind.container().remove_container(from)
}

/// Sanitise a string for use as a file or folder name
pub fn sanitise_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(ContainerKind::from_extension(Path::new("a.ZIP")), Some(ContainerKind::Zip));
        assert_eq!(ContainerKind::from_extension(Path::new("a.7z")), Some(ContainerKind::SevenZip));
        assert_eq!(ContainerKind::from_extension(Path::new("a.rar")), None);
        assert_eq!(ContainerKind::from_extension(Path::new("a")), None);
    }

    #[test]
    fn test_target_path() {
        let folder = Path::new("/out");
        assert_eq!(ContainerKind::Zip.target_path(folder, "g1"), PathBuf::from("/out/g1.zip"));
        assert_eq!(ContainerKind::Folder.target_path(folder, "a/b"), PathBuf::from("/out/a_b"));
    }

    #[test]
    fn test_unknown_extension_is_not_a_container() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.rar");
        write_file(&path, b"data");
        assert!(matches!(
            list_container(&path, true),
            Err(RomError::UnsupportedContainer(_))
        ));
    }

    #[test]
    fn test_discover_pool_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write_file(&root.join("loose.bin"), b"loose");
        write_file(&root.join("game2/a.bin"), b"aaa");
        write_file(&root.join("game2/sub/b.bin"), b"bbb");
        write_zip(&root.join("game3.zip"), &[("c.bin", b"ccc")]);
        write_zip(&root.join("nested/deep/game4.zip"), &[("d.bin", b"ddd")]);

        let flat = discover_pool(root, false).unwrap();
        assert!(flat.failures.is_empty());
        let mut names: Vec<(String, String)> = flat
            .files
            .iter()
            .map(|f| (f.container_name(), f.relative_path.clone()))
            .collect();
        names.sort();
        let root_name = root.file_name().unwrap().to_string_lossy().to_string();
        let mut expected = vec![
            ("game2".to_string(), "a.bin".to_string()),
            ("game2".to_string(), "sub/b.bin".to_string()),
            ("game3".to_string(), "c.bin".to_string()),
            ("nested".to_string(), "deep/game4.zip".to_string()),
            (root_name, "loose.bin".to_string()),
        ];
        expected.sort();
        assert_eq!(names, expected);

        let deep = discover_pool(root, true).unwrap();
        assert!(deep.files.iter().any(|f| f.container_name() == "game4"));
        assert!(!deep.files.iter().any(|f| f.relative_path == "deep/game4.zip"));
    }

    #[test]
    fn test_archive_named_file_inside_game_folder_is_an_entry() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("g1/bonus.zip"), b"not really a zip");
        write_file(&dir.path().join("g1/a.bin"), b"aaa");

        let discovery = discover_pool(dir.path(), true).unwrap();
        assert!(discovery.failures.is_empty());
        let mut names: Vec<&str> = discovery.files.iter().map(|f| f.relative_path.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a.bin", "bonus.zip"]);
        assert!(discovery.files.iter().all(|f| f.is_folder()));
    }

    #[test]
    fn test_discover_pool_reports_corrupt_archive() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("broken.zip"), b"not a zip at all");
        write_file(&dir.path().join("fine/a.bin"), b"a");

        let discovery = discover_pool(dir.path(), true).unwrap();
        assert_eq!(discovery.files.len(), 1);
        assert_eq!(discovery.failures.len(), 1);
        assert!(discovery.failures[0].0.ends_with("broken.zip"));
    }

    #[test]
    fn test_remove_container_tolerates_missing_paths() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("g1.zip");
        write_zip(&archive, &[("a.bin", b"aaa")]);
        write_file(&dir.path().join("g2/sub/b.bin"), b"bbb");

        ZipContainer.remove_container(&archive).unwrap();
        assert!(!archive.exists());
        FolderContainer.remove_container(&dir.path().join("g2")).unwrap();
        assert!(!dir.path().join("g2").exists());

        ZipContainer.remove_container(&archive).unwrap();
        FolderContainer.remove_container(&dir.path().join("never-there")).unwrap();
    }

    #[test]
    fn test_copy_then_remove_relocates_containers() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("g1/sub/a.bin"), b"aaa");
        write_zip(&dir.path().join("g2.zip"), &[("b.bin", b"bbb")]);

        copy_then_remove(&dir.path().join("g1"), &dir.path().join("moved/g1")).unwrap();
        assert_eq!(fs::read(dir.path().join("moved/g1/sub/a.bin")).unwrap(), b"aaa");
        assert!(!dir.path().join("g1").exists());

        copy_then_remove(&dir.path().join("g2.zip"), &dir.path().join("moved/g2.zip")).unwrap();
        assert_eq!(ZipContainer.entry_names(&dir.path().join("moved/g2.zip")).unwrap(), vec!["b.bin"]);
        assert!(!dir.path().join("g2.zip").exists());

        write_file(&dir.path().join("taken/g3.bin"), b"x");
        write_file(&dir.path().join("g3/c.bin"), b"c");
        assert!(move_container(&dir.path().join("g3"), &dir.path().join("taken/g3.bin")).is_err());
    }

    #[test]
    fn test_calculate_checksums_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("g/a.bin"), b"test content");
        let mut files = FolderContainer.get_all_files(&dir.path().join("g"), true).unwrap();
        let file = &mut files[0];

        FolderContainer.calculate_checksums(file, false).unwrap();
        assert!(file.all_checksums_calculated());
        assert_eq!(crate::checksum::to_hex(&file.checksums.crc32), "57f4675d");

        fs::remove_file(file.disk_path()).unwrap();
        // Already calculated: no I/O happens, so the missing file is not noticed.
        FolderContainer.calculate_checksums(file, false).unwrap();
        assert!(FolderContainer.calculate_checksums(file, true).is_err());
    }
}
