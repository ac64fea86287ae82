//! Copy strategies - moving one physical entry into a target container under its database name

use crate::container::{Container, ContainerKind, SevenZipContainer, ZipContainer};
use crate::error::{Result, RomError};
use crate::model::FileInformation;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Priority of a same-format copy (raw bytes, cheapest).
pub const PRIORITY_SAME_FORMAT: u32 = 10;
/// Priority of a folder-to-archive or archive-to-folder copy.
pub const PRIORITY_DIRECT: u32 = 5;
/// Priority of the universal fallback through a temporary file.
pub const PRIORITY_FALLBACK: u32 = 1;

/// One rebuild write: put `file` into the container of `game_name` as `entry_name`.
#[derive(Debug, Clone)]
pub struct CopyRequest<'a> {
    pub file: &'a FileInformation,
    pub target_folder: &'a Path,
    pub target_kind: ContainerKind,
    pub game_name: &'a str,
    pub entry_name: &'a str,
    /// Roms the game should end up with
    pub expected_files: usize,
    /// The source may be consumed instead of copied
    pub allow_move: bool,
}

impl CopyRequest<'_> {
    pub fn target_path(&self) -> PathBuf {
        self.target_kind.target_path(self.target_folder, self.game_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    pub target: PathBuf,
    /// False when an entry with that name was already there
    pub written: bool,
    /// The source entry no longer exists
    pub moved: bool,
    /// The target now holds `expected_files` entries
    pub complete: bool,
}

pub trait FileCopier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Priority for handling this copy; 0 means it cannot.
    fn can_copy(&self, file: &FileInformation, target_kind: ContainerKind, expected_files: usize) -> u32;

    fn copy(&self, request: &CopyRequest<'_>) -> Result<CopyOutcome>;
}

fn finish(request: &CopyRequest<'_>, written: bool, moved: bool) -> Result<CopyOutcome> {
    let target = request.target_path();
    let entries = request.target_kind.container().entry_names(&target)?.len();
    Ok(CopyOutcome {
        complete: entries == request.expected_files,
        target,
        written,
        moved,
    })
}

fn folder_entry_path(request: &CopyRequest<'_>) -> PathBuf {
    request.target_path().join(Path::new(request.entry_name))
}

/// Add a file on disk to a zip or 7z target.
fn add_path_to_archive(kind: ContainerKind, archive: &Path, entry_name: &str, source: &Path) -> Result<bool> {
    match kind {
        ContainerKind::Zip => ZipContainer::add_from_path(archive, entry_name, source),
        ContainerKind::SevenZip => SevenZipContainer::add_from_path(archive, entry_name, source),
        ContainerKind::Folder => Err(RomError::invalid(format!(
            "{} is a folder target, not an archive",
            archive.display()
        ))),
    }
}

/// zip → zip, copying compressed bytes without recompressing.
#[derive(Debug, Default)]
pub struct ZipToZipCopier;

impl FileCopier for ZipToZipCopier {
    fn name(&self) -> &'static str {
        "zip-to-zip"
    }

    fn can_copy(&self, file: &FileInformation, target_kind: ContainerKind, _expected_files: usize) -> u32 {
        if file.container_kind == ContainerKind::Zip && target_kind == ContainerKind::Zip {
            PRIORITY_SAME_FORMAT
        } else {
            0
        }
    }

    fn copy(&self, request: &CopyRequest<'_>) -> Result<CopyOutcome> {
        let target = request.target_path();
        let file = request.file;

        // A single-entry archive already named right can simply be moved.
        if request.allow_move
            && !target.exists()
            && file.entry_name == request.entry_name
            && ZipContainer.entry_names(&file.container_path)?.len() == 1
        {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            if fs::rename(&file.container_path, &target).is_ok() {
                return finish(request, true, true);
            }
        }

        let written = ZipContainer::add_raw(&target, request.entry_name, file)?;
        finish(request, written, false)
    }
}

/// folder → folder, a plain file copy (or rename when moving).
#[derive(Debug, Default)]
pub struct FolderToFolderCopier;

impl FileCopier for FolderToFolderCopier {
    fn name(&self) -> &'static str {
        "folder-to-folder"
    }

    fn can_copy(&self, file: &FileInformation, target_kind: ContainerKind, _expected_files: usize) -> u32 {
        if file.is_folder() && target_kind == ContainerKind::Folder {
            PRIORITY_SAME_FORMAT
        } else {
            0
        }
    }

    fn copy(&self, request: &CopyRequest<'_>) -> Result<CopyOutcome> {
        let dest = folder_entry_path(request);
        if dest.exists() {
            return finish(request, false, false);
        }
        let container = request.file.container_kind.container();
        if request.allow_move {
            container.move_to(request.file, &dest)?;
            finish(request, true, true)
        } else {
            container.copy(request.file, &dest)?;
            finish(request, true, false)
        }
    }
}

/// folder → zip/7z, compressing straight from the file on disk.
#[derive(Debug, Default)]
pub struct FolderToArchiveCopier;

impl FileCopier for FolderToArchiveCopier {
    fn name(&self) -> &'static str {
        "folder-to-archive"
    }

    fn can_copy(&self, file: &FileInformation, target_kind: ContainerKind, _expected_files: usize) -> u32 {
        if file.is_folder() && target_kind.is_archive() {
            PRIORITY_DIRECT
        } else {
            0
        }
    }

    fn copy(&self, request: &CopyRequest<'_>) -> Result<CopyOutcome> {
        let written = add_path_to_archive(
            request.target_kind,
            &request.target_path(),
            request.entry_name,
            &request.file.disk_path(),
        )?;
        finish(request, written, false)
    }
}

/// archive → folder, extracting the entry in place.
#[derive(Debug, Default)]
pub struct ArchiveToFolderCopier;

impl FileCopier for ArchiveToFolderCopier {
    fn name(&self) -> &'static str {
        "archive-to-folder"
    }

    fn can_copy(&self, file: &FileInformation, target_kind: ContainerKind, _expected_files: usize) -> u32 {
        if !file.is_folder() && target_kind == ContainerKind::Folder {
            PRIORITY_DIRECT
        } else {
            0
        }
    }

    fn copy(&self, request: &CopyRequest<'_>) -> Result<CopyOutcome> {
        let dest = folder_entry_path(request);
        if dest.exists() {
            return finish(request, false, false);
        }
        request.file.container_kind.container().copy(request.file, &dest)?;
        finish(request, true, false)
    }
}

/// Any container → zip/7z through a temporary extracted file.
#[derive(Debug, Default)]
pub struct ExtractingArchiveCopier;

impl FileCopier for ExtractingArchiveCopier {
    fn name(&self) -> &'static str {
        "extract-to-archive"
    }

    fn can_copy(&self, _file: &FileInformation, target_kind: ContainerKind, _expected_files: usize) -> u32 {
        if target_kind.is_archive() {
            PRIORITY_FALLBACK
        } else {
            0
        }
    }

    fn copy(&self, request: &CopyRequest<'_>) -> Result<CopyOutcome> {
        let target = request.target_path();
        if request
            .target_kind
            .container()
            .entry_names(&target)?
            .iter()
            .any(|n| n == request.entry_name)
        {
            return finish(request, false, false);
        }

        let staged = NamedTempFile::new()?;
        request
            .file
            .container_kind
            .container()
            .copy(request.file, staged.path())?;
        let written = add_path_to_archive(request.target_kind, &target, request.entry_name, staged.path())?;
        finish(request, written, false)
    }
}

/// The registered strategies, in registration order.
pub struct CopierRegistry {
    copiers: Vec<Box<dyn FileCopier>>,
}

impl Default for CopierRegistry {
    fn default() -> Self {
        Self {
            copiers: vec![
                Box::new(ZipToZipCopier),
                Box::new(FolderToFolderCopier),
                Box::new(FolderToArchiveCopier),
                Box::new(ArchiveToFolderCopier),
                Box::new(ExtractingArchiveCopier),
            ],
        }
    }
}

impl CopierRegistry {
    /// Strategy with the strictly highest nonzero priority; ties go to the earliest registered.
    pub fn resolve(
        &self,
        file: &FileInformation,
        target_kind: ContainerKind,
        expected_files: usize,
    ) -> Option<&dyn FileCopier> {
        let mut best: Option<(&dyn FileCopier, u32)> = None;
        for copier in &self.copiers {
            let priority = copier.can_copy(file, target_kind, expected_files);
            if priority > best.map(|(_, p)| p).unwrap_or(0) {
                best = Some((copier.as_ref(), priority));
            }
        }
        best.map(|(copier, _)| copier)
    }
}
