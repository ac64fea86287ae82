use crate::checksum::does_checksum_match;
use crate::container::{ContainerKind, discover_pool, move_container};
use crate::copier::{CopierRegistry, CopyRequest};
use crate::error::{Result, RomError};
use crate::model::file_info::normalize_relative;
use crate::model::{FileInformation, Game, GameDatabase, GameId, RomFile, RomRef};
use crate::services::cancel::CancellationToken;
use crate::services::progress::{OperationStatus, ProgressSink, RebuildEvent, percent};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Options controlling a rebuild
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    pub source: PathBuf,
    pub target: PathBuf,
    /// Games left incomplete are moved here when set
    pub incomplete_target: Option<PathBuf>,
    pub target_kind: ContainerKind,
    pub force_recompute: bool,
    pub use_reported_crc: bool,
    /// Delete source entries once every copy of them succeeded
    pub remove_source: bool,
    pub find_missing_cue_files: bool,
    /// Extra folders searched for `.cue` sheets
    pub cue_folders: Vec<PathBuf>,
}

impl RebuildOptions {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>, target_kind: ContainerKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            incomplete_target: None,
            target_kind,
            force_recompute: false,
            use_reported_crc: false,
            remove_source: false,
            find_missing_cue_files: false,
            cue_folders: Vec::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() {
            return Err(RomError::invalid("source folder is empty"));
        }
        if self.target.as_os_str().is_empty() {
            return Err(RomError::invalid("target folder is empty"));
        }
        if !self.source.is_dir() {
            return Err(RomError::invalid(format!(
                "source {} is not a directory",
                self.source.display()
            )));
        }
        if same_path(&self.source, &self.target) {
            return Err(RomError::invalid("source and target folders are the same"));
        }
        if let Some(incomplete) = &self.incomplete_target
            && same_path(incomplete, &self.target)
        {
            return Err(RomError::invalid("incomplete and target folders are the same"));
        }
        Ok(())
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// One entry written (or found already present) in a target container
#[derive(Debug, Clone, Serialize)]
pub struct RebuiltFile {
    pub source: String,
    pub game: String,
    pub rom_name: String,
    pub target: PathBuf,
    /// False when the entry was already present
    pub written: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedCopy {
    pub source: String,
    pub game: String,
    pub rom_name: String,
    pub error: String,
}

/// Final state of a target container touched by the rebuild
#[derive(Debug, Clone, Serialize)]
pub struct GameCompletion {
    pub game: String,
    pub target: PathBuf,
    pub complete: bool,
}

/// Rebuild outcome, or one incremental slice of it
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildResults {
    pub rebuilt: Vec<RebuiltFile>,
    pub unused: Vec<FileInformation>,
    pub failed: Vec<FailedCopy>,
    /// Source entries deleted after being rebuilt
    pub removed: Vec<String>,
    pub games: Vec<GameCompletion>,
}

impl RebuildResults {
    pub fn is_empty(&self) -> bool {
        self.rebuilt.is_empty()
            && self.unused.is_empty()
            && self.failed.is_empty()
            && self.removed.is_empty()
            && self.games.is_empty()
    }

    pub fn extend(&mut self, slice: RebuildResults) {
        self.rebuilt.extend(slice.rebuilt);
        self.unused.extend(slice.unused);
        self.failed.extend(slice.failed);
        self.removed.extend(slice.removed);
        self.games.extend(slice.games);
    }
}

fn is_cue(rom: &RomFile) -> bool {
    rom.name.to_ascii_lowercase().ends_with(".cue")
}

/// Copies matching source files into per-game target containers under their database names.
pub struct RebuildEngine<S: ProgressSink<RebuildEvent> = ()> {
    options: RebuildOptions,
    sink: S,
    cancel: CancellationToken,
    copiers: CopierRegistry,
}

impl<S: ProgressSink<RebuildEvent>> RebuildEngine<S> {
    /// Fails with `InvalidArgument` on empty or clashing folders.
    pub fn new(options: RebuildOptions, sink: S) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            sink,
            cancel: CancellationToken::new(),
            copiers: CopierRegistry::default(),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn check_canceled(&self, percent: f64) -> Result<()> {
        if self.cancel.is_canceled() {
            self.sink.emit(RebuildEvent::canceled(percent));
            return Err(RomError::Canceled);
        }
        Ok(())
    }

    fn needs_hash(&self, file: &FileInformation, candidates: &[RomRef], db: &GameDatabase) -> bool {
        if self.options.force_recompute {
            return true;
        }
        if self.options.use_reported_crc
            && !file.reported_crc32.is_empty()
            && candidates.iter().all(|r| !db.rom(*r).checksums.crc32.is_empty())
        {
            return false;
        }
        !file.all_checksums_calculated()
    }

    fn target_of(&self, game: &Game) -> PathBuf {
        self.options.target_kind.target_path(&self.options.target, &game.name)
    }

    /// Copy `file` into the target of `rom`, recording the outcome in `slice`.
    fn copy_one(
        &self,
        db: &GameDatabase,
        rom_ref: RomRef,
        file: &FileInformation,
        allow_move: bool,
        slice: &mut RebuildResults,
        completion: &mut BTreeMap<GameId, bool>,
    ) -> (bool, bool) {
        let game = db.game(rom_ref.game);
        let rom = db.rom(rom_ref);
        let expected = game.roms.len();
        let entry_name = normalize_relative(&rom.name);

        let Some(copier) = self.copiers.resolve(file, self.options.target_kind, expected) else {
            slice.failed.push(FailedCopy {
                source: file.display_path(),
                game: game.name.clone(),
                rom_name: rom.name.clone(),
                error: format!("no copier for {} to {}", file.container_kind, self.options.target_kind),
            });
            return (false, false);
        };

        let request = CopyRequest {
            file,
            target_folder: &self.options.target,
            target_kind: self.options.target_kind,
            game_name: &game.name,
            entry_name: &entry_name,
            expected_files: expected,
            allow_move,
        };
        match copier.copy(&request) {
            Ok(outcome) => {
                log::debug!(
                    "{} -> {} as {} ({})",
                    file.display_path(),
                    outcome.target.display(),
                    entry_name,
                    copier.name()
                );
                completion.insert(rom_ref.game, outcome.complete);
                slice.rebuilt.push(RebuiltFile {
                    source: file.display_path(),
                    game: game.name.clone(),
                    rom_name: rom.name.clone(),
                    target: outcome.target,
                    written: outcome.written,
                });
                (true, outcome.moved)
            }
            Err(e) => {
                log::warn!("Failed to rebuild {} into {}: {}", file.display_path(), game.name, e);
                slice.failed.push(FailedCopy {
                    source: file.display_path(),
                    game: game.name.clone(),
                    rom_name: rom.name.clone(),
                    error: e.to_string(),
                });
                (false, false)
            }
        }
    }

    /// Rebuild every matching file of the source folder into the target folder.
    pub fn rebuild(&self, db: &GameDatabase) -> Result<RebuildResults> {
        let discovery = discover_pool(&self.options.source, true)?;
        let files: Vec<FileInformation> = discovery
            .files
            .into_iter()
            .filter(|f| !f.container_path.starts_with(&self.options.target))
            .collect();

        let mut by_size: HashMap<u64, Vec<RomRef>> = HashMap::new();
        for rom_ref in db.rom_refs() {
            by_size.entry(db.rom(rom_ref).size).or_default().push(rom_ref);
        }

        let total = files.len();
        let mut results = RebuildResults::default();
        let mut completion: BTreeMap<GameId, bool> = BTreeMap::new();
        log::info!(
            "Rebuilding {} source files from {} into {}",
            total,
            self.options.source.display(),
            self.options.target.display()
        );

        for (done, mut file) in files.into_iter().enumerate() {
            let progress = percent(done, total);
            self.check_canceled(progress)?;

            let mut slice = RebuildResults::default();
            let candidates = by_size.get(&file.data_block_size).cloned().unwrap_or_default();

            if !candidates.is_empty() && self.needs_hash(&file, &candidates, db) {
                self.check_canceled(progress)?;
                self.sink.emit(RebuildEvent::status(
                    OperationStatus::Hashing,
                    progress,
                    Some(file.display_path()),
                ));
                let container = file.container_kind.container();
                if let Err(e) = container.calculate_checksums(&mut file, self.options.force_recompute) {
                    log::warn!("Could not hash {}: {}", file.display_path(), e);
                }
                self.check_canceled(progress)?;
            }

            let matches: Vec<RomRef> = candidates
                .into_iter()
                .filter(|r| {
                    does_checksum_match(
                        &db.rom(*r).checksums,
                        &file.reported_crc32,
                        &file.checksums,
                        self.options.use_reported_crc,
                    )
                })
                .collect();

            if matches.is_empty() {
                slice.unused.push(file);
            } else {
                let allow_move = self.options.remove_source && matches.len() == 1;
                let mut all_ok = true;
                let mut moved = false;
                for rom_ref in &matches {
                    let (ok, was_moved) =
                        self.copy_one(db, *rom_ref, &file, allow_move, &mut slice, &mut completion);
                    all_ok &= ok;
                    moved |= was_moved;
                }

                let container = file.container_kind.container();
                if self.options.remove_source && all_ok && !moved && container.exists(&file) {
                    match container.remove(&file) {
                        Ok(()) => slice.removed.push(file.display_path()),
                        Err(e) => log::warn!("Could not remove source {}: {}", file.display_path(), e),
                    }
                } else if moved {
                    slice.removed.push(file.display_path());
                }
            }

            self.sink.emit(RebuildEvent::with_results(
                OperationStatus::Rebuilding,
                percent(done + 1, total),
                slice.clone(),
            ));
            results.extend(slice);
        }

        if self.options.find_missing_cue_files {
            let slice = self.complete_cue_files(db, &mut completion)?;
            if !slice.is_empty() {
                self.sink
                    .emit(RebuildEvent::with_results(OperationStatus::Rebuilding, 100.0, slice.clone()));
            }
            results.extend(slice);
        }

        let slice = self.route_games(db, &completion);
        if !slice.is_empty() {
            self.sink
                .emit(RebuildEvent::with_results(OperationStatus::Rebuilding, 100.0, slice.clone()));
        }
        results.extend(slice);

        log::info!(
            "Rebuild finished: {} entries, {} unused, {} failed",
            results.rebuilt.len(),
            results.unused.len(),
            results.failed.len()
        );
        self.sink.emit(RebuildEvent::completed());
        Ok(results)
    }

    /// Find a cue sheet named like `rom` in the cue folders and hashing to it.
    fn find_cue(&self, rom: &RomFile) -> Option<FileInformation> {
        let wanted = Path::new(&normalize_relative(&rom.name))
            .file_name()?
            .to_string_lossy()
            .to_lowercase();

        for folder in &self.options.cue_folders {
            for entry in WalkDir::new(folder).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file()
                    || entry.file_name().to_string_lossy().to_lowercase() != wanted
                {
                    continue;
                }
                let (Some(parent), Ok(metadata)) = (entry.path().parent(), entry.metadata()) else {
                    continue;
                };
                let mut file = FileInformation::new(
                    parent,
                    ContainerKind::Folder,
                    entry.file_name().to_string_lossy(),
                    metadata.len(),
                );
                if let Err(e) = ContainerKind::Folder.container().calculate_checksums(&mut file, true) {
                    log::warn!("Could not hash {}: {}", file.display_path(), e);
                    continue;
                }
                if does_checksum_match(&rom.checksums, &[], &file.checksums, false) {
                    return Some(file);
                }
            }
        }
        None
    }

    /// Add missing cue sheets to targets that already hold every other rom of their game.
    fn complete_cue_files(
        &self,
        db: &GameDatabase,
        completion: &mut BTreeMap<GameId, bool>,
    ) -> Result<RebuildResults> {
        let mut slice = RebuildResults::default();
        let container = self.options.target_kind.container();

        for (index, game) in db.games().iter().enumerate() {
            self.check_canceled(100.0)?;
            if !game.roms.iter().any(is_cue) {
                continue;
            }
            let names = match container.entry_names(&self.target_of(game)) {
                Ok(names) if !names.is_empty() => names,
                _ => continue,
            };
            let has = |rom: &RomFile| names.contains(&normalize_relative(&rom.name));

            if !game.roms.iter().filter(|r| !is_cue(r)).all(has) {
                continue;
            }

            for (rom_index, rom) in game.roms.iter().enumerate() {
                if !is_cue(rom) || has(rom) {
                    continue;
                }
                let Some(file) = self.find_cue(rom) else {
                    log::debug!("No cue sheet found for {}/{}", game.name, rom.name);
                    continue;
                };
                let rom_ref = RomRef {
                    game: GameId(index),
                    rom: rom_index,
                };
                self.copy_one(db, rom_ref, &file, false, &mut slice, completion);
            }
        }
        Ok(slice)
    }

    /// Report completeness of every touched game, moving incomplete ones aside.
    fn route_games(&self, db: &GameDatabase, completion: &BTreeMap<GameId, bool>) -> RebuildResults {
        let mut slice = RebuildResults::default();

        for (&id, &complete) in completion {
            let game = db.game(id);
            let mut target = self.target_of(game);

            if !complete && let Some(incomplete) = &self.options.incomplete_target {
                let dest = self.options.target_kind.target_path(incomplete, &game.name);
                match move_container(&target, &dest) {
                    Ok(()) => target = dest,
                    Err(e) => log::warn!("Could not move incomplete {}: {}", target.display(), e),
                }
            }

            slice.games.push(GameCompletion {
                game: game.name.clone(),
                target,
                complete,
            });
        }
        slice
    }
}
