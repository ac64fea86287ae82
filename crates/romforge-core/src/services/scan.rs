use crate::checksum::does_checksum_match;
use crate::container::{discover_pool, sanitise_name};
use crate::error::{Result, RomError};
use crate::model::file_info::normalize_relative;
use crate::model::{FileInformation, GameDatabase, RomRef};
use crate::services::cancel::CancellationToken;
use crate::services::progress::{OperationStatus, ProgressSink, ScanEvent, percent};
use serde::Serialize;
use std::path::PathBuf;

/// Options controlling how a scan behaves
#[derive(Debug, Default, Clone)]
pub struct ScanOptions {
    /// Hash every size candidate again, even when checksums are known
    pub force_recompute: bool,
    /// Trust archive-reported CRC32 values when the rom has a CRC32
    pub use_reported_crc: bool,
}

/// A rom paired with the physical file that satisfies it
#[derive(Debug, Clone, Serialize)]
pub struct RomMatch {
    pub rom: RomRef,
    pub game: String,
    pub rom_name: String,
    pub file: FileInformation,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingRom {
    pub rom: RomRef,
    pub game: String,
    pub rom_name: String,
}

/// Scan outcome, or one incremental slice of it
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResults {
    pub matched: Vec<RomMatch>,
    pub wrong_named: Vec<RomMatch>,
    pub missing: Vec<MissingRom>,
    pub unused: Vec<FileInformation>,
}

impl ScanResults {
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty() && self.wrong_named.is_empty() && self.missing.is_empty() && self.unused.is_empty()
    }

    /// Append a slice reported by a progress event.
    pub fn extend(&mut self, slice: ScanResults) {
        self.matched.extend(slice.matched);
        self.wrong_named.extend(slice.wrong_named);
        self.missing.extend(slice.missing);
        self.unused.extend(slice.unused);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Available,
    /// Claimed by a wrong-named match; still a candidate for other roms
    UsedIncorrectly,
    /// Perfect match; no longer a candidate
    Consumed,
}

struct PoolEntry {
    file: FileInformation,
    state: PoolState,
    /// Hashed during this scan
    hashed: bool,
}

/// Gather the pool for a scan from online folders plus previously indexed files.
///
/// Unreadable containers are logged and left out.
pub fn collect_pool(folders: &[PathBuf], offline: Vec<FileInformation>) -> Result<Vec<FileInformation>> {
    let mut pool = Vec::new();
    for folder in folders {
        let discovery = discover_pool(folder, true)?;
        if !discovery.failures.is_empty() {
            log::warn!(
                "{} containers under {} could not be read",
                discovery.failures.len(),
                folder.display()
            );
        }
        pool.extend(discovery.files);
    }
    pool.extend(offline);
    Ok(pool)
}

/// Matches every rom of a database against a pool of physical files.
pub struct ScanEngine<S: ProgressSink<ScanEvent> = ()> {
    options: ScanOptions,
    sink: S,
    cancel: CancellationToken,
}

impl<S: ProgressSink<ScanEvent>> ScanEngine<S> {
    pub fn new(options: ScanOptions, sink: S) -> Self {
        Self {
            options,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn check_canceled(&self, percent: f64) -> Result<()> {
        if self.cancel.is_canceled() {
            self.sink.emit(ScanEvent::canceled(percent));
            return Err(RomError::Canceled);
        }
        Ok(())
    }

    fn needs_hash(&self, entry: &PoolEntry, rom_has_crc: bool) -> bool {
        if entry.hashed {
            return false;
        }
        if self.options.force_recompute {
            return true;
        }
        if self.options.use_reported_crc && rom_has_crc && !entry.file.reported_crc32.is_empty() {
            return false;
        }
        !entry.file.all_checksums_calculated()
    }

    /// Classify every rom of `db` against `pool`.
    ///
    /// Emits one event per classified rom carrying just that result, then
    /// the unused files, then a `Completed` sentinel. Returns the
    /// accumulated results.
    pub fn scan(&self, db: &GameDatabase, pool: Vec<FileInformation>) -> Result<ScanResults> {
        let mut pool: Vec<PoolEntry> = pool
            .into_iter()
            .map(|file| PoolEntry {
                file,
                state: PoolState::Available,
                hashed: false,
            })
            .collect();

        let total = db.rom_count();
        let mut results = ScanResults::default();
        log::info!("Scanning {} roms against {} files", total, pool.len());

        for (done, rom_ref) in db.rom_refs().enumerate() {
            let progress = percent(done, total);
            self.check_canceled(progress)?;

            let game = db.game(rom_ref.game);
            let rom = db.rom(rom_ref);
            let rom_has_crc = !rom.checksums.crc32.is_empty();

            let candidates: Vec<usize> = pool
                .iter()
                .enumerate()
                .filter(|(_, e)| e.state != PoolState::Consumed && e.file.data_block_size == rom.size)
                .map(|(i, _)| i)
                .collect();

            let mut matches = Vec::new();
            for index in candidates {
                if self.needs_hash(&pool[index], rom_has_crc) {
                    self.check_canceled(progress)?;
                    let entry = &mut pool[index];
                    self.sink.emit(ScanEvent::status(
                        OperationStatus::Hashing,
                        progress,
                        Some(entry.file.display_path()),
                    ));
                    let container = entry.file.container_kind.container();
                    if let Err(e) = container.calculate_checksums(&mut entry.file, self.options.force_recompute) {
                        log::warn!("Could not hash {}: {}", entry.file.display_path(), e);
                    }
                    entry.hashed = true;
                    self.check_canceled(progress)?;
                    self.sink.emit(ScanEvent::status(
                        OperationStatus::Scanning,
                        progress,
                        Some(entry.file.display_path()),
                    ));
                }

                let file = &pool[index].file;
                if does_checksum_match(
                    &rom.checksums,
                    &file.reported_crc32,
                    &file.checksums,
                    self.options.use_reported_crc,
                ) {
                    matches.push(index);
                }
            }

            let rom_name = normalize_relative(&rom.name);
            let container_name = sanitise_name(&game.name);
            let mut slice = ScanResults::default();
            let found = |index: usize| RomMatch {
                rom: rom_ref,
                game: game.name.clone(),
                rom_name: rom.name.clone(),
                file: pool[index].file.clone(),
            };

            let perfect = matches.iter().copied().find(|&i| {
                let file = &pool[i].file;
                file.container_name() == container_name && file.relative_path == rom_name
            });
            let same_container = matches
                .iter()
                .copied()
                .find(|&i| pool[i].file.container_name() == container_name);

            if matches.is_empty() {
                log::debug!("Missing {}/{}", game.name, rom.name);
                slice.missing.push(MissingRom {
                    rom: rom_ref,
                    game: game.name.clone(),
                    rom_name: rom.name.clone(),
                });
            } else if let Some(index) = perfect {
                slice.matched.push(found(index));
                pool[index].state = PoolState::Consumed;
            } else {
                let index = same_container.unwrap_or(matches[0]);
                log::debug!(
                    "{}/{} found as {}",
                    game.name,
                    rom.name,
                    pool[index].file.display_path()
                );
                slice.wrong_named.push(found(index));
                pool[index].state = PoolState::UsedIncorrectly;
            }

            self.sink.emit(ScanEvent::with_results(
                OperationStatus::Scanning,
                percent(done + 1, total),
                slice.clone(),
            ));
            results.extend(slice);
        }

        let unused = ScanResults {
            unused: pool
                .into_iter()
                .filter(|e| e.state == PoolState::Available)
                .map(|e| e.file)
                .collect(),
            ..ScanResults::default()
        };
        if !unused.unused.is_empty() {
            self.sink
                .emit(ScanEvent::with_results(OperationStatus::Scanning, 100.0, unused.clone()));
        }
        results.extend(unused);

        log::info!(
            "Scan finished: {} matched, {} wrong named, {} missing, {} unused",
            results.matched.len(),
            results.wrong_named.len(),
            results.missing.len(),
            results.unused.len()
        );
        self.sink.emit(ScanEvent::completed());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{Checksums, hash_reader};
    use crate::container::test_support::{write_file, write_zip};
    use crate::model::{Game, RomFile};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn content(size: usize, seed: u8) -> Vec<u8> {
        (0..size).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    fn crc_only(data: &[u8]) -> Checksums {
        let (full, _) = hash_reader(&mut &data[..], 0).unwrap();
        Checksums {
            crc32: full.crc32,
            ..Checksums::default()
        }
    }

    fn database(games: Vec<(&str, Vec<(&str, &[u8])>)>) -> GameDatabase {
        let mut db = GameDatabase::default();
        for (name, roms) in games {
            let mut game = Game::new(name);
            for (rom_name, data) in roms {
                game.roms
                    .push(RomFile::new(rom_name, data.len() as u64, crc_only(data)));
            }
            db.add_game(game).unwrap();
        }
        db
    }

    fn pool_of(root: &std::path::Path) -> Vec<FileInformation> {
        collect_pool(&[root.to_path_buf()], Vec::new()).unwrap()
    }

    #[test]
    fn test_file_in_wrong_container_is_wrong_named() {
        let dir = TempDir::new().unwrap();
        let data = content(3000, 7);
        write_file(&dir.path().join("wrongname/file1.bin"), &data);
        let db = database(vec![("game1", vec![("file1.bin", &data)])]);

        let results = ScanEngine::new(ScanOptions::default(), ())
            .scan(&db, pool_of(dir.path()))
            .unwrap();

        assert_eq!(results.wrong_named.len(), 1);
        assert_eq!(results.wrong_named[0].game, "game1");
        assert_eq!(results.wrong_named[0].rom_name, "file1.bin");
        assert_eq!(results.wrong_named[0].file.container_name(), "wrongname");
        assert!(results.missing.is_empty());
        assert!(results.unused.is_empty());
        assert!(results.matched.is_empty());
    }

    #[test]
    fn test_correctly_named_folder_matches() {
        let dir = TempDir::new().unwrap();
        let a = content(3000, 1);
        let b = content(1000, 2);
        write_file(&dir.path().join("game2/a.bin"), &a);
        write_file(&dir.path().join("game2/b.bin"), &b);
        let db = database(vec![("game2", vec![("a.bin", &a), ("b.bin", &b)])]);

        let results = ScanEngine::new(ScanOptions::default(), ())
            .scan(&db, pool_of(dir.path()))
            .unwrap();

        assert_eq!(results.matched.len(), 2);
        assert!(results.missing.is_empty());
        assert!(results.unused.is_empty());
        assert!(results.wrong_named.is_empty());
    }

    #[test]
    fn test_wrong_file_name_in_right_container() {
        let dir = TempDir::new().unwrap();
        let data = content(64, 3);
        write_zip(&dir.path().join("game3.zip"), &[("renamed.bin", &data)]);
        let db = database(vec![("game3", vec![("right.bin", &data)])]);

        let results = ScanEngine::new(ScanOptions::default(), ())
            .scan(&db, pool_of(dir.path()))
            .unwrap();

        assert_eq!(results.wrong_named.len(), 1);
        assert_eq!(results.wrong_named[0].file.relative_path, "renamed.bin");
    }

    #[test]
    fn test_game_name_with_reserved_characters_matches_sanitised_container() {
        let dir = TempDir::new().unwrap();
        let data = content(40, 8);
        write_zip(&dir.path().join("Foo_ Bar.zip"), &[("a.bin", &data)]);
        let db = database(vec![("Foo: Bar", vec![("a.bin", &data)])]);

        let results = ScanEngine::new(ScanOptions::default(), ())
            .scan(&db, pool_of(dir.path()))
            .unwrap();

        assert_eq!(results.matched.len(), 1);
        assert!(results.wrong_named.is_empty());
    }

    #[test]
    fn test_rom_named_like_an_archive_matches_in_folder() {
        let dir = TempDir::new().unwrap();
        let data = content(50, 4);
        write_file(&dir.path().join("g1/bonus.zip"), &data);
        let db = database(vec![("g1", vec![("bonus.zip", &data)])]);

        let results = ScanEngine::new(ScanOptions::default(), ())
            .scan(&db, pool_of(dir.path()))
            .unwrap();

        assert_eq!(results.matched.len(), 1);
        assert!(results.missing.is_empty());
    }

    #[test]
    fn test_missing_and_unused() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("junk/other.bin"), &content(10, 9));
        let db = database(vec![("game4", vec![("need.bin", &content(10, 4))])]);

        let results = ScanEngine::new(ScanOptions::default(), ())
            .scan(&db, pool_of(dir.path()))
            .unwrap();

        assert_eq!(results.missing.len(), 1);
        assert_eq!(results.unused.len(), 1);
        assert_eq!(results.unused[0].relative_path, "other.bin");
    }

    #[test]
    fn test_perfect_match_is_not_reused() {
        let dir = TempDir::new().unwrap();
        let data = content(32, 5);
        write_file(&dir.path().join("g/a.bin"), &data);
        let db = database(vec![("g", vec![("a.bin", &data)]), ("h", vec![("a.bin", &data)])]);

        let results = ScanEngine::new(ScanOptions::default(), ())
            .scan(&db, pool_of(dir.path()))
            .unwrap();

        assert_eq!(results.matched.len(), 1);
        assert_eq!(results.missing.len(), 1);
        assert_eq!(results.missing[0].game, "h");
    }

    #[test]
    fn test_scan_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let a = content(100, 1);
        write_file(&dir.path().join("g/a.bin"), &a);
        write_file(&dir.path().join("x/b.bin"), &content(100, 2));
        write_zip(&dir.path().join("h.zip"), &[("wrong.bin", &a)]);
        let db = database(vec![
            ("g", vec![("a.bin", &a)]),
            ("h", vec![("a.bin", &a)]),
            ("k", vec![("c.bin", &content(7, 3))]),
        ]);

        let summarize = |r: &ScanResults| {
            (
                r.matched.iter().map(|m| m.file.display_path()).collect::<Vec<_>>(),
                r.wrong_named.iter().map(|m| m.file.display_path()).collect::<Vec<_>>(),
                r.missing.iter().map(|m| m.rom).collect::<Vec<_>>(),
                r.unused.iter().map(|f| f.display_path()).collect::<Vec<_>>(),
            )
        };

        let engine = ScanEngine::new(ScanOptions::default(), ());
        let first = engine.scan(&db, pool_of(dir.path())).unwrap();
        let second = engine.scan(&db, pool_of(dir.path())).unwrap();
        assert_eq!(summarize(&first), summarize(&second));
        assert_eq!(first.matched.len(), 1);
        assert_eq!(first.wrong_named.len(), 1);
        assert_eq!(first.missing.len(), 1);
        assert_eq!(first.unused.len(), 1);
    }

    #[test]
    fn test_reported_crc_skips_hashing() {
        let dir = TempDir::new().unwrap();
        let data = content(48, 6);
        write_zip(&dir.path().join("z.zip"), &[("a.bin", &data)]);
        let db = database(vec![("z", vec![("a.bin", &data)])]);

        let options = ScanOptions {
            use_reported_crc: true,
            ..ScanOptions::default()
        };
        let results = ScanEngine::new(options, ()).scan(&db, pool_of(dir.path())).unwrap();
        assert_eq!(results.matched.len(), 1);
        assert!(results.matched[0].file.checksums.sha1.is_empty());
    }

    #[test]
    fn test_events_are_slices_ending_with_completed() {
        let dir = TempDir::new().unwrap();
        let a = content(20, 1);
        write_file(&dir.path().join("g/a.bin"), &a);
        let db = database(vec![("g", vec![("a.bin", &a), ("b.bin", &content(5, 2))])]);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let events = Arc::clone(&events);
            move |event: ScanEvent| events.lock().unwrap().push(event)
        };
        ScanEngine::new(ScanOptions::default(), sink)
            .scan(&db, pool_of(dir.path()))
            .unwrap();

        let events = events.lock().unwrap();
        let mut accumulated = ScanResults::default();
        for event in events.iter() {
            accumulated.extend(event.results.clone());
        }
        assert_eq!(accumulated.matched.len(), 1);
        assert_eq!(accumulated.missing.len(), 1);
        assert!(events.iter().any(|e| e.status == OperationStatus::Hashing));

        let last = events.last().unwrap();
        assert_eq!(last.status, OperationStatus::Completed);
        assert_eq!(last.percent, 100.0);
        assert!(last.results.is_empty());
    }

    #[test]
    fn test_cancellation_emits_terminal_event() {
        let dir = TempDir::new().unwrap();
        let a = content(20, 1);
        write_file(&dir.path().join("g/a.bin"), &a);
        let db = database(vec![("g", vec![("a.bin", &a)])]);

        let token = CancellationToken::new();
        token.cancel();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let statuses = Arc::clone(&statuses);
            move |event: ScanEvent| statuses.lock().unwrap().push(event.status)
        };
        let err = ScanEngine::new(ScanOptions::default(), sink)
            .with_cancellation(token)
            .scan(&db, pool_of(dir.path()))
            .unwrap_err();

        assert!(err.is_canceled());
        assert_eq!(*statuses.lock().unwrap(), vec![OperationStatus::Canceled]);
    }
}
