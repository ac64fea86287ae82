use crate::container::ContainerKind;
use crate::error::{Result, RomError};
use crate::model::{DatabaseHeader, Game, GameDatabase, RomFile};
use crate::services::cancel::CancellationToken;
use crate::services::progress::{CreateEvent, OperationStatus, ProgressSink, percent};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Options for building a database from a folder of games
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub source: PathBuf,
    pub name: String,
    pub description: String,
    pub author: String,
}

/// Names of the games added by one step
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateResults {
    pub games: Vec<String>,
}

/// Builds a database describing what a folder already holds.
///
/// Every top-level subfolder is an uncompressed game and every top-level
/// `.zip`/`.7z` file a compressed one. Other loose files are ignored.
pub struct DatabaseCreator<S: ProgressSink<CreateEvent> = ()> {
    options: CreateOptions,
    sink: S,
    cancel: CancellationToken,
}

impl<S: ProgressSink<CreateEvent>> DatabaseCreator<S> {
    pub fn new(options: CreateOptions, sink: S) -> Result<Self> {
        if options.source.as_os_str().is_empty() || !options.source.is_dir() {
            return Err(RomError::invalid(format!(
                "source {} is not a directory",
                options.source.display()
            )));
        }
        Ok(Self {
            options,
            sink,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn check_canceled(&self, percent: f64) -> Result<()> {
        if self.cancel.is_canceled() {
            self.sink.emit(CreateEvent::canceled(percent));
            return Err(RomError::Canceled);
        }
        Ok(())
    }

    fn header(&self) -> DatabaseHeader {
        let fallback = self
            .options
            .source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = if self.options.name.is_empty() {
            fallback
        } else {
            self.options.name.clone()
        };
        DatabaseHeader {
            description: if self.options.description.is_empty() {
                name.clone()
            } else {
                self.options.description.clone()
            },
            name,
            author: self.options.author.clone(),
            date: Utc::now().format("%Y-%m-%d").to_string(),
            ..DatabaseHeader::default()
        }
    }

    /// Top-level game containers, sorted by path.
    fn game_containers(&self) -> Result<Vec<(PathBuf, ContainerKind)>> {
        let mut containers: Vec<(PathBuf, ContainerKind)> = fs::read_dir(&self.options.source)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter_map(|path| match ContainerKind::from_path(&path) {
                Some(kind) => Some((path, kind)),
                None => {
                    log::debug!("Ignoring loose file {}", path.display());
                    None
                }
            })
            .collect();
        containers.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(containers)
    }

    fn build_game(&self, path: &Path, kind: ContainerKind, progress: f64) -> Result<Option<Game>> {
        let container = kind.container();
        let files = match container.get_all_files(path, true) {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Skipping unreadable container {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        let name = if kind.is_archive() {
            path.file_stem()
        } else {
            path.file_name()
        };
        let mut game = Game::new(name.map(|n| n.to_string_lossy().to_string()).unwrap_or_default());
        game.description = game.name.clone();

        for mut file in files {
            self.check_canceled(progress)?;
            self.sink.emit(CreateEvent::status(
                OperationStatus::Hashing,
                progress,
                Some(file.display_path()),
            ));
            if let Err(e) = container.calculate_checksums(&mut file, false) {
                log::warn!("Could not hash {}: {}", file.display_path(), e);
                continue;
            }
            let mut rom = RomFile::new(file.relative_path.clone(), file.data_block_size, file.checksums);
            rom.date = file.modified.map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string());
            game.roms.push(rom);
        }

        Ok(Some(game))
    }

    /// Hash every game container of the source folder into a new database.
    pub fn create(&self) -> Result<GameDatabase> {
        let mut db = GameDatabase::new(self.header());
        let containers = self.game_containers()?;
        let total = containers.len();
        log::info!("Creating database from {} containers", total);

        for (done, (path, kind)) in containers.iter().enumerate() {
            let progress = percent(done, total);
            self.check_canceled(progress)?;

            let Some(game) = self.build_game(path, *kind, progress)? else {
                continue;
            };
            if game.roms.is_empty() {
                log::debug!("Skipping empty container {}", path.display());
                continue;
            }
            let name = game.name.clone();
            if let Err(e) = db.add_game(game) {
                log::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
            self.sink.emit(CreateEvent::with_results(
                OperationStatus::Creating,
                percent(done + 1, total),
                CreateResults { games: vec![name] },
            ));
        }

        log::info!("Created database with {} games and {} roms", db.game_count(), db.rom_count());
        self.sink.emit(CreateEvent::completed());
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::to_hex;
    use crate::container::test_support::{write_file, write_7z, write_zip};
    use tempfile::TempDir;

    #[test]
    fn test_creates_one_game_per_container() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("alpha/a.bin"), b"test content");
        write_file(&dir.path().join("alpha/disc/b.bin"), b"bb");
        write_zip(&dir.path().join("beta.zip"), &[("c.bin", b"ccc")]);
        write_7z(&dir.path().join("gamma.7z"), &[("d.bin", b"dddd")]);
        write_file(&dir.path().join("readme.txt"), b"ignored");

        let options = CreateOptions {
            source: dir.path().to_path_buf(),
            name: "My Set".into(),
            ..CreateOptions::default()
        };
        let db = DatabaseCreator::new(options, ()).unwrap().create().unwrap();

        let names: Vec<&str> = db.games().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        assert_eq!(db.header.name, "My Set");
        assert_eq!(db.header.description, "My Set");

        let alpha = db.game(db.find_game("alpha").unwrap());
        assert_eq!(alpha.roms.len(), 2);
        assert_eq!(alpha.roms[0].name, "a.bin");
        assert_eq!(alpha.roms[1].name, "disc/b.bin");
        assert_eq!(to_hex(&alpha.roms[0].checksums.crc32), "57f4675d");
        assert_eq!(alpha.roms[0].size, 12);
    }

    #[test]
    fn test_duplicate_container_names_keep_first() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("same/a.bin"), b"a");
        write_zip(&dir.path().join("same.zip"), &[("b.bin", b"b")]);

        let options = CreateOptions {
            source: dir.path().to_path_buf(),
            ..CreateOptions::default()
        };
        let db = DatabaseCreator::new(options, ()).unwrap().create().unwrap();
        assert_eq!(db.game_count(), 1);
    }

    #[test]
    fn test_missing_source_rejected() {
        let options = CreateOptions {
            source: PathBuf::from("/definitely/not/here"),
            ..CreateOptions::default()
        };
        assert!(DatabaseCreator::new(options, ()).is_err());
    }
}
