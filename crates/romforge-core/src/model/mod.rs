//! In-memory game database model

pub mod details;
pub mod family;
pub mod file_info;

pub use details::{DetailKey, Details};
pub use family::GameFamilyIndex;
pub use file_info::FileInformation;

use crate::checksum::Checksums;
use crate::error::{Result, RomError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Index of a game inside its owning [`GameDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GameId(pub usize);

/// Location of a rom: its game and its position in that game's rom list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RomRef {
    pub game: GameId,
    pub rom: usize,
}

/// Free-text metadata describing a database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseHeader {
    pub name: String,
    pub description: String,
    pub category: String,
    pub version: String,
    pub date: String,
    pub author: String,
    pub email: String,
    pub homepage: String,
    pub url: String,
    pub comment: String,
    pub emulator_name: String,
    pub emulator_version: String,
}

/// Dump status of a rom or disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RomStatus {
    #[default]
    Good,
    BadDump,
    NoDump,
    Verified,
}

impl RomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::BadDump => "baddump",
            Self::NoDump => "nodump",
            Self::Verified => "verified",
        }
    }
}

impl fmt::Display for RomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RomStatus {
    type Err = RomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "good" => Ok(Self::Good),
            "baddump" => Ok(Self::BadDump),
            "nodump" => Ok(Self::NoDump),
            "verified" => Ok(Self::Verified),
            other => Err(RomError::malformed(format!("unrecognized rom status '{}'", other))),
        }
    }
}

/// A file expected inside a game's container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RomFile {
    /// Relative path inside the game container, `/` separated
    pub name: String,
    pub size: u64,
    pub checksums: Checksums,
    /// Name of the inherited rom in a parent game, if any
    pub merge: Option<String>,
    pub date: Option<String>,
    pub status: RomStatus,
}

impl RomFile {
    pub fn new(name: impl Into<String>, size: u64, checksums: Checksums) -> Self {
        Self {
            name: name.into(),
            size,
            checksums,
            ..Self::default()
        }
    }

    /// True when the rom is inherited from a parent rather than native to its game.
    pub fn is_inherited(&self) -> bool {
        self.merge.as_deref().is_some_and(|m| !m.is_empty())
    }
}

/// An optical disk image; only MD5 and SHA1 are tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RomDisk {
    pub name: String,
    pub md5: Vec<u8>,
    pub sha1: Vec<u8>,
    pub merge: Option<String>,
    pub status: RomStatus,
}

impl RomDisk {
    pub fn checksums(&self) -> Checksums {
        Checksums {
            md5: self.md5.clone(),
            sha1: self.sha1.clone(),
            ..Checksums::default()
        }
    }

    pub fn is_inherited(&self) -> bool {
        self.merge.as_deref().is_some_and(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RomSample {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RomArchive {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Release {
    pub name: String,
    pub region: String,
    pub language: String,
    pub date: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BiosSet {
    pub name: String,
    pub description: String,
    pub is_default: bool,
}

/// A game (set) and everything it owns.
///
/// Lineage fields name other games of the same database; they are resolved
/// by name lookup, never by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Game {
    pub name: String,
    pub description: String,
    pub year: String,
    pub manufacturer: String,
    pub is_bios: bool,
    /// The source DAT stated `isbios` explicitly, either way
    pub is_bios_declared: bool,
    pub rom_of: Option<String>,
    pub clone_of: Option<String>,
    pub sample_of: Option<String>,
    pub source_file: String,
    pub board: String,
    pub rebuild_to: String,
    pub comments: Vec<String>,
    pub details: Details,
    pub releases: Vec<Release>,
    pub bios_sets: Vec<BiosSet>,
    pub roms: Vec<RomFile>,
    pub disks: Vec<RomDisk>,
    pub samples: Vec<RomSample>,
    pub archives: Vec<RomArchive>,
}

impl Game {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Copy of the game without any roms or disks.
    pub fn without_files(&self) -> Self {
        Self {
            roms: Vec::new(),
            disks: Vec::new(),
            ..self.clone()
        }
    }
}

/// Root aggregate: header metadata plus an ordered list of uniquely named games.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GameDatabase {
    pub header: DatabaseHeader,
    games: Vec<Game>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
}

impl GameDatabase {
    pub fn new(header: DatabaseHeader) -> Self {
        Self {
            header,
            games: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Append a game, rejecting a name already present.
    pub fn add_game(&mut self, game: Game) -> Result<GameId> {
        if self.by_name.contains_key(&game.name) {
            return Err(RomError::malformed(format!("duplicate game name '{}'", game.name)));
        }
        let id = self.games.len();
        self.by_name.insert(game.name.clone(), id);
        self.games.push(game);
        Ok(GameId(id))
    }

    pub fn games(&self) -> &[Game] {
        &self.games
    }

    pub fn game(&self, id: GameId) -> &Game {
        &self.games[id.0]
    }

    pub fn rom(&self, rom: RomRef) -> &RomFile {
        &self.games[rom.game.0].roms[rom.rom]
    }

    pub fn find_game(&self, name: &str) -> Option<GameId> {
        self.by_name.get(name).copied().map(GameId)
    }

    pub fn game_count(&self) -> usize {
        self.games.len()
    }

    pub fn rom_count(&self) -> usize {
        self.games.iter().map(|g| g.roms.len()).sum()
    }

    /// Every rom of every game, in game then declaration order.
    pub fn rom_refs(&self) -> impl Iterator<Item = RomRef> + '_ {
        self.games.iter().enumerate().flat_map(|(gi, game)| {
            (0..game.roms.len()).map(move |ri| RomRef {
                game: GameId(gi),
                rom: ri,
            })
        })
    }

    /// Sort games by name, case-insensitive ordinal.
    ///
    /// Invalidates previously handed out [`GameId`]s.
    pub fn sort_by_name(&mut self) {
        self.games
            .sort_by(|a, b| a.name.to_uppercase().cmp(&b.name.to_uppercase()));
        self.by_name = self
            .games
            .iter()
            .enumerate()
            .map(|(i, g)| (g.name.clone(), i))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_game_name_rejected() {
        let mut db = GameDatabase::default();
        db.add_game(Game::new("pacman")).unwrap();
        let err = db.add_game(Game::new("pacman")).unwrap_err();
        assert!(matches!(err, RomError::MalformedDat(_)));
    }

    #[test]
    fn test_insertion_order_preserved_until_sorted() {
        let mut db = GameDatabase::default();
        db.add_game(Game::new("zaxxon")).unwrap();
        db.add_game(Game::new("Asteroids")).unwrap();
        db.add_game(Game::new("berzerk")).unwrap();

        let names: Vec<&str> = db.games().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["zaxxon", "Asteroids", "berzerk"]);

        db.sort_by_name();
        let names: Vec<&str> = db.games().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Asteroids", "berzerk", "zaxxon"]);
        assert_eq!(db.find_game("zaxxon"), Some(GameId(2)));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("BadDump".parse::<RomStatus>().unwrap(), RomStatus::BadDump);
        assert_eq!("".parse::<RomStatus>().unwrap(), RomStatus::Good);
        assert!("broken".parse::<RomStatus>().is_err());
    }

    #[test]
    fn test_merge_tag_marks_inherited() {
        let mut rom = RomFile::new("a.bin", 1, Checksums::default());
        assert!(!rom.is_inherited());
        rom.merge = Some(String::new());
        assert!(!rom.is_inherited());
        rom.merge = Some("a.bin".into());
        assert!(rom.is_inherited());
    }
}
