//! Clone/parent transforms over a game database
//!
//! A database as distributed is usually "split": every game stands alone and
//! roms it shares with a parent carry a `merge` tag. The transforms here fold
//! clones into their parents (merged sets), strip inherited roms (split sets)
//! or copy inherited content into every clone (non-merged sets).

mod natural;

pub use natural::natural_cmp;

use crate::checksum::Checksums;
use crate::error::{Result, RomError};
use crate::model::{Game, GameDatabase, GameFamilyIndex, GameId, RomDisk, RomFile};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeMode {
    /// Each game keeps only the roms native to it
    #[default]
    Split,
    /// Each game carries every rom it needs, inherited ones included
    NonMerge,
    /// Clones fold into their parent
    Merge,
    /// Like `Merge`, with every clone rom stored under a folder named after the clone
    MergeCloneInChildFolder,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Split => "split",
            Self::NonMerge => "nonmerge",
            Self::Merge => "merge",
            Self::MergeCloneInChildFolder => "merge-child-folder",
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeMode {
    type Err = RomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "split" => Ok(Self::Split),
            "nonmerge" | "non-merge" | "nonmerged" => Ok(Self::NonMerge),
            "merge" | "merged" => Ok(Self::Merge),
            "merge-child-folder" | "merge-clone-in-child-folder" | "child-folder" => {
                Ok(Self::MergeCloneInChildFolder)
            }
            other => Err(RomError::malformed(format!("unrecognized merge mode '{}'", other))),
        }
    }
}

/// Apply `mode` to `db`, producing a new database. The input is untouched.
pub fn transform(db: &GameDatabase, mode: MergeMode) -> Result<GameDatabase> {
    let games = match mode {
        MergeMode::Split => split(db),
        MergeMode::NonMerge => non_merge(db),
        MergeMode::Merge => Merger::new(db).run(false),
        MergeMode::MergeCloneInChildFolder => Merger::new(db).run(true),
    };

    let mut out = GameDatabase::new(db.header.clone());
    for game in games {
        out.add_game(game)?;
    }
    log::info!(
        "{} transform: {} games in, {} games out",
        mode,
        db.game_count(),
        out.game_count()
    );
    Ok(out)
}

fn has_files(game: &Game) -> bool {
    !game.roms.is_empty() || !game.disks.is_empty()
}

fn split(db: &GameDatabase) -> Vec<Game> {
    db.games()
        .iter()
        .map(|game| {
            let mut out = game.without_files();
            out.roms = game.roms.iter().filter(|r| !r.is_inherited()).cloned().collect();
            out.disks = game.disks.iter().filter(|d| !d.is_inherited()).cloned().collect();
            out
        })
        .filter(has_files)
        .collect()
}

/// Lineage parent of a game: its clone-of target, else its rom-of target.
fn lineage_parent(game: &Game) -> Option<&str> {
    game.clone_of
        .as_deref()
        .filter(|p| !p.is_empty())
        .or_else(|| game.rom_of.as_deref().filter(|p| !p.is_empty()))
}

/// Checksums of the rom named `name` in the nearest ancestor declaring it.
fn inherited_checksums(
    db: &GameDatabase,
    family: &GameFamilyIndex,
    game: &Game,
    name: &str,
) -> Option<(u64, Checksums)> {
    let mut visited = HashSet::new();
    let mut current = lineage_parent(game);
    while let Some(parent_name) = current {
        if !visited.insert(parent_name) {
            break;
        }
        let parent = db.game(family.game(parent_name)?);
        if let Some(rom) = parent
            .roms
            .iter()
            .find(|r| r.name == name && r.checksums.any_known())
        {
            return Some((rom.size, rom.checksums.clone()));
        }
        current = lineage_parent(parent);
    }
    None
}

fn non_merge(db: &GameDatabase) -> Vec<Game> {
    let family = GameFamilyIndex::build(db);
    db.games()
        .iter()
        .map(|game| {
            let mut out = game.clone();
            for rom in &mut out.roms {
                if let Some(merge) = rom.merge.take().filter(|m| !m.is_empty())
                    && !rom.checksums.any_known()
                    && let Some((size, checksums)) = inherited_checksums(db, &family, game, &merge)
                {
                    rom.checksums = checksums;
                    if rom.size == 0 {
                        rom.size = size;
                    }
                }
            }
            for disk in &mut out.disks {
                disk.merge = None;
            }
            out
        })
        .filter(has_files)
        .collect()
}

/// A rom or disk accumulated under a root game, remembering which game declared it.
#[derive(Debug, Clone)]
struct Merged<T> {
    item: T,
    original_parent: String,
}

trait MergeItem: Clone {
    fn name(&self) -> &str;
    fn set_name(&mut self, name: String);
    fn is_inherited(&self) -> bool;
    fn content(&self) -> (u64, Checksums);
}

impl MergeItem for RomFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn is_inherited(&self) -> bool {
        RomFile::is_inherited(self)
    }

    fn content(&self) -> (u64, Checksums) {
        (self.size, self.checksums.clone())
    }
}

impl MergeItem for RomDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn is_inherited(&self) -> bool {
        RomDisk::is_inherited(self)
    }

    fn content(&self) -> (u64, Checksums) {
        (0, self.checksums())
    }
}

struct RootGame {
    /// Position of the root game in the input database
    origin: GameId,
    game: Game,
    roms: Vec<Merged<RomFile>>,
    disks: Vec<Merged<RomDisk>>,
}

struct Merger<'a> {
    db: &'a GameDatabase,
    family: GameFamilyIndex,
    /// Game name → index of the root it resolved into
    resolved: HashMap<String, Option<usize>>,
    in_progress: HashSet<String>,
    roots: Vec<RootGame>,
}

fn native<T: MergeItem>(items: &[T], owner: &str) -> Vec<Merged<T>> {
    items
        .iter()
        .filter(|i| !i.is_inherited())
        .map(|i| Merged {
            item: i.clone(),
            original_parent: owner.to_string(),
        })
        .collect()
}

impl<'a> Merger<'a> {
    fn new(db: &'a GameDatabase) -> Self {
        Self {
            db,
            family: GameFamilyIndex::build(db),
            resolved: HashMap::new(),
            in_progress: HashSet::new(),
            roots: Vec::new(),
        }
    }

    /// Parent this game folds into: its clone-of target, or a non-bios rom-of target.
    fn fold_target(&self, game: &Game) -> Option<GameId> {
        if let Some(parent) = game.clone_of.as_deref().filter(|p| !p.is_empty()) {
            return self.family.game(parent);
        }
        let parent = self.family.game(game.rom_of.as_deref().filter(|p| !p.is_empty())?)?;
        if self.db.game(parent).is_bios {
            None
        } else {
            Some(parent)
        }
    }

    fn resolve(&mut self, id: GameId) -> Option<usize> {
        let db = self.db;
        let game = db.game(id);
        if let Some(root) = self.resolved.get(&game.name) {
            return *root;
        }
        if !self.in_progress.insert(game.name.clone()) {
            log::warn!("Lineage cycle through '{}'", game.name);
            return None;
        }

        let parent_root = self.fold_target(game).and_then(|parent| self.resolve(parent));
        let root = match parent_root {
            Some(root) => {
                let target = &mut self.roots[root];
                target.roms.extend(native(&game.roms, &game.name));
                target.disks.extend(native(&game.disks, &game.name));
                root
            }
            None => {
                self.roots.push(RootGame {
                    origin: id,
                    game: game.without_files(),
                    roms: native(&game.roms, &game.name),
                    disks: native(&game.disks, &game.name),
                });
                self.roots.len() - 1
            }
        };

        self.in_progress.remove(&game.name);
        self.resolved.insert(game.name.clone(), Some(root));
        Some(root)
    }

    fn run(mut self, clone_in_child_folder: bool) -> Vec<Game> {
        for i in 0..self.db.game_count() {
            self.resolve(GameId(i));
        }

        let mut roots = std::mem::take(&mut self.roots);
        roots.sort_by_key(|r| r.origin);

        roots
            .into_iter()
            .map(|root| {
                let mut game = root.game;
                game.roms = dedup(&game.name, root.roms, clone_in_child_folder);
                game.disks = dedup(&game.name, root.disks, clone_in_child_folder);
                game
            })
            .filter(has_files)
            .collect()
    }
}

fn qualified<T: MergeItem>(merged: &Merged<T>, root: &str) -> String {
    if merged.original_parent == root {
        merged.item.name().to_string()
    } else {
        format!("{}/{}", merged.original_parent, merged.item.name())
    }
}

/// Drop duplicate entries of one root game and give survivors their final names.
fn dedup<T: MergeItem>(root: &str, items: Vec<Merged<T>>, clone_in_child_folder: bool) -> Vec<T> {
    let mut kept = vec![true; items.len()];
    let mut conflicting: HashSet<String> = HashSet::new();

    // Same name: identical content collapses, differing content is a conflict.
    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, merged) in items.iter().enumerate() {
        by_name.entry(merged.item.name()).or_default().push(i);
    }
    for (name, group) in &by_name {
        if group.len() < 2 {
            continue;
        }
        let first = items[group[0]].item.content();
        if group.iter().all(|&i| items[i].item.content() == first) {
            for &i in &group[1..] {
                kept[i] = false;
            }
        } else {
            conflicting.insert(name.to_string());
        }
    }

    // Same content under different names: keep one, preferring native then natural order.
    let mut by_content: HashMap<(u64, Checksums), Vec<usize>> = HashMap::new();
    for (i, merged) in items.iter().enumerate() {
        let content = merged.item.content();
        if kept[i] && content.1.any_known() {
            by_content.entry(content).or_default().push(i);
        }
    }
    for group in by_content.into_values() {
        if group.len() < 2 {
            continue;
        }
        let mut candidates = group;
        candidates.sort_by(|&a, &b| natural_cmp(&qualified(&items[a], root), &qualified(&items[b], root)));
        let survivor = candidates
            .iter()
            .copied()
            .find(|&i| !items[i].item.is_inherited())
            .unwrap_or(candidates[0]);
        for i in candidates {
            if i != survivor {
                kept[i] = false;
            }
        }
    }

    items
        .into_iter()
        .zip(kept)
        .filter(|(_, keep)| *keep)
        .map(|(merged, _)| {
            let from_clone = merged.original_parent != root;
            let needs_folder = clone_in_child_folder || conflicting.contains(merged.item.name());
            let name = if from_clone && needs_folder {
                Some(qualified(&merged, root))
            } else {
                None
            };
            let mut item = merged.item;
            if let Some(name) = name {
                item.set_name(name);
            }
            item
        })
        .collect()
}
