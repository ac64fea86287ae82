//! Name and lineage lookups over a database

use super::{GameDatabase, GameId};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct FamilyMaps {
    by_name: HashMap<String, GameId>,
    clones: HashMap<String, Vec<GameId>>,
    rom_of: HashMap<String, Vec<GameId>>,
}

/// name→game, cloneOf→children and romOf→children indexes for one database.
///
/// Each index owns its own lock; separate database views never contend.
#[derive(Debug, Default)]
pub struct GameFamilyIndex {
    maps: Mutex<FamilyMaps>,
}

impl GameFamilyIndex {
    pub fn build(db: &GameDatabase) -> Self {
        let mut maps = FamilyMaps::default();
        for (i, game) in db.games().iter().enumerate() {
            let id = GameId(i);
            maps.by_name.insert(game.name.clone(), id);
            if let Some(parent) = game.clone_of.as_deref().filter(|p| !p.is_empty()) {
                maps.clones.entry(parent.to_string()).or_default().push(id);
            }
            if let Some(parent) = game.rom_of.as_deref().filter(|p| !p.is_empty()) {
                maps.rom_of.entry(parent.to_string()).or_default().push(id);
            }
        }
        Self {
            maps: Mutex::new(maps),
        }
    }

    pub fn game(&self, name: &str) -> Option<GameId> {
        self.maps.lock().by_name.get(name).copied()
    }

    /// Games declaring `cloneof` = `parent`.
    pub fn clones_of(&self, parent: &str) -> Vec<GameId> {
        self.maps
            .lock()
            .clones
            .get(parent)
            .cloned()
            .unwrap_or_default()
    }

    /// Games declaring `romof` = `parent`.
    pub fn rom_of_children(&self, parent: &str) -> Vec<GameId> {
        self.maps
            .lock()
            .rom_of
            .get(parent)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop a game from the name index and from every child list.
    pub fn remove(&self, name: &str) -> Option<GameId> {
        let mut guard = self.maps.lock();
        let maps = &mut *guard;
        let id = maps.by_name.remove(name)?;
        for children in maps.clones.values_mut().chain(maps.rom_of.values_mut()) {
            children.retain(|c| *c != id);
        }
        maps.clones.remove(name);
        maps.rom_of.remove(name);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.maps.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
