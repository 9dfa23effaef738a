//! Character inventory storage.
//!
//! An entry occupies exactly one `(character, slot, kind)` position. Writing a
//! new entry into an occupied position replaces the occupant.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{DeleteResult, RepositoryError};

/// One stack of items in a character's inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    /// Assigned by the repository on first insert.
    pub inventory_id: Option<i64>,
    /// Owning character.
    pub character_id: i64,
    /// Position inside the inventory tab.
    pub slot: i16,
    /// Inventory tab (equipment, main, etc.).
    pub kind: u8,
    /// Item template number.
    pub item_vnum: i16,
    /// Stack size.
    pub amount: u16,
}

impl InventoryEntry {
    /// A not yet persisted entry.
    pub fn new(character_id: i64, slot: i16, kind: u8, item_vnum: i16, amount: u16) -> Self {
        Self {
            inventory_id: None,
            character_id,
            slot,
            kind,
            item_vnum,
            amount,
        }
    }

    fn position(&self) -> Position {
        Position {
            character_id: self.character_id,
            slot: self.slot,
            kind: self.kind,
        }
    }
}

/// Inventory persistence contract.
pub trait InventoryRepository: Send + Sync {
    /// Entry with the given id.
    fn load_by_id(&self, inventory_id: i64) -> Option<InventoryEntry>;

    /// All entries of a character, ordered by kind then slot.
    fn load_by_character(&self, character_id: i64) -> Vec<InventoryEntry>;

    /// The entry at one position, if any.
    fn load_by_slot_and_kind(&self, character_id: i64, slot: i16, kind: u8)
    -> Option<InventoryEntry>;

    /// All entries of one inventory tab, ordered by slot.
    fn load_by_kind(&self, character_id: i64, kind: u8) -> Vec<InventoryEntry>;

    /// Insert a new entry (no id) or update an existing one (with id).
    ///
    /// A new entry replaces whatever occupies its position. An update fails
    /// with [`RepositoryError::NotFound`] for an unknown id and with
    /// [`RepositoryError::Conflict`] when it would move onto an occupied
    /// position.
    fn insert_or_update(&self, entry: InventoryEntry) -> Result<InventoryEntry, RepositoryError>;

    /// Write several entries in order, stopping at the first failure.
    fn insert_or_update_many(
        &self,
        entries: Vec<InventoryEntry>,
    ) -> Result<Vec<InventoryEntry>, RepositoryError> {
        entries
            .into_iter()
            .map(|entry| self.insert_or_update(entry))
            .collect()
    }

    /// Remove the entry at one position.
    fn delete_from_slot_and_kind(&self, character_id: i64, slot: i16, kind: u8) -> DeleteResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Position {
    character_id: i64,
    slot: i16,
    kind: u8,
}

/// [`InventoryRepository`] kept in memory.
#[derive(Debug)]
pub struct InMemoryInventory {
    by_position: DashMap<Position, InventoryEntry>,
    position_of: DashMap<i64, Position>,
    next_id: AtomicI64,
}

impl InMemoryInventory {
    /// Empty repository; ids start at 1.
    pub fn new() -> Self {
        Self {
            by_position: DashMap::new(),
            position_of: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.by_position.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.by_position.is_empty()
    }

    fn collect(&self, filter: impl Fn(&Position) -> bool) -> Vec<InventoryEntry> {
        let mut found: Vec<InventoryEntry> = self
            .by_position
            .iter()
            .filter(|e| filter(e.key()))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|e| (e.kind, e.slot));
        found
    }

    fn insert(&self, entry: InventoryEntry) -> InventoryEntry {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stored = InventoryEntry {
            inventory_id: Some(id),
            ..entry
        };
        let position = stored.position();

        if let Some(replaced) = self.by_position.insert(position, stored.clone())
            && let Some(old_id) = replaced.inventory_id
        {
            self.position_of.remove(&old_id);
            tracing::debug!(
                inventory_id = old_id,
                character_id = position.character_id,
                slot = position.slot,
                kind = position.kind,
                "inventory entry replaced"
            );
        }
        self.position_of.insert(id, position);
        stored
    }

    fn update(&self, id: i64, entry: InventoryEntry) -> Result<InventoryEntry, RepositoryError> {
        let old = self
            .position_of
            .get(&id)
            .map(|p| *p)
            .ok_or(RepositoryError::NotFound {
                entity: "inventory entry",
                id,
            })?;
        let new = entry.position();

        if new == old {
            self.by_position.insert(new, entry.clone());
            return Ok(entry);
        }

        match self.by_position.entry(new) {
            Entry::Occupied(occupant) => {
                return Err(RepositoryError::Conflict(format!(
                    "slot {} of kind {} for character {} is held by entry {:?}",
                    new.slot,
                    new.kind,
                    new.character_id,
                    occupant.get().inventory_id
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
            }
        }
        self.by_position.remove(&old);
        self.position_of.insert(id, new);
        Ok(entry)
    }
}

impl Default for InMemoryInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryRepository for InMemoryInventory {
    fn load_by_id(&self, inventory_id: i64) -> Option<InventoryEntry> {
        let position = *self.position_of.get(&inventory_id)?;
        self.by_position.get(&position).map(|e| e.value().clone())
    }

    fn load_by_character(&self, character_id: i64) -> Vec<InventoryEntry> {
        self.collect(|p| p.character_id == character_id)
    }

    fn load_by_slot_and_kind(
        &self,
        character_id: i64,
        slot: i16,
        kind: u8,
    ) -> Option<InventoryEntry> {
        let position = Position {
            character_id,
            slot,
            kind,
        };
        self.by_position.get(&position).map(|e| e.value().clone())
    }

    fn load_by_kind(&self, character_id: i64, kind: u8) -> Vec<InventoryEntry> {
        self.collect(|p| p.character_id == character_id && p.kind == kind)
    }

    fn insert_or_update(&self, entry: InventoryEntry) -> Result<InventoryEntry, RepositoryError> {
        match entry.inventory_id {
            None => Ok(self.insert(entry)),
            Some(id) => self.update(id, entry),
        }
    }

    fn delete_from_slot_and_kind(&self, character_id: i64, slot: i16, kind: u8) -> DeleteResult {
        let position = Position {
            character_id,
            slot,
            kind,
        };
        match self.by_position.remove(&position) {
            Some((_, removed)) => {
                if let Some(id) = removed.inventory_id {
                    self.position_of.remove(&id);
                }
                DeleteResult::Deleted
            }
            None => DeleteResult::NotFound,
        }
    }
}
