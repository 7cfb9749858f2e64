// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Entity identifiers and the hybrid sparse-set/map entity index (C1).

use rustc_hash::FxHashMap;

use crate::error::{EcsError, Result};

/// Below this raw id value, an id is reserved for naming a component type
/// rather than a regular game entity. Ids are minted from the same counter
/// either way; this is purely a convention components rely on.
pub const HI_COMPONENT_ID: u64 = 256;

/// Ids whose index portion is below this value live in the index's dense
/// `lo` array; above it they fall back to the `hi` hash map.
pub const HI_ENTITY_ID: u32 = 100_000;

/// Upper bound on how many component columns a single table may carry.
pub const MAX_ENTITIES_IN_TYPE: usize = 256;

const WATCHED_BIT: u32 = 1 << 31;
const ROW_MASK: u32 = !WATCHED_BIT;
/// Sentinel meaning "no row" — an entity known to the index but not yet
/// (or no longer) placed in any table.
const ROW_NONE: u32 = ROW_MASK;

/// A stable handle to an entity: a dense `index` plus a `generation` that is
/// bumped every time `index` is recycled. Comparing the raw `u64` is enough
/// to detect a stale handle, since a recycled index always carries a higher
/// generation than anything that referenced it before removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

impl EntityId {
    /// Reserved "no entity" value: index 0, generation 0.
    pub const NONE: EntityId = EntityId(0);

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        EntityId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// True if this id's raw value is below [`HI_COMPONENT_ID`], i.e. it was
    /// minted early enough to serve as a component id.
    #[inline]
    pub fn is_component_id(self) -> bool {
        self.0 < HI_COMPONENT_ID
    }

    fn pack(index: u32, generation: u32) -> Self {
        EntityId(((generation as u64) << 32) | index as u64)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// Reference to a table plus the row an entity currently occupies within it.
/// The high bit of the packed row doubles as the "watched" flag (spec.md
/// §3.2): entities observed by a cascading query set this so structural
/// changes to them can be detected cheaply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub table: TableId,
    packed_row: u32,
}

impl Record {
    pub fn new(table: TableId, row: u32, watched: bool) -> Self {
        debug_assert!(row & WATCHED_BIT == 0, "row overflowed 31 bits");
        let mut packed_row = row;
        if watched {
            packed_row |= WATCHED_BIT;
        }
        Record { table, packed_row }
    }

    pub fn none() -> Self {
        Record {
            table: TableId::NONE,
            packed_row: ROW_NONE,
        }
    }

    #[inline]
    pub fn row(&self) -> Option<u32> {
        let row = self.packed_row & ROW_MASK;
        if row == ROW_NONE {
            None
        } else {
            Some(row)
        }
    }

    #[inline]
    pub fn watched(&self) -> bool {
        self.packed_row & WATCHED_BIT != 0
    }

    pub fn set_watched(&mut self, watched: bool) {
        if watched {
            self.packed_row |= WATCHED_BIT;
        } else {
            self.packed_row &= !WATCHED_BIT;
        }
    }

    pub fn set_row(&mut self, row: u32) {
        let watched = self.watched();
        *self = Record::new(self.table, row, watched);
    }

    pub fn set_table(&mut self, table: TableId, row: u32) {
        let watched = self.watched();
        *self = Record::new(table, row, watched);
    }
}

/// Arena index into the world's table list. Tables are never freed, so a
/// plain index (rather than a generational key) is sufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl TableId {
    pub const NONE: TableId = TableId(u32::MAX);
    pub const ROOT: TableId = TableId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy)]
enum SlotState {
    Free,
    Alive(Record),
    Tombstone,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    state: SlotState,
}

impl Slot {
    fn free() -> Self {
        Slot {
            generation: 0,
            state: SlotState::Free,
        }
    }
}

/// Limits governing id allocation for a given index instance. The defaults
/// match spec.md's reserved constants; tests that probe the `lo`/`hi`
/// boundary construct an index with tighter limits via
/// [`EntityIndex::with_limits`].
#[derive(Debug, Clone, Copy)]
pub struct EntityIndexLimits {
    pub hi_entity_id: u32,
    pub min_handle: u32,
    pub max_handle: u32,
}

impl Default for EntityIndexLimits {
    fn default() -> Self {
        EntityIndexLimits {
            hi_entity_id: HI_ENTITY_ID,
            min_handle: 1,
            max_handle: u32::MAX,
        }
    }
}

/// Result of iterating a tombstone-tracking index's contents, used by the
/// staging merge protocol to tell "still alive" from "deleted here" apart
/// from "never touched in this stage".
#[derive(Debug, Clone, Copy)]
pub enum DeltaEntry {
    Alive(EntityId, Record),
    Tombstone(EntityId),
}

/// Hybrid sparse-set / hash-map entity index (spec.md §4.1, component C1).
///
/// Ids whose index portion is below `limits.hi_entity_id` live in a dense
/// `Vec<Slot>` addressed directly by index (the common case, since entity
/// indices are handed out densely from a free list). Ids at or above that
/// threshold spill into `hi`, a hash map, so a handful of very large or
/// very sparse ids don't force the dense array to grow unboundedly.
pub struct EntityIndex {
    limits: EntityIndexLimits,
    lo: Vec<Slot>,
    hi: FxHashMap<u32, Slot>,
    free_lo: Vec<u32>,
    free_hi: Vec<u32>,
    next_index: u32,
    /// When true, `remove` leaves a tombstone behind instead of freeing the
    /// slot outright. Set on stage-local indices so the merge step can see
    /// which entities were deleted during iteration (spec.md §4.6).
    keep_deletes: bool,
}

impl EntityIndex {
    pub fn new() -> Self {
        Self::with_limits(EntityIndexLimits::default())
    }

    pub fn with_limits(limits: EntityIndexLimits) -> Self {
        EntityIndex {
            limits,
            lo: Vec::new(),
            hi: FxHashMap::default(),
            free_lo: Vec::new(),
            free_hi: Vec::new(),
            next_index: limits.min_handle.max(1),
            keep_deletes: false,
        }
    }

    /// Used for the per-stage shadow indices (spec.md §3.6): deletes made
    /// during iteration are recorded as tombstones rather than freeing the
    /// slot, so the merge step can tell "deleted here" from "untouched".
    pub fn with_tombstones(limits: EntityIndexLimits) -> Self {
        let mut index = Self::with_limits(limits);
        index.keep_deletes = true;
        index
    }

    fn is_lo(&self, index: u32) -> bool {
        index < self.limits.hi_entity_id
    }

    fn slot(&self, index: u32) -> Option<&Slot> {
        if self.is_lo(index) {
            self.lo.get(index as usize)
        } else {
            self.hi.get(&index)
        }
    }

    fn slot_mut_existing(&mut self, index: u32) -> Option<&mut Slot> {
        if self.is_lo(index) {
            self.lo.get_mut(index as usize)
        } else {
            self.hi.get_mut(&index)
        }
    }

    fn ensure_slot_mut(&mut self, index: u32) -> &mut Slot {
        if self.is_lo(index) {
            if self.lo.len() <= index as usize {
                self.lo.resize(index as usize + 1, Slot::free());
            }
            &mut self.lo[index as usize]
        } else {
            self.hi.entry(index).or_insert_with(Slot::free)
        }
    }

    /// Mint a fresh entity id, reusing a freed index when one is available.
    pub fn create(&mut self) -> Result<EntityId> {
        let index = if let Some(idx) = self.free_lo.pop().or_else(|| self.free_hi.pop()) {
            idx
        } else {
            let idx = self.next_index;
            if idx > self.limits.max_handle {
                return Err(EcsError::InvalidEntityRange { id: idx as u64 });
            }
            self.next_index += 1;
            idx
        };

        let generation = self.slot(index).map(|s| s.generation).unwrap_or(0);
        let slot = self.ensure_slot_mut(index);
        slot.generation = generation;
        slot.state = SlotState::Alive(Record::none());
        Ok(EntityId::pack(index, generation))
    }

    /// Resolve an id to its record, provided it is still alive.
    pub fn get(&self, id: EntityId) -> Option<Record> {
        if id.is_none() {
            return None;
        }
        let slot = self.slot(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        match slot.state {
            SlotState::Alive(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Look up `id`'s record, inserting an empty one at the same generation
    /// if the slot is currently free. Used when replaying an externally
    /// supplied id (snapshot restore, stage merge) rather than minting one.
    pub fn get_or_create(&mut self, id: EntityId) -> Result<&mut Record> {
        if id.is_none() {
            return Err(EcsError::InvalidEntity);
        }
        let index = id.index();
        if index > self.limits.max_handle {
            return Err(EcsError::InvalidEntityRange { id: id.raw() });
        }
        let slot = self.ensure_slot_mut(index);
        match slot.state {
            SlotState::Alive(_) if slot.generation == id.generation() => {}
            _ => {
                slot.generation = id.generation();
                slot.state = SlotState::Alive(Record::none());
            }
        }
        if self.next_index <= index {
            self.next_index = index + 1;
        }
        match &mut self.ensure_slot_mut(index).state {
            SlotState::Alive(record) => Ok(record),
            _ => unreachable!("just initialized to Alive"),
        }
    }

    pub fn set(&mut self, id: EntityId, record: Record) -> Result<()> {
        if !self.is_alive(id) {
            return Err(EcsError::InvalidEntity);
        }
        let slot = self
            .slot_mut_existing(id.index())
            .expect("is_alive implies slot exists");
        slot.state = SlotState::Alive(record);
        Ok(())
    }

    /// Remove `id`. If this index tracks tombstones, the slot is marked
    /// `Tombstone` instead of `Free` and its index is not recycled until the
    /// tombstone itself is cleared via [`EntityIndex::clear_tombstones`].
    pub fn remove(&mut self, id: EntityId) -> Result<()> {
        if !self.is_alive(id) {
            return Err(EcsError::InvalidEntity);
        }
        let index = id.index();
        let is_lo = self.is_lo(index);
        let slot = self
            .slot_mut_existing(index)
            .expect("is_alive implies slot exists");
        if self.keep_deletes {
            slot.state = SlotState::Tombstone;
        } else {
            slot.generation = slot.generation.wrapping_add(1);
            slot.state = SlotState::Free;
            if is_lo {
                self.free_lo.push(index);
            } else {
                self.free_hi.push(index);
            }
        }
        Ok(())
    }

    pub fn is_tombstoned(&self, id: EntityId) -> bool {
        match self.slot(id.index()) {
            Some(slot) if slot.generation == id.generation() => {
                matches!(slot.state, SlotState::Tombstone)
            }
            _ => false,
        }
    }

    /// Drop any tombstones, recycling their indices for reuse. Called after
    /// a stage's deltas have been folded into the main index.
    pub fn clear_tombstones(&mut self) {
        for (idx, slot) in self.lo.iter_mut().enumerate() {
            if matches!(slot.state, SlotState::Tombstone) {
                slot.generation = slot.generation.wrapping_add(1);
                slot.state = SlotState::Free;
                self.free_lo.push(idx as u32);
            }
        }
        let mut freed = Vec::new();
        for (idx, slot) in self.hi.iter_mut() {
            if matches!(slot.state, SlotState::Tombstone) {
                slot.generation = slot.generation.wrapping_add(1);
                slot.state = SlotState::Free;
                freed.push(*idx);
            }
        }
        self.free_hi.extend(freed);
    }

    /// Iterate every alive entry plus every tombstone, in index order within
    /// `lo` followed by an arbitrary order over `hi`.
    pub fn iterate_deltas(&self) -> impl Iterator<Item = DeltaEntry> + '_ {
        let lo_iter = self.lo.iter().enumerate().filter_map(|(idx, slot)| {
            let id = EntityId::pack(idx as u32, slot.generation);
            match slot.state {
                SlotState::Alive(record) => Some(DeltaEntry::Alive(id, record)),
                SlotState::Tombstone => Some(DeltaEntry::Tombstone(id)),
                SlotState::Free => None,
            }
        });
        let hi_iter = self.hi.iter().filter_map(|(idx, slot)| {
            let id = EntityId::pack(*idx, slot.generation);
            match slot.state {
                SlotState::Alive(record) => Some(DeltaEntry::Alive(id, record)),
                SlotState::Tombstone => Some(DeltaEntry::Tombstone(id)),
                SlotState::Free => None,
            }
        });
        lo_iter.chain(hi_iter)
    }

    /// Iterate only the entities currently alive.
    pub fn iterate(&self) -> impl Iterator<Item = (EntityId, Record)> + '_ {
        self.iterate_deltas().filter_map(|entry| match entry {
            DeltaEntry::Alive(id, record) => Some((id, record)),
            DeltaEntry::Tombstone(_) => None,
        })
    }
}

impl Default for EntityIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_lookup_roundtrips() {
        let mut index = EntityIndex::new();
        let id = index.create().unwrap();
        assert!(index.is_alive(id));
        assert_eq!(index.get(id).unwrap().row(), None);
    }

    #[test]
    fn remove_bumps_generation_and_invalidates_old_handle() {
        let mut index = EntityIndex::new();
        let id = index.create().unwrap();
        index.remove(id).unwrap();
        assert!(!index.is_alive(id));

        let reused = index.create().unwrap();
        assert_eq!(reused.index(), id.index());
        assert_ne!(reused.generation(), id.generation());
        assert!(!index.is_alive(id));
        assert!(index.is_alive(reused));
    }

    #[test]
    fn set_row_preserves_watched_bit() {
        let mut record = Record::new(TableId(3), 7, true);
        assert!(record.watched());
        assert_eq!(record.row(), Some(7));
        record.set_row(9);
        assert!(record.watched());
        assert_eq!(record.row(), Some(9));
    }

    #[test]
    fn tombstone_index_distinguishes_deleted_from_untouched() {
        let mut index = EntityIndex::with_tombstones(EntityIndexLimits::default());
        let id = index.create().unwrap();
        index.remove(id).unwrap();
        assert!(index.is_tombstoned(id));
        assert!(!index.is_alive(id));

        let deltas: Vec<_> = index.iterate_deltas().collect();
        assert!(matches!(deltas[0], DeltaEntry::Tombstone(found) if found == id));
    }

    #[test]
    fn lo_hi_boundary_routes_to_correct_storage() {
        let limits = EntityIndexLimits {
            hi_entity_id: 4,
            min_handle: 1,
            max_handle: u32::MAX,
        };
        let mut index = EntityIndex::with_limits(limits);
        let mut last = EntityId::NONE;
        for _ in 0..8 {
            last = index.create().unwrap();
        }
        assert!(last.index() >= 4);
        assert!(index.is_alive(last));
    }

    #[test]
    fn max_handle_exhaustion_is_reported() {
        let limits = EntityIndexLimits {
            hi_entity_id: HI_ENTITY_ID,
            min_handle: 1,
            max_handle: 1,
        };
        let mut index = EntityIndex::with_limits(limits);
        assert!(index.create().is_ok());
        assert!(index.create().is_err());
    }
}
