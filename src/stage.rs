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

//! Stage & merge (C6): mutation buffering during iteration, and the
//! deterministic fold of a stage's deltas back into the main world.
//!
//! Table creation itself is not deferred — resolving a destination type via
//! the type graph only touches trie/graph metadata, which is safe to do
//! immediately even mid-iteration. What *is* deferred is where an entity's
//! row data actually lives: a stage records, per touched entity, the table
//! its next read should see and the raw component bytes it wrote, and the
//! merge step is what actually moves bytes between tables in the main
//! world.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::archetype::Table;
use crate::component::ComponentId;
use crate::entity::{EntityId, EntityIndex, Record, TableId};
use crate::error::Result;
use crate::graph::TypeGraph;

/// Identifies a stage. 0 is reserved for the main stage, which never goes
/// through [`Stage`]/[`merge_stage`] itself — it *is* the destination merges
/// write into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageId(pub u32);

impl StageId {
    pub const MAIN: StageId = StageId(0);
    pub const TEMP: StageId = StageId(u32::MAX);
}

#[derive(Default)]
struct PendingEntity {
    dest_table: TableId,
    components: FxHashMap<ComponentId, Vec<u8>>,
    deleted: bool,
}

/// A mutation buffer attached to one worker thread (or the single-threaded
/// temp stage). Reads of an entity touched in this stage should consult
/// [`Stage::dest_table`] before falling back to the main index.
pub struct Stage {
    pub id: StageId,
    pending: FxHashMap<EntityId, PendingEntity>,
    new_entities: Vec<EntityId>,
}

impl Stage {
    pub fn new(id: StageId) -> Self {
        Stage {
            id,
            pending: FxHashMap::default(),
            new_entities: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Table an entity's next staged write should target, if this stage has
    /// already touched it.
    pub fn dest_table(&self, entity: EntityId) -> Option<TableId> {
        self.pending.get(&entity).map(|p| p.dest_table)
    }

    pub fn is_deleted(&self, entity: EntityId) -> bool {
        self.pending.get(&entity).map(|p| p.deleted).unwrap_or(false)
    }

    /// Mint a fresh id directly from the main index. Safe to do immediately
    /// (rather than staging it) because iteration holds the world mutex for
    /// its duration (spec.md §5); only row placement needs deferral.
    pub fn spawn(&mut self, main_index: &mut EntityIndex) -> Result<EntityId> {
        let id = main_index.create()?;
        self.new_entities.push(id);
        self.pending.insert(
            id,
            PendingEntity {
                dest_table: TableId::ROOT,
                components: FxHashMap::default(),
                deleted: false,
            },
        );
        Ok(id)
    }

    fn entry(&mut self, entity: EntityId, current_table: TableId) -> &mut PendingEntity {
        self.pending.entry(entity).or_insert_with(|| PendingEntity {
            dest_table: current_table,
            components: FxHashMap::default(),
            deleted: false,
        })
    }

    /// Record that `entity` should end up with `component` added, resolving
    /// the destination table via the shared type graph.
    pub fn record_add(
        &mut self,
        graph: &mut TypeGraph,
        trie: &mut crate::type_trie::TypeTrie,
        registry: &crate::component::ComponentRegistry,
        main_index: &EntityIndex,
        entity: EntityId,
        component: ComponentId,
    ) -> Result<()> {
        let current = self
            .dest_table(entity)
            .or_else(|| main_index.get(entity).map(|r| r.table))
            .unwrap_or(TableId::ROOT);
        let dest = graph.find_or_create_add(trie, registry, current, component)?;
        self.entry(entity, current).dest_table = dest;
        Ok(())
    }

    /// Symmetric to [`Self::record_add`].
    pub fn record_remove(
        &mut self,
        graph: &mut TypeGraph,
        trie: &mut crate::type_trie::TypeTrie,
        registry: &crate::component::ComponentRegistry,
        main_index: &EntityIndex,
        entity: EntityId,
        component: ComponentId,
    ) -> Result<()> {
        let current = self
            .dest_table(entity)
            .or_else(|| main_index.get(entity).map(|r| r.table))
            .unwrap_or(TableId::ROOT);
        let dest = graph.find_or_create_remove(trie, registry, current, component)?;
        let entry = self.entry(entity, current);
        entry.dest_table = dest;
        entry.components.remove(&component);
        Ok(())
    }

    /// Record the raw bytes `entity`'s `component` should hold once placed.
    pub fn record_set(&mut self, entity: EntityId, component: ComponentId, bytes: Vec<u8>) {
        let entry = self.pending.entry(entity).or_insert_with(|| PendingEntity {
            dest_table: TableId::ROOT,
            components: FxHashMap::default(),
            deleted: false,
        });
        entry.components.insert(component, bytes);
    }

    /// Mark `entity` for deletion at merge time (spec.md §4.6 tombstone).
    pub fn record_destroy(&mut self, entity: EntityId) {
        let entry = self.pending.entry(entity).or_insert_with(|| PendingEntity {
            dest_table: TableId::ROOT,
            components: FxHashMap::default(),
            deleted: false,
        });
        entry.deleted = true;
        entry.components.clear();
    }
}

/// Fold `stage`'s deltas into the main index and table graph. Callers must
/// invoke this for multiple stages in ascending [`StageId`] order to get a
/// reproducible final state (spec.md §4.6 "Determinism").
pub fn merge_stage(
    stage: &mut Stage,
    main_index: &mut EntityIndex,
    graph: &mut TypeGraph,
    dirty_tables: &mut FxHashSet<TableId>,
) -> Result<()> {
    for (entity, pending) in stage.pending.drain() {
        if pending.deleted {
            if let Some(record) = main_index.get(entity) {
                if let Some(row) = record.row() {
                    let swapped = graph.table_mut(record.table).remove_entity(row);
                    if let Some(swapped_id) = swapped {
                        if let Some(r) = main_index.get(swapped_id) {
                            main_index.set(swapped_id, Record::new(record.table, row, r.watched()))?;
                        }
                    }
                    dirty_tables.insert(record.table);
                }
            }
            let _ = main_index.remove(entity);
            continue;
        }

        let dest_table = pending.dest_table;
        let current = main_index.get(entity);

        let new_row = match current.and_then(|r| r.row().map(|row| (r.table, row))) {
            Some((old_table, old_row)) if old_table == dest_table => old_row,
            Some((old_table, old_row)) => {
                let (new_row, swapped) = graph.move_entity(old_table, dest_table, old_row);
                if let Some(swapped_id) = swapped {
                    if let Some(r) = main_index.get(swapped_id) {
                        main_index.set(swapped_id, Record::new(old_table, old_row, r.watched()))?;
                    }
                }
                dirty_tables.insert(old_table);
                dirty_tables.insert(dest_table);
                new_row
            }
            None => {
                let row = graph.table_mut(dest_table).append_entity(entity);
                dirty_tables.insert(dest_table);
                row
            }
        };

        let table = graph.table_mut(dest_table);
        for (component, bytes) in pending.components {
            if table.has_component(component) {
                table.set_component_raw(component, new_row, &bytes)?;
            }
        }

        let watched = current.map(|r| r.watched()).unwrap_or(false);
        main_index.set(entity, Record::new(dest_table, new_row, watched))?;
    }
    Ok(())
}

/// Graft a table created only inside a worker stage into the main table
/// arena, re-linking its edges against the shared graph. Stage creation in
/// this design resolves tables immediately through the shared
/// [`TypeGraph`] (see module docs), so in practice there is nothing left to
/// graft by the time merge runs; this exists as the documented hook for an
/// implementation that chooses to defer table creation as well.
pub fn graft_table(_graph: &mut TypeGraph, _table: Table) {}
