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

//! Type graph (C4): resolves and caches the add/remove transition between
//! tables for a single component id, generalizing the edges stored on each
//! [`crate::archetype::Table`].

use crate::archetype::Table;
use crate::component::{ComponentId, ComponentRegistry};
use crate::entity::TableId;
use crate::error::Result;
use crate::type_trie::TypeTrie;

/// Owns the table arena and resolves add/remove transitions, caching the
/// result on both endpoints so a repeated transition is O(1) (spec.md §4.4).
pub struct TypeGraph {
    tables: Vec<Table>,
}

impl TypeGraph {
    pub fn new(root: Table) -> Self {
        TypeGraph { tables: vec![root] }
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id.index()]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut Table {
        &mut self.tables[id.index()]
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableId, &Table)> {
        self.tables
            .iter()
            .enumerate()
            .map(|(i, t)| (TableId(i as u32), t))
    }

    /// Relocate the entity at `row` in `src` into `dest`. Used by the merge
    /// step, which needs two distinct tables borrowed simultaneously.
    pub fn move_entity(
        &mut self,
        src: TableId,
        dest: TableId,
        row: u32,
    ) -> (u32, Option<crate::entity::EntityId>) {
        debug_assert_ne!(src, dest);
        let (src_table, dest_table) = if src.index() < dest.index() {
            let (left, right) = self.tables.split_at_mut(dest.index());
            (&mut left[src.index()], &mut right[0])
        } else {
            let (left, right) = self.tables.split_at_mut(src.index());
            (&mut right[0], &mut left[dest.index()])
        };
        src_table.move_row_to(dest_table, row)
    }

    /// Resolve `S --add(c)--> D`, creating `D` and caching both directions
    /// if this is the first time this transition has been requested.
    ///
    /// Idempotence: if `c` is already present in `S`'s type, the add edge
    /// points back to `S` itself (spec.md §4.4 tie-break).
    pub fn find_or_create_add(
        &mut self,
        trie: &mut TypeTrie,
        registry: &ComponentRegistry,
        source: TableId,
        c: ComponentId,
    ) -> Result<TableId> {
        if let Some(edge) = self.tables[source.index()].edge(c) {
            if let Some(dest) = edge.add {
                return Ok(dest);
            }
        }

        if self.tables[source.index()].has_component(c) {
            self.tables[source.index()].set_add_edge(c, source);
            return Ok(source);
        }

        let dest_ids = trie.with_added(self.tables[source.index()].handle, c);
        let dest_handle = trie.intern(&dest_ids)?;
        let dest = self.get_or_create_table(dest_handle, dest_ids, registry)?;

        self.tables[source.index()].set_add_edge(c, dest);
        self.tables[dest.index()].set_remove_edge(c, source);
        Ok(dest)
    }

    /// Resolve `S --remove(c)--> D`, symmetric to [`Self::find_or_create_add`].
    /// Idempotence: if `c` is absent from `S`'s type, the remove edge points
    /// back to `S` itself.
    pub fn find_or_create_remove(
        &mut self,
        trie: &mut TypeTrie,
        registry: &ComponentRegistry,
        source: TableId,
        c: ComponentId,
    ) -> Result<TableId> {
        if let Some(edge) = self.tables[source.index()].edge(c) {
            if let Some(dest) = edge.remove {
                return Ok(dest);
            }
        }

        if !self.tables[source.index()].has_component(c) {
            self.tables[source.index()].set_remove_edge(c, source);
            return Ok(source);
        }

        let dest_ids = trie.with_removed(self.tables[source.index()].handle, c);
        let dest_handle = trie.intern(&dest_ids)?;
        let dest = self.get_or_create_table(dest_handle, dest_ids, registry)?;

        self.tables[source.index()].set_remove_edge(c, dest);
        self.tables[dest.index()].set_add_edge(c, source);
        Ok(dest)
    }

    /// Resolve the table for an arbitrary sorted component-id sequence,
    /// interning it into `trie` first. Used by snapshot restore, which needs
    /// to place rows by type rather than by walking a single add/remove
    /// edge from a known source table.
    pub fn table_for_type(
        &mut self,
        trie: &mut TypeTrie,
        registry: &ComponentRegistry,
        ids: crate::type_trie::TypeIds,
    ) -> Result<TableId> {
        let handle = trie.intern(&ids)?;
        self.get_or_create_table(handle, ids, registry)
    }

    fn get_or_create_table(
        &mut self,
        handle: crate::type_trie::TypeHandle,
        ids: crate::type_trie::TypeIds,
        registry: &ComponentRegistry,
    ) -> Result<TableId> {
        if let Some(existing) = self
            .tables
            .iter()
            .position(|t| t.handle == handle)
        {
            return Ok(TableId(existing as u32));
        }
        let table = Table::new(handle, ids, registry)?;
        let id = TableId(self.tables.len() as u32);
        self.tables.push(table);
        Ok(id)
    }
}
