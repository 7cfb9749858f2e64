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

//! Archetype table (C3): column-major storage for every entity of one type,
//! plus the cached add/remove edges to neighbouring tables (C4 payload).

use rustc_hash::FxHashMap;

use crate::bitset::BitSet;
use crate::component::{ComponentId, ComponentRegistry};
use crate::entity::{EntityId, TableId, HI_COMPONENT_ID};
use crate::error::{EcsError, Result};
use crate::type_trie::{TypeHandle, TypeIds};

/// `{add, remove}` cached transition on a single component id. Absence means
/// "not yet computed", never "does not exist" (spec.md §3.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct Edge {
    pub add: Option<TableId>,
    pub remove: Option<TableId>,
}

/// Table-level flags, stored in a [`BitSet`] rather than individual bools so
/// a whole table's state is a single word in the common case.
#[derive(Debug, Clone, Copy)]
#[repr(usize)]
pub enum TableFlag {
    Staged = 0,
    IsPrefab = 1,
    HasPrefab = 2,
    HasBuiltins = 3,
}

/// Type-erased, byte-oriented column. A zero-sized column (`item_size == 0`)
/// represents a tag component: it tracks no bytes, only row count implicitly
/// via the table's `entities` length.
struct Column {
    data: Vec<u8>,
    item_size: usize,
    init: Option<crate::component::InitFn>,
    fini: Option<crate::component::FiniFn>,
    replace: Option<crate::component::ReplaceFn>,
    merge: Option<crate::component::MergeFn>,
}

impl Column {
    fn new(info: &crate::component::ComponentInfo) -> Self {
        Column {
            data: Vec::new(),
            item_size: info.size,
            init: info.hooks.init,
            fini: info.hooks.fini,
            replace: info.hooks.replace,
            merge: info.hooks.merge,
        }
    }

    fn is_tag(&self) -> bool {
        self.item_size == 0
    }

    fn len(&self) -> usize {
        if self.is_tag() {
            0
        } else {
            self.data.len() / self.item_size
        }
    }

    /// Append one zeroed row, running the component's `init` hook on it if
    /// registered (spec.md §4.3: "zero-initialise ... unless a
    /// component-specific init hook is registered").
    fn push_zeroed(&mut self) {
        if !self.is_tag() {
            self.data.resize(self.data.len() + self.item_size, 0);
            if let Some(init) = self.init {
                let row = self.len() as u32 - 1;
                unsafe { init(self.ptr_mut(row)) };
            }
        }
    }

    fn ptr(&self, row: u32) -> *const u8 {
        unsafe { self.data.as_ptr().add(row as usize * self.item_size) }
    }

    fn ptr_mut(&mut self, row: u32) -> *mut u8 {
        unsafe { self.data.as_mut_ptr().add(row as usize * self.item_size) }
    }

    fn bytes(&self, row: u32) -> &[u8] {
        if self.is_tag() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.ptr(row), self.item_size) }
        }
    }

    fn write_bytes(&mut self, row: u32, bytes: &[u8]) {
        if self.is_tag() {
            return;
        }
        debug_assert_eq!(bytes.len(), self.item_size);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr_mut(row), self.item_size);
        }
    }

    /// Overwrite `row` with `bytes`, running the `replace` hook instead of a
    /// raw memcpy when one is registered (spec.md §4.3's `set` contract).
    fn assign(&mut self, row: u32, bytes: &[u8]) {
        if self.is_tag() {
            return;
        }
        debug_assert_eq!(bytes.len(), self.item_size);
        match self.replace {
            Some(replace) => unsafe { replace(self.ptr_mut(row), bytes.as_ptr()) },
            None => self.write_bytes(row, bytes),
        }
    }

    /// Copy `src_row` of `src` into `row` of `self`, running `self`'s `merge`
    /// hook instead of a raw copy when the destination component registers
    /// one (spec.md §4.3's `move_row_to` contract for shared components).
    fn write_from(&mut self, row: u32, src: &Column, src_row: u32) {
        if self.is_tag() {
            return;
        }
        match self.merge {
            Some(merge) => unsafe { merge(self.ptr_mut(row), src.ptr(src_row)) },
            None => unsafe {
                std::ptr::copy_nonoverlapping(src.ptr(src_row), self.ptr_mut(row), self.item_size);
            },
        }
    }

    /// Invoke the component's `fini` hook (if any) on `row`'s current bytes.
    fn call_fini(&mut self, row: u32) {
        if let Some(fini) = self.fini {
            unsafe { fini(self.ptr_mut(row)) };
        }
    }

    /// Swap-remove `row`'s storage with the last row, without invoking any
    /// hook — used once the caller has already finalised or relocated the
    /// row's previous contents.
    fn swap_remove_raw(&mut self, row: u32) {
        if self.is_tag() {
            return;
        }
        let last = self.len() - 1;
        if row as usize != last {
            let (item_size, row, last) = (self.item_size, row as usize, last);
            let (head, tail) = self.data.split_at_mut(last * item_size);
            head[row * item_size..(row + 1) * item_size].copy_from_slice(&tail[..item_size]);
        }
        self.data.truncate(last * self.item_size);
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        if let Some(fini) = self.fini {
            for row in 0..self.len() as u32 {
                unsafe { fini(self.ptr_mut(row)) };
            }
        }
    }
}

/// A table holds every entity whose type is exactly `ids` (spec.md §3.4).
pub struct Table {
    pub handle: TypeHandle,
    pub ids: TypeIds,
    entities: Vec<EntityId>,
    columns: Vec<Column>,
    column_index: FxHashMap<ComponentId, usize>,
    lo_edges: Vec<Edge>,
    hi_edges: FxHashMap<ComponentId, Edge>,
    flags: BitSet,
    /// Depth of this table along a `Cascade` parent/child relationship
    /// (spec.md §6, `MatchedTable::depth`). Zero unless a caller above this
    /// core tags the table via [`Table::set_depth`] — this crate only
    /// carries the value and sorts by it, it does not derive it from any
    /// parent-component convention of its own.
    depth: u32,
}

impl Table {
    pub fn new(handle: TypeHandle, ids: TypeIds, registry: &ComponentRegistry) -> Result<Self> {
        let mut columns = Vec::with_capacity(ids.len());
        let mut column_index = FxHashMap::default();
        for &id in ids.iter() {
            let info = registry.get(id)?;
            column_index.insert(id, columns.len());
            columns.push(Column::new(info));
        }
        Ok(Table {
            handle,
            ids,
            entities: Vec::new(),
            columns,
            column_index,
            lo_edges: vec![Edge::default(); HI_COMPONENT_ID as usize],
            hi_edges: FxHashMap::default(),
            flags: BitSet::with_capacity(4),
            depth: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    pub fn has_component(&self, id: ComponentId) -> bool {
        self.column_index.contains_key(&id)
    }

    pub fn column_index(&self, id: ComponentId) -> Option<usize> {
        self.column_index.get(&id).copied()
    }

    pub fn flag(&self, flag: TableFlag) -> bool {
        self.flags.contains(flag as usize)
    }

    pub fn set_flag(&mut self, flag: TableFlag, value: bool) {
        if value {
            self.flags.set(flag as usize);
        } else {
            self.flags.clear(flag as usize);
        }
    }

    /// This table's cascade depth (spec.md §6 "depth (cascade order)").
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Tag this table's cascade depth. Left to a caller above this core
    /// (spec.md's Container/Cascade from-kinds walk a parent relationship
    /// this crate doesn't model); iteration only sorts by whatever value is
    /// set here.
    pub fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
    }

    pub fn edge(&self, c: ComponentId) -> Option<Edge> {
        if c.raw() < HI_COMPONENT_ID {
            self.lo_edges.get(c.raw() as usize).copied()
        } else {
            self.hi_edges.get(&c).copied()
        }
    }

    fn edge_mut(&mut self, c: ComponentId) -> &mut Edge {
        if c.raw() < HI_COMPONENT_ID {
            &mut self.lo_edges[c.raw() as usize]
        } else {
            self.hi_edges.entry(c).or_default()
        }
    }

    pub fn set_add_edge(&mut self, c: ComponentId, dest: TableId) {
        self.edge_mut(c).add = Some(dest);
    }

    pub fn set_remove_edge(&mut self, c: ComponentId, dest: TableId) {
        self.edge_mut(c).remove = Some(dest);
    }

    /// Append `entity`, zero-initialising every column and then running each
    /// column's `init` hook (if registered), returning its row.
    pub fn append_entity(&mut self, entity: EntityId) -> u32 {
        let row = self.entities.len() as u32;
        self.entities.push(entity);
        for column in &mut self.columns {
            column.push_zeroed();
        }
        row
    }

    pub fn get_component_raw(&self, component: ComponentId, row: u32) -> Option<&[u8]> {
        let idx = *self.column_index.get(&component)?;
        Some(self.columns[idx].bytes(row))
    }

    pub fn set_component_raw(&mut self, component: ComponentId, row: u32, bytes: &[u8]) -> Result<()> {
        let idx = *self
            .column_index
            .get(&component)
            .ok_or(EcsError::UnknownComponent { component: component.raw() })?;
        self.columns[idx].assign(row, bytes);
        Ok(())
    }

    /// Destroy the entity at `row`: runs every column's `fini` hook then
    /// swap-removes. Returns the entity now occupying `row`, if any, so the
    /// caller can repoint its index record.
    pub fn remove_entity(&mut self, row: u32) -> Option<EntityId> {
        for column in &mut self.columns {
            column.call_fini(row);
            column.swap_remove_raw(row);
        }
        self.entities.swap_remove(row as usize);
        self.entities.get(row as usize).copied()
    }

    /// Relocate the entity at `row` into `dest`, copying bytes for every
    /// component the two tables share. Components present only in `self`
    /// are finalised (dropped); components present only in `dest` are left
    /// zero-initialised for the caller to populate immediately after.
    ///
    /// Returns `(dest_row, swapped_entity)` where `swapped_entity` is the
    /// entity that now occupies `row` in `self`, if any.
    pub fn move_row_to(&mut self, dest: &mut Table, row: u32) -> (u32, Option<EntityId>) {
        let entity = self.entities[row as usize];
        let dest_row = dest.append_entity(entity);

        for (&id, &dest_idx) in dest.column_index.iter() {
            if let Some(&src_idx) = self.column_index.get(&id) {
                dest.columns[dest_idx].write_from(dest_row, &self.columns[src_idx], row);
            }
        }

        for (&id, &src_idx) in self.column_index.iter() {
            if !dest.column_index.contains_key(&id) {
                self.columns[src_idx].call_fini(row);
            }
        }

        for column in &mut self.columns {
            column.swap_remove_raw(row);
        }
        self.entities.swap_remove(row as usize);
        let swapped = self.entities.get(row as usize).copied();
        (dest_row, swapped)
    }

    /// Debug-only re-check of spec.md §3.4's invariants. No-op in release.
    pub fn debug_check_invariants(&self) {
        for column in &self.columns {
            if !column.is_tag() {
                crate::error::debug_invariant!(
                    column.len() == self.entities.len(),
                    "column length matches row count"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentInfo;

    fn registry_with(ids: &[(u64, usize)]) -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        for &(id, size) in ids {
            registry.register(
                ComponentId::from_raw(id),
                ComponentInfo::plain_data(size, 4),
            );
        }
        registry
    }

    #[test]
    fn append_and_set_component_roundtrips() {
        let registry = registry_with(&[(1, 4)]);
        let ids: TypeIds = [ComponentId::from_raw(1)].into_iter().collect();
        let mut table = Table::new(TypeHandle::EMPTY, ids, &registry).unwrap();
        let e = EntityId::from_raw(1 << 32 | 1);
        let row = table.append_entity(e);
        table
            .set_component_raw(ComponentId::from_raw(1), row, &42i32.to_ne_bytes())
            .unwrap();
        let bytes = table.get_component_raw(ComponentId::from_raw(1), row).unwrap();
        assert_eq!(i32::from_ne_bytes(bytes.try_into().unwrap()), 42);
    }

    #[test]
    fn remove_entity_swaps_last_row_in() {
        let registry = registry_with(&[(1, 4)]);
        let ids: TypeIds = [ComponentId::from_raw(1)].into_iter().collect();
        let mut table = Table::new(TypeHandle::EMPTY, ids, &registry).unwrap();
        let e1 = EntityId::from_raw(1);
        let e2 = EntityId::from_raw(2);
        table.append_entity(e1);
        table.append_entity(e2);
        let swapped = table.remove_entity(0);
        assert_eq!(swapped, Some(e2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn move_row_to_copies_shared_components_and_drops_removed_ones() {
        let registry = registry_with(&[(1, 4), (2, 4)]);
        let src_ids: TypeIds = [ComponentId::from_raw(1), ComponentId::from_raw(2)]
            .into_iter()
            .collect();
        let dest_ids: TypeIds = [ComponentId::from_raw(1)].into_iter().collect();
        let mut src = Table::new(TypeHandle::EMPTY, src_ids, &registry).unwrap();
        let mut dest = Table::new(TypeHandle::EMPTY, dest_ids, &registry).unwrap();

        let e = EntityId::from_raw(1);
        let row = src.append_entity(e);
        src.set_component_raw(ComponentId::from_raw(1), row, &7i32.to_ne_bytes())
            .unwrap();

        let (dest_row, swapped) = src.move_row_to(&mut dest, row);
        assert_eq!(swapped, None);
        assert_eq!(src.len(), 0);
        assert_eq!(dest.len(), 1);
        let bytes = dest.get_component_raw(ComponentId::from_raw(1), dest_row).unwrap();
        assert_eq!(i32::from_ne_bytes(bytes.try_into().unwrap()), 7);
    }

    unsafe fn init_sets_one(ptr: *mut u8) {
        std::ptr::copy_nonoverlapping(1i32.to_ne_bytes().as_ptr(), ptr, 4);
    }

    unsafe fn replace_adds_src_to_dst(dst: *mut u8, src: *const u8) {
        let mut dst_bytes = [0u8; 4];
        std::ptr::copy_nonoverlapping(dst, dst_bytes.as_mut_ptr(), 4);
        let mut src_bytes = [0u8; 4];
        std::ptr::copy_nonoverlapping(src, src_bytes.as_mut_ptr(), 4);
        let sum = i32::from_ne_bytes(dst_bytes) + i32::from_ne_bytes(src_bytes);
        std::ptr::copy_nonoverlapping(sum.to_ne_bytes().as_ptr(), dst, 4);
    }

    unsafe fn merge_takes_max(dst: *mut u8, src: *const u8) {
        let mut dst_bytes = [0u8; 4];
        std::ptr::copy_nonoverlapping(dst, dst_bytes.as_mut_ptr(), 4);
        let mut src_bytes = [0u8; 4];
        std::ptr::copy_nonoverlapping(src, src_bytes.as_mut_ptr(), 4);
        let max = i32::from_ne_bytes(dst_bytes).max(i32::from_ne_bytes(src_bytes));
        std::ptr::copy_nonoverlapping(max.to_ne_bytes().as_ptr(), dst, 4);
    }

    #[test]
    fn append_entity_runs_the_init_hook_instead_of_leaving_zero() {
        let mut registry = ComponentRegistry::new();
        registry.register(
            ComponentId::from_raw(1),
            crate::component::ComponentInfo {
                size: 4,
                align: 4,
                hooks: crate::component::ComponentHooks {
                    init: Some(init_sets_one),
                    ..Default::default()
                },
            },
        );
        let ids: TypeIds = [ComponentId::from_raw(1)].into_iter().collect();
        let mut table = Table::new(TypeHandle::EMPTY, ids, &registry).unwrap();
        let row = table.append_entity(EntityId::from_raw(1));
        let bytes = table.get_component_raw(ComponentId::from_raw(1), row).unwrap();
        assert_eq!(i32::from_ne_bytes(bytes.try_into().unwrap()), 1);
    }

    #[test]
    fn set_component_raw_runs_the_replace_hook_instead_of_a_raw_copy() {
        let mut registry = ComponentRegistry::new();
        registry.register(
            ComponentId::from_raw(1),
            crate::component::ComponentInfo {
                size: 4,
                align: 4,
                hooks: crate::component::ComponentHooks {
                    replace: Some(replace_adds_src_to_dst),
                    ..Default::default()
                },
            },
        );
        let ids: TypeIds = [ComponentId::from_raw(1)].into_iter().collect();
        let mut table = Table::new(TypeHandle::EMPTY, ids, &registry).unwrap();
        let row = table.append_entity(EntityId::from_raw(1));
        table
            .set_component_raw(ComponentId::from_raw(1), row, &10i32.to_ne_bytes())
            .unwrap();
        table
            .set_component_raw(ComponentId::from_raw(1), row, &5i32.to_ne_bytes())
            .unwrap();
        let bytes = table.get_component_raw(ComponentId::from_raw(1), row).unwrap();
        assert_eq!(i32::from_ne_bytes(bytes.try_into().unwrap()), 15);
    }

    #[test]
    fn move_row_to_runs_the_merge_hook_on_shared_components() {
        let mut registry = ComponentRegistry::new();
        registry.register(
            ComponentId::from_raw(1),
            crate::component::ComponentInfo {
                size: 4,
                align: 4,
                hooks: crate::component::ComponentHooks {
                    merge: Some(merge_takes_max),
                    ..Default::default()
                },
            },
        );
        let ids: TypeIds = [ComponentId::from_raw(1)].into_iter().collect();
        let mut src = Table::new(TypeHandle::EMPTY, ids.clone(), &registry).unwrap();
        let mut dest = Table::new(TypeHandle::EMPTY, ids, &registry).unwrap();

        let row = src.append_entity(EntityId::from_raw(1));
        src.set_component_raw(ComponentId::from_raw(1), row, &3i32.to_ne_bytes())
            .unwrap();
        let dest_row = dest.append_entity(EntityId::from_raw(2));
        dest.set_component_raw(ComponentId::from_raw(1), dest_row, &9i32.to_ne_bytes())
            .unwrap();
        dest.remove_entity(dest_row);

        let (dest_row, _) = src.move_row_to(&mut dest, row);
        // dest's freshly appended row starts at 0 (no init hook here), then
        // the merge hook combines it with src's 3 via max().
        let bytes = dest.get_component_raw(ComponentId::from_raw(1), dest_row).unwrap();
        assert_eq!(i32::from_ne_bytes(bytes.try_into().unwrap()), 3);
    }

    #[test]
    fn edges_default_to_absent() {
        let registry = registry_with(&[]);
        let table = Table::new(TypeHandle::EMPTY, TypeIds::new(), &registry).unwrap();
        let edge = table.edge(ComponentId::from_raw(5)).unwrap();
        assert!(edge.add.is_none());
        assert!(edge.remove.is_none());
    }

    #[test]
    fn set_add_edge_is_observable() {
        let registry = registry_with(&[]);
        let mut table = Table::new(TypeHandle::EMPTY, TypeIds::new(), &registry).unwrap();
        table.set_add_edge(ComponentId::from_raw(5), TableId(3));
        assert_eq!(table.edge(ComponentId::from_raw(5)).unwrap().add, Some(TableId(3)));
    }
}
