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

//! Type trie (C2): interns sorted component-id sequences into shared handles
//! so that equal types compare equal by handle rather than by sequence.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::entity::{ComponentId, MAX_ENTITIES_IN_TYPE};
use crate::error::{EcsError, Result};

/// Inline capacity for a type's id sequence before it spills to the heap.
/// Most archetypes carry a handful of components; this avoids an allocation
/// for the common case.
pub type TypeIds = SmallVec<[ComponentId; 8]>;

/// A direct-indexed child slot fits up to this many ids above the parent's
/// maximum before falling back to the bucketed sparse map.
pub const MAX_CHILD_NODES: usize = 256;
/// Bucket count for the sparse child map.
pub const BUCKET_COUNT: usize = 256;

/// Handle to an interned type. Two equal sorted id sequences always yield
/// the same handle (trie injectivity, spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHandle(u32);

impl TypeHandle {
    pub const EMPTY: TypeHandle = TypeHandle(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

struct Node {
    ids: TypeIds,
    max_id: u64,
    children_dense: Vec<Option<TypeHandle>>,
    children_sparse: AHashMap<u64, TypeHandle>,
    /// Creation-order link, threading every interned node for linear scans.
    next_in_order: Option<TypeHandle>,
}

impl Node {
    fn empty_root() -> Self {
        Node {
            ids: TypeIds::new(),
            max_id: 0,
            children_dense: Vec::new(),
            children_sparse: AHashMap::new(),
            next_in_order: None,
        }
    }

    fn child(&self, c: ComponentId) -> Option<TypeHandle> {
        let c = c.raw();
        let offset = c.checked_sub(self.max_id);
        if let Some(offset) = offset {
            if (offset as usize) < MAX_CHILD_NODES {
                return self.children_dense.get(offset as usize).copied().flatten();
            }
        }
        self.children_sparse.get(&bucket_key(c)).copied()
    }

    fn set_child(&mut self, c: ComponentId, handle: TypeHandle) {
        let c = c.raw();
        let offset = c.checked_sub(self.max_id);
        if let Some(offset) = offset {
            if (offset as usize) < MAX_CHILD_NODES {
                let offset = offset as usize;
                if self.children_dense.len() <= offset {
                    self.children_dense.resize(offset + 1, None);
                }
                self.children_dense[offset] = Some(handle);
                return;
            }
        }
        self.children_sparse.insert(bucket_key(c), handle);
    }
}

/// Hashes a child id into one of `BUCKET_COUNT` buckets before it is used as
/// a key into the sparse map, spreading collisions the way spec.md's
/// `hash(T_child \ T_parent)` bucketing describes. The map itself is keyed
/// on the bucketed value plus id, via `AHashMap`'s own probing — the bucket
/// step only bounds how many distinct raw ids alias to the same slot.
fn bucket_key(raw_component_id: u64) -> u64 {
    raw_component_id % BUCKET_COUNT as u64
        | ((raw_component_id / BUCKET_COUNT as u64) << 32)
}

/// Interning structure for sorted component-id sequences (spec.md §4.2).
pub struct TypeTrie {
    nodes: Vec<Node>,
    handle_lookup: AHashMap<TypeIds, TypeHandle>,
    head: Option<TypeHandle>,
    tail: Option<TypeHandle>,
}

impl TypeTrie {
    pub fn new() -> Self {
        TypeTrie {
            nodes: vec![Node::empty_root()],
            handle_lookup: AHashMap::new(),
            head: Some(TypeHandle::EMPTY),
            tail: Some(TypeHandle::EMPTY),
        }
    }

    pub fn ids_of(&self, handle: TypeHandle) -> &[ComponentId] {
        &self.nodes[handle.index()].ids
    }

    /// Non-inserting lookup.
    pub fn handle_of(&self, sorted_ids: &[ComponentId]) -> Option<TypeHandle> {
        if sorted_ids.is_empty() {
            return Some(TypeHandle::EMPTY);
        }
        let mut node = TypeHandle::EMPTY;
        for &id in sorted_ids {
            node = self.nodes[node.index()].child(id)?;
        }
        Some(node)
    }

    /// Intern `sorted_ids`, walking or creating trie nodes one id at a time.
    /// O(|type|) amortised, since each step is either a dense-array index or
    /// a single hash-map probe.
    pub fn intern(&mut self, sorted_ids: &[ComponentId]) -> Result<TypeHandle> {
        if sorted_ids.len() > MAX_ENTITIES_IN_TYPE {
            return Err(EcsError::TypeTooLarge {
                attempted: sorted_ids.len(),
                max: MAX_ENTITIES_IN_TYPE,
            });
        }
        if sorted_ids.is_empty() {
            return Ok(TypeHandle::EMPTY);
        }
        if let Some(existing) = self.handle_lookup.get(&TypeIds::from_slice(sorted_ids)) {
            return Ok(*existing);
        }

        let mut current = TypeHandle::EMPTY;
        let mut built: TypeIds = TypeIds::new();
        for &id in sorted_ids {
            built.push(id);
            if let Some(next) = self.nodes[current.index()].child(id) {
                current = next;
                continue;
            }
            let max_id = self.nodes[current.index()].max_id.max(id.raw());
            let new_handle = TypeHandle(self.nodes.len() as u32);
            self.nodes.push(Node {
                ids: built.clone(),
                max_id,
                children_dense: Vec::new(),
                children_sparse: AHashMap::new(),
                next_in_order: None,
            });
            self.nodes[current.index()].set_child(id, new_handle);
            self.link_tail(new_handle);
            current = new_handle;
        }

        self.handle_lookup.insert(built, current);
        Ok(current)
    }

    fn link_tail(&mut self, handle: TypeHandle) {
        if let Some(tail) = self.tail {
            self.nodes[tail.index()].next_in_order = Some(handle);
        } else {
            self.head = Some(handle);
        }
        self.tail = Some(handle);
    }

    /// Linear scan over every interned type, in creation order.
    pub fn iter_in_order(&self) -> impl Iterator<Item = TypeHandle> + '_ {
        let mut next = self.head;
        std::iter::from_fn(move || {
            let current = next?;
            next = self.nodes[current.index()].next_in_order;
            Some(current)
        })
    }

    /// Compute the sorted id sequence for `handle` with `c` inserted,
    /// preserving ascending order with no duplicates.
    pub fn with_added(&self, handle: TypeHandle, c: ComponentId) -> TypeIds {
        let ids = self.ids_of(handle);
        let mut out = TypeIds::with_capacity(ids.len() + 1);
        let mut inserted = false;
        for &id in ids {
            if !inserted && id > c {
                out.push(c);
                inserted = true;
            }
            if id == c {
                inserted = true;
            }
            out.push(id);
        }
        if !inserted {
            out.push(c);
        }
        out
    }

    /// Compute the sorted id sequence for `handle` with `c` removed.
    pub fn with_removed(&self, handle: TypeHandle, c: ComponentId) -> TypeIds {
        self.ids_of(handle).iter().copied().filter(|&id| id != c).collect()
    }
}

impl Default for TypeTrie {
    fn default() -> Self {
        Self::new()
    }
}
