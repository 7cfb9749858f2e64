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

//! Table cache (C5): per-query partitioned index of matched tables, split
//! into non-empty and empty arrays with an O(1) table→index map so a table
//! can move between partitions without a linear scan.

use rustc_hash::FxHashMap;

use crate::entity::TableId;

struct Entry<P> {
    table: TableId,
    payload: P,
}

/// Partitioned cache of tables matching some query, generic over whatever
/// per-table payload the query layer wants to keep alongside the id
/// (matched column indices, depth, etc).
pub struct TableCache<P> {
    tables: Vec<Entry<P>>,
    empty_tables: Vec<Entry<P>>,
    /// Non-negative: index into `tables`. Negative: `-(index_in_empty + 1)`.
    index: FxHashMap<TableId, i64>,
}

impl<P> TableCache<P> {
    pub fn new() -> Self {
        TableCache {
            tables: Vec::new(),
            empty_tables: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    pub fn contains(&self, table: TableId) -> bool {
        self.index.contains_key(&table)
    }

    /// Non-empty tables currently matched, for query iteration.
    pub fn matched(&self) -> impl Iterator<Item = (TableId, &P)> {
        self.tables.iter().map(|e| (e.table, &e.payload))
    }

    pub fn matched_count(&self) -> usize {
        self.tables.len()
    }

    pub fn empty_count(&self) -> usize {
        self.empty_tables.len()
    }

    fn encode_empty(idx: usize) -> i64 {
        -(idx as i64 + 1)
    }

    fn decode_empty(stored: i64) -> usize {
        (-(stored + 1)) as usize
    }

    /// Insert `table`, appending to `empty_tables` if `is_empty`, else to
    /// `tables`. Returns a mutable reference to the stored payload.
    pub fn insert(&mut self, table: TableId, payload: P, is_empty: bool) -> &mut P {
        if is_empty {
            let idx = self.empty_tables.len();
            self.empty_tables.push(Entry { table, payload });
            self.index.insert(table, Self::encode_empty(idx));
            &mut self.empty_tables[idx].payload
        } else {
            let idx = self.tables.len();
            self.tables.push(Entry { table, payload });
            self.index.insert(table, idx as i64);
            &mut self.tables[idx].payload
        }
    }

    pub fn remove(&mut self, table: TableId) -> Option<P> {
        let stored = self.index.remove(&table)?;
        if stored >= 0 {
            let idx = stored as usize;
            let removed = self.tables.swap_remove(idx);
            if idx < self.tables.len() {
                let moved = self.tables[idx].table;
                self.index.insert(moved, idx as i64);
            }
            Some(removed.payload)
        } else {
            let idx = Self::decode_empty(stored);
            let removed = self.empty_tables.swap_remove(idx);
            if idx < self.empty_tables.len() {
                let moved = self.empty_tables[idx].table;
                self.index.insert(moved, Self::encode_empty(idx));
            }
            Some(removed.payload)
        }
    }

    /// Move `table`'s payload across partitions if it is not already in the
    /// one `empty` asks for. No-op otherwise.
    pub fn set_empty(&mut self, table: TableId, empty: bool) {
        let Some(&stored) = self.index.get(&table) else {
            return;
        };
        let currently_empty = stored < 0;
        if currently_empty == empty {
            return;
        }

        if currently_empty {
            let idx = Self::decode_empty(stored);
            let entry = self.empty_tables.swap_remove(idx);
            if idx < self.empty_tables.len() {
                let moved = self.empty_tables[idx].table;
                self.index.insert(moved, Self::encode_empty(idx));
            }
            let new_idx = self.tables.len();
            self.index.insert(entry.table, new_idx as i64);
            self.tables.push(entry);
        } else {
            let idx = stored as usize;
            let entry = self.tables.swap_remove(idx);
            if idx < self.tables.len() {
                let moved = self.tables[idx].table;
                self.index.insert(moved, idx as i64);
            }
            let new_idx = self.empty_tables.len();
            self.index.insert(entry.table, Self::encode_empty(new_idx));
            self.empty_tables.push(entry);
        }
    }
}

impl<P> Default for TableCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_empty_then_populate_moves_partition() {
        let mut cache: TableCache<()> = TableCache::new();
        let t = TableId(1);
        cache.insert(t, (), true);
        assert_eq!(cache.empty_count(), 1);
        assert_eq!(cache.matched_count(), 0);

        cache.set_empty(t, false);
        assert_eq!(cache.empty_count(), 0);
        assert_eq!(cache.matched_count(), 1);
    }

    #[test]
    fn set_empty_round_trip_preserves_payload() {
        let mut cache: TableCache<u32> = TableCache::new();
        let t = TableId(5);
        cache.insert(t, 99, true);
        cache.set_empty(t, false);
        assert_eq!(cache.matched().next().unwrap().1, &99);
        cache.set_empty(t, true);
        assert_eq!(cache.empty_count(), 1);
        assert_eq!(cache.matched_count(), 0);
    }

    #[test]
    fn remove_repairs_moved_index_entry() {
        let mut cache: TableCache<&'static str> = TableCache::new();
        let a = TableId(1);
        let b = TableId(2);
        let c = TableId(3);
        cache.insert(a, "a", false);
        cache.insert(b, "b", false);
        cache.insert(c, "c", false);

        // Removing the first element forces the last ("c") to move into its slot.
        let removed = cache.remove(a).unwrap();
        assert_eq!(removed, "a");
        assert_eq!(cache.matched_count(), 2);
        assert!(cache.contains(b));
        assert!(cache.contains(c));

        // Both remaining entries must still be independently removable,
        // which only holds if their index entries were repaired correctly.
        assert_eq!(cache.remove(c), Some("c"));
        assert_eq!(cache.remove(b), Some("b"));
        assert_eq!(cache.matched_count(), 0);
    }

    #[test]
    fn only_element_move_needs_no_repair() {
        let mut cache: TableCache<()> = TableCache::new();
        let t = TableId(1);
        cache.insert(t, (), false);
        cache.remove(t);
        assert_eq!(cache.matched_count(), 0);
        assert!(!cache.contains(t));
    }

    #[test]
    fn empty_and_nonempty_indices_never_collide() {
        let mut cache: TableCache<()> = TableCache::new();
        let a = TableId(1);
        let b = TableId(2);
        cache.insert(a, (), false);
        cache.insert(b, (), true);
        assert!(cache.contains(a));
        assert!(cache.contains(b));
        assert_eq!(cache.matched_count(), 1);
        assert_eq!(cache.empty_count(), 1);
    }
}
