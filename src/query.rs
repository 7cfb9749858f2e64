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

//! Queries: a parsed [`Signature`] matched against tables, backed by a
//! [`TableCache`] so re-evaluation after a structural change only touches
//! the tables flagged dirty rather than the whole table arena.
//!
//! The signature-expression parser lives outside this crate (spec.md §1);
//! callers build a [`Signature`] directly from already-resolved component
//! ids and submit it to [`QueryRegistry::register`].

use smallvec::SmallVec;

use crate::archetype::Table;
use crate::component::ComponentId;
use crate::entity::TableId;
use crate::table_cache::TableCache;

/// Where a term's component should be looked up. `Owned`/`Shared` and the
/// `Container`/prefab-aware variants are accepted as input (so a caller
/// built against the full signature vocabulary compiles and runs) but this
/// core treats every variant other than `Not`/`Optional`/`Or` handling as an
/// ordinary own-row lookup: prefab inheritance and the `Container` parent
/// walk are out of scope for deep treatment here (spec.md GLOSSARY,
/// "Prefab"). `Cascade` is the one variant with real behaviour: a query
/// signature carrying a `Cascade` term is iterated in ascending
/// [`Table::depth`](crate::archetype::Table::depth) order, per spec.md §6
/// and §8 scenario 5. This core only sorts by that depth — deriving it from
/// an actual parent/child relationship is a caller concern (see
/// [`Table::set_depth`](crate::archetype::Table::set_depth)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FromKind {
    SelfKind,
    Owned,
    Shared,
    Container,
    System,
    Empty,
    Entity,
    Cascade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperKind {
    And,
    Or,
    Not,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InOutKind {
    InOut,
    In,
    Out,
}

/// One column of a signature.
#[derive(Debug, Clone, Copy)]
pub struct Term {
    pub from_kind: FromKind,
    pub oper_kind: OperKind,
    pub inout_kind: InOutKind,
    pub component: ComponentId,
}

impl Term {
    pub fn and(component: ComponentId) -> Self {
        Term {
            from_kind: FromKind::SelfKind,
            oper_kind: OperKind::And,
            inout_kind: InOutKind::InOut,
            component,
        }
    }

    pub fn not(component: ComponentId) -> Self {
        Term {
            from_kind: FromKind::SelfKind,
            oper_kind: OperKind::Not,
            inout_kind: InOutKind::In,
            component,
        }
    }

    pub fn optional(component: ComponentId) -> Self {
        Term {
            from_kind: FromKind::SelfKind,
            oper_kind: OperKind::Optional,
            inout_kind: InOutKind::InOut,
            component,
        }
    }

    pub fn or(component: ComponentId) -> Self {
        Term {
            from_kind: FromKind::SelfKind,
            oper_kind: OperKind::Or,
            inout_kind: InOutKind::In,
            component,
        }
    }
}

/// A fully resolved query signature: an ordered list of terms.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub terms: SmallVec<[Term; 8]>,
}

impl Signature {
    pub fn new(terms: impl Into<SmallVec<[Term; 8]>>) -> Self {
        Signature { terms: terms.into() }
    }

    /// True if any column is a `Cascade` term, meaning matched tables must
    /// be iterated in ascending depth order (spec.md §6, §8 scenario 5).
    pub fn is_cascading(&self) -> bool {
        self.terms.iter().any(|t| t.from_kind == FromKind::Cascade)
    }
}

/// Per-table match result cached by a query: for every signature column,
/// either the matched table's column index (non-negative) or `-1` when the
/// term is `Not`/unmatched-`Optional` — negative values that index into a
/// `references` array for non-self sources are not produced by this core's
/// simplified from-kind handling (see [`FromKind`]).
#[derive(Debug, Clone)]
pub struct MatchedTable {
    pub table: TableId,
    pub columns: SmallVec<[i32; 8]>,
    pub components: SmallVec<[ComponentId; 8]>,
    pub depth: u32,
}

/// Test `table` against `signature`, returning the per-column match result
/// or `None` if a required (`And`/all-`Or`) term is unsatisfied.
pub fn match_table(signature: &Signature, table: &Table) -> Option<MatchedTable> {
    let mut columns = SmallVec::<[i32; 8]>::new();
    let mut components = SmallVec::<[ComponentId; 8]>::new();
    let mut any_or_matched = false;
    let mut has_or_term = false;

    for term in &signature.terms {
        let col = table.column_index(term.component);
        match term.oper_kind {
            OperKind::And => {
                let idx = col?;
                columns.push(idx as i32);
            }
            OperKind::Not => {
                if col.is_some() {
                    return None;
                }
                columns.push(-1);
            }
            OperKind::Optional => {
                columns.push(col.map(|i| i as i32).unwrap_or(-1));
            }
            OperKind::Or => {
                has_or_term = true;
                if let Some(idx) = col {
                    any_or_matched = true;
                    columns.push(idx as i32);
                } else {
                    columns.push(-1);
                }
            }
        }
        components.push(term.component);
    }

    if has_or_term && !any_or_matched {
        return None;
    }

    Some(MatchedTable {
        table: TableId::NONE,
        columns,
        components,
        depth: table.depth(),
    })
}

/// Handle returned by [`QueryRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(pub u64);

struct Query {
    signature: Signature,
    cache: TableCache<MatchedTable>,
}

/// Owns every registered query's table cache and keeps them in sync with
/// structural changes via [`QueryRegistry::refresh_table`], which callers
/// invoke once per table recorded in `dirty_tables` after a merge.
#[derive(Default)]
pub struct QueryRegistry {
    queries: rustc_hash::FxHashMap<QueryHandle, Query>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, signature: Signature) -> QueryHandle {
        let handle = QueryHandle(crate::utils::next_id());
        self.queries.insert(
            handle,
            Query {
                signature,
                cache: TableCache::new(),
            },
        );
        handle
    }

    pub fn unregister(&mut self, handle: QueryHandle) {
        self.queries.remove(&handle);
    }

    /// Re-test `table` against every registered query, inserting, removing,
    /// or flipping its cache partition as membership changes.
    pub fn refresh_table(&mut self, table_id: TableId, table: &Table) {
        for query in self.queries.values_mut() {
            let matched = match_table(&query.signature, table)
                .map(|mut m| {
                    m.table = table_id;
                    m
                });
            let currently_cached = query.cache.contains(table_id);
            match (matched, currently_cached) {
                (Some(payload), false) => {
                    query.cache.insert(table_id, payload, table.is_empty());
                }
                (Some(payload), true) => {
                    query.cache.remove(table_id);
                    query.cache.insert(table_id, payload, table.is_empty());
                }
                (None, true) => {
                    query.cache.remove(table_id);
                }
                (None, false) => {}
            }
        }
    }

    /// Fan `f` out over every non-empty table currently matched by `handle`,
    /// one rayon task per table — the same `matched.par_iter().for_each(...)`
    /// shape the teacher uses in `query.rs`'s `ParQuery`/`par_for_each_chunk`
    /// over archetypes, adapted to this core's runtime-matched tables rather
    /// than a compile-time `Fetch`. Table order is unspecified, same as
    /// `par_iter` itself; callers needing `Cascade` ordering under
    /// parallelism should fall back to [`Self::iterate`].
    #[cfg(feature = "parallel")]
    pub fn par_iterate<F>(&self, handle: QueryHandle, f: F)
    where
        F: Fn(&MatchedTable) + Sync + Send,
    {
        use rayon::prelude::*;
        let Some(query) = self.queries.get(&handle) else {
            return;
        };
        let matched: Vec<&MatchedTable> = query.cache.matched().map(|(_, payload)| payload).collect();
        matched.par_iter().for_each(|m| f(m));
    }

    /// Iterate every non-empty table currently matched by `handle`. Queries
    /// whose signature carries a `Cascade` term are yielded in ascending
    /// depth order (spec.md §6, §8 scenario 5); other queries are yielded in
    /// the cache's own (unspecified) order.
    pub fn iterate(&self, handle: QueryHandle) -> Box<dyn Iterator<Item = &MatchedTable> + '_> {
        let Some(query) = self.queries.get(&handle) else {
            return Box::new(std::iter::empty());
        };
        if query.signature.is_cascading() {
            let mut matched: Vec<&MatchedTable> = query.cache.matched().map(|(_, payload)| payload).collect();
            matched.sort_by_key(|m| m.depth);
            Box::new(matched.into_iter())
        } else {
            Box::new(query.cache.matched().map(|(_, payload)| payload))
        }
    }
}
