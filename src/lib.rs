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

//! ecs_core - Archetype-based ECS storage core.
//!
//! Entity index, type trie, archetype tables, type graph, table cache,
//! staged mutation/merge model, queries, a worker thread pool, and
//! snapshot persistence. System scheduling, a query-expression parser, and
//! a component derive macro are deliberately left to a layer above this
//! crate.

pub mod archetype;
pub mod bitset;
pub mod component;
pub mod entity;
pub mod error;
pub mod graph;
pub mod parallel;
pub mod prelude;
pub mod query;
pub mod snapshot;
pub mod stage;
pub mod table_cache;
pub mod type_trie;
pub mod utils;
pub mod world;

pub use component::{ComponentHooks, ComponentId, ComponentInfo, ComponentRegistry};
pub use entity::{EntityId, Record, TableId};
pub use error::{EcsError, Result};
pub use query::{QueryHandle, Signature, Term};
pub use snapshot::WorldSnapshot;
pub use stage::StageId;
pub use world::World;
