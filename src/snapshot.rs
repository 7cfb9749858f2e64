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

//! Persisted state (spec.md §6): a deep byte image of the main stage,
//! restricted by an optional component filter.

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// A single row's component payload, keyed by raw component id so the
/// snapshot format doesn't depend on any particular Rust type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentBytes {
    pub component: u64,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity: u64,
    pub components: Vec<ComponentBytes>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub type_ids: Vec<u64>,
    pub entities: Vec<EntitySnapshot>,
}

/// `{entity_index, tables, last_handle, filter}` as named by spec.md §6.
/// `entity_index` is implicit in which entities appear across `tables` plus
/// `last_handle`; there is no separate index payload since every alive
/// entity already carries its row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tables: Vec<TableSnapshot>,
    pub last_handle: u64,
    /// Raw ids the snapshot was restricted to when taken; empty means
    /// unfiltered.
    pub filter: Vec<u64>,
}

impl WorldSnapshot {
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(data: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn write_to_file(&self, path: impl AsRef<std::path::Path>) -> crate::error::Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }
}

pub fn entity_snapshot_id(entity: EntityId) -> u64 {
    entity.raw()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_structure() {
        let snapshot = WorldSnapshot {
            tables: vec![TableSnapshot {
                type_ids: vec![1, 2],
                entities: vec![EntitySnapshot {
                    entity: EntityId::from_raw(7).raw(),
                    components: vec![ComponentBytes {
                        component: 1,
                        bytes: vec![1, 2, 3, 4],
                    }],
                }],
            }],
            last_handle: 42,
            filter: vec![],
        };

        let json = snapshot.to_json().unwrap();
        let restored = WorldSnapshot::from_json(&json).unwrap();
        assert_eq!(restored.last_handle, 42);
        assert_eq!(restored.tables[0].entities[0].entity, 7);
        assert_eq!(restored.tables[0].entities[0].components[0].bytes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn file_round_trip_preserves_structure() {
        let snapshot = WorldSnapshot {
            tables: vec![],
            last_handle: 1,
            filter: vec![9],
        };
        let dir = std::env::temp_dir();
        let path = dir.join(format!("ecs_core_snapshot_test_{}.json", crate::utils::next_id()));
        snapshot.write_to_file(&path).unwrap();
        let restored = WorldSnapshot::read_from_file(&path).unwrap();
        assert_eq!(restored.filter, vec![9]);
        let _ = std::fs::remove_file(&path);
    }
}
