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

//! Component registry and hook capability set.
//!
//! Unlike a typed ECS, components here are identified at runtime by an
//! [`EntityId`] rather than a `TypeId`: a component is itself an entity
//! (spec.md §3.1), and its byte layout plus optional lifecycle hooks are
//! recorded once in the [`ComponentRegistry`] when it is registered.
//! A component with no hooks gets raw-byte (memcpy) semantics.

use rustc_hash::FxHashMap;

use crate::entity::EntityId;
use crate::error::{EcsError, Result};

/// Components are named by the same id space as regular entities.
pub type ComponentId = EntityId;

/// Called once on a freshly allocated, zeroed slot before it is considered
/// initialized. Absent for plain-old-data components.
pub type InitFn = unsafe fn(*mut u8);
/// Called before a slot's storage is reclaimed (row removal, table drop).
pub type FiniFn = unsafe fn(*mut u8);
/// Called when a `set` overwrites an already-initialized slot, instead of a
/// raw memcpy — lets a component manage internal resources across overwrite.
pub type ReplaceFn = unsafe fn(dst: *mut u8, src: *const u8);
/// Called by the staging merge step when two stages both wrote the same
/// component for the same entity; combines `src` into `dst` instead of
/// letting the later stage silently clobber the earlier write.
pub type MergeFn = unsafe fn(dst: *mut u8, src: *const u8);

/// Optional lifecycle capability set for a component. Every field defaults
/// to `None`, which the table layer treats as "raw bytes, memcpy semantics".
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentHooks {
    pub init: Option<InitFn>,
    pub fini: Option<FiniFn>,
    pub replace: Option<ReplaceFn>,
    pub merge: Option<MergeFn>,
}

/// Layout and behaviour recorded for a registered component.
#[derive(Debug, Clone, Copy)]
pub struct ComponentInfo {
    pub size: usize,
    pub align: usize,
    pub hooks: ComponentHooks,
}

impl ComponentInfo {
    pub fn tag() -> Self {
        ComponentInfo {
            size: 0,
            align: 1,
            hooks: ComponentHooks::default(),
        }
    }

    pub fn plain_data(size: usize, align: usize) -> Self {
        ComponentInfo {
            size,
            align,
            hooks: ComponentHooks::default(),
        }
    }
}

/// Process-wide table of registered components, keyed by component id.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    infos: FxHashMap<ComponentId, ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: ComponentId, info: ComponentInfo) {
        self.infos.insert(id, info);
    }

    /// Register a Rust type `T` under `id`, deriving size/align from it and
    /// installing drop glue as the `fini` hook if `T` needs it. Multi-field
    /// hooks (`init`/`replace`/`merge`) are left unset; callers needing
    /// those provide a [`ComponentInfo`] directly via [`Self::register`].
    pub fn register_type<T: 'static>(&mut self, id: ComponentId) {
        let fini: Option<FiniFn> = if std::mem::needs_drop::<T>() {
            Some(drop_glue::<T>)
        } else {
            None
        };
        self.register(
            id,
            ComponentInfo {
                size: std::mem::size_of::<T>(),
                align: std::mem::align_of::<T>().max(1),
                hooks: ComponentHooks {
                    fini,
                    ..ComponentHooks::default()
                },
            },
        );
    }

    pub fn get(&self, id: ComponentId) -> Result<&ComponentInfo> {
        self.infos
            .get(&id)
            .ok_or(EcsError::UnknownComponent { component: id.raw() })
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.infos.contains_key(&id)
    }
}

unsafe fn drop_glue<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut T);
}
