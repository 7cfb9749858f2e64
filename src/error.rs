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

//! Error types for the storage core.

use std::fmt;

/// Core error type. Hand-rolled rather than derived: the taxonomy is small and
/// fixed, and callers match on specific kinds rather than treating this as an
/// opaque `anyhow`-style error.
#[derive(Debug, Clone)]
pub enum EcsError {
    /// Entity id is 0, not alive, or its record could not be resolved.
    InvalidEntity,

    /// Entity id falls outside `[min_handle, max_handle]` for the index it was
    /// looked up in.
    InvalidEntityRange { id: u64 },

    /// A type would exceed `MAX_ENTITIES_IN_TYPE` after the requested mutation.
    TypeTooLarge { attempted: usize, max: usize },

    /// Component id is not registered, or a byte payload doesn't match the
    /// registered size.
    UnknownComponent { component: u64 },

    /// A mutation targeted the main stage while iteration was in progress and no
    /// stage was supplied to route it through.
    StageViolation,

    /// An invariant was violated. Fatal in debug builds; production builds may
    /// treat the condition as undefined behaviour per spec, but this variant
    /// exists so tests can assert on the violation instead of aborting.
    Internal(&'static str),

    /// Snapshot I/O or (de)serialization failure.
    SnapshotError(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::InvalidEntity => write!(f, "invalid or dead entity"),
            EcsError::InvalidEntityRange { id } => {
                write!(f, "entity id {id} out of range for this index")
            }
            EcsError::TypeTooLarge { attempted, max } => {
                write!(f, "type would hold {attempted} components, max is {max}")
            }
            EcsError::UnknownComponent { component } => {
                write!(f, "component {component} is not registered")
            }
            EcsError::StageViolation => {
                write!(f, "mutation attempted on the main stage during iteration")
            }
            EcsError::Internal(what) => write!(f, "internal invariant violated: {what}"),
            EcsError::SnapshotError(msg) => write!(f, "snapshot error: {msg}"),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<std::io::Error> for EcsError {
    fn from(err: std::io::Error) -> Self {
        EcsError::SnapshotError(err.to_string())
    }
}

impl From<serde_json::Error> for EcsError {
    fn from(err: serde_json::Error) -> Self {
        EcsError::SnapshotError(err.to_string())
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EcsError>;

/// Panics in debug builds when `cond` is false, reporting the invariant name.
/// Compiles to nothing in release builds, matching spec.md §7's propagation
/// policy: invariant breaches are fatal in debug, undefined in release.
macro_rules! debug_invariant {
    ($cond:expr, $what:expr) => {
        debug_assert!($cond, "invariant violated: {}", $what);
    };
}

pub(crate) use debug_invariant;
