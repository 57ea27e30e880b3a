//! Checkpoint/rollback by opaque label.
//!
//! Only the in-memory strategy is mandated by the core; file-based strategies
//! belong to the wrapped codes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};

/// Storage strategy for `save`/`restore`/`forget`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointMethod {
    /// Keep snapshots in process memory.
    #[default]
    Memory,
}

/// Label-keyed snapshot store used by the in-memory strategy.
#[derive(Clone, Debug, Default)]
pub struct MemoryCheckpoints<S> {
    snapshots: BTreeMap<String, S>,
}

impl<S: Clone> MemoryCheckpoints<S> {
    pub fn new() -> Self {
        Self {
            snapshots: BTreeMap::new(),
        }
    }

    pub fn save(&mut self, label: &str, snapshot: S) {
        self.snapshots.insert(label.to_string(), snapshot);
    }

    pub fn restore(&self, label: &str) -> SolverResult<S> {
        self.snapshots
            .get(label)
            .cloned()
            .ok_or_else(|| SolverError::UnknownCheckpoint {
                label: label.to_string(),
            })
    }

    pub fn forget(&mut self, label: &str) -> SolverResult<()> {
        self.snapshots
            .remove(label)
            .map(|_| ())
            .ok_or_else(|| SolverError::UnknownCheckpoint {
                label: label.to_string(),
            })
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}
