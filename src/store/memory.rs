//! In-process definition store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::DefinitionStore;
use crate::error::{RatekeeperError, Result};
use crate::limiter::{LimiterConfig, LimiterDefinition};

#[derive(Debug, Default)]
struct Rows {
    definitions: BTreeMap<String, (LimiterDefinition, bool)>,
    clock: i64,
    unavailable: bool,
}

/// A definition store kept in memory.
///
/// Stamps come from a private counter, so every write produces a distinct
/// `updated_at`. Useful for embedding and for exercising reconciliation.
#[derive(Debug, Default)]
pub struct MemoryDefinitionStore {
    rows: Mutex<Rows>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a definition; returns its new stamp.
    pub fn save_definition(&self, limiter_id: &str, config: LimiterConfig) -> i64 {
        let mut rows = self.rows.lock();
        rows.clock += 1;
        let stamp = rows.clock;
        rows.definitions.insert(
            limiter_id.to_string(),
            (LimiterDefinition::new(limiter_id, config, stamp), false),
        );
        stamp
    }

    /// Soft-delete a definition.
    pub fn mark_deleted(&self, limiter_id: &str) -> Result<()> {
        let mut rows = self.rows.lock();
        rows.clock += 1;
        let stamp = rows.clock;
        match rows.definitions.get_mut(limiter_id) {
            Some((definition, deleted)) if !*deleted => {
                definition.updated_at = stamp;
                *deleted = true;
                Ok(())
            }
            _ => Err(RatekeeperError::NotFound(limiter_id.to_string())),
        }
    }

    /// Make subsequent loads fail, as a broken backing store would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.rows.lock().unavailable = unavailable;
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn load_definitions(&self) -> Result<Vec<LimiterDefinition>> {
        let rows = self.rows.lock();
        if rows.unavailable {
            return Err(RatekeeperError::Unavailable("definition store".to_string()));
        }
        Ok(rows
            .definitions
            .values()
            .filter(|(_, deleted)| !deleted)
            .map(|(definition, _)| definition.clone())
            .collect())
    }
}
