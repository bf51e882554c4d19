//! Persisted limiter definitions.
//!
//! The reconciler only ever calls [`DefinitionStore::load_definitions`]; the
//! concrete stores additionally offer writes for seeding and administration.

mod memory;
mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::limiter::LimiterDefinition;

pub use memory::MemoryDefinitionStore;
pub use sqlite::SqliteDefinitionStore;

/// Source of desired-state limiter definitions.
///
/// Implementations return only definitions that are not soft-deleted. Rows are
/// returned as stored; validation is left to the caller.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Load every live definition.
    async fn load_definitions(&self) -> Result<Vec<LimiterDefinition>>;
}
