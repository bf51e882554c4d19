//! Registry of running limiters.
//!
//! The registry is the only state shared across tasks by direct memory
//! access. It keeps two indices over the same set of actors: by display name
//! for client-facing CRUD, and by limiter id for reconciliation against the
//! definition store. Both indices live behind one lock so they never diverge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::error::{RatekeeperError, Result};
use crate::limiter::{Acquisition, LimiterConfig, LimiterHandle, TokenLimiter};

/// A running limiter as recorded by the registry.
#[derive(Debug, Clone)]
pub struct RegisteredLimiter {
    /// Name the limiter is reachable under
    pub name: String,
    /// Store key, present only for limiters started by reconciliation
    pub limiter_id: Option<String>,
    /// Store stamp of the definition this actor was started from
    pub updated_at: Option<i64>,
    /// Control handle of the actor
    pub handle: LimiterHandle,
}

/// Both lookup indices; always mutated together under the registry lock.
#[derive(Debug, Default)]
pub(crate) struct LimiterIndex {
    by_name: HashMap<String, Arc<RegisteredLimiter>>,
    by_id: HashMap<String, Arc<RegisteredLimiter>>,
}

impl LimiterIndex {
    pub(crate) fn get_by_id(&self, limiter_id: &str) -> Option<&Arc<RegisteredLimiter>> {
        self.by_id.get(limiter_id)
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.by_id.keys().cloned().collect()
    }

    /// Insert an entry under its name and, if it has one, its id.
    ///
    /// Returns whatever previously held either key. The caller is responsible
    /// for shutting those actors down.
    pub(crate) fn insert(&mut self, entry: RegisteredLimiter) -> Vec<Arc<RegisteredLimiter>> {
        let entry = Arc::new(entry);
        let mut displaced = Vec::new();

        if let Some(id) = &entry.limiter_id {
            if let Some(previous) = self.by_id.insert(id.clone(), entry.clone()) {
                self.unlink_name(&previous);
                displaced.push(previous);
            }
        }
        if let Some(previous) = self.by_name.insert(entry.name.clone(), entry.clone()) {
            if !displaced.iter().any(|d| Arc::ptr_eq(d, &previous)) {
                if let Some(id) = &previous.limiter_id {
                    self.by_id.remove(id);
                }
                displaced.push(previous);
            }
        }
        displaced
    }

    /// Remove an entry from both indices.
    pub(crate) fn remove(&mut self, entry: &Arc<RegisteredLimiter>) {
        self.unlink_name(entry);
        if let Some(id) = &entry.limiter_id {
            if self.by_id.get(id).is_some_and(|e| Arc::ptr_eq(e, entry)) {
                self.by_id.remove(id);
            }
        }
    }

    fn unlink_name(&mut self, entry: &Arc<RegisteredLimiter>) {
        if self.by_name.get(&entry.name).is_some_and(|e| Arc::ptr_eq(e, entry)) {
            self.by_name.remove(&entry.name);
        }
    }
}

/// Thread-safe registry of limiters, shared by the HTTP layer and the reconciler.
#[derive(Debug, Default)]
pub struct LimiterRegistry {
    index: RwLock<LimiterIndex>,
}

impl LimiterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a limiter for `config` and register it under its name.
    ///
    /// The existence check and the insertion happen under one exclusive lock,
    /// so two concurrent creates of the same name cannot both succeed.
    pub fn create(&self, config: LimiterConfig) -> Result<LimiterHandle> {
        let limiter = TokenLimiter::new(config)?;
        let name = limiter.name().to_string();

        let mut index = self.index.write();
        if index.by_name.contains_key(&name) {
            return Err(RatekeeperError::Conflict(name));
        }

        let handle = limiter.start();
        index.insert(RegisteredLimiter {
            name: name.clone(),
            limiter_id: None,
            updated_at: None,
            handle: handle.clone(),
        });
        info!(limiter = %name, "Limiter created");
        Ok(handle)
    }

    /// Current configuration of the named limiter.
    ///
    /// The round trip to the actor happens after the map lock is released.
    pub async fn get(&self, name: &str) -> Result<LimiterConfig> {
        let handle = self.handle(name)?;
        handle.query_config().await
    }

    /// Queue a reconfiguration of the limiter named in `config`.
    ///
    /// Returns once the update is accepted; the actor applies it as its next event.
    pub fn update(&self, config: LimiterConfig) -> Result<()> {
        config.validate()?;
        let handle = self.handle(&config.name)?;
        debug!(limiter = %config.name, "Limiter update requested");
        handle.request_update(config)
    }

    /// Remove the named limiter and shut it down.
    ///
    /// Removal and the shutdown signal happen under the same exclusive lock, so
    /// no caller can reach the actor after its shutdown was queued.
    pub fn delete(&self, name: &str) -> Result<()> {
        let mut index = self.index.write();
        let entry = index
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| RatekeeperError::NotFound(name.to_string()))?;

        index.remove(&entry);
        shut_down(&entry);
        info!(limiter = %name, "Limiter deleted");
        Ok(())
    }

    /// Wait up to `budget` for a token from the named limiter.
    pub async fn acquire_token(&self, name: &str, budget: Duration) -> Result<Acquisition> {
        let handle = self.handle(name)?;
        handle.acquire(budget).await
    }

    /// Handle of the limiter registered under `name`.
    pub fn handle(&self, name: &str) -> Result<LimiterHandle> {
        self.index
            .read()
            .by_name
            .get(name)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| RatekeeperError::NotFound(name.to_string()))
    }

    /// Registry record of the limiter started from store definition `limiter_id`.
    pub fn lookup_id(&self, limiter_id: &str) -> Result<RegisteredLimiter> {
        self.index
            .read()
            .by_id
            .get(limiter_id)
            .map(|entry| entry.as_ref().clone())
            .ok_or_else(|| RatekeeperError::NotFound(limiter_id.to_string()))
    }

    /// Names of all registered limiters.
    pub fn names(&self) -> Vec<String> {
        self.index.read().by_name.keys().cloned().collect()
    }

    /// Number of registered limiters.
    pub fn len(&self) -> usize {
        self.index.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut down every registered limiter and clear the registry.
    pub fn shutdown_all(&self) {
        let mut index = self.index.write();
        let entries: Vec<_> = index.by_name.drain().map(|(_, entry)| entry).collect();
        index.by_id.clear();
        for entry in &entries {
            shut_down(entry);
        }
        info!(count = entries.len(), "All limiters shut down");
    }

    /// Exclusive access to both indices for a reconciliation pass.
    pub(crate) fn write_index(&self) -> RwLockWriteGuard<'_, LimiterIndex> {
        self.index.write()
    }
}

pub(crate) fn shut_down(entry: &RegisteredLimiter) {
    if let Err(e) = entry.handle.shutdown() {
        // Only possible if the actor already exited on its own.
        warn!(limiter = %entry.name, error = %e, "Limiter was not running at shutdown");
    }
}
