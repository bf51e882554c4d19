//! Periodic reconciliation of running limiters against stored definitions.
//!
//! Each pass loads the desired state from the definition store and aligns the
//! registry with it: unknown definitions are started, definitions whose
//! `updated_at` moved are replaced, unchanged ones are left alone. Limiters
//! that were started from the store and whose definition has disappeared are
//! treated as soft-deleted and stopped when pruning is enabled. Limiters
//! created through the HTTP API carry no limiter id and are never pruned.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::limiter::{LimiterDefinition, TokenLimiter};
use crate::registry::{self, LimiterRegistry, RegisteredLimiter};
use crate::store::DefinitionStore;

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Limiter ids started for the first time
    pub started: Vec<String>,
    /// Limiter ids whose actor was replaced
    pub replaced: Vec<String>,
    /// Limiter ids stopped because their definition disappeared
    pub pruned: Vec<String>,
    /// Limiter ids left untouched
    pub unchanged: usize,
    /// Limiter ids whose definition failed validation or duplicated a name
    pub rejected: Vec<String>,
}

impl ReconcileReport {
    /// Whether the pass changed the set of running actors.
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.replaced.is_empty() && self.pruned.is_empty()
    }
}

/// Control loop aligning the registry with a [`DefinitionStore`].
pub struct Reconciler {
    registry: Arc<LimiterRegistry>,
    store: Arc<dyn DefinitionStore>,
    interval: Duration,
    prune_missing: bool,
}

impl Reconciler {
    pub fn new(
        registry: Arc<LimiterRegistry>,
        store: Arc<dyn DefinitionStore>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            interval,
            prune_missing: true,
        }
    }

    /// Whether limiters whose definition disappeared are stopped.
    pub fn with_prune_missing(mut self, prune_missing: bool) -> Self {
        self.prune_missing = prune_missing;
        self
    }

    /// Run a single pass.
    ///
    /// A store failure aborts the pass before the registry is touched, so
    /// running limiters stay as they are.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let definitions = self.store.load_definitions().await?;
        Ok(self.apply(definitions))
    }

    /// Run passes every `interval` until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(ticker);
        tokio::pin!(shutdown);

        info!(interval_secs = self.interval.as_secs_f64(), "Reconciler started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                tick = ticks.next() => {
                    if tick.is_none() {
                        break;
                    }
                    match self.reconcile_once().await {
                        Ok(report) if report.is_noop() => {
                            debug!(unchanged = report.unchanged, "Reconciliation pass made no changes");
                        }
                        Ok(report) => {
                            info!(
                                started = report.started.len(),
                                replaced = report.replaced.len(),
                                pruned = report.pruned.len(),
                                unchanged = report.unchanged,
                                rejected = report.rejected.len(),
                                "Reconciliation pass applied"
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to load definitions, skipping reconciliation pass");
                        }
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// Diff `definitions` against the registry and swap actors as needed.
    ///
    /// Holds the registry's exclusive lock for the whole diff so no CRUD call
    /// can interleave with a replacement.
    fn apply(&self, definitions: Vec<LimiterDefinition>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut seen_ids = HashSet::new();
        let mut seen_names = HashSet::new();

        let mut index = self.registry.write_index();

        for definition in definitions {
            let limiter_id = definition.limiter_id.clone();

            if !seen_ids.insert(limiter_id.clone()) {
                warn!(limiter_id = %limiter_id, "Duplicate limiter id in definitions, ignoring");
                report.rejected.push(limiter_id);
                continue;
            }
            if let Err(e) = definition.config.validate() {
                // The running actor, if any, keeps its last valid configuration.
                warn!(limiter_id = %limiter_id, error = %e, "Rejecting invalid definition");
                report.rejected.push(limiter_id);
                continue;
            }
            if !seen_names.insert(definition.config.name.clone()) {
                warn!(
                    limiter_id = %limiter_id,
                    limiter = %definition.config.name,
                    "Limiter name already claimed by another definition, ignoring"
                );
                report.rejected.push(limiter_id);
                continue;
            }

            let current = index.get_by_id(&limiter_id).cloned();
            if let Some(current) = &current {
                if current.updated_at == Some(definition.updated_at) {
                    report.unchanged += 1;
                    continue;
                }
            }

            let limiter = match TokenLimiter::new(definition.config.clone()) {
                Ok(limiter) => limiter,
                Err(e) => {
                    warn!(limiter_id = %limiter_id, error = %e, "Rejecting invalid definition");
                    report.rejected.push(limiter_id);
                    continue;
                }
            };

            let displaced = index.insert(RegisteredLimiter {
                name: definition.config.name.clone(),
                limiter_id: Some(limiter_id.clone()),
                updated_at: Some(definition.updated_at),
                handle: limiter.start(),
            });
            for old in &displaced {
                if old.limiter_id.as_deref() != Some(limiter_id.as_str()) {
                    warn!(
                        limiter = %old.name,
                        limiter_id = %limiter_id,
                        "Stored definition takes over limiter name"
                    );
                }
                registry::shut_down(old);
            }

            if current.is_some() {
                info!(
                    limiter_id = %limiter_id,
                    limiter = %definition.config.name,
                    updated_at = definition.updated_at,
                    "Limiter replaced"
                );
                report.replaced.push(limiter_id);
            } else {
                info!(
                    limiter_id = %limiter_id,
                    limiter = %definition.config.name,
                    "Limiter started from definition"
                );
                report.started.push(limiter_id);
            }
        }

        if self.prune_missing {
            for limiter_id in index.ids() {
                // Ids rejected this pass are still present in the store.
                if seen_ids.contains(&limiter_id) {
                    continue;
                }
                if let Some(entry) = index.get_by_id(&limiter_id).cloned() {
                    index.remove(&entry);
                    registry::shut_down(&entry);
                    info!(limiter_id = %limiter_id, limiter = %entry.name, "Limiter pruned");
                    report.pruned.push(limiter_id);
                }
            }
        }

        report
    }
}
