//! Shared, read-only collaborators handed to every adapter call.

use concord_core::ConflictResolutionStrategy;
use concord_db::CommonDataStore;
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::config::{ConcurrencyMode, SyncConfig};
use crate::policy::{ConcurrencyPolicy, OptimisticPolicy, PessimisticPolicy};

/// What an adapter needs besides its own storage.
///
/// Built once from the loaded [`SyncConfig`] and never mutated.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub config: Arc<SyncConfig>,
    pub policy: Arc<dyn ConcurrencyPolicy>,
    pub strategy: Arc<dyn ConflictResolutionStrategy>,
    pub store: CommonDataStore,
    pub clock: Arc<dyn Clock>,
}

impl SyncContext {
    pub fn new(config: Arc<SyncConfig>, clock: Arc<dyn Clock>) -> Self {
        let policy: Arc<dyn ConcurrencyPolicy> = match config.concurrency() {
            ConcurrencyMode::Optimistic => Arc::new(OptimisticPolicy),
            ConcurrencyMode::Pessimistic => Arc::new(PessimisticPolicy::new()),
        };
        let strategy = config.sync.conflict_strategy.build();

        info!(
            policy = policy.name(),
            strategy = strategy.name(),
            result_time_delay_ms = config.result_time_delay(),
            "Sync context configured"
        );

        SyncContext {
            config,
            policy,
            strategy,
            store: CommonDataStore::new(),
            clock,
        }
    }

    /// Replaces the configured conflict strategy, e.g. with a server-side
    /// merge strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn ConflictResolutionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }
}
