// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Registry of all handlers of a worker, keyed by function name.
//!
//! The name → handler map is a DashMap: lookups and get-or-insert are single
//! atomic shard operations. Scans copy the handler list out and release every
//! shard guard before any handler lock is taken.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use super::{Handler, HandlerLru};
use crate::config::WorkerConfig;
use crate::error::{HardValidationError, WorkerResult};
use crate::pool::PoolManager;
use crate::registry::{LocalRegistry, RegistryManager};
use crate::sandbox::{ProcessSandboxFactory, SandboxFactory};
use crate::stats::{HandlerStats, HandlerStatus, StatsSnapshot};
use crate::types::FunctionName;

/// Delay between runner-count checks while draining an orphan.
const DRAIN_POLL: Duration = Duration::from_millis(1);

type HandlerMap = DashMap<FunctionName, Arc<Handler>>;

/// State shared by the set and every handler it creates.
pub(crate) struct Shared {
    pub(crate) config: WorkerConfig,
    pub(crate) registry: Arc<dyn RegistryManager>,
    pub(crate) factory: Arc<dyn SandboxFactory>,
    pub(crate) pool: Option<Arc<dyn PoolManager>>,
    pub(crate) stats: Arc<HandlerStats>,
    pub(crate) lru: HandlerLru,
}

/// All handlers of one worker process.
pub struct HandlerSet {
    handlers: Arc<HandlerMap>,
    shared: Arc<Shared>,
    next_incarnation: AtomicU64,
    reaper: Option<JoinHandle<()>>,
}

impl HandlerSet {
    /// Build a set over the given collaborators.
    ///
    /// The orphan reaper is started only when a pool manager is configured,
    /// which requires a running Tokio runtime.
    pub fn new(
        config: WorkerConfig,
        registry: Arc<dyn RegistryManager>,
        factory: Arc<dyn SandboxFactory>,
        pool: Option<Arc<dyn PoolManager>>,
        stats: Arc<HandlerStats>,
    ) -> Self {
        let lru = HandlerLru::new(config.handler_cache_size_kb);
        let reaper_interval = config.reaper_interval;
        let shared = Arc::new(Shared {
            config,
            registry,
            factory,
            pool,
            stats,
            lru,
        });
        let handlers: Arc<HandlerMap> = Arc::new(DashMap::new());

        let reaper = shared.pool.is_some().then(|| {
            tracing::info!(
                interval_ms = reaper_interval.as_millis() as u64,
                "Starting orphan reaper"
            );
            tokio::spawn(reap_orphans(Arc::clone(&handlers), reaper_interval))
        });

        Self {
            handlers,
            shared,
            next_incarnation: AtomicU64::new(0),
            reaper,
        }
    }

    /// Set backed by the local directory registry and process sandboxes.
    pub fn local(config: WorkerConfig, pool: Option<Arc<dyn PoolManager>>) -> WorkerResult<Self> {
        let registry = Arc::new(LocalRegistry::new(config.registry_dir.clone()));
        tracing::debug!(registry = %registry.root().display(), "Using local registry");
        let factory = ProcessSandboxFactory::new(config.runtime_command.clone()).map_err(|e| {
            HardValidationError::InvalidFieldValue {
                field: "runtime_command",
                value: format!("{:?}", config.runtime_command),
                reason: e.to_string(),
            }
        })?;

        Ok(Self::new(
            config,
            registry,
            Arc::new(factory),
            pool,
            Arc::new(HandlerStats::new()),
        ))
    }

    /// Handler for `name`, created Uninitialized on first reference.
    pub fn get(&self, name: &FunctionName) -> Arc<Handler> {
        let entry = self.handlers.entry(name.clone()).or_insert_with(|| {
            let incarnation = self.next_incarnation.fetch_add(1, Ordering::Relaxed);
            let sandbox_dir = name
                .handler_dir(&self.shared.config.worker_dir)
                .join(format!("sandbox-{}", incarnation));
            tracing::debug!(function = %name, dir = %sandbox_dir.display(), "Created handler");
            Arc::new(Handler::new(
                name.clone(),
                sandbox_dir,
                Arc::clone(&self.shared),
            ))
        });
        Arc::clone(entry.value())
    }

    /// Diagnostic snapshot of every handler's name and state.
    ///
    /// Reads each handler's published status, so it returns promptly even
    /// while sandboxes are being created.
    pub fn dump(&self) -> Vec<HandlerStatus> {
        let mut handlers = snapshot(&self.handlers);
        handlers.sort_by(|a, b| a.name().cmp(b.name()));

        tracing::info!(count = handlers.len(), "HANDLERS:");
        let mut rows = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let status = handler.status();
            tracing::info!(
                function = %status.name,
                state = %status.state,
                runners = status.runners,
                "> handler"
            );
            rows.push(status);
        }
        rows
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn lru(&self) -> &HandlerLru {
        &self.shared.lru
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn contains(&self, name: &FunctionName) -> bool {
        self.handlers.contains_key(name)
    }
}

impl Drop for HandlerSet {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
        // Parked handlers hold the shared state; release them
        self.shared.lru.clear();
    }
}

/// Copy the current handler list; shard guards are dropped on return.
fn snapshot(handlers: &HandlerMap) -> Vec<Arc<Handler>> {
    handlers.iter().map(|e| Arc::clone(e.value())).collect()
}

impl Handler {
    /// Unlink this handler if it holds a sandbox with no warm-pool binding.
    ///
    /// The registry entry is removed while the handler lock is held, so no
    /// new request can be admitted to the orphan after this returns true.
    async fn unlink_if_orphaned(self: &Arc<Self>, handlers: &HandlerMap) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.retired || inner.sandbox.is_none() || inner.fork_server.is_some() {
            return false;
        }

        inner.retired = true;
        handlers.remove_if(&self.name, |_, current| Arc::ptr_eq(current, self));
        true
    }
}

/// Reap handlers whose sandbox lost its warm-pool binding.
///
/// Each scan takes the registry only to copy the handler list and to unlink
/// an orphan; nothing is held across scans or while runners drain.
async fn reap_orphans(handlers: Arc<HandlerMap>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        for handler in snapshot(&handlers) {
            if handler.unlink_if_orphaned(&handlers).await {
                tracing::info!(function = %handler.name(), "Unlinked orphaned handler");
                tokio::spawn(Arc::clone(&handler).drain_and_nuke(DRAIN_POLL));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::HandlerState;
    use crate::testing::TestBed;

    #[tokio::test]
    async fn test_get_creates_once() {
        let bed = TestBed::new();
        let set = bed.handler_set();
        let name = bed.name("echo");

        let first = set.get(&name);
        let second = set.get(&name);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(set.len(), 1);
        assert_eq!(first.state().await, HandlerState::Uninitialized);
        assert_eq!(first.runners().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_yields_single_handler() {
        let bed = TestBed::new();
        let set = Arc::new(bed.handler_set());
        let name = bed.name("shared");

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let set = Arc::clone(&set);
                let name = name.clone();
                tokio::spawn(async move { set.get(&name) })
            })
            .collect();

        let mut handlers = Vec::new();
        for task in tasks {
            handlers.push(task.await.unwrap());
        }

        assert_eq!(set.len(), 1);
        assert!(handlers.iter().all(|h| Arc::ptr_eq(h, &handlers[0])));
    }

    #[tokio::test]
    async fn test_dump_is_sorted_and_read_only() {
        let bed = TestBed::new();
        let set = bed.handler_set();
        set.get(&bed.name("zeta"));
        set.get(&bed.name("alpha"));

        let rows = set.dump();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, bed.name("alpha"));
        assert_eq!(rows[1].name, bed.name("zeta"));
        assert!(rows.iter().all(|r| r.state == HandlerState::Uninitialized));
        assert_eq!(bed.registry.pulls(), 0);
    }

    #[tokio::test]
    async fn test_no_reaper_without_pool() {
        let bed = TestBed::new();
        let set = bed.handler_set();
        assert!(set.reaper.is_none());
    }

    #[tokio::test]
    async fn test_incarnations_use_distinct_sandbox_dirs() {
        let bed = TestBed::new();
        let set = bed.handler_set();
        let a = set.get(&bed.name("a"));
        let b = set.get(&bed.name("b"));
        assert_ne!(a.sandbox_dir(), b.sandbox_dir());
        assert!(a
            .sandbox_dir()
            .starts_with(set.config().worker_dir.join("handlers").join("a")));
    }
}
