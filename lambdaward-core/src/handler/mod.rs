// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-function sandbox lifecycle and request admission.
//!
//! A [`Handler`] owns one function's sandbox. Every operation that creates,
//! pauses, unpauses or destroys that sandbox runs under the handler's own
//! lock, so lifecycle work for one function never overlaps while different
//! functions proceed in parallel.

mod lru;
mod set;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{SandboxError, WorkerError, WorkerResult};
use crate::pool::ForkServer;
use crate::sandbox::{ready_socket_path, Sandbox, SandboxChannel};
use crate::state::{HandlerState, SandboxState};
use crate::stats::HandlerStatus;
use crate::types::FunctionName;

pub use lru::HandlerLru;
pub use set::HandlerSet;

use set::Shared;

/// Code fetched from the registry, reused across sandbox recreations.
#[derive(Debug, Clone)]
struct CachedCode {
    pulled_at: SystemTime,
    code_dir: PathBuf,
    packages: Vec<String>,
}

struct HandlerInner {
    state: HandlerState,
    sandbox: Option<Arc<dyn Sandbox>>,
    code: Option<CachedCode>,
    runners: usize,
    fork_server: Option<ForkServer>,
    usage_kb: u64,
    /// Unlinked from the registry by the orphan reaper.
    retired: bool,
}

/// Controller of one function's sandbox and its in-flight requests.
pub struct Handler {
    name: FunctionName,
    sandbox_dir: PathBuf,
    shared: Arc<Shared>,
    inner: Mutex<HandlerInner>,
    // Copy of state/runners/usage, refreshed under `inner`. Leaf lock,
    // read by dumps without waiting on lifecycle work.
    published: StdMutex<HandlerStatus>,
}

impl Handler {
    fn new(name: FunctionName, sandbox_dir: PathBuf, shared: Arc<Shared>) -> Self {
        let published = StdMutex::new(HandlerStatus {
            name: name.clone(),
            state: HandlerState::Uninitialized,
            runners: 0,
            usage_kb: 0,
        });
        Self {
            name,
            sandbox_dir,
            shared,
            published,
            inner: Mutex::new(HandlerInner {
                state: HandlerState::Uninitialized,
                sandbox: None,
                code: None,
                runners: 0,
                fork_server: None,
                usage_kb: 0,
                retired: false,
            }),
        }
    }

    pub fn name(&self) -> &FunctionName {
        &self.name
    }

    pub fn sandbox_dir(&self) -> &Path {
        &self.sandbox_dir
    }

    /// Admit one request.
    ///
    /// Fetches code and creates the sandbox on first use, otherwise resumes
    /// the existing one. On success the sandbox is running, the request is
    /// counted as a runner, and the caller must call [`Handler::run_finish`]
    /// exactly once, including on its own failure paths.
    pub async fn run_start(&self) -> WorkerResult<SandboxChannel> {
        let mut inner = self.inner.lock().await;

        if inner.retired {
            return Err(WorkerError::HandlerRetired {
                name: self.name.clone(),
            });
        }

        let code = match inner.code.clone() {
            Some(code) => code,
            None => {
                let pulled = self.shared.registry.pull(&self.name).await?;
                let code = CachedCode {
                    pulled_at: SystemTime::now(),
                    code_dir: pulled.code_dir,
                    packages: pulled.packages,
                };
                inner.code = Some(code.clone());
                code
            }
        };

        let sandbox = match inner.sandbox.clone() {
            None => self.create_sandbox(&mut inner, &code).await?,
            Some(sandbox) if inner.state == HandlerState::Paused => {
                self.shared.stats.record_handler_hit();
                sandbox
                    .unpause()
                    .await
                    .map_err(|source| self.sandbox_err("unpause", source))?;
                self.shared.lru.remove(self);
                sandbox
            }
            Some(sandbox) if inner.state == HandlerState::Uninitialized => {
                // Created by an earlier call that failed before admitting
                self.wait_until_ready().await?;
                self.shared.stats.record_handler_hit();
                sandbox
            }
            Some(sandbox) => {
                self.shared.stats.record_handler_hit();
                sandbox
            }
        };

        let channel = sandbox
            .channel()
            .map_err(|source| self.sandbox_err("channel", source))?;

        if inner.state != HandlerState::Running {
            inner.state = inner.state.transition(&self.name, HandlerState::Running)?;
        }
        inner.runners += 1;
        self.publish(&inner);

        let stats = self.shared.stats.snapshot();
        tracing::info!(
            function = %self.name,
            runners = inner.runners,
            handler_hits = stats.handler_hits,
            import_hits = stats.import_hits,
            misses = stats.misses,
            "Request admitted"
        );

        Ok(channel)
    }

    /// Create, start and (optionally) provision a new sandbox.
    async fn create_sandbox(
        &self,
        inner: &mut HandlerInner,
        code: &CachedCode,
    ) -> WorkerResult<Arc<dyn Sandbox>> {
        let started = Instant::now();

        tokio::fs::create_dir_all(&self.sandbox_dir)
            .await
            .map_err(|e| WorkerError::SandboxCreation {
                name: self.name.clone(),
                source: SandboxError::Io {
                    context: "creating sandbox directory",
                    source: e,
                },
            })?;

        let sandbox = self
            .shared
            .factory
            .create(
                &code.code_dir,
                &self.sandbox_dir,
                self.shared.config.pip_mirror.as_deref(),
            )
            .await
            .map_err(|source| WorkerError::SandboxCreation {
                name: self.name.clone(),
                source,
            })?;

        if let Err(e) = self.bring_up(sandbox.as_ref()).await {
            teardown(&self.name, sandbox.as_ref()).await;
            return Err(e);
        }
        inner.sandbox = Some(Arc::clone(&sandbox));

        let mut hit = false;
        if let Some(pool) = &self.shared.pool {
            let container =
                sandbox
                    .as_container()
                    .ok_or_else(|| WorkerError::UnsupportedSandbox {
                        name: self.name.clone(),
                    })?;
            let provisioned = pool
                .provision(container, &self.sandbox_dir, &code.packages)
                .await?;
            tracing::debug!(
                function = %self.name,
                fork_server = provisioned.fork_server.id(),
                hit = provisioned.hit,
                "Provisioned warm runtime"
            );
            inner.fork_server = Some(provisioned.fork_server);
            hit = provisioned.hit;
        }

        if hit {
            self.shared.stats.record_import_hit();
        } else {
            self.shared.stats.record_miss();
        }

        self.wait_until_ready().await?;

        tracing::info!(
            function = %self.name,
            sandbox = sandbox.id(),
            import_hit = hit,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sandbox created"
        );

        Ok(sandbox)
    }

    /// A freshly created sandbox may come back in any state; get it running.
    async fn bring_up(&self, sandbox: &dyn Sandbox) -> WorkerResult<()> {
        match sandbox
            .state()
            .await
            .map_err(|source| self.sandbox_err("state", source))?
        {
            SandboxState::Stopped => sandbox
                .start()
                .await
                .map_err(|source| self.sandbox_err("start", source)),
            SandboxState::Paused => sandbox
                .unpause()
                .await
                .map_err(|source| self.sandbox_err("unpause", source)),
            SandboxState::Running => Ok(()),
        }
    }

    /// Poll for the readiness marker until the configured deadline.
    async fn wait_until_ready(&self) -> WorkerResult<()> {
        let socket = ready_socket_path(&self.sandbox_dir);
        let timeout = self.shared.config.ready_timeout;
        let poll = self.shared.config.ready_poll_interval;
        let started = Instant::now();

        loop {
            if tokio::fs::try_exists(&socket).await.unwrap_or(false) {
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(WorkerError::InitializationTimeout {
                    name: self.name.clone(),
                    socket,
                    waited_ms: waited.as_millis() as u64,
                });
            }

            tokio::time::sleep(poll.min(timeout - waited)).await;
        }
    }

    /// Complete one admitted request.
    ///
    /// The last runner out pauses the sandbox and parks the handler in the
    /// LRU. A failed pause is logged and the sandbox is left running.
    pub async fn run_finish(self: &Arc<Self>) {
        let victims = {
            let mut inner = self.inner.lock().await;

            if inner.runners == 0 {
                tracing::warn!(function = %self.name, "RunFinish without a matching RunStart");
                return;
            }

            inner.runners -= 1;
            self.publish(&inner);
            if inner.runners > 0 || inner.retired {
                return;
            }

            let Some(sandbox) = inner.sandbox.clone() else {
                return;
            };

            if let Err(e) = sandbox.pause().await {
                tracing::warn!(
                    function = %self.name,
                    error = %e,
                    "Could not pause sandbox, leaving it running"
                );
                return;
            }

            match inner.state.transition(&self.name, HandlerState::Paused) {
                Ok(state) => inner.state = state,
                Err(e) => {
                    tracing::warn!(function = %self.name, error = %e, "Pause transition rejected");
                    return;
                }
            }

            inner.usage_kb = sandbox.memory_usage_kb();
            self.publish(&inner);
            self.shared.lru.add(Arc::clone(self), inner.usage_kb)
        };

        for victim in victims {
            victim.evict().await;
        }
    }

    /// Tear down a paused sandbox the LRU gave up on.
    ///
    /// Runs under this handler's lock so it cannot interleave with a
    /// `run_start` reviving it. A handler revived or re-parked since it was
    /// unlinked from the LRU is skipped. Code stays cached.
    pub(crate) async fn evict(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;

        if inner.state != HandlerState::Paused
            || inner.runners > 0
            || inner.retired
            || self.shared.lru.contains(self)
        {
            tracing::debug!(function = %self.name, state = %inner.state, "Skipping eviction");
            return;
        }

        let Some(sandbox) = inner.sandbox.take() else {
            return;
        };

        tracing::info!(
            function = %self.name,
            sandbox = sandbox.id(),
            usage_kb = inner.usage_kb,
            "Evicting paused sandbox"
        );

        teardown(&self.name, sandbox.as_ref()).await;

        inner.fork_server = None;
        inner.usage_kb = 0;
        match inner.state.transition(&self.name, HandlerState::Uninitialized) {
            Ok(state) => inner.state = state,
            Err(e) => tracing::warn!(function = %self.name, error = %e, "Eviction transition rejected"),
        }
        self.publish(&inner);
    }

    /// Wait for in-flight runners to drain, then tear the sandbox down.
    async fn drain_and_nuke(self: Arc<Self>, poll: Duration) {
        let sandbox = loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.runners == 0 {
                    self.shared.lru.remove(&self);
                    inner.fork_server = None;
                    inner.usage_kb = 0;
                    match inner.state.transition(&self.name, HandlerState::Stopped) {
                        Ok(state) => inner.state = state,
                        Err(e) => tracing::warn!(function = %self.name, error = %e, "Stop transition rejected"),
                    }
                    self.publish(&inner);
                    break inner.sandbox.take();
                }
            }
            tokio::time::sleep(poll).await;
        };

        if let Some(sandbox) = sandbox {
            tracing::info!(function = %self.name, sandbox = sandbox.id(), "Reaping orphaned sandbox");
            teardown(&self.name, sandbox.as_ref()).await;
        }
    }

    /// Current sandbox, for diagnostics.
    pub async fn sandbox(&self) -> Option<Arc<dyn Sandbox>> {
        self.inner.lock().await.sandbox.clone()
    }

    pub async fn state(&self) -> HandlerState {
        self.inner.lock().await.state
    }

    pub async fn runners(&self) -> usize {
        self.inner.lock().await.runners
    }

    /// When code was last fetched from the registry.
    pub async fn last_pull(&self) -> Option<SystemTime> {
        self.inner.lock().await.code.as_ref().map(|c| c.pulled_at)
    }

    pub async fn fork_server(&self) -> Option<ForkServer> {
        self.inner.lock().await.fork_server.clone()
    }

    /// Last published status. Never waits on lifecycle work in progress,
    /// so a handler mid-creation reports its pre-creation state.
    pub fn status(&self) -> HandlerStatus {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn publish(&self, inner: &HandlerInner) {
        let mut published = self.published.lock().unwrap_or_else(|e| e.into_inner());
        published.state = inner.state;
        published.runners = inner.runners;
        published.usage_kb = inner.usage_kb;
    }

    fn sandbox_err(&self, op: &'static str, source: SandboxError) -> WorkerError {
        WorkerError::Sandbox {
            name: self.name.clone(),
            op,
            source,
        }
    }
}

/// Best-effort unpause, stop and remove. Failures are logged, never raised.
async fn teardown(name: &FunctionName, sandbox: &dyn Sandbox) {
    if let Err(e) = sandbox.unpause().await {
        tracing::debug!(function = %name, error = %e, "Teardown unpause failed");
    }
    if let Err(e) = sandbox.stop().await {
        tracing::warn!(function = %name, error = %e, "Teardown stop failed");
    }
    if let Err(e) = sandbox.remove().await {
        tracing::warn!(function = %name, error = %e, "Teardown remove failed");
    }
}
