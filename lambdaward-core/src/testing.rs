//! Counting mock collaborators for unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::WorkerConfig;
use crate::error::{PoolError, RegistryError, SandboxError};
use crate::handler::HandlerSet;
use crate::pool::{ForkServer, PoolManager, Provisioned};
use crate::registry::{PulledCode, RegistryManager};
use crate::sandbox::{
    ready_socket_path, ContainerSandbox, Sandbox, SandboxChannel, SandboxFactory,
};
use crate::state::SandboxState;
use crate::stats::HandlerStats;
use crate::types::FunctionName;

fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

#[derive(Default)]
pub(crate) struct MockRegistry {
    pulls: AtomicUsize,
    delay: Mutex<Duration>,
    unknown: Mutex<Vec<String>>,
    root: PathBuf,
}

impl MockRegistry {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            ..Default::default()
        }
    }

    pub(crate) fn pulls(&self) -> usize {
        count(&self.pulls)
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn forget(&self, name: &str) {
        self.unknown.lock().unwrap().push(name.to_string());
    }
}

#[async_trait]
impl RegistryManager for MockRegistry {
    async fn pull(&self, name: &FunctionName) -> Result<PulledCode, RegistryError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.unknown.lock().unwrap().iter().any(|n| n == name.as_str()) {
            return Err(RegistryError::NotFound {
                name: name.to_string(),
            });
        }

        self.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(PulledCode {
            code_dir: self.root.join(name.as_str()),
            packages: vec!["requests".to_string()],
        })
    }
}

pub(crate) struct MockSandbox {
    id: String,
    sandbox_dir: PathBuf,
    state: Mutex<SandboxState>,
    writes_ready: bool,
    container: bool,
    fail_pause: bool,
    usage_kb: u64,
    pub(crate) starts: AtomicUsize,
    pub(crate) pauses: AtomicUsize,
    pub(crate) unpauses: AtomicUsize,
    pub(crate) stops: AtomicUsize,
    pub(crate) removes: AtomicUsize,
}

impl MockSandbox {
    fn set_running(&self) {
        *self.state.lock().unwrap() = SandboxState::Running;
        if self.writes_ready {
            let _ = std::fs::create_dir_all(&self.sandbox_dir);
            let _ = std::fs::write(ready_socket_path(&self.sandbox_dir), b"");
        }
    }

    pub(crate) fn starts(&self) -> usize {
        count(&self.starts)
    }

    pub(crate) fn pauses(&self) -> usize {
        count(&self.pauses)
    }

    pub(crate) fn unpauses(&self) -> usize {
        count(&self.unpauses)
    }

    pub(crate) fn stops(&self) -> usize {
        count(&self.stops)
    }

    pub(crate) fn removes(&self) -> usize {
        count(&self.removes)
    }

    pub(crate) fn current_state(&self) -> SandboxState {
        *self.state.lock().unwrap()
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn state(&self) -> Result<SandboxState, SandboxError> {
        Ok(self.current_state())
    }

    async fn start(&self) -> Result<(), SandboxError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.set_running();
        Ok(())
    }

    async fn pause(&self) -> Result<(), SandboxError> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        if self.fail_pause {
            return Err(SandboxError::Operation {
                op: "pause",
                reason: "freezer unavailable".to_string(),
            });
        }
        *self.state.lock().unwrap() = SandboxState::Paused;
        Ok(())
    }

    async fn unpause(&self) -> Result<(), SandboxError> {
        self.unpauses.fetch_add(1, Ordering::SeqCst);
        self.set_running();
        Ok(())
    }

    async fn stop(&self) -> Result<(), SandboxError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = SandboxState::Stopped;
        let _ = std::fs::remove_file(ready_socket_path(&self.sandbox_dir));
        Ok(())
    }

    async fn remove(&self) -> Result<(), SandboxError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn channel(&self) -> Result<SandboxChannel, SandboxError> {
        Ok(SandboxChannel::new(ready_socket_path(&self.sandbox_dir)))
    }

    fn memory_usage_kb(&self) -> u64 {
        self.usage_kb
    }

    fn as_container(&self) -> Option<&dyn ContainerSandbox> {
        if self.container {
            Some(self)
        } else {
            None
        }
    }
}

impl ContainerSandbox for MockSandbox {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn root_dir(&self) -> &Path {
        &self.sandbox_dir
    }
}

pub(crate) struct MockFactory {
    pub(crate) initial_state: Mutex<SandboxState>,
    pub(crate) writes_ready: AtomicBool,
    pub(crate) container: AtomicBool,
    pub(crate) fail_create: AtomicBool,
    pub(crate) fail_pause: AtomicBool,
    pub(crate) usage_kb: AtomicU64,
    sandboxes: Mutex<Vec<Arc<MockSandbox>>>,
}

impl Default for MockFactory {
    fn default() -> Self {
        Self {
            initial_state: Mutex::new(SandboxState::Stopped),
            writes_ready: AtomicBool::new(true),
            container: AtomicBool::new(true),
            fail_create: AtomicBool::new(false),
            fail_pause: AtomicBool::new(false),
            usage_kb: AtomicU64::new(100),
            sandboxes: Mutex::new(Vec::new()),
        }
    }
}

impl MockFactory {
    pub(crate) fn creates(&self) -> usize {
        self.sandboxes.lock().unwrap().len()
    }

    /// The `n`th sandbox created, oldest first.
    pub(crate) fn sandbox(&self, n: usize) -> Arc<MockSandbox> {
        Arc::clone(&self.sandboxes.lock().unwrap()[n])
    }
}

#[async_trait]
impl SandboxFactory for MockFactory {
    async fn create(
        &self,
        _code_dir: &Path,
        sandbox_dir: &Path,
        _pip_mirror: Option<&str>,
    ) -> Result<Arc<dyn Sandbox>, SandboxError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SandboxError::Create {
                reason: "no capacity".to_string(),
            });
        }

        let mut sandboxes = self.sandboxes.lock().unwrap();
        let initial = *self.initial_state.lock().unwrap();
        let sandbox = Arc::new(MockSandbox {
            id: format!("mock-{}", sandboxes.len()),
            sandbox_dir: sandbox_dir.to_path_buf(),
            state: Mutex::new(initial),
            writes_ready: self.writes_ready.load(Ordering::SeqCst),
            container: self.container.load(Ordering::SeqCst),
            fail_pause: self.fail_pause.load(Ordering::SeqCst),
            usage_kb: self.usage_kb.load(Ordering::SeqCst),
            starts: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            unpauses: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        });
        if initial == SandboxState::Running {
            sandbox.set_running();
        }
        sandboxes.push(Arc::clone(&sandbox));
        Ok(sandbox)
    }
}

#[derive(Default)]
pub(crate) struct MockPool {
    pub(crate) provisions: AtomicUsize,
    pub(crate) hit: AtomicBool,
    pub(crate) fail: AtomicBool,
}

impl MockPool {
    pub(crate) fn provisions(&self) -> usize {
        count(&self.provisions)
    }
}

#[async_trait]
impl PoolManager for MockPool {
    async fn provision(
        &self,
        sandbox: &dyn ContainerSandbox,
        _sandbox_dir: &Path,
        _packages: &[String],
    ) -> Result<Provisioned, PoolError> {
        let n = self.provisions.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PoolError::ProvisionFailed {
                reason: "fork server crashed".to_string(),
            });
        }
        Ok(Provisioned {
            fork_server: ForkServer::new(n as u64, sandbox.pid()),
            hit: self.hit.load(Ordering::SeqCst),
        })
    }
}

/// Temp worker directory plus mock collaborators.
pub(crate) struct TestBed {
    temp: TempDir,
    pub(crate) registry: Arc<MockRegistry>,
    pub(crate) factory: Arc<MockFactory>,
    pub(crate) stats: Arc<HandlerStats>,
}

impl TestBed {
    pub(crate) fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(MockRegistry::new(temp.path().join("registry")));
        Self {
            temp,
            registry,
            factory: Arc::new(MockFactory::default()),
            stats: Arc::new(HandlerStats::new()),
        }
    }

    pub(crate) fn worker_dir(&self) -> &Path {
        self.temp.path()
    }

    pub(crate) fn name(&self, name: &str) -> FunctionName {
        FunctionName::new(name).unwrap()
    }

    pub(crate) fn config(&self) -> WorkerConfig {
        let mut config = WorkerConfig::with_worker_dir(self.worker_dir());
        config.ready_timeout = Duration::from_secs(2);
        config.ready_poll_interval = Duration::from_millis(1);
        config
    }

    pub(crate) fn handler_set(&self) -> HandlerSet {
        self.handler_set_with(self.config(), None)
    }

    pub(crate) fn handler_set_with(
        &self,
        config: WorkerConfig,
        pool: Option<Arc<dyn PoolManager>>,
    ) -> HandlerSet {
        HandlerSet::new(
            config,
            Arc::clone(&self.registry) as Arc<dyn RegistryManager>,
            Arc::clone(&self.factory) as Arc<dyn SandboxFactory>,
            pool,
            Arc::clone(&self.stats),
        )
    }
}
