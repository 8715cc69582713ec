// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Sandbox capabilities consumed by the handler state machine.
//!
//! A sandbox is one isolated execution environment for one function's code.
//! The container capability needed by warm-pool provisioning is discovered at
//! runtime through [`Sandbox::as_container`] rather than a type hierarchy, so
//! workers without a pool manager never depend on it.

mod process;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SandboxError;
use crate::state::SandboxState;

pub use process::{ProcessSandbox, ProcessSandboxFactory};

/// File whose existence signals the sandbox runtime accepts requests.
pub const READY_SOCKET_NAME: &str = "ol.sock";

/// Path of the readiness marker inside `sandbox_dir`.
pub fn ready_socket_path(sandbox_dir: &Path) -> PathBuf {
    sandbox_dir.join(READY_SOCKET_NAME)
}

/// Request-submission endpoint of a running sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxChannel {
    socket_path: PathBuf,
}

impl SandboxChannel {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Unix socket requests are submitted over.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// One isolated execution environment.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Identifier used in logs.
    fn id(&self) -> &str;

    async fn state(&self) -> Result<SandboxState, SandboxError>;

    async fn start(&self) -> Result<(), SandboxError>;

    async fn pause(&self) -> Result<(), SandboxError>;

    async fn unpause(&self) -> Result<(), SandboxError>;

    async fn stop(&self) -> Result<(), SandboxError>;

    async fn remove(&self) -> Result<(), SandboxError>;

    fn channel(&self) -> Result<SandboxChannel, SandboxError>;

    /// Resident size estimate in kibibytes, used for LRU accounting.
    fn memory_usage_kb(&self) -> u64 {
        0
    }

    /// Container capability, if this sandbox supports warm-pool provisioning.
    fn as_container(&self) -> Option<&dyn ContainerSandbox> {
        None
    }
}

/// Sandbox variant a pool manager can fork a warm runtime into.
pub trait ContainerSandbox: Sandbox {
    /// Host PID of the sandbox's init process, if it is running.
    fn pid(&self) -> Option<u32>;

    /// Host path of the sandbox root the runtime is entered into.
    fn root_dir(&self) -> &Path;
}

/// Creates sandboxes bound to a function's code.
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(
        &self,
        code_dir: &Path,
        sandbox_dir: &Path,
        pip_mirror: Option<&str>,
    ) -> Result<Arc<dyn Sandbox>, SandboxError>;
}
