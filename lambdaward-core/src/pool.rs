// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Warm-pool (fork server) provisioning contract.
//!
//! The pool manager owns the warm runtimes. A handler only keeps a
//! [`ForkServer`] binding to look its runtime up; losing that binding is
//! what makes a sandbox an orphan.

use std::path::Path;

use async_trait::async_trait;

use crate::error::PoolError;
use crate::sandbox::ContainerSandbox;

/// Opaque reference to a provisioned warm runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkServer {
    id: u64,
    pid: Option<u32>,
}

impl ForkServer {
    pub fn new(id: u64, pid: Option<u32>) -> Self {
        Self { id, pid }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// PID of the warm runtime process, when the pool exposes it.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Outcome of a provisioning request.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub fork_server: ForkServer,
    /// Served from a prepared pool rather than a fresh boot.
    pub hit: bool,
}

/// Supplies pre-warmed runtimes to container sandboxes.
#[async_trait]
pub trait PoolManager: Send + Sync {
    async fn provision(
        &self,
        sandbox: &dyn ContainerSandbox,
        sandbox_dir: &Path,
        packages: &[String],
    ) -> Result<Provisioned, PoolError>;
}
