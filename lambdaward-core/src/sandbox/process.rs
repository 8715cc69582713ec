// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Process-backed sandboxes.
//!
//! Each sandbox is one runtime process started in the sandbox directory.
//! Pause and unpause are `SIGSTOP`/`SIGCONT`, which keeps the process image
//! resident and makes resuming a millisecond operation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use super::{ready_socket_path, ContainerSandbox, Sandbox, SandboxChannel, SandboxFactory};
use crate::error::SandboxError;
use crate::state::SandboxState;

#[derive(Debug, Default)]
struct ProcessInner {
    child: Option<Child>,
    paused: bool,
}

/// Sandbox running one runtime process.
#[derive(Debug)]
pub struct ProcessSandbox {
    id: String,
    code_dir: PathBuf,
    sandbox_dir: PathBuf,
    pip_mirror: Option<String>,
    command: Vec<String>,
    inner: Mutex<ProcessInner>,
}

impl ProcessSandbox {
    fn lock(&self) -> MutexGuard<'_, ProcessInner> {
        // A poisoned guard still holds a consistent child handle.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn running_pid(&self, op: &'static str) -> Result<Pid, SandboxError> {
        let inner = self.lock();
        inner
            .child
            .as_ref()
            .and_then(|child| child.id())
            .map(|pid| Pid::from_raw(pid as i32))
            .ok_or_else(|| SandboxError::Operation {
                op,
                reason: "sandbox process is not running".to_string(),
            })
    }

    fn signal(&self, op: &'static str, signal: Signal) -> Result<(), SandboxError> {
        let pid = self.running_pid(op)?;
        kill(pid, signal).map_err(|e| SandboxError::Operation {
            op,
            reason: format!("{} to pid {}: {}", signal.as_str(), pid, e),
        })
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn state(&self) -> Result<SandboxState, SandboxError> {
        let mut inner = self.lock();
        let exited = match inner.child.as_mut() {
            None => return Ok(SandboxState::Stopped),
            Some(child) => child
                .try_wait()
                .map_err(|e| SandboxError::Process {
                    reason: format!("polling {}: {}", self.id, e),
                })?
                .is_some(),
        };

        if exited {
            inner.child = None;
            inner.paused = false;
            return Ok(SandboxState::Stopped);
        }

        Ok(if inner.paused {
            SandboxState::Paused
        } else {
            SandboxState::Running
        })
    }

    async fn start(&self) -> Result<(), SandboxError> {
        let mut inner = self.lock();
        if inner.child.is_some() {
            return Err(SandboxError::Operation {
                op: "start",
                reason: "sandbox process already started".to_string(),
            });
        }

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .current_dir(&self.sandbox_dir)
            .env("OL_CODE_DIR", &self.code_dir)
            .env("OL_SANDBOX_DIR", &self.sandbox_dir)
            .env("OL_SOCKET", ready_socket_path(&self.sandbox_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(mirror) = &self.pip_mirror {
            cmd.env("OL_PIP_MIRROR", mirror);
        }

        let child = cmd.spawn().map_err(|e| SandboxError::Process {
            reason: format!("failed to spawn '{}': {}", self.command[0], e),
        })?;

        tracing::debug!(
            sandbox = %self.id,
            pid = ?child.id(),
            dir = %self.sandbox_dir.display(),
            "Spawned sandbox process"
        );

        inner.child = Some(child);
        inner.paused = false;
        Ok(())
    }

    async fn pause(&self) -> Result<(), SandboxError> {
        self.signal("pause", Signal::SIGSTOP)?;
        self.lock().paused = true;
        Ok(())
    }

    async fn unpause(&self) -> Result<(), SandboxError> {
        self.signal("unpause", Signal::SIGCONT)?;
        self.lock().paused = false;
        Ok(())
    }

    async fn stop(&self) -> Result<(), SandboxError> {
        let child = {
            let mut inner = self.lock();
            inner.paused = false;
            inner.child.take()
        };

        if let Some(mut child) = child {
            // SIGKILL is delivered to stopped processes as well.
            child.kill().await.map_err(|e| SandboxError::Operation {
                op: "stop",
                reason: e.to_string(),
            })?;
        }

        match tokio::fs::remove_file(ready_socket_path(&self.sandbox_dir)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(SandboxError::Io {
                context: "removing ready socket",
                source: e,
            }),
            _ => Ok(()),
        }
    }

    async fn remove(&self) -> Result<(), SandboxError> {
        let running = self.lock().child.is_some();
        if running {
            return Err(SandboxError::Operation {
                op: "remove",
                reason: "sandbox process still running".to_string(),
            });
        }

        match tokio::fs::remove_dir_all(&self.sandbox_dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(SandboxError::Io {
                context: "removing sandbox directory",
                source: e,
            }),
            _ => Ok(()),
        }
    }

    fn channel(&self) -> Result<SandboxChannel, SandboxError> {
        Ok(SandboxChannel::new(ready_socket_path(&self.sandbox_dir)))
    }

    fn memory_usage_kb(&self) -> u64 {
        self.pid()
            .and_then(|pid| std::fs::read_to_string(format!("/proc/{}/status", pid)).ok())
            .and_then(|status| parse_vm_rss_kb(&status))
            .unwrap_or(0)
    }

    fn as_container(&self) -> Option<&dyn ContainerSandbox> {
        Some(self)
    }
}

impl ContainerSandbox for ProcessSandbox {
    fn pid(&self) -> Option<u32> {
        self.lock().child.as_ref().and_then(|child| child.id())
    }

    fn root_dir(&self) -> &Path {
        &self.sandbox_dir
    }
}

/// Extract `VmRSS` (kB) from a `/proc/<pid>/status` body.
fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

/// Creates [`ProcessSandbox`]es running `command`.
#[derive(Debug)]
pub struct ProcessSandboxFactory {
    command: Vec<String>,
    next_id: AtomicU64,
}

impl ProcessSandboxFactory {
    /// `command` is the runtime argv; it must name a program.
    pub fn new(command: Vec<String>) -> Result<Self, SandboxError> {
        if command.first().map_or(true, |program| program.is_empty()) {
            return Err(SandboxError::Create {
                reason: "runtime command is empty".to_string(),
            });
        }

        Ok(Self {
            command,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl SandboxFactory for ProcessSandboxFactory {
    async fn create(
        &self,
        code_dir: &Path,
        sandbox_dir: &Path,
        pip_mirror: Option<&str>,
    ) -> Result<Arc<dyn Sandbox>, SandboxError> {
        if !code_dir.is_dir() {
            return Err(SandboxError::Create {
                reason: format!("code directory {} does not exist", code_dir.display()),
            });
        }

        let id = format!("proc-{}", self.next_id.fetch_add(1, Ordering::Relaxed));

        // Stale markers from a previous sandbox would short-circuit readiness.
        match tokio::fs::remove_file(ready_socket_path(sandbox_dir)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(SandboxError::Io {
                    context: "clearing stale ready socket",
                    source: e,
                })
            }
            _ => {}
        }

        tracing::debug!(sandbox = %id, code_dir = %code_dir.display(), "Created process sandbox");

        Ok(Arc::new(ProcessSandbox {
            id,
            code_dir: code_dir.to_path_buf(),
            sandbox_dir: sandbox_dir.to_path_buf(),
            pip_mirror: pip_mirror.map(str::to_string),
            command: self.command.clone(),
            inner: Mutex::new(ProcessInner::default()),
        }))
    }
}
