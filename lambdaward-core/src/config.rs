// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Validates the worker configuration at boot-up time.
//! Any invalid field results in a HardValidationError that prevents startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HardValidationError, WorkerError, WorkerResult};

/// Raw worker configuration as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorkerConfig {
    worker_dir: Option<String>,
    #[serde(default)]
    registry_dir: Option<String>,
    #[serde(default)]
    pip_mirror: Option<String>,
    #[serde(default = "default_handler_cache_size_kb")]
    handler_cache_size_kb: u64,
    #[serde(default = "default_ready_timeout_ms")]
    ready_timeout_ms: u64,
    #[serde(default = "default_ready_poll_interval_ms")]
    ready_poll_interval_ms: u64,
    #[serde(default = "default_reaper_interval_ms")]
    reaper_interval_ms: u64,
    #[serde(default = "default_runtime_command")]
    runtime_command: Vec<String>,
}

fn default_handler_cache_size_kb() -> u64 {
    256 * 1024 // 256MB
}

fn default_ready_timeout_ms() -> u64 {
    45_000
}

fn default_ready_poll_interval_ms() -> u64 {
    10
}

fn default_reaper_interval_ms() -> u64 {
    5
}

fn default_runtime_command() -> Vec<String> {
    vec!["python3".to_string(), "server.py".to_string()]
}

/// Upper bound on the readiness wait: 10 minutes.
const MAX_READY_TIMEOUT_MS: u64 = 600_000;

/// Validated worker configuration. Read once when the HandlerSet is built.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker root; sandbox directories live under `<worker_dir>/handlers`.
    pub worker_dir: PathBuf,
    /// Root of the local code registry.
    pub registry_dir: PathBuf,
    /// Package-mirror address handed to the sandbox factory.
    pub pip_mirror: Option<String>,
    /// LRU budget for paused sandboxes, in kibibytes.
    pub handler_cache_size_kb: u64,
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub reaper_interval: Duration,
    /// argv for the process sandbox runtime.
    pub runtime_command: Vec<String>,
}

impl WorkerConfig {
    /// Configuration with defaults rooted at `worker_dir`.
    pub fn with_worker_dir(worker_dir: impl Into<PathBuf>) -> Self {
        let worker_dir = worker_dir.into();
        Self {
            registry_dir: worker_dir.join("registry"),
            worker_dir,
            pip_mirror: None,
            handler_cache_size_kb: default_handler_cache_size_kb(),
            ready_timeout: Duration::from_millis(default_ready_timeout_ms()),
            ready_poll_interval: Duration::from_millis(default_ready_poll_interval_ms()),
            reaper_interval: Duration::from_millis(default_reaper_interval_ms()),
            runtime_command: default_runtime_command(),
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> WorkerResult<WorkerConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(WorkerError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| WorkerError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> WorkerResult<WorkerConfig> {
        let raw: RawWorkerConfig =
            serde_yaml::from_str(content).map_err(|e| WorkerError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    fn validate(raw: RawWorkerConfig) -> WorkerResult<WorkerConfig> {
        let worker_dir = match raw.worker_dir {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => {
                return Err(HardValidationError::MissingRequiredField {
                    field: "worker_dir",
                    context: "worker configuration".to_string(),
                }
                .into())
            }
        };

        let registry_dir = raw
            .registry_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| worker_dir.join("registry"));

        if raw.handler_cache_size_kb == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "handler_cache_size_kb",
                value: "0".to_string(),
                reason: "Handler cache size must be greater than 0".to_string(),
            }
            .into());
        }

        if raw.ready_timeout_ms == 0 || raw.ready_timeout_ms > MAX_READY_TIMEOUT_MS {
            return Err(HardValidationError::InvalidFieldValue {
                field: "ready_timeout_ms",
                value: raw.ready_timeout_ms.to_string(),
                reason: format!("Must be between 1 and {}ms", MAX_READY_TIMEOUT_MS),
            }
            .into());
        }

        if raw.ready_poll_interval_ms == 0 || raw.ready_poll_interval_ms >= raw.ready_timeout_ms
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "ready_poll_interval_ms",
                value: raw.ready_poll_interval_ms.to_string(),
                reason: "Poll interval must be non-zero and shorter than ready_timeout_ms"
                    .to_string(),
            }
            .into());
        }

        if raw.reaper_interval_ms == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "reaper_interval_ms",
                value: "0".to_string(),
                reason: "Reaper interval must be greater than 0".to_string(),
            }
            .into());
        }

        if raw.runtime_command.is_empty() || raw.runtime_command[0].is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "runtime_command",
                value: format!("{:?}", raw.runtime_command),
                reason: "Runtime command must name a program".to_string(),
            }
            .into());
        }

        let pip_mirror = raw.pip_mirror.filter(|m| !m.trim().is_empty());

        Ok(WorkerConfig {
            worker_dir,
            registry_dir,
            pip_mirror,
            handler_cache_size_kb: raw.handler_cache_size_kb,
            ready_timeout: Duration::from_millis(raw.ready_timeout_ms),
            ready_poll_interval: Duration::from_millis(raw.ready_poll_interval_ms),
            reaper_interval: Duration::from_millis(raw.reaper_interval_ms),
            runtime_command: raw.runtime_command,
        })
    }
}
