// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for the worker core.
//!
//! Explicit enum error types only. No `Box<dyn Error>`, no `anyhow::Result`:
//! every failure a caller can observe from `RunStart` has its own variant.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::FunctionName;

/// Top-level error type for the worker core.
#[derive(Debug, Error)]
pub enum WorkerError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Admission Errors - surfaced synchronously from RunStart
    // =========================================================================
    #[error("Failed to fetch code: {0}")]
    Fetch(#[from] RegistryError),

    #[error("Failed to create sandbox for {name}: {source}")]
    SandboxCreation {
        name: FunctionName,
        #[source]
        source: SandboxError,
    },

    #[error("Pool manager requires a container sandbox, {name} has none")]
    UnsupportedSandbox { name: FunctionName },

    #[error("Warm pool provisioning failed: {0}")]
    Provision(#[from] PoolError),

    #[error("Sandbox for {name} not ready after {waited_ms}ms (waiting on {socket})")]
    InitializationTimeout {
        name: FunctionName,
        socket: PathBuf,
        waited_ms: u64,
    },

    #[error("Sandbox operation '{op}' failed for {name}: {source}")]
    Sandbox {
        name: FunctionName,
        op: &'static str,
        #[source]
        source: SandboxError,
    },

    #[error("Handler {name} was retired by the orphan reaper")]
    HandlerRetired { name: FunctionName },

    // =========================================================================
    // State Machine Errors
    // =========================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors reject configuration before the worker starts.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// State transition errors for the handler state machine.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition from {from} to {to} for handler {name}")]
    InvalidTransition {
        name: FunctionName,
        from: &'static str,
        to: &'static str,
    },

    #[error("Handler {name} is in terminal state: {state}")]
    TerminalState {
        name: FunctionName,
        state: &'static str,
    },
}

/// Errors reported by sandboxes and sandbox factories.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox creation failed: {reason}")]
    Create { reason: String },

    #[error("Sandbox {op} failed: {reason}")]
    Operation { op: &'static str, reason: String },

    #[error("Sandbox process error: {reason}")]
    Process { reason: String },

    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Errors reported by the code registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Function not found in registry: {name}")]
    NotFound { name: String },

    #[error("Registry unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Invalid manifest for {name}: {reason}")]
    InvalidManifest { name: String, reason: String },
}

/// Errors reported by the warm-pool manager.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Provisioning failed: {reason}")]
    ProvisionFailed { reason: String },
}

/// Result type alias using WorkerError.
pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::MissingRequiredField {
            field: "worker_dir",
            context: "worker configuration".to_string(),
        };
        assert!(err.to_string().contains("worker_dir"));
    }

    #[test]
    fn test_error_chain() {
        let registry_err = RegistryError::NotFound {
            name: "echo".to_string(),
        };
        let worker_err: WorkerError = registry_err.into();
        assert!(matches!(worker_err, WorkerError::Fetch(_)));
        assert!(worker_err.to_string().contains("echo"));
    }

    #[test]
    fn test_timeout_display_reports_enforced_bound() {
        let err = WorkerError::InitializationTimeout {
            name: FunctionName::new("hello").unwrap(),
            socket: PathBuf::from("/tmp/h/ol.sock"),
            waited_ms: 45_000,
        };
        assert!(err.to_string().contains("45000ms"));
    }
}
