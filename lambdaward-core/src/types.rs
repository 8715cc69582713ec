// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Maximum length of a function name.
const MAX_NAME_LEN: usize = 64;

/// Validated function ("lambda") name.
///
/// Names double as directory components under the worker root, so only
/// alphanumerics, hyphens, underscores and non-leading dots are accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FunctionName(String);

impl FunctionName {
    /// Create a new FunctionName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, HardValidationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "function_name",
                value: name,
                reason: "Function name cannot be empty".to_string(),
            });
        }

        if name.len() > MAX_NAME_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "function_name",
                value: name.clone(),
                reason: format!(
                    "Function name too long: {} chars (max {})",
                    name.len(),
                    MAX_NAME_LEN
                ),
            });
        }

        if name.starts_with('.')
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "function_name",
                value: name,
                reason: "Function name must contain only alphanumeric characters, hyphens, underscores and non-leading dots".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory holding this function's sandboxes under `worker_dir`.
    pub fn handler_dir(&self, worker_dir: &Path) -> PathBuf {
        worker_dir.join("handlers").join(&self.0)
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for FunctionName {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl std::str::FromStr for FunctionName {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<FunctionName> for String {
    fn from(name: FunctionName) -> Self {
        name.0
    }
}
