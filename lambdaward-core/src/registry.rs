//! Code registry: resolves a function name to local code and its dependencies.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::types::FunctionName;

/// Dependency manifest read from a function's code directory.
pub const PACKAGES_FILE: &str = "packages.txt";

/// Result of a successful pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledCode {
    /// Local directory holding the function's code.
    pub code_dir: PathBuf,
    /// Declared dependency list.
    pub packages: Vec<String>,
}

/// Resolves functions to code on local disk.
#[async_trait]
pub trait RegistryManager: Send + Sync {
    async fn pull(&self, name: &FunctionName) -> Result<PulledCode, RegistryError>;
}

/// Registry backed by a directory tree: `<root>/<name>/` holds a function.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    root: PathBuf,
}

impl LocalRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl RegistryManager for LocalRegistry {
    async fn pull(&self, name: &FunctionName) -> Result<PulledCode, RegistryError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(RegistryError::Unreachable {
                    reason: format!("{} is not a directory", self.root.display()),
                })
            }
            Err(e) => {
                return Err(RegistryError::Unreachable {
                    reason: format!("{}: {}", self.root.display(), e),
                })
            }
        }

        let code_dir = self.root.join(name.as_str());
        if !tokio::fs::metadata(&code_dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return Err(RegistryError::NotFound {
                name: name.to_string(),
            });
        }

        let packages = match tokio::fs::read_to_string(code_dir.join(PACKAGES_FILE)).await {
            Ok(content) => parse_packages(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(RegistryError::InvalidManifest {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        tracing::debug!(
            function = %name,
            code_dir = %code_dir.display(),
            packages = packages.len(),
            "Pulled function code"
        );

        Ok(PulledCode { code_dir, packages })
    }
}

/// One package per line; blank lines and `#` comments are skipped.
fn parse_packages(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_packages() {
        let manifest = "# deps\nrequests==2.31\n\n  numpy  # pinned elsewhere\n";
        assert_eq!(parse_packages(manifest), vec!["requests==2.31", "numpy"]);
        assert!(parse_packages("").is_empty());
    }

    #[tokio::test]
    async fn test_pull_with_manifest() {
        let temp = TempDir::new().unwrap();
        let code = temp.path().join("hello");
        std::fs::create_dir_all(&code).unwrap();
        std::fs::write(code.join(PACKAGES_FILE), "six\n").unwrap();

        let registry = LocalRegistry::new(temp.path());
        assert_eq!(registry.root(), temp.path());
        let pulled = registry
            .pull(&FunctionName::new("hello").unwrap())
            .await
            .unwrap();

        assert_eq!(pulled.code_dir, code);
        assert_eq!(pulled.packages, vec!["six"]);
    }

    #[tokio::test]
    async fn test_pull_without_manifest() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("bare")).unwrap();

        let registry = LocalRegistry::new(temp.path());
        let pulled = registry
            .pull(&FunctionName::new("bare").unwrap())
            .await
            .unwrap();
        assert!(pulled.packages.is_empty());
    }

    #[tokio::test]
    async fn test_pull_unknown_function() {
        let temp = TempDir::new().unwrap();
        let registry = LocalRegistry::new(temp.path());
        let result = registry.pull(&FunctionName::new("nope").unwrap()).await;
        assert!(matches!(result, Err(RegistryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_pull_missing_root() {
        let temp = TempDir::new().unwrap();
        let registry = LocalRegistry::new(temp.path().join("gone"));
        let result = registry.pull(&FunctionName::new("x").unwrap()).await;
        assert!(matches!(result, Err(RegistryError::Unreachable { .. })));
    }
}
