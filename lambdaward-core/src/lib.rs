//! Lambdaward Core Library
//!
//! Sandbox lifecycle core of a function-as-a-service worker.
//! Provides per-function handlers with request admission, a handler
//! registry with an orphan reaper, size-bounded LRU eviction of paused
//! sandboxes, and hit/miss accounting.

pub mod config;
pub mod error;
pub mod handler;
pub mod pool;
pub mod registry;
pub mod sandbox;
pub mod state;
pub mod stats;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{ConfigLoader, WorkerConfig};
pub use error::{HardValidationError, WorkerError, WorkerResult};
pub use handler::{Handler, HandlerLru, HandlerSet};
pub use pool::{ForkServer, PoolManager, Provisioned};
pub use registry::{LocalRegistry, PulledCode, RegistryManager};
pub use sandbox::{ContainerSandbox, Sandbox, SandboxChannel, SandboxFactory};
pub use state::{HandlerState, SandboxState};
pub use stats::{HandlerStats, HandlerStatus, StatsSnapshot};
pub use types::FunctionName;
