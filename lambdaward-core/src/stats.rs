// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Hit/miss counters shared by every handler of a HandlerSet.
//!
//! The counters are an injected service rather than process globals, so
//! independent HandlerSets (and tests) never observe each other's counts.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::state::HandlerState;
use crate::types::FunctionName;

/// Monotonic admission counters. Lock-free, read for diagnostics only.
#[derive(Debug, Default)]
pub struct HandlerStats {
    handler_hits: AtomicU64,
    import_hits: AtomicU64,
    misses: AtomicU64,
}

impl HandlerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request reused this handler's existing sandbox.
    pub fn record_handler_hit(&self) {
        self.handler_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A new sandbox was served from a prepared warm pool.
    pub fn record_import_hit(&self) {
        self.import_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A new sandbox required a fresh boot.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            handler_hits: self.handler_hits.load(Ordering::Relaxed),
            import_hits: self.import_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`HandlerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub handler_hits: u64,
    pub import_hits: u64,
    pub misses: u64,
}

/// One row of a HandlerSet dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerStatus {
    pub name: FunctionName,
    pub state: HandlerState,
    pub runners: usize,
    pub usage_kb: u64,
}
