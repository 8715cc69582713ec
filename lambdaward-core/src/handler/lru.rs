// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Size-bounded LRU of paused handlers.
//!
//! Members are exactly the handlers whose sandbox is paused with no runners.
//! The structure lock is a leaf: it is never held across an await or while
//! acquiring a handler lock. Eviction itself happens in [`Handler::evict`]
//! under the victim's own lock, after the caller has released its own.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::Handler;
use crate::types::FunctionName;

struct LruEntry {
    handler: Arc<Handler>,
    usage_kb: u64,
}

#[derive(Default)]
struct LruInner {
    // Front = least recently paused, back = most recently paused
    entries: VecDeque<LruEntry>,
    usage_kb: u64,
}

impl LruInner {
    fn take(&mut self, handler: &Handler) -> Option<LruEntry> {
        let pos = self
            .entries
            .iter()
            .position(|e| std::ptr::eq(Arc::as_ptr(&e.handler), handler))?;
        let entry = self.entries.remove(pos)?;
        self.usage_kb -= entry.usage_kb;
        Some(entry)
    }
}

/// Paused handlers ordered by recency, bounded by a memory budget.
pub struct HandlerLru {
    capacity_kb: u64,
    inner: Mutex<LruInner>,
}

impl HandlerLru {
    pub fn new(capacity_kb: u64) -> Self {
        Self {
            capacity_kb,
            inner: Mutex::new(LruInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or move `handler` to the most-recently-used position.
    ///
    /// While total usage exceeds the budget the oldest members are unlinked
    /// and returned; the caller must pass each one to [`Handler::evict`]
    /// once it holds no handler lock of its own.
    pub(crate) fn add(&self, handler: Arc<Handler>, usage_kb: u64) -> Vec<Arc<Handler>> {
        let mut inner = self.lock();
        inner.take(&handler);
        inner.usage_kb += usage_kb;
        inner.entries.push_back(LruEntry { handler, usage_kb });

        let mut victims = Vec::new();
        while inner.usage_kb > self.capacity_kb {
            match inner.entries.pop_front() {
                Some(entry) => {
                    inner.usage_kb -= entry.usage_kb;
                    victims.push(entry.handler);
                }
                None => break,
            }
        }

        if !victims.is_empty() {
            tracing::debug!(
                victims = victims.len(),
                usage_kb = inner.usage_kb,
                capacity_kb = self.capacity_kb,
                "Handler cache over budget"
            );
        }

        victims
    }

    /// Remove `handler` if present. Returns whether it was a member.
    pub(crate) fn remove(&self, handler: &Handler) -> bool {
        self.lock().take(handler).is_some()
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.usage_kb = 0;
    }

    pub fn contains(&self, handler: &Handler) -> bool {
        self.lock()
            .entries
            .iter()
            .any(|e| std::ptr::eq(Arc::as_ptr(&e.handler), handler))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accounted usage of all members, in kibibytes.
    pub fn usage_kb(&self) -> u64 {
        self.lock().usage_kb
    }

    pub fn capacity_kb(&self) -> u64 {
        self.capacity_kb
    }

    /// Member names, least recently paused first.
    pub fn names(&self) -> Vec<FunctionName> {
        self.lock()
            .entries
            .iter()
            .map(|e| e.handler.name().clone())
            .collect()
    }
}
