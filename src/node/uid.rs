//! Node identifier generation
//!
//! Each topology owns its generator, so identifiers are unique per registry
//! without any process-wide counter.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Source of stable, never-reused node identifiers.
pub trait UidGenerator: Send + Sync {
    fn next_uid(&self) -> String;
}

/// Monotonic identifiers: `"{prefix}1"`, `"{prefix}2"`, ...
#[derive(Debug, Default)]
pub struct SequentialUids {
    prefix: String,
    next: AtomicU64,
}

impl SequentialUids {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }
}

impl UidGenerator for SequentialUids {
    fn next_uid(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}{}", self.prefix, n)
    }
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomUids;

impl UidGenerator for RandomUids {
    fn next_uid(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
