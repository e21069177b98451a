//! Session handle and connection ID sources.

use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;

/// Source of session handles and connection IDs.
pub trait IdGenerator: Send + Sync {
    fn next_u32(&self) -> u32;
}

/// Random IDs from the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_u32(&self) -> u32 {
        // 0 is never a valid handle or connection ID
        rand::thread_rng().gen_range(1..=u32::MAX)
    }
}

/// Deterministic counter, starting at the given value.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU32,
}

impl SequentialIds {
    pub fn new(start: u32) -> Self {
        Self {
            next: AtomicU32::new(start),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new(1)
    }
}

impl IdGenerator for SequentialIds {
    fn next_u32(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
