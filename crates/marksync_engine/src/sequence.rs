//! Thread affinity checks.

use std::thread::{self, ThreadId};

/// Remembers the thread it is bound to.
///
/// The processor runs every mutating entry point on one thread. The checker
/// binds to the first thread that calls [`is_current`](Self::is_current)
/// after construction or [`detach`](Self::detach).
#[derive(Debug, Default)]
pub struct SequenceChecker {
    bound: Option<ThreadId>,
}

impl SequenceChecker {
    /// Creates a checker bound to the current thread.
    pub fn new() -> Self {
        Self {
            bound: Some(thread::current().id()),
        }
    }

    /// Returns true if called on the bound thread, binding if detached.
    pub fn is_current(&mut self) -> bool {
        let current = thread::current().id();
        *self.bound.get_or_insert(current) == current
    }

    /// Forgets the bound thread.
    pub fn detach(&mut self) {
        self.bound = None;
    }
}
