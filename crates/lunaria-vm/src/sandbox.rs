//! Sandbox resource governor
//!
//! Per-script ceilings for instructions executed, memory accounted, and call
//! depth. Each limit carries an optional callback that may authorize
//! continuation (resetting the counter) instead of faulting; without one, or
//! when the callback declines, a typed sandbox-violation fault is raised.

use lunaria_types::{LuaError, SandboxViolationKind};
use std::cell::Cell;
use std::rc::Rc;

/// Decision callback for an exceeded limit: `true` grants continuation.
pub type LimitCallback = Rc<dyn Fn(i64) -> bool>;

/// Sandbox ceilings. Zero means unlimited.
#[derive(Clone, Default)]
pub struct SandboxOptions {
    max_instructions: u64,
    max_memory_bytes: u64,
    max_call_depth: usize,
    pub on_instruction_limit: Option<LimitCallback>,
    pub on_memory_limit: Option<LimitCallback>,
    pub on_recursion_limit: Option<LimitCallback>,
}

impl SandboxOptions {
    /// No limits applied.
    pub fn unrestricted() -> Self {
        SandboxOptions::default()
    }

    pub fn max_instructions(&self) -> u64 {
        self.max_instructions
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_bytes
    }

    pub fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    pub fn has_instruction_limit(&self) -> bool {
        self.max_instructions > 0
    }

    pub fn has_memory_limit(&self) -> bool {
        self.max_memory_bytes > 0
    }

    pub fn has_call_depth_limit(&self) -> bool {
        self.max_call_depth > 0
    }

    pub fn with_instruction_limit(mut self, limit: u64) -> Self {
        self.max_instructions = limit;
        self
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_call_depth_limit(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn on_instruction_limit(mut self, callback: impl Fn(i64) -> bool + 'static) -> Self {
        self.on_instruction_limit = Some(Rc::new(callback));
        self
    }

    pub fn on_memory_limit(mut self, callback: impl Fn(i64) -> bool + 'static) -> Self {
        self.on_memory_limit = Some(Rc::new(callback));
        self
    }

    pub fn on_recursion_limit(mut self, callback: impl Fn(i64) -> bool + 'static) -> Self {
        self.on_recursion_limit = Some(Rc::new(callback));
        self
    }
}

impl std::fmt::Debug for SandboxOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxOptions")
            .field("max_instructions", &self.max_instructions)
            .field("max_memory_bytes", &self.max_memory_bytes)
            .field("max_call_depth", &self.max_call_depth)
            .finish()
    }
}

/// Builds the typed violation fault for an exceeded limit.
pub fn violation(kind: SandboxViolationKind, limit: u64, observed: u64) -> LuaError {
    LuaError::Sandbox {
        kind,
        limit: limit as i64,
        observed: observed as i64,
    }
}

/// Running tally of script-attributed allocations. Shared by every processor
/// of one script; consulted by the memory ceiling on a rate-limited cadence.
#[derive(Debug, Default)]
pub struct AllocationTracker {
    current: Cell<u64>,
    peak: Cell<u64>,
}

impl AllocationTracker {
    pub fn new() -> Self {
        AllocationTracker::default()
    }

    pub fn current_bytes(&self) -> u64 {
        self.current.get()
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak.get()
    }

    pub fn track(&self, bytes: usize) {
        let now = self.current.get().saturating_add(bytes as u64);
        self.current.set(now);
        if now > self.peak.get() {
            self.peak.set(now);
        }
    }

    pub fn release(&self, bytes: usize) {
        self.current
            .set(self.current.get().saturating_sub(bytes as u64));
    }

    pub fn reset(&self) {
        self.current.set(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_default_to_unlimited() {
        let s = SandboxOptions::unrestricted();
        assert!(!s.has_instruction_limit());
        assert!(!s.has_memory_limit());
        assert!(!s.has_call_depth_limit());
    }

    #[test]
    fn tracker_follows_peak() {
        let t = AllocationTracker::new();
        t.track(100);
        t.track(50);
        t.release(120);
        assert_eq!(t.current_bytes(), 30);
        assert_eq!(t.peak_bytes(), 150);
    }
}
