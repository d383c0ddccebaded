//! Debugger hook surface
//!
//! An attached debugger observes every instruction, may request stepping or
//! pause at breakpoints, is offered runtime faults before unwinding, and
//! receives exactly one ended notification when the outermost call chain
//! unwinds back to the host.

use crate::bytecode::SourceRef;
use std::cell::RefCell;
use std::rc::Rc;

/// Where execution should stop next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMode {
    /// Run until a breakpoint hits.
    #[default]
    Continue,
    /// Stop at the next instruction.
    Step,
}

/// A requested pause location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Breakpoint {
    /// Instruction-pointer breakpoint.
    Address(usize),
    /// Source line breakpoint.
    Line { source: String, line: u32 },
}

/// Observer attached to a processor tree.
pub trait Debugger {
    /// Called when stepping or when a breakpoint matches. The returned mode
    /// becomes the pending action.
    fn on_pause(&mut self, ip: usize, source: Option<&SourceRef>) -> StepMode;

    /// Offered a runtime fault before the unwinder runs. Returning `true`
    /// requests a pause at the faulting instruction.
    fn on_runtime_error(&mut self, message: &str) -> bool {
        let _ = message;
        false
    }

    /// The outermost nesting level finished.
    fn on_execution_ended(&mut self) {}
}

/// Shared debug state for one processor tree. Coroutines share their
/// creator's context so a single debugger observes the whole script.
#[derive(Default)]
pub struct DebugContext {
    pub attached: Option<Rc<RefCell<dyn Debugger>>>,
    pub breakpoints: Vec<Breakpoint>,
    pub mode: StepMode,
}

impl DebugContext {
    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    /// Whether the debugger wants control before executing `ip`.
    pub fn should_pause(&self, ip: usize, source: Option<&SourceRef>) -> bool {
        if self.mode == StepMode::Step {
            return true;
        }
        self.breakpoints.iter().any(|bp| match bp {
            Breakpoint::Address(a) => *a == ip,
            Breakpoint::Line { source: s, line } => {
                source.is_some_and(|r| r.line == *line && &*r.source == s.as_str())
            }
        })
    }
}

impl std::fmt::Debug for DebugContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugContext")
            .field("attached", &self.attached.is_some())
            .field("breakpoints", &self.breakpoints)
            .field("mode", &self.mode)
            .finish()
    }
}
