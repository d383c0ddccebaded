//! Coroutine handles
//!
//! A coroutine wraps a child processor. The handle is what scripts and hosts
//! hold; all scheduling goes through resume/close, which borrow the child
//! processor for the duration of the run. A handle whose processor is
//! currently borrowed is, by construction, somewhere on the active chain.

use crate::processor::Processor;
use lunaria_types::{LuaError, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Lifecycle state of a processor.
///
/// Transitions are monotone except Suspended⇄Running during resume/yield;
/// any state may move to Dead on completion, close, or fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    /// Created, never resumed.
    NotStarted,
    /// The root processor of a script; not resumable or closable.
    Main,
    /// Currently executing (or resumed somebody who is).
    Running,
    /// Parked at an explicit yield.
    Suspended,
    /// Parked by the auto-yield governor; resumable only with no arguments.
    ForceSuspended,
    /// Finished, closed, or killed by an error.
    Dead,
}

/// Script-visible handle to a coroutine.
pub struct Coroutine {
    id: u64,
    proc: Rc<RefCell<Processor>>,
}

impl Coroutine {
    pub(crate) fn new(proc: Rc<RefCell<Processor>>) -> Self {
        let id = proc.borrow().id();
        Coroutine { id, proc }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state. A processor we cannot borrow is running.
    pub fn state(&self) -> CoroutineState {
        match self.proc.try_borrow() {
            Ok(p) => p.state(),
            Err(_) => CoroutineState::Running,
        }
    }

    /// Lua status string, relative to the processor asking.
    pub fn status(&self, current_id: u64) -> &'static str {
        match self.state() {
            CoroutineState::Running => {
                if self.id == current_id {
                    "running"
                } else {
                    "normal"
                }
            }
            CoroutineState::NotStarted
            | CoroutineState::Suspended
            | CoroutineState::ForceSuspended => "suspended",
            CoroutineState::Dead => "dead",
            CoroutineState::Main => "running",
        }
    }

    /// Resumes the coroutine with the given arguments. Returns the yielded
    /// values or the final results; a forced-yield marker passes through
    /// untouched so preemption cascades up the resume chain.
    pub fn resume(&self, args: &[Value]) -> Result<Value, LuaError> {
        let mut proc = self
            .proc
            .try_borrow_mut()
            .map_err(|_| LuaError::runtime("cannot resume a non-suspended coroutine"))?;
        proc.resume(args)
    }

    /// Closes the coroutine, running pending to-be-closed cleanups. Returns
    /// `true` or `(false, error)` in Lua's `coroutine.close` shape.
    pub fn close(&self) -> Result<Value, LuaError> {
        let mut proc = self
            .proc
            .try_borrow_mut()
            .map_err(|_| LuaError::runtime("cannot close a running coroutine"))?;
        proc.close()
    }
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Downcasts a coroutine value back to its handle.
pub(crate) fn coroutine_handle(value: &Value) -> Result<Rc<Coroutine>, LuaError> {
    match value {
        Value::Coroutine(any) => any
            .clone()
            .downcast::<Coroutine>()
            .map_err(|_| LuaError::boundary("coroutine handle belongs to a different runtime")),
        other => Err(LuaError::runtime(format!(
            "cannot use a {} value as a coroutine",
            other.type_name()
        ))),
    }
}
