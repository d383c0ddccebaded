//! Coroutine resume, yield, and close on the processor
//!
//! Resume enters the child processor and runs its loop from the saved
//! instruction pointer (or the entry frame on first resume); yield surfaces
//! as a yield-request value returned by the loop. Close unwinds a suspended
//! coroutine, running its pending to-be-closed cleanups, and records the
//! close error so closing a dead coroutine replays it.

use super::Processor;
use crate::coroutine::CoroutineState;
use lunaria_types::{LuaError, Value};
use tracing::{debug, trace};

impl Processor {
    /// Resumes this (child) processor. Returns the yielded values as a
    /// tuple, the final return value, or the forced-yield marker.
    pub(crate) fn resume(&mut self, args: &[Value]) -> Result<Value, LuaError> {
        self.enter()?;
        let result = self.resume_inner(args);
        self.leave();

        if let Err(fault) = &result {
            self.state = CoroutineState::Dead;
            if fault.is_recoverable() {
                self.last_close_error = Some(Value::string(fault.decorated_message()));
            }
        }
        result
    }

    fn resume_inner(&mut self, args: &[Value]) -> Result<Value, LuaError> {
        let entry = match self.state {
            CoroutineState::NotStarted => self.push_host_frame(None, args)?,
            CoroutineState::Suspended => {
                // the resume arguments become the result of the yield call
                self.push(Value::tuple(args.to_vec()));
                self.saved_ip
                    .ok_or_else(|| LuaError::internal("suspended coroutine lost its resume point"))?
            }
            CoroutineState::ForceSuspended => {
                if !args.is_empty() {
                    return Err(LuaError::runtime(
                        "cannot pass arguments when resuming a force-suspended coroutine",
                    ));
                }
                self.saved_ip
                    .ok_or_else(|| LuaError::internal("suspended coroutine lost its resume point"))?
            }
            state => {
                return Err(LuaError::runtime(format!(
                    "cannot resume a coroutine in state {state:?}"
                )))
            }
        };

        trace!(id = self.id(), entry, "coroutine resumed");
        self.state = CoroutineState::Running;
        let result = self.processing_loop(entry)?;

        if let Value::Yield(request) = &result {
            if request.forced {
                self.state = CoroutineState::ForceSuspended;
                debug!(id = self.id(), "coroutine force-suspended");
                return Ok(result);
            }
            self.state = CoroutineState::Suspended;
            self.last_close_error = None;
            return Ok(Value::tuple(request.values.clone()));
        }

        self.state = CoroutineState::Dead;
        self.last_close_error = None;
        trace!(id = self.id(), "coroutine completed");
        Ok(result)
    }

    /// Closes this (child) processor, returning Lua's `true` or
    /// `(false, error)` shape.
    pub(crate) fn close(&mut self) -> Result<Value, LuaError> {
        match self.state {
            CoroutineState::Main | CoroutineState::Running => Err(LuaError::runtime(format!(
                "cannot close a coroutine in state {:?}",
                self.state
            ))),
            CoroutineState::Dead => Ok(self.build_close_result()),
            CoroutineState::NotStarted => {
                self.state = CoroutineState::Dead;
                self.last_close_error = None;
                Ok(Value::TRUE)
            }
            CoroutineState::Suspended | CoroutineState::ForceSuspended => {
                self.enter()?;
                let result = self.close_pending();
                self.leave();
                result
            }
        }
    }

    fn close_pending(&mut self) -> Result<Value, LuaError> {
        while !self.exec_stack.is_empty() {
            let mut frame = match self.pop_to_base_pointer() {
                Ok(f) => f,
                Err(fault) => return self.finish_close_with_fault(fault),
            };
            if let Err(fault) = self.close_all_pending_blocks_owned(&mut frame, &Value::Nil) {
                self.recycle_frame(frame);
                return self.finish_close_with_fault(fault);
            }
            self.recycle_frame(frame);
        }

        self.value_stack.clear();
        self.last_close_error = None;
        self.state = CoroutineState::Dead;
        debug!(id = self.id(), "coroutine closed");
        Ok(Value::TRUE)
    }

    fn finish_close_with_fault(&mut self, fault: LuaError) -> Result<Value, LuaError> {
        self.state = CoroutineState::Dead;
        if !fault.is_recoverable() {
            return Err(fault);
        }
        let error = Value::string(fault.decorated_message());
        self.last_close_error = Some(error.clone());
        Ok(Value::Tuple(vec![Value::FALSE, error].into()))
    }

    /// Closing a dead coroutine replays the recorded close error instead of
    /// re-running cleanup.
    fn build_close_result(&self) -> Value {
        match &self.last_close_error {
            Some(error) if !error.is_nil() => {
                Value::Tuple(vec![Value::FALSE, error.clone()].into())
            }
            _ => Value::TRUE,
        }
    }
}
