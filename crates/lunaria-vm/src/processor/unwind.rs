//! Fault handling and frame unwinding
//!
//! A recoverable fault caught at the loop boundary is decorated with its
//! source location, offered to the debugger, given to every frame's
//! pre-unwind message decorator, and then walked down the frame stack:
//! pending to-be-closed blocks close with the fault as context, and the
//! first frame carrying an error handler absorbs the fault and resumes.
//! Internal and host-boundary faults pass straight through to the host.

use super::{ExecutionContext, Processor};
use lunaria_types::{LuaError, Value};
use tracing::debug;

/// Outcome of a handled unwind.
pub(crate) enum Unwound {
    /// A handler frame absorbed the fault; continue at this instruction.
    Resumed(usize),
    /// A handler frame with no script return address absorbed the fault;
    /// hand its result to the host.
    ReturnedToHost(Value),
}

impl Processor {
    pub(crate) fn handle_fault(&mut self, mut fault: LuaError) -> Result<Unwound, LuaError> {
        if !fault.is_recoverable() {
            return Err(fault);
        }

        fault.decorate(&self.chunk.location(self.last_ip));
        fault.set_traceback(self.build_traceback());
        debug!(message = %fault.decorated_message(), "runtime fault, unwinding");

        // offer the fault to the debugger; it may request a pause at the
        // faulting instruction
        let hook = self.shared.debug.borrow().attached.clone();
        if let Some(hook) = hook {
            let wants_pause = hook
                .borrow_mut()
                .on_runtime_error(&fault.decorated_message());
            if wants_pause {
                let ip = self.last_ip;
                let source = self.chunk.code.get(ip).and_then(|i| i.source.clone());
                hook.borrow_mut().on_pause(ip, source.as_ref());
            }
        }

        // every frame's pre-unwind decorator gets a chance to rewrite the
        // message, innermost first
        for idx in (0..self.exec_stack.len()).rev() {
            let decorator = self.exec_stack[idx].unwind_decorator.clone();
            if let Some(decorator) = decorator {
                let rewritten =
                    self.perform_message_decoration(&decorator, fault.decorated_message())?;
                fault.set_decorated(rewritten);
            }
        }

        let close_error = Value::string(fault.decorated_message());

        while !self.exec_stack.is_empty() {
            let mut frame = self.pop_to_base_pointer()?;
            self.close_all_pending_blocks_owned(&mut frame, &close_error)?;

            if let Some(handler) = frame.error_handler.clone() {
                // script frames still hold the callee and arguments below
                // the cropped base; drop them before resuming
                if frame.callback.is_none() {
                    let argc = self.pop_arg_count()?;
                    self.remove_last(argc + 1)?;
                }
                let resume_at = frame.return_address;
                self.recycle_frame(frame);

                let mut args = self.pool.rent_args();
                args.push(Value::string(fault.decorated_message()));
                let handled = {
                    let mut ctx = ExecutionContext { proc: self };
                    handler.invoke(&mut ctx, &args, false)
                };
                args.clear();
                self.pool.return_args(args);
                let handled = handled?;

                return match resume_at {
                    Some(ip) => {
                        self.push(handled);
                        Ok(Unwound::Resumed(ip))
                    }
                    None => Ok(Unwound::ReturnedToHost(handled)),
                };
            }

            let was_entry = frame.is_entry_point;
            self.recycle_frame(frame);
            if was_entry {
                return Err(fault);
            }
        }

        Err(fault)
    }

    /// Runs an xpcall-style message handler over the decorated message. A
    /// handler that itself faults collapses to the fixed
    /// "error in error handling" message.
    pub(crate) fn perform_message_decoration(
        &mut self,
        handler: &Value,
        message: String,
    ) -> Result<String, LuaError> {
        let result = match handler {
            Value::Function(_) | Value::Callback(_) => {
                self.call_internal(handler, &[Value::string(message.clone())])
            }
            _ => Err(LuaError::runtime("error handler not set to a function")),
        };
        match result {
            Ok(rewritten) => {
                let scalar = rewritten.scalar();
                if matches!(scalar, Value::Void) {
                    Ok(message)
                } else {
                    Ok(scalar.to_string())
                }
            }
            Err(e) if e.is_recoverable() => Ok("error in error handling".to_string()),
            Err(e) => Err(e),
        }
    }

    /// Formats the live call chain for host-facing error reports.
    pub(crate) fn build_traceback(&self) -> String {
        let mut out = String::from("stack traceback:");
        for frame in self.exec_stack.iter().rev() {
            out.push_str("\n\t");
            match (&frame.callback, &frame.calling_source) {
                (Some(cb), _) => {
                    out.push_str("in builtin '");
                    out.push_str(cb.name());
                    out.push('\'');
                }
                (None, Some(source)) => {
                    out.push_str(&source.location());
                    out.push_str(": in function");
                }
                (None, None) => out.push_str("in main chunk"),
            }
            if frame.is_tail_call {
                out.push_str("\n\t(...tail calls...)");
            }
        }
        out
    }
}
