//! Call, return, and tail-call protocol
//!
//! A call pushes the callee, its flattened arguments, and the argument
//! count, then a frame. Script callees jump to their entry point; host
//! callbacks run inline. Tail-call optimization reuses the current frame
//! when the call is immediately followed by a single-value return and
//! neither frame carries handlers, continuations, or close obligations.

use super::{ExecutionContext, Flow, Processor};
use crate::bytecode::{Instruction, OpCode};
use crate::frame::CallFrame;
use crate::sandbox::violation;
use lunaria_types::{
    metamethods, CallbackFunction, ClosureScope, LuaError, SandboxViolationKind, SymbolRef, Value,
};
use std::rc::Rc;

/// Parameter name that collects the rest of the argument list.
pub(crate) const VARARGS: &str = "...";

impl Processor {
    /// The call protocol. `return_address` is `None` when the call returns
    /// straight to the host.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn internal_exec_call(
        &mut self,
        args_count: usize,
        return_address: Option<usize>,
        handler: Option<CallbackFunction>,
        continuation: Option<CallbackFunction>,
        this_call: bool,
        debug_name: Option<Rc<str>>,
        unwind_decorator: Option<Value>,
    ) -> Result<Flow, LuaError> {
        self.check_call_depth()?;

        let function = self.peek(args_count)?.clone();
        let mut is_tail_call = false;
        let mut is_entry_point = false;
        let mut return_address = return_address;

        // frame reuse once the stacks outgrow the threshold: the call must
        // be followed exactly by RET 1 and neither frame may carry handlers
        // or close obligations
        let threshold = self.shared.options.tail_call_threshold;
        if (self.exec_stack.len() > threshold && self.exec_stack.len() > 1)
            || (self.value_stack.len() > threshold && self.value_stack.len() > 1)
        {
            if let Some(ip) = return_address {
                let followed_by_ret = matches!(
                    self.chunk.code.get(ip),
                    Some(Instruction {
                        op: OpCode::Ret,
                        num_val: 1,
                        ..
                    })
                );
                let frame_clean = !self
                    .exec_stack
                    .last()
                    .map(CallFrame::has_pending_obligations)
                    .unwrap_or(true);
                let incoming_clean = handler.is_none()
                    && continuation.is_none()
                    && unwind_decorator.is_none();
                if followed_by_ret && frame_clean && incoming_clean {
                    let (retpoint, was_entry) = self.perform_tco(args_count)?;
                    return_address = retpoint;
                    is_tail_call = true;
                    is_entry_point = was_entry;
                }
            }
        }

        match &function {
            Value::Callback(cb) => {
                let cb = cb.clone();
                let args = self.materialize_args(args_count, 0)?;
                let calling_source = self
                    .chunk
                    .code
                    .get(return_address.map(|ip| ip.saturating_sub(1)).unwrap_or(0))
                    .and_then(|i| i.source.clone());

                self.exec_stack.push(CallFrame {
                    base_pointer: None,
                    return_address,
                    callback: Some(cb.clone()),
                    error_handler: handler,
                    continuation,
                    unwind_decorator,
                    calling_source,
                    is_tail_call,
                    is_entry_point,
                    ..CallFrame::default()
                });

                let ret = {
                    let mut ctx = ExecutionContext { proc: self };
                    cb.invoke(&mut ctx, &args, this_call)
                };
                // a faulting callback leaves its frame in place; the
                // unwinder pops it and consults its error handler
                let invoked = ret?;
                self.remove_last(args_count + 1)?;
                self.push(invoked);
                self.exec_stack.pop();

                self.check_tail_requests(return_address)
            }
            Value::Function(closure) => {
                let entry = closure.entry_point();
                let scope = closure.scope().clone();
                self.push(Value::int(args_count as i64));
                let calling_source = self
                    .chunk
                    .code
                    .get(return_address.map(|ip| ip.saturating_sub(1)).unwrap_or(0))
                    .and_then(|i| i.source.clone());

                self.exec_stack.push(CallFrame {
                    base_pointer: Some(self.value_stack.len()),
                    return_address,
                    closure_scope: scope,
                    error_handler: handler,
                    continuation,
                    unwind_decorator,
                    calling_source,
                    is_tail_call,
                    is_entry_point,
                    is_method_call: this_call,
                    ..CallFrame::default()
                });
                Ok(Flow::Next(entry))
            }
            other => {
                // __call substitution: the metamethod becomes the callee and
                // the original callee its first argument
                match self.get_metamethod(other, metamethods::CALL) {
                    Some(meta) => {
                        let mut buf = self.pool.rent_args();
                        for _ in 0..=args_count {
                            buf.push(self.pop()?);
                        }
                        self.push(meta);
                        for v in buf.drain(..).rev() {
                            self.push(v);
                        }
                        self.pool.return_args(buf);
                        self.internal_exec_call(
                            args_count + 1,
                            return_address,
                            handler,
                            continuation,
                            false,
                            None,
                            unwind_decorator,
                        )
                    }
                    None => Err(LuaError::attempt_to_call(other, debug_name.as_deref())),
                }
            }
        }
    }

    /// Reuses the current frame slot: performs a fake return, leaving the
    /// outgoing callee and arguments in place of the current frame's.
    fn perform_tco(&mut self, args_count: usize) -> Result<(Option<usize>, bool), LuaError> {
        let mut moved = self.pool.rent_args();
        for _ in 0..=args_count {
            moved.push(self.pop()?);
        }

        let frame = self.pop_to_base_pointer()?;
        let retpoint = frame.return_address;
        let was_entry = frame.is_entry_point;
        let argc = self.pop_arg_count()?;
        self.remove_last(argc + 1)?;
        self.recycle_frame(frame);

        for v in moved.drain(..).rev() {
            self.push(v);
        }
        self.pool.return_args(moved);

        Ok((retpoint, was_entry))
    }

    /// Pops the argument-count slot a call pushed under the frame base.
    pub(crate) fn pop_arg_count(&mut self) -> Result<usize, LuaError> {
        self.pop()?
            .as_number()
            .and_then(|n| n.to_int())
            .map(|i| i as usize)
            .ok_or_else(|| LuaError::internal("argument count slot corrupted"))
    }

    /// Return instruction: closes pending blocks, pops the frame, crops the
    /// stack, pushes the return value, and follows tail/yield requests.
    pub(crate) fn exec_ret(&mut self, insn: &Instruction) -> Result<Flow, LuaError> {
        let return_value = match insn.num_val {
            0 => Value::Void,
            1 => self.pop()?,
            _ => {
                return Err(LuaError::internal(
                    "RET supports only 0 and 1 return-value forms",
                ))
            }
        };

        let frame_idx = self
            .exec_stack
            .len()
            .checked_sub(1)
            .ok_or_else(|| LuaError::internal("RET with no frame"))?;
        self.close_all_pending_blocks_at(frame_idx, &Value::Nil)?;

        let frame = self.pop_to_base_pointer()?;
        let retpoint = frame.return_address;
        let continuation = frame.continuation.clone();
        self.recycle_frame(frame);

        let argc = self.pop_arg_count()?;
        self.remove_last(argc + 1)?;
        self.push(return_value);

        let mut flow = match retpoint {
            Some(ip) => Flow::Next(ip),
            None => Flow::ReturnHost,
        };
        if insn.num_val == 1 {
            if let Flow::Next(ip) = flow {
                flow = self.check_tail_requests(Some(ip))?;
            } else {
                flow = self.check_tail_requests(None)?;
            }
        }

        if let Some(cont) = continuation {
            let value = self.pop()?;
            let result = {
                let mut ctx = ExecutionContext { proc: self };
                cont.invoke(&mut ctx, &[value], false)?
            };
            self.push(result);
        }

        Ok(flow)
    }

    /// Interprets a request value left on top of the stack by a call: a
    /// tail-call request re-enters the call protocol, a yield request
    /// suspends, anything else continues.
    pub(crate) fn check_tail_requests(
        &mut self,
        return_address: Option<usize>,
    ) -> Result<Flow, LuaError> {
        let is_tail = matches!(self.peek(0)?, Value::TailCall(_));
        if is_tail {
            let Value::TailCall(tcd) = self.pop()? else {
                return Err(LuaError::internal("tail-call request vanished"));
            };
            self.push(tcd.function.clone());
            for arg in &tcd.args {
                self.push(arg.clone());
            }
            return self.internal_exec_call(
                tcd.args.len(),
                return_address,
                tcd.error_handler.clone(),
                tcd.continuation.clone(),
                false,
                None,
                tcd.unwind_decorator.clone(),
            );
        }
        if matches!(self.peek(0)?, Value::Yield(_)) {
            self.saved_ip = return_address;
            return Ok(Flow::Suspend);
        }
        Ok(match return_address {
            Some(ip) => Flow::Next(ip),
            None => Flow::ReturnHost,
        })
    }

    fn check_call_depth(&self) -> Result<(), LuaError> {
        let sandbox = &self.shared.options.sandbox;
        if !sandbox.has_call_depth_limit() {
            return Ok(());
        }
        let depth = self.exec_stack.len();
        if depth >= sandbox.max_call_depth() {
            let granted = sandbox
                .on_recursion_limit
                .as_ref()
                .is_some_and(|cb| cb(depth as i64));
            if !granted {
                return Err(violation(
                    SandboxViolationKind::Recursion,
                    sandbox.max_call_depth() as u64,
                    depth as u64,
                ));
            }
        }
        Ok(())
    }

    /// Collects the arguments of a pending call, flattening a trailing
    /// tuple. `offset` skips slots above the arguments (the count slot
    /// during ARGS processing).
    pub(crate) fn materialize_args(
        &self,
        args_count: usize,
        offset: usize,
    ) -> Result<Vec<Value>, LuaError> {
        if args_count == 0 {
            return Ok(Vec::new());
        }
        let mut args = Vec::with_capacity(args_count);
        for i in (0..args_count).rev() {
            args.push(self.peek(i + offset)?.clone());
        }
        if matches!(args.last(), Some(Value::Tuple(items)) if items.len() > 1) {
            if let Some(Value::Tuple(items)) = args.pop() {
                args.extend(items.iter().cloned());
            }
        }
        Ok(args)
    }

    /// ARGS instruction: binds the materialized argument list into the
    /// frame's local slots, packing the tail into a varargs tuple when the
    /// last symbol is `...`.
    pub(crate) fn exec_args(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        let numargs = self
            .peek(0)?
            .as_number()
            .and_then(|n| n.to_int())
            .ok_or_else(|| LuaError::internal("ARGS without argument count"))?
            as usize;
        let args = self.materialize_args(numargs, 1)?;

        let symbols: Vec<SymbolRef> = insn.symbols.to_vec();
        let last = symbols.len().checked_sub(1);
        for (i, sym) in symbols.iter().enumerate() {
            let is_varargs = Some(i) == last && sym.name() == VARARGS;
            if is_varargs {
                let rest: Vec<Value> = args
                    .iter()
                    .skip(i)
                    .map(|v| v.scalar())
                    .collect();
                self.assign_local(sym, Value::tuple(rest))?;
            } else if i < args.len() {
                self.assign_local(sym, args[i].scalar())?;
            } else {
                self.assign_local(sym, Value::Nil)?;
            }
        }
        Ok(())
    }

    /// CLOSURE instruction: captures the listed symbols' cells by reference
    /// and pushes the new function.
    pub(crate) fn exec_closure(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        let mut cells = Vec::with_capacity(insn.symbols.len());
        for sym in insn.symbols.iter() {
            let cell = match sym.kind {
                lunaria_types::SymbolKind::Local => self
                    .current_frame()?
                    .local_scope
                    .get(sym.index)
                    .cloned()
                    .ok_or_else(|| LuaError::internal("closure capture of missing local"))?,
                lunaria_types::SymbolKind::UpValue => self
                    .current_frame()?
                    .closure_scope
                    .cell(sym.index)
                    .cloned()
                    .ok_or_else(|| LuaError::internal("closure capture of missing upvalue"))?,
                _ => {
                    return Err(LuaError::internal(
                        "unsupported symbol type in closure capture",
                    ))
                }
            };
            cells.push(cell);
        }
        let scope = ClosureScope::new(insn.symbols.to_vec(), cells);
        let closure = lunaria_types::Closure::new(insn.num_val as usize, scope);
        self.shared
            .allocation
            .track(std::mem::size_of::<lunaria_types::Closure>());
        self.push(Value::Function(Rc::new(closure)));
        Ok(())
    }

    // ===== Small stack combinators =====

    pub(crate) fn exec_swap(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        let a = insn.num_val as usize;
        let b = insn.num_val2 as usize;
        let va = self.peek(a)?.clone();
        let vb = self.peek(b)?.clone();
        self.set_from_top(a, vb)?;
        self.set_from_top(b, va)?;
        Ok(())
    }

    pub(crate) fn exec_mk_tuple(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        let count = insn.num_val as usize;
        let len = self.value_stack.len();
        if count > len {
            return Err(LuaError::internal("MKTUPLE beyond stack depth"));
        }
        let values: Vec<Value> = self.value_stack.split_off(len - count);
        self.shared
            .allocation
            .track(values.len() * std::mem::size_of::<Value>());
        self.push(Value::tuple(values));
        Ok(())
    }

    pub(crate) fn exec_exp_tuple(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        let v = self.peek(insn.num_val as usize)?.clone();
        match v {
            Value::Tuple(items) => {
                for item in items.iter() {
                    self.push(item.clone());
                }
            }
            other => self.push(other),
        }
        Ok(())
    }

    /// Reads the value a store instruction assigns: the stack slot at
    /// `num_val`, tuple-indexed by `num_val2`.
    pub(crate) fn get_store_value(&self, insn: &Instruction) -> Result<Value, LuaError> {
        let v = self.peek(insn.num_val as usize)?;
        let tuple_idx = insn.num_val2 as usize;
        Ok(match v {
            Value::Tuple(items) => items.get(tuple_idx).cloned().unwrap_or(Value::Nil),
            other => {
                if tuple_idx == 0 {
                    other.clone()
                } else {
                    Value::Nil
                }
            }
        })
    }

    /// Returns a dead frame's local-scope array to the pool.
    pub(crate) fn recycle_frame(&mut self, mut frame: CallFrame) {
        let scope = std::mem::take(&mut frame.local_scope);
        self.pool.return_scope(scope);
    }
}
