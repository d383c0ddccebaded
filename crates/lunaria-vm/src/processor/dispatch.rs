//! The instruction dispatch loop
//!
//! A flat match over the opcode enum. Sandbox counters and the debugger are
//! consulted before each instruction; the memory ceiling is checked on a
//! rate-limited cadence. Instructions operating through metamethods return a
//! [`Flow`] so a metamethod call, tail call, or yield can redirect control.

use super::{Flow, LoopResult, Processor};
use crate::bytecode::{Instruction, OpCode};
use crate::coroutine::CoroutineState;
use crate::sandbox::violation;
use lunaria_types::{LuaError, SandboxViolationKind, SymbolKind, Table, Value};
use std::rc::Rc;
use tracing::debug;

/// How often (in instructions) the memory ceiling is consulted.
const MEMORY_CHECK_INTERVAL: u64 = 1024;

impl Processor {
    /// Executes instructions until a host return, a yield request, or a
    /// fault. `executed` persists across fault recoveries so sandbox
    /// accounting covers the whole monitored run.
    pub(crate) fn run_loop(
        &mut self,
        mut ip: usize,
        executed: &mut u64,
    ) -> Result<LoopResult, LuaError> {
        let chunk = Rc::clone(&self.chunk);
        let sandbox = self.shared.options.sandbox.clone();
        let auto_yield_budget = self.shared.options.auto_yield_instructions;
        let can_auto_yield =
            auto_yield_budget > 0 && self.can_yield && self.state != CoroutineState::Main;

        loop {
            self.last_ip = ip;

            if self.shared.debug.borrow().is_attached() {
                self.listen_debugger(ip, chunk.code.get(ip));
            }

            *executed += 1;

            if can_auto_yield && *executed > auto_yield_budget {
                self.saved_ip = Some(ip);
                return Ok(LoopResult::Yield(Value::forced_yield_request()));
            }

            if sandbox.has_instruction_limit() && *executed > sandbox.max_instructions() {
                let granted = sandbox
                    .on_instruction_limit
                    .as_ref()
                    .is_some_and(|cb| cb(*executed as i64));
                if !granted {
                    debug!(executed = *executed, "instruction ceiling tripped");
                    return Err(violation(
                        SandboxViolationKind::Instructions,
                        sandbox.max_instructions(),
                        *executed,
                    ));
                }
                // callback granted continuation
                *executed = 0;
            }

            if sandbox.has_memory_limit() && (*executed & (MEMORY_CHECK_INTERVAL - 1)) == 0 {
                let current = self.shared.allocation.current_bytes();
                if current > sandbox.max_memory_bytes() {
                    let granted = sandbox
                        .on_memory_limit
                        .as_ref()
                        .is_some_and(|cb| cb(current as i64));
                    if !granted {
                        debug!(bytes = current, "memory ceiling tripped");
                        return Err(violation(
                            SandboxViolationKind::Memory,
                            sandbox.max_memory_bytes(),
                            current,
                        ));
                    }
                }
            }

            let insn = chunk
                .code
                .get(ip)
                .ok_or_else(|| LuaError::internal(format!("instruction pointer {ip} out of range")))?;
            ip += 1;

            match insn.op {
                OpCode::Nop | OpCode::Debug | OpCode::Meta => {}

                // ===== Stack =====
                OpCode::Pop => self.remove_last(insn.num_val as usize)?,
                OpCode::Copy => {
                    let v = self.peek(insn.num_val as usize)?.clone();
                    self.push(v);
                }
                OpCode::Swap => self.exec_swap(insn)?,
                OpCode::Literal => self.push(insn.value.clone().unwrap_or(Value::Nil)),
                OpCode::Scalar => {
                    let v = self.pop()?;
                    self.push(v.scalar());
                }
                OpCode::ToBool => {
                    let v = self.pop()?;
                    self.push(Value::Boolean(v.scalar().is_truthy()));
                }
                OpCode::ToNum => self.exec_to_num()?,
                OpCode::MkTuple => self.exec_mk_tuple(insn)?,
                OpCode::ExpTuple => self.exec_exp_tuple(insn)?,

                // ===== Arithmetic & friends =====
                OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::FloorDiv
                | OpCode::Power => match self.exec_binary_arith(insn, ip)? {
                    Flow::Next(next) => ip = next,
                    flow => return self.finish_flow(flow),
                },
                OpCode::Neg => match self.exec_neg(ip)? {
                    Flow::Next(next) => ip = next,
                    flow => return self.finish_flow(flow),
                },
                OpCode::Concat => match self.exec_concat(ip)? {
                    Flow::Next(next) => ip = next,
                    flow => return self.finish_flow(flow),
                },
                OpCode::Len => match self.exec_len(ip)? {
                    Flow::Next(next) => ip = next,
                    flow => return self.finish_flow(flow),
                },
                OpCode::Not => self.exec_not()?,
                OpCode::CNot => self.exec_cnot()?,

                // ===== Bitwise =====
                OpCode::BitAnd
                | OpCode::BitOr
                | OpCode::BitXor
                | OpCode::ShiftLeft
                | OpCode::ShiftRight => match self.exec_bitwise(insn, ip)? {
                    Flow::Next(next) => ip = next,
                    flow => return self.finish_flow(flow),
                },
                OpCode::BitNot => match self.exec_bit_not(ip)? {
                    Flow::Next(next) => ip = next,
                    flow => return self.finish_flow(flow),
                },

                // ===== Comparison =====
                OpCode::Eq => match self.exec_eq(ip)? {
                    Flow::Next(next) => ip = next,
                    flow => return self.finish_flow(flow),
                },
                OpCode::Less => match self.exec_less(ip)? {
                    Flow::Next(next) => ip = next,
                    flow => return self.finish_flow(flow),
                },
                OpCode::LessEq => match self.exec_less_eq(ip)? {
                    Flow::Next(next) => ip = next,
                    flow => return self.finish_flow(flow),
                },

                // ===== Jumps =====
                OpCode::Jump => ip = insn.num_val as usize,
                OpCode::Jf => ip = self.jump_bool(insn, false, ip)?,
                OpCode::JNil => {
                    let v = self.pop()?.scalar();
                    if v.is_nil() {
                        ip = insn.num_val as usize;
                    }
                }
                OpCode::JtOrPop | OpCode::JfOrPop => ip = self.exec_short_circuit(insn, ip)?,
                OpCode::JFor => ip = self.exec_jfor(insn, ip)?,
                OpCode::Incr => self.exec_incr(insn)?,

                // ===== Tables =====
                OpCode::NewTable => {
                    let table = Value::table(Table::new());
                    self.shared
                        .allocation
                        .track(std::mem::size_of::<Table>());
                    self.push(table);
                }
                OpCode::TblInitN => self.exec_tbl_init_named(insn)?,
                OpCode::TblInitI => self.exec_tbl_init_indexed(insn)?,

                // ===== Indexing =====
                OpCode::Index | OpCode::IndexN | OpCode::IndexL => {
                    match self.exec_index(insn, ip)? {
                        Flow::Next(next) => ip = next,
                        flow => return self.finish_flow(flow),
                    }
                }
                OpCode::IndexSet | OpCode::IndexSetN | OpCode::IndexSetL => {
                    match self.exec_index_set(insn, ip)? {
                        Flow::Next(next) => ip = next,
                        flow => return self.finish_flow(flow),
                    }
                }

                // ===== Calls =====
                OpCode::Call | OpCode::ThisCall => {
                    let flow = self.internal_exec_call(
                        insn.num_val as usize,
                        Some(ip),
                        None,
                        None,
                        insn.op == OpCode::ThisCall,
                        insn.name.clone(),
                        None,
                    )?;
                    match flow {
                        Flow::Next(next) => ip = next,
                        flow => return self.finish_flow(flow),
                    }
                }
                OpCode::Ret => match self.exec_ret(insn)? {
                    Flow::Next(next) => ip = next,
                    flow => return self.finish_flow(flow),
                },
                OpCode::Args => self.exec_args(insn)?,
                OpCode::BeginFn => self.exec_begin_fn(insn)?,
                OpCode::Closure => self.exec_closure(insn)?,

                // ===== Iterator protocol =====
                OpCode::IterPrep => self.exec_iter_prep()?,
                OpCode::IterUpd => self.exec_iter_upd()?,

                // ===== Scope & resource blocks =====
                OpCode::Enter => self.exec_enter(insn)?,
                OpCode::Leave | OpCode::Exit => self.exec_leave(insn)?,
                OpCode::Clean => self.clear_block_data(insn)?,
                OpCode::Local => {
                    let sym = Self::require_symbol(insn)?;
                    if sym.kind == SymbolKind::Local {
                        let cell = self
                            .current_frame()?
                            .local_scope
                            .get(sym.index)
                            .cloned()
                            .ok_or_else(|| LuaError::internal("local slot out of range"))?;
                        let v = cell.borrow().clone();
                        self.push(v);
                    } else {
                        // globals and _ENV resolve through the generic path
                        let v = self.get_symbol(sym)?;
                        self.push(v);
                    }
                }
                OpCode::UpValue => {
                    let sym = Self::require_symbol(insn)?;
                    let cell = self
                        .current_frame()?
                        .closure_scope
                        .cell(sym.index)
                        .cloned()
                        .ok_or_else(|| LuaError::internal("upvalue slot out of range"))?;
                    let v = cell.borrow().clone();
                    self.push(v);
                }
                OpCode::StoreLcl => self.exec_store_local(insn)?,
                OpCode::StoreUpv => self.exec_store_upvalue(insn)?,

                OpCode::Invalid => {
                    return Err(LuaError::internal(format!(
                        "invalid opcode at {}",
                        ip - 1
                    )))
                }
            }
        }
    }

    /// Terminates the loop for a non-`Next` flow: pops the pending result or
    /// yield request off the value stack.
    fn finish_flow(&mut self, flow: Flow) -> Result<LoopResult, LuaError> {
        match flow {
            Flow::ReturnHost => Ok(LoopResult::ReturnHost(self.pop()?)),
            Flow::Suspend => Ok(LoopResult::Yield(self.pop()?.scalar())),
            Flow::Next(_) => Err(LuaError::internal("finish_flow on a continuing flow")),
        }
    }

    pub(crate) fn require_symbol(insn: &Instruction) -> Result<&lunaria_types::SymbolRef, LuaError> {
        insn.symbol
            .as_ref()
            .ok_or_else(|| LuaError::internal("instruction is missing its symbol operand"))
    }

    /// Debugger gate, run before each instruction when attached.
    fn listen_debugger(&mut self, ip: usize, insn: Option<&Instruction>) {
        let source = insn.and_then(|i| i.source.as_ref());
        let (should_pause, hook) = {
            let dbg = self.shared.debug.borrow();
            (dbg.should_pause(ip, source), dbg.attached.clone())
        };
        if should_pause {
            if let Some(hook) = hook {
                let mode = hook.borrow_mut().on_pause(ip, source);
                self.shared.debug.borrow_mut().mode = mode;
            }
        }
    }
}
