//! The processor: one VM instance
//!
//! A processor owns a value stack and a call-frame stack and executes the
//! dispatch loop. The main processor is created with its script; coroutines
//! are child processors sharing the chunk, globals, debug context, and
//! sandbox state, with weak links back to their parent. Only the processor
//! on top of the scheduler's active chain may run.

mod arith;
mod calls;
mod coroutines;
mod dispatch;
mod index;
mod iter;
mod scope;
mod unwind;

use crate::bytecode::Chunk;
use crate::coroutine::{coroutine_handle, Coroutine, CoroutineState};
use crate::debug::DebugContext;
use crate::frame::{CallFrame, FramePool};
use crate::options::ScriptOptions;
use crate::sandbox::AllocationTracker;
use lunaria_types::{
    adjust_tuple, metamethods, HostContext, LuaError, Table, TableRef, Value,
};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::thread::ThreadId;
use tracing::{debug, trace};

/// State shared by every processor of one script: options, the sandbox
/// allocation tracker, the debugger context, the per-script registry, and
/// the scheduler's active chain. Keyed per script instance, never global.
pub(crate) struct ScriptShared {
    pub options: ScriptOptions,
    pub allocation: AllocationTracker,
    pub debug: RefCell<DebugContext>,
    pub chain: RefCell<Vec<ChainEntry>>,
    pub registry: TableRef,
    next_id: Cell<u64>,
}

#[derive(Clone)]
pub(crate) struct ChainEntry {
    pub id: u64,
    pub proc: Weak<RefCell<Processor>>,
}

impl ScriptShared {
    pub fn new(options: ScriptOptions) -> Self {
        ScriptShared {
            options,
            allocation: AllocationTracker::new(),
            debug: RefCell::new(DebugContext::default()),
            chain: RefCell::new(Vec::new()),
            registry: Rc::new(RefCell::new(Table::new())),
            next_id: Cell::new(0),
        }
    }

    fn allocate_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

/// Where control goes after one dispatch step.
pub(crate) enum Flow {
    /// Continue at this instruction pointer.
    Next(usize),
    /// A yield request is on top of the value stack.
    Suspend,
    /// The entry frame returned; the result is on top of the value stack.
    ReturnHost,
}

/// How one inner run of the dispatch loop ended.
pub(crate) enum LoopResult {
    ReturnHost(Value),
    Yield(Value),
}

/// Bound on metamethod chasing (`__index` chains and the like).
pub(crate) const MAX_META_CHAIN: usize = 100;

pub struct Processor {
    id: u64,
    pub(crate) state: CoroutineState,
    pub(crate) value_stack: Vec<Value>,
    pub(crate) exec_stack: Vec<CallFrame>,
    pub(crate) chunk: Rc<Chunk>,
    pub(crate) globals: TableRef,
    pub(crate) shared: Rc<ScriptShared>,
    parent: Option<Weak<RefCell<Processor>>>,
    self_ref: Weak<RefCell<Processor>>,
    /// Handle wrapping this processor, when it backs a coroutine.
    pub(crate) associated: Option<Weak<Coroutine>>,
    pub(crate) can_yield: bool,
    pub(crate) saved_ip: Option<usize>,
    pub(crate) last_ip: usize,
    pub(crate) last_close_error: Option<Value>,
    owning_thread: Option<ThreadId>,
    execution_nesting: u32,
    pub(crate) pool: FramePool,
}

impl Processor {
    /// Creates the root processor of a script.
    pub(crate) fn new_main(
        chunk: Rc<Chunk>,
        globals: TableRef,
        shared: Rc<ScriptShared>,
    ) -> Rc<RefCell<Processor>> {
        let id = shared.allocate_id();
        Rc::new_cyclic(|weak| {
            RefCell::new(Processor {
                id,
                state: CoroutineState::Main,
                value_stack: Vec::with_capacity(256),
                exec_stack: Vec::with_capacity(64),
                chunk,
                globals,
                shared,
                parent: None,
                self_ref: weak.clone(),
                associated: None,
                can_yield: true,
                saved_ip: None,
                last_ip: 0,
                last_close_error: None,
                owning_thread: None,
                execution_nesting: 0,
                pool: FramePool::default(),
            })
        })
    }

    /// Creates a child processor for a coroutine. The closure is parked at
    /// the bottom of the child's private value stack until the first resume.
    pub(crate) fn new_child(&self, closure: Value) -> Rc<RefCell<Processor>> {
        let id = self.shared.allocate_id();
        let child = Rc::new_cyclic(|weak| {
            RefCell::new(Processor {
                id,
                state: CoroutineState::NotStarted,
                value_stack: Vec::with_capacity(64),
                exec_stack: Vec::with_capacity(16),
                chunk: self.chunk.clone(),
                globals: self.globals.clone(),
                shared: self.shared.clone(),
                parent: Some(self.self_ref.clone()),
                self_ref: weak.clone(),
                associated: None,
                can_yield: true,
                saved_ip: None,
                last_ip: 0,
                last_close_error: None,
                owning_thread: None,
                execution_nesting: 0,
                pool: FramePool::default(),
            })
        });
        child.borrow_mut().value_stack.push(closure);
        child
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> CoroutineState {
        self.state
    }

    /// Validates thread affinity and records nested execution entry.
    pub(crate) fn enter(&mut self) -> Result<(), LuaError> {
        let thread = std::thread::current().id();
        if self.shared.options.check_thread_access {
            if let Some(owner) = self.owning_thread {
                if owner != thread {
                    return Err(LuaError::boundary(
                        "cannot enter the same processor from two different threads",
                    ));
                }
            }
        }
        self.owning_thread = Some(thread);
        self.execution_nesting += 1;
        if self.parent.is_some() {
            self.shared.chain.borrow_mut().push(ChainEntry {
                id: self.id,
                proc: self.self_ref.clone(),
            });
        }
        Ok(())
    }

    /// Unwinds processor bookkeeping; signals the debugger when the
    /// outermost nesting level finishes.
    pub(crate) fn leave(&mut self) {
        self.execution_nesting = self.execution_nesting.saturating_sub(1);
        self.owning_thread = None;
        if self.parent.is_some() {
            self.shared.chain.borrow_mut().pop();
        }
        if self.execution_nesting == 0 {
            let hook = self.shared.debug.borrow().attached.clone();
            if let Some(hook) = hook {
                hook.borrow_mut().on_execution_ended();
            }
        }
    }

    // ===== Host boundary =====

    /// Invokes a function from the host, running the VM until the call
    /// completes or faults. Yields are not allowed across this boundary.
    pub(crate) fn call_from_host(
        &mut self,
        function: &Value,
        args: &[Value],
    ) -> Result<Value, LuaError> {
        trace!(kind = function.type_name(), "host call");
        self.enter()?;
        let saved_can_yield = std::mem::replace(&mut self.can_yield, false);
        let result = self.do_call(function, args);
        self.can_yield = saved_can_yield;
        self.leave();
        result
    }

    fn do_call(&mut self, function: &Value, args: &[Value]) -> Result<Value, LuaError> {
        match function {
            Value::Function(_) => {
                let entry = self.push_host_frame(Some(function.clone()), args)?;
                self.processing_loop(entry)
            }
            Value::Callback(cb) => {
                let cb = cb.clone();
                let adjusted = adjust_tuple(args.to_vec());
                let ret = {
                    let mut ctx = ExecutionContext { proc: self };
                    cb.invoke(&mut ctx, &adjusted, false)?
                };
                self.resolve_host_request(ret)
            }
            other => match self.get_metamethod(other, metamethods::CALL) {
                Some(meta) => {
                    let mut meta_args = Vec::with_capacity(args.len() + 1);
                    meta_args.push(other.clone());
                    meta_args.extend_from_slice(args);
                    self.do_call(&meta, &meta_args)
                }
                None => Err(LuaError::attempt_to_call(other, None)),
            },
        }
    }

    /// Interprets a request value returned by a directly-invoked callback:
    /// tail-call requests re-enter the call protocol, yields are rejected.
    fn resolve_host_request(&mut self, ret: Value) -> Result<Value, LuaError> {
        match ret {
            Value::TailCall(tcd) => {
                self.push(tcd.function.clone());
                for arg in &tcd.args {
                    self.push(arg.clone());
                }
                let flow = self.internal_exec_call(
                    tcd.args.len(),
                    None,
                    tcd.error_handler.clone(),
                    tcd.continuation.clone(),
                    false,
                    None,
                    tcd.unwind_decorator.clone(),
                )?;
                match flow {
                    Flow::Next(ip) => self.processing_loop(ip),
                    Flow::ReturnHost => self.pop(),
                    Flow::Suspend => {
                        let _ = self.pop()?;
                        Err(LuaError::cannot_yield_callback())
                    }
                }
            }
            Value::Yield(_) => {
                if self.state == CoroutineState::Main {
                    Err(LuaError::cannot_yield_main())
                } else {
                    Err(LuaError::cannot_yield_callback())
                }
            }
            plain => Ok(plain),
        }
    }

    /// Synchronous nested call used by metamethod dispatch, to-be-closed
    /// cleanup, and host callbacks reaching back in through their context.
    pub(crate) fn call_internal(
        &mut self,
        function: &Value,
        args: &[Value],
    ) -> Result<Value, LuaError> {
        let saved_can_yield = std::mem::replace(&mut self.can_yield, false);
        let result = self.do_call(function, args);
        self.can_yield = saved_can_yield;
        result
    }

    /// Pushes everything a host-to-script transition needs: the function
    /// (unless already parked on the stack), adjusted arguments, the
    /// argument count, and an entry frame. Returns the entry point.
    pub(crate) fn push_host_frame(
        &mut self,
        function: Option<Value>,
        args: &[Value],
    ) -> Result<usize, LuaError> {
        let function = match function {
            Some(f) => {
                self.push(f.clone());
                f
            }
            None => self.peek(0)?.clone(),
        };

        let closure = match &function {
            Value::Function(c) => c.clone(),
            other => return Err(LuaError::attempt_to_call(other, None)),
        };

        let args = adjust_tuple(args.to_vec());
        let argc = args.len();
        for arg in args {
            self.push(arg);
        }
        self.push(Value::int(argc as i64));

        self.exec_stack.push(CallFrame {
            base_pointer: Some(self.value_stack.len()),
            return_address: None,
            closure_scope: closure.scope().clone(),
            is_entry_point: true,
            ..CallFrame::default()
        });

        Ok(closure.entry_point())
    }

    /// Runs the dispatch loop from `entry`, restarting after recovered
    /// faults, until a host return or a yield request.
    pub(crate) fn processing_loop(&mut self, entry: usize) -> Result<Value, LuaError> {
        let mut ip = entry;
        let mut executed: u64 = 0;
        loop {
            match self.run_loop(ip, &mut executed) {
                Ok(LoopResult::ReturnHost(value)) => return Ok(value),
                Ok(LoopResult::Yield(request)) => {
                    return if self.can_yield {
                        Ok(request)
                    } else if self.state == CoroutineState::Main {
                        Err(LuaError::cannot_yield_main())
                    } else {
                        Err(LuaError::cannot_yield_callback())
                    };
                }
                Err(fault) => match self.handle_fault(fault)? {
                    unwind::Unwound::Resumed(resume_ip) => ip = resume_ip,
                    unwind::Unwound::ReturnedToHost(value) => return Ok(value),
                },
            }
        }
    }

    // ===== Value stack =====

    #[inline]
    pub(crate) fn push(&mut self, value: Value) {
        self.value_stack.push(value);
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Result<Value, LuaError> {
        self.value_stack
            .pop()
            .ok_or_else(|| LuaError::internal("value stack underflow"))
    }

    /// The value `offset` slots from the top (0 = top).
    #[inline]
    pub(crate) fn peek(&self, offset: usize) -> Result<&Value, LuaError> {
        let len = self.value_stack.len();
        len.checked_sub(offset + 1)
            .and_then(|idx| self.value_stack.get(idx))
            .ok_or_else(|| LuaError::internal("value stack underflow"))
    }

    #[inline]
    pub(crate) fn set_from_top(&mut self, offset: usize, value: Value) -> Result<(), LuaError> {
        let len = self.value_stack.len();
        let idx = len
            .checked_sub(offset + 1)
            .ok_or_else(|| LuaError::internal("value stack underflow"))?;
        self.value_stack[idx] = value;
        Ok(())
    }

    #[inline]
    pub(crate) fn remove_last(&mut self, count: usize) -> Result<(), LuaError> {
        let len = self.value_stack.len();
        if count > len {
            return Err(LuaError::internal("value stack underflow"));
        }
        self.value_stack.truncate(len - count);
        Ok(())
    }

    // ===== Frame stack =====

    pub(crate) fn current_frame(&self) -> Result<&CallFrame, LuaError> {
        self.exec_stack
            .last()
            .ok_or_else(|| LuaError::internal("frame stack underflow"))
    }

    pub(crate) fn current_frame_mut(&mut self) -> Result<&mut CallFrame, LuaError> {
        self.exec_stack
            .last_mut()
            .ok_or_else(|| LuaError::internal("frame stack underflow"))
    }

    /// Pops the top frame and crops the value stack back to its base.
    /// Frame base pointers only increase down the call chain; a base beyond
    /// the live stack is an invariant breach.
    pub(crate) fn pop_to_base_pointer(&mut self) -> Result<CallFrame, LuaError> {
        let frame = self
            .exec_stack
            .pop()
            .ok_or_else(|| LuaError::internal("frame stack underflow"))?;
        if let Some(base) = frame.base_pointer {
            if base > self.value_stack.len() {
                return Err(LuaError::internal("stack guard violation"));
            }
            self.value_stack.truncate(base);
        }
        Ok(frame)
    }

    // ===== Metamethod lookup =====

    pub(crate) fn get_metatable(&self, value: &Value) -> Option<TableRef> {
        match value {
            Value::Table(t) => t.borrow().metatable().cloned(),
            _ => None,
        }
    }

    /// Metatable-only metamethod probe.
    pub(crate) fn get_metamethod_raw(&self, value: &Value, event: &str) -> Option<Value> {
        let meta = self.get_metatable(value)?;
        let handler = meta.borrow().get_str(event);
        if handler.is_nil() {
            None
        } else {
            Some(handler)
        }
    }

    /// Full metamethod probe: metatable first, then the userdata
    /// descriptor-level hook.
    pub(crate) fn get_metamethod(&self, value: &Value, event: &str) -> Option<Value> {
        if let Some(handler) = self.get_metamethod_raw(value, event) {
            return Some(handler);
        }
        match value {
            Value::UserData(descriptor) => descriptor.metamethod(event),
            _ => None,
        }
    }

    // ===== Coroutine plumbing =====

    /// Creates a coroutine over a script function and returns its handle.
    pub(crate) fn create_coroutine(&mut self, function: &Value) -> Result<Value, LuaError> {
        if !matches!(function, Value::Function(_)) {
            return Err(LuaError::runtime(format!(
                "cannot create a coroutine over a {} value",
                function.type_name()
            )));
        }
        let child = self.new_child(function.clone());
        let handle = Rc::new(Coroutine::new(child.clone()));
        child.borrow_mut().associated = Some(Rc::downgrade(&handle));
        debug!(coroutine = handle.id(), "coroutine created");
        Ok(Value::Coroutine(handle as Rc<dyn Any>))
    }
}

/// Execution context handed to host callbacks: the narrow window through
/// which library code reaches the running processor.
pub struct ExecutionContext<'a> {
    pub(crate) proc: &'a mut Processor,
}

impl HostContext for ExecutionContext<'_> {
    fn call(&mut self, function: &Value, args: &[Value]) -> Result<Value, LuaError> {
        self.proc.call_internal(function, args)
    }

    fn create_coroutine(&mut self, function: &Value) -> Result<Value, LuaError> {
        self.proc.create_coroutine(function)
    }

    fn resume_coroutine(&mut self, handle: &Value, args: &[Value]) -> Result<Value, LuaError> {
        coroutine_handle(handle)?.resume(args)
    }

    fn close_coroutine(&mut self, handle: &Value) -> Result<Value, LuaError> {
        coroutine_handle(handle)?.close()
    }

    fn coroutine_status(&self, handle: &Value) -> Result<&'static str, LuaError> {
        Ok(coroutine_handle(handle)?.status(self.proc.id))
    }

    fn current_coroutine(&self) -> Option<Value> {
        self.proc
            .associated
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|handle| Value::Coroutine(handle as Rc<dyn Any>))
    }

    fn can_yield(&self) -> bool {
        self.proc.can_yield
    }

    fn metamethod(&self, value: &Value, name: &str) -> Option<Value> {
        self.proc.get_metamethod(value, name)
    }
}
