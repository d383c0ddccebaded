//! Script: the embedding surface
//!
//! A script owns one chunk, a global table, the per-script registry, and
//! the main processor of its coroutine tree. All host entry points go
//! through here; nested calls made while the VM is running go through the
//! execution context handed to host callbacks instead.

use crate::bytecode::Chunk;
use crate::corelib;
use crate::coroutine::Coroutine;
use crate::debug::{Breakpoint, Debugger};
use crate::options::ScriptOptions;
use crate::processor::{Processor, ScriptShared};
use lunaria_types::{Closure, LuaError, Table, TableRef, Value};
use std::cell::RefCell;
use std::rc::Rc;

pub struct Script {
    chunk: Rc<Chunk>,
    globals: TableRef,
    shared: Rc<ScriptShared>,
    main: Rc<RefCell<Processor>>,
}

impl Script {
    /// Builds a script over a compiled chunk with default options. The core
    /// library (pcall, xpcall, error, next, coroutine) is installed into the
    /// fresh global table.
    pub fn new(chunk: Chunk) -> Self {
        Self::with_options(chunk, ScriptOptions::default())
    }

    pub fn with_options(chunk: Chunk, options: ScriptOptions) -> Self {
        let shared = Rc::new(ScriptShared::new(options));
        let globals: TableRef = Rc::new(RefCell::new(Table::new()));
        corelib::install(&globals);
        let chunk = Rc::new(chunk);
        let main = Processor::new_main(chunk.clone(), globals.clone(), shared.clone());
        Script {
            chunk,
            globals,
            shared,
            main,
        }
    }

    pub fn chunk(&self) -> &Rc<Chunk> {
        &self.chunk
    }

    pub fn options(&self) -> &ScriptOptions {
        &self.shared.options
    }

    pub fn globals(&self) -> &TableRef {
        &self.globals
    }

    /// The per-script registry table: keyed host state without process-wide
    /// globals.
    pub fn registry(&self) -> TableRef {
        self.shared.registry.clone()
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.globals.borrow().get_str(name)
    }

    pub fn set_global(&self, name: &str, value: Value) {
        self.globals.borrow_mut().set_str(name, value);
    }

    /// Bytes currently attributed to this script by the allocation tracker.
    pub fn allocated_bytes(&self) -> u64 {
        self.shared.allocation.current_bytes()
    }

    /// Calls a function value. When a coroutine is active the call belongs
    /// on that processor; a busy processor cannot be entered from the host
    /// side, so such calls must come through the execution context instead.
    pub fn call(&self, function: &Value, args: &[Value]) -> Result<Value, LuaError> {
        let top = self.shared.chain.borrow().last().cloned();
        if let Some(entry) = top {
            if let Some(active) = entry.proc.upgrade() {
                if !Rc::ptr_eq(&active, &self.main) {
                    return match active.try_borrow_mut() {
                        Ok(mut proc) => proc.call_from_host(function, args),
                        Err(_) => Err(LuaError::boundary(
                            "cannot call into a running coroutine from the host; \
                             use the execution context",
                        )),
                    };
                }
            }
        }
        self.main
            .try_borrow_mut()
            .map_err(|_| {
                LuaError::boundary(
                    "cannot re-enter a running script from the host; \
                     use the execution context",
                )
            })?
            .call_from_host(function, args)
    }

    /// Calls straight into a bytecode entry point.
    pub fn call_entry_point(&self, entry: usize, args: &[Value]) -> Result<Value, LuaError> {
        let function = Value::Function(Rc::new(Closure::plain(entry)));
        self.call(&function, args)
    }

    /// Creates a coroutine handle over a script function.
    pub fn create_coroutine(&self, function: &Value) -> Result<Value, LuaError> {
        self.main
            .try_borrow_mut()
            .map_err(|_| LuaError::boundary("cannot create a coroutine while the script runs"))?
            .create_coroutine(function)
    }

    /// Resolves a coroutine value back to its handle.
    pub fn coroutine(&self, handle: &Value) -> Result<Rc<Coroutine>, LuaError> {
        crate::coroutine::coroutine_handle(handle)
    }

    // ===== Debugger =====

    pub fn attach_debugger(&self, hook: Rc<RefCell<dyn Debugger>>) {
        self.shared.debug.borrow_mut().attached = Some(hook);
    }

    pub fn add_breakpoint(&self, breakpoint: Breakpoint) {
        self.shared.debug.borrow_mut().breakpoints.push(breakpoint);
    }

    pub fn clear_breakpoints(&self) {
        self.shared.debug.borrow_mut().breakpoints.clear();
    }
}
