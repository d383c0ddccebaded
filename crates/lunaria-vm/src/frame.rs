//! Call frames and the frame-local allocation pool

use lunaria_types::{new_cell, CallbackFunction, Cell, ClosureScope, SymbolRef, Value};
use std::collections::HashSet;

use crate::bytecode::SourceRef;

/// Activation record for one call. Lives on the processor's frame stack;
/// one is created per script or host call and recycled on return.
#[derive(Debug, Default)]
pub struct CallFrame {
    /// Index into the value stack where this frame's data begins. `None`
    /// for host-callback frames, which own no stack segment.
    pub base_pointer: Option<usize>,
    /// Instruction to continue at when this frame returns. `None` returns
    /// control to the host.
    pub return_address: Option<usize>,
    /// Upvalue cells captured by the executing closure.
    pub closure_scope: ClosureScope,
    /// Where the call was made from.
    pub calling_source: Option<SourceRef>,
    /// Host callback occupying this frame, when the callee was not script
    /// code.
    pub callback: Option<CallbackFunction>,
    /// Handler that absorbs faults unwinding through this frame.
    pub error_handler: Option<CallbackFunction>,
    /// Invoked with the frame's return value before control moves on.
    pub continuation: Option<CallbackFunction>,
    /// Message decorator consulted before the stack unwinds past this frame.
    pub unwind_decorator: Option<Value>,
    /// Local variable cells.
    pub local_scope: Vec<Cell>,
    /// Symbols for the locals, for traceback and name lookup.
    pub debug_symbols: Vec<SymbolRef>,
    /// Stack of open blocks; each entry lists the to-be-closed symbols
    /// declared in that block.
    pub blocks_to_close: Vec<Vec<SymbolRef>>,
    /// Local slot indices currently pending closure.
    pub to_be_closed: HashSet<usize>,
    /// Entry frame: unwinding stops here and the fault goes to the host.
    pub is_entry_point: bool,
    /// The frame was reused by tail-call optimization.
    pub is_tail_call: bool,
    /// Method-style call (`a:b()` sugar).
    pub is_method_call: bool,
}

impl CallFrame {
    /// Whether the frame has obligations that make it ineligible for
    /// tail-call frame reuse.
    pub fn has_pending_obligations(&self) -> bool {
        self.callback.is_some()
            || self.continuation.is_some()
            || self.error_handler.is_some()
            || self.unwind_decorator.is_some()
            || self.blocks_to_close.iter().any(|b| !b.is_empty())
    }
}

/// Free list for local-scope arrays. Frames churn on every call; reusing
/// the backing vectors keeps the hot path allocation-free.
#[derive(Debug, Default)]
pub struct FramePool {
    scopes: Vec<Vec<Cell>>,
    handler_args: Vec<Vec<Value>>,
}

impl FramePool {
    const MAX_POOLED: usize = 32;

    /// A local-scope array of `len` fresh nil cells.
    pub fn rent_scope(&mut self, len: usize) -> Vec<Cell> {
        let mut scope = self.scopes.pop().unwrap_or_default();
        scope.clear();
        scope.reserve(len);
        for _ in 0..len {
            scope.push(new_cell(Value::Nil));
        }
        scope
    }

    pub fn return_scope(&mut self, mut scope: Vec<Cell>) {
        if self.scopes.len() < Self::MAX_POOLED {
            scope.clear();
            self.scopes.push(scope);
        }
    }

    /// A small argument buffer for handler/metamethod invocations.
    pub fn rent_args(&mut self) -> Vec<Value> {
        self.handler_args.pop().unwrap_or_default()
    }

    pub fn return_args(&mut self, mut args: Vec<Value>) {
        if self.handler_args.len() < Self::MAX_POOLED {
            args.clear();
            self.handler_args.push(args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_scopes_come_back_clean() {
        let mut pool = FramePool::default();
        let mut scope = pool.rent_scope(3);
        assert_eq!(scope.len(), 3);
        *scope[0].borrow_mut() = Value::int(9);
        pool.return_scope(scope);

        let scope = pool.rent_scope(2);
        assert_eq!(scope.len(), 2);
        assert!(scope.iter().all(|c| c.borrow().is_nil()));
    }

    #[test]
    fn obligations_block_tail_calls() {
        let mut frame = CallFrame::default();
        assert!(!frame.has_pending_obligations());
        frame.blocks_to_close.push(vec![SymbolRef::local("x", 0).closing()]);
        assert!(frame.has_pending_obligations());
    }
}
