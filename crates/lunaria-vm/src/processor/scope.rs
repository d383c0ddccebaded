//! Local scope, upvalues, and the to-be-closed lifecycle
//!
//! Locals live in shared cells so closures capture them by reference. Block
//! entry records which slots are pending closure; block exit, function
//! return, and fault unwinding close them in reverse declaration order,
//! exactly once per assigned value.

use super::Processor;
use crate::bytecode::Instruction;
use crate::frame::CallFrame;
use lunaria_types::{metamethods, new_cell, LuaError, SymbolKind, SymbolRef, Value};

impl Processor {
    /// BEGINFN: builds the frame's local scope (pooled) and seeds the root
    /// block with the function-level to-be-closed symbols.
    pub(crate) fn exec_begin_fn(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        let slots = insn.num_val.max(0) as usize;
        let scope = self.pool.rent_scope(slots);
        let old_scope;
        {
            let frame = self.current_frame_mut()?;
            old_scope = std::mem::replace(&mut frame.local_scope, scope);
            frame.debug_symbols = insn.symbols.to_vec();
            frame.blocks_to_close.clear();
            frame.to_be_closed.clear();

            if insn.num_val2 >= 0 {
                let root_last = insn.num_val2 as usize;
                let root: Vec<SymbolRef> = insn
                    .symbols
                    .iter()
                    .filter(|s| s.is_to_be_closed() && s.index <= root_last)
                    .cloned()
                    .collect();
                if !root.is_empty() {
                    for sym in &root {
                        frame.to_be_closed.insert(sym.index);
                    }
                    frame.blocks_to_close.push(root);
                }
            }
        }
        self.pool.return_scope(old_scope);
        Ok(())
    }

    /// ENTER: opens a block, recording its to-be-closed symbols.
    pub(crate) fn exec_enter(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        self.clear_block_data(insn)?;
        let closers: Vec<SymbolRef> = insn
            .symbols
            .iter()
            .filter(|s| s.is_to_be_closed())
            .cloned()
            .collect();
        let frame = self.current_frame_mut()?;
        for sym in &closers {
            frame.to_be_closed.insert(sym.index);
        }
        frame.blocks_to_close.push(closers);
        Ok(())
    }

    /// LEAVE / EXIT: closes the innermost block in reverse declaration
    /// order, then resets the block's local slots.
    pub(crate) fn exec_leave(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        let frame_idx = self
            .exec_stack
            .len()
            .checked_sub(1)
            .ok_or_else(|| LuaError::internal("LEAVE with no frame"))?;
        self.close_current_block_at(frame_idx, &Value::Nil)?;
        self.clear_block_data(insn)
    }

    /// CLEAN: closes any listed symbols early and resets the slot range to
    /// fresh cells, so closures created in the next loop iteration capture
    /// new variables.
    pub(crate) fn clear_block_data(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        if !insn.symbols.is_empty() {
            let frame_idx = self
                .exec_stack
                .len()
                .checked_sub(1)
                .ok_or_else(|| LuaError::internal("CLEAN with no frame"))?;
            let symbols: Vec<SymbolRef> = insn.symbols.to_vec();
            self.close_symbols_subset_at(frame_idx, &symbols, &Value::Nil)?;
        }

        let from = insn.num_val;
        let to = insn.num_val2;
        if from >= 0 && to >= from {
            let frame = self.current_frame_mut()?;
            for i in from as usize..=to as usize {
                if let Some(slot) = frame.local_scope.get_mut(i) {
                    *slot = new_cell(Value::Nil);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn exec_store_local(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        let value = self.get_store_value(insn)?;
        let sym = Self::require_symbol(insn)?.clone();
        match sym.kind {
            SymbolKind::Local => self.assign_local(&sym, value),
            _ => self.assign_symbol(&sym, value),
        }
    }

    pub(crate) fn exec_store_upvalue(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        let value = self.get_store_value(insn)?;
        let sym = Self::require_symbol(insn)?;
        let frame = self.current_frame()?;
        if !frame.closure_scope.set(sym.index, value) {
            return Err(LuaError::internal("upvalue store out of range"));
        }
        Ok(())
    }

    /// Stores into a local slot. A slot pending closure first validates the
    /// incoming value exposes `__close` (nil and false are exempt), then
    /// closes the previous value.
    pub(crate) fn assign_local(&mut self, sym: &SymbolRef, value: Value) -> Result<(), LuaError> {
        let frame_idx = self
            .exec_stack
            .len()
            .checked_sub(1)
            .ok_or_else(|| LuaError::internal("local store with no frame"))?;

        let pending_close = self.exec_stack[frame_idx].to_be_closed.contains(&sym.index);
        if pending_close {
            self.ensure_closable(&value)?;
            let cell = self.exec_stack[frame_idx]
                .local_scope
                .get(sym.index)
                .cloned()
                .ok_or_else(|| LuaError::internal("local slot out of range"))?;
            let previous = cell.borrow().clone();
            if !previous.is_nil() {
                self.close_value(&previous, &Value::Nil)?;
            }
        }

        let cell = self.exec_stack[frame_idx]
            .local_scope
            .get(sym.index)
            .cloned()
            .ok_or_else(|| LuaError::internal("local slot out of range"))?;
        *cell.borrow_mut() = value;
        Ok(())
    }

    // ===== To-be-closed machinery =====

    fn ignores_close(value: &Value) -> bool {
        matches!(value, Value::Nil | Value::Void | Value::Boolean(false))
    }

    /// Fails fast when a value assigned to a to-be-closed slot has no
    /// `__close` metamethod.
    pub(crate) fn ensure_closable(&self, value: &Value) -> Result<(), LuaError> {
        let candidate = value.scalar();
        if Self::ignores_close(&candidate) {
            return Ok(());
        }
        match self.get_metamethod_raw(&candidate, metamethods::CLOSE) {
            Some(_) => Ok(()),
            None => Err(LuaError::close_metamethod_expected(&candidate)),
        }
    }

    /// Invokes a value's `__close` with `(value, error-or-nil)`.
    pub(crate) fn close_value(&mut self, value: &Value, error: &Value) -> Result<(), LuaError> {
        let scalar = value.scalar();
        if Self::ignores_close(&scalar) {
            return Ok(());
        }
        let handler = self
            .get_metamethod_raw(&scalar, metamethods::CLOSE)
            .ok_or_else(|| LuaError::close_metamethod_expected(&scalar))?;
        self.call_internal(&handler, &[scalar, error.clone()])?;
        Ok(())
    }

    /// Closes one symbol's slot if it holds a live value, then nils it.
    fn close_slot_at(
        &mut self,
        frame_idx: usize,
        sym: &SymbolRef,
        error: &Value,
    ) -> Result<(), LuaError> {
        let cell = match self
            .exec_stack
            .get(frame_idx)
            .and_then(|f| f.local_scope.get(sym.index))
        {
            Some(c) => c.clone(),
            None => return Ok(()),
        };
        let previous = cell.borrow().clone();
        if !previous.is_nil() {
            self.close_value(&previous, error)?;
            *cell.borrow_mut() = Value::Nil;
        }
        Ok(())
    }

    /// Closes the innermost open block of the frame at `frame_idx`.
    pub(crate) fn close_current_block_at(
        &mut self,
        frame_idx: usize,
        error: &Value,
    ) -> Result<(), LuaError> {
        let closers = match self
            .exec_stack
            .get_mut(frame_idx)
            .and_then(|f| f.blocks_to_close.pop())
        {
            Some(c) => c,
            None => return Ok(()),
        };
        if let Some(frame) = self.exec_stack.get_mut(frame_idx) {
            for sym in &closers {
                frame.to_be_closed.remove(&sym.index);
            }
        }
        for sym in closers.iter().rev() {
            self.close_slot_at(frame_idx, sym, error)?;
        }
        Ok(())
    }

    /// Closes every still-open block of the frame at `frame_idx`, innermost
    /// first. Used by returns and by the unwinder.
    pub(crate) fn close_all_pending_blocks_at(
        &mut self,
        frame_idx: usize,
        error: &Value,
    ) -> Result<(), LuaError> {
        loop {
            let has_blocks = self
                .exec_stack
                .get(frame_idx)
                .map(|f| !f.blocks_to_close.is_empty())
                .unwrap_or(false);
            if !has_blocks {
                break;
            }
            self.close_current_block_at(frame_idx, error)?;
        }
        if let Some(frame) = self.exec_stack.get_mut(frame_idx) {
            frame.to_be_closed.clear();
        }
        Ok(())
    }

    /// Same as [`Self::close_all_pending_blocks_at`] for a frame already
    /// popped off the stack.
    pub(crate) fn close_all_pending_blocks_owned(
        &mut self,
        frame: &mut CallFrame,
        error: &Value,
    ) -> Result<(), LuaError> {
        while let Some(closers) = frame.blocks_to_close.pop() {
            for sym in &closers {
                frame.to_be_closed.remove(&sym.index);
            }
            for sym in closers.iter().rev() {
                let cell = match frame.local_scope.get(sym.index) {
                    Some(c) => c.clone(),
                    None => continue,
                };
                let previous = cell.borrow().clone();
                if !previous.is_nil() {
                    self.close_value(&previous, error)?;
                    *cell.borrow_mut() = Value::Nil;
                }
            }
        }
        frame.to_be_closed.clear();
        Ok(())
    }

    /// Early closure of specific symbols (break/goto leaving a block).
    pub(crate) fn close_symbols_subset_at(
        &mut self,
        frame_idx: usize,
        symbols: &[SymbolRef],
        error: &Value,
    ) -> Result<(), LuaError> {
        for sym in symbols {
            if let Some(frame) = self.exec_stack.get_mut(frame_idx) {
                frame.to_be_closed.remove(&sym.index);
                for block in frame.blocks_to_close.iter_mut().rev() {
                    if let Some(pos) = block.iter().position(|s| s.index == sym.index) {
                        block.remove(pos);
                        break;
                    }
                }
            }
            self.close_slot_at(frame_idx, sym, error)?;
        }
        Ok(())
    }

    // ===== Generic symbol access (host and debugger surface) =====

    /// Reads the value a symbol refers to: local, upvalue, global, or the
    /// environment itself.
    pub(crate) fn get_symbol(&self, sym: &SymbolRef) -> Result<Value, LuaError> {
        match sym.kind {
            SymbolKind::DefaultEnv => Ok(Value::Table(self.globals.clone())),
            SymbolKind::Global => Ok(self.globals.borrow().get_str(sym.name())),
            SymbolKind::Local => {
                let frame = self.top_script_frame()?;
                Ok(frame
                    .local_scope
                    .get(sym.index)
                    .map(|c| c.borrow().clone())
                    .unwrap_or(Value::Nil))
            }
            SymbolKind::UpValue => {
                let frame = self.top_script_frame()?;
                Ok(frame
                    .closure_scope
                    .get(sym.index)
                    .map(|v| (*v).clone())
                    .unwrap_or(Value::Nil))
            }
        }
    }

    /// Assigns through a symbol reference.
    pub(crate) fn assign_symbol(&mut self, sym: &SymbolRef, value: Value) -> Result<(), LuaError> {
        match sym.kind {
            SymbolKind::Global => {
                self.globals.borrow_mut().set_str(sym.name(), value);
                Ok(())
            }
            SymbolKind::Local => self.assign_local(sym, value),
            SymbolKind::UpValue => {
                let frame = self.top_script_frame()?;
                if !frame.closure_scope.set(sym.index, value) {
                    return Err(LuaError::internal("upvalue store out of range"));
                }
                Ok(())
            }
            SymbolKind::DefaultEnv => {
                Err(LuaError::internal("cannot assign to the default environment"))
            }
        }
    }

    /// The innermost frame executing script code (skipping host-callback
    /// frames).
    fn top_script_frame(&self) -> Result<&CallFrame, LuaError> {
        self.exec_stack
            .iter()
            .rev()
            .find(|f| f.callback.is_none())
            .ok_or_else(|| LuaError::internal("no script frame on the stack"))
    }
}
