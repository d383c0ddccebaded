//! Indexing with metamethod chasing
//!
//! Three addressing variants: plain (`t[k]`), name (`t.k` with the key as
//! an instruction literal), and multi-index (slices, userdata only). Plain
//! table access short-circuits on a non-nil raw slot before probing
//! `__index`/`__newindex`; the chase through metamethod tables is bounded
//! to defeat `__index` loops.

use super::{Flow, Processor, MAX_META_CHAIN};
use crate::bytecode::{Instruction, OpCode};
use lunaria_types::{metamethods, LuaError, Value};

impl Processor {
    pub(crate) fn exec_index(&mut self, insn: &Instruction, ip: usize) -> Result<Flow, LuaError> {
        let is_name_index = insn.op == OpCode::IndexN;
        let is_multi_index = insn.op == OpCode::IndexL;

        let original_idx = match &insn.value {
            Some(v) => v.clone(),
            None => self.pop()?,
        };
        let idx = original_idx.scalar();
        let mut obj = self.pop()?.scalar();

        for _ in 0..MAX_META_CHAIN {
            let handler = match &obj {
                Value::Table(t) => {
                    if !is_multi_index {
                        let v = t.borrow().get(&idx);
                        if !v.is_nil() {
                            self.push(v);
                            return Ok(Flow::Next(ip));
                        }
                    }
                    match self.get_metamethod_raw(&obj, metamethods::INDEX) {
                        Some(h) => h,
                        None => {
                            if is_multi_index {
                                return Err(LuaError::runtime(
                                    "cannot multi-index a table. userdata expected",
                                ));
                            }
                            self.push(Value::Nil);
                            return Ok(Flow::Next(ip));
                        }
                    }
                }
                Value::UserData(descriptor) => {
                    match descriptor.index(&original_idx, is_name_index) {
                        Some(v) => {
                            self.push(v);
                            return Ok(Flow::Next(ip));
                        }
                        None => {
                            return Err(LuaError::runtime(format!(
                                "cannot access field {} of userdata {}",
                                idx,
                                descriptor.type_name()
                            )))
                        }
                    }
                }
                other => match self.get_metamethod_raw(other, metamethods::INDEX) {
                    Some(h) => h,
                    None => {
                        let name = self.index_error_name(insn);
                        return Err(LuaError::index_invalid_type(other, name.as_deref()));
                    }
                },
            };

            if handler.is_callable_function() {
                if is_multi_index {
                    return Err(LuaError::runtime(
                        "cannot multi-index through metamethods. userdata expected",
                    ));
                }
                self.push(handler);
                self.push(obj);
                self.push(idx);
                return self.internal_exec_call(2, Some(ip), None, None, false, None, None);
            }
            obj = handler;
        }

        Err(LuaError::loop_in_index())
    }

    pub(crate) fn exec_index_set(
        &mut self,
        insn: &Instruction,
        ip: usize,
    ) -> Result<Flow, LuaError> {
        let is_name_index = insn.op == OpCode::IndexSetN;
        let is_multi_index = insn.op == OpCode::IndexSetL;

        let original_idx = match &insn.value {
            Some(v) => v.clone(),
            None => self.pop()?,
        };
        let idx = original_idx.scalar();
        let mut obj = self.pop()?.scalar();
        let value = self.get_store_value(insn)?;

        for _ in 0..MAX_META_CHAIN {
            let handler = match &obj {
                Value::Table(t) => {
                    if !is_multi_index && !t.borrow().get(&idx).is_nil() {
                        self.store_into_table(t.clone(), &idx, value)?;
                        return Ok(Flow::Next(ip));
                    }
                    match self.get_metamethod_raw(&obj, metamethods::NEWINDEX) {
                        Some(h) => h,
                        None => {
                            if is_multi_index {
                                return Err(LuaError::runtime(
                                    "cannot multi-index a table. userdata expected",
                                ));
                            }
                            self.store_into_table(t.clone(), &idx, value)?;
                            return Ok(Flow::Next(ip));
                        }
                    }
                }
                Value::UserData(descriptor) => {
                    if !descriptor.set_index(&original_idx, value, is_name_index) {
                        return Err(LuaError::runtime(format!(
                            "cannot access field {} of userdata {}",
                            idx,
                            descriptor.type_name()
                        )));
                    }
                    return Ok(Flow::Next(ip));
                }
                other => match self.get_metamethod_raw(other, metamethods::NEWINDEX) {
                    Some(h) => h,
                    None => {
                        let name = self.index_error_name(insn);
                        return Err(LuaError::index_invalid_type(other, name.as_deref()));
                    }
                },
            };

            if handler.is_callable_function() {
                if is_multi_index {
                    return Err(LuaError::runtime(
                        "cannot multi-index through metamethods. userdata expected",
                    ));
                }
                // the handler's call result replaces the stored value slot
                self.pop()?;
                self.push(handler);
                self.push(obj);
                self.push(idx);
                self.push(value);
                return self.internal_exec_call(3, Some(ip), None, None, false, None, None);
            }
            obj = handler;
        }

        Err(LuaError::loop_in_newindex())
    }

    fn store_into_table(
        &mut self,
        table: lunaria_types::TableRef,
        key: &Value,
        value: Value,
    ) -> Result<(), LuaError> {
        let grew = std::mem::size_of::<Value>();
        table.borrow_mut().set(key, value)?;
        self.shared.allocation.track(grew);
        Ok(())
    }

    fn index_error_name(&self, insn: &Instruction) -> Option<String> {
        if self.shared.options.lua_compatible_errors {
            insn.name.as_ref().map(|n| n.to_string())
        } else {
            None
        }
    }

    /// Table-constructor append: `{ a, b, f() }`.
    pub(crate) fn exec_tbl_init_indexed(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        let value = self.pop()?;
        let table = self.peek(0)?.clone();
        match table {
            Value::Table(t) => {
                t.borrow_mut()
                    .init_next_array_key(value, insn.num_val != 0);
                self.shared.allocation.track(std::mem::size_of::<Value>());
                Ok(())
            }
            other => Err(LuaError::internal(format!(
                "unexpected {} in table constructor",
                other.type_name()
            ))),
        }
    }

    /// Table-constructor keyed entry: `{ [k] = v }` / `{ k = v }`.
    pub(crate) fn exec_tbl_init_named(&mut self, _insn: &Instruction) -> Result<(), LuaError> {
        let value = self.pop()?;
        let key = self.pop()?;
        let table = self.peek(0)?.clone();
        match table {
            Value::Table(t) => {
                t.borrow_mut().set(&key, value.scalar())?;
                self.shared.allocation.track(std::mem::size_of::<Value>());
                Ok(())
            }
            other => Err(LuaError::internal(format!(
                "unexpected {} in table constructor",
                other.type_name()
            ))),
        }
    }
}
