//! Generic-for iterator protocol
//!
//! ITERPREP normalizes whatever the `in` expression produced into the
//! `(iterator, state, control)` triplet: functions pass through, values
//! with an `__iterator` metamethod delegate to it, and plain tables without
//! `__call` fall back to the built-in pairs-style walker.

use super::Processor;
use crate::corelib;
use lunaria_types::{metamethods, LuaError, Value};

impl Processor {
    pub(crate) fn exec_iter_prep(&mut self) -> Result<(), LuaError> {
        let v = self.pop()?;
        let v = match v {
            Value::Tuple(_) => v,
            scalar => Value::Tuple(vec![scalar, Value::Nil, Value::Nil].into()),
        };

        let items = v.expand();
        let f = items.first().cloned().unwrap_or(Value::Nil);
        let s = items.get(1).cloned().unwrap_or(Value::Nil);
        let var = items.get(2).cloned().unwrap_or(Value::Nil);

        if !f.is_callable_function() {
            if let Some(meta) = self.get_metamethod(&f, metamethods::ITERATOR) {
                let triplet = if matches!(meta, Value::Tuple(_)) {
                    meta
                } else {
                    self.call_internal(&meta, &[f.clone(), s, var])?
                };
                let items = triplet.expand();
                let f = items.first().cloned().unwrap_or(Value::Nil);
                let s = items.get(1).cloned().unwrap_or(Value::Nil);
                let var = items.get(2).cloned().unwrap_or(Value::Nil);
                self.push(Value::Tuple(vec![f, s, var].into()));
                return Ok(());
            }
            if matches!(f, Value::Table(_)) {
                let callmeta = self.get_metamethod(&f, metamethods::CALL);
                if callmeta.is_none() {
                    self.push(Value::Tuple(
                        vec![corelib::next_callback(), f, Value::Nil].into(),
                    ));
                    return Ok(());
                }
            }
        }

        self.push(Value::Tuple(vec![f, s, var].into()));
        Ok(())
    }

    /// ITERUPD: copies the iterator's latest control value into the triplet.
    pub(crate) fn exec_iter_upd(&mut self) -> Result<(), LuaError> {
        let control = self.peek(0)?.scalar();
        let triplet = self.peek(1)?.clone();
        match triplet {
            Value::Tuple(items) if items.len() >= 3 => {
                let mut updated = items.to_vec();
                updated[2] = control;
                self.set_from_top(1, Value::Tuple(updated.into()))
            }
            other => Err(LuaError::internal(format!(
                "ITERUPD expects the iterator triplet, found {}",
                other.type_name()
            ))),
        }
    }
}
