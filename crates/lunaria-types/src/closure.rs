//! Script functions and their captured upvalues
//!
//! A closure is an entry-point index into the chunk plus an ordered,
//! append-only collection of shared cells captured by reference. Several
//! closures capturing the same variable hold clones of the same `Cell`, so
//! writes through one are visible through all.

use crate::symbol::SymbolRef;
use crate::value::{Cell, Value};
use std::cell::Ref;

/// The captured environment of a closure.
#[derive(Debug, Clone, Default)]
pub struct ClosureScope {
    symbols: Vec<SymbolRef>,
    cells: Vec<Cell>,
}

impl ClosureScope {
    pub fn new(symbols: Vec<SymbolRef>, cells: Vec<Cell>) -> Self {
        debug_assert_eq!(symbols.len(), cells.len());
        ClosureScope { symbols, cells }
    }

    pub fn empty() -> Self {
        ClosureScope::default()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The shared cell at `index`.
    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    /// A read-only view of the value at `index`.
    pub fn get(&self, index: usize) -> Option<Ref<'_, Value>> {
        self.cells.get(index).map(|c| c.borrow())
    }

    /// Stores into the shared cell at `index`; every closure aliasing the
    /// cell observes the write.
    pub fn set(&self, index: usize, value: Value) -> bool {
        match self.cells.get(index) {
            Some(cell) => {
                *cell.borrow_mut() = value;
                true
            }
            None => false,
        }
    }

    pub fn symbols(&self) -> &[SymbolRef] {
        &self.symbols
    }

    /// Finds the upvalue slot bound to `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.symbols
            .iter()
            .position(|s| s.name.as_deref() == Some(name))
    }
}

/// A script function: entry point plus captured scope.
#[derive(Debug, Clone)]
pub struct Closure {
    entry_point: usize,
    scope: ClosureScope,
}

impl Closure {
    pub fn new(entry_point: usize, scope: ClosureScope) -> Self {
        Closure { entry_point, scope }
    }

    /// A function with no captures.
    pub fn plain(entry_point: usize) -> Self {
        Closure {
            entry_point,
            scope: ClosureScope::empty(),
        }
    }

    /// Bytecode index of the first instruction.
    pub fn entry_point(&self) -> usize {
        self.entry_point
    }

    pub fn scope(&self) -> &ClosureScope {
        &self.scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::new_cell;

    #[test]
    fn captured_cells_are_aliased() {
        let cell = new_cell(Value::int(1));
        let a = ClosureScope::new(vec![SymbolRef::upvalue("x", 0)], vec![cell.clone()]);
        let b = ClosureScope::new(vec![SymbolRef::upvalue("x", 0)], vec![cell]);

        assert!(a.set(0, Value::int(42)));
        assert_eq!(*b.get(0).unwrap(), Value::int(42));
    }

    #[test]
    fn find_locates_symbol_by_name() {
        let scope = ClosureScope::new(
            vec![SymbolRef::upvalue("x", 0), SymbolRef::upvalue("y", 1)],
            vec![new_cell(Value::Nil), new_cell(Value::Nil)],
        );
        assert_eq!(scope.find("y"), Some(1));
        assert_eq!(scope.find("z"), None);
    }
}
