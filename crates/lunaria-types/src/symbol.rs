//! Symbol references
//!
//! A symbol reference is a compile-time-resolved l-value: a local slot, an
//! upvalue slot, a named global, or the default environment. The VM only
//! consumes the index or name; it never re-resolves identifiers at runtime
//! except for globals.

use std::fmt;
use std::rc::Rc;

/// Storage class of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Local,
    UpValue,
    Global,
    DefaultEnv,
}

/// Attributes attached to a declaration (`<const>`, `<close>`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolAttributes {
    pub is_const: bool,
    pub to_be_closed: bool,
}

/// A resolved reference to a storage slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRef {
    pub kind: SymbolKind,
    pub index: usize,
    pub name: Option<Rc<str>>,
    pub attributes: SymbolAttributes,
}

impl SymbolRef {
    pub fn local(name: impl Into<Rc<str>>, index: usize) -> Self {
        SymbolRef {
            kind: SymbolKind::Local,
            index,
            name: Some(name.into()),
            attributes: SymbolAttributes::default(),
        }
    }

    pub fn upvalue(name: impl Into<Rc<str>>, index: usize) -> Self {
        SymbolRef {
            kind: SymbolKind::UpValue,
            index,
            name: Some(name.into()),
            attributes: SymbolAttributes::default(),
        }
    }

    pub fn global(name: impl Into<Rc<str>>) -> Self {
        SymbolRef {
            kind: SymbolKind::Global,
            index: 0,
            name: Some(name.into()),
            attributes: SymbolAttributes::default(),
        }
    }

    pub fn default_env() -> Self {
        SymbolRef {
            kind: SymbolKind::DefaultEnv,
            index: 0,
            name: None,
            attributes: SymbolAttributes::default(),
        }
    }

    /// Marks the symbol as a to-be-closed declaration.
    pub fn closing(mut self) -> Self {
        self.attributes.to_be_closed = true;
        self
    }

    /// Marks the symbol as const.
    pub fn constant(mut self) -> Self {
        self.attributes.is_const = true;
        self
    }

    pub fn is_to_be_closed(&self) -> bool {
        self.attributes.to_be_closed
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("?")
    }
}

impl fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SymbolKind::Local => write!(f, "local {}[{}]", self.name(), self.index),
            SymbolKind::UpValue => write!(f, "upvalue {}[{}]", self.name(), self.index),
            SymbolKind::Global => write!(f, "global {}", self.name()),
            SymbolKind::DefaultEnv => write!(f, "_ENV"),
        }
    }
}
