//! Runtime value cells
//!
//! `Value` is the tagged union every stack slot, table slot, and upvalue
//! holds. Heap-backed variants are reference counted so cloning a value is
//! cheap; locals and upvalues live in shared [`Cell`]s so closures capturing
//! the same variable observe each other's writes.

use crate::callback::CallbackFunction;
use crate::closure::Closure;
use crate::error::LuaError;
use crate::number::Number;
use crate::table::Table;
use crate::userdata::UserData;
use crate::version::LuaVersion;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Shared mutable storage slot. Multiple closures may alias one cell; the
/// value stack clones values out of cells instead of aliasing them, which is
/// what keeps popped locals immune to later mutation.
pub type Cell = Rc<RefCell<Value>>;

/// Creates a fresh cell holding `value`.
pub fn new_cell(value: Value) -> Cell {
    Rc::new(RefCell::new(value))
}

/// Shared handle to a table.
pub type TableRef = Rc<RefCell<Table>>;

/// Payload of a tail-call request: "call this as if I had called it",
/// produced by host functions (pcall/xpcall and metamethod paths) instead of
/// recursing into the VM.
#[derive(Clone)]
pub struct TailCallData {
    pub function: Value,
    pub args: Vec<Value>,
    pub continuation: Option<CallbackFunction>,
    pub error_handler: Option<CallbackFunction>,
    /// Message decorator consulted before the stack unwinds (xpcall handler).
    pub unwind_decorator: Option<Value>,
}

/// Payload of a yield request travelling up the dispatch loop.
#[derive(Clone)]
pub struct YieldRequest {
    pub values: Vec<Value>,
    /// Set when the scheduler forced the yield after exhausting the
    /// auto-yield instruction budget.
    pub forced: bool,
}

/// A tagged runtime value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    /// "No value at all": what a 0-value return produces. Compares equal to
    /// nil but is a distinct tag.
    Void,
    Boolean(bool),
    Number(Number),
    Str(Rc<str>),
    Table(TableRef),
    Function(Rc<Closure>),
    Callback(CallbackFunction),
    UserData(Rc<dyn UserData>),
    /// Coroutine handle. Type-erased so this crate stays independent of the
    /// processor implementation; the VM downcasts to its own handle type.
    Coroutine(Rc<dyn Any>),
    Tuple(Rc<[Value]>),
    /// Internal request marker, never exposed to script code.
    TailCall(Rc<TailCallData>),
    /// Internal request marker, never exposed to script code.
    Yield(Rc<YieldRequest>),
}

impl Value {
    pub const TRUE: Value = Value::Boolean(true);
    pub const FALSE: Value = Value::Boolean(false);

    pub fn boolean(b: bool) -> Value {
        Value::Boolean(b)
    }

    pub fn int(i: i64) -> Value {
        Value::Number(Number::Int(i))
    }

    pub fn float(f: f64) -> Value {
        Value::Number(Number::Float(f))
    }

    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn table(t: Table) -> Value {
        Value::Table(Rc::new(RefCell::new(t)))
    }

    /// Builds a tuple, flattening a trailing nested tuple so argument lists
    /// splice the way multiple returns do.
    pub fn tuple(values: Vec<Value>) -> Value {
        Value::Tuple(adjust_tuple(values).into())
    }

    pub fn tail_call(data: TailCallData) -> Value {
        Value::TailCall(Rc::new(data))
    }

    pub fn yield_request(values: Vec<Value>) -> Value {
        Value::Yield(Rc::new(YieldRequest {
            values,
            forced: false,
        }))
    }

    pub fn forced_yield_request() -> Value {
        Value::Yield(Rc::new(YieldRequest {
            values: Vec::new(),
            forced: true,
        }))
    }

    /// The Lua-visible type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil | Value::Void => "nil",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) | Value::Callback(_) => "function",
            Value::UserData(_) => "userdata",
            Value::Coroutine(_) => "thread",
            Value::Tuple(_) => "tuple",
            Value::TailCall(_) => "tailcall",
            Value::Yield(_) => "yield",
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil | Value::Void)
    }

    /// Lua truthiness: everything except nil and false.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Void | Value::Boolean(false))
    }

    /// Collapses tuples to their first element; an empty tuple is void.
    pub fn scalar(&self) -> Value {
        match self {
            Value::Tuple(items) => match items.first() {
                Some(first) => first.scalar(),
                None => Value::Void,
            },
            other => other.clone(),
        }
    }

    #[inline]
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_callable_function(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Callback(_))
    }

    /// Numeric view for arithmetic. Strings coerce only on targets where the
    /// operators themselves do the coercion (pre-5.4).
    pub fn coerce_number(&self, version: LuaVersion) -> Option<Number> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Str(s) if version.coerces_strings_in_arithmetic() => Number::parse(s),
            _ => None,
        }
    }

    /// Numeric view regardless of version (used by `tonumber`-style casts).
    pub fn cast_number(&self) -> Option<Number> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Str(s) => Number::parse(s),
            _ => None,
        }
    }

    /// String view for concatenation: strings and numbers only.
    pub fn as_concat_string(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The number payload, or an arithmetic type error.
    pub fn expect_number(&self) -> Result<Number, LuaError> {
        self.as_number()
            .ok_or_else(|| LuaError::arithmetic_on_non_number(self, self))
    }

    /// Raw identity/value equality: the final fallback after metamethod
    /// dispatch. Reference types compare by identity, tuples elementwise.
    pub fn raw_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil | Value::Void, Value::Nil | Value::Void) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => Number::equal(*a, *b),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Callback(a), Value::Callback(b)) => a.ptr_eq(b),
            (Value::UserData(a), Value::UserData(b)) => Rc::ptr_eq(a, b),
            (Value::Coroutine(a), Value::Coroutine(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.raw_equals(y))
            }
            _ => false,
        }
    }

    /// Iterates the values a tuple expands to (one item for scalars).
    pub fn expand(&self) -> Vec<Value> {
        match self {
            Value::Tuple(items) => items.to_vec(),
            other => vec![other.clone()],
        }
    }
}

/// Flattens a trailing tuple into the argument list, the adjustment applied
/// to call arguments and resume results.
pub fn adjust_tuple(mut values: Vec<Value>) -> Vec<Value> {
    while let Some(Value::Tuple(_)) = values.last() {
        if let Some(Value::Tuple(items)) = values.pop() {
            values.extend(items.iter().cloned());
            // a trailing scalar tuple terminates the loop naturally
            if items.is_empty() {
                break;
            }
        }
    }
    values
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equals(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Void => write!(f, "Void"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Table(t) => write!(f, "Table({:p})", Rc::as_ptr(t)),
            Value::Function(c) => write!(f, "Function({:p})", Rc::as_ptr(c)),
            Value::Callback(c) => write!(f, "Callback({})", c.name()),
            Value::UserData(u) => write!(f, "UserData({})", u.type_name()),
            Value::Coroutine(c) => write!(f, "Coroutine({:p})", Rc::as_ptr(c)),
            Value::Tuple(items) => f.debug_list().entries(items.iter()).finish(),
            Value::TailCall(_) => write!(f, "TailCall"),
            Value::Yield(r) => write!(f, "Yield(forced={})", r.forced),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil | Value::Void => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            Value::Function(c) => write!(f, "function: {:p}", Rc::as_ptr(c)),
            Value::Callback(c) => write!(f, "function: builtin: {}", c.name()),
            Value::UserData(u) => write!(f, "userdata: {}", u.type_name()),
            Value::Coroutine(c) => write!(f, "thread: {:p}", Rc::as_ptr(c)),
            Value::Tuple(items) => match items.first() {
                Some(first) => write!(f, "{first}"),
                None => write!(f, "nil"),
            },
            Value::TailCall(_) => write!(f, "(tailcall)"),
            Value::Yield(_) => write!(f, "(yield)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Void.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Boolean(true).is_truthy());
        assert!(Value::int(0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn scalar_flattens_nested_tuples() {
        let inner = Value::tuple(vec![Value::int(1), Value::int(2)]);
        let outer = Value::Tuple(vec![inner, Value::int(3)].into());
        assert_eq!(outer.scalar(), Value::int(1));
        assert_eq!(Value::Tuple(Rc::from(Vec::new())).scalar(), Value::Void);
    }

    #[test]
    fn tuple_adjustment_splices_trailing_tuple() {
        let trailing = Value::tuple(vec![Value::int(2), Value::int(3)]);
        let adjusted = adjust_tuple(vec![Value::int(1), trailing]);
        assert_eq!(
            adjusted,
            vec![Value::int(1), Value::int(2), Value::int(3)]
        );
    }

    #[test]
    fn nil_and_void_compare_equal() {
        assert!(Value::Nil.raw_equals(&Value::Void));
    }

    #[test]
    fn tables_compare_by_identity() {
        let a = Value::table(Table::new());
        let b = Value::table(Table::new());
        assert!(!a.raw_equals(&b));
        assert!(a.raw_equals(&a.clone()));
    }

    #[test]
    fn string_coercion_is_version_gated() {
        let s = Value::string("10");
        assert_eq!(s.coerce_number(LuaVersion::Lua53), Some(Number::Int(10)));
        assert_eq!(s.coerce_number(LuaVersion::Lua54), None);
        assert_eq!(s.cast_number(), Some(Number::Int(10)));
    }
}
