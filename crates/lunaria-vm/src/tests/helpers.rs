//! Helper functions and common imports for integration tests.

use crate::bytecode::{Chunk, Instruction, OpCode};
use crate::options::ScriptOptions;
use crate::script::Script;
use lunaria_types::{CallbackFunction, LuaError, SymbolRef, Table, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Builds a script around a hand-assembled instruction stream.
pub fn script(code: Vec<Instruction>) -> Script {
    Script::new(Chunk::new("<test>", code))
}

pub fn script_with(code: Vec<Instruction>, options: ScriptOptions) -> Script {
    Script::with_options(Chunk::new("<test>", code), options)
}

/// Runs a chunk entry point with no arguments.
pub fn run(script: &Script, entry: usize) -> Result<Value, LuaError> {
    script.call_entry_point(entry, &[])
}

pub fn op(opcode: OpCode) -> Instruction {
    Instruction::new(opcode)
}

pub fn num(opcode: OpCode, num_val: i64) -> Instruction {
    Instruction::with_num(opcode, num_val)
}

pub fn nums(opcode: OpCode, num_val: i64, num_val2: i64) -> Instruction {
    Instruction::with_nums(opcode, num_val, num_val2)
}

pub fn lit(value: Value) -> Instruction {
    Instruction::with_value(OpCode::Literal, value)
}

pub fn int(i: i64) -> Instruction {
    lit(Value::int(i))
}

pub fn str_lit(s: &str) -> Instruction {
    lit(Value::string(s))
}

/// Standard function prologue: BEGINFN with `slots` locals and no root
/// to-be-closed block.
pub fn begin_fn(slots: i64) -> Instruction {
    Instruction::with_nums(OpCode::BeginFn, slots, -1)
}

/// BEGINFN whose root block closes the listed symbols.
pub fn begin_fn_closing(slots: i64, root_last: i64, symbols: Vec<SymbolRef>) -> Instruction {
    let mut i = Instruction::with_symbols(OpCode::BeginFn, symbols);
    i.num_val = slots;
    i.num_val2 = root_last;
    i
}

pub fn bind_args(symbols: Vec<SymbolRef>) -> Instruction {
    Instruction::with_symbols(OpCode::Args, symbols)
}

pub fn local(sym: SymbolRef) -> Instruction {
    Instruction::with_symbol(OpCode::Local, sym)
}

/// STORELCL of the value on top of the stack.
pub fn store_local(sym: SymbolRef) -> Instruction {
    Instruction::with_symbol(OpCode::StoreLcl, sym)
}

pub fn up_value(sym: SymbolRef) -> Instruction {
    Instruction::with_symbol(OpCode::UpValue, sym)
}

/// STOREUPV of the value on top of the stack.
pub fn store_upvalue(sym: SymbolRef) -> Instruction {
    Instruction::with_symbol(OpCode::StoreUpv, sym)
}

pub fn closure(entry: i64) -> Instruction {
    Instruction::with_num(OpCode::Closure, entry)
}

pub fn closure_capturing(entry: i64, symbols: Vec<SymbolRef>) -> Instruction {
    let mut i = Instruction::with_symbols(OpCode::Closure, symbols);
    i.num_val = entry;
    i
}

pub fn call(argc: i64) -> Instruction {
    Instruction::with_num(OpCode::Call, argc)
}

pub fn ret1() -> Instruction {
    Instruction::with_num(OpCode::Ret, 1)
}

pub fn pop1() -> Instruction {
    Instruction::with_num(OpCode::Pop, 1)
}

/// A host callback wrapping a plain closure.
pub fn host_fn(
    name: &'static str,
    f: impl Fn(&[Value]) -> Result<Value, LuaError> + 'static,
) -> Value {
    Value::Callback(CallbackFunction::new(name, move |_ctx, args, _method| {
        f(args)
    }))
}

/// A table whose `__close` metamethod records every invocation.
pub fn closeable(
    tag: &'static str,
    log: Rc<RefCell<Vec<(String, String)>>>,
) -> Value {
    closeable_with(tag, log, false)
}

/// Same, optionally making `__close` itself fault.
pub fn closeable_with(
    tag: &'static str,
    log: Rc<RefCell<Vec<(String, String)>>>,
    close_throws: bool,
) -> Value {
    let closer = CallbackFunction::new("closer", move |_ctx, args: &[Value], _method| {
        let error = args.get(1).cloned().unwrap_or(Value::Nil);
        log.borrow_mut().push((tag.to_string(), error.to_string()));
        if close_throws {
            return Err(LuaError::runtime(format!("close of {tag} failed")));
        }
        Ok(Value::Nil)
    });

    let mut meta = Table::new();
    meta.set_str("__close", Value::Callback(closer));

    let mut table = Table::new();
    table.set_metatable(Some(Rc::new(RefCell::new(meta))));
    Value::table(table)
}

/// Unwraps a tuple result into a vector.
pub fn tuple_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    }
}
