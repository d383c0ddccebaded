use super::helpers::*;
use crate::bytecode::{Instruction, OpCode};
use lunaria_types::{SymbolRef, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Two to-be-closed locals in one function close in reverse declaration
/// order on a normal return.
#[test]
fn closers_fire_in_reverse_order_on_return() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let first = closeable("first", log.clone());
    let second = closeable("second", log.clone());

    let a = SymbolRef::local("a", 0).closing();
    let b = SymbolRef::local("b", 1).closing();

    let s = script(vec![
        begin_fn_closing(2, 1, vec![a.clone(), b.clone()]),
        bind_args(vec![]),
        lit(first),
        store_local(a),
        pop1(),
        lit(second),
        store_local(b),
        pop1(),
        int(0),
        ret1(),
    ]);

    assert_eq!(run(&s, 0).unwrap(), Value::int(0));
    let entries = log.borrow();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "second");
    assert_eq!(entries[1].0, "first");
    // a clean exit passes nil as the close error
    assert_eq!(entries[0].1, "nil");
}

/// Block exit (LEAVE) closes only the block's own closers.
#[test]
fn leave_closes_the_innermost_block() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let inner = closeable("inner", log.clone());

    let c = SymbolRef::local("c", 0).closing();
    let enter = Instruction::with_symbols(OpCode::Enter, vec![c.clone()]);
    let leave = nums(OpCode::Leave, -1, -1);

    let s = script(vec![
        begin_fn(1),
        bind_args(vec![]),
        enter,
        lit(inner),
        store_local(c),
        pop1(),
        leave,
        int(7),
        ret1(),
    ]);

    assert_eq!(run(&s, 0).unwrap(), Value::int(7));
    assert_eq!(log.borrow().len(), 1);
    assert_eq!(log.borrow()[0].0, "inner");
}

/// On a fault every pending closer runs with the decorated message as the
/// close error before the error reaches the host.
#[test]
fn closers_run_during_unwinding_with_the_fault() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let resource = closeable("res", log.clone());
    let probe = script(vec![]);
    let error = probe.get_global("error");

    let c = SymbolRef::local("c", 0).closing();
    let s = script(vec![
        begin_fn_closing(1, 0, vec![c.clone()]),
        bind_args(vec![]),
        lit(resource),
        store_local(c),
        pop1(),
        lit(error),
        str_lit("exploded"),
        call(1),
        ret1(),
    ]);

    let err = run(&s, 0).unwrap_err();
    assert!(err.decorated_message().contains("exploded"));
    let entries = log.borrow();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].1.contains("exploded"));
}

/// pcall recovery still closes the protected function's pending resources,
/// and exactly once.
#[test]
fn closers_fire_exactly_once_under_pcall() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let resource = closeable("res", log.clone());
    let probe = script(vec![]);
    let pcall = probe.get_global("pcall");
    let error = probe.get_global("error");

    let c = SymbolRef::local("c", 0).closing();
    let s = script(vec![
        // main at 0: return pcall(inner)
        begin_fn(0),
        bind_args(vec![]),
        lit(pcall),
        closure(6),
        call(1),
        ret1(),
        // inner at 6: local c <close> = res; error("bad")
        begin_fn_closing(1, 0, vec![c.clone()]),
        bind_args(vec![]),
        lit(resource),
        store_local(c),
        pop1(),
        lit(error),
        str_lit("bad"),
        call(1),
        ret1(),
    ]);

    let items = tuple_items(&run(&s, 0).unwrap());
    assert_eq!(items[0], Value::FALSE);
    assert_eq!(log.borrow().len(), 1);
}

/// Assigning a value without `__close` into a to-be-closed slot fails fast;
/// nil and false are exempt.
#[test]
fn closing_slots_validate_assignments_eagerly() {
    let c = SymbolRef::local("c", 0).closing();
    let s = script(vec![
        begin_fn_closing(1, 0, vec![c.clone()]),
        bind_args(vec![]),
        int(5),
        store_local(c),
        pop1(),
        int(0),
        ret1(),
    ]);
    let err = run(&s, 0).unwrap_err();
    assert!(err.to_string().contains("__close"));

    let c = SymbolRef::local("c", 0).closing();
    let s = script(vec![
        begin_fn_closing(1, 0, vec![c.clone()]),
        bind_args(vec![]),
        lit(Value::Boolean(false)),
        store_local(c),
        pop1(),
        int(0),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::int(0));
}

/// Overwriting a held to-be-closed value closes the previous one first.
#[test]
fn reassignment_closes_the_previous_value() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let old = closeable("old", log.clone());
    let new = closeable("new", log.clone());

    let c = SymbolRef::local("c", 0).closing();
    let s = script(vec![
        begin_fn_closing(1, 0, vec![c.clone()]),
        bind_args(vec![]),
        lit(old),
        store_local(c.clone()),
        pop1(),
        lit(new),
        store_local(c),
        pop1(),
        int(0),
        ret1(),
    ]);

    assert_eq!(run(&s, 0).unwrap(), Value::int(0));
    let entries = log.borrow();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "old"); // closed at reassignment
    assert_eq!(entries[1].0, "new"); // closed at return
}

/// CLEAN resets slots to fresh cells so closures from different loop
/// iterations capture distinct variables.
#[test]
fn clean_gives_loop_iterations_fresh_cells() {
    let x = SymbolRef::local("x", 0);
    let clean = nums(OpCode::Clean, 0, 0);

    let s = script(vec![
        // main: x = 1; capture cell; CLEAN; x = 2; return captured()
        begin_fn(1),
        bind_args(vec![]),
        int(1),
        store_local(x.clone()),
        pop1(),
        closure_capturing(12, vec![x.clone()]),
        clean,
        int(2),
        store_local(x.clone()),
        // stack: [closure, 2] -> drop the 2, call the closure
        pop1(),
        call(0),
        ret1(),
        // reader at 12: return captured x
        begin_fn(0),
        bind_args(vec![]),
        up_value(SymbolRef::upvalue("x", 0)),
        ret1(),
    ]);

    // the closure captured the pre-CLEAN cell, so it still sees 1
    assert_eq!(run(&s, 0).unwrap(), Value::int(1));
}
