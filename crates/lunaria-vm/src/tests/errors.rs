use super::helpers::*;
use crate::bytecode::OpCode;
use lunaria_types::{LuaError, Value};

fn global_fn(script: &crate::script::Script, name: &str) -> Value {
    script.get_global(name)
}

/// pcall(function() error('boom') end) -> (false, "...boom")
#[test]
fn pcall_absorbs_script_errors() {
    let probe = script(vec![]);
    let pcall = global_fn(&probe, "pcall");
    let error = global_fn(&probe, "error");

    let s = script(vec![
        // main at 0: return pcall(inner)
        begin_fn(0),
        bind_args(vec![]),
        lit(pcall),
        closure(6),
        call(1),
        ret1(),
        // inner at 6: error("boom")
        begin_fn(0),
        bind_args(vec![]),
        lit(error),
        str_lit("boom"),
        call(1),
        ret1(),
    ]);

    let result = run(&s, 0).unwrap();
    let items = tuple_items(&result);
    assert_eq!(items[0], Value::FALSE);
    assert!(items[1].to_string().contains("boom"));
}

#[test]
fn pcall_reports_success_with_results() {
    let probe = script(vec![]);
    let pcall = global_fn(&probe, "pcall");

    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(pcall),
        closure(7),
        int(3),
        call(2),
        ret1(),
        // inner(x) at 7: return x * 2
        begin_fn(1),
        bind_args(vec![lunaria_types::SymbolRef::local("x", 0)]),
        local(lunaria_types::SymbolRef::local("x", 0)),
        int(2),
        op(OpCode::Mul),
        ret1(),
    ]);

    let result = run(&s, 0).unwrap();
    let items = tuple_items(&result);
    assert_eq!(items[0], Value::TRUE);
    assert_eq!(items[1], Value::int(6));
}

#[test]
fn pcall_of_a_non_function_fails_without_raising() {
    let probe = script(vec![]);
    let pcall = global_fn(&probe, "pcall");

    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(pcall),
        int(5),
        call(1),
        ret1(),
    ]);

    let items = tuple_items(&run(&s, 0).unwrap());
    assert_eq!(items[0], Value::FALSE);
    assert!(items[1].to_string().contains("non-function"));
}

/// xpcall's message handler rewrites the error before the stack unwinds.
#[test]
fn xpcall_message_handler_rewrites_the_error() {
    let probe = script(vec![]);
    let xpcall = global_fn(&probe, "xpcall");
    let error = global_fn(&probe, "error");
    let rewriter = host_fn("rewriter", |args| {
        Ok(Value::string(format!("wrapped: {}", args[0])))
    });

    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(xpcall),
        closure(7),
        lit(rewriter),
        call(2),
        ret1(),
        // inner at 7
        begin_fn(0),
        bind_args(vec![]),
        lit(error),
        str_lit("kaput"),
        call(1),
        ret1(),
    ]);

    let items = tuple_items(&run(&s, 0).unwrap());
    assert_eq!(items[0], Value::FALSE);
    let message = items[1].to_string();
    assert!(message.starts_with("wrapped: "));
    assert!(message.contains("kaput"));
}

/// A message handler that itself faults collapses to the canonical
/// "error in error handling".
#[test]
fn faulting_message_handler_collapses() {
    let probe = script(vec![]);
    let xpcall = global_fn(&probe, "xpcall");
    let error = global_fn(&probe, "error");
    let bad_handler = host_fn("bad", |_| Err(LuaError::runtime("handler broke")));

    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(xpcall),
        closure(7),
        lit(bad_handler),
        call(2),
        ret1(),
        begin_fn(0),
        bind_args(vec![]),
        lit(error),
        str_lit("original"),
        call(1),
        ret1(),
    ]);

    let items = tuple_items(&run(&s, 0).unwrap());
    assert_eq!(items[0], Value::FALSE);
    assert_eq!(items[1].to_string(), "error in error handling");
}

/// Errors escaping every handler reach the host decorated with a source
/// location and carrying a traceback.
#[test]
fn unhandled_errors_reach_the_host_decorated() {
    let probe = script(vec![]);
    let error = global_fn(&probe, "error");

    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(error),
        str_lit("unhandled"),
        call(1),
        ret1(),
    ]);

    let err = run(&s, 0).unwrap_err();
    match &err {
        LuaError::Runtime {
            decorated,
            traceback,
            ..
        } => {
            assert!(decorated.as_deref().unwrap_or("").contains("bytecode:"));
            assert!(traceback.as_deref().unwrap_or("").contains("stack traceback"));
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
    assert!(err.decorated_message().contains("unhandled"));
}

/// Internal faults pass through pcall untouched.
#[test]
fn internal_faults_bypass_handlers() {
    let probe = script(vec![]);
    let pcall = global_fn(&probe, "pcall");
    let broken = host_fn("broken", |_| Err(LuaError::internal("invariant breach")));

    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(pcall),
        closure(6),
        call(1),
        ret1(),
        // inner at 6 calls the faulting builtin
        begin_fn(0),
        bind_args(vec![]),
        lit(broken),
        call(0),
        ret1(),
    ]);

    let err = run(&s, 0).unwrap_err();
    assert!(matches!(err, LuaError::Internal(_)));
}

/// Nested pcall: the inner one absorbs, the outer one still succeeds.
#[test]
fn nested_pcall_scopes_recovery() {
    let probe = script(vec![]);
    let pcall = global_fn(&probe, "pcall");
    let error = global_fn(&probe, "error");

    let s = script(vec![
        // main at 0: return pcall(mid)
        begin_fn(0),
        bind_args(vec![]),
        lit(pcall.clone()),
        closure(6),
        call(1),
        ret1(),
        // mid at 6: pcall(inner); return 10
        begin_fn(0),
        bind_args(vec![]),
        lit(pcall),
        closure(14),
        call(1),
        pop1(),
        int(10),
        ret1(),
        // inner at 14: error("deep")
        begin_fn(0),
        bind_args(vec![]),
        lit(error),
        str_lit("deep"),
        call(1),
        ret1(),
    ]);

    let items = tuple_items(&run(&s, 0).unwrap());
    assert_eq!(items[0], Value::TRUE);
    assert_eq!(items[1], Value::int(10));
}
