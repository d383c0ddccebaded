//! Core library surface
//!
//! The handful of built-ins that are really VM features in disguise:
//! `pcall`/`xpcall` ride the tail-call-request protocol so the VM installs
//! their handler frames without the host function recursing; the
//! `coroutine` table fronts the scheduler; `next` is the default table
//! iterator the generic-for opcodes fall back to. Everything here goes
//! through the same host-function contract as embedder callbacks.

use lunaria_types::{
    CallbackFunction, HostContext, LuaError, Table, TableRef, TailCallData, Value,
};

/// Installs the core library into a global table.
pub fn install(globals: &TableRef) {
    let mut g = globals.borrow_mut();
    g.set_str("pcall", callback("pcall", pcall));
    g.set_str("xpcall", callback("xpcall", xpcall));
    g.set_str("error", callback("error", error));
    g.set_str("next", next_callback());

    let mut coroutine = Table::new();
    coroutine.set_str("create", callback("create", coroutine_create));
    coroutine.set_str("resume", callback("resume", coroutine_resume));
    coroutine.set_str("yield", callback("yield", coroutine_yield));
    coroutine.set_str("status", callback("status", coroutine_status));
    coroutine.set_str("close", callback("close", coroutine_close));
    coroutine.set_str("running", callback("running", coroutine_running));
    coroutine.set_str("isyieldable", callback("isyieldable", coroutine_isyieldable));
    g.set_str("coroutine", Value::table(coroutine));
}

fn callback(
    name: &'static str,
    f: fn(&mut dyn HostContext, &[Value], bool) -> Result<Value, LuaError>,
) -> Value {
    Value::Callback(CallbackFunction::new(name, f))
}

/// The stateless pairs-style iterator over a plain table.
pub(crate) fn next_callback() -> Value {
    callback("next", next)
}

fn next(_ctx: &mut dyn HostContext, args: &[Value], _method: bool) -> Result<Value, LuaError> {
    let table = match args.first().map(|v| v.scalar()) {
        Some(Value::Table(t)) => t,
        other => {
            return Err(LuaError::runtime(format!(
                "bad argument #1 to 'next' (table expected, got {})",
                other.map(|v| v.type_name()).unwrap_or("no value")
            )))
        }
    };
    let key = args.get(1).map(|v| v.scalar()).unwrap_or(Value::Nil);
    let result = match table.borrow().next_pair(&key)? {
        Some((k, v)) => Ok(Value::Tuple(vec![k, v].into())),
        None => Ok(Value::Nil),
    };
    result
}

fn error(_ctx: &mut dyn HostContext, args: &[Value], _method: bool) -> Result<Value, LuaError> {
    let message = match args.first().map(|v| v.scalar()) {
        Some(Value::Str(s)) => s.to_string(),
        Some(other) => other.to_string(),
        None => "nil".to_string(),
    };
    Err(LuaError::runtime(message))
}

// ===== Protected calls =====

fn pcall(ctx: &mut dyn HostContext, args: &[Value], _method: bool) -> Result<Value, LuaError> {
    let target = args.first().cloned().unwrap_or(Value::Nil);
    let rest = args.get(1..).unwrap_or(&[]);
    set_error_handler_strategy("pcall", ctx, target, rest, None)
}

fn xpcall(ctx: &mut dyn HostContext, args: &[Value], _method: bool) -> Result<Value, LuaError> {
    let target = args.first().cloned().unwrap_or(Value::Nil);
    let handler = args.get(1).cloned().unwrap_or(Value::Nil);
    if !handler.is_callable_function() {
        return Err(LuaError::runtime(
            "bad argument #2 to 'xpcall' (function expected)",
        ));
    }
    let rest = if args.len() > 2 { &args[2..] } else { &[] };
    set_error_handler_strategy("xpcall", ctx, target, rest, Some(handler))
}

/// Shared pcall/xpcall strategy: script targets become a tail-call request
/// carrying the success continuation and error handler; callback targets run
/// inline under the same contract.
fn set_error_handler_strategy(
    name: &'static str,
    ctx: &mut dyn HostContext,
    target: Value,
    call_args: &[Value],
    unwind_decorator: Option<Value>,
) -> Result<Value, LuaError> {
    match &target {
        Value::Callback(cb) => {
            let invoked = cb.invoke(ctx, call_args, false);
            match invoked {
                Ok(Value::TailCall(tcd)) => {
                    if tcd.continuation.is_some() || tcd.error_handler.is_some() {
                        return Err(LuaError::runtime(format!(
                            "the function passed to {name} cannot be called directly by {name}. \
                             wrap in a script function instead."
                        )));
                    }
                    Ok(Value::tail_call(TailCallData {
                        function: tcd.function.clone(),
                        args: tcd.args.clone(),
                        continuation: Some(success_continuation(name)),
                        error_handler: Some(failure_handler(name)),
                        unwind_decorator,
                    }))
                }
                Ok(Value::Yield(_)) => Err(LuaError::runtime(format!(
                    "the function passed to {name} cannot be called directly by {name}. \
                     wrap in a script function instead."
                ))),
                Ok(ret) => Ok(Value::tuple(vec![Value::TRUE, ret])),
                Err(fault) if fault.is_recoverable() => {
                    let message = match &unwind_decorator {
                        Some(handler) => decorate_message(ctx, handler, fault.decorated_message()),
                        None => fault.decorated_message(),
                    };
                    Ok(Value::Tuple(
                        vec![Value::FALSE, Value::string(message)].into(),
                    ))
                }
                Err(fault) => Err(fault),
            }
        }
        Value::Function(_) => Ok(Value::tail_call(TailCallData {
            function: target.clone(),
            args: call_args.to_vec(),
            continuation: Some(success_continuation(name)),
            error_handler: Some(failure_handler(name)),
            unwind_decorator,
        })),
        _ => Ok(Value::Tuple(
            vec![
                Value::FALSE,
                Value::string(format!("attempt to {name} a non-function")),
            ]
            .into(),
        )),
    }
}

fn success_continuation(name: &'static str) -> CallbackFunction {
    CallbackFunction::new(name, |_ctx, args: &[Value], _method| {
        let ret = args.first().cloned().unwrap_or(Value::Void);
        Ok(Value::tuple(vec![Value::TRUE, ret]))
    })
}

fn failure_handler(name: &'static str) -> CallbackFunction {
    CallbackFunction::new(name, |_ctx, args: &[Value], _method| {
        let message = args.first().cloned().unwrap_or(Value::Nil);
        Ok(Value::Tuple(vec![Value::FALSE, message].into()))
    })
}

/// Runs an xpcall message handler outside the unwind path (callback
/// targets). A faulting handler yields the canonical fixed message.
fn decorate_message(ctx: &mut dyn HostContext, handler: &Value, message: String) -> String {
    match ctx.call(handler, &[Value::string(message.clone())]) {
        Ok(rewritten) => {
            let scalar = rewritten.scalar();
            if matches!(scalar, Value::Void) {
                message
            } else {
                scalar.to_string()
            }
        }
        Err(_) => "error in error handling".to_string(),
    }
}

// ===== Coroutine surface =====

fn coroutine_create(
    ctx: &mut dyn HostContext,
    args: &[Value],
    _method: bool,
) -> Result<Value, LuaError> {
    let function = args.first().cloned().unwrap_or(Value::Nil);
    ctx.create_coroutine(&function)
}

fn coroutine_resume(
    ctx: &mut dyn HostContext,
    args: &[Value],
    _method: bool,
) -> Result<Value, LuaError> {
    let handle = args.first().cloned().unwrap_or(Value::Nil);
    let rest = if args.len() > 1 { &args[1..] } else { &[] };
    match ctx.resume_coroutine(&handle, rest) {
        // a forced yield cascades: returning the marker suspends the
        // resuming coroutine as well
        Ok(result @ Value::Yield(_)) => Ok(result),
        Ok(result) => Ok(Value::tuple(vec![Value::TRUE, result])),
        Err(fault) if fault.is_recoverable() => Ok(Value::Tuple(
            vec![
                Value::FALSE,
                Value::string(fault.decorated_message()),
            ]
            .into(),
        )),
        Err(fault) => Err(fault),
    }
}

fn coroutine_yield(
    _ctx: &mut dyn HostContext,
    args: &[Value],
    _method: bool,
) -> Result<Value, LuaError> {
    Ok(Value::yield_request(args.to_vec()))
}

fn coroutine_status(
    ctx: &mut dyn HostContext,
    args: &[Value],
    _method: bool,
) -> Result<Value, LuaError> {
    let handle = args.first().cloned().unwrap_or(Value::Nil);
    Ok(Value::string(ctx.coroutine_status(&handle)?))
}

fn coroutine_close(
    ctx: &mut dyn HostContext,
    args: &[Value],
    _method: bool,
) -> Result<Value, LuaError> {
    let handle = args.first().cloned().unwrap_or(Value::Nil);
    ctx.close_coroutine(&handle)
}

fn coroutine_running(
    ctx: &mut dyn HostContext,
    _args: &[Value],
    _method: bool,
) -> Result<Value, LuaError> {
    Ok(match ctx.current_coroutine() {
        Some(handle) => Value::Tuple(vec![handle, Value::FALSE].into()),
        None => Value::Tuple(vec![Value::Nil, Value::TRUE].into()),
    })
}

fn coroutine_isyieldable(
    ctx: &mut dyn HostContext,
    _args: &[Value],
    _method: bool,
) -> Result<Value, LuaError> {
    Ok(Value::Boolean(ctx.can_yield()))
}
