use super::helpers::*;
use crate::bytecode::OpCode;
use crate::options::ScriptOptions;
use crate::sandbox::SandboxOptions;
use lunaria_types::{LuaError, SandboxViolationKind, Value};
use std::cell::Cell;
use std::rc::Rc;

fn spin_forever() -> Vec<crate::bytecode::Instruction> {
    vec![begin_fn(0), bind_args(vec![]), num(OpCode::Jump, 2)]
}

/// An instruction ceiling of N with no override faults exactly when the
/// (N+1)-th instruction would execute.
#[test]
fn instruction_limit_faults_exactly_after_the_budget() {
    let options = ScriptOptions {
        sandbox: SandboxOptions::unrestricted().with_instruction_limit(10),
        ..ScriptOptions::default()
    };
    let s = script_with(spin_forever(), options);
    let err = run(&s, 0).unwrap_err();
    match err {
        LuaError::Sandbox {
            kind,
            limit,
            observed,
        } => {
            assert_eq!(kind, SandboxViolationKind::Instructions);
            assert_eq!(limit, 10);
            assert_eq!(observed, 11);
        }
        other => panic!("expected sandbox violation, got {other:?}"),
    }
}

/// A short program under the budget is unaffected.
#[test]
fn instruction_limit_leaves_short_runs_alone() {
    let options = ScriptOptions {
        sandbox: SandboxOptions::unrestricted().with_instruction_limit(100),
        ..ScriptOptions::default()
    };
    let s = script_with(
        vec![begin_fn(0), bind_args(vec![]), int(1), ret1()],
        options,
    );
    assert_eq!(run(&s, 0).unwrap(), Value::int(1));
}

/// The exceeded-callback may grant continuation; granting resets the
/// counter, declining faults.
#[test]
fn instruction_limit_callback_grants_resets() {
    let grants = Rc::new(Cell::new(2u32));
    let seen = Rc::new(Cell::new(0u32));
    let grants_cb = grants.clone();
    let seen_cb = seen.clone();

    let options = ScriptOptions {
        sandbox: SandboxOptions::unrestricted()
            .with_instruction_limit(16)
            .on_instruction_limit(move |_observed| {
                seen_cb.set(seen_cb.get() + 1);
                if grants_cb.get() > 0 {
                    grants_cb.set(grants_cb.get() - 1);
                    true
                } else {
                    false
                }
            }),
        ..ScriptOptions::default()
    };
    let s = script_with(spin_forever(), options);
    let err = run(&s, 0).unwrap_err();
    assert!(matches!(
        err,
        LuaError::Sandbox {
            kind: SandboxViolationKind::Instructions,
            ..
        }
    ));
    // two grants, then the decline that faulted
    assert_eq!(seen.get(), 3);
}

/// The memory ceiling trips on its rate-limited cadence while a loop keeps
/// allocating tables.
#[test]
fn memory_limit_trips_on_allocation() {
    let options = ScriptOptions {
        sandbox: SandboxOptions::unrestricted().with_memory_limit(4096),
        ..ScriptOptions::default()
    };
    let s = script_with(
        vec![
            begin_fn(0),
            bind_args(vec![]),
            op(OpCode::NewTable),
            pop1(),
            num(OpCode::Jump, 2),
        ],
        options,
    );
    let err = run(&s, 0).unwrap_err();
    assert!(matches!(
        err,
        LuaError::Sandbox {
            kind: SandboxViolationKind::Memory,
            ..
        }
    ));
}

/// Unbounded recursion trips the call-depth ceiling.
#[test]
fn recursion_limit_trips_on_deep_calls() {
    let options = ScriptOptions {
        sandbox: SandboxOptions::unrestricted().with_call_depth_limit(32),
        ..ScriptOptions::default()
    };
    let s = script_with(
        vec![
            // f() at 0: return f() + 1  (not a tail call)
            begin_fn(0),
            bind_args(vec![]),
            closure(0),
            call(0),
            int(1),
            op(OpCode::Add),
            ret1(),
            // main at 7
            begin_fn(0),
            bind_args(vec![]),
            closure(0),
            call(0),
            ret1(),
        ],
        options,
    );
    let err = run(&s, 7).unwrap_err();
    assert!(matches!(
        err,
        LuaError::Sandbox {
            kind: SandboxViolationKind::Recursion,
            ..
        }
    ));
}

/// Sandbox violations unwind like script faults: pcall can observe them as
/// (false, message).
#[test]
fn sandbox_violation_is_reported_through_pcall() {
    let probe = script(vec![]);
    let pcall = probe.get_global("pcall");

    let options = ScriptOptions {
        sandbox: SandboxOptions::unrestricted().with_instruction_limit(64),
        ..ScriptOptions::default()
    };
    let s = script_with(
        vec![
            // main at 0: return pcall(spin)
            begin_fn(0),
            bind_args(vec![]),
            lit(pcall),
            closure(6),
            call(1),
            ret1(),
            // spin at 6
            begin_fn(0),
            bind_args(vec![]),
            num(OpCode::Jump, 8),
        ],
        options,
    );

    let items = tuple_items(&run(&s, 0).unwrap());
    assert_eq!(items[0], Value::FALSE);
    assert!(items[1].to_string().contains("sandbox violation"));
}

/// The allocation tracker feeds the embedder-visible counter.
#[test]
fn allocation_tracker_reports_usage() {
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        op(OpCode::NewTable),
        ret1(),
    ]);
    assert_eq!(s.allocated_bytes(), 0);
    run(&s, 0).unwrap();
    assert!(s.allocated_bytes() > 0);
}
