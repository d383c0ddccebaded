use super::helpers::*;
use crate::debug::{Breakpoint, Debugger, StepMode};
use lunaria_types::Value;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Default)]
struct RecordingDebugger {
    pauses: Vec<usize>,
    errors: Vec<String>,
    ended: u32,
    mode_after_pause: StepMode,
}

impl Debugger for RecordingDebugger {
    fn on_pause(&mut self, ip: usize, _source: Option<&crate::bytecode::SourceRef>) -> StepMode {
        self.pauses.push(ip);
        self.mode_after_pause
    }

    fn on_runtime_error(&mut self, message: &str) -> bool {
        self.errors.push(message.to_string());
        false
    }

    fn on_execution_ended(&mut self) {
        self.ended += 1;
    }
}

/// Stepping observes every instruction of the run.
#[test]
fn step_mode_observes_each_instruction() {
    let s = script(vec![begin_fn(0), bind_args(vec![]), int(1), ret1()]);
    let hook = Rc::new(RefCell::new(RecordingDebugger {
        mode_after_pause: StepMode::Step,
        ..RecordingDebugger::default()
    }));
    s.attach_debugger(hook.clone());
    {
        // stepping starts armed
        s.add_breakpoint(Breakpoint::Address(0));
    }
    run(&s, 0).unwrap();

    let recorded = hook.borrow();
    // pause at the breakpoint, then at every following instruction
    assert_eq!(recorded.pauses, vec![0, 1, 2, 3]);
    assert_eq!(recorded.ended, 1);
}

/// An address breakpoint pauses only where it points.
#[test]
fn address_breakpoint_pauses_once() {
    let s = script(vec![begin_fn(0), bind_args(vec![]), int(1), ret1()]);
    let hook = Rc::new(RefCell::new(RecordingDebugger::default()));
    s.attach_debugger(hook.clone());
    s.add_breakpoint(Breakpoint::Address(2));
    run(&s, 0).unwrap();

    assert_eq!(hook.borrow().pauses, vec![2]);
}

/// Runtime faults are offered to the debugger before unwinding.
#[test]
fn runtime_errors_are_signalled() {
    let probe = script(vec![]);
    let error = probe.get_global("error");
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(error),
        str_lit("observed"),
        call(1),
        ret1(),
    ]);
    let hook = Rc::new(RefCell::new(RecordingDebugger::default()));
    s.attach_debugger(hook.clone());
    let _ = run(&s, 0).unwrap_err();

    let recorded = hook.borrow();
    assert_eq!(recorded.errors.len(), 1);
    assert!(recorded.errors[0].contains("observed"));
    assert_eq!(recorded.ended, 1);
}

/// One ended notification per full host call, even with nested frames.
#[test]
fn execution_ended_fires_once_per_host_call() {
    let s = script(vec![
        // f at 0
        begin_fn(0),
        bind_args(vec![]),
        int(5),
        ret1(),
        // main at 4
        begin_fn(0),
        bind_args(vec![]),
        closure(0),
        call(0),
        ret1(),
    ]);
    let hook = Rc::new(RefCell::new(RecordingDebugger::default()));
    s.attach_debugger(hook.clone());
    run(&s, 4).unwrap();
    run(&s, 4).unwrap();

    assert_eq!(hook.borrow().ended, 2);
}

/// The debugger watches child processors too: coroutines share the debug
/// context.
#[test]
fn coroutines_share_the_debug_context() {
    let s = script(vec![begin_fn(0), bind_args(vec![]), int(9), ret1()]);
    let hook = Rc::new(RefCell::new(RecordingDebugger::default()));
    s.attach_debugger(hook.clone());
    s.add_breakpoint(Breakpoint::Address(2));

    let f = Value::Function(Rc::new(lunaria_types::Closure::plain(0)));
    let handle = s.create_coroutine(&f).unwrap();
    let co = s.coroutine(&handle).unwrap();
    co.resume(&[]).unwrap();

    assert_eq!(hook.borrow().pauses, vec![2]);
}
