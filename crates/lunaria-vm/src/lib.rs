//! Lunaria virtual machine
//!
//! An embeddable VM executing compiled bytecode for a dynamically typed,
//! Lua-compatible scripting language: integer/float numeric subtyping,
//! closures with shared upvalues, coroutines, metatables, tail calls, and
//! to-be-closed resource cleanup.
//!
//! # Architecture
//!
//! - `bytecode`: the instruction contract consumed by the dispatch loop
//! - `processor`: the execution engine (dispatch loop, call protocol,
//!   coroutine scheduling, unwinding)
//! - `sandbox`: the resource governor (instructions, memory, call depth)
//! - `corelib`: pcall/xpcall, the coroutine surface, and the default table
//!   iterator
//! - `script`: the host embedding object
//!
//! Execution is single-threaded and cooperative: a script is a tree of
//! processors where only the active leaf runs, and control moves only
//! through explicit resume/yield.

pub mod bytecode;
pub mod corelib;
pub mod coroutine;
pub mod debug;
pub mod options;
pub mod processor;
pub mod sandbox;
pub mod script;

mod frame;

// Re-export main types
pub use bytecode::{check_dump_header, write_dump_header, Chunk, Instruction, OpCode, SourceRef};
pub use coroutine::{Coroutine, CoroutineState};
pub use debug::{Breakpoint, DebugContext, Debugger, StepMode};
pub use options::ScriptOptions;
pub use sandbox::{AllocationTracker, SandboxOptions};
pub use script::Script;

#[cfg(test)]
mod tests;
