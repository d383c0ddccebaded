//! Integration tests driving the VM through hand-assembled bytecode.

mod helpers;

mod debugger;
mod dispatch;
mod errors;
mod sandbox;
mod scope;
