//! Host-function contract
//!
//! A host callback receives the execution context, a materialized argument
//! list, and a method-call flag, and returns a single value cell. The return
//! value may be an ordinary value, a tail-call request (the caller re-enters
//! the call protocol), or a yield request (the processor suspends).

use crate::error::LuaError;
use crate::value::Value;
use std::fmt;
use std::rc::Rc;

/// Signature every host function implements.
pub type CallbackFn =
    dyn Fn(&mut dyn HostContext, &[Value], bool) -> Result<Value, LuaError>;

/// Narrow view of the running processor handed to host callbacks. This is
/// the only way library code reaches back into the VM.
pub trait HostContext {
    /// Calls a script or host function synchronously and returns its result.
    fn call(&mut self, function: &Value, args: &[Value]) -> Result<Value, LuaError>;

    /// Creates a coroutine handle around the given function.
    fn create_coroutine(&mut self, function: &Value) -> Result<Value, LuaError>;

    /// Resumes a coroutine handle. Returns the yielded values or final
    /// results as a tuple.
    fn resume_coroutine(&mut self, handle: &Value, args: &[Value]) -> Result<Value, LuaError>;

    /// Closes a coroutine handle, returning Lua's `(true)` or
    /// `(false, error)` shape.
    fn close_coroutine(&mut self, handle: &Value) -> Result<Value, LuaError>;

    /// The Lua status string for a coroutine handle.
    fn coroutine_status(&self, handle: &Value) -> Result<&'static str, LuaError>;

    /// A handle to the coroutine this context runs on, when it is not the
    /// main processor.
    fn current_coroutine(&self) -> Option<Value>;

    /// Whether a yield request returned from this callback will be honored.
    fn can_yield(&self) -> bool;

    /// Looks up a metamethod for a value, honoring userdata descriptors.
    fn metamethod(&self, value: &Value, name: &str) -> Option<Value>;
}

/// A named, reference-counted host function.
#[derive(Clone)]
pub struct CallbackFunction {
    name: Rc<str>,
    func: Rc<CallbackFn>,
}

impl CallbackFunction {
    pub fn new(
        name: impl Into<Rc<str>>,
        func: impl Fn(&mut dyn HostContext, &[Value], bool) -> Result<Value, LuaError> + 'static,
    ) -> Self {
        CallbackFunction {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invokes the callback.
    pub fn invoke(
        &self,
        ctx: &mut dyn HostContext,
        args: &[Value],
        is_method_call: bool,
    ) -> Result<Value, LuaError> {
        (self.func)(ctx, args, is_method_call)
    }

    /// Identity comparison; callbacks have no value equality.
    pub fn ptr_eq(&self, other: &CallbackFunction) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for CallbackFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackFunction({})", self.name)
    }
}
