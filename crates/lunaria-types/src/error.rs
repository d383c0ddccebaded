//! Error taxonomy for the VM runtime
//!
//! Four kinds with different propagation rules: script runtime faults unwind
//! frame by frame and can be absorbed by handler frames (pcall); sandbox
//! violations unwind the same way once raised; internal faults and
//! host-boundary faults indicate impossible states and bypass script-level
//! handlers entirely.

use crate::value::Value;
use thiserror::Error;

/// Which sandbox ceiling was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxViolationKind {
    Instructions,
    Memory,
    Recursion,
}

impl std::fmt::Display for SandboxViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxViolationKind::Instructions => write!(f, "instruction limit"),
            SandboxViolationKind::Memory => write!(f, "memory limit"),
            SandboxViolationKind::Recursion => write!(f, "recursion limit"),
        }
    }
}

/// Runtime errors raised by the VM.
#[derive(Debug, Clone, Error)]
pub enum LuaError {
    /// A script-level fault: type errors, explicit `error()`, bad arguments.
    /// Recoverable by pcall-style handler frames.
    #[error("{message}")]
    Runtime {
        message: String,
        /// Message with source location prepended, filled during unwinding.
        decorated: Option<String>,
        /// Formatted stack traceback, when one was captured.
        traceback: Option<String>,
    },

    /// A sandbox ceiling was hit and no callback granted continuation.
    #[error("sandbox violation: {kind} exceeded (limit {limit}, observed {observed})")]
    Sandbox {
        kind: SandboxViolationKind,
        limit: i64,
        observed: i64,
    },

    /// A VM invariant broke. Never absorbed by script handlers.
    #[error("internal error: {0}")]
    Internal(String),

    /// Crossing processor/script ownership incorrectly. Never absorbed by
    /// script handlers.
    #[error("{0}")]
    Boundary(String),
}

impl LuaError {
    pub fn runtime(message: impl Into<String>) -> Self {
        LuaError::Runtime {
            message: message.into(),
            decorated: None,
            traceback: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        LuaError::Internal(message.into())
    }

    pub fn boundary(message: impl Into<String>) -> Self {
        LuaError::Boundary(message.into())
    }

    /// Whether the frame-by-frame unwind protocol may offer this error to
    /// handler frames. Internal and boundary faults pass straight through.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LuaError::Runtime { .. } | LuaError::Sandbox { .. })
    }

    /// The location-decorated message when present, the raw one otherwise.
    pub fn decorated_message(&self) -> String {
        match self {
            LuaError::Runtime {
                message, decorated, ..
            } => decorated.clone().unwrap_or_else(|| message.clone()),
            other => other.to_string(),
        }
    }

    /// Prepends a source location once; later decorations are ignored.
    pub fn decorate(&mut self, location: &str) {
        if let LuaError::Runtime {
            message, decorated, ..
        } = self
        {
            if decorated.is_none() {
                *decorated = Some(format!("{location}: {message}"));
            }
        }
    }

    /// Replaces the decorated message (used by pre-unwind message handlers).
    pub fn set_decorated(&mut self, text: String) {
        if let LuaError::Runtime { decorated, .. } = self {
            *decorated = Some(text);
        }
    }

    pub fn set_traceback(&mut self, text: String) {
        if let LuaError::Runtime { traceback, .. } = self {
            traceback.get_or_insert(text);
        }
    }

    // ===== Standard message factories =====

    pub fn arithmetic_on_non_number(l: &Value, r: &Value) -> Self {
        let offender = if l.as_number().is_none() { l } else { r };
        LuaError::runtime(format!(
            "attempt to perform arithmetic on a {} value",
            offender.type_name()
        ))
    }

    pub fn bitwise_on_non_integer(v: &Value) -> Self {
        match v.as_number() {
            Some(_) => LuaError::runtime("number has no integer representation"),
            None => LuaError::runtime(format!(
                "attempt to perform bitwise operation on a {} value",
                v.type_name()
            )),
        }
    }

    pub fn compare_invalid(l: &Value, r: &Value) -> Self {
        if l.type_name() == r.type_name() {
            LuaError::runtime(format!("attempt to compare two {} values", l.type_name()))
        } else {
            LuaError::runtime(format!(
                "attempt to compare {} with {}",
                l.type_name(),
                r.type_name()
            ))
        }
    }

    pub fn concat_on_invalid(l: &Value, r: &Value) -> Self {
        let offender = if l.as_concat_string().is_none() { l } else { r };
        LuaError::runtime(format!(
            "attempt to concatenate a {} value",
            offender.type_name()
        ))
    }

    pub fn len_on_invalid(v: &Value) -> Self {
        LuaError::runtime(format!(
            "attempt to get length of a {} value",
            v.type_name()
        ))
    }

    pub fn index_invalid_type(v: &Value, name: Option<&str>) -> Self {
        match name {
            Some(n) => LuaError::runtime(format!(
                "attempt to index a {} value ('{}')",
                v.type_name(),
                n
            )),
            None => LuaError::runtime(format!("attempt to index a {} value", v.type_name())),
        }
    }

    pub fn attempt_to_call(v: &Value, name: Option<&str>) -> Self {
        match name {
            Some(n) => LuaError::runtime(format!(
                "attempt to call a {} value ('{}')",
                v.type_name(),
                n
            )),
            None => LuaError::runtime(format!("attempt to call a {} value", v.type_name())),
        }
    }

    pub fn loop_in_index() -> Self {
        LuaError::runtime("'__index' chain too long; possible loop")
    }

    pub fn loop_in_newindex() -> Self {
        LuaError::runtime("'__newindex' chain too long; possible loop")
    }

    pub fn cannot_yield_main() -> Self {
        LuaError::runtime("attempt to yield from outside a coroutine")
    }

    pub fn cannot_yield_callback() -> Self {
        LuaError::runtime("attempt to yield across a callback boundary")
    }

    pub fn close_metamethod_expected(v: &Value) -> Self {
        LuaError::runtime(format!(
            "variable of type {} has no '__close' metamethod",
            v.type_name()
        ))
    }

    pub fn convert_to_number_failed() -> Self {
        LuaError::runtime("attempt to convert a non-number to a number")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoration_applies_once() {
        let mut err = LuaError::runtime("boom");
        err.decorate("chunk:3");
        err.decorate("chunk:9");
        assert_eq!(err.decorated_message(), "chunk:3: boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn recoverability_by_kind() {
        assert!(LuaError::runtime("x").is_recoverable());
        assert!(LuaError::Sandbox {
            kind: SandboxViolationKind::Instructions,
            limit: 10,
            observed: 11,
        }
        .is_recoverable());
        assert!(!LuaError::internal("x").is_recoverable());
        assert!(!LuaError::boundary("x").is_recoverable());
    }
}
