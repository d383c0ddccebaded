//! Script execution options

use crate::sandbox::SandboxOptions;
use lunaria_types::LuaVersion;

/// Tunables for a script instance. Shared read-only by every processor of
/// the script's coroutine tree.
#[derive(Debug, Clone)]
pub struct ScriptOptions {
    /// Language compatibility target for version-gated behaviors.
    pub version: LuaVersion,
    /// Sandbox ceilings and callbacks.
    pub sandbox: SandboxOptions,
    /// Stack population above which eligible calls reuse their frame.
    /// Keeping shallow chains un-optimized preserves complete tracebacks.
    pub tail_call_threshold: usize,
    /// Instructions a coroutine may run per resume before the scheduler
    /// forces a yield. Zero disables forced preemption.
    pub auto_yield_instructions: u64,
    /// Fault when two OS threads enter the same processor.
    pub check_thread_access: bool,
    /// Include the offending variable name in index/call type errors.
    pub lua_compatible_errors: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        ScriptOptions {
            version: LuaVersion::LATEST,
            sandbox: SandboxOptions::unrestricted(),
            tail_call_threshold: 16,
            auto_yield_instructions: 0,
            check_thread_access: true,
            lua_compatible_errors: true,
        }
    }
}
