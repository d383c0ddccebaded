//! Language compatibility targets

/// Lua compatibility version the VM emulates. Version gates cover the few
/// behaviors that changed across releases: string coercion in arithmetic,
/// the `__lt` fallback for `__le`, and integer modulo-by-zero handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LuaVersion {
    Lua51,
    Lua52,
    Lua53,
    Lua54,
    Lua55,
}

impl LuaVersion {
    /// The default target for new scripts.
    pub const LATEST: LuaVersion = LuaVersion::Lua54;

    /// Whether arithmetic operators coerce numeric strings themselves.
    /// From 5.4 on the coercion moved to the string metatable.
    pub fn coerces_strings_in_arithmetic(&self) -> bool {
        *self < LuaVersion::Lua54
    }

    /// Whether a missing `__le` falls back to `__lt` with swapped operands.
    /// 5.5 removes the fallback.
    pub fn allows_lt_fallback(&self) -> bool {
        *self != LuaVersion::Lua55
    }
}

impl Default for LuaVersion {
    fn default() -> Self {
        LuaVersion::LATEST
    }
}
