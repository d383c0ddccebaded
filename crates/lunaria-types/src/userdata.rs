//! Userdata descriptor contract
//!
//! Host objects exposed to scripts implement this descriptor. The VM routes
//! indexing and metamethod probes through it; everything else about the
//! hosted object stays opaque.

use crate::value::Value;
use std::any::Any;

/// Descriptor for a host object reachable from script code.
pub trait UserData: Any {
    /// Name reported by `type`-style introspection and error messages.
    fn type_name(&self) -> &str;

    /// Reads a member. `None` means the member does not exist, which the VM
    /// reports as a missing-field error rather than returning nil.
    fn index(&self, key: &Value, is_name_index: bool) -> Option<Value>;

    /// Writes a member. Returning `false` reports a missing-field error.
    fn set_index(&self, key: &Value, value: Value, is_name_index: bool) -> bool;

    /// Descriptor-level metamethod hook, probed after both operands'
    /// metatables during operator dispatch.
    fn metamethod(&self, name: &str) -> Option<Value> {
        let _ = name;
        None
    }
}
