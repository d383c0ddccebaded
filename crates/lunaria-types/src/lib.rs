//! Lunaria data model
//!
//! Leaf types shared by the VM and embedders: the numeric tower with
//! integer/float subtyping, tagged value cells, tables with metatables,
//! symbol references, closures with shared upvalues, the host-function
//! contract, and the error taxonomy.

pub mod callback;
pub mod closure;
pub mod error;
pub mod metamethods;
pub mod number;
pub mod symbol;
pub mod table;
pub mod userdata;
pub mod value;
pub mod version;

// Re-export main types
pub use callback::{CallbackFunction, HostContext};
pub use closure::{Closure, ClosureScope};
pub use error::{LuaError, SandboxViolationKind};
pub use number::Number;
pub use symbol::{SymbolAttributes, SymbolKind, SymbolRef};
pub use table::Table;
pub use userdata::UserData;
pub use value::{adjust_tuple, new_cell, Cell, TableRef, TailCallData, Value, YieldRequest};
pub use version::LuaVersion;
