//! Metamethod event names

pub const INDEX: &str = "__index";
pub const NEWINDEX: &str = "__newindex";
pub const CALL: &str = "__call";
pub const ADD: &str = "__add";
pub const SUB: &str = "__sub";
pub const MUL: &str = "__mul";
pub const DIV: &str = "__div";
pub const MOD: &str = "__mod";
pub const IDIV: &str = "__idiv";
pub const POW: &str = "__pow";
pub const UNM: &str = "__unm";
pub const CONCAT: &str = "__concat";
pub const LEN: &str = "__len";
pub const EQ: &str = "__eq";
pub const LT: &str = "__lt";
pub const LE: &str = "__le";
pub const BAND: &str = "__band";
pub const BOR: &str = "__bor";
pub const BXOR: &str = "__bxor";
pub const BNOT: &str = "__bnot";
pub const SHL: &str = "__shl";
pub const SHR: &str = "__shr";
pub const CLOSE: &str = "__close";
/// Extension: lets arbitrary values provide their own iteration triplet.
pub const ITERATOR: &str = "__iterator";
