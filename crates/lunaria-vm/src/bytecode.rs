//! Bytecode contract
//!
//! The VM consumes an ordered instruction array plus an entry-point index.
//! Each instruction carries an opcode, up to two numeric operands, an
//! optional literal value, an optional symbol or symbol list, an optional
//! name, and an optional source reference. How a compiler encodes them is
//! its own business.

use lunaria_types::{LuaError, SymbolRef, Value};
use std::fmt;
use std::rc::Rc;

/// The instruction set executed by the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    // ===== Bookkeeping =====
    Nop,
    Debug,
    Meta,

    // ===== Stack =====
    Pop,
    Copy,
    Swap,
    Literal,
    Scalar,
    ToBool,
    ToNum,
    MkTuple,
    ExpTuple,

    // ===== Arithmetic =====
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    FloorDiv,
    Power,
    Neg,
    Concat,
    Len,

    // ===== Bitwise =====
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    ShiftLeft,
    ShiftRight,

    // ===== Comparison & logic =====
    Eq,
    Less,
    LessEq,
    Not,
    CNot,

    // ===== Jumps =====
    Jump,
    Jf,
    JNil,
    JtOrPop,
    JfOrPop,
    JFor,
    Incr,

    // ===== Tables =====
    NewTable,
    TblInitN,
    TblInitI,

    // ===== Indexing =====
    Index,
    IndexN,
    IndexL,
    IndexSet,
    IndexSetN,
    IndexSetL,

    // ===== Calls =====
    Call,
    ThisCall,
    Ret,
    Args,
    BeginFn,
    Closure,

    // ===== Iterator protocol =====
    IterPrep,
    IterUpd,

    // ===== Scope & resource blocks =====
    Enter,
    Leave,
    Exit,
    Clean,
    Local,
    UpValue,
    StoreLcl,
    StoreUpv,

    Invalid,
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Source position an instruction was compiled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub source: Rc<str>,
    pub line: u32,
}

impl SourceRef {
    pub fn new(source: impl Into<Rc<str>>, line: u32) -> Self {
        SourceRef {
            source: source.into(),
            line,
        }
    }

    pub fn location(&self) -> String {
        format!("{}:{}", self.source, self.line)
    }
}

/// One VM instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: OpCode,
    pub num_val: i64,
    pub num_val2: i64,
    pub value: Option<Value>,
    pub symbol: Option<SymbolRef>,
    pub symbols: Rc<[SymbolRef]>,
    pub name: Option<Rc<str>>,
    pub source: Option<SourceRef>,
}

impl Instruction {
    pub fn new(op: OpCode) -> Self {
        Instruction {
            op,
            num_val: 0,
            num_val2: 0,
            value: None,
            symbol: None,
            symbols: Rc::from(Vec::new()),
            name: None,
            source: None,
        }
    }

    pub fn with_num(op: OpCode, num_val: i64) -> Self {
        let mut i = Instruction::new(op);
        i.num_val = num_val;
        i
    }

    pub fn with_nums(op: OpCode, num_val: i64, num_val2: i64) -> Self {
        let mut i = Instruction::with_num(op, num_val);
        i.num_val2 = num_val2;
        i
    }

    pub fn with_value(op: OpCode, value: Value) -> Self {
        let mut i = Instruction::new(op);
        i.value = Some(value);
        i
    }

    pub fn with_symbol(op: OpCode, symbol: SymbolRef) -> Self {
        let mut i = Instruction::new(op);
        i.symbol = Some(symbol);
        i
    }

    pub fn with_symbols(op: OpCode, symbols: Vec<SymbolRef>) -> Self {
        let mut i = Instruction::new(op);
        i.symbols = symbols.into();
        i
    }

    pub fn named(mut self, name: impl Into<Rc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn at(mut self, source: SourceRef) -> Self {
        self.source = Some(source);
        self
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:10} {} {}", self.op.to_string(), self.num_val, self.num_val2)?;
        if let Some(v) = &self.value {
            write!(f, " {v}")?;
        }
        if let Some(s) = &self.symbol {
            write!(f, " {s}")?;
        }
        if let Some(n) = &self.name {
            write!(f, " {n}")?;
        }
        Ok(())
    }
}

/// A compiled chunk: the instruction stream the processors execute.
#[derive(Debug, Default)]
pub struct Chunk {
    pub code: Vec<Instruction>,
    pub name: String,
}

impl Chunk {
    pub fn new(name: impl Into<String>, code: Vec<Instruction>) -> Self {
        Chunk {
            code,
            name: name.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Best-available location string for an instruction pointer.
    pub fn location(&self, ip: usize) -> String {
        match self.code.get(ip).and_then(|i| i.source.as_ref()) {
            Some(sref) => sref.location(),
            None => format!("bytecode:{ip}"),
        }
    }
}

// ===== Dump header contract =====

/// Magic prefix of a dumped chunk stream.
pub const DUMP_MAGIC: u64 = 0x4C55_4E41_5249_4131; // "LUNARIA1"

/// Highest dump format version this VM decodes.
pub const DUMP_VERSION: u32 = 1;

/// Writes the dump header: magic, then format version.
pub fn write_dump_header(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&DUMP_MAGIC.to_le_bytes());
    buf.extend_from_slice(&DUMP_VERSION.to_le_bytes());
}

/// Validates a dump header before any body content is decoded, returning the
/// stream's format version.
pub fn check_dump_header(bytes: &[u8]) -> Result<u32, LuaError> {
    if bytes.len() < 12 {
        return Err(LuaError::runtime("truncated chunk stream"));
    }
    let magic = u64::from_le_bytes(bytes[0..8].try_into().unwrap_or_default());
    if magic != DUMP_MAGIC {
        return Err(LuaError::runtime("not a compiled chunk stream"));
    }
    let version = u32::from_le_bytes(bytes[8..12].try_into().unwrap_or_default());
    if version == 0 || version > DUMP_VERSION {
        return Err(LuaError::runtime(format!(
            "unsupported chunk format version {version}"
        )));
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut buf = Vec::new();
        write_dump_header(&mut buf);
        assert_eq!(check_dump_header(&buf).unwrap(), DUMP_VERSION);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut buf = Vec::new();
        write_dump_header(&mut buf);
        buf[0] ^= 0xFF;
        assert!(check_dump_header(&buf).is_err());
    }

    #[test]
    fn header_rejects_future_version() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&DUMP_MAGIC.to_le_bytes());
        buf.extend_from_slice(&99u32.to_le_bytes());
        assert!(check_dump_header(&buf).is_err());
    }

    #[test]
    fn header_rejects_truncation() {
        assert!(check_dump_header(&[0x4C, 0x55]).is_err());
    }

    #[test]
    fn chunk_location_falls_back_to_ip() {
        let chunk = Chunk::new("demo", vec![Instruction::new(OpCode::Nop)]);
        assert_eq!(chunk.location(0), "bytecode:0");
        assert_eq!(chunk.location(7), "bytecode:7");
    }
}
