//! Tables: the associative workhorse plus metatable attachment
//!
//! Storage is a contiguous array part for keys 1..n and a hash part for
//! everything else. Float keys holding whole values normalize to integer
//! keys so `t[1]` and `t[1.0]` alias.

use crate::error::LuaError;
use crate::value::{TableRef, Value};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Identity key for reference-typed table keys.
#[derive(Debug, Clone)]
pub struct RefKey {
    ptr: usize,
    /// Kept so iteration can hand the original key back.
    pub value: Value,
}

impl RefKey {
    fn new(value: &Value) -> Option<Self> {
        let ptr = match value {
            Value::Table(t) => Rc::as_ptr(t) as *const () as usize,
            Value::Function(f) => Rc::as_ptr(f) as usize,
            Value::UserData(u) => Rc::as_ptr(u) as *const () as usize,
            Value::Coroutine(c) => Rc::as_ptr(c) as *const () as usize,
            _ => return None,
        };
        Some(RefKey {
            ptr,
            value: value.clone(),
        })
    }
}

impl PartialEq for RefKey {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for RefKey {}

impl Hash for RefKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

/// Normalized hashable table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Int(i64),
    /// Bit pattern of a float with no integer representation.
    Float(u64),
    Str(Rc<str>),
    Bool(bool),
    Ref(RefKey),
}

impl TableKey {
    /// Normalizes a value into a key. Nil has no key; NaN floats have none
    /// either (callers turn that into an error on writes).
    pub fn from_value(value: &Value) -> Option<TableKey> {
        match value {
            Value::Nil | Value::Void => None,
            Value::Boolean(b) => Some(TableKey::Bool(*b)),
            Value::Number(n) => match n.to_int() {
                Some(i) => Some(TableKey::Int(i)),
                None => {
                    let f = n.as_float();
                    if f.is_nan() {
                        None
                    } else {
                        Some(TableKey::Float(f.to_bits()))
                    }
                }
            },
            Value::Str(s) => Some(TableKey::Str(s.clone())),
            other => RefKey::new(other).map(TableKey::Ref),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            TableKey::Int(i) => Value::int(*i),
            TableKey::Float(bits) => Value::float(f64::from_bits(*bits)),
            TableKey::Str(s) => Value::Str(s.clone()),
            TableKey::Bool(b) => Value::Boolean(*b),
            TableKey::Ref(r) => r.value.clone(),
        }
    }
}

/// A Lua table.
#[derive(Debug, Default)]
pub struct Table {
    array: Vec<Value>,
    hash: HashMap<TableKey, Value>,
    metatable: Option<TableRef>,
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    pub fn metatable(&self) -> Option<&TableRef> {
        self.metatable.as_ref()
    }

    pub fn set_metatable(&mut self, metatable: Option<TableRef>) {
        self.metatable = metatable;
    }

    /// Raw read; nil for missing keys and nil-typed keys.
    pub fn get(&self, key: &Value) -> Value {
        match TableKey::from_value(key) {
            Some(TableKey::Int(i)) if i >= 1 && (i as usize) <= self.array.len() => {
                self.array[i as usize - 1].clone()
            }
            Some(k) => self.hash.get(&k).cloned().unwrap_or(Value::Nil),
            None => Value::Nil,
        }
    }

    pub fn get_str(&self, key: &str) -> Value {
        self.hash
            .get(&TableKey::Str(Rc::from(key)))
            .cloned()
            .unwrap_or(Value::Nil)
    }

    /// Raw write. Nil keys and NaN keys are errors; assigning nil removes.
    pub fn set(&mut self, key: &Value, value: Value) -> Result<(), LuaError> {
        let k = TableKey::from_value(key).ok_or_else(|| {
            if key.is_nil() {
                LuaError::runtime("table index is nil")
            } else {
                LuaError::runtime("table index is NaN")
            }
        })?;
        self.set_key(k, value);
        Ok(())
    }

    pub fn set_str(&mut self, key: &str, value: Value) {
        self.set_key(TableKey::Str(Rc::from(key)), value);
    }

    fn set_key(&mut self, key: TableKey, value: Value) {
        if let TableKey::Int(i) = key {
            if i >= 1 && (i as usize) <= self.array.len() {
                self.array[i as usize - 1] = value;
                self.trim_array_tail();
                return;
            }
            if i as usize == self.array.len() + 1 && !value.is_nil() {
                self.array.push(value);
                self.migrate_from_hash();
                return;
            }
        }
        if value.is_nil() {
            self.hash.remove(&key);
        } else {
            self.hash.insert(key, value);
        }
    }

    /// Pulls keys n+1, n+2, ... out of the hash part after an append made
    /// them contiguous.
    fn migrate_from_hash(&mut self) {
        loop {
            let next = TableKey::Int(self.array.len() as i64 + 1);
            match self.hash.remove(&next) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    fn trim_array_tail(&mut self) {
        while matches!(self.array.last(), Some(v) if v.is_nil()) {
            self.array.pop();
        }
    }

    /// Appends during table construction; a trailing tuple expands into
    /// consecutive slots.
    pub fn init_next_array_key(&mut self, value: Value, expand_tuple: bool) {
        if expand_tuple {
            self.array.extend(value.expand());
            self.trim_array_tail();
        } else {
            self.array.push(value.scalar());
        }
    }

    /// The `#` border: the array part length, extended through any
    /// contiguous integer keys that ended up in the hash part.
    pub fn length(&self) -> i64 {
        let mut n = self.array.len() as i64;
        while self.hash.contains_key(&TableKey::Int(n + 1)) {
            n += 1;
        }
        n
    }

    /// Stateless `next`-style iteration: nil starts, the returned key
    /// continues, nil result ends. Array part first, then the hash part.
    pub fn next_pair(&self, key: &Value) -> Result<Option<(Value, Value)>, LuaError> {
        if key.is_nil() {
            return Ok(self.first_pair());
        }

        let k = TableKey::from_value(key)
            .ok_or_else(|| LuaError::runtime("invalid key to 'next'"))?;

        if let TableKey::Int(i) = k {
            if i >= 1 && (i as usize) <= self.array.len() {
                let next = i as usize; // zero-based index of the following slot
                if next < self.array.len() {
                    return Ok(Some((Value::int(i + 1), self.array[next].clone())));
                }
                return Ok(self.first_hash_pair());
            }
        }

        let mut found = false;
        for (hk, hv) in self.hash.iter() {
            if found {
                return Ok(Some((hk.to_value(), hv.clone())));
            }
            if *hk == k {
                found = true;
            }
        }
        if found {
            return Ok(None);
        }
        Err(LuaError::runtime("invalid key to 'next'"))
    }

    fn first_pair(&self) -> Option<(Value, Value)> {
        match self.array.first() {
            Some(v) => Some((Value::int(1), v.clone())),
            None => self.first_hash_pair(),
        }
    }

    fn first_hash_pair(&self) -> Option<(Value, Value)> {
        self.hash
            .iter()
            .next()
            .map(|(k, v)| (k.to_value(), v.clone()))
    }

    /// Rough payload size used by the allocation tracker.
    pub fn approximate_size(&self) -> usize {
        (self.array.len() + self.hash.len()) * std::mem::size_of::<Value>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_and_float_keys_alias() {
        let mut t = Table::new();
        t.set(&Value::int(1), Value::string("a")).unwrap();
        assert_eq!(t.get(&Value::float(1.0)), Value::string("a"));
    }

    #[test]
    fn nil_key_reads_nil_but_write_errors() {
        let mut t = Table::new();
        assert_eq!(t.get(&Value::Nil), Value::Nil);
        assert!(t.set(&Value::Nil, Value::int(1)).is_err());
        assert!(t.set(&Value::float(f64::NAN), Value::int(1)).is_err());
    }

    #[test]
    fn appends_extend_the_border() {
        let mut t = Table::new();
        t.set(&Value::int(2), Value::string("b")).unwrap();
        t.set(&Value::int(1), Value::string("a")).unwrap();
        assert_eq!(t.length(), 2);
    }

    #[test]
    fn removing_a_value_shrinks_the_border() {
        let mut t = Table::new();
        t.init_next_array_key(Value::int(10), false);
        t.init_next_array_key(Value::int(20), false);
        t.set(&Value::int(2), Value::Nil).unwrap();
        assert_eq!(t.length(), 1);
    }

    #[test]
    fn next_pair_walks_every_entry() {
        let mut t = Table::new();
        t.init_next_array_key(Value::int(10), false);
        t.set_str("k", Value::int(20));

        let mut seen = 0;
        let mut key = Value::Nil;
        while let Some((k, _)) = t.next_pair(&key).unwrap() {
            seen += 1;
            key = k;
        }
        assert_eq!(seen, 2);
    }

    #[test]
    fn trailing_tuple_expands_in_constructor() {
        let mut t = Table::new();
        let tup = Value::tuple(vec![Value::int(1), Value::int(2)]);
        t.init_next_array_key(tup, true);
        assert_eq!(t.length(), 2);
    }
}
