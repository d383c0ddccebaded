//! Numeric subtyping (integer/float) following Lua 5.3+ semantics
//!
//! Numbers come in two flavors: 64-bit two's complement integers and 64-bit
//! IEEE 754 floats. Arithmetic keeps integer-ness when both operands are
//! integers and the operator preserves it; division and power always produce
//! floats. Integer overflow wraps.

use crate::error::LuaError;
use crate::version::LuaVersion;
use std::cmp::Ordering;
use std::fmt;

/// A Lua number: either an integer or a float subtype.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub const ZERO: Number = Number::Int(0);
    pub const ONE: Number = Number::Int(1);
    pub const MAX_INTEGER: Number = Number::Int(i64::MAX);
    pub const MIN_INTEGER: Number = Number::Int(i64::MIN);

    /// Whether this number is the integer subtype.
    #[inline]
    pub fn is_int(&self) -> bool {
        matches!(self, Number::Int(_))
    }

    /// Whether this number is the float subtype.
    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, Number::Float(_))
    }

    /// The value as a float, converting integers (may lose precision
    /// outside the 2^53 range).
    #[inline]
    pub fn as_float(&self) -> f64 {
        match *self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// "integer" or "float", as per `math.type`.
    pub fn subtype_name(&self) -> &'static str {
        match self {
            Number::Int(_) => "integer",
            Number::Float(_) => "float",
        }
    }

    /// Converts a float to an integer when it is a whole number inside the
    /// i64 range. Negative zero stays a float so `1.0 / -0.0` keeps its sign.
    pub fn float_to_int(value: f64) -> Option<i64> {
        if value.is_nan() || value.is_infinite() {
            return None;
        }
        if value == 0.0 && value.is_sign_negative() {
            return None;
        }
        if value.trunc() != value {
            return None;
        }
        // i64::MAX + 1 is exactly representable as f64; i64::MAX is not.
        if value < i64::MIN as f64 || value >= (i64::MAX as f64) + 1.0 {
            return None;
        }
        Some(value as i64)
    }

    /// Builds a number from a float, collapsing whole values into the
    /// integer subtype.
    pub fn from_f64(value: f64) -> Number {
        match Self::float_to_int(value) {
            Some(i) => Number::Int(i),
            None => Number::Float(value),
        }
    }

    /// The integer representation, when one exists.
    pub fn to_int(&self) -> Option<i64> {
        match *self {
            Number::Int(i) => Some(i),
            Number::Float(f) => Self::float_to_int(f),
        }
    }

    /// Parses a numeric literal: hex integers, decimal integers, then floats.
    pub fn parse(text: &str) -> Option<Number> {
        let s = text.trim();
        if s.is_empty() {
            return None;
        }

        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            if let Ok(i) = i64::from_str_radix(hex, 16) {
                return Some(Number::Int(i));
            }
        }

        let looks_integral = !s.contains(['.', 'e', 'E']);
        if looks_integral {
            if let Ok(i) = s.parse::<i64>() {
                return Some(Number::Int(i));
            }
        }

        s.parse::<f64>().ok().map(Number::Float)
    }

    pub fn add(a: Number, b: Number) -> Number {
        match (a, b) {
            (Number::Int(x), Number::Int(y)) => Number::Int(x.wrapping_add(y)),
            _ => Number::Float(a.as_float() + b.as_float()),
        }
    }

    pub fn sub(a: Number, b: Number) -> Number {
        match (a, b) {
            (Number::Int(x), Number::Int(y)) => Number::Int(x.wrapping_sub(y)),
            _ => Number::Float(a.as_float() - b.as_float()),
        }
    }

    pub fn mul(a: Number, b: Number) -> Number {
        match (a, b) {
            (Number::Int(x), Number::Int(y)) => Number::Int(x.wrapping_mul(y)),
            _ => Number::Float(a.as_float() * b.as_float()),
        }
    }

    /// Regular division always produces a float.
    pub fn div(a: Number, b: Number) -> Number {
        Number::Float(a.as_float() / b.as_float())
    }

    /// Floor division. Integer by zero is an error; float by zero follows
    /// IEEE semantics.
    pub fn floor_div(a: Number, b: Number) -> Result<Number, LuaError> {
        match (a, b) {
            (Number::Int(x), Number::Int(y)) => {
                if y == 0 {
                    return Err(LuaError::runtime("attempt to perform 'n//0'"));
                }
                // mininteger // -1 wraps instead of trapping
                if x == i64::MIN && y == -1 {
                    return Ok(Number::Int(i64::MIN));
                }
                let mut q = x / y;
                if x % y != 0 && (x < 0) != (y < 0) {
                    q -= 1;
                }
                Ok(Number::Int(q))
            }
            _ => Ok(Number::Float((a.as_float() / b.as_float()).floor())),
        }
    }

    /// Modulo with floor semantics. Integer `n % 0` errors from 5.3 on;
    /// earlier versions fall back to the float path and produce NaN.
    pub fn modulo(a: Number, b: Number, version: LuaVersion) -> Result<Number, LuaError> {
        match (a, b) {
            (Number::Int(x), Number::Int(y)) => {
                if y == 0 {
                    if version < LuaVersion::Lua53 {
                        let (af, bf) = (a.as_float(), b.as_float());
                        return Ok(Number::Float(af - (af / bf).floor() * bf));
                    }
                    return Err(LuaError::runtime("attempt to perform 'n%0'"));
                }
                if x == i64::MIN && y == -1 {
                    return Ok(Number::Int(0));
                }
                let mut r = x % y;
                if r != 0 && (x < 0) != (y < 0) {
                    r += y;
                }
                Ok(Number::Int(r))
            }
            _ => {
                let (af, bf) = (a.as_float(), b.as_float());
                Ok(Number::Float(af - (af / bf).floor() * bf))
            }
        }
    }

    /// Power always produces a float.
    pub fn pow(a: Number, b: Number) -> Number {
        Number::Float(a.as_float().powf(b.as_float()))
    }

    /// Unary minus. Negating the integer minimum wraps.
    pub fn neg(a: Number) -> Number {
        match a {
            Number::Int(i) => Number::Int(i.wrapping_neg()),
            Number::Float(f) => Number::Float(-f),
        }
    }

    fn require_int(&self, operation: &str) -> Result<i64, LuaError> {
        self.to_int().ok_or_else(|| {
            LuaError::runtime(format!(
                "number has no integer representation (in '{operation}')"
            ))
        })
    }

    pub fn bit_and(a: Number, b: Number) -> Result<Number, LuaError> {
        Ok(Number::Int(a.require_int("band")? & b.require_int("band")?))
    }

    pub fn bit_or(a: Number, b: Number) -> Result<Number, LuaError> {
        Ok(Number::Int(a.require_int("bor")? | b.require_int("bor")?))
    }

    pub fn bit_xor(a: Number, b: Number) -> Result<Number, LuaError> {
        Ok(Number::Int(a.require_int("bxor")? ^ b.require_int("bxor")?))
    }

    pub fn bit_not(a: Number) -> Result<Number, LuaError> {
        Ok(Number::Int(!a.require_int("bnot")?))
    }

    /// Logical left shift. Shifts of 64 or more bits produce zero; negative
    /// counts shift the other way.
    pub fn shift_left(a: Number, b: Number) -> Result<Number, LuaError> {
        let x = a.require_int("shl")?;
        let n = b.require_int("shl")?;
        Ok(Number::Int(Self::shl_raw(x, n)))
    }

    /// Logical right shift (no sign extension).
    pub fn shift_right(a: Number, b: Number) -> Result<Number, LuaError> {
        let x = a.require_int("shr")?;
        let n = b.require_int("shr")?;
        Ok(Number::Int(Self::shl_raw(x, n.wrapping_neg())))
    }

    fn shl_raw(x: i64, n: i64) -> i64 {
        if n <= -64 || n >= 64 {
            0
        } else if n >= 0 {
            ((x as u64) << n) as i64
        } else {
            ((x as u64) >> (-n)) as i64
        }
    }

    /// Equality across subtypes compares mathematical values.
    pub fn equal(a: Number, b: Number) -> bool {
        match (a, b) {
            (Number::Int(x), Number::Int(y)) => x == y,
            (Number::Float(x), Number::Float(y)) => x == y,
            _ => a.as_float() == b.as_float(),
        }
    }

    /// Less-than preserving integer precision at the i64 boundaries.
    pub fn less_than(a: Number, b: Number) -> bool {
        match (a, b) {
            (Number::Int(x), Number::Int(y)) => x < y,
            _ => a.as_float() < b.as_float(),
        }
    }

    pub fn less_or_equal(a: Number, b: Number) -> bool {
        match (a, b) {
            (Number::Int(x), Number::Int(y)) => x <= y,
            _ => a.as_float() <= b.as_float(),
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        Number::equal(*self, *other)
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if let (Number::Float(f), _) | (_, Number::Float(f)) = (self, other) {
            if f.is_nan() {
                return None;
            }
        }
        if Number::equal(*self, *other) {
            Some(Ordering::Equal)
        } else if Number::less_than(*self, *other) {
            Some(Ordering::Less)
        } else {
            Some(Ordering::Greater)
        }
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number::from_f64(value)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) => {
                if x.is_nan() {
                    write!(f, "nan")
                } else if x.is_infinite() {
                    write!(f, "{}", if x > 0.0 { "inf" } else { "-inf" })
                } else if x == x.floor() {
                    // integer-valued floats keep a ".0" suffix
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
        }
    }
}
