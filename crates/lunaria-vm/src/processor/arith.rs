//! Arithmetic, comparison, and metamethod dispatch
//!
//! Every binary operator tries the native numeric fast path first, then
//! probes the left operand's metatable, the right one's, and finally the
//! userdata descriptor hook. Comparison combinators follow the original
//! protocol: `LessEq` pushes a negation flag consumed by a following `CNot`.

use super::{Flow, Processor};
use crate::bytecode::{Instruction, OpCode};
use lunaria_types::{metamethods, LuaError, Number, Value};

impl Processor {
    /// Invokes a binary metamethod, probing left then right then the
    /// userdata descriptor. Returns `None` when no handler exists.
    pub(crate) fn invoke_binary_metamethod(
        &mut self,
        l: &Value,
        r: &Value,
        event: &str,
        ip: usize,
        extra_push: Option<Value>,
    ) -> Result<Option<Flow>, LuaError> {
        let handler = self
            .get_metamethod(l, event)
            .or_else(|| self.get_metamethod(r, event));
        match handler {
            Some(h) => {
                if let Some(extra) = extra_push {
                    self.push(extra);
                }
                self.push(h);
                self.push(l.clone());
                self.push(r.clone());
                self.internal_exec_call(2, Some(ip), None, None, false, None, None)
                    .map(Some)
            }
            None => Ok(None),
        }
    }

    pub(crate) fn invoke_unary_metamethod(
        &mut self,
        operand: &Value,
        event: &str,
        ip: usize,
    ) -> Result<Option<Flow>, LuaError> {
        match self.get_metamethod(operand, event) {
            Some(h) => {
                self.push(h);
                self.push(operand.clone());
                self.push(operand.clone());
                self.internal_exec_call(2, Some(ip), None, None, false, None, None)
                    .map(Some)
            }
            None => Ok(None),
        }
    }

    pub(crate) fn exec_binary_arith(
        &mut self,
        insn: &Instruction,
        ip: usize,
    ) -> Result<Flow, LuaError> {
        let r = self.pop()?.scalar();
        let l = self.pop()?.scalar();
        let version = self.shared.options.version;

        if let (Some(a), Some(b)) = (l.coerce_number(version), r.coerce_number(version)) {
            let result = match insn.op {
                OpCode::Add => Number::add(a, b),
                OpCode::Sub => Number::sub(a, b),
                OpCode::Mul => Number::mul(a, b),
                OpCode::Div => Number::div(a, b),
                OpCode::Mod => Number::modulo(a, b, version)?,
                OpCode::FloorDiv => Number::floor_div(a, b)?,
                OpCode::Power => Number::pow(a, b),
                _ => return Err(LuaError::internal("non-arithmetic opcode in arith handler")),
            };
            self.push(Value::Number(result));
            return Ok(Flow::Next(ip));
        }

        let event = match insn.op {
            OpCode::Add => metamethods::ADD,
            OpCode::Sub => metamethods::SUB,
            OpCode::Mul => metamethods::MUL,
            OpCode::Div => metamethods::DIV,
            OpCode::Mod => metamethods::MOD,
            OpCode::FloorDiv => metamethods::IDIV,
            OpCode::Power => metamethods::POW,
            _ => return Err(LuaError::internal("non-arithmetic opcode in arith handler")),
        };
        match self.invoke_binary_metamethod(&l, &r, event, ip, None)? {
            Some(flow) => Ok(flow),
            None => Err(LuaError::arithmetic_on_non_number(&l, &r)),
        }
    }

    pub(crate) fn exec_neg(&mut self, ip: usize) -> Result<Flow, LuaError> {
        let operand = self.pop()?.scalar();
        let version = self.shared.options.version;

        if let Some(n) = operand.coerce_number(version) {
            let mut result = Number::neg(n);
            // pre-5.3 targets have no integer subtype; -0 must be the float
            // negative zero there
            if matches!(result, Number::Int(0))
                && version < lunaria_types::LuaVersion::Lua53
            {
                result = Number::Float(-0.0);
            }
            self.push(Value::Number(result));
            return Ok(Flow::Next(ip));
        }

        match self.invoke_unary_metamethod(&operand, metamethods::UNM, ip)? {
            Some(flow) => Ok(flow),
            None => Err(LuaError::arithmetic_on_non_number(&operand, &operand)),
        }
    }

    pub(crate) fn exec_bitwise(&mut self, insn: &Instruction, ip: usize) -> Result<Flow, LuaError> {
        let r = self.pop()?.scalar();
        let l = self.pop()?.scalar();

        let (ln, rn) = (l.as_number(), r.as_number());
        let ints = match (ln.and_then(|n| n.to_int()), rn.and_then(|n| n.to_int())) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        };
        if let Some((a, b)) = ints {
            let (x, y) = (Number::Int(a), Number::Int(b));
            let result = match insn.op {
                OpCode::BitAnd => Number::bit_and(x, y)?,
                OpCode::BitOr => Number::bit_or(x, y)?,
                OpCode::BitXor => Number::bit_xor(x, y)?,
                OpCode::ShiftLeft => Number::shift_left(x, y)?,
                OpCode::ShiftRight => Number::shift_right(x, y)?,
                _ => return Err(LuaError::internal("non-bitwise opcode in bitwise handler")),
            };
            self.push(Value::Number(result));
            return Ok(Flow::Next(ip));
        }

        let event = match insn.op {
            OpCode::BitAnd => metamethods::BAND,
            OpCode::BitOr => metamethods::BOR,
            OpCode::BitXor => metamethods::BXOR,
            OpCode::ShiftLeft => metamethods::SHL,
            OpCode::ShiftRight => metamethods::SHR,
            _ => return Err(LuaError::internal("non-bitwise opcode in bitwise handler")),
        };
        match self.invoke_binary_metamethod(&l, &r, event, ip, None)? {
            Some(flow) => Ok(flow),
            None => {
                let offender = if ln.and_then(|n| n.to_int()).is_some() {
                    &r
                } else {
                    &l
                };
                Err(LuaError::bitwise_on_non_integer(offender))
            }
        }
    }

    pub(crate) fn exec_bit_not(&mut self, ip: usize) -> Result<Flow, LuaError> {
        let operand = self.pop()?.scalar();
        if let Some(i) = operand.as_number().and_then(|n| n.to_int()) {
            self.push(Value::Number(Number::Int(!i)));
            return Ok(Flow::Next(ip));
        }
        match self.invoke_unary_metamethod(&operand, metamethods::BNOT, ip)? {
            Some(flow) => Ok(flow),
            None => Err(LuaError::bitwise_on_non_integer(&operand)),
        }
    }

    pub(crate) fn exec_eq(&mut self, ip: usize) -> Result<Flow, LuaError> {
        let r = self.pop()?.scalar();
        let l = self.pop()?.scalar();

        // userdata always gets a chance at __eq
        if matches!(l, Value::UserData(_)) || matches!(r, Value::UserData(_)) {
            if let Some(flow) =
                self.invoke_binary_metamethod(&l, &r, metamethods::EQ, ip, None)?
            {
                return Ok(flow);
            }
        }

        if l.type_name() != r.type_name() {
            // nil and void compare equal; everything else of differing type
            // does not
            self.push(Value::Boolean(l.is_nil() && r.is_nil()));
            return Ok(Flow::Next(ip));
        }

        // tables consult __eq only when both share a metatable
        if matches!(l, Value::Table(_)) {
            let lm = self.get_metatable(&l);
            let rm = self.get_metatable(&r);
            if let (Some(lm), Some(rm)) = (lm, rm) {
                if std::rc::Rc::ptr_eq(&lm, &rm) {
                    if let Some(flow) =
                        self.invoke_binary_metamethod(&l, &r, metamethods::EQ, ip, None)?
                    {
                        return Ok(flow);
                    }
                }
            }
        }

        self.push(Value::Boolean(r.raw_equals(&l)));
        Ok(Flow::Next(ip))
    }

    pub(crate) fn exec_less(&mut self, ip: usize) -> Result<Flow, LuaError> {
        let r = self.pop()?.scalar();
        let l = self.pop()?.scalar();

        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => {
                self.push(Value::Boolean(Number::less_than(*a, *b)));
                Ok(Flow::Next(ip))
            }
            (Value::Str(a), Value::Str(b)) => {
                self.push(Value::Boolean(a < b));
                Ok(Flow::Next(ip))
            }
            _ => match self.invoke_binary_metamethod(&l, &r, metamethods::LT, ip, None)? {
                Some(flow) => Ok(flow),
                None => Err(LuaError::compare_invalid(&l, &r)),
            },
        }
    }

    /// LessEq pushes a negation flag underneath the result so a following
    /// CNot can flip metamethod results; the swapped `__lt` fallback pushes
    /// `true` so `a <= b` becomes `not (b < a)`.
    pub(crate) fn exec_less_eq(&mut self, ip: usize) -> Result<Flow, LuaError> {
        let r = self.pop()?.scalar();
        let l = self.pop()?.scalar();

        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => {
                self.push(Value::FALSE);
                self.push(Value::Boolean(Number::less_or_equal(*a, *b)));
                Ok(Flow::Next(ip))
            }
            (Value::Str(a), Value::Str(b)) => {
                self.push(Value::FALSE);
                self.push(Value::Boolean(a <= b));
                Ok(Flow::Next(ip))
            }
            _ => {
                if let Some(flow) = self.invoke_binary_metamethod(
                    &l,
                    &r,
                    metamethods::LE,
                    ip,
                    Some(Value::FALSE),
                )? {
                    return Ok(flow);
                }
                if self.shared.options.version.allows_lt_fallback() {
                    if let Some(flow) = self.invoke_binary_metamethod(
                        &r,
                        &l,
                        metamethods::LT,
                        ip,
                        Some(Value::TRUE),
                    )? {
                        return Ok(flow);
                    }
                }
                Err(LuaError::compare_invalid(&l, &r))
            }
        }
    }

    pub(crate) fn exec_len(&mut self, ip: usize) -> Result<Flow, LuaError> {
        let operand = self.pop()?.scalar();

        if let Value::Str(s) = &operand {
            self.push(Value::int(s.len() as i64));
            return Ok(Flow::Next(ip));
        }
        if let Some(flow) = self.invoke_unary_metamethod(&operand, metamethods::LEN, ip)? {
            return Ok(flow);
        }
        if let Value::Table(t) = &operand {
            let len = t.borrow().length();
            self.push(Value::int(len));
            return Ok(Flow::Next(ip));
        }
        Err(LuaError::len_on_invalid(&operand))
    }

    pub(crate) fn exec_concat(&mut self, ip: usize) -> Result<Flow, LuaError> {
        let r = self.pop()?.scalar();
        let l = self.pop()?.scalar();

        if let (Some(ls), Some(rs)) = (l.as_concat_string(), r.as_concat_string()) {
            self.shared.allocation.track(ls.len() + rs.len());
            self.push(Value::string(format!("{ls}{rs}")));
            return Ok(Flow::Next(ip));
        }
        match self.invoke_binary_metamethod(&l, &r, metamethods::CONCAT, ip, None)? {
            Some(flow) => Ok(flow),
            None => Err(LuaError::concat_on_invalid(&l, &r)),
        }
    }

    pub(crate) fn exec_not(&mut self) -> Result<(), LuaError> {
        let v = self.pop()?.scalar();
        self.push(Value::Boolean(!v.is_truthy()));
        Ok(())
    }

    /// Conditional negation: flips the value when the flag beneath it says
    /// so. Pairs with `LessEq` and the swapped `__lt` fallback.
    pub(crate) fn exec_cnot(&mut self) -> Result<(), LuaError> {
        let v = self.pop()?.scalar();
        let flag = self.pop()?.scalar();
        match flag {
            Value::Boolean(true) => self.push(Value::Boolean(!v.is_truthy())),
            Value::Boolean(false) => self.push(Value::Boolean(v.is_truthy())),
            _ => return Err(LuaError::internal("CNOT flag was not a boolean")),
        }
        Ok(())
    }

    pub(crate) fn exec_to_num(&mut self) -> Result<(), LuaError> {
        // preserve the integer/float subtype so large integer loop bounds
        // keep exact precision
        let v = self.pop()?.scalar();
        match v.cast_number() {
            Some(n) => {
                self.push(Value::Number(n));
                Ok(())
            }
            None => Err(LuaError::convert_to_number_failed()),
        }
    }

    pub(crate) fn jump_bool(
        &mut self,
        insn: &Instruction,
        expected: bool,
        ip: usize,
    ) -> Result<usize, LuaError> {
        let v = self.pop()?.scalar();
        if v.is_truthy() == expected {
            Ok(insn.num_val as usize)
        } else {
            Ok(ip)
        }
    }

    pub(crate) fn exec_short_circuit(
        &mut self,
        insn: &Instruction,
        ip: usize,
    ) -> Result<usize, LuaError> {
        let expected = insn.op == OpCode::JtOrPop;
        let v = self.peek(0)?.scalar();
        if v.is_truthy() == expected {
            Ok(insn.num_val as usize)
        } else {
            self.pop()?;
            Ok(ip)
        }
    }

    /// Numeric for-loop test. Counter, step, and limit keep their numeric
    /// subtype so i64-boundary loops stay exact; integer loops terminate on
    /// a detected sign-flip wraparound instead of spinning forever.
    pub(crate) fn exec_jfor(&mut self, insn: &Instruction, ip: usize) -> Result<usize, LuaError> {
        let val = self.peek(0)?.scalar().expect_number()?;
        let step = self.peek(1)?.scalar().expect_number()?;
        let stop = self.peek(2)?.scalar().expect_number()?;

        let step_positive = Number::less_than(Number::ZERO, step);

        if let (Number::Int(v), Number::Int(s), Number::Int(limit)) = (val, step, stop) {
            // the control variable never wraps around: a sign flip against
            // the loop direction means the increment overflowed
            if s > 0 && limit >= 0 && v < 0 {
                return Ok(insn.num_val as usize);
            }
            if s < 0 && limit <= 0 && v > 0 {
                return Ok(insn.num_val as usize);
            }
        }

        let keep_looping = if step_positive {
            Number::less_or_equal(val, stop)
        } else {
            Number::less_or_equal(stop, val)
        };

        if keep_looping {
            Ok(ip)
        } else {
            Ok(insn.num_val as usize)
        }
    }

    /// Adds the step at `num_val` into the loop counter on top of the stack.
    pub(crate) fn exec_incr(&mut self, insn: &Instruction) -> Result<(), LuaError> {
        let step = self.peek(insn.num_val as usize)?.scalar().expect_number()?;
        let top = self.peek(0)?.scalar().expect_number()?;
        self.set_from_top(0, Value::Number(Number::add(top, step)))?;
        Ok(())
    }
}
