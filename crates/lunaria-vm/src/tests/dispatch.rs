use super::helpers::*;
use crate::bytecode::OpCode;
use lunaria_types::{LuaError, Number, SymbolRef, Table, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Simplest possible chunk: return a literal.
#[test]
fn literal_roundtrip() {
    let s = script(vec![begin_fn(0), bind_args(vec![]), int(42), ret1()]);
    assert_eq!(run(&s, 0).unwrap(), Value::int(42));
}

#[test]
fn integer_arithmetic_preserves_subtype() {
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        int(20),
        int(22),
        op(OpCode::Add),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::int(42));
}

#[test]
fn division_produces_float() {
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        int(10),
        int(4),
        op(OpCode::Div),
        ret1(),
    ]);
    let v = run(&s, 0).unwrap();
    assert_eq!(v.as_number().unwrap(), Number::Float(2.5));
    assert!(v.as_number().unwrap().is_float());
}

/// maxinteger + 1 wraps; it never silently becomes an imprecise float.
#[test]
fn integer_overflow_wraps_instead_of_degrading() {
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        int(i64::MAX),
        int(1),
        op(OpCode::Add),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::int(i64::MIN));
}

#[test]
fn concat_joins_strings_and_numbers() {
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        str_lit("n = "),
        int(7),
        op(OpCode::Concat),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::string("n = 7"));
}

#[test]
fn comparison_and_jump() {
    // if 1 < 2 then return "yes" else return "no"
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        int(1),
        int(2),
        op(OpCode::Less),
        num(OpCode::Jf, 8),
        str_lit("yes"),
        ret1(),
        str_lit("no"),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::string("yes"));
}

#[test]
fn less_eq_uses_cnot_protocol() {
    // 3 <= 3 compiles to LessEq + CNot
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        int(3),
        int(3),
        op(OpCode::LessEq),
        op(OpCode::CNot),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::Boolean(true));
}

#[test]
fn arithmetic_type_error_names_the_offender() {
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(Value::Boolean(true)),
        int(1),
        op(OpCode::Add),
        ret1(),
    ]);
    let err = run(&s, 0).unwrap_err();
    assert!(err.to_string().contains("arithmetic on a boolean value"));
}

#[test]
fn numeric_for_loop_counts() {
    // local acc = 0; for i = 1, 5 do acc = acc + i end; return acc
    let acc = SymbolRef::local("acc", 0);
    let s = script(vec![
        begin_fn(1),
        bind_args(vec![]),
        int(0),
        store_local(acc.clone()),
        pop1(),
        // loop registers: stop, step, value
        int(5),
        int(1),
        int(1),
        // 8: JFOR exits to 16
        num(OpCode::JFor, 16),
        // body: acc = acc + i (loop counter on top of stack)
        num(OpCode::Copy, 0),
        local(acc.clone()),
        op(OpCode::Add),
        store_local(acc.clone()),
        pop1(),
        num(OpCode::Incr, 1),
        num(OpCode::Jump, 8),
        // 16: drop loop registers, return acc
        num(OpCode::Pop, 3),
        local(acc),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::int(15));
}

/// An integer loop stepping past maxinteger terminates on the detected
/// wraparound instead of spinning forever.
#[test]
fn for_loop_near_maxinteger_terminates() {
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        int(i64::MAX),
        int(2),
        int(i64::MAX - 1),
        // 5: JFOR exits to 8
        num(OpCode::JFor, 8),
        num(OpCode::Incr, 1),
        num(OpCode::Jump, 5),
        num(OpCode::Pop, 3),
        int(1),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::int(1));
}

#[test]
fn table_construction_and_length() {
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        op(OpCode::NewTable),
        int(10),
        num(OpCode::TblInitI, 0),
        int(20),
        num(OpCode::TblInitI, 0),
        op(OpCode::Len),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::int(2));
}

#[test]
fn index_reads_raw_slot_before_metamethods() {
    let mut t = Table::new();
    t.set_str("k", Value::int(9));
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(Value::table(t)),
        str_lit("k"),
        op(OpCode::Index),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::int(9));
}

#[test]
fn index_falls_back_to_index_metamethod_table() {
    let mut fallback = Table::new();
    fallback.set_str("k", Value::int(31));
    let mut meta = Table::new();
    meta.set_str("__index", Value::table(fallback));
    let mut t = Table::new();
    t.set_metatable(Some(Rc::new(RefCell::new(meta))));

    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(Value::table(t)),
        str_lit("k"),
        op(OpCode::Index),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::int(31));
}

/// A self-referential `__index` chain faults with a loop-detected error
/// instead of hanging.
#[test]
fn index_loop_is_detected() {
    let t = Rc::new(RefCell::new(Table::new()));
    let mut meta = Table::new();
    meta.set_str("__index", Value::Table(t.clone()));
    t.borrow_mut()
        .set_metatable(Some(Rc::new(RefCell::new(meta))));

    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(Value::Table(t)),
        str_lit("missing"),
        op(OpCode::Index),
        ret1(),
    ]);
    let err = run(&s, 0).unwrap_err();
    assert!(err.to_string().contains("__index"));
    assert!(matches!(err, LuaError::Runtime { .. }));
}

#[test]
fn eq_consults_metamethod_only_for_shared_metatables() {
    let always_equal = host_fn("eq", |_| Ok(Value::Boolean(true)));
    let mut meta = Table::new();
    meta.set_str("__eq", always_equal);
    let meta = Rc::new(RefCell::new(meta));

    let mut a = Table::new();
    a.set_metatable(Some(meta.clone()));
    let mut b = Table::new();
    b.set_metatable(Some(meta));

    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(Value::table(a)),
        lit(Value::table(b)),
        op(OpCode::Eq),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::Boolean(true));
}

#[test]
fn nil_and_void_compare_equal_in_bytecode() {
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(Value::Nil),
        lit(Value::Void),
        op(OpCode::Eq),
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::Boolean(true));
}

#[test]
fn iter_prep_wraps_plain_tables_with_the_default_iterator() {
    let mut t = Table::new();
    t.init_next_array_key(Value::int(5), false);
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(Value::table(t)),
        op(OpCode::IterPrep),
        ret1(),
    ]);
    let triplet = tuple_items(&run(&s, 0).unwrap());
    assert_eq!(triplet.len(), 3);
    assert!(triplet[0].is_callable_function());
    assert!(matches!(triplet[1], Value::Table(_)));
    assert!(triplet[2].is_nil());
}

/// Global symbols resolve through the script's global table at runtime.
#[test]
fn global_symbols_read_and_write_the_global_table() {
    let g = SymbolRef::global("answer");
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        int(42),
        store_local(g.clone()), // a store through a Global symbol
        pop1(),
        local(g), // and the matching load
        ret1(),
    ]);
    assert_eq!(run(&s, 0).unwrap(), Value::int(42));
    assert_eq!(s.get_global("answer"), Value::int(42));
}

#[test]
fn bitwise_requires_integer_representation() {
    let s = script(vec![
        begin_fn(0),
        bind_args(vec![]),
        lit(Value::float(1.5)),
        int(1),
        op(OpCode::BitAnd),
        ret1(),
    ]);
    let err = run(&s, 0).unwrap_err();
    assert!(err.to_string().contains("integer representation"));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The dispatched Add agrees with the numeric tower for any pair of
        /// integers, including wrapping cases.
        #[test]
        fn dispatched_add_matches_number_semantics(a in any::<i64>(), b in any::<i64>()) {
            let s = script(vec![
                begin_fn(0),
                bind_args(vec![]),
                int(a),
                int(b),
                op(OpCode::Add),
                ret1(),
            ]);
            prop_assert_eq!(run(&s, 0).unwrap(), Value::int(a.wrapping_add(b)));
        }

        /// Comparison through bytecode never disagrees with direct integer
        /// comparison, even at the i64 boundaries.
        #[test]
        fn dispatched_less_matches_integer_order(a in any::<i64>(), b in any::<i64>()) {
            let s = script(vec![
                begin_fn(0),
                bind_args(vec![]),
                int(a),
                int(b),
                op(OpCode::Less),
                ret1(),
            ]);
            prop_assert_eq!(run(&s, 0).unwrap(), Value::Boolean(a < b));
        }
    }
}
