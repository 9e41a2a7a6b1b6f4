//! End-to-end recompute behaviour of the formula engine

use chrono::NaiveDate;
use fieldcalc::prelude::*;
use fieldcalc::{CachedValue, CompileLimits, LimitKind};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use std::str::FromStr;

fn engine_with(schema: Schema, store: MemoryStore) -> FormulaEngine<MemoryStore> {
    let options = CalculationOptions {
        now: NaiveDate::from_ymd_opt(2024, 3, 15).and_then(|d| d.and_hms_opt(12, 0, 0)),
        ..CalculationOptions::default()
    };
    FormulaEngine::with_options(schema, store, options)
}

/// Table with A, B (plain), C = A + B and an unrelated formula U = B * 10
struct Sums {
    engine: FormulaEngine<MemoryStore>,
    rec: RecordId,
    a: FieldId,
    b: FieldId,
    c: FieldId,
    u: FieldId,
}

fn sums() -> Sums {
    let mut schema = Schema::new();
    let t = schema.add_table("Sums");
    let a = schema.add_field(t, "A", FieldKind::Plain).unwrap();
    let b = schema.add_field(t, "B", FieldKind::Plain).unwrap();
    let c = schema.add_field(t, "C", FieldKind::Formula).unwrap();
    let u = schema.add_field(t, "U", FieldKind::Formula).unwrap();

    let mut store = MemoryStore::new();
    let rec = store.add_record(t);
    store.set_value(rec, a, Value::from(1));
    store.set_value(rec, b, Value::from(2));

    let engine = engine_with(schema, store);
    engine.define_formula(c, "{A} + {B}").unwrap();
    engine.define_formula(u, "{B} * 10").unwrap();
    Sums {
        engine,
        rec,
        a,
        b,
        c,
        u,
    }
}

#[test]
fn test_basic_arithmetic_scenario() {
    let mut schema = Schema::new();
    let t = schema.add_table("Items");
    let price = schema.add_field(t, "Price", FieldKind::Plain).unwrap();
    let qty = schema.add_field(t, "Quantity", FieldKind::Plain).unwrap();
    let total = schema.add_field(t, "Total", FieldKind::Formula).unwrap();

    let mut store = MemoryStore::new();
    let rec = store.add_record(t);
    store.set_value(rec, price, Value::Number(Decimal::from_str("12.5").unwrap()));
    store.set_value(rec, qty, Value::from(4));

    let engine = engine_with(schema, store);
    let compiled = engine.compile(t, "{Price} * {Quantity}").unwrap();
    assert_eq!(engine.evaluate(&compiled, rec), Value::from(50));
    assert_eq!(
        fieldcalc::get_dependencies(&compiled).iter().copied().collect::<Vec<_>>(),
        vec![price, qty]
    );

    engine.add_or_update_formula_field(total, compiled).unwrap();
    assert_eq!(engine.read_value(rec, total).to_string(), "50");
}

#[test]
fn test_string_concatenation_scenario() {
    let mut schema = Schema::new();
    let t = schema.add_table("People");
    let first = schema.add_field(t, "First", FieldKind::Plain).unwrap();
    let last = schema.add_field(t, "Last", FieldKind::Plain).unwrap();
    let full = schema.add_field(t, "Full Name", FieldKind::Formula).unwrap();

    let mut store = MemoryStore::new();
    let rec = store.add_record(t);
    store.set_value(rec, first, Value::text("Ada"));
    store.set_value(rec, last, Value::text("Lovelace"));

    let engine = engine_with(schema, store);
    engine.define_formula(full, r#"{First} & " " & {Last}"#).unwrap();
    assert_eq!(engine.read_value(rec, full), Value::text("Ada Lovelace"));
}

#[test]
fn test_cross_field_recompute() {
    let mut s = sums();
    assert_eq!(s.engine.read_value(s.rec, s.c), Value::from(3));
    assert_eq!(s.engine.read_value(s.rec, s.u), Value::from(20));

    s.engine.store_mut().set_value(s.rec, s.a, Value::from(5));
    let batch = s.engine.on_field_changed(s.rec, s.a, Value::from(5)).unwrap();

    // Only C reads A
    assert_eq!(batch.for_record(s.rec), vec![(s.c, Value::from(7))]);
    assert!(!batch.contains(s.rec, s.u));
    assert_eq!(s.engine.read_value(s.rec, s.c), Value::from(7));
    assert_eq!(s.engine.read_value(s.rec, s.u), Value::from(20));
}

#[test]
fn test_batch_uses_new_value_before_store_catches_up() {
    let s = sums();
    let batch = s.engine.on_field_changed(s.rec, s.b, Value::from(10)).unwrap();
    assert_eq!(
        batch.for_record(s.rec),
        vec![(s.c, Value::from(11)), (s.u, Value::from(100))]
    );
}

#[test]
fn test_changing_a_formula_field_is_rejected() {
    let s = sums();
    assert_eq!(
        s.engine.on_field_changed(s.rec, s.c, Value::from(1)),
        Err(FormulaError::NotASourceField(s.c))
    );
}

#[test]
fn test_cycle_is_rejected_and_state_kept() {
    let mut schema = Schema::new();
    let t = schema.add_table("T");
    let d = schema.add_field(t, "D", FieldKind::Formula).unwrap();
    let e = schema.add_field(t, "E", FieldKind::Formula).unwrap();
    let mut store = MemoryStore::new();
    let rec = store.add_record(t);

    let engine = engine_with(schema, store);
    engine.define_formula(d, "1").unwrap();
    engine.define_formula(e, "{D} + 1").unwrap();
    assert_eq!(engine.read_value(rec, e), Value::from(2));

    let err = engine.define_formula(d, "{E}").unwrap_err();
    assert_eq!(err, FormulaError::CircularDependency { path: vec![d, e] });

    // Both fields keep their previous formulas and values
    assert_eq!(engine.formula(d).unwrap().source, "1");
    assert_eq!(engine.formula(e).unwrap().source, "{D} + 1");
    assert_eq!(engine.read_value(rec, d), Value::from(1));
    assert_eq!(engine.read_value(rec, e), Value::from(2));
}

#[test]
fn test_cycle_path_through_chain() {
    let mut schema = Schema::new();
    let t = schema.add_table("T");
    let a = schema.add_field(t, "A", FieldKind::Formula).unwrap();
    let b = schema.add_field(t, "B", FieldKind::Formula).unwrap();
    let c = schema.add_field(t, "C", FieldKind::Formula).unwrap();

    let engine = engine_with(schema, MemoryStore::new());
    engine.define_formula(c, "0").unwrap();
    engine.define_formula(b, "{C} + 1").unwrap();
    engine.define_formula(a, "{B} + 1").unwrap();

    let err = engine.define_formula(c, "{A}").unwrap_err();
    assert_eq!(err, FormulaError::CircularDependency { path: vec![c, a, b] });
    assert_eq!(
        err.to_string(),
        "Circular dependency: fld2 -> fld0 -> fld1 -> fld2"
    );
    assert_eq!(engine.formula(c).unwrap().source, "0");

    let err = engine.define_formula(a, "{A} * 2").unwrap_err();
    assert_eq!(err, FormulaError::CircularDependency { path: vec![a] });
}

#[test]
fn test_schema_edit_invalidates_downstream() {
    let mut schema = Schema::new();
    let t = schema.add_table("T");
    let a = schema.add_field(t, "A", FieldKind::Plain).unwrap();
    let b = schema.add_field(t, "B", FieldKind::Formula).unwrap();
    let c = schema.add_field(t, "C", FieldKind::Formula).unwrap();
    let mut store = MemoryStore::new();
    let rec = store.add_record(t);
    store.set_value(rec, a, Value::from(2));

    let engine = engine_with(schema, store);
    engine.define_formula(b, "{A} * 2").unwrap();
    engine.define_formula(c, "{B} + 1").unwrap();
    assert_eq!(engine.read_value(rec, c), Value::from(5));

    engine.define_formula(b, "{A} * 3").unwrap();
    assert_eq!(engine.cache().get(rec, c), None);
    assert_eq!(engine.read_value(rec, c), Value::from(7));

    let readers = engine.remove_formula_field(b).unwrap();
    assert_eq!(readers, vec![c]);
    // B no longer has a formula and holds no stored value
    assert_eq!(engine.read_value(rec, c), Value::Error(ErrorKind::NullOperand));
    assert_eq!(
        engine.remove_formula_field(b),
        Err(FormulaError::UnknownFormulaField(b))
    );
}

#[test]
fn test_formula_on_plain_field_is_rejected() {
    let s = sums();
    assert_eq!(
        s.engine.define_formula(s.a, "1"),
        Err(FormulaError::UnknownFormulaField(s.a))
    );
}

#[test]
fn test_invalidate_and_fresh_reads() {
    let mut s = sums();
    assert_eq!(s.engine.read_value(s.rec, s.c), Value::from(3));
    let CachedValue {
        computed_at_version: first_version,
        ..
    } = s.engine.cache().get(s.rec, s.c).unwrap();

    // The store changes without notifying the engine: the cache is stale
    s.engine.store_mut().set_value(s.rec, s.a, Value::from(100));
    assert_eq!(s.engine.read_value(s.rec, s.c), Value::from(3));
    assert_eq!(s.engine.read_fresh_value(s.rec, s.c), Value::from(102));

    s.engine.store_mut().set_value(s.rec, s.a, Value::from(200));
    s.engine.invalidate(s.rec, s.c);
    assert_eq!(s.engine.read_value(s.rec, s.c), Value::from(202));
    let cached = s.engine.cache().get(s.rec, s.c).unwrap();
    assert!(cached.computed_at_version > first_version);
}

#[test]
fn test_runtime_errors_do_not_abort_the_batch() {
    let mut schema = Schema::new();
    let t = schema.add_table("T");
    let x = schema.add_field(t, "X", FieldKind::Plain).unwrap();
    let ratio = schema.add_field(t, "Ratio", FieldKind::Formula).unwrap();
    let safe = schema.add_field(t, "Safe", FieldKind::Formula).unwrap();
    let label = schema.add_field(t, "Label", FieldKind::Formula).unwrap();
    let mut store = MemoryStore::new();
    let rec = store.add_record(t);

    let engine = engine_with(schema, store);
    engine.define_formula(ratio, "100 / {X}").unwrap();
    engine.define_formula(safe, "IF({X} = 0, 1, 100 / {X})").unwrap();
    engine.define_formula(label, "'ratio: ' & {Ratio}").unwrap();

    let batch = engine.on_field_changed(rec, x, Value::from(0)).unwrap();
    assert_eq!(
        batch.for_record(rec),
        vec![
            (ratio, Value::Error(ErrorKind::DivisionByZero)),
            (safe, Value::from(1)),
            (label, Value::Error(ErrorKind::DivisionByZero)),
        ]
    );
}

#[test]
fn test_batch_size_limit() {
    let mut schema = Schema::new();
    let t = schema.add_table("T");
    let a = schema.add_field(t, "A", FieldKind::Plain).unwrap();
    let fields: Vec<FieldId> = (0..3)
        .map(|i| schema.add_field(t, &format!("F{i}"), FieldKind::Formula).unwrap())
        .collect();
    let mut store = MemoryStore::new();
    let rec = store.add_record(t);

    let options = CalculationOptions {
        max_batch_size: 2,
        ..CalculationOptions::default()
    };
    let engine = FormulaEngine::with_options(schema, store, options);
    for field in &fields {
        engine.define_formula(*field, "{A} + 1").unwrap();
    }

    let err = engine.on_field_changed(rec, a, Value::from(1)).unwrap_err();
    assert!(matches!(
        err,
        FormulaError::LimitExceeded {
            limit: LimitKind::BatchSize,
            max: 2,
            ..
        }
    ));
    assert!(engine.recompute_record(t, rec).is_err());
}

#[test]
fn test_volatile_functions_use_configured_clock() {
    let mut schema = Schema::new();
    let t = schema.add_table("T");
    let due = schema.add_field(t, "Due", FieldKind::Plain).unwrap();
    let left = schema.add_field(t, "Days Left", FieldKind::Formula).unwrap();
    let mut store = MemoryStore::new();
    let rec = store.add_record(t);
    store.set_value(rec, due, Value::text("2024-03-20"));

    let engine = engine_with(schema, store);
    engine.define_formula(left, "DATE_DIFF({Due}, TODAY(), 'days')").unwrap();
    assert!(engine.formula(left).unwrap().volatile);
    assert_eq!(engine.read_value(rec, left), Value::from(5));
}

#[test]
fn test_long_formula_chain() {
    const LEN: usize = 3000;
    let mut schema = Schema::new();
    let t = schema.add_table("Chain");
    let base = schema.add_field(t, "F0", FieldKind::Plain).unwrap();
    let chain: Vec<FieldId> = (1..=LEN)
        .map(|i| schema.add_field(t, &format!("F{i}"), FieldKind::Formula).unwrap())
        .collect();
    let mut store = MemoryStore::new();
    let rec = store.add_record(t);
    store.set_value(rec, base, Value::from(5));

    let mut engine = engine_with(schema, store);
    for (i, field) in chain.iter().enumerate() {
        engine.define_formula(*field, &format!("{{F{i}}} + 1")).unwrap();
    }
    let last = chain[LEN - 1];

    // Nothing is cached yet, so the read settles the whole chain
    assert_eq!(engine.read_value(rec, last), Value::from(5 + LEN as i64));
    assert_eq!(engine.read_fresh_value(rec, last), Value::from(5 + LEN as i64));

    engine.store_mut().set_value(rec, base, Value::from(10));
    let batch = engine.on_field_changed(rec, base, Value::from(10)).unwrap();
    assert_eq!(batch.entries.len(), LEN);
    assert_eq!(
        batch.entries.last().map(|e| (e.field, e.value.clone())),
        Some((last, Value::from(10 + LEN as i64)))
    );
    assert_eq!(engine.read_value(rec, chain[0]), Value::from(11));
}

#[test]
fn test_limits_come_from_options() {
    let mut schema = Schema::new();
    let t = schema.add_table("T");
    schema.add_field(t, "A", FieldKind::Plain).unwrap();
    let f = schema.add_field(t, "F", FieldKind::Formula).unwrap();
    let options = CalculationOptions {
        limits: CompileLimits {
            max_depth: 4,
            max_nodes: 6,
        },
        ..CalculationOptions::default()
    };
    let engine = FormulaEngine::with_options(schema, MemoryStore::new(), options);

    let err = engine.define_formula(f, "-(-(-(-(-{A}))))").unwrap_err();
    assert!(matches!(
        err,
        FormulaError::LimitExceeded {
            limit: LimitKind::Depth,
            max: 4,
            ..
        }
    ));

    let err = engine.define_formula(f, "SUM({A}, 1, 2, 3, 4, 5, 6)").unwrap_err();
    assert!(matches!(
        err,
        FormulaError::LimitExceeded {
            limit: LimitKind::Nodes,
            max: 6,
            ..
        }
    ));
    assert!(engine.formula(f).is_none());

    engine.define_formula(f, "{A} * 2 + 1").unwrap();
    assert!(engine.formula(f).is_some());
}

#[test]
fn test_formula_compiled_for_another_table_is_rejected() {
    let mut schema = Schema::new();
    let orders = schema.add_table("Orders");
    let customers = schema.add_table("Customers");
    let amount = schema.add_field(orders, "Amount", FieldKind::Plain).unwrap();
    schema
        .add_field(customers, "Orders", FieldKind::Link { target: orders })
        .unwrap();
    let total = schema.add_field(customers, "Total", FieldKind::Formula).unwrap();
    let engine = engine_with(schema, MemoryStore::new());

    let foreign = engine.compile(orders, "{Amount} * 2").unwrap();
    assert_eq!(
        engine.add_or_update_formula_field(total, foreign),
        Err(FormulaError::ForeignField {
            field: amount,
            table: customers,
        })
    );
    assert!(engine.formula(total).is_none());

    let lookup = engine.compile(customers, "SUM({Orders}.{Amount})").unwrap();
    engine.add_or_update_formula_field(total, lookup).unwrap();
    assert!(engine.formula(total).is_some());
}
