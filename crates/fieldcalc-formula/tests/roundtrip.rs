//! Printing a parsed formula and parsing it again yields the same tree

use fieldcalc_core::{FieldId, FieldKind, Schema, TableId, Value};
use fieldcalc_formula::{
    extract_dependencies, parse_formula, BinaryOperator, FormulaExpr, UnaryOperator,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeSet;

struct Fixture {
    schema: Schema,
    table: TableId,
    plain: Vec<FieldId>,
    link: FieldId,
    remote: Vec<FieldId>,
}

fn fixture() -> Fixture {
    let mut schema = Schema::new();
    let people = schema.add_table("People");
    let orders = schema.add_table("Orders");
    let remote = vec![
        schema.add_field(orders, "Amount", FieldKind::Plain).unwrap(),
        schema.add_field(orders, "Status {old}", FieldKind::Plain).unwrap(),
    ];
    let plain = vec![
        schema.add_field(people, "Name", FieldKind::Plain).unwrap(),
        schema.add_field(people, "Unit Price", FieldKind::Plain).unwrap(),
        schema.add_field(people, "a\\b", FieldKind::Plain).unwrap(),
    ];
    let link = schema
        .add_field(people, "Orders", FieldKind::Link { target: orders })
        .unwrap();
    Fixture {
        schema,
        table: people,
        plain,
        link,
        remote,
    }
}

fn leaf(plain: Vec<FieldId>, link: FieldId, remote: Vec<FieldId>) -> impl Strategy<Value = FormulaExpr> {
    prop_oneof![
        (0u32..100_000, 0u32..4).prop_map(|(n, scale)| {
            FormulaExpr::Literal(Value::Number(Decimal::new(i64::from(n), scale)))
        }),
        any::<bool>().prop_map(|b| FormulaExpr::Literal(Value::Boolean(b))),
        "[a-zA-Z0-9 '\"\\\\\n\té{}]{0,8}".prop_map(|s| FormulaExpr::Literal(Value::Text(s))),
        prop::sample::select(plain).prop_map(FormulaExpr::FieldRef),
        prop::sample::select(remote).prop_map(move |field| FormulaExpr::LinkedFieldRef { link, field }),
    ]
}

fn binary_op() -> impl Strategy<Value = BinaryOperator> {
    prop::sample::select(vec![
        BinaryOperator::Add,
        BinaryOperator::Subtract,
        BinaryOperator::Multiply,
        BinaryOperator::Divide,
        BinaryOperator::Concat,
        BinaryOperator::Equal,
        BinaryOperator::NotEqual,
        BinaryOperator::LessThan,
        BinaryOperator::LessEqual,
        BinaryOperator::GreaterThan,
        BinaryOperator::GreaterEqual,
    ])
}

fn expr(f: &Fixture) -> impl Strategy<Value = FormulaExpr> {
    leaf(f.plain.clone(), f.link, f.remote.clone()).prop_recursive(5, 48, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(|operand| FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                operand: Box::new(operand),
            }),
            (binary_op(), inner.clone(), inner.clone()).prop_map(|(op, left, right)| {
                FormulaExpr::BinaryOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }),
            (inner.clone(), inner.clone(), prop::option::of(inner.clone())).prop_map(
                |(condition, then, otherwise)| FormulaExpr::Conditional {
                    condition: Box::new(condition),
                    then: Box::new(then),
                    otherwise: otherwise.map(Box::new),
                }
            ),
            (
                prop::sample::select(vec!["SUM", "LEFT", "UPPER", "NOW", "CONCATENATE"]),
                prop::collection::vec(inner, 0..4)
            )
                .prop_map(|(name, args)| FormulaExpr::Call {
                    name: name.to_string(),
                    args,
                }),
        ]
    })
}

fn collect_fields(expr: &FormulaExpr) -> BTreeSet<FieldId> {
    let mut ids = BTreeSet::new();
    expr.walk(&mut |node| match node {
        FormulaExpr::FieldRef(id) => {
            ids.insert(*id);
        }
        FormulaExpr::LinkedFieldRef { link, field } => {
            ids.insert(*link);
            ids.insert(*field);
        }
        _ => {}
    });
    ids
}

proptest! {
    #[test]
    fn printed_source_parses_back_to_the_same_tree(e in expr(&fixture())) {
        let f = fixture();
        let resolver = f.schema.resolver(f.table);
        let source = e.to_source(&resolver);
        let reparsed = parse_formula(&source, &resolver);
        prop_assert_eq!(reparsed, Ok(e), "source: {}", source);
    }

    #[test]
    fn extracted_dependencies_cover_every_reference(e in expr(&fixture())) {
        prop_assert_eq!(extract_dependencies(&e), collect_fields(&e));
    }
}

#[test]
fn canonical_spacing_and_parentheses() {
    let f = fixture();
    let resolver = f.schema.resolver(f.table);
    let cases = [
        ("{Unit Price}*(1+2)", "{Unit Price} * (1 + 2)"),
        ("1-(2-3)", "1 - (2 - 3)"),
        ("(1-2)-3", "1 - 2 - 3"),
        ("if(TRUE,'a',\"b\")", "IF(TRUE, \"a\", \"b\")"),
        ("sum({Orders}.{Amount})", "SUM({Orders}.{Amount})"),
        ("{a\\\\b} & 'x\\'y'", "{a\\\\b} & \"x'y\""),
        ("1 <> 2", "1 != 2"),
    ];
    for (input, expected) in cases {
        let ast = parse_formula(input, &resolver).unwrap();
        assert_eq!(ast.to_source(&resolver), expected, "input: {input}");
    }
}
