//! Property-based pushdown tests (proptest): a translated filter must keep
//! exactly the rows the host would keep.

use docbridge::read::{QueryColumns, ScanBuilder};
use docbridge::{
    ComparisonOp, DataType, Field, MemoryStore, OptionMap, PredicateNode, PredicateTranslator,
    ReadDefaults, ReadError, ReadOptions, Row, Schema, StringMatchKind, Translation, Value,
};
use proptest::prelude::*;
use std::sync::Arc;

const COLUMNS: [&str; 3] = ["id", "name", "active"];

fn schema() -> Arc<Schema> {
    Schema::new(vec![
        Field::nullable("id", DataType::Integer),
        Field::nullable("name", DataType::String),
        Field::nullable("active", DataType::Boolean),
    ])
    .into_shared()
}

fn columns() -> QueryColumns {
    QueryColumns::from_view("Test", "Items", None, &schema())
}

fn int_value() -> impl Strategy<Value = Value> {
    (-3i64..4).prop_map(Value::Integer)
}

fn str_value() -> impl Strategy<Value = Value> {
    prop::sample::select(vec!["", "a", "ab", "b", "ba", "O'Neil"]).prop_map(Value::from)
}

fn bool_value() -> impl Strategy<Value = Value> {
    any::<bool>().prop_map(Value::Boolean)
}

/// A literal for `column`; occasionally null or of the wrong type
fn literal_for(column: usize) -> BoxedStrategy<Value> {
    let typed = match column {
        0 => int_value().boxed(),
        1 => str_value().boxed(),
        _ => bool_value().boxed(),
    };
    prop_oneof![
        8 => typed,
        1 => Just(Value::Null),
        1 => prop_oneof![int_value(), str_value(), bool_value()],
    ]
    .boxed()
}

fn nullable(value: impl Strategy<Value = Value>) -> impl Strategy<Value = Value> {
    prop_oneof![3 => value, 1 => Just(Value::Null)]
}

fn row() -> impl Strategy<Value = Row> {
    (nullable(int_value()), nullable(str_value()), nullable(bool_value()))
        .prop_map(|(id, name, active)| Row::new(schema(), vec![id, name, active]).unwrap())
}

fn comparison_op() -> impl Strategy<Value = ComparisonOp> {
    prop::sample::select(vec![
        ComparisonOp::Eq,
        ComparisonOp::NotEq,
        ComparisonOp::Lt,
        ComparisonOp::LtEq,
        ComparisonOp::Gt,
        ComparisonOp::GtEq,
        ComparisonOp::NullSafeEq,
    ])
}

fn leaf() -> impl Strategy<Value = PredicateNode> {
    let comparison = (0usize..3, comparison_op())
        .prop_flat_map(|(column, op)| {
            literal_for(column).prop_map(move |literal| PredicateNode::compare(COLUMNS[column], op, literal))
        });
    let null_check = (0usize..3, any::<bool>()).prop_map(|(column, negated)| {
        let column = COLUMNS[column].to_string();
        if negated {
            PredicateNode::IsNotNull(column)
        } else {
            PredicateNode::IsNull(column)
        }
    });
    let string_match = (
        prop::sample::select(vec!["name", "id"]),
        prop::sample::select(vec![
            StringMatchKind::Contains,
            StringMatchKind::StartsWith,
            StringMatchKind::EndsWith,
        ]),
        prop::sample::select(vec!["", "a", "b", "'"]),
    )
        .prop_map(|(column, kind, pattern)| PredicateNode::string_match(column, kind, pattern));
    let membership = (0usize..3).prop_flat_map(|column| {
        prop::collection::vec(literal_for(column), 0..4)
            .prop_map(move |literals| PredicateNode::is_in(COLUMNS[column], literals))
    });

    prop_oneof![
        4 => comparison,
        2 => null_check,
        2 => string_match,
        2 => membership,
        1 => Just(PredicateNode::eq("missing", 1)),
    ]
}

fn predicate() -> impl Strategy<Value = PredicateNode> {
    leaf().prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| PredicateNode::and(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| PredicateNode::or(l, r)),
            inner.prop_map(PredicateNode::not),
        ]
    })
}

fn read_options(push_down: bool) -> ReadOptions {
    let mut options = OptionMap::new();
    options.insert("optic-query".to_string(), "op.fromView('Test', 'Items')".to_string());
    options.insert("push-down-filters".to_string(), push_down.to_string());
    ReadOptions::parse(&options, &ReadDefaults::default()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn prop_translation_preserves_three_valued_result(filter in predicate(), row in row()) {
        let translator = PredicateTranslator::new(columns());
        if let Translation::Translated(native) = translator.translate(&filter) {
            let host = filter.evaluate(&|column: &str| row.get(column));
            let store = native.evaluate(&|column: &docbridge::ColumnRef| row.get(&column.name));
            prop_assert_eq!(host, store, "filter {} translated to {}", filter, native);
        }
    }

    #[test]
    fn prop_translation_is_deterministic(filter in predicate()) {
        let first = PredicateTranslator::new(columns()).translate(&filter);
        let second = PredicateTranslator::new(columns()).translate(&filter);
        prop_assert_eq!(first, second);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_pushed_scan_matches_local_filtering(
        rows in prop::collection::vec(row(), 0..20),
        filters in prop::collection::vec(predicate(), 1..3),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let store = MemoryStore::new();
        store.register_view("Test", "Items", rows);

        let mut pushed = ScanBuilder::new(read_options(true), columns());
        pushed.push_filters(filters.clone());
        let mut local = ScanBuilder::new(read_options(false), columns());
        let outcome = local.push_filters(filters.clone());
        prop_assert!(outcome.pushed.is_empty());
        prop_assert_eq!(outcome.residual.len(), filters.len());

        let with_pushdown = runtime.block_on(pushed.build().execute(&store));
        let without = runtime.block_on(local.build().execute(&store));
        // A filter naming the unknown column fails both scans alike
        let names_missing = filters.iter().any(|f| f.columns().contains(&"missing"));
        match (with_pushdown, without) {
            (Ok(a), Ok(b)) => {
                prop_assert!(!names_missing);
                prop_assert_eq!(a, b);
            }
            (Err(ReadError::UnresolvedColumn { .. }), Err(ReadError::UnresolvedColumn { .. })) => {
                prop_assert!(names_missing);
            }
            (a, b) => prop_assert!(false, "scans disagree: {:?} vs {:?}", a, b),
        }
    }
}
