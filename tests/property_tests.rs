//! Property-based tests for value normalization and statement rendering

use proptest::prelude::*;
use rust_orm_system::core::SelectBuilder;
use rust_orm_system::mapping::registry;
use rust_orm_system::mapping::Conversion;
use rust_orm_system::prelude::*;

// ============================================================================
// Primitive Normalization
// ============================================================================

proptest! {
    /// Integers land in the narrow kind exactly when they fit
    #[test]
    fn test_int8_accepts_only_fitting_values(value in any::<i64>()) {
        let normalized = PrimitiveKind::Int8.normalize(DatabaseValue::Long(value), Conversion::Exact);
        match i8::try_from(value) {
            Ok(narrow) => prop_assert_eq!(normalized.ok(), Some(DatabaseValue::TinyInt(narrow))),
            Err(_) => prop_assert!(normalized.is_err()),
        }
    }

    #[test]
    fn test_int32_widening_is_lossless(value in any::<i32>()) {
        let wide = PrimitiveKind::Int64.normalize(DatabaseValue::Int(value), Conversion::Exact);
        prop_assert_eq!(wide.ok(), Some(DatabaseValue::Long(i64::from(value))));
    }

    #[test]
    fn test_unsigned_kinds_reject_negatives(value in i64::MIN..0) {
        for kind in [PrimitiveKind::UInt8, PrimitiveKind::UInt16, PrimitiveKind::UInt32, PrimitiveKind::UInt64] {
            prop_assert!(kind.normalize(DatabaseValue::Long(value), Conversion::Exact).is_err());
        }
    }

    /// Null passes through every concrete kind
    #[test]
    fn test_null_is_kept(index in 1usize..PrimitiveKind::ALL.len() - 1) {
        let kind = PrimitiveKind::ALL[index];
        let normalized = kind.normalize(DatabaseValue::Null, Conversion::Exact);
        prop_assert_eq!(normalized.ok(), Some(DatabaseValue::Null));
    }

    #[test]
    fn test_decimal_literals_are_kept_verbatim(text in "-?[0-9]{1,12}(\\.[0-9]{1,6})?") {
        let decimal = Decimal::new(text.clone());
        prop_assert_eq!(decimal.as_ref().map(Decimal::as_str).ok(), Some(text.as_str()));

        let normalized = PrimitiveKind::Decimal.normalize(DatabaseValue::String(text.clone()), Conversion::Exact);
        prop_assert_eq!(normalized.ok(), Some(DatabaseValue::Decimal(text)));
    }

    #[test]
    fn test_decimal_rejects_letters(text in "[0-9]{0,4}[a-zA-Z]{1,4}[0-9]{0,4}") {
        prop_assert!(Decimal::new(text).is_err());
    }
}

// ============================================================================
// Where-Clause Rendering
// ============================================================================

#[derive(Debug, Default)]
struct Wide {
    id: i64,
    a: i64,
    b: i64,
    c: i64,
    d: i64,
}

impl Entity for Wide {
    fn schema() -> EntitySchema<Self> {
        EntitySchema::table("wide")
            .identity("id", PrimitiveKind::Int64, |w: &Wide| &w.id, |w: &mut Wide| &mut w.id)
            .column("a", PrimitiveKind::Int64, |w: &Wide| &w.a, |w: &mut Wide| &mut w.a)
            .column("b", PrimitiveKind::Int64, |w: &Wide| &w.b, |w: &mut Wide| &mut w.b)
            .column("c", PrimitiveKind::Int64, |w: &Wide| &w.c, |w: &mut Wide| &mut w.c)
            .column("d", PrimitiveKind::Int64, |w: &Wide| &w.d, |w: &mut Wide| &mut w.d)
    }
}

const WIDE_COLUMNS: [&str; 5] = ["id", "a", "b", "c", "d"];

fn backend() -> impl Strategy<Value = DatabaseType> {
    prop_oneof![
        Just(DatabaseType::Mysql),
        Just(DatabaseType::Mssql),
        Just(DatabaseType::Sqlite),
    ]
}

proptest! {
    /// Each predicate gets the placeholder of its position, in binding order
    #[test]
    fn test_where_placeholders_follow_depth(
        values in prop::collection::vec(any::<i64>(), 1..=5),
        backend in backend(),
    ) {
        let map = registry::resolve::<Wide>().expect("wide schema is valid");
        let pairs: Vec<(&str, i64)> = WIDE_COLUMNS.iter().copied().zip(values.iter().copied()).collect();
        let condition = WhereCondition::all_equal(pairs.clone()).expect("at least one pair");

        let statement = SelectBuilder::new(&map, backend)
            .filter(condition)
            .build()
            .expect("columns are mapped");

        let expected: Vec<String> = pairs
            .iter()
            .enumerate()
            .map(|(depth, (column, _))| format!("{}=@whereparam{}", column, depth))
            .collect();
        prop_assert_eq!(
            &statement.text,
            &format!("SELECT * FROM wide WHERE {}", expected.join(" AND "))
        );
        prop_assert_eq!(statement.parameters.len(), values.len());
        let bound: Vec<DatabaseValue> = values.iter().map(|v| DatabaseValue::Long(*v)).collect();
        prop_assert_eq!(statement.values(), bound);
    }

    #[test]
    fn test_unknown_where_column_never_renders(column in "[a-z]{6,10}") {
        let map = registry::resolve::<Wide>().expect("wide schema is valid");
        let condition = WhereCondition::eq(column, 1i64);
        let err = SelectBuilder::new(&map, DatabaseType::Sqlite)
            .filter(condition)
            .build()
            .unwrap_err();
        prop_assert!(matches!(err, DatabaseError::Configuration(_)));
    }
}

// ============================================================================
// Retry Backoff
// ============================================================================

proptest! {
    #[test]
    fn test_backoff_grows_and_stays_capped(
        initial in 0u64..500,
        cap in 0u64..5_000,
        attempt in 1u32..40,
    ) {
        let policy = RetryPolicy {
            max_attempts: 40,
            initial_backoff_ms: initial,
            max_backoff_ms: cap,
        };
        let current = policy.backoff(attempt);
        let next = policy.backoff(attempt + 1);
        prop_assert!(next >= current);
        prop_assert!(current.as_millis() <= u128::from(cap));
    }
}
