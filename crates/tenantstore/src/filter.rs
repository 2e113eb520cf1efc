//! Content filter engine.
//!
//! A filter is a JSON object describing the shape an event must have. Plain
//! values match by (loose) equality, nested objects recurse, and keys starting
//! with `$` are operators:
//!
//! | Operator | Meaning |
//! |----------|---------|
//! | `$eq` / `$neq` | deep equality / inequality |
//! | `$gt` `$gte` `$lt` `$lte` | ordering over numbers or strings |
//! | `$in` / `$nin` | membership in an array, substring of a string, or element of an input array |
//! | `$startsWith` / `$endsWith` | string prefix / suffix, against one string or any of several |
//! | `$exist` | key presence |
//! | `$or` / `$and` / `$not` | logical combinators over sub-schemas |
//!
//! Evaluation never fails: an operator applied to an unsupported type is
//! simply a non-match.
//!
//! ```
//! use fanout_tenantstore::filter;
//! use serde_json::json;
//!
//! let input = json!({"data": {"customer": {"tier": "premium"}, "amount": 120}});
//! assert!(filter::matches(&input, &json!({"data": {"customer": {"tier": "premium"}}})));
//! assert!(filter::matches(&input, &json!({"data": {"amount": {"$gte": 100}}})));
//! assert!(!filter::matches(&input, &json!({"data": {"refunded": {"$exist": true}}})));
//! ```

use serde_json::{Map, Value};

const OP_EQ: &str = "$eq";
const OP_NEQ: &str = "$neq";
const OP_GT: &str = "$gt";
const OP_GTE: &str = "$gte";
const OP_LT: &str = "$lt";
const OP_LTE: &str = "$lte";
const OP_IN: &str = "$in";
const OP_NIN: &str = "$nin";
const OP_STARTS_WITH: &str = "$startsWith";
const OP_ENDS_WITH: &str = "$endsWith";
const OP_EXIST: &str = "$exist";
const OP_OR: &str = "$or";
const OP_AND: &str = "$and";
const OP_NOT: &str = "$not";

/// Raised when an operator receives operands it cannot compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UnsupportedType;

type OpResult = Result<bool, UnsupportedType>;

/// Returns `true` if `input` satisfies `schema`.
#[must_use]
pub fn matches(input: &Value, schema: &Value) -> bool {
    match_schema(input, schema)
}

/// Returns `true` if `input` satisfies the object-shaped `filter`.
///
/// An empty filter matches everything.
#[must_use]
pub fn matches_filter(input: &Value, filter: &Map<String, Value>) -> bool {
    filter.is_empty() || match_object_schema(input, filter)
}

fn is_primitive(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))
}

fn is_operator(key: &str) -> bool {
    matches!(
        key,
        OP_EQ
            | OP_NEQ
            | OP_GT
            | OP_GTE
            | OP_LT
            | OP_LTE
            | OP_IN
            | OP_NIN
            | OP_STARTS_WITH
            | OP_ENDS_WITH
            | OP_EXIST
    )
}

fn match_schema(input: &Value, schema: &Value) -> bool {
    if is_primitive(input) || input.is_array() {
        if let Value::Object(schema) = schema {
            if let Some(negated) = schema.get(OP_NOT) {
                let hit = match_schema(input, negated);
                if schema.len() == 1 || hit {
                    return !hit;
                }
            }
        }
        return value_matches(input, schema);
    }
    match schema {
        Value::Object(schema) => match_object_schema(input, schema),
        _ => value_matches(input, schema),
    }
}

fn match_object_schema(input: &Value, schema: &Map<String, Value>) -> bool {
    if let Some(negated) = schema.get(OP_NOT) {
        let hit = match_schema(input, negated);
        if schema.len() == 1 || hit {
            return !hit;
        }
    }

    let Value::Object(fields) = input else {
        return is_primitive(input) && !schema.is_empty() && value_matches_object(input, schema);
    };

    for (key, sub_schema) in schema {
        match key.as_str() {
            OP_NOT => continue,
            OP_OR => {
                if let Value::Array(alternatives) = sub_schema {
                    if !alternatives.iter().any(|alt| match_schema(input, alt)) {
                        return false;
                    }
                    continue;
                }
            },
            OP_AND => {
                if let Value::Array(all) = sub_schema {
                    if !all.iter().all(|cond| match_schema(input, cond)) {
                        return false;
                    }
                    continue;
                }
            },
            _ => {},
        }

        match fields.get(key) {
            Some(value) => {
                if !value_matches(value, sub_schema) {
                    return false;
                }
            },
            None => {
                if !expects_absence(sub_schema) {
                    return false;
                }
            },
        }
    }
    true
}

/// `{"$exist": false}` is the only schema a missing key satisfies.
fn expects_absence(schema: &Value) -> bool {
    schema
        .as_object()
        .and_then(|ops| ops.get(OP_EXIST))
        .and_then(Value::as_bool)
        .is_some_and(|exist| !exist)
}

fn value_matches(input: &Value, schema: &Value) -> bool {
    if is_primitive(schema) {
        return match input {
            Value::Array(items) => items.iter().any(|item| value_matches(item, schema)),
            Value::Object(_) => false,
            _ => loose_eq(input, schema),
        };
    }

    if let Value::Array(items) = input {
        return match schema {
            Value::Array(wanted) => wanted
                .iter()
                .all(|w| items.iter().any(|item| value_matches(item, w))),
            Value::Object(ops) if ops.keys().any(|k| is_operator(k)) => {
                apply_operators(input, ops)
            },
            _ => items.iter().any(|item| value_matches(item, schema)),
        };
    }

    match schema {
        Value::Object(schema) => value_matches_object(input, schema),
        _ => false,
    }
}

fn value_matches_object(input: &Value, schema: &Map<String, Value>) -> bool {
    if let Some(Value::Array(alternatives)) = schema.get(OP_OR) {
        return alternatives.iter().any(|alt| match_schema(input, alt));
    }

    if schema.keys().any(|k| is_operator(k)) {
        return apply_operators(input, schema);
    }

    if is_primitive(input) {
        return false;
    }
    match_object_schema(input, schema)
}

fn apply_operators(input: &Value, schema: &Map<String, Value>) -> bool {
    schema
        .iter()
        .filter(|(key, _)| is_operator(key))
        .all(|(op, operand)| apply_operator(op, input, operand) == Ok(true))
}

fn apply_operator(op: &str, value: &Value, operand: &Value) -> OpResult {
    match op {
        OP_EQ => Ok(deep_eq(value, operand)),
        OP_NEQ => Ok(!deep_eq(value, operand)),
        OP_GT => compare(value, operand, |o| o.is_gt()),
        OP_GTE => compare(value, operand, |o| o.is_ge()),
        OP_LT => compare(value, operand, |o| o.is_lt()),
        OP_LTE => compare(value, operand, |o| o.is_le()),
        OP_IN => contains(value, operand),
        OP_NIN => contains(value, operand).map(|hit| !hit),
        OP_STARTS_WITH => affix(value, operand, |s, p| s.starts_with(p)),
        OP_ENDS_WITH => affix(value, operand, |s, p| s.ends_with(p)),
        // The key is present whenever an operator runs against its value.
        OP_EXIST => operand.as_bool().ok_or(UnsupportedType),
        _ => Err(UnsupportedType),
    }
}

/// Equality between primitives with numbers compared by value.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => false,
    }
}

fn deep_eq(a: &Value, b: &Value) -> bool {
    if is_primitive(a) && is_primitive(b) {
        return loose_eq(a, b);
    }
    a == b
}

fn compare(
    value: &Value,
    operand: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> OpResult {
    match (value, operand) {
        (Value::String(a), Value::String(b)) => Ok(accept(a.as_str().cmp(b.as_str()))),
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).map(accept).ok_or(UnsupportedType),
            _ => Err(UnsupportedType),
        },
        _ => Err(UnsupportedType),
    }
}

fn contains(value: &Value, operand: &Value) -> OpResult {
    if let Value::Array(candidates) = operand {
        if !is_primitive(value) {
            return Err(UnsupportedType);
        }
        return Ok(candidates.iter().any(|c| loose_eq(value, c)));
    }
    match value {
        Value::String(haystack) => match operand {
            Value::String(needle) => Ok(haystack.contains(needle.as_str())),
            _ => Err(UnsupportedType),
        },
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(item, operand))),
        _ => Err(UnsupportedType),
    }
}

fn affix(value: &Value, operand: &Value, test: impl Fn(&str, &str) -> bool) -> OpResult {
    let Value::String(s) = value else {
        return Err(UnsupportedType);
    };
    match operand {
        Value::String(p) => Ok(test(s, p)),
        Value::Array(options) => {
            for option in options {
                match option {
                    Value::String(p) if test(s, p) => return Ok(true),
                    Value::String(_) => {},
                    _ => return Err(UnsupportedType),
                }
            }
            Ok(false)
        },
        _ => Err(UnsupportedType),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn order_event() -> Value {
        json!({
            "id": "evt_1",
            "topic": "order.created",
            "time": "2024-05-01T10:00:00Z",
            "metadata": {"source": "checkout"},
            "data": {
                "type": "order.created",
                "amount": 42.5,
                "items": ["sku_1", "sku_2"],
                "customer": {"id": "cust_123", "tier": "premium", "country": "NL"},
                "note": null
            }
        })
    }

    // ========================================================================
    // Equality and nesting
    // ========================================================================

    #[test]
    fn test_primitive_equality() {
        let input = order_event();
        assert!(matches(&input, &json!({"data": {"type": "order.created"}})));
        assert!(!matches(&input, &json!({"data": {"type": "order.updated"}})));
    }

    #[test]
    fn test_nested_object_match() {
        let input = order_event();
        assert!(matches(&input, &json!({"data": {"customer": {"tier": "premium"}}})));
        assert!(!matches(&input, &json!({"data": {"customer": {"tier": "basic"}}})));
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        let input = json!({"count": 3});
        assert!(matches(&input, &json!({"count": 3.0})));
    }

    #[test]
    fn test_missing_key_does_not_match() {
        let input = order_event();
        assert!(!matches(&input, &json!({"data": {"coupon": "SPRING"}})));
    }

    #[test]
    fn test_object_schema_against_primitive_fails() {
        let input = order_event();
        assert!(!matches(&input, &json!({"data": {"type": {"nested": true}}})));
    }

    #[test]
    fn test_null_equality() {
        let input = order_event();
        assert!(matches(&input, &json!({"data": {"note": null}})));
        assert!(!matches(&input, &json!({"data": {"type": null}})));
    }

    #[test]
    fn test_empty_filter_matches() {
        assert!(matches_filter(&order_event(), &Map::new()));
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    #[test]
    fn test_primitive_schema_matches_any_array_element() {
        let input = order_event();
        assert!(matches(&input, &json!({"data": {"items": "sku_2"}})));
        assert!(!matches(&input, &json!({"data": {"items": "sku_9"}})));
    }

    #[test]
    fn test_array_schema_requires_every_element() {
        let input = order_event();
        assert!(matches(&input, &json!({"data": {"items": ["sku_1", "sku_2"]}})));
        assert!(matches(&input, &json!({"data": {"items": ["sku_2"]}})));
        assert!(!matches(&input, &json!({"data": {"items": ["sku_1", "sku_3"]}})));
    }

    #[test]
    fn test_operator_applied_to_array_input() {
        let input = order_event();
        assert!(matches(&input, &json!({"data": {"items": {"$in": "sku_1"}}})));
        assert!(!matches(&input, &json!({"data": {"items": {"$in": "sku_7"}}})));
    }

    // ========================================================================
    // Operators
    // ========================================================================

    #[test]
    fn test_comparison_operators() {
        let input = order_event();
        assert!(matches(&input, &json!({"data": {"amount": {"$gt": 40}}})));
        assert!(matches(&input, &json!({"data": {"amount": {"$gte": 42.5}}})));
        assert!(matches(&input, &json!({"data": {"amount": {"$lt": 50}}})));
        assert!(matches(&input, &json!({"data": {"amount": {"$lte": 42.5}}})));
        assert!(!matches(&input, &json!({"data": {"amount": {"$gt": 42.5}}})));
        assert!(matches(&input, &json!({"data": {"amount": {"$gt": 40, "$lt": 45}}})));
    }

    #[test]
    fn test_string_ordering() {
        let input = order_event();
        assert!(matches(&input, &json!({"data": {"customer": {"country": {"$gt": "DE"}}}})));
        assert!(!matches(&input, &json!({"data": {"customer": {"country": {"$lt": "DE"}}}})));
    }

    #[test]
    fn test_comparison_type_mismatch_is_no_match() {
        let input = order_event();
        assert!(!matches(&input, &json!({"data": {"amount": {"$gt": "40"}}})));
        assert!(!matches(&input, &json!({"data": {"amount": {"$lt": "40"}}})));
    }

    #[test]
    fn test_eq_and_neq() {
        let input = order_event();
        assert!(matches(&input, &json!({"data": {"type": {"$eq": "order.created"}}})));
        assert!(matches(&input, &json!({"data": {"type": {"$neq": "order.updated"}}})));
        assert!(matches(&input, &json!({"data": {"items": {"$eq": ["sku_1", "sku_2"]}}})));
        assert!(!matches(&input, &json!({"data": {"items": {"$eq": ["sku_2", "sku_1"]}}})));
    }

    #[test]
    fn test_in_and_nin() {
        let input = order_event();
        assert!(matches(&input, &json!({"data": {"customer": {"country": {"$in": ["NL", "BE"]}}}})));
        assert!(matches(&input, &json!({"data": {"customer": {"country": {"$nin": ["US"]}}}})));
        assert!(matches(&input, &json!({"data": {"type": {"$in": "created"}}})));
        assert!(!matches(&input, &json!({"data": {"type": {"$nin": "order"}}})));
    }

    #[test]
    fn test_in_with_object_input_is_no_match() {
        let input = order_event();
        assert!(!matches(&input, &json!({"data": {"customer": {"$in": ["NL"]}}})));
        assert!(!matches(&input, &json!({"data": {"customer": {"$nin": ["NL"]}}})));
    }

    #[test]
    fn test_starts_and_ends_with() {
        let input = order_event();
        assert!(matches(&input, &json!({"data": {"type": {"$startsWith": "order."}}})));
        assert!(matches(&input, &json!({"data": {"type": {"$endsWith": [".updated", ".created"]}}})));
        assert!(!matches(&input, &json!({"data": {"type": {"$startsWith": "user."}}})));
        assert!(!matches(&input, &json!({"data": {"amount": {"$startsWith": "4"}}})));
        assert!(!matches(&input, &json!({"data": {"type": {"$endsWith": [1, ".created"]}}})));
    }

    #[test]
    fn test_exist() {
        let input = order_event();
        assert!(matches(&input, &json!({"data": {"customer": {"$exist": true}}})));
        assert!(matches(&input, &json!({"data": {"coupon": {"$exist": false}}})));
        assert!(!matches(&input, &json!({"data": {"coupon": {"$exist": true}}})));
        assert!(!matches(&input, &json!({"data": {"customer": {"$exist": false}}})));
        assert!(matches(&input, &json!({"data": {"note": {"$exist": true}}})));
    }

    // ========================================================================
    // Logical combinators
    // ========================================================================

    #[test]
    fn test_or() {
        let input = order_event();
        let schema = json!({"data": {"$or": [{"type": "order.updated"}, {"amount": {"$gt": 40}}]}});
        assert!(matches(&input, &schema));
        let schema = json!({"data": {"$or": [{"type": "order.updated"}, {"amount": {"$gt": 50}}]}});
        assert!(!matches(&input, &schema));
    }

    #[test]
    fn test_top_level_or() {
        let input = order_event();
        let schema = json!({"$or": [{"topic": "user.created"}, {"metadata": {"source": "checkout"}}]});
        assert!(matches(&input, &schema));
    }

    #[test]
    fn test_and() {
        let input = order_event();
        let schema = json!({"$and": [{"topic": "order.created"}, {"data": {"customer": {"tier": "premium"}}}]});
        assert!(matches(&input, &schema));
        let schema = json!({"$and": [{"topic": "order.created"}, {"data": {"customer": {"tier": "basic"}}}]});
        assert!(!matches(&input, &schema));
    }

    #[test]
    fn test_not() {
        let input = order_event();
        assert!(matches(&input, &json!({"$not": {"topic": "user.created"}})));
        assert!(!matches(&input, &json!({"$not": {"topic": "order.created"}})));
        assert!(matches(&input, &json!({"data": {"type": {"$not": {"$startsWith": "user."}}}})));
    }

    #[test]
    fn test_not_combined_with_other_conditions() {
        let input = order_event();
        let schema = json!({"$not": {"topic": "user.created"}, "data": {"type": "order.created"}});
        assert!(matches(&input, &schema));
        let schema = json!({"$not": {"topic": "order.created"}, "data": {"type": "order.created"}});
        assert!(!matches(&input, &schema));
        let schema = json!({"$not": {"topic": "user.created"}, "data": {"type": "order.updated"}});
        assert!(!matches(&input, &schema));
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Any string value matches a schema requiring exactly that value.
            #[test]
            fn string_matches_itself(s in ".{0,24}") {
                let input = json!({"data": {"field": s.clone()}});
                let schema = json!({"data": {"field": s}});
                prop_assert!(matches(&input, &schema));
            }

            /// `$in` and `$nin` are complementary for primitive inputs.
            #[test]
            fn in_and_nin_are_complementary(
                value in 0i64..20,
                set in proptest::collection::vec(0i64..20, 0..8),
            ) {
                let input = json!({"n": value});
                let hit = matches(&input, &json!({"n": {"$in": set.clone()}}));
                let miss = matches(&input, &json!({"n": {"$nin": set.clone()}}));
                prop_assert_ne!(hit, miss);
                prop_assert_eq!(hit, set.contains(&value));
            }

            /// Numeric ordering operators agree with integer comparison.
            #[test]
            fn ordering_operators_agree_with_ints(a in -1000i64..1000, b in -1000i64..1000) {
                let input = json!({"n": a});
                prop_assert_eq!(matches(&input, &json!({"n": {"$gt": b}})), a > b);
                prop_assert_eq!(matches(&input, &json!({"n": {"$gte": b}})), a >= b);
                prop_assert_eq!(matches(&input, &json!({"n": {"$lt": b}})), a < b);
                prop_assert_eq!(matches(&input, &json!({"n": {"$lte": b}})), a <= b);
            }
        }
    }
}
