//! Total ordering over shaped values: `Less`, `Greater`, `Equal`, collapsing
//! the two "undefined" states a skip-list range query can hit down to one of
//! those three.
//!
//! Compares by JSON type family first (null < bool < number < string < list
//! < object), then by content within a type, recursing into arrays/objects
//! field-by-field with object fields visited in attribute-weight order so
//! the result doesn't depend on insertion order.

use std::cmp::Ordering;

use crate::shaper::attribute::AttributeDictionary;
use crate::shaper::shape::Shape;

/// Compare two shaped values structurally. `left`/`right` must each be
/// decoded (not raw shaped bytes) since cross-shape comparisons need to
/// inspect values of different shapes uniformly.
use serde_json::Value;

/// Compare two JSON values the way a skip-list index orders its keys.
///
/// Type family ordering matches `Shape::type_order`: Null < Boolean < Number
/// < String < Array(list) < Object. Within a family, values compare by their
/// natural Rust ordering (numbers via partial_cmp treating NaN as greater
/// than everything, strings lexicographically by byte, lists
/// lexicographically element-by-element, objects by attribute weight then
/// value).
pub fn compare(left: &Value, right: &Value, attributes: &AttributeDictionary) -> Ordering {
    let lt = value_type_order(left);
    let rt = value_type_order(right);
    if lt != rt {
        return lt.cmp(&rt);
    }
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            compare_f64(a, b)
        }
        (Value::String(a), Value::String(b)) => a.as_bytes().cmp(b.as_bytes()),
        (Value::Array(a), Value::Array(b)) => compare_arrays(a, b, attributes),
        (Value::Object(a), Value::Object(b)) => compare_objects(a, b, attributes),
        _ => Ordering::Equal, // unreachable: lt == rt guarantees same variant family above
    }
}

fn value_type_order(value: &Value) -> u8 {
    match value {
        Value::Null => 1,
        Value::Bool(_) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// `f64::partial_cmp`, but total: NaN (which can only arise from a malformed
/// shaped number) sorts above every other number rather than making the
/// whole comparison undefined.
fn compare_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => Ordering::Equal,
    })
}

fn compare_arrays(a: &[Value], b: &[Value], attributes: &AttributeDictionary) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare(x, y, attributes);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Object comparison walks fields in attribute-weight order (lowest weight
/// first) so the same logical document always compares the same way
/// regardless of the order its keys happen to be stored in.
fn compare_objects(
    a: &serde_json::Map<String, Value>,
    b: &serde_json::Map<String, Value>,
    attributes: &AttributeDictionary,
) -> Ordering {
    let sorted_a = sort_by_weight(a, attributes);
    let sorted_b = sort_by_weight(b, attributes);

    let mut ai = sorted_a.into_iter();
    let mut bi = sorted_b.into_iter();
    loop {
        match (ai.next(), bi.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((aw, ak, av)), Some((bw, bk, bv))) => {
                let key_order = aw.cmp(&bw).then_with(|| ak.cmp(bk));
                if key_order != Ordering::Equal {
                    return key_order;
                }
                let value_order = compare(av, bv, attributes);
                if value_order != Ordering::Equal {
                    return value_order;
                }
            }
        }
    }
}

fn sort_by_weight<'a>(
    map: &'a serde_json::Map<String, Value>,
    attributes: &AttributeDictionary,
) -> Vec<(i64, &'a str, &'a Value)> {
    let mut entries: Vec<(i64, &str, &Value)> = map
        .iter()
        .map(|(k, v)| {
            let weight = attributes.lookup(k).and_then(|aid| attributes.weight_of(aid)).unwrap_or(i64::MAX);
            (weight, k.as_str(), v)
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    entries
}

/// Compare two shapes by the same type-family order used for values, falling
/// back to the canonical byte encoding when both share a family (e.g. two
/// distinct object shapes). Used to give deterministic iteration order to a
/// `ShapeDictionary` dump without needing decoded values.
pub fn compare_shapes(a: &Shape, b: &Shape) -> Ordering {
    a.type_order()
        .cmp(&b.type_order())
        .then_with(|| a.to_canonical_bytes().cmp(&b.to_canonical_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_families_order_before_content() {
        let attrs = AttributeDictionary::new();
        assert_eq!(compare(&json!(null), &json!(false), &attrs), Ordering::Less);
        assert_eq!(compare(&json!(false), &json!(1), &attrs), Ordering::Less);
        assert_eq!(compare(&json!(1), &json!("a"), &attrs), Ordering::Less);
        assert_eq!(compare(&json!("a"), &json!([1]), &attrs), Ordering::Less);
        assert_eq!(compare(&json!([1]), &json!({"a": 1}), &attrs), Ordering::Less);
    }

    #[test]
    fn numbers_compare_numerically() {
        let attrs = AttributeDictionary::new();
        assert_eq!(compare(&json!(1), &json!(2), &attrs), Ordering::Less);
        assert_eq!(compare(&json!(2.5), &json!(2.5), &attrs), Ordering::Equal);
    }

    #[test]
    fn strings_compare_lexicographically() {
        let attrs = AttributeDictionary::new();
        assert_eq!(compare(&json!("abc"), &json!("abd"), &attrs), Ordering::Less);
    }

    #[test]
    fn arrays_compare_elementwise_then_by_length() {
        let attrs = AttributeDictionary::new();
        assert_eq!(compare(&json!([1, 2]), &json!([1, 3]), &attrs), Ordering::Less);
        assert_eq!(compare(&json!([1]), &json!([1, 2]), &attrs), Ordering::Less);
    }

    #[test]
    fn objects_compare_by_attribute_weight_not_insertion_order() {
        let attrs = AttributeDictionary::new();
        attrs.find_or_insert("a").unwrap();
        attrs.find_or_insert("b").unwrap();

        let left = json!({"b": 1, "a": 1});
        let right = json!({"a": 1, "b": 2});
        assert_eq!(compare(&left, &right, &attrs), Ordering::Less);
    }

    #[test]
    fn equal_values_compare_equal() {
        let attrs = AttributeDictionary::new();
        assert_eq!(compare(&json!({"a": 1}), &json!({"a": 1}), &attrs), Ordering::Equal);
    }
}
