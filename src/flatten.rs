//! Flattening of nested JSON records into dotted-path analysis rows.
//!
//! One source record containing an array of sub-objects fans out into
//! multiple rows (order -> line items), each row repeating the parent's
//! scalar leaves. Row alignment is explicit: every property of an object
//! contributes either one row (replicated) or the common fan-out count;
//! mismatched fan-outs reject the document instead of guessing.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{ProbeError, ProbeResult};

/// One analysis row: dotted path to leaf value. Within a row the first
/// occurrence of a path wins; later duplicates are ignored.
pub type Row = BTreeMap<String, Value>;

/// Flattens one JSON record into its analysis rows.
///
/// - Scalar object properties become leaves named `parent.property`.
/// - An array of scalars collapses onto a single un-indexed column (parent
///   path plus a trailing separator), fanning out one row per element; an
///   empty array contributes nothing.
/// - An array of objects fans out: each element is flattened independently
///   and contributes its own row(s), with the enclosing object's other
///   leaves replicated onto every row.
pub fn flatten(record: &Value) -> ProbeResult<Vec<Row>> {
    let rows = flatten_value("", record)?;
    // A record with no leaves at all still represents one (empty) row.
    if rows.is_empty() {
        Ok(vec![Row::new()])
    } else {
        Ok(rows)
    }
}

fn flatten_value(path: &str, value: &Value) -> ProbeResult<Vec<Row>> {
    match value {
        Value::Object(map) => {
            let mut combined: Vec<Row> = vec![Row::new()];
            for (key, child) in map {
                let child_path = join(path, key);
                let child_rows = flatten_value(&child_path, child)?;
                combined = zip_rows(combined, child_rows, &child_path)?;
            }
            Ok(combined)
        }
        Value::Array(elements) => flatten_array(path, elements),
        // Scalars, including null: a single leaf at the current path.
        leaf => {
            let mut row = Row::new();
            row.insert(path.to_string(), leaf.clone());
            Ok(vec![row])
        }
    }
}

fn flatten_array(path: &str, elements: &[Value]) -> ProbeResult<Vec<Row>> {
    if elements.is_empty() {
        return Ok(Vec::new());
    }
    let object_count = elements.iter().filter(|e| e.is_object()).count();
    if object_count == elements.len() {
        // Array of objects: one or more rows per element, concatenated.
        let mut rows = Vec::new();
        for element in elements {
            rows.extend(flatten_value(path, element)?);
        }
        return Ok(rows);
    }
    if object_count == 0 && elements.iter().all(|e| !e.is_array()) {
        // Array of scalars: every element lands on the same un-indexed
        // column, one row per element, so all of them reach the widener.
        let column = format!("{path}.");
        return Ok(elements
            .iter()
            .map(|element| {
                let mut row = Row::new();
                row.insert(column.clone(), element.clone());
                row
            })
            .collect());
    }
    Err(ProbeError::Structure {
        key: path.to_string(),
        snippet: crate::error::snippet(&Value::Array(elements.to_vec())),
    })
}

/// Positionally combines the rows contributed by two sibling properties.
/// Either side may contribute a single row (replicated onto the other
/// side's rows) or both must agree on the fan-out count.
fn zip_rows(left: Vec<Row>, right: Vec<Row>, path: &str) -> ProbeResult<Vec<Row>> {
    if right.is_empty() {
        return Ok(left);
    }
    if left.len() == 1 {
        let base = &left[0];
        return Ok(right
            .into_iter()
            .map(|row| merge_rows(base.clone(), row))
            .collect());
    }
    if right.len() == 1 {
        let extra = &right[0];
        return Ok(left
            .into_iter()
            .map(|row| merge_rows(row, extra.clone()))
            .collect());
    }
    if left.len() != right.len() {
        return Err(ProbeError::Config(format!(
            "sibling arrays under '{path}' fan out to {} and {} rows; row alignment is ambiguous",
            left.len(),
            right.len()
        )));
    }
    Ok(left
        .into_iter()
        .zip(right)
        .map(|(a, b)| merge_rows(a, b))
        .collect())
}

fn merge_rows(mut base: Row, other: Row) -> Row {
    for (key, value) in other {
        base.entry(key).or_insert(value);
    }
    base
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_properties_become_dotted_leaves() {
        let rows = flatten(&json!({"id": 1, "customer": {"name": "Acme", "tier": 2}})).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&json!(1)));
        assert_eq!(rows[0].get("customer.name"), Some(&json!("Acme")));
        assert_eq!(rows[0].get("customer.tier"), Some(&json!(2)));
    }

    #[test]
    fn array_of_objects_fans_out_with_parent_leaves_replicated() {
        let record = json!({
            "order_id": 7,
            "lines": [
                {"sku": "A", "qty": 1},
                {"sku": "B", "qty": 2},
                {"sku": "C", "qty": 3}
            ]
        });
        let rows = flatten(&record).unwrap();
        assert_eq!(rows.len(), 3);
        for (idx, row) in rows.iter().enumerate() {
            assert_eq!(row.get("order_id"), Some(&json!(7)));
            assert_eq!(row.len(), 3);
            assert_eq!(row.get("lines.qty"), Some(&json!(idx as u64 + 1)));
        }
        assert_eq!(rows[2].get("lines.sku"), Some(&json!("C")));
    }

    #[test]
    fn array_of_scalars_fans_out_onto_one_unindexed_column() {
        let rows = flatten(&json!({"id": 1, "tags": ["red", "blue"]})).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("tags."), Some(&json!("red")));
        assert_eq!(rows[1].get("tags."), Some(&json!("blue")));
        assert!(rows.iter().all(|row| row.get("id") == Some(&json!(1))));
    }

    #[test]
    fn empty_array_contributes_no_leaf() {
        let rows = flatten(&json!({"id": 1, "tags": []})).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].contains_key("tags."));
    }

    #[test]
    fn nested_arrays_of_objects_multiply_rows() {
        let record = json!({
            "id": 1,
            "orders": [
                {"ref": "a", "lines": [{"sku": "x"}, {"sku": "y"}]},
                {"ref": "b", "lines": [{"sku": "z"}]}
            ]
        });
        let rows = flatten(&record).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.get("id") == Some(&json!(1))));
        assert_eq!(rows[0].get("orders.ref"), Some(&json!("a")));
        assert_eq!(rows[1].get("orders.lines.sku"), Some(&json!("y")));
        assert_eq!(rows[2].get("orders.ref"), Some(&json!("b")));
    }

    #[test]
    fn mismatched_sibling_fanouts_are_rejected() {
        let record = json!({
            "a": [{"v": 1}, {"v": 2}],
            "b": [{"w": 1}, {"w": 2}, {"w": 3}]
        });
        let err = flatten(&record).expect_err("ambiguous alignment");
        assert!(err.to_string().contains("fan out"));
    }

    #[test]
    fn matching_sibling_fanouts_zip_positionally() {
        let record = json!({
            "a": [{"v": 1}, {"v": 2}],
            "b": [{"w": 10}, {"w": 20}]
        });
        let rows = flatten(&record).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("a.v"), Some(&json!(1)));
        assert_eq!(rows[0].get("b.w"), Some(&json!(10)));
        assert_eq!(rows[1].get("a.v"), Some(&json!(2)));
        assert_eq!(rows[1].get("b.w"), Some(&json!(20)));
    }

    #[test]
    fn mixed_scalar_and_object_arrays_are_structural_errors() {
        let record = json!({"chaos": [1, {"a": 2}]});
        assert!(matches!(
            flatten(&record),
            Err(ProbeError::Structure { .. })
        ));
    }

    #[test]
    fn null_leaves_survive_flattening() {
        let rows = flatten(&json!({"id": 1, "note": null})).unwrap();
        assert_eq!(rows[0].get("note"), Some(&Value::Null));
    }

    #[test]
    fn sparse_array_elements_keep_their_own_keys() {
        let record = json!({
            "items": [
                {"sku": "A", "discount": 0.1},
                {"sku": "B"}
            ]
        });
        let rows = flatten(&record).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("items.discount"), Some(&json!(0.1)));
        assert!(!rows[1].contains_key("items.discount"));
    }

    #[test]
    fn scalar_record_flattens_to_root_leaf() {
        let rows = flatten(&json!(42)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(""), Some(&json!(42)));
    }
}
