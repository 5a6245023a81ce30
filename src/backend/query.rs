// Query evaluation shared by the in-process stores.
//
// Ordering follows the hosted store's rules closely enough for this client:
// values compare by type rank first (null < bool < number < string), then
// by value; ties break on document id. Descending queries reverse the whole
// key, id included, so a cursor taken from a page boundary is unambiguous.

use std::cmp::Ordering;

use serde_json::Value;

use super::traits::{Cursor, Direction, Query, Snapshot};

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Compare two field values.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Compare two (value, id) positions in the query's direction.
fn compare_positions(direction: Direction, a: (&Value, &str), b: (&Value, &str)) -> Ordering {
    let ascending = compare_values(a.0, b.0).then_with(|| a.1.cmp(b.1));
    match direction {
        Direction::Ascending => ascending,
        Direction::Descending => ascending.reverse(),
    }
}

/// Whether `snapshot` sorts strictly after `cursor` under the query's ordering.
pub fn is_after(query: &Query, snapshot: &Snapshot, cursor: &Cursor) -> bool {
    let Some(value) = snapshot.data.get(&query.order_by) else {
        return false;
    };
    compare_positions(
        query.direction,
        (value, snapshot.id.as_str()),
        (&cursor.value, cursor.id.as_str()),
    ) == Ordering::Greater
}

/// Evaluate a query over every document of its collection.
pub fn run(query: &Query, documents: impl IntoIterator<Item = Snapshot>) -> Vec<Snapshot> {
    let mut results: Vec<Snapshot> = documents
        .into_iter()
        .filter(|s| s.data.contains_key(&query.order_by))
        .collect();

    results.sort_by(|a, b| {
        let null = Value::Null;
        let av = a.data.get(&query.order_by).unwrap_or(&null);
        let bv = b.data.get(&query.order_by).unwrap_or(&null);
        compare_positions(query.direction, (av, a.id.as_str()), (bv, b.id.as_str()))
    });

    if let Some(cursor) = &query.start_after {
        results.retain(|s| is_after(query, s, cursor));
    }

    if let Some(limit) = query.limit {
        results.truncate(limit);
    }

    results
}
