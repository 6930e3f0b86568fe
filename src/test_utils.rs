use serde_json::{json, Map, Value};

use crate::models::{DatasetTable, Row};

/// Synthetic crime dataset response: geo (DE, FR) x time (2020, 2021) x
/// iccs (3 offence categories), with `value[i] = i` over the cross-product.
pub(crate) fn crime_dataset_response() -> Value {
    let mut values = Map::new();
    for i in 0..12 {
        values.insert(i.to_string(), json!(i as f64));
    }
    json!({
        "id": ["geo", "time", "iccs"],
        "dimension": {
            "geo": {"category": {
                "index": {"DE": 0, "FR": 1},
                "label": {"DE": "Germany", "FR": "France"}
            }},
            "time": {"category": {
                "index": {"2020": 0, "2021": 1},
                "label": {"2020": "2020", "2021": "2021"}
            }},
            "iccs": {"category": {
                "index": {"ICCS0101": 0, "ICCS0401": 1, "ICCS0501": 2},
                "label": {
                    "ICCS0101": "Intentional homicide",
                    "ICCS0401": "Robbery",
                    "ICCS0501": "Theft"
                }
            }}
        },
        "value": values
    })
}

/// Synthetic response with the given dimensions and `value[i] = i`.
///
/// A dimension `("a", 2)` gets categories coded "A0", "A1" with labels
/// "a0", "a1".
pub(crate) fn counting_response(dims: &[(&str, usize)]) -> Value {
    let mut dimension = Map::new();
    let mut ids = Vec::new();
    let mut total = 1;
    for (name, count) in dims {
        ids.push(json!(name));
        let mut index = Map::new();
        let mut label = Map::new();
        for i in 0..*count {
            let code = format!("{}{}", name.to_uppercase(), i);
            index.insert(code.clone(), json!(i));
            label.insert(code, json!(format!("{}{}", name, i)));
        }
        dimension.insert(
            name.to_string(),
            json!({"category": {"index": index, "label": label}}),
        );
        total *= count;
    }
    let mut values = Map::new();
    for i in 0..total {
        values.insert(i.to_string(), json!(i as f64));
    }
    json!({"id": ids, "dimension": dimension, "value": values})
}

/// Column name list for hand-built tables.
pub(crate) fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// One hand-built table row.
pub(crate) fn row(labels: &[&str], geo_code: Option<&str>, value: Option<f64>) -> Row {
    Row {
        labels: labels.iter().map(|l| l.to_string()).collect(),
        geo_code: geo_code.map(str::to_string),
        value,
    }
}

/// A hand-built table for reshape tests.
pub(crate) fn table(
    dimensions: &[&str],
    rows: Vec<Row>,
) -> DatasetTable {
    DatasetTable {
        dimensions: cols(dimensions),
        rows,
    }
}
