//! Dataset table decoding.
//!
//! The dissemination format flattens a multidimensional table into a sparse
//! `value` mapping keyed by the stringified position in the cross-product of
//! all dimension categories, enumerated in row-major (odometer) order with
//! the last dimension varying fastest. Decoding reconstructs the full
//! cross-product: one row per category combination, absent positions decoding
//! to a null observation. Getting this enumeration wrong attaches every value
//! to the wrong row, so the decoder is deliberately literal about it.

use hashbrown::HashMap;
use serde_json::Value;

use crate::dimension::parse_dimensions;
use crate::error::StatboardError;
use crate::models::{DatasetTable, DimensionSpec, Row};

/// Name of the geographic dimension, which gets a derived machine-code
/// column.
const GEO_DIMENSION: &str = "geo";

/// Decode a raw dataset response into a fully materialised table.
pub fn decode_response(raw: &Value) -> Result<DatasetTable, StatboardError> {
    let dimensions = parse_dimensions(raw)?;
    let values = raw
        .get("value")
        .and_then(Value::as_object)
        .ok_or_else(|| StatboardError::malformed("missing 'value' mapping"))?;
    decode_table(&dimensions, values)
}

/// Build the cross-product table for `dimensions`, pairing each combination
/// with its positional value.
fn decode_table(
    dimensions: &[DimensionSpec],
    values: &serde_json::Map<String, Value>,
) -> Result<DatasetTable, StatboardError> {
    let geo = dimensions.iter().position(|d| d.name == GEO_DIMENSION);
    // The reverse label-to-code mapping backs the derived geo_code column. A
    // label shared by two codes would make it ambiguous, which corrupts every
    // join keyed on geo_code downstream.
    let codes_by_label = match geo {
        Some(idx) => Some(geo_codes_by_label(&dimensions[idx])?),
        None => None,
    };

    let sizes: Vec<usize> = dimensions.iter().map(DimensionSpec::len).collect();
    let total: usize = sizes.iter().product();

    let mut rows = Vec::with_capacity(total);
    for idx in 0..total {
        // Unravel the running counter into per-dimension category positions,
        // last dimension fastest.
        let mut rem = idx;
        let mut labels = vec![String::new(); dimensions.len()];
        for dim in (0..dimensions.len()).rev() {
            let position = rem % sizes[dim];
            rem /= sizes[dim];
            labels[dim] = dimensions[dim].categories[position].label.clone();
        }

        let value = match values.get(&idx.to_string()) {
            None => None,
            Some(value) => Some(value.as_f64().ok_or_else(|| {
                StatboardError::malformed(format!("non-numeric value at position {}", idx))
            })?),
        };

        let geo_code = match (&codes_by_label, geo) {
            (Some(codes), Some(geo)) => codes.get(labels[geo].as_str()).map(|c| c.to_string()),
            _ => None,
        };

        rows.push(Row {
            labels,
            geo_code,
            value,
        });
    }

    Ok(DatasetTable {
        dimensions: dimensions.iter().map(|d| d.name.clone()).collect(),
        rows,
    })
}

/// Reverse label-to-code mapping for the geo dimension.
///
/// Fails when two codes share a label; picking one silently would corrupt
/// code-keyed joins.
fn geo_codes_by_label(
    dimension: &DimensionSpec,
) -> Result<HashMap<&str, &str>, StatboardError> {
    let mut codes = HashMap::with_capacity(dimension.len());
    for category in &dimension.categories {
        if let Some(previous) = codes.insert(category.label.as_str(), category.code.as_str()) {
            return Err(StatboardError::malformed(format!(
                "geo label '{}' maps to both codes '{}' and '{}'",
                category.label, previous, category.code
            )));
        }
    }
    Ok(codes)
}
