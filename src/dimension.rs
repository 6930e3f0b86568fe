//! Dataset dimension metadata decoding.
//!
//! The dissemination format describes each dataset axis under a `dimension`
//! mapping: per dimension a `category.index` mapping (category code to
//! integer position) and a `category.label` mapping (category code to human
//! label). The positional index is authoritative: it fixes both the category
//! order within a dimension and, together with the dimension order, the
//! mapping of the flat value array onto rows.

use serde_json::Value;

use crate::error::StatboardError;
use crate::models::{Category, DimensionSpec};

/// Decode the ordered dimension list of a raw dataset response.
///
/// Dimension order follows the response's explicit `id` ordering list when
/// present (top-level, or nested inside `dimension` as some variants of the
/// format do). Without one, dimensions enumerate alphabetically by name; an
/// unordered mapping's iteration order is never used as a substitute for a
/// declared order.
pub fn parse_dimensions(raw: &Value) -> Result<Vec<DimensionSpec>, StatboardError> {
    let dimension = raw
        .get("dimension")
        .and_then(Value::as_object)
        .ok_or_else(|| StatboardError::malformed("missing 'dimension' mapping"))?;

    let order = match raw.get("id").or_else(|| dimension.get("id")) {
        Some(ids) => {
            let ids = ids
                .as_array()
                .ok_or_else(|| StatboardError::malformed("'id' ordering is not a list"))?;
            ids.iter()
                .map(|id| {
                    id.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| StatboardError::malformed("'id' ordering holds a non-string"))
                })
                .collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let mut names: Vec<String> = dimension.keys().cloned().collect();
            names.sort();
            names
        }
    };

    order
        .iter()
        .map(|name| {
            let spec = dimension.get(name).ok_or_else(|| {
                StatboardError::malformed(format!(
                    "ordering names dimension '{}' absent from the 'dimension' mapping",
                    name
                ))
            })?;
            parse_dimension(name, spec)
        })
        .collect()
}

/// Decode one dimension: categories sorted ascending by index position.
fn parse_dimension(name: &str, spec: &Value) -> Result<DimensionSpec, StatboardError> {
    let category = spec.get("category").ok_or_else(|| {
        StatboardError::malformed(format!("dimension '{}' is missing 'category'", name))
    })?;
    let index = category
        .get("index")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            StatboardError::malformed(format!("dimension '{}' is missing 'category.index'", name))
        })?;
    let labels = category.get("label").and_then(Value::as_object);

    let mut positions: Vec<(u64, &String)> = Vec::with_capacity(index.len());
    for (code, position) in index {
        let position = position.as_u64().ok_or_else(|| {
            StatboardError::malformed(format!(
                "dimension '{}' has a non-integer index for category '{}'",
                name, code
            ))
        })?;
        positions.push((position, code));
    }
    positions.sort();

    // The flat value array is indexed by the product of these positions, so
    // they must form a contiguous 0-based permutation.
    for (expected, (position, code)) in positions.iter().enumerate() {
        if *position != expected as u64 {
            return Err(StatboardError::malformed(format!(
                "dimension '{}' index positions are not contiguous at category '{}'",
                name, code
            )));
        }
    }

    let categories = positions
        .into_iter()
        .map(|(_, code)| Category {
            code: code.clone(),
            label: labels
                .and_then(|l| l.get(code))
                .and_then(Value::as_str)
                .unwrap_or(code)
                .to_string(),
        })
        .collect();

    Ok(DimensionSpec {
        name: name.to_string(),
        categories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_explicit_ordering() {
        let raw = json!({
            "id": ["time", "geo"],
            "dimension": {
                "geo": {"category": {
                    "index": {"DE": 0, "FR": 1},
                    "label": {"DE": "Germany", "FR": "France"}
                }},
                "time": {"category": {
                    "index": {"2020": 0, "2021": 1},
                    "label": {"2020": "2020", "2021": "2021"}
                }}
            },
            "value": {}
        });
        let dims = parse_dimensions(&raw).unwrap();
        assert_eq!(dims.len(), 2);
        assert_eq!(dims[0].name, "time");
        assert_eq!(dims[1].name, "geo");
        assert_eq!(dims[1].codes(), vec!["DE", "FR"]);
        assert_eq!(dims[1].labels(), vec!["Germany", "France"]);
    }

    #[test]
    fn test_ordering_nested_in_dimension() {
        let raw = json!({
            "dimension": {
                "id": ["geo"],
                "geo": {"category": {"index": {"DE": 0}, "label": {"DE": "Germany"}}}
            }
        });
        let dims = parse_dimensions(&raw).unwrap();
        assert_eq!(dims.len(), 1);
        assert_eq!(dims[0].name, "geo");
    }

    #[test]
    fn test_fallback_ordering_is_alphabetical() {
        let raw = json!({
            "dimension": {
                "time": {"category": {"index": {"2020": 0}}},
                "geo": {"category": {"index": {"DE": 0}}},
                "iccs": {"category": {"index": {"ICCS0101": 0}}}
            }
        });
        let dims = parse_dimensions(&raw).unwrap();
        let names: Vec<&str> = dims.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["geo", "iccs", "time"]);
    }

    #[test]
    fn test_category_order_follows_index_not_insertion() {
        let raw = json!({
            "id": ["iccs"],
            "dimension": {
                "iccs": {"category": {
                    "index": {"ICCS0301": 2, "ICCS0101": 0, "ICCS0201": 1},
                    "label": {
                        "ICCS0101": "Intentional homicide",
                        "ICCS0201": "Assault",
                        "ICCS0301": "Sexual violence"
                    }
                }}
            }
        });
        let dims = parse_dimensions(&raw).unwrap();
        assert_eq!(dims[0].codes(), vec!["ICCS0101", "ICCS0201", "ICCS0301"]);
    }

    #[test]
    fn test_label_defaults_to_code() {
        let raw = json!({
            "id": ["time"],
            "dimension": {
                "time": {"category": {"index": {"2020": 0, "2021": 1}, "label": {"2020": "Year 2020"}}}
            }
        });
        let dims = parse_dimensions(&raw).unwrap();
        assert_eq!(dims[0].labels(), vec!["Year 2020", "2021"]);
    }

    #[test]
    fn test_missing_dimension_mapping() {
        let raw = json!({"value": {}});
        let err = parse_dimensions(&raw).unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed dataset response: missing 'dimension' mapping"
        );
    }

    #[test]
    fn test_ordering_names_unknown_dimension() {
        let raw = json!({
            "id": ["geo", "time"],
            "dimension": {
                "geo": {"category": {"index": {"DE": 0}}}
            }
        });
        assert!(parse_dimensions(&raw).is_err());
    }

    #[test]
    fn test_non_contiguous_index_positions() {
        let raw = json!({
            "id": ["geo"],
            "dimension": {
                "geo": {"category": {"index": {"DE": 0, "FR": 2}}}
            }
        });
        let err = parse_dimensions(&raw).unwrap_err();
        assert!(err.to_string().contains("not contiguous"));
    }

    #[test]
    fn test_non_integer_index_position() {
        let raw = json!({
            "id": ["geo"],
            "dimension": {
                "geo": {"category": {"index": {"DE": "first"}}}
            }
        });
        assert!(parse_dimensions(&raw).is_err());
    }

    #[test]
    fn test_missing_category_index() {
        let raw = json!({
            "id": ["geo"],
            "dimension": {"geo": {"category": {"label": {"DE": "Germany"}}}}
        });
        let err = parse_dimensions(&raw).unwrap_err();
        assert!(err.to_string().contains("category.index"));
    }
}
