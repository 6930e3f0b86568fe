//! Data types and associated functions and methods

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::Display;
use validator::{Validate, ValidationError};

use crate::error::StatboardError;

/// One category of a dimension: a machine code paired with a human label.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Category {
    /// Machine code, e.g. "DE"
    pub code: String,
    /// Human label, e.g. "Germany"
    pub label: String,
}

/// One categorical axis of a dataset.
///
/// Categories are ordered by their source index position; that order drives
/// the mapping between the flat value array and table rows, so it is never
/// recomputed after construction.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DimensionSpec {
    /// Dimension identifier, e.g. "geo", "time", "iccs"
    pub name: String,
    /// Categories in ascending source index order
    pub categories: Vec<Category>,
}

impl DimensionSpec {
    /// Category codes in index order.
    pub fn codes(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.code.as_str()).collect()
    }

    /// Category labels in index order.
    pub fn labels(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.label.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// One row of a decoded dataset table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Row {
    /// Category labels, one per dimension, in the table's dimension order
    pub labels: Vec<String>,
    /// Machine code of the geographic category, when the dataset has a "geo"
    /// dimension
    pub geo_code: Option<String>,
    /// Observation value; absent observations decode to None
    pub value: Option<f64>,
}

/// A fully materialised dataset table: the cross-product of all dimension
/// categories, one row per combination, in odometer order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DatasetTable {
    /// Column names, in declared dimension order
    pub dimensions: Vec<String>,
    pub rows: Vec<Row>,
}

impl DatasetTable {
    /// Returns the positional index of a dimension column.
    ///
    /// A missing column is a [StatboardError::Reshape] so that chart
    /// endpoints can degrade to an error envelope rather than fail the
    /// process.
    pub fn column(&self, name: &str) -> Result<usize, StatboardError> {
        self.dimensions
            .iter()
            .position(|d| d == name)
            .ok_or_else(|| StatboardError::Reshape {
                reason: format!("column '{}' is not present in the table", name),
            })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keep only rows whose column equals `label`.
    pub fn retain_eq(mut self, column: &str, label: &str) -> Result<Self, StatboardError> {
        let idx = self.column(column)?;
        self.rows.retain(|row| row.labels[idx] == label);
        Ok(self)
    }

    /// Keep only rows whose column is one of `labels`.
    pub fn retain_in(mut self, column: &str, labels: &[&str]) -> Result<Self, StatboardError> {
        let idx = self.column(column)?;
        self.rows
            .retain(|row| labels.contains(&row.labels[idx].as_str()));
        Ok(self)
    }

    /// Drop rows whose column is one of `labels`.
    pub fn exclude_in(mut self, column: &str, labels: &[&str]) -> Result<Self, StatboardError> {
        let idx = self.column(column)?;
        self.rows
            .retain(|row| !labels.contains(&row.labels[idx].as_str()));
        Ok(self)
    }

    /// Drop rows without an observation value.
    pub fn drop_null(mut self) -> Self {
        self.rows.retain(|row| row.value.is_some());
        self
    }

    /// Project rows onto a column subset as JSON records.
    ///
    /// Besides dimension names, the pseudo-columns "geo_code" and "value" are
    /// accepted.
    pub fn records(&self, columns: &[&str]) -> Result<Vec<Value>, StatboardError> {
        let mut indices = Vec::with_capacity(columns.len());
        for &column in columns {
            match column {
                "geo_code" | "value" => indices.push(None),
                name => indices.push(Some(self.column(name)?)),
            }
        }
        let records = self
            .rows
            .iter()
            .map(|row| {
                let mut record = serde_json::Map::with_capacity(columns.len());
                for (&column, idx) in columns.iter().zip(&indices) {
                    let value = match (column, idx) {
                        ("geo_code", None) => serde_json::json!(row.geo_code),
                        ("value", None) => serde_json::json!(row.value),
                        (_, Some(idx)) => Value::String(row.labels[*idx].clone()),
                        _ => unreachable!(),
                    };
                    record.insert(column.to_string(), value);
                }
                Value::Object(record)
            })
            .collect();
        Ok(records)
    }
}

/// Requested dimension filters: dimension name to list of category codes or
/// periods. Absent dimensions mean "all categories".
pub type Filters = BTreeMap<String, Vec<String>>;

/// Observation unit labels used by the source datasets.
#[derive(Clone, Copy, Debug, Display, PartialEq)]
pub enum Unit {
    #[strum(serialize = "Number")]
    Number,
    #[strum(serialize = "Per hundred thousand inhabitants")]
    PerHundredThousand,
}

/// Query parameters accepted by the chart endpoints.
///
/// List-valued parameters are comma-separated (`geo=DE,FR&time=2020,2021`).
#[derive(Debug, Default, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct ChartParams {
    /// Time periods, comma separated
    pub time: Option<String>,
    /// Geography codes, comma separated
    pub geo: Option<String>,
    /// Observation unit label
    #[validate(custom = "validate_unit")]
    pub unit: Option<String>,
    /// A single reference year
    #[validate(range(min = 1960, max = 2100, message = "year is out of range"))]
    pub year: Option<i32>,
    /// Offence category label
    pub iccs: Option<String>,
    /// Maximum number of result rows
    #[validate(range(min = 1, max = 500, message = "limit must be between 1 and 500"))]
    pub limit: Option<usize>,
}

impl ChartParams {
    /// Dimension filters derived from the `time` and `geo` parameters, or
    /// None when neither is present.
    pub fn filters(&self) -> Option<Filters> {
        let mut filters = Filters::new();
        if let Some(time) = split_list(&self.time) {
            filters.insert("time".to_string(), time);
        }
        if let Some(geo) = split_list(&self.geo) {
            filters.insert("geo".to_string(), geo);
        }
        if filters.is_empty() {
            None
        } else {
            Some(filters)
        }
    }

    /// Dimension filters built from the `time` parameter alone.
    ///
    /// Used by charts that treat `geo` as a region-code prefix selector
    /// rather than a dataset filter.
    pub fn time_filters(&self) -> Option<Filters> {
        split_list(&self.time).map(|time| {
            let mut filters = Filters::new();
            filters.insert("time".to_string(), time);
            filters
        })
    }

    /// The first geography code, when given.
    pub fn first_geo(&self) -> Option<String> {
        split_list(&self.geo).and_then(|mut codes| {
            if codes.is_empty() {
                None
            } else {
                Some(codes.remove(0))
            }
        })
    }

    /// The requested unit label, defaulting to [Unit::Number].
    pub fn unit_label(&self) -> String {
        self.unit
            .clone()
            .unwrap_or_else(|| Unit::Number.to_string())
    }
}

/// Split a comma-separated parameter into its non-empty elements.
fn split_list(param: &Option<String>) -> Option<Vec<String>> {
    let values: Vec<String> = param
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Validate that a unit parameter names a known observation unit.
fn validate_unit(unit: &str) -> Result<(), ValidationError> {
    if unit != Unit::Number.to_string() && unit != Unit::PerHundredThousand.to_string() {
        return Err(ValidationError::new("unknown observation unit"));
    }
    Ok(())
}

/// Descriptor for one interactive chart filter, built from dimension
/// metadata.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FilterDescriptor {
    /// Selectable category codes
    pub values: Vec<String>,
    /// Human labels matching `values`, when they differ from the codes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    /// Whether multiple selections are allowed
    pub multiple: bool,
    /// Preselected code, when any
    pub default: Option<String>,
}

/// Interactive filter descriptors keyed by dimension name.
pub type InteractiveData = BTreeMap<String, FilterDescriptor>;

/// Response envelope returned by every chart endpoint.
#[derive(Debug, Serialize)]
pub struct ChartResponse<T: Serialize> {
    pub chart_data: Option<T>,
    pub interactive_data: Option<InteractiveData>,
    pub error: Option<String>,
}

impl<T: Serialize> ChartResponse<T> {
    /// An envelope carrying chart data.
    pub fn new(chart_data: T, interactive_data: InteractiveData) -> Self {
        Self {
            chart_data: Some(chart_data),
            interactive_data: Some(interactive_data),
            error: None,
        }
    }

    /// A degraded envelope: no chart data, an explanatory message, but still
    /// the filter descriptors so the frontend can offer a way out.
    pub fn degraded(error: String, interactive_data: InteractiveData) -> Self {
        Self {
            chart_data: None,
            interactive_data: Some(interactive_data),
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> DatasetTable {
        DatasetTable {
            dimensions: vec!["geo".to_string(), "time".to_string()],
            rows: vec![
                Row {
                    labels: vec!["Germany".to_string(), "2020".to_string()],
                    geo_code: Some("DE".to_string()),
                    value: Some(1.0),
                },
                Row {
                    labels: vec!["France".to_string(), "2020".to_string()],
                    geo_code: Some("FR".to_string()),
                    value: None,
                },
            ],
        }
    }

    #[test]
    fn test_column_lookup() {
        let table = table();
        assert_eq!(table.column("time").unwrap(), 1);
        let err = table.column("sex").unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot reshape table: column 'sex' is not present in the table"
        );
    }

    #[test]
    fn test_retain_and_drop_null() {
        let filtered = table().retain_eq("geo", "Germany").unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.rows[0].geo_code.as_deref(), Some("DE"));

        let non_null = table().drop_null();
        assert_eq!(non_null.len(), 1);
        assert_eq!(non_null.rows[0].labels[0], "Germany");
    }

    #[test]
    fn test_exclude_in() {
        let remaining = table().exclude_in("geo", &["Germany"]).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining.rows[0].labels[0], "France");
    }

    #[test]
    fn test_records_projection() {
        let records = table().records(&["geo", "geo_code", "value"]).unwrap();
        assert_eq!(
            records[0],
            serde_json::json!({"geo": "Germany", "geo_code": "DE", "value": 1.0})
        );
        assert_eq!(
            records[1],
            serde_json::json!({"geo": "France", "geo_code": "FR", "value": null})
        );
    }

    #[test]
    fn test_records_unknown_column() {
        assert!(table().records(&["geo", "sex"]).is_err());
    }

    #[test]
    fn test_chart_params_filters() {
        let params = ChartParams {
            time: Some("2020,2021".to_string()),
            geo: Some("DE, FR".to_string()),
            ..Default::default()
        };
        let filters = params.filters().unwrap();
        assert_eq!(filters["time"], vec!["2020", "2021"]);
        assert_eq!(filters["geo"], vec!["DE", "FR"]);
        assert_eq!(params.first_geo().as_deref(), Some("DE"));

        let time_only = params.time_filters().unwrap();
        assert_eq!(time_only.len(), 1);
        assert_eq!(time_only["time"], vec!["2020", "2021"]);
    }

    #[test]
    fn test_chart_params_empty_filters() {
        let params = ChartParams::default();
        assert_eq!(params.filters(), None);
        assert_eq!(params.first_geo(), None);
        assert_eq!(params.unit_label(), "Number");
    }

    #[test]
    fn test_chart_params_blank_list_is_absent() {
        let params = ChartParams {
            time: Some(" , ".to_string()),
            ..Default::default()
        };
        assert_eq!(params.filters(), None);
    }

    #[test]
    #[should_panic(expected = "unknown observation unit")]
    fn test_invalid_unit() {
        let params = ChartParams {
            unit: Some("Percent".to_string()),
            ..Default::default()
        };
        params.validate().unwrap()
    }

    #[test]
    fn test_valid_unit() {
        let params = ChartParams {
            unit: Some("Per hundred thousand inhabitants".to_string()),
            ..Default::default()
        };
        params.validate().unwrap();
        assert_eq!(params.unit_label(), "Per hundred thousand inhabitants");
    }

    #[test]
    #[should_panic(expected = "limit must be between 1 and 500")]
    fn test_invalid_limit() {
        let params = ChartParams {
            limit: Some(0),
            ..Default::default()
        };
        params.validate().unwrap()
    }

    #[test]
    fn test_query_string_deserialisation() {
        let params: ChartParams =
            serde_urlencoded::from_str("geo=DE,FR&time=2020&limit=10").unwrap();
        assert_eq!(params.geo.as_deref(), Some("DE,FR"));
        assert_eq!(params.limit, Some(10));
        params.validate().unwrap();
    }

    #[test]
    fn test_unknown_query_field_rejected() {
        let result = serde_urlencoded::from_str::<ChartParams>("foo=bar");
        assert!(result.is_err());
    }

    #[test]
    fn test_chart_response_serialisation() {
        let resp = ChartResponse::new(serde_json::json!({"values": [1, 2]}), InteractiveData::new());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "chart_data": {"values": [1, 2]},
                "interactive_data": {},
                "error": null
            })
        );
    }

    #[test]
    fn test_degraded_chart_response() {
        let resp = ChartResponse::<Value>::degraded("no rows".to_string(), InteractiveData::new());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["chart_data"], Value::Null);
        assert_eq!(json["error"], "no rows");
    }
}
