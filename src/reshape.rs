//! Table reshaping operators.
//!
//! Each operator is a pure function from one or more [DatasetTable]s (plus
//! scalar parameters) to a chart-ready shape. Operators never fetch or
//! decode; they consume what the loader produced. Merges join on machine
//! codes (`geo_code`, integer years); labels are presentation keys only,
//! since a renamed label must not break a join.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use lazy_static::lazy_static;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::StatboardError;
use crate::models::DatasetTable;

lazy_static! {
    /// Offence categories folded into one umbrella label before aggregation.
    pub static ref SEXUAL_OFFENCE_MERGE: HashMap<&'static str, &'static str> =
        HashMap::from_iter([
            ("Sexual exploitation", "Sexual crimes"),
            ("Sexual violence", "Sexual crimes"),
            ("Sexual assault", "Sexual crimes"),
        ]);
}

/// Geography codes of EU/euro-area aggregates, which drown out single
/// countries in country-level charts.
pub const EURO_AGGREGATE_CODES: &[&str] = &[
    "EU", "EU28", "EU27_2007", "EU27_2020", "EA", "EA20", "EA19", "EA18",
];

/// Labels of the same aggregates, for responses that only carry labels.
pub const EURO_AGGREGATE_LABELS: &[&str] = &[
    "European Union (EU6-1958, EU9-1973, EU10-1981, EU12-1986, EU15-1995, EU25-2004, EU27-2007, EU28-2013, EU27-2020)",
    "European Union - 28 countries (2013-2020)",
    "European Union - 27 countries (2007-2013)",
    "Euro area (EA11-1999, EA12-2001, EA13-2007, EA15-2008, EA16-2009, EA17-2011, EA18-2014, EA19-2015, EA20-2023)",
    "Euro area – 20 countries (from 2023)",
    "Euro area - 19 countries  (2015-2022)",
    "Euro area - 18 countries (2014)",
];

/// Remap one categorical column through a many-to-one merge table.
///
/// Remapping happens before grouping, never after: downstream aggregations
/// and argmax selections must operate on the merged categories.
pub fn merge_categories(
    mut table: DatasetTable,
    column: &str,
    merge: &HashMap<&str, &str>,
) -> Result<DatasetTable, StatboardError> {
    let idx = table.column(column)?;
    for row in &mut table.rows {
        if let Some(merged) = merge.get(row.labels[idx].as_str()) {
            row.labels[idx] = merged.to_string();
        }
    }
    Ok(table)
}

/// A wide pivot: pivoted category to (index category to summed value).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WidePivot(pub BTreeMap<String, BTreeMap<String, f64>>);

/// Group rows by two categorical columns, sum values per group and widen
/// `pivot_column` into columns.
///
/// Null observations count as 0 in the sums; combinations absent from the
/// input fill with 0, not null.
pub fn group_sum_pivot(
    table: &DatasetTable,
    index_column: &str,
    pivot_column: &str,
) -> Result<WidePivot, StatboardError> {
    let index_idx = table.column(index_column)?;
    let pivot_idx = table.column(pivot_column)?;

    let mut sums: BTreeMap<(String, String), f64> = BTreeMap::new();
    let mut index_labels: Vec<&str> = Vec::new();
    let mut pivot_labels: Vec<&str> = Vec::new();
    for row in &table.rows {
        let index_label = row.labels[index_idx].as_str();
        let pivot_label = row.labels[pivot_idx].as_str();
        *sums
            .entry((pivot_label.to_string(), index_label.to_string()))
            .or_insert(0.0) += row.value.unwrap_or(0.0);
        if !index_labels.contains(&index_label) {
            index_labels.push(index_label);
        }
        if !pivot_labels.contains(&pivot_label) {
            pivot_labels.push(pivot_label);
        }
    }

    let mut pivot = BTreeMap::new();
    for pivot_label in &pivot_labels {
        let mut column = BTreeMap::new();
        for index_label in &index_labels {
            let sum = sums
                .get(&(pivot_label.to_string(), index_label.to_string()))
                .copied()
                .unwrap_or(0.0);
            column.insert(index_label.to_string(), sum);
        }
        pivot.insert(pivot_label.to_string(), column);
    }
    Ok(WidePivot(pivot))
}

/// The category with the largest summed value.
///
/// Rows without an observation are excluded; ties break towards the
/// lexicographically smaller label so the selection is deterministic.
pub fn most_frequent(table: &DatasetTable, column: &str) -> Result<String, StatboardError> {
    let idx = table.column(column)?;
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for row in &table.rows {
        if let Some(value) = row.value {
            *totals.entry(row.labels[idx].as_str()).or_insert(0.0) += value;
        }
    }
    let mut best: Option<(&str, f64)> = None;
    for (label, total) in totals {
        match best {
            Some((_, best_total)) if total <= best_total => {}
            _ => best = Some((label, total)),
        }
    }
    best.map(|(label, _)| label.to_string()).ok_or_else(|| {
        StatboardError::reshape(format!("no observations to rank in column '{}'", column))
    })
}

/// Summed values per category of one column, in label order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryTotals {
    pub categories: Vec<String>,
    pub values: Vec<f64>,
}

/// Sum values per category of one column. Null observations count as 0.
pub fn category_totals(
    table: &DatasetTable,
    column: &str,
) -> Result<CategoryTotals, StatboardError> {
    let idx = table.column(column)?;
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for row in &table.rows {
        *totals.entry(row.labels[idx].as_str()).or_insert(0.0) += row.value.unwrap_or(0.0);
    }
    let (categories, values) = totals
        .into_iter()
        .map(|(label, total)| (label.to_string(), total))
        .unzip();
    Ok(CategoryTotals { categories, values })
}

/// One entry of a rate-per-population ranking.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RateRecord {
    pub geo: String,
    pub crime_rate_per_100k: f64,
}

/// Merge a population table and an event-count table on the geographic
/// machine code and compute events per 100 000 inhabitants for one year.
///
/// The join is inner: a geography missing population or event data drops
/// out silently. Event counts are summed per geography first; the first
/// population observation per geography wins.
pub fn rate_per_100k(
    population: &DatasetTable,
    events: &DatasetTable,
    year: i32,
) -> Result<Vec<RateRecord>, StatboardError> {
    let population_time = population.column("time")?;
    let events_time = events.column("time")?;

    let mut population_by_geo: BTreeMap<&str, f64> = BTreeMap::new();
    for row in &population.rows {
        let (Some(value), Some(code)) = (row.value, row.geo_code.as_deref()) else {
            continue;
        };
        if parse_year(&row.labels[population_time]) == Some(year) {
            population_by_geo.entry(code).or_insert(value);
        }
    }

    let mut count_by_geo: BTreeMap<&str, f64> = BTreeMap::new();
    for row in &events.rows {
        let (Some(value), Some(code)) = (row.value, row.geo_code.as_deref()) else {
            continue;
        };
        if parse_year(&row.labels[events_time]) == Some(year) {
            *count_by_geo.entry(code).or_insert(0.0) += value;
        }
    }

    let mut records: Vec<RateRecord> = count_by_geo
        .into_iter()
        .filter_map(|(code, count)| {
            let population = *population_by_geo.get(code)?;
            // A zero population cannot produce a rate.
            if population > 0.0 {
                Some(RateRecord {
                    geo: code.to_string(),
                    crime_rate_per_100k: count / population * 100_000.0,
                })
            } else {
                None
            }
        })
        .collect();
    records.sort_by(|a, b| {
        b.crime_rate_per_100k
            .partial_cmp(&a.crime_rate_per_100k)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.geo.cmp(&b.geo))
    });
    Ok(records)
}

/// Leaf of a percent-of-total breakdown.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShareCell {
    pub value: f64,
    pub percentage: f64,
}

/// Nested breakdown: geo to time to subcategory to [ShareCell].
pub type Breakdown = BTreeMap<String, BTreeMap<String, BTreeMap<String, ShareCell>>>;

/// Percent-of-total breakdown over a subcategory dimension.
///
/// Values are summed per (geo, time, subcategory); each cell's percentage is
/// its share of the (geo, time) total, rounded to two decimals, with a zero
/// total mapping to 0 rather than failing.
pub fn breakdown_by(table: &DatasetTable, part_column: &str) -> Result<Breakdown, StatboardError> {
    let geo_idx = table.column("geo")?;
    let time_idx = table.column("time")?;
    let part_idx = table.column(part_column)?;

    let mut sums: BTreeMap<[String; 3], f64> = BTreeMap::new();
    for row in &table.rows {
        let key = [
            row.labels[geo_idx].clone(),
            row.labels[time_idx].clone(),
            row.labels[part_idx].clone(),
        ];
        *sums.entry(key).or_insert(0.0) += row.value.unwrap_or(0.0);
    }

    let mut totals: BTreeMap<(&str, &str), f64> = BTreeMap::new();
    for ([geo, time, _], value) in &sums {
        *totals.entry((geo.as_str(), time.as_str())).or_insert(0.0) += value;
    }

    let entries: Vec<([String; 3], ShareCell)> = sums
        .iter()
        .map(|(key, &value)| {
            let total = totals[&(key[0].as_str(), key[1].as_str())];
            let percentage = if total > 0.0 {
                round2(value / total * 100.0)
            } else {
                0.0
            };
            (key.clone(), ShareCell { value, percentage })
        })
        .collect();
    Ok(nested3(entries))
}

/// Per-group percentage records over arbitrary grouping columns.
///
/// Values are summed per (group, part); each record carries its share of the
/// group total as a `percentage` field alongside the grouping labels.
pub fn grouped_shares(
    table: &DatasetTable,
    group_columns: &[&str],
    part_column: &str,
) -> Result<Vec<Value>, StatboardError> {
    let group_idx: Vec<usize> = group_columns
        .iter()
        .map(|column| table.column(column))
        .collect::<Result<_, _>>()?;
    let part_idx = table.column(part_column)?;

    let mut sums: BTreeMap<(Vec<String>, String), f64> = BTreeMap::new();
    for row in &table.rows {
        let group: Vec<String> = group_idx.iter().map(|&i| row.labels[i].clone()).collect();
        *sums
            .entry((group, row.labels[part_idx].clone()))
            .or_insert(0.0) += row.value.unwrap_or(0.0);
    }

    let mut totals: BTreeMap<&[String], f64> = BTreeMap::new();
    for ((group, _), value) in &sums {
        *totals.entry(group.as_slice()).or_insert(0.0) += value;
    }

    let records = sums
        .iter()
        .map(|((group, part), &value)| {
            let total = totals[group.as_slice()];
            let percentage = if total > 0.0 {
                round2(value / total * 100.0)
            } else {
                0.0
            };
            let mut record = serde_json::Map::new();
            for (column, label) in group_columns.iter().zip(group) {
                record.insert(column.to_string(), Value::String(label.clone()));
            }
            record.insert(part_column.to_string(), Value::String(part.clone()));
            record.insert("value".to_string(), json!(value));
            record.insert("percentage".to_string(), json!(percentage));
            Value::Object(record)
        })
        .collect();
    Ok(records)
}

/// Regional totals ranked by value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegionTotals {
    pub regions: Vec<String>,
    pub values: Vec<f64>,
    pub geo_codes: Vec<String>,
}

/// Sum values per region label, optionally restricted to regions whose
/// machine code starts with `prefix`, ranked descending, top `limit`.
pub fn regional_totals(
    table: &DatasetTable,
    prefix: Option<&str>,
    limit: usize,
) -> Result<RegionTotals, StatboardError> {
    let geo_idx = table.column("geo")?;

    let mut totals: BTreeMap<String, (f64, Option<String>)> = BTreeMap::new();
    for row in &table.rows {
        if let Some(prefix) = prefix {
            if !row
                .geo_code
                .as_deref()
                .map_or(false, |code| code.starts_with(prefix))
            {
                continue;
            }
        }
        let entry = totals
            .entry(row.labels[geo_idx].clone())
            .or_insert((0.0, None));
        entry.0 += row.value.unwrap_or(0.0);
        if entry.1.is_none() {
            entry.1 = row.geo_code.clone();
        }
    }

    let mut entries: Vec<(String, (f64, Option<String>))> = totals.into_iter().collect();
    entries.sort_by(|a, b| {
        b.1 .0
            .partial_cmp(&a.1 .0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    entries.truncate(limit);

    let mut result = RegionTotals {
        regions: Vec::with_capacity(entries.len()),
        values: Vec::with_capacity(entries.len()),
        geo_codes: Vec::with_capacity(entries.len()),
    };
    for (region, (value, code)) in entries {
        result.regions.push(region);
        result.values.push(value);
        result.geo_codes.push(code.unwrap_or_default());
    }
    Ok(result)
}

/// One named series of a time pivot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeriesEntry {
    pub name: String,
    pub data: Vec<f64>,
}

/// Long-to-wide pivot over time: one series per category, aligned to a
/// shared ascending time axis.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimeSeriesPivot {
    pub times: Vec<String>,
    pub series: Vec<SeriesEntry>,
}

/// Group values by (time, series category), sum, and pivot the category into
/// one series per label with 0 fill for absent combinations.
pub fn pivot_time_series(
    table: &DatasetTable,
    series_column: &str,
) -> Result<TimeSeriesPivot, StatboardError> {
    let time_idx = table.column("time")?;
    let series_idx = table.column(series_column)?;

    let mut sums: BTreeMap<(String, String), f64> = BTreeMap::new();
    for row in &table.rows {
        *sums
            .entry((
                row.labels[time_idx].clone(),
                row.labels[series_idx].clone(),
            ))
            .or_insert(0.0) += row.value.unwrap_or(0.0);
    }

    let mut times: Vec<String> = sums.keys().map(|(time, _)| time.clone()).collect();
    times.dedup();
    let mut names: Vec<String> = sums.keys().map(|(_, name)| name.clone()).collect();
    names.sort();
    names.dedup();

    let series = names
        .into_iter()
        .map(|name| {
            let data = times
                .iter()
                .map(|time| {
                    sums.get(&(time.clone(), name.clone()))
                        .copied()
                        .unwrap_or(0.0)
                })
                .collect();
            SeriesEntry { name, data }
        })
        .collect();
    Ok(TimeSeriesPivot { times, series })
}

/// How to aggregate multiple observations of one (geo_code, year) cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricAgg {
    Sum,
    Mean,
    First,
}

/// A metric keyed by (geo_code, year).
pub type MetricSeries = BTreeMap<(String, i32), f64>;

/// Collapse a table into one value per (geo_code, year).
///
/// Rows without an observation or a machine code are dropped; a time label
/// that is not an integer year is a [StatboardError::Reshape], since a
/// silently dropped join key would make charts quietly incomplete.
pub fn metric_series(
    table: &DatasetTable,
    agg: MetricAgg,
) -> Result<MetricSeries, StatboardError> {
    let time_idx = table.column("time")?;

    let mut cells: BTreeMap<(String, i32), (f64, usize)> = BTreeMap::new();
    for row in &table.rows {
        let (Some(value), Some(code)) = (row.value, row.geo_code.as_deref()) else {
            continue;
        };
        let label = &row.labels[time_idx];
        let year = parse_year(label).ok_or_else(|| {
            StatboardError::reshape(format!("time label '{}' is not a year", label))
        })?;
        let cell = cells.entry((code.to_string(), year)).or_insert((0.0, 0));
        match agg {
            MetricAgg::Sum | MetricAgg::Mean => cell.0 += value,
            MetricAgg::First => {
                if cell.1 == 0 {
                    cell.0 = value;
                }
            }
        }
        cell.1 += 1;
    }

    Ok(cells
        .into_iter()
        .map(|(key, (sum, count))| {
            let value = match agg {
                MetricAgg::Mean => sum / count as f64,
                _ => sum,
            };
            (key, value)
        })
        .collect())
}

/// One point of a three-way metric merge.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendPoint {
    pub geo_code: String,
    pub year: i32,
    pub population: f64,
    pub rate: f64,
    pub count: f64,
}

/// Merge three independently fetched metric series pairwise on
/// (geo_code, year). The join is inner: a key missing from any series drops
/// the point.
pub fn merge_time_series(
    population: &MetricSeries,
    rate: &MetricSeries,
    count: &MetricSeries,
) -> Vec<TrendPoint> {
    count
        .iter()
        .filter_map(|((code, year), &count_value)| {
            let key = (code.clone(), *year);
            let population_value = *population.get(&key)?;
            let rate_value = *rate.get(&key)?;
            Some(TrendPoint {
                geo_code: code.clone(),
                year: *year,
                population: population_value,
                rate: rate_value,
                count: count_value,
            })
        })
        .collect()
}

/// Build a three-level nested mapping from distinct key paths.
///
/// Callers aggregate into a flat map first, so each leaf is inserted exactly
/// once per distinct path; later duplicates would overwrite, never
/// accumulate.
fn nested3<L>(
    entries: impl IntoIterator<Item = ([String; 3], L)>,
) -> BTreeMap<String, BTreeMap<String, BTreeMap<String, L>>> {
    let mut nested: BTreeMap<String, BTreeMap<String, BTreeMap<String, L>>> = BTreeMap::new();
    for ([first, second, third], leaf) in entries {
        nested
            .entry(first)
            .or_default()
            .entry(second)
            .or_default()
            .insert(third, leaf);
    }
    nested
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn parse_year(label: &str) -> Option<i32> {
    label.trim().parse().ok()
}
