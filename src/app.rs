//! Chart API.
//!
//! One GET endpoint per chart, each returning the [ChartResponse] envelope:
//! the reshaped chart data, interactive filter descriptors built from
//! dimension metadata, and an error message when an optional aggregation
//! could not be computed. Reshape failures degrade to an error envelope;
//! fetch and decode failures propagate as JSON error responses.

use std::collections::BTreeMap;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use serde_json::Value;
use tower::{Layer, ServiceBuilder};
use tower_http::cors::CorsLayer;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::SharedAppState;
use crate::error::StatboardError;
use crate::loader::DatasetLoader;
use crate::metrics;
use crate::models::{
    ChartParams, ChartResponse, DatasetTable, FilterDescriptor, InteractiveData, Unit,
};
use crate::reshape::{self, MetricAgg};
use crate::validated_query::ValidatedQuery;

/// Offences recorded by the police, by offence category.
const OFFENCES_DATASET: &str = "crim_off_cat";
/// Offences recorded by the police, by NUTS 3 region.
const REGIONAL_DATASET: &str = "crim_gen_reg";
/// Bribery and corruption cases in criminal justice.
const BRIBERY_DATASET: &str = "crim_just_bri";
/// Prison population by age and sex.
const DETAINEES_DATASET: &str = "crim_pris_age";
/// Population on 1 January.
const POPULATION_DATASET: &str = "demo_pjan";
/// Real GDP growth rate.
const GDP_GROWTH_DATASET: &str = "tec00115";

/// Detainee age bands shown in the age breakdown charts.
const DETAINEE_AGE_GROUPS: &[&str] = &[
    "From 16 to 24 years",
    "From 25 to 34 years",
    "From 35 to 44 years",
    "From 45 to 54 years",
    "From 55 to 64 years",
    "65 years or over",
];

/// The service type served by [crate::server].
pub type Service = tower_http::normalize_path::NormalizePath<Router>;

/// Build the service, wrapping the router for trailing-slash tolerance.
pub fn service(state: SharedAppState) -> Service {
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

/// Build the chart API router.
pub fn router(state: SharedAppState) -> Router {
    let api = Router::new()
        .route("/offences/by-category", get(offences_by_category))
        .route("/offences/categories", get(offences_categories))
        .route("/offences/rate", get(offences_rate))
        .route("/regions/top", get(regions_top))
        .route("/regions/trend", get(regions_trend))
        .route("/bribery/records", get(bribery_records))
        .route("/bribery/shares", get(bribery_shares))
        .route("/detainees/breakdown", get(detainees_breakdown))
        .route("/detainees/by-age", get(detainees_by_age))
        .route("/context/trends", get(context_trends))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/api", api)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .on_request(metrics::request_counter)
                        .on_response(metrics::record_response_metrics),
                )
                .layer(CorsLayer::permissive()),
        )
}

async fn health() -> &'static str {
    "ok"
}

/// Degrade reshape failures to an error envelope; propagate everything else.
fn envelope<T: Serialize>(
    result: Result<T, StatboardError>,
    interactive: InteractiveData,
) -> Result<ChartResponse<T>, StatboardError> {
    match result {
        Ok(data) => Ok(ChartResponse::new(data, interactive)),
        Err(error @ StatboardError::Reshape { .. }) => {
            Ok(ChartResponse::degraded(error.to_string(), interactive))
        }
        Err(error) => Err(error),
    }
}

/// Interactive filter descriptors for the geo and time dimensions of a
/// dataset. EU and euro-area aggregates are withheld from the geo filter.
async fn geo_time_descriptors(
    loader: &DatasetLoader,
    dataset: &str,
    geo_multiple: bool,
    default_geo: Option<&str>,
) -> Result<InteractiveData, StatboardError> {
    let dims = loader.dimensions(dataset).await?;
    let mut interactive = InteractiveData::new();
    for dim in &dims {
        match dim.name.as_str() {
            "geo" => {
                let countries: Vec<(&str, &str)> = dim
                    .categories
                    .iter()
                    .filter(|c| {
                        !reshape::EURO_AGGREGATE_CODES.contains(&c.code.as_str())
                            && !reshape::EURO_AGGREGATE_LABELS.contains(&c.label.as_str())
                    })
                    .map(|c| (c.code.as_str(), c.label.as_str()))
                    .collect();
                interactive.insert(
                    "geo".to_string(),
                    FilterDescriptor {
                        values: countries.iter().map(|(code, _)| code.to_string()).collect(),
                        labels: Some(
                            countries
                                .iter()
                                .map(|(_, label)| label.to_string())
                                .collect(),
                        ),
                        multiple: geo_multiple,
                        default: default_geo.map(str::to_string),
                    },
                );
            }
            "time" => {
                interactive.insert(
                    "time".to_string(),
                    FilterDescriptor {
                        values: dim.codes().iter().map(|code| code.to_string()).collect(),
                        labels: None,
                        multiple: true,
                        default: None,
                    },
                );
            }
            _ => {}
        }
    }
    Ok(interactive)
}

/// The most recent integer year in a dataset's time dimension.
async fn latest_year(loader: &DatasetLoader, dataset: &str) -> Result<i32, StatboardError> {
    let dims = loader.dimensions(dataset).await?;
    dims.iter()
        .find(|dim| dim.name == "time")
        .and_then(|dim| {
            dim.categories
                .iter()
                .filter_map(|c| c.code.trim().parse::<i32>().ok())
                .max()
        })
        .ok_or_else(|| {
            StatboardError::reshape(format!("dataset {} has no usable time dimension", dataset))
        })
}

/// Offence pivot by country plus the dominant category.
#[derive(Serialize)]
struct OffencePivotChart {
    pivot_data: reshape::WidePivot,
    most_frequent_crime: String,
}

async fn offences_by_category(
    State(state): State<SharedAppState>,
    ValidatedQuery(params): ValidatedQuery<ChartParams>,
) -> Result<Json<ChartResponse<OffencePivotChart>>, StatboardError> {
    let loader = &state.loader;
    let interactive = geo_time_descriptors(loader, OFFENCES_DATASET, true, None).await?;
    let table = loader
        .load_table(OFFENCES_DATASET, params.filters().as_ref())
        .await?;

    let chart = reshape::merge_categories(table, "iccs", &reshape::SEXUAL_OFFENCE_MERGE).and_then(
        |merged| {
            Ok(OffencePivotChart {
                pivot_data: reshape::group_sum_pivot(&merged, "geo", "iccs")?,
                most_frequent_crime: reshape::most_frequent(&merged, "iccs")?,
            })
        },
    );
    Ok(Json(envelope(chart, interactive)?))
}

async fn offences_categories(
    State(state): State<SharedAppState>,
    ValidatedQuery(params): ValidatedQuery<ChartParams>,
) -> Result<Json<ChartResponse<reshape::CategoryTotals>>, StatboardError> {
    let loader = &state.loader;
    let interactive = geo_time_descriptors(loader, OFFENCES_DATASET, true, None).await?;
    let table = loader
        .load_table(OFFENCES_DATASET, params.filters().as_ref())
        .await?;

    let chart = reshape::merge_categories(table, "iccs", &reshape::SEXUAL_OFFENCE_MERGE)
        .and_then(|merged| reshape::category_totals(&merged, "iccs"));
    Ok(Json(envelope(chart, interactive)?))
}

async fn offences_rate(
    State(state): State<SharedAppState>,
    ValidatedQuery(params): ValidatedQuery<ChartParams>,
) -> Result<Json<ChartResponse<Vec<reshape::RateRecord>>>, StatboardError> {
    let loader = &state.loader;
    let interactive = geo_time_descriptors(loader, OFFENCES_DATASET, true, None).await?;

    let year = match params.year {
        Some(year) => year,
        None => latest_year(loader, OFFENCES_DATASET).await?,
    };
    let mut year_filter = crate::models::Filters::new();
    year_filter.insert("time".to_string(), vec![year.to_string()]);

    let crimes = loader
        .load_table(OFFENCES_DATASET, params.filters().as_ref())
        .await?
        .drop_null();
    let population = loader
        .load_table(POPULATION_DATASET, Some(&year_filter))
        .await?
        .drop_null();

    let chart = reshape::rate_per_100k(&population, &crimes, year);
    Ok(Json(envelope(chart, interactive)?))
}

async fn regions_top(
    State(state): State<SharedAppState>,
    ValidatedQuery(params): ValidatedQuery<ChartParams>,
) -> Result<Json<ChartResponse<reshape::RegionTotals>>, StatboardError> {
    let loader = &state.loader;
    let interactive = geo_time_descriptors(loader, REGIONAL_DATASET, false, Some("BE")).await?;
    let table = loader
        .load_table(REGIONAL_DATASET, params.time_filters().as_ref())
        .await?
        .drop_null();

    let chart = reshape::regional_totals(
        &table,
        params.first_geo().as_deref(),
        params.limit.unwrap_or(50),
    );
    Ok(Json(envelope(chart, interactive)?))
}

async fn regions_trend(
    State(state): State<SharedAppState>,
    ValidatedQuery(params): ValidatedQuery<ChartParams>,
) -> Result<Json<ChartResponse<reshape::TimeSeriesPivot>>, StatboardError> {
    let loader = &state.loader;
    let interactive = geo_time_descriptors(loader, REGIONAL_DATASET, false, Some("BE")).await?;
    let mut table = loader
        .load_table(REGIONAL_DATASET, params.time_filters().as_ref())
        .await?
        .drop_null();

    // The geo parameter selects a country whose regions share its code
    // prefix; it is not a dataset filter here.
    if let Some(prefix) = params.first_geo() {
        table
            .rows
            .retain(|row| row.geo_code.as_deref().map_or(false, |c| c.starts_with(&prefix)));
    }

    let chart = reshape::pivot_time_series(&table, "geo");
    Ok(Json(envelope(chart, interactive)?))
}

async fn bribery_records(
    State(state): State<SharedAppState>,
    ValidatedQuery(params): ValidatedQuery<ChartParams>,
) -> Result<Json<ChartResponse<Vec<Value>>>, StatboardError> {
    let loader = &state.loader;
    let mut interactive = geo_time_descriptors(loader, BRIBERY_DATASET, true, None).await?;
    interactive.insert("unit".to_string(), unit_descriptor());

    let table = loader
        .load_table(BRIBERY_DATASET, params.filters().as_ref())
        .await?;

    let chart = table
        .retain_eq("sex", "Total")
        .and_then(|t| t.retain_eq("unit", &params.unit_label()))
        .map(DatasetTable::drop_null)
        .and_then(|t| t.records(&["time", "geo", "geo_code", "value"]));
    Ok(Json(envelope(chart, interactive)?))
}

async fn bribery_shares(
    State(state): State<SharedAppState>,
    ValidatedQuery(params): ValidatedQuery<ChartParams>,
) -> Result<Json<ChartResponse<Vec<Value>>>, StatboardError> {
    let loader = &state.loader;
    let mut interactive = geo_time_descriptors(loader, BRIBERY_DATASET, true, None).await?;
    interactive.insert("unit".to_string(), unit_descriptor());

    let table = loader
        .load_table(BRIBERY_DATASET, params.filters().as_ref())
        .await?
        .drop_null();

    // Shares are across the sexes, so the pre-aggregated total is noise.
    let chart = table
        .exclude_in("sex", &["Total"])
        .and_then(|t| reshape::grouped_shares(&t, &["geo", "time", "leg_stat", "unit"], "sex"));
    Ok(Json(envelope(chart, interactive)?))
}

async fn detainees_breakdown(
    State(state): State<SharedAppState>,
    ValidatedQuery(params): ValidatedQuery<ChartParams>,
) -> Result<Json<ChartResponse<reshape::Breakdown>>, StatboardError> {
    let loader = &state.loader;
    let interactive = geo_time_descriptors(loader, DETAINEES_DATASET, true, Some("DE")).await?;
    let table = loader
        .load_table(DETAINEES_DATASET, params.filters().as_ref())
        .await?
        .drop_null();

    let chart = detainee_preprocess(table).and_then(|t| reshape::breakdown_by(&t, "age"));
    Ok(Json(envelope(chart, interactive)?))
}

async fn detainees_by_age(
    State(state): State<SharedAppState>,
    ValidatedQuery(params): ValidatedQuery<ChartParams>,
) -> Result<Json<ChartResponse<BTreeMap<String, f64>>>, StatboardError> {
    let loader = &state.loader;
    let mut interactive = geo_time_descriptors(loader, DETAINEES_DATASET, false, Some("DE")).await?;
    if let Some(time) = interactive.get_mut("time") {
        time.multiple = false;
    }

    let table = loader
        .load_table(DETAINEES_DATASET, params.filters().as_ref())
        .await?
        .drop_null();

    let chart = detainee_preprocess(table)
        .and_then(|t| reshape::category_totals(&t, "age"))
        .map(|totals| {
            totals
                .categories
                .into_iter()
                .zip(totals.values)
                .collect::<BTreeMap<String, f64>>()
        });
    Ok(Json(envelope(chart, interactive)?))
}

/// Restrict a detainee table to country rows, totals across sexes, and the
/// charted age bands.
fn detainee_preprocess(table: DatasetTable) -> Result<DatasetTable, StatboardError> {
    table
        .retain_eq("sex", "Total")?
        .exclude_in("geo", reshape::EURO_AGGREGATE_LABELS)?
        .retain_in("age", DETAINEE_AGE_GROUPS)
}

/// One merged point of the context trends chart.
#[derive(Serialize)]
struct ContextTrendPoint {
    geo_code: String,
    year: i32,
    population: f64,
    gdp_growth: f64,
    crime_count: f64,
    crime_rate_per_100k: f64,
}

async fn context_trends(
    State(state): State<SharedAppState>,
    ValidatedQuery(params): ValidatedQuery<ChartParams>,
) -> Result<Json<ChartResponse<Vec<ContextTrendPoint>>>, StatboardError> {
    let loader = &state.loader;
    let interactive = geo_time_descriptors(loader, OFFENCES_DATASET, false, Some("DE")).await?;

    let time_filters = params.time_filters();
    let population = loader
        .load_table(POPULATION_DATASET, time_filters.as_ref())
        .await?
        .drop_null();
    let gdp = loader
        .load_table(GDP_GROWTH_DATASET, time_filters.as_ref())
        .await?
        .drop_null();
    let crimes = loader
        .load_table(OFFENCES_DATASET, time_filters.as_ref())
        .await?
        .drop_null();

    let geo = params.first_geo();
    let chart = reshape::metric_series(&population, MetricAgg::First).and_then(|population| {
        let gdp = reshape::metric_series(&gdp, MetricAgg::Mean)?;
        let crimes = reshape::metric_series(&crimes, MetricAgg::Sum)?;
        let points = reshape::merge_time_series(&population, &gdp, &crimes)
            .into_iter()
            .filter(|point| geo.as_deref().map_or(true, |geo| point.geo_code == geo))
            .filter_map(|point| {
                if point.population > 0.0 {
                    Some(ContextTrendPoint {
                        crime_rate_per_100k: point.count / point.population * 100_000.0,
                        geo_code: point.geo_code,
                        year: point.year,
                        population: point.population,
                        gdp_growth: point.rate,
                        crime_count: point.count,
                    })
                } else {
                    None
                }
            })
            .collect::<Vec<_>>();
        Ok(points)
    });
    Ok(Json(envelope(chart, interactive)?))
}

/// Descriptor for the observation unit filter.
fn unit_descriptor() -> FilterDescriptor {
    FilterDescriptor {
        values: vec![
            Unit::Number.to_string(),
            Unit::PerHundredThousand.to_string(),
        ],
        labels: None,
        multiple: false,
        default: Some(Unit::Number.to_string()),
    }
}
