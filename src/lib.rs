//! This crate provides a statistics dashboard backend. It fetches
//! multi-dimensional datasets from the Eurostat dissemination API, decodes
//! the positional-index wire format into labeled tables, caches raw
//! responses, reshapes tables into chart-ready structures and serves them as
//! JSON to a frontend charting layer.
//!
//! The backend is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team on top of various
//!   popular components, including the [hyper] HTTP library.
//! * [Serde](serde) performs (de)serialisation of JSON request and response
//!   data.
//! * [Reqwest](reqwest) issues the upstream dataset fetches.

pub mod app;
pub mod app_state;
pub mod cli;
pub mod decode;
pub mod dimension;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod models;
pub mod reshape;
pub mod response_cache;
pub mod server;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod validated_query;
