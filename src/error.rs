//! Error handling.

use axum::{
    extract::rejection::QueryRejection,
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tracing::{event, Level};

/// Statistics dashboard backend error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum StatboardError {
    /// Upstream API answered with a non-success status
    #[error("error fetching dataset {dataset} from the statistics API (status {status})")]
    RemoteFetch {
        dataset: String,
        status: StatusCode,
    },

    /// Network failure or timeout reaching the upstream API
    #[error("error reaching the statistics API")]
    RemoteRequest(#[from] reqwest::Error),

    /// Response does not match the positional-index dissemination format
    #[error("malformed dataset response: {reason}")]
    MalformedDataset { reason: String },

    /// A reshape operator was asked for a key its input does not carry
    #[error("cannot reshape table: {reason}")]
    Reshape { reason: String },

    /// Error persisting the response cache to disk
    #[error("failed to persist response cache")]
    CachePersist(#[from] std::io::Error),

    /// Error deserialising query parameters
    #[error("query parameters are not valid")]
    QueryRejection(#[from] QueryRejection),

    /// Error validating query parameters (single error)
    #[error("query parameters are not valid")]
    QueryValidationSingle(#[from] validator::ValidationError),

    /// Error validating query parameters (multiple errors)
    #[error("query parameters are not valid")]
    QueryValidation(#[from] validator::ValidationErrors),
}

impl StatboardError {
    /// Shorthand for a [StatboardError::MalformedDataset].
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedDataset {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [StatboardError::Reshape].
    pub fn reshape(reason: impl Into<String>) -> Self {
        Self::Reshape {
            reason: reason.into(),
        }
    }
}

impl IntoResponse for StatboardError {
    /// Convert from a `StatboardError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorBody {
    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorBody { message, caused_by }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl ErrorResponse {
    /// Return a new ErrorResponse
    ///
    /// # Arguments
    ///
    /// * `status`: HTTP status of the response
    /// * `error`: The error that occurred. This will be formatted into a suitable `ErrorBody`
    fn new<E>(status: StatusCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        ErrorResponse {
            status,
            error: ErrorBody::new(error),
        }
    }

    /// Return a 400 bad request ErrorResponse
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Return a 422 unprocessable entity ErrorResponse
    fn unprocessable<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, error)
    }

    /// Return a 500 internal server error ErrorResponse
    fn internal_server_error<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// Return a 502 bad gateway ErrorResponse
    fn bad_gateway<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_GATEWAY, error)
    }
}

impl From<StatboardError> for ErrorResponse {
    /// Convert from a `StatboardError` into an `ErrorResponse`.
    fn from(error: StatboardError) -> Self {
        let response = match &error {
            // Bad request
            StatboardError::QueryRejection(_)
            | StatboardError::QueryValidationSingle(_)
            | StatboardError::QueryValidation(_) => Self::bad_request(&error),

            // Tailor the response based on the upstream status: a 4xx means
            // the caller named a dataset or filter the source does not have,
            // anything else is the upstream's problem.
            StatboardError::RemoteFetch { dataset: _, status } => {
                if status.is_client_error() {
                    Self::bad_request(&error)
                } else {
                    Self::bad_gateway(&error)
                }
            }

            // Bad gateway: the upstream answered with something unusable.
            StatboardError::RemoteRequest(_) | StatboardError::MalformedDataset { reason: _ } => {
                Self::bad_gateway(&error)
            }

            // Unprocessable: the table cannot be reshaped as requested.
            StatboardError::Reshape { reason: _ } => Self::unprocessable(&error),

            // Internal server error
            StatboardError::CachePersist(_) => Self::internal_server_error(&error),
        };

        // Log server errors.
        if response.status.is_server_error() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hyper::HeaderMap;

    // Jump through the hoops to get the body as a string.
    async fn body_string(response: Response) -> String {
        String::from_utf8(
            hyper::body::to_bytes(response.into_body())
                .await
                .unwrap()
                .to_vec(),
        )
        .unwrap()
    }

    async fn test_statboard_error(
        error: StatboardError,
        status: StatusCode,
        message: &str,
        caused_by: Option<Vec<&'static str>>,
    ) {
        let response = error.into_response();
        assert_eq!(status, response.status());
        let mut headers = HeaderMap::new();
        headers.insert(&header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert_eq!(headers, *response.headers());
        let error_response: ErrorResponse =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(message.to_string(), error_response.error.message);
        // Map Vec items from str to String
        let caused_by = caused_by.map(|cb| cb.iter().map(|s| s.to_string()).collect());
        assert_eq!(caused_by, error_response.error.caused_by);
    }

    #[tokio::test]
    async fn remote_fetch_upstream_failure() {
        let error = StatboardError::RemoteFetch {
            dataset: "crim_off_cat".to_string(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        };
        let message =
            "error fetching dataset crim_off_cat from the statistics API (status 503 Service Unavailable)";
        test_statboard_error(error, StatusCode::BAD_GATEWAY, message, None).await;
    }

    #[tokio::test]
    async fn remote_fetch_unknown_dataset() {
        let error = StatboardError::RemoteFetch {
            dataset: "no_such_code".to_string(),
            status: StatusCode::NOT_FOUND,
        };
        let message =
            "error fetching dataset no_such_code from the statistics API (status 404 Not Found)";
        test_statboard_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn malformed_dataset() {
        let error = StatboardError::malformed("missing 'dimension' mapping");
        let message = "malformed dataset response: missing 'dimension' mapping";
        test_statboard_error(error, StatusCode::BAD_GATEWAY, message, None).await;
    }

    #[tokio::test]
    async fn reshape_error() {
        let error = StatboardError::reshape("column 'iccs' is not present in the table");
        let message = "cannot reshape table: column 'iccs' is not present in the table";
        test_statboard_error(error, StatusCode::UNPROCESSABLE_ENTITY, message, None).await;
    }

    #[tokio::test]
    async fn cache_persist_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let error = StatboardError::CachePersist(io_error);
        let message = "failed to persist response cache";
        let caused_by = Some(vec!["read-only"]);
        test_statboard_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, caused_by).await;
    }

    #[tokio::test]
    async fn query_validation_single() {
        let validation_error = validator::ValidationError::new("foo");
        let error = StatboardError::QueryValidationSingle(validation_error);
        let message = "query parameters are not valid";
        let caused_by = Some(vec!["Validation error: foo [{}]"]);
        test_statboard_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn query_validation() {
        let mut validation_errors = validator::ValidationErrors::new();
        let validation_error = validator::ValidationError::new("foo");
        validation_errors.add("bar", validation_error);
        let error = StatboardError::QueryValidation(validation_errors);
        let message = "query parameters are not valid";
        let caused_by = Some(vec!["bar: Validation error: foo [{}]"]);
        test_statboard_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }
}
