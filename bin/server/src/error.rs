//! Maps [`EngineError`] (and the auth layer's own failures) onto HTTP status
//! codes without string-matching, per the engine's closed error taxonomy.

use adgraph_engine::{EngineError, GraphError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Errors the HTTP layer can produce, on top of what the engine raises.
#[derive(Debug)]
pub enum ApiError {
    /// Missing, malformed, or expired bearer token.
    Unauthorized,
    /// The engine raised during dispatch.
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            Self::Engine(EngineError::NotFound { what }) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            Self::Engine(EngineError::InvalidGraph(GraphError::NoOutputNode)) => {
                (StatusCode::BAD_REQUEST, "workflow has no OUTPUT node".to_string())
            }
            Self::Engine(EngineError::InvalidGraph(GraphError::CycleDetected)) => {
                (StatusCode::BAD_REQUEST, "workflow graph contains a cycle".to_string())
            }
            Self::Engine(err @ EngineError::UnknownNodeType { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            Self::Engine(err @ EngineError::Executor(_)) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Self::Engine(err @ EngineError::Repository(_)) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let response = ApiError::Engine(EngineError::NotFound { what: "execution" }).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn no_output_node_maps_to_400() {
        let response = ApiError::Engine(EngineError::InvalidGraph(GraphError::NoOutputNode)).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
