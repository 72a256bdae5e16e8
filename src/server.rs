//! Thin HTTP surface over the engine and the datastore.
//!
//! The engine is synchronous, so requests run on the blocking pool. Query
//! and permission defects map to 400-class responses; only storage faults
//! become 500s.

use axum::http::StatusCode;
use axum::{routing::post, Json, Router};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::bfql::Engine;
use crate::catalog::TagPath;
use crate::datatype::{TypedValue, ValueType};
use crate::error::BfdError;
use crate::store::Datastore;

#[derive(Deserialize)]
pub struct QueryRequest {
    pub user: String,
    pub query: String,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub status: String,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct AnnotateRequest {
    pub user: String,
    pub object_id: String,
    /// Canonical `namespace/name` rendering of the tag.
    pub tag: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub value: serde_json::Value,
    #[serde(default)]
    pub mime: Option<String>,
}

#[derive(Serialize)]
pub struct AnnotateResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn error_status(error: &BfdError) -> StatusCode {
    match error {
        BfdError::Storage(_) | BfdError::Lock(_) => StatusCode::INTERNAL_SERVER_ERROR,
        BfdError::Forbidden(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::BAD_REQUEST,
    }
}

pub fn router(datastore: Arc<Datastore>, default_offset: FixedOffset) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::POST])
        .allow_headers(Any);
    let query_store = Arc::clone(&datastore);
    Router::new()
        .route(
            "/v1/query",
            post(move |Json(request): Json<QueryRequest>| {
                let store = Arc::clone(&query_store);
                async move {
                    let started = std::time::Instant::now();
                    let outcome = tokio::task::spawn_blocking(move || {
                        let engine = Engine::new(&store, default_offset);
                        engine.evaluate(&request.user, &request.query)
                    })
                    .await
                    .map_err(|e| {
                        warn!(error = %e, "join error");
                        (StatusCode::INTERNAL_SERVER_ERROR, "join error")
                    })?;
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                    match outcome {
                        Ok(ids) => {
                            let mut object_ids: Vec<String> = ids.into_iter().collect();
                            object_ids.sort();
                            info!(ms = elapsed_ms, objects = object_ids.len(), "query complete");
                            Ok::<_, (StatusCode, &'static str)>((
                                StatusCode::OK,
                                Json(QueryResponse {
                                    status: "ok".to_string(),
                                    elapsed_ms,
                                    object_ids: Some(object_ids),
                                    error: None,
                                }),
                            ))
                        }
                        Err(error) => {
                            let status = error_status(&error);
                            warn!(%error, code = %status.as_u16(), "query error");
                            Ok((
                                status,
                                Json(QueryResponse {
                                    status: "error".to_string(),
                                    elapsed_ms,
                                    object_ids: None,
                                    error: Some(error.to_string()),
                                }),
                            ))
                        }
                    }
                }
            }),
        )
        .route(
            "/v1/annotate",
            post(move |Json(request): Json<AnnotateRequest>| {
                let store = Arc::clone(&datastore);
                async move {
                    let outcome = tokio::task::spawn_blocking(move || {
                        let path = TagPath::parse(&request.tag)?;
                        let value = TypedValue::from_json(
                            request.value_type,
                            &request.value,
                            request.mime.as_deref(),
                        )?;
                        store.annotate(&request.user, &request.object_id, &path, value)
                    })
                    .await
                    .map_err(|e| {
                        warn!(error = %e, "join error");
                        (StatusCode::INTERNAL_SERVER_ERROR, "join error")
                    })?;
                    match outcome {
                        Ok(()) => Ok::<_, (StatusCode, &'static str)>((
                            StatusCode::OK,
                            Json(AnnotateResponse {
                                status: "ok".to_string(),
                                error: None,
                            }),
                        )),
                        Err(error) => {
                            let status = error_status(&error);
                            warn!(%error, code = %status.as_u16(), "annotate error");
                            Ok((
                                status,
                                Json(AnnotateResponse {
                                    status: "error".to_string(),
                                    error: Some(error.to_string()),
                                }),
                            ))
                        }
                    }
                }
            }),
        )
        .layer(cors)
}
