use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::manager::ModelManager;
use crate::server::AppState;

#[derive(Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(rename = "type")]
    pub type_code: Option<String>,
}

#[derive(Deserialize)]
pub struct TypeFilter {
    #[serde(rename = "type")]
    pub type_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult = Result<Json<Value>, ApiError>;

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (status, Json(ErrorResponse { error: error.to_string() }))
}

fn internal(error: impl ToString) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, error)
}

/// Run a blocking manager call off the async runtime
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&ModelManager) -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let manager = Arc::clone(&state.manager);
    tokio::task::spawn_blocking(move || f(&manager))
        .await
        .map_err(internal)?
        .map_err(|e| {
            if e.is_resolution() {
                api_error(StatusCode::BAD_REQUEST, e)
            } else {
                internal(e)
            }
        })
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> ApiResult {
    let stats = blocking(&state, |m| m.get_statistics()).await?;
    Ok(Json(serde_json::to_value(&stats).map_err(internal)?))
}

pub async fn get_types(State(state): State<Arc<AppState>>) -> ApiResult {
    let (node_types, relationship_types) = blocking(&state, |m| {
        Ok((m.get_all_node_types()?, m.get_all_relationship_types()?))
    })
    .await?;
    Ok(Json(json!({
        "node_types": node_types,
        "relationship_types": relationship_types,
    })))
}

pub async fn get_node(State(state): State<Arc<AppState>>, Path(uuid): Path<Uuid>) -> ApiResult {
    let node = blocking(&state, move |m| m.synchronizer().get_node_by_uuid(&uuid)).await?;
    match node {
        Some(node) => Ok(Json(serde_json::to_value(&node).map_err(internal)?)),
        None => Err(api_error(StatusCode::NOT_FOUND, format!("no node {uuid}"))),
    }
}

pub async fn search(State(state): State<Arc<AppState>>, Query(params): Query<SearchParams>) -> ApiResult {
    let results = blocking(&state, move |m| {
        let found = m.search(&params.query, params.type_code.as_deref())?;
        Ok(found.iter().map(|e| e.object().to_json()).collect::<Vec<_>>())
    })
    .await?;
    Ok(Json(json!({ "count": results.len(), "results": results })))
}

pub async fn get_relationships(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
    Query(filter): Query<TypeFilter>,
) -> ApiResult {
    let relationships = blocking(&state, move |m| {
        m.synchronizer()
            .get_relationships_by_uuid(&uuid, filter.type_code.as_deref())
    })
    .await?;
    Ok(Json(serde_json::to_value(&relationships).map_err(internal)?))
}
