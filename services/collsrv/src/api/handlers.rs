//! Control-plane request handlers
//!
//! Thin wrappers over the typed inventory and the command gateway; the
//! interesting semantics (cascades, event publication, reply correlation)
//! live below this layer.

use axum::extract::{Path, Query, State};
use axum::Json;

use datacoll_rtdb::model::{Device, Item, PointBinding, PointRequest, SampleEvent, Term};

use super::dto::{AppError, DataQuery, OkResponse};
use super::routes::AppState;
use crate::gateway::RequestKind;

type HandlerResult<T> = Result<Json<T>, AppError>;

// ========== Devices ==========

pub async fn list_devices(State(state): State<AppState>) -> HandlerResult<Vec<Device>> {
    Ok(Json(state.inventory.list_devices().await?))
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> HandlerResult<Device> {
    state
        .inventory
        .get_device(&device_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("device {device_id} not found")))
}

pub async fn create_device(
    State(state): State<AppState>,
    Json(device): Json<Device>,
) -> HandlerResult<OkResponse> {
    state.inventory.create_device(&device).await?;
    Ok(OkResponse::json())
}

pub async fn update_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(device): Json<Device>,
) -> HandlerResult<OkResponse> {
    state.inventory.update_device(&device_id, &device).await?;
    Ok(OkResponse::json())
}

pub async fn delete_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> HandlerResult<OkResponse> {
    state.inventory.delete_device(&device_id).await?;
    Ok(OkResponse::json())
}

// ========== Terminals ==========

pub async fn list_terms(State(state): State<AppState>) -> HandlerResult<Vec<Term>> {
    Ok(Json(state.inventory.list_terms().await?))
}

pub async fn get_term(
    State(state): State<AppState>,
    Path(term_id): Path<String>,
) -> HandlerResult<Term> {
    state
        .inventory
        .get_term(&term_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("term {term_id} not found")))
}

pub async fn create_term(
    State(state): State<AppState>,
    Json(term): Json<Term>,
) -> HandlerResult<OkResponse> {
    state.inventory.create_term(&term).await?;
    Ok(OkResponse::json())
}

pub async fn update_term(
    State(state): State<AppState>,
    Path(term_id): Path<String>,
    Json(term): Json<Term>,
) -> HandlerResult<OkResponse> {
    state.inventory.update_term(&term_id, &term).await?;
    Ok(OkResponse::json())
}

pub async fn delete_term(
    State(state): State<AppState>,
    Path(term_id): Path<String>,
) -> HandlerResult<OkResponse> {
    state.inventory.delete_term(&term_id).await?;
    Ok(OkResponse::json())
}

// ========== Items ==========

pub async fn list_items(State(state): State<AppState>) -> HandlerResult<Vec<Item>> {
    Ok(Json(state.inventory.list_items().await?))
}

pub async fn get_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> HandlerResult<Item> {
    state
        .inventory
        .get_item(&item_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("item {item_id} not found")))
}

pub async fn create_item(
    State(state): State<AppState>,
    Json(item): Json<Item>,
) -> HandlerResult<OkResponse> {
    state.inventory.create_item(&item).await?;
    Ok(OkResponse::json())
}

pub async fn update_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Json(item): Json<Item>,
) -> HandlerResult<OkResponse> {
    state.inventory.update_item(&item_id, &item).await?;
    Ok(OkResponse::json())
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> HandlerResult<OkResponse> {
    state.inventory.delete_item(&item_id).await?;
    Ok(OkResponse::json())
}

// ========== Bindings ==========

pub async fn get_binding(
    State(state): State<AppState>,
    Path((term_id, item_id)): Path<(String, String)>,
) -> HandlerResult<PointBinding> {
    state
        .inventory
        .get_binding(&term_id, &item_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("term_item {term_id}:{item_id} not found")))
}

pub async fn create_binding(
    State(state): State<AppState>,
    Json(binding): Json<PointBinding>,
) -> HandlerResult<OkResponse> {
    state.inventory.create_binding(&binding).await?;
    Ok(OkResponse::json())
}

pub async fn delete_binding(
    State(state): State<AppState>,
    Path((term_id, item_id)): Path<(String, String)>,
) -> HandlerResult<OkResponse> {
    state.inventory.delete_binding(&term_id, &item_id).await?;
    Ok(OkResponse::json())
}

// ========== Samples ==========

pub async fn latest_data(
    State(state): State<AppState>,
    Path((device_id, term_id, item_id)): Path<(String, String, String)>,
    Query(query): Query<DataQuery>,
) -> HandlerResult<Vec<SampleEvent>> {
    if state.inventory.get_device(&device_id).await?.is_none() {
        return Err(AppError::not_found(format!("device {device_id} not found")));
    }
    Ok(Json(
        state
            .inventory
            .latest_samples(&device_id, &term_id, &item_id, query.limit)
            .await?,
    ))
}

// ========== Interactive requests ==========

pub async fn device_call(
    State(state): State<AppState>,
    Json(request): Json<PointRequest>,
) -> HandlerResult<SampleEvent> {
    let reply = state.gateway.execute(RequestKind::Call, &request).await?;
    Ok(Json(reply))
}

pub async fn device_ctrl(
    State(state): State<AppState>,
    Json(request): Json<PointRequest>,
) -> HandlerResult<SampleEvent> {
    let reply = state.gateway.execute(RequestKind::Ctrl, &request).await?;
    Ok(Json(reply))
}
