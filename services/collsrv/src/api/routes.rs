//! Control-plane router

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use datacoll_rtdb::Inventory;

use super::handlers;
use crate::gateway::CommandGateway;

/// Shared state injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub inventory: Inventory,
    pub gateway: CommandGateway,
}

/// Build the `/api/v1` router
pub fn build_router(inventory: Inventory, gateway: CommandGateway) -> Router {
    let state = AppState { inventory, gateway };
    Router::new()
        .route(
            "/api/v1/devices",
            get(handlers::list_devices).post(handlers::create_device),
        )
        .route(
            "/api/v1/devices/{device_id}",
            get(handlers::get_device)
                .put(handlers::update_device)
                .delete(handlers::delete_device),
        )
        .route(
            "/api/v1/terms",
            get(handlers::list_terms).post(handlers::create_term),
        )
        .route(
            "/api/v1/terms/{term_id}",
            get(handlers::get_term)
                .put(handlers::update_term)
                .delete(handlers::delete_term),
        )
        .route(
            "/api/v1/items",
            get(handlers::list_items).post(handlers::create_item),
        )
        .route(
            "/api/v1/items/{item_id}",
            get(handlers::get_item)
                .put(handlers::update_item)
                .delete(handlers::delete_item),
        )
        .route("/api/v1/term_items", post(handlers::create_binding))
        .route(
            "/api/v1/term_items/{term_id}/{item_id}",
            get(handlers::get_binding).delete(handlers::delete_binding),
        )
        .route(
            "/api/v1/datas/{device_id}/{term_id}/{item_id}",
            get(handlers::latest_data),
        )
        .route("/api/v1/device_call", post(handlers::device_call))
        .route("/api/v1/device_ctrl", post(handlers::device_ctrl))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
