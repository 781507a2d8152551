//! Catalog and blacklist refresh endpoints.
//!
//! These run beside the purchase path and never block it: product upserts
//! take one product's lock briefly, blacklist replacement is a pointer swap.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use flashsale_core::Product;

use super::{ApiResponse, AppState};
use crate::state::BlacklistSets;

fn admin_response(status: StatusCode, message: String) -> Response {
    let body = ApiResponse::<()> {
        code: status.as_u16(),
        message,
        data: None,
    };
    (status, Json(body)).into_response()
}

/// `PUT /admin/products`
pub async fn upsert_product_handler(State(state): State<AppState>, Json(product): Json<Product>) -> Response {
    let product_id = product.product_id;
    match state.front.upsert_product(product) {
        Ok(()) => admin_response(StatusCode::OK, format!("product {product_id} saved")),
        Err(e) => admin_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// `PUT /admin/blacklist`
pub async fn replace_blacklist_handler(State(state): State<AppState>, Json(sets): Json<BlacklistSets>) -> Response {
    let message = format!(
        "blacklist replaced: {} users, {} ips",
        sets.user_ids.len(),
        sets.ips.len()
    );
    state.front.replace_blacklist(sets);
    admin_response(StatusCode::OK, message)
}
