//! HTTP handlers and the state they share.

pub mod admin;
pub mod health;
pub mod sale;

pub use admin::{replace_blacklist_handler, upsert_product_handler};
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use sale::{sec_info_handler, sec_kill_handler, sec_list_handler};

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use flashsale_core::Outcome;
use serde::Serialize;

use super::ShutdownController;
use crate::front::FrontService;

/// State carried through axum extractors. Cloning copies `Arc`s only.
#[derive(Clone)]
pub struct AppState {
    pub front: Arc<FrontService>,
    pub shutdown: Arc<ShutdownController>,
    pub start_time: Instant,
}

/// Body of every sale and admin response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// HTTP status for an outcome; the body always carries the exact code.
#[must_use]
pub fn status_for(outcome: Outcome) -> StatusCode {
    match outcome {
        Outcome::Success => StatusCode::OK,
        Outcome::NotFound => StatusCode::NOT_FOUND,
        Outcome::Blacklisted => StatusCode::FORBIDDEN,
        Outcome::RateLimited | Outcome::Retry => StatusCode::TOO_MANY_REQUESTS,
        Outcome::ServiceBusy => StatusCode::SERVICE_UNAVAILABLE,
        Outcome::ProcessTimeout | Outcome::Expired => StatusCode::GATEWAY_TIMEOUT,
        Outcome::ClientClosed => StatusCode::REQUEST_TIMEOUT,
        Outcome::SoldOut
        | Outcome::AlreadyBought
        | Outcome::NotStarted
        | Outcome::Ended
        | Outcome::DuplicateInFlight => StatusCode::CONFLICT,
    }
}

/// Builds the response for `outcome`, attaching `data` if present.
pub fn outcome_response<T: Serialize>(outcome: Outcome, data: Option<T>) -> Response {
    let body = ApiResponse {
        code: outcome.code(),
        message: outcome.message().to_string(),
        data,
    };
    (status_for(outcome), Json(body)).into_response()
}
