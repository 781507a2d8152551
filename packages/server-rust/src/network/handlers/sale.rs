//! Purchase and product-info endpoints.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use flashsale_core::{Outcome, ProductId, UserId};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{outcome_response, AppState};

#[derive(Debug, Deserialize)]
pub struct SecKillBody {
    pub user_id: UserId,
    pub product_id: ProductId,
}

#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    pub product_id: ProductId,
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map_or_else(|| peer.ip().to_string(), str::to_string)
}

/// `POST /sec/kill`
///
/// If the client disconnects, hyper drops this future; the drop guard then
/// cancels the purchase call.
pub async fn sec_kill_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<SecKillBody>,
) -> Response {
    let _in_flight = state.shutdown.in_flight_guard();
    let ip = client_ip(&headers, peer);

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    match state
        .front
        .sec_kill(body.user_id, body.product_id, &ip, cancel)
        .await
    {
        Ok(fulfillment) => outcome_response(Outcome::Success, Some(fulfillment)),
        Err(e) => outcome_response::<()>(e.outcome(), None),
    }
}

/// `GET /sec/info?product_id=`
pub async fn sec_info_handler(State(state): State<AppState>, Query(query): Query<InfoQuery>) -> Response {
    match state.front.sec_info(query.product_id) {
        Ok(info) => outcome_response(Outcome::Success, Some(info)),
        Err(e) => outcome_response::<()>(e.outcome(), None),
    }
}

/// `GET /sec/list`
pub async fn sec_list_handler(State(state): State<AppState>) -> Response {
    outcome_response(Outcome::Success, Some(state.front.sec_info_list()))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use axum::http::{HeaderValue, StatusCode};
    use flashsale_core::{FixedDice, ManualClock, Product, ProductStatus};

    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::SaleConfig;
    use crate::front::AppTier;
    use crate::network::ShutdownController;
    use crate::state::SaleState;

    fn product(id: ProductId, start: i64) -> Product {
        Product {
            product_id: id,
            start_time: start,
            end_time: 5_000,
            status: ProductStatus::OnSale,
            total: 10,
            per_person_limit: 1,
            buy_rate: 1.0,
            secret: String::new(),
        }
    }

    /// Front tier without a back tier; purchases that pass the gate time out.
    pub(crate) fn test_state() -> (AppState, AppTier) {
        let sale = SaleState::new(Arc::new(ManualClock::at_secs(1_000)), Arc::new(FixedDice(0.0)));
        sale.catalog.upsert(product(1, 0)).unwrap();
        sale.catalog.upsert(product(2, 2_000)).unwrap();
        let config = SaleConfig {
            app_wait_result_timeout: Duration::from_millis(50),
            ..SaleConfig::default()
        };
        let tier = AppTier::start(&config, Arc::new(MemoryBroker::new()), sale);
        let state = AppState {
            front: tier.service(),
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        };
        (state, tier)
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 20], 40_000))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn client_ip_prefers_forwarded_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer()), "192.168.1.20");

        headers.insert("x-real-ip", HeaderValue::from_static("10.1.1.1"));
        assert_eq!(client_ip(&headers, peer()), "10.1.1.1");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, peer()), "203.0.113.7");
    }

    #[tokio::test]
    async fn sec_kill_reports_gate_outcome() {
        let (state, tier) = test_state();
        let response = sec_kill_handler(
            State(state.clone()),
            ConnectInfo(peer()),
            HeaderMap::new(),
            Json(SecKillBody {
                user_id: 1,
                product_id: 2,
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["code"], Outcome::NotStarted.code());
        assert!(json.get("data").is_none());
        assert_eq!(state.shutdown.in_flight_count(), 0);
        tier.stop().await;
    }

    #[tokio::test]
    async fn sec_kill_without_back_tier_times_out() {
        let (state, tier) = test_state();
        let response = sec_kill_handler(
            State(state),
            ConnectInfo(peer()),
            HeaderMap::new(),
            Json(SecKillBody {
                user_id: 1,
                product_id: 1,
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_json(response).await["code"], Outcome::ProcessTimeout.code());
        tier.stop().await;
    }

    #[tokio::test]
    async fn info_and_list() {
        let (state, tier) = test_state();

        let response = sec_info_handler(State(state.clone()), Query(InfoQuery { product_id: 1 })).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["product_id"], 1);
        assert_eq!(json["data"]["started"], true);

        let missing = sec_info_handler(State(state.clone()), Query(InfoQuery { product_id: 9 })).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let list = body_json(sec_list_handler(State(state)).await).await;
        assert_eq!(list["data"].as_array().unwrap().len(), 2);
        tier.stop().await;
    }
}
