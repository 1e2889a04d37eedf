/// HTTP Front-End
///
/// Path-based routing for the JSON-RPC ingress plus the Prometheus scrape
/// endpoint. Each inbound request is tagged with a fresh request id for log
/// correlation and timed end-to-end. Replies are always HTTP 200 except:
/// 405 for non-POST on the RPC path, 400 for malformed JSON, 503 while no
/// Ethereum backend is available.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audit::RequestMeta;
use crate::backend::BackendKind;
use crate::dispatcher::EthDispatcher;
use crate::metrics;
use crate::selector::BackendSelector;

#[derive(Clone)]
pub struct AppState {
    pub selector: Arc<BackendSelector>,
    pub dispatcher: Arc<EthDispatcher>,
}

pub fn build_router(state: AppState, eth_path: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(&format!("/{}", eth_path), post(handle_eth_request))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .with_state(state)
}

async fn handle_eth_request(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4();
    let span = info_span!("eth_request", request_id = %request_id);

    async move {
        let backend = match state.selector.backend_for(BackendKind::Ethereum) {
            Ok(backend) => backend,
            Err(e) => {
                warn!(err = %e, "rejecting request, no ethereum backend available");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        };

        let meta = RequestMeta {
            request_id,
            remote_addr: remote.to_string(),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
        };

        let reply = state.dispatcher.handle(&meta, &backend, &body).await;
        info!(
            backend = %backend.name,
            status = reply.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "completed eth proxy request"
        );

        let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            reply.body,
        )
            .into_response()
    }
    .instrument(span)
    .await
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}
