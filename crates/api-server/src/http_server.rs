//! HTTP API Server
//!
//! Axum router over the leaderboard endpoints. CORS is open so
//! browser clients can talk to the service directly; identity is
//! consumed from headers placed by the auth layer in front.

use crate::handlers::{
    handle_get_leaderboard, handle_get_me, handle_initialize_action, handle_submit_score,
    identity_from_headers, ApiContext, InitializeActionRequest, LeaderboardQuery,
    SubmitScoreRequest,
};
use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, Method},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};

/// HTTP API server
pub struct HttpApiServer {
    context: Arc<ApiContext>,
}

impl HttpApiServer {
    pub fn new(context: Arc<ApiContext>) -> Self {
        Self { context }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        // CORS layer to allow browser clients
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/actions/initialize", post(initialize_action))
            .route("/scores/submit", post(submit_score))
            .route("/scores/leaderboard", get(leaderboard))
            .route("/scores/me", get(me))
            .route("/health", get(health))
            .layer(cors)
            .with_state(self.context)
    }

    /// Run the server
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP API server listening on {}", addr);

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}

async fn initialize_action(
    State(context): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Json(request): Json<InitializeActionRequest>,
) -> impl IntoResponse {
    let identity = match identity_from_headers(&headers) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    match handle_initialize_action(&context, &identity, request) {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn submit_score(
    State(context): State<Arc<ApiContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<SubmitScoreRequest>,
) -> impl IntoResponse {
    let identity = match identity_from_headers(&headers) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    let source_addr = peer.ip().to_string();
    match handle_submit_score(&context, &identity, &source_addr, request) {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn leaderboard(
    State(context): State<Arc<ApiContext>>,
    Query(query): Query<LeaderboardQuery>,
) -> impl IntoResponse {
    Json(handle_get_leaderboard(&context, query))
}

async fn me(State(context): State<Arc<ApiContext>>, headers: HeaderMap) -> impl IntoResponse {
    match identity_from_headers(&headers) {
        Ok(identity) => Json(handle_get_me(&context, &identity)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health() -> &'static str {
    "ok"
}
