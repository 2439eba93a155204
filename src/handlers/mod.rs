use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::models::{
    ActiveMode, SubmitVoteBody, SubmitVoteResponse, TeamMode, VoteError, VoteStateView, VoteStats,
};
use crate::voting::{AccessGate, VoteEngine};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Shared handles given to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<VoteEngine>,
    pub gate: Arc<AccessGate>,
    pub proxy_ip_header: Option<String>,
    pub admin_token: Option<String>,
}

impl AppState {
    /// The voter's IP: taken from the proxy header when one is configured,
    /// otherwise from the peer address.
    fn voter_identity(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
        match &self.proxy_ip_header {
            Some(header) => headers
                .get(header.as_str())
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            None => peer.map(|addr| addr.ip().to_string()),
        }
    }

    fn is_admin(&self, headers: &HeaderMap) -> bool {
        match (&self.admin_token, headers.get(ADMIN_TOKEN_HEADER)) {
            (Some(expected), Some(given)) => given.as_bytes() == expected.as_bytes(),
            _ => false,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/api/vote/state", get(vote_state))
        .route("/api/vote/submit", post(submit_vote))
        .route("/api/vote/stats", get(vote_stats))
        .route("/api/vote/active", get(active_modes));

    if state.admin_token.is_some() {
        router = router
            .route("/api/round/new", post(new_round))
            .route("/api/round/rotate", post(rotate_round))
            .route("/api/round/close", post(close_voting))
            .route("/api/round/open", post(open_voting));
    }

    router.with_state(state)
}

async fn vote_state(
    State(app): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Json<VoteStateView> {
    match app.voter_identity(&headers, peer.map(|ConnectInfo(addr)| addr)) {
        Some(voter) => Json(app.engine.get_state(&voter).await),
        None => Json(VoteStateView::unresolved()),
    }
}

async fn submit_vote(
    State(app): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<SubmitVoteBody>,
) -> (StatusCode, Json<SubmitVoteResponse>) {
    let Some(voter) = app.voter_identity(&headers, peer.map(|ConnectInfo(addr)| addr)) else {
        return (
            StatusCode::OK,
            Json(SubmitVoteResponse::rejected(VoteError::InvalidIp)),
        );
    };

    if app.gate.is_rate_limited(&voter).await {
        warn!("Rate limited vote submission from {}", voter);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(SubmitVoteResponse::rejected(VoteError::AlreadyVoted)),
        );
    }

    // Out-of-range team modes come back as invalid_option, not a decode error
    let result = app.engine.submit_body(&voter, &body).await;
    (StatusCode::OK, Json(result.into()))
}

async fn vote_stats(State(app): State<AppState>) -> Json<VoteStats> {
    Json(app.engine.stats().await)
}

async fn active_modes(State(app): State<AppState>) -> Json<BTreeMap<TeamMode, ActiveMode>> {
    Json(app.engine.active_modes().await)
}

async fn new_round(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ActiveMode>,
) -> StatusCode {
    if !app.is_admin(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    info!("New round started on {} ({})", body.map_name, body.team_mode);
    app.engine.on_new_round(&body.map_name, body.team_mode).await;
    StatusCode::NO_CONTENT
}

async fn rotate_round(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ActiveMode>, StatusCode> {
    if !app.is_admin(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let next = app.engine.rotate().await;
    info!("Manual rotation to {} ({})", next.map_name, next.team_mode);
    app.gate.prune_idle(Instant::now()).await;
    Ok(Json(next))
}

async fn close_voting(State(app): State<AppState>, headers: HeaderMap) -> StatusCode {
    if !app.is_admin(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    app.engine.close_voting().await;
    info!("Voting closed by admin");
    StatusCode::NO_CONTENT
}

async fn open_voting(State(app): State<AppState>, headers: HeaderMap) -> StatusCode {
    if !app.is_admin(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    app.engine.open_voting().await;
    info!("Voting opened by admin");
    StatusCode::NO_CONTENT
}
