//! HTTP routes for the approval UI and foreground wallet
//!
//! | Route | Runtime message |
//! |-------|-----------------|
//! | `POST /runtime` | any except `DAPP_REQUEST` |
//! | `GET /approvals` | `GET_PENDING_APPROVALS` |
//! | `PUT /approvals/:id` | `RESOLVE_APPROVAL` |
//! | `DELETE /approvals/:id` | `APPROVAL_CLOSED` |

use axum::{extract::{Path, State}, http::StatusCode, response::IntoResponse, routing::{get, post}, Json, Router};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authority::Authority;
use crate::protocol::{Decision, RuntimeMessage, RuntimeReply};
use crate::runtime::Shutdown;

#[derive(Clone)]
pub struct AppState { pub authority: Authority, pub app_name: String }

impl AppState {
    pub fn new(authority: Authority, app_name: impl Into<String>) -> Self {
        Self { authority, app_name: app_name.into() }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionBody {
    decision: Decision,
    #[serde(default)]
    session_key: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

type RouteResult = Result<Json<Value>, (StatusCode, String)>;

pub fn create_router(authority: Authority) -> Router { create_router_with_name(authority, "octra-broker") }

pub fn create_router_with_name(authority: Authority, app_name: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/runtime", post(runtime_message))
        .route("/approvals", get(list_approvals))
        .route("/approvals/:id", get(get_approval).put(resolve_approval).delete(close_approval))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(authority, app_name))
}

/// Bind and serve until `shutdown` fires.
pub async fn serve(router: Router, addr: SocketAddr, shutdown: Shutdown) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "runtime channel listening");
    let mut stop = shutdown.subscribe();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { stop.wait().await })
        .await?;
    Ok(())
}

fn reply_json(reply: RuntimeReply) -> RouteResult {
    serde_json::to_value(reply)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn health(State(s): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": s.app_name,
        "unlocked": s.authority.is_unlocked(),
        "pending": s.authority.approvals().len(),
    }))
}

async fn runtime_message(State(s): State<AppState>, Json(body): Json<Value>) -> RouteResult {
    let message = RuntimeMessage::decode(&body).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    // dApp requests only arrive through a relay, which is what vouches for the origin.
    if matches!(message, RuntimeMessage::DappRequest(_)) {
        return Err((StatusCode::FORBIDDEN, "dApp requests must come through a relay".into()));
    }
    reply_json(s.authority.handle(message).await)
}

async fn list_approvals(State(s): State<AppState>) -> RouteResult {
    reply_json(s.authority.handle(RuntimeMessage::GetPendingApprovals).await)
}

async fn get_approval(State(s): State<AppState>, Path(id): Path<String>) -> RouteResult {
    match s.authority.approvals().get(&id) {
        Ok(Some(summary)) => serde_json::to_value(summary)
            .map(Json)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("no pending approval: {}", id))),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn resolve_approval(State(s): State<AppState>, Path(id): Path<String>, Json(body): Json<DecisionBody>) -> RouteResult {
    let message = RuntimeMessage::ResolveApproval {
        id,
        decision: body.decision,
        session_key: body.session_key,
        result: body.result,
    };
    reply_json(s.authority.handle(message).await)
}

async fn close_approval(State(s): State<AppState>, Path(id): Path<String>) -> RouteResult {
    reply_json(s.authority.handle(RuntimeMessage::ApprovalClosed { id }).await)
}
