use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use contracts::{
    ApiError, ConnectionId, EntityId, EntityStatus, ErrorCode, SessionStatus, StanceConfig,
    SCHEMA_VERSION_V1,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;

use crate::{BodyBlueprint, DeliveryPolicy, SessionApi, ToggleDispatch};

const MAX_STEP_TICKS: u64 = 36_000;

include!("error.rs");
include!("state.rs");
include!("routes/control.rs");
include!("routes/inspect.rs");
include!("util.rs");

pub async fn serve(addr: SocketAddr, config: StanceConfig) -> Result<(), ServerError> {
    let state = AppState::new(config);
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "inspection server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/session",
            post(create_session).get(get_status).delete(close_session),
        )
        .route("/api/v1/session/step", post(step_session))
        .route("/api/v1/session/policy", post(set_policy))
        .route("/api/v1/session/observers", post(add_observer))
        .route("/api/v1/session/bodies", post(spawn_body))
        .route("/api/v1/session/bodies/{entity_id}", axum::routing::delete(despawn_body))
        .route(
            "/api/v1/session/participants/{connection_id}/entities",
            get(list_entities),
        )
        .route(
            "/api/v1/session/participants/{connection_id}/entities/{entity_id}",
            get(get_entity),
        )
        .route(
            "/api/v1/session/participants/{connection_id}/entities/{entity_id}/toggle",
            post(toggle_entity),
        )
        .route(
            "/api/v1/session/participants/{connection_id}/entities/{entity_id}/stun",
            post(stun_entity),
        )
        .route(
            "/api/v1/session/participants/{connection_id}/entities/{entity_id}/dump",
            get(get_dump),
        )
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests;
