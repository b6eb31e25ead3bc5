// Copyright 2026 Portal Contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP API for the portal runtime.
//!
//! - `POST /api/scrape`: run one scrape request
//! - `GET /health`: liveness and browser slot usage

use crate::error::ScrapeError;
use crate::orchestrator::{self, AppContext};
use crate::protocol::{ScrapeRequest, ScrapeResponse};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Build the axum Router with all endpoints.
pub fn router(state: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/scrape", post(handle_scrape))
        .layer(cors)
        .with_state(state)
}

/// Serve on `0.0.0.0:port` until Ctrl-C.
pub async fn start(port: u16, state: Arc<AppContext>) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("portal API listening on http://{addr}");
    serve(listener, state).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<AppContext>) -> anyhow::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

fn unprocessable(detail: String) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(serde_json::json!({ "detail": detail })),
    )
        .into_response()
}

// ── Handlers ────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppContext>>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_contexts": state.renderer.active_contexts(),
        "available_sessions": state.available_sessions(),
    }))
}

async fn handle_scrape(
    State(state): State<Arc<AppContext>>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return unprocessable(rejection.body_text()),
    };
    tracing::info!(task = ?request.task, "scrape request");

    // Detached from the connection: a client that hangs up must not cancel
    // the flow before it has closed its browser.
    let flow = tokio::spawn(async move { respond(&state, &request).await });
    match flow.await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "scrape task did not complete");
            Json(ScrapeResponse::error("internal error: scrape task aborted")).into_response()
        }
    }
}

async fn respond(state: &AppContext, request: &ScrapeRequest) -> Response {
    match orchestrator::execute(state, request).await {
        Ok(response) => Json(response).into_response(),
        Err(e @ ScrapeError::ClientInput) => unprocessable(e.to_string()),
        Err(e) => {
            let message = crate::error::redact(&e.to_string(), &request.password);
            Json(ScrapeResponse::error(message)).into_response()
        }
    }
}
