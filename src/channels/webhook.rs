//! HTTP surface: Telegram webhook, detection callbacks and liveness.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::channels::telegram::{TelegramChannel, Update};
use crate::config::{CALLBACK_TOKEN_PARAM, DETECTION_CALLBACK_PATH, WEBHOOK_PATH};
use crate::detection::DetectionCallback;
use crate::dispatch::{Dispatcher, Outcome};

/// Header Telegram echoes the webhook secret in.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    pub dispatcher: Arc<Dispatcher>,
    pub telegram: Arc<TelegramChannel>,
    pub secret: Arc<str>,
}

impl WebhookState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        telegram: Arc<TelegramChannel>,
        secret: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            dispatcher,
            telegram,
            secret: secret.into(),
        }
    }

    fn secret_matches(&self, candidate: Option<&str>) -> bool {
        candidate.is_some_and(|c| c == &*self.secret)
    }
}

fn header_secret(headers: &HeaderMap) -> Option<&str> {
    headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok())
}

/// Build the router.
pub fn webhook_routes(state: WebhookState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route(WEBHOOK_PATH, post(telegram_update))
        .route(DETECTION_CALLBACK_PATH, post(detection_callback))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn index() -> &'static str {
    "Ok"
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Accept an update and dispatch it on its own task.
async fn telegram_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if !state.secret_matches(header_secret(&headers)) {
        tracing::warn!("Webhook request with missing or wrong secret token");
        return (StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!("Webhook body is not a Telegram update: {e}");
            return (StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    if let Some(event) = state.telegram.parse_update(update) {
        let dispatcher = Arc::clone(&state.dispatcher);
        tokio::spawn(async move {
            let outcome = dispatcher.handle(event).await;
            tracing::debug!(?outcome, "Webhook event handled");
        });
    }

    (StatusCode::OK, "Ok")
}

/// Result pushed by an asynchronous detection service.
///
/// The shared secret arrives either as the `token` query parameter of the
/// callback URL handed to the service or in [`SECRET_HEADER`].
async fn detection_callback(
    State(state): State<WebhookState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(callback): Json<DetectionCallback>,
) -> impl IntoResponse {
    let token = params
        .get(CALLBACK_TOKEN_PARAM)
        .map(String::as_str)
        .or_else(|| header_secret(&headers));
    if !state.secret_matches(token) {
        tracing::warn!("Detection callback with missing or wrong token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized" })),
        );
    }

    let (chat_id, result) = callback.into_result();
    tracing::info!(chat_id = %chat_id, labels = result.labels.len(), "Detection callback received");

    match state.dispatcher.deliver_detection(&chat_id, result).await {
        Outcome::Failed { reason } => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": reason })),
        ),
        _ => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "delivered" })),
        ),
    }
}
