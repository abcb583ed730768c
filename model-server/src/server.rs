//! HTTP surface of the model server.
//!
//! Endpoints:
//! - GET /                - Plain-text banner
//! - GET /server_version  - Crate version
//! - POST /predict        - BSON `{image}` in, BSON `{prediction}` out
//! - GET /shutdown        - Graceful shutdown
//! - GET /metrics         - Prometheus metrics

use std::sync::Arc;

use array_codec::BSON_MEDIA_TYPE;
use axum::{
    body::to_bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};
use url::form_urlencoded;
use uuid::Uuid;

use crate::binder::{FilePart, RawRequest};
use crate::config::ServerConfig;
use crate::dispatch::Predictor;
use crate::error::ServerError;
use crate::model::Model;
use crate::state::AppState;

/// Body of `GET /`
pub const BANNER: &str = "NIPS 2018 Adversarial Vision Challenge Model Server\n";

/// Body of `GET /server_version`
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds the router for `state`.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;

    Router::new()
        .route("/", get(banner_handler))
        .route("/server_version", get(version_handler))
        .route("/predict", post(predict_handler))
        .route("/shutdown", get(shutdown_handler))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Validates `model`, binds the listener and serves until shutdown.
///
/// Configuration errors are returned before any socket is opened.
pub async fn serve(model: Arc<dyn Model>, config: &ServerConfig) -> Result<(), ServerError> {
    let predictor = Predictor::new(model)?;
    info!(
        layout = ?predictor.layout(),
        bounds = ?predictor.bounds(),
        "Predictor ready"
    );

    let shutdown = Arc::new(Notify::new());
    let state = AppState::from_config(predictor, config).with_shutdown(Arc::clone(&shutdown));
    let app = router(state);

    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(bind_addr = %bind_addr, "Model server starting");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Model server stopped");
    Ok(())
}

async fn shutdown_signal(hook: Arc<Notify>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = hook.notified() => info!("Shutdown requested over HTTP"),
        () = ctrl_c => info!("Ctrl+C received"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn banner_handler() -> &'static str {
    BANNER
}

async fn version_handler() -> &'static str {
    SERVER_VERSION
}

/// Spends one unit of budget, then binds, validates and predicts.
async fn predict_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ServerError> {
    // Before the body is even read: malformed requests still cost budget.
    state.budget.consume()?;

    let request_id = Uuid::new_v4();
    async move {
        let raw = read_request(request, state.max_body_bytes).await?;
        let body = state.predictor.invoke(raw).await?;
        Ok(([(header::CONTENT_TYPE, BSON_MEDIA_TYPE)], body).into_response())
    }
    .instrument(info_span!("predict", %request_id))
    .await
}

async fn shutdown_handler(State(state): State<AppState>) -> Result<&'static str, ServerError> {
    let hook = state.shutdown.as_ref().ok_or(ServerError::ShutdownUnavailable)?;
    hook.notify_one();
    Ok("Shutting down ...")
}

/// Splits an HTTP request into the parts the binder understands.
async fn read_request(request: Request, max_body_bytes: usize) -> Result<RawRequest, ServerError> {
    let query = request
        .uri()
        .query()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let headers = request
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let mut raw = RawRequest {
        content_type,
        headers,
        query,
        ..Default::default()
    };

    match raw.media_type().as_str() {
        "multipart/form-data" => {
            let mut multipart = Multipart::from_request(request, &())
                .await
                .map_err(|e| ServerError::MalformedRequest(e.to_string()))?;

            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| ServerError::MalformedRequest(e.to_string()))?
            {
                let name = field.name().unwrap_or_default().to_string();
                match field.file_name().map(str::to_owned) {
                    Some(file_name) => {
                        let data = field
                            .bytes()
                            .await
                            .map_err(|e| ServerError::MalformedRequest(e.to_string()))?;
                        raw.files.push(FilePart {
                            name,
                            file_name: Some(file_name),
                            data,
                        });
                    }
                    None => {
                        let value = field
                            .text()
                            .await
                            .map_err(|e| ServerError::MalformedRequest(e.to_string()))?;
                        raw.form.push((name, value));
                    }
                }
            }
        }
        "application/x-www-form-urlencoded" => {
            let body = read_body(request, max_body_bytes).await?;
            raw.form = form_urlencoded::parse(&body).into_owned().collect();
        }
        _ => {
            raw.body = read_body(request, max_body_bytes).await?;
        }
    }

    Ok(raw)
}

async fn read_body(request: Request, max_body_bytes: usize) -> Result<bytes::Bytes, ServerError> {
    to_bytes(request.into_body(), max_body_bytes)
        .await
        .map_err(|e| ServerError::MalformedRequest(format!("failed to read body: {e}")))
}
