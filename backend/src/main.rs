mod email;

use std::env;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, get_service, post};
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::email::{EmailConfig, EmailError, GoogleOauth};

const PORT_ENV: &str = "PORT";
// Where the built page + wasm bundle live.
const STATIC_DIR_ENV: &str = "STATIC_DIR";
const CORS_ORIGIN_ENV: &str = "CORS_ORIGIN";
// Exposes /oauth/start + /oauth/callback for the one-time
// refresh-token bootstrap.
const ENABLE_OAUTH_FLOW_ENV: &str = "ENABLE_OAUTH_FLOW";

#[derive(Debug, Error)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Email(#[from] EmailError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Email(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

struct AppState {
    http: reqwest::Client,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let state = Arc::new(AppState {
        http: reqwest::Client::new(),
    });

    let static_dir = env::var(STATIC_DIR_ENV).unwrap_or_else(|_| "static".to_string());
    let oauth_flow = flag_enabled(env::var(ENABLE_OAUTH_FLOW_ENV).ok().as_deref());

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/yes", post(yes_handler));
    if oauth_flow {
        app = app
            .route("/oauth/start", get(oauth_start_handler))
            .route("/oauth/callback", get(oauth_callback_handler));
    }
    let app = app
        .fallback_service(
            get_service(ServeDir::new(static_dir.clone()))
                .handle_error(|_| async { StatusCode::INTERNAL_SERVER_ERROR }),
        )
        .layer(cors_layer())
        .with_state(state);

    let port = port_from(env::var(PORT_ENV).ok().as_deref());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .expect("bind listener");
    info!("listening on http://0.0.0.0:{port} (static dir: {static_dir})");
    axum::serve(listener, app).await.expect("server failed");
}

fn flag_enabled(value: Option<&str>) -> bool {
    value
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn port_from(value: Option<&str>) -> u16 {
    value.and_then(|p| p.trim().parse().ok()).unwrap_or(8080)
}

fn cors_layer() -> CorsLayer {
    let origin = env::var(CORS_ORIGIN_ENV).unwrap_or_else(|_| "*".to_string());
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    if origin.trim() == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin.trim()) {
        Ok(value) => layer.allow_origin(value),
        Err(_) => {
            warn!("invalid {CORS_ORIGIN_ENV} value {origin:?}, allowing any origin");
            layer.allow_origin(Any)
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// The confirmation endpoint: build and send the invitation email.
/// One attempt; failures surface as the response body.
async fn yes_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let cfg = EmailConfig::from_env()?;
    email::send(&state.http, &cfg).await.map_err(|e| {
        error!("send invitation: {e}");
        e
    })?;
    info!("invitation sent to {} recipient(s)", cfg.recipients.len());
    Ok(Json(json!({ "status": "sent" })))
}

async fn oauth_start_handler() -> Result<Redirect, ApiError> {
    let oauth = GoogleOauth::from_env()?;
    Ok(Redirect::to(&email::consent_url(&oauth)?))
}

#[derive(Debug, serde::Deserialize)]
struct CallbackParams {
    code: Option<String>,
}

async fn oauth_callback_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<impl IntoResponse, ApiError> {
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing code".to_string()))?;
    let oauth = GoogleOauth::from_env()?;
    let token = email::exchange_code(&state.http, &oauth, &code).await?;
    Ok(Json(json!({ "refresh_token": token.refresh_token })))
}
