use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

pub mod config;
pub mod extract;
pub mod gemini;
pub mod models;

pub use config::{Config, ConfigError};
use extract::ExtractError;
use gemini::GeminiClient;
use models::ExtractParams;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head><title>Document Field Extraction API</title></head>
  <body>
    <h1>Document Field Extraction API</h1>
    <p>Extracts fields from a document image using a multimodal AI model and
    a fixed reference document as the layout template.</p>
    <p><code>GET /extract?image_url=https://example.com/document.jpg</code>
    returns the extracted field labels and values as plain text.</p>
  </body>
</html>
"#;

// ── Application state ────────────────────────────────────────────────────────

/// Everything a request needs, built once at startup and shared read-only.
pub struct AppState {
    pub reference_image: Vec<u8>,
    pub reference_mime: &'static str,
    pub gemini: GeminiClient,
    pub http: reqwest::Client,
    pub debug: bool,
}

impl AppState {
    /// Load the reference image and build the outbound clients. Any failure
    /// here is fatal: the server must not start without its reference asset
    /// or credential.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let reference_image = std::fs::read(&config.reference_image_path).map_err(|source| {
            ConfigError::ReferenceImageUnreadable {
                path: config.reference_image_path.clone(),
                source,
            }
        })?;

        let reference_mime = extract::detect_image_mime(&reference_image).ok_or_else(|| {
            ConfigError::ReferenceImageFormat(config.reference_image_path.clone())
        })?;

        let gemini = GeminiClient::new(&config.api_key, &config.model, &config.api_base)?;
        let http = extract::build_fetch_client()?;

        Ok(AppState {
            reference_image,
            reference_mime,
            gemini,
            http,
            debug: config.debug,
        })
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/extract", get(extract_endpoint))
        .with_state(Arc::new(state))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn index() -> impl IntoResponse {
    Html(INDEX_HTML)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn extract_endpoint(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExtractParams>,
) -> Response {
    let image_url = match params
        .image_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
    {
        Some(u) => u,
        None => {
            return plain_text(
                StatusCode::BAD_REQUEST,
                "missing required 'image_url' parameter".to_string(),
            );
        }
    };

    match extract::extract_fields(&state, image_url).await {
        Ok(text) => plain_text(StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, image_url, "extraction request failed");
            let (status, body) = error_body(&e, state.debug);
            plain_text(status, body)
        }
    }
}

// ── Response helpers ─────────────────────────────────────────────────────────

fn plain_text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Map a failure to its HTTP status and public message. Validation messages
/// are always specific; fetch and model details are only exposed when the
/// debug flag is set.
fn error_body(e: &ExtractError, debug: bool) -> (StatusCode, String) {
    match e {
        ExtractError::InvalidUrl(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        ExtractError::FetchRejected(detail) => (
            StatusCode::BAD_REQUEST,
            with_detail("could not fetch image from the supplied URL", detail, debug),
        ),
        ExtractError::FetchFailed(detail) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            with_detail("failed to fetch image", detail, debug),
        ),
        ExtractError::Extraction(detail) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            with_detail("error communicating with the AI model", detail, debug),
        ),
    }
}

fn with_detail(public: &str, detail: &str, debug: bool) -> String {
    if debug {
        format!("{}: {}", public, detail)
    } else {
        public.to_string()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config(reference_image_path: PathBuf) -> Config {
        Config {
            api_key: "test-key".to_string(),
            port: 0,
            debug: false,
            model: "gemini-1.5-pro".to_string(),
            api_base: "http://localhost:9".to_string(),
            reference_image_path,
        }
    }

    #[test]
    fn state_fails_without_reference_asset() {
        let config = test_config(PathBuf::from("/nonexistent/reference.png"));
        assert!(matches!(
            AppState::from_config(&config),
            Err(ConfigError::ReferenceImageUnreadable { .. })
        ));
    }

    #[test]
    fn state_fails_on_non_image_reference_asset() {
        let path = std::env::temp_dir().join("docfield-api-bad-reference.txt");
        std::fs::write(&path, b"not an image").unwrap();
        let config = test_config(path.clone());
        assert!(matches!(
            AppState::from_config(&config),
            Err(ConfigError::ReferenceImageFormat(_))
        ));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn error_body_maps_statuses_and_honors_debug_flag() {
        let e = ExtractError::InvalidUrl("image_url is not a valid URL".to_string());
        let (status, body) = error_body(&e, false);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "image_url is not a valid URL");

        let e = ExtractError::FetchRejected("target URL returned 404".to_string());
        assert_eq!(error_body(&e, false).0, StatusCode::BAD_REQUEST);

        let e = ExtractError::FetchFailed("TimeoutError: deadline elapsed".to_string());
        let (status, body) = error_body(&e, false);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("TimeoutError"));

        let (_, body) = error_body(&e, true);
        assert!(body.contains("TimeoutError"));

        let e = ExtractError::Extraction("model API returned 429".to_string());
        assert_eq!(error_body(&e, false).0, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
