use std::time::Duration;

use image::ImageFormat;
use url::Url;

use crate::AppState;

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "docfield-api/1.0";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

// ── Error type ───────────────────────────────────────────────────────────────

/// Request-scoped failures, mapped to HTTP statuses at the handler boundary:
/// `InvalidUrl` and `FetchRejected` are the caller's fault (400),
/// `FetchFailed` and `Extraction` are ours or upstream's (500).
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("{0}")]
    InvalidUrl(String),
    #[error("could not fetch image: {0}")]
    FetchRejected(String),
    #[error("could not fetch image: {0}")]
    FetchFailed(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Full extraction pipeline for one request: validate the URL, download the
/// image, then hand both it and the reference image to the model.
pub async fn extract_fields(state: &AppState, image_url: &str) -> Result<String, ExtractError> {
    validate_url(image_url)?;
    let (image, mime) = fetch_image(&state.http, image_url).await?;
    tracing::debug!(bytes = image.len(), mime, "image fetched, invoking model");
    state
        .gemini
        .extract_fields(&state.reference_image, state.reference_mime, &image, mime)
        .await
}

// ── URL validation ───────────────────────────────────────────────────────────

pub fn validate_url(url: &str) -> Result<(), ExtractError> {
    let parsed = Url::parse(url)
        .map_err(|_| ExtractError::InvalidUrl("image_url is not a valid URL".to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ExtractError::InvalidUrl(
            "only http and https URLs are supported".to_string(),
        ));
    }
    if parsed.host_str().map_or(true, |h| h.is_empty()) {
        return Err(ExtractError::InvalidUrl(
            "image_url has no host".to_string(),
        ));
    }
    Ok(())
}

// ── HTTP fetch ───────────────────────────────────────────────────────────────

/// Build the outbound client used for image downloads. Shared across requests;
/// timeouts here bound both network calls a request makes.
pub(crate) fn build_fetch_client() -> Result<reqwest::Client, reqwest::Error> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        "image/*,*/*;q=0.8".parse().unwrap(),
    );

    reqwest::ClientBuilder::new()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(FETCH_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()
}

/// Download the image at `url` and identify its media type from the bytes.
/// A 4xx from the target or a payload that is not an image is treated as bad
/// caller input; timeouts, connection failures and 5xx as transient.
async fn fetch_image(
    client: &reqwest::Client,
    url: &str,
) -> Result<(Vec<u8>, &'static str), ExtractError> {
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExtractError::FetchFailed(format!("TimeoutError: {}", e))
        } else if e.is_connect() {
            ExtractError::FetchFailed(format!("ConnectError: {}", e))
        } else {
            ExtractError::FetchFailed(format!("RequestError: {}", e))
        }
    })?;

    let status = response.status();
    if status.is_client_error() {
        return Err(ExtractError::FetchRejected(format!(
            "target URL returned {}",
            status
        )));
    }
    if !status.is_success() {
        return Err(ExtractError::FetchFailed(format!(
            "target URL returned {}",
            status
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ExtractError::FetchFailed(format!("failed to read image body: {}", e)))?;

    let mime = detect_image_mime(&bytes).ok_or_else(|| {
        ExtractError::FetchRejected("downloaded content is not a supported image".to_string())
    })?;

    Ok((bytes.to_vec(), mime))
}

// ── Image format detection ───────────────────────────────────────────────────

/// Identify the media type from the leading magic bytes. Returns `None` for
/// anything that is not an image format the model accepts.
pub(crate) fn detect_image_mime(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Bmp => Some("image/bmp"),
        ImageFormat::Tiff => Some("image/tiff"),
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
