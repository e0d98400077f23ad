use serde::Deserialize;

/// Query parameters of `GET /extract`. `image_url` is optional here so that
/// a missing parameter produces our own 400 message instead of an extractor
/// rejection.
#[derive(Debug, Deserialize)]
pub struct ExtractParams {
    pub image_url: Option<String>,
}
