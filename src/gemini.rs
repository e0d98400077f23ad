use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::extract::ExtractError;

// ── Constants ────────────────────────────────────────────────────────────────

const GENERATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Instruction sent alongside the two images. The reference image teaches the
/// model where each field sits; values are then read from the same spatial
/// locations in the new image and emitted as label/value line pairs.
const EXTRACTION_PROMPT: &str = "\
You are an expert document analysis assistant. The first image is a reference \
document; learn the spatial location of each labelled field in it. The second \
image is a new document with the same layout. For every field you identified \
in the reference, read the value found at the same spatial location in the \
new document.

Output the results as plain text only: each field's label on one line, \
followed immediately by the extracted value on the next line. Do not include \
any other text or formatting.";

// ── Client ───────────────────────────────────────────────────────────────────

/// Thin wrapper over the Gemini `generateContent` REST endpoint. One
/// call-and-return operation, no streaming, no retries.
pub struct GeminiClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, api_base: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(GENERATE_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        )
    }

    /// Send one multimodal prompt (instructions + reference image + new image)
    /// and return the model's raw text, unmodified.
    pub async fn extract_fields(
        &self,
        reference_image: &[u8],
        reference_mime: &str,
        new_image: &[u8],
        new_mime: &str,
    ) -> Result<String, ExtractError> {
        let request = build_request(reference_image, reference_mime, new_image, new_mime);

        tracing::debug!(model = %self.model, "sending request to Gemini API");

        let response = self
            .client
            .post(self.generate_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractError::Extraction(format!("TimeoutError: {}", e))
                } else {
                    ExtractError::Extraction(format!("RequestError: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Extraction(format!(
                "model API returned {}: {}",
                status, body
            )));
        }

        let api_response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::Extraction(format!("unparsable model response: {}", e)))?;

        response_text(api_response)
    }
}

// ── Request construction / response extraction ──────────────────────────────

fn build_request(
    reference_image: &[u8],
    reference_mime: &str,
    new_image: &[u8],
    new_mime: &str,
) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![
                Part::Text {
                    text: EXTRACTION_PROMPT.to_string(),
                },
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: reference_mime.to_string(),
                        data: STANDARD.encode(reference_image),
                    },
                },
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: new_mime.to_string(),
                        data: STANDARD.encode(new_image),
                    },
                },
            ],
        }],
    }
}

/// Concatenate the text parts of the first candidate. A refusal or an empty
/// candidate list is an extraction failure, never an empty 200.
fn response_text(response: GenerateContentResponse) -> Result<String, ExtractError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ExtractError::Extraction("model returned no candidates".to_string()))?;

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(ExtractError::Extraction(
            "model refused the request (finish reason SAFETY)".to_string(),
        ));
    }

    let text: String = candidate
        .content
        .parts
        .into_iter()
        .filter_map(|part| match part {
            Part::Text { text } => Some(text),
            Part::InlineData { .. } => None,
        })
        .collect();

    if text.is_empty() {
        return Err(ExtractError::Extraction(
            "model returned no text".to_string(),
        ));
    }

    Ok(text)
}

// ── Gemini API wire types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_embeds_prompt_and_both_images() {
        let request = build_request(b"ref-bytes", "image/png", b"new-bytes", "image/jpeg");
        let json = serde_json::to_value(&request).unwrap();

        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["text"], EXTRACTION_PROMPT);
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(
            parts[1]["inlineData"]["data"],
            STANDARD.encode(b"ref-bytes")
        );
        assert_eq!(parts[2]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(
            parts[2]["inlineData"]["data"],
            STANDARD.encode(b"new-bytes")
        );
    }

    #[test]
    fn response_text_concatenates_first_candidate_parts() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [{"text": "דגם:\n"}, {"text": "GD9EL5R\n"}],
                    "role": "model"
                },
                "finishReason": "STOP"
            }]
        });
        let response: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response_text(response).unwrap(), "דגם:\nGD9EL5R\n");
    }

    #[test]
    fn response_text_fails_on_empty_candidates() {
        let response: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(matches!(
            response_text(response),
            Err(ExtractError::Extraction(_))
        ));
    }

    #[test]
    fn response_text_fails_on_safety_refusal() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "blocked"}]},
                "finishReason": "SAFETY"
            }]
        });
        let response: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            response_text(response),
            Err(ExtractError::Extraction(_))
        ));
    }
}
