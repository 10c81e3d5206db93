//! HTTP backend for the Gemini `generateContent` API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credentials::Credential;
use super::dispatcher::{CompletionBackend, CompletionRequest};
use crate::error::ApiError;
use crate::types::EnhancerConfig;

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Client for the Gemini REST API.
pub struct GeminiClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GeminiClient {
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &EnhancerConfig) -> reqwest::Result<Self> {
        Self::new(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    async fn send(
        &self,
        request: CompletionRequest<'_>,
        credential: &Credential,
    ) -> Result<String, ApiError> {
        let body = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: request.instructions,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: request.text }],
            }],
        };

        debug!(
            credential = credential.ordinal,
            model = request.model,
            chars = request.text.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(self.endpoint(request.model))
            .query(&[("key", credential.value())])
            .json(&body)
            .send()
            .await
            // The URL carries the key; keep it out of the message.
            .map_err(|e| ApiError::Transient(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &text));
        }

        let raw = response
            .text()
            .await
            .map_err(|e| ApiError::Transient(e.without_url().to_string()))?;
        let parsed: GenerateContentResponse =
            serde_json::from_str(&raw).map_err(|e| ApiError::Fatal {
                status: status.as_u16(),
                message: format!("undecodable response: {}", e),
            })?;

        extract_text(parsed)
    }
}

/// Map a non-success status to an [`ApiError`].
fn classify_failure(status: StatusCode, body: &str) -> ApiError {
    let message = truncate(body.trim(), MAX_ERROR_BODY);
    if status == StatusCode::TOO_MANY_REQUESTS {
        ApiError::RateLimited {
            status: status.as_u16(),
            message,
        }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiError::Transient(format!("{}: {}", status, message))
    } else {
        ApiError::Fatal {
            status: status.as_u16(),
            message,
        }
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, ApiError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if !text.trim().is_empty() {
        return Ok(text);
    }

    // A blocked prompt is blocked again on every retry.
    match response.prompt_feedback.and_then(|f| f.block_reason) {
        Some(reason) => Err(ApiError::Fatal {
            status: StatusCode::OK.as_u16(),
            message: format!("prompt blocked: {}", reason),
        }),
        None => Err(ApiError::Transient("empty completion: no candidates".to_string())),
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::collections::HashMap;

    /// Serve a fake API whose reply depends on the key query parameter.
    async fn fake_api() -> String {
        async fn generate(
            Path(model): Path<String>,
            Query(params): Query<HashMap<String, String>>,
            Json(body): Json<serde_json::Value>,
        ) -> (AxumStatus, String) {
            let key = params.get("key").cloned().unwrap_or_default();
            match key.as_str() {
                "throttled" => (AxumStatus::TOO_MANY_REQUESTS, "quota exceeded".into()),
                "broken" => (AxumStatus::SERVICE_UNAVAILABLE, "overloaded".into()),
                "invalid" => (AxumStatus::BAD_REQUEST, "API key not valid".into()),
                "garbage" => (AxumStatus::OK, "not json".into()),
                "empty" => (AxumStatus::OK, serde_json::json!({"candidates": []}).to_string()),
                "blocked" => (
                    AxumStatus::OK,
                    serde_json::json!({"promptFeedback": {"blockReason": "SAFETY"}}).to_string(),
                ),
                _ => {
                    let input = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or("");
                    let system = body["systemInstruction"]["parts"][0]["text"]
                        .as_str()
                        .unwrap_or("");
                    let reply = format!("{}|{}|{}", model, system, input);
                    (
                        AxumStatus::OK,
                        serde_json::json!({
                            "candidates": [{"content": {"parts": [{"text": reply}]}}]
                        })
                        .to_string(),
                    )
                }
            }
        }

        let app = Router::new().route("/v1beta/models/:model", post(generate));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1beta", addr)
    }

    async fn send(base: &str, key: &str) -> Result<String, ApiError> {
        let client = GeminiClient::new(base, Duration::from_secs(5)).unwrap();
        client
            .send(
                CompletionRequest {
                    text: "chapter text",
                    instructions: "polish",
                    model: "gemini-test",
                },
                &Credential::new(0, key),
            )
            .await
    }

    #[test]
    fn test_classify_failure() {
        assert!(classify_failure(StatusCode::TOO_MANY_REQUESTS, "").is_rate_limited());
        assert!(classify_failure(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_failure(StatusCode::REQUEST_TIMEOUT, "").is_transient());
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, "denied"),
            ApiError::Fatal { status: 403, .. }
        ));
    }

    #[test]
    fn test_truncate_long_bodies() {
        let body = "x".repeat(MAX_ERROR_BODY + 10);
        let message = truncate(&body, MAX_ERROR_BODY);
        assert_eq!(message.len(), MAX_ERROR_BODY + 3);
        assert_eq!(truncate("short", MAX_ERROR_BODY), "short");
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let base = fake_api().await;
        let text = tokio_test::assert_ok!(send(&base, "good").await);
        // The path segment is "<model>:generateContent".
        assert_eq!(text, "gemini-test:generateContent|polish|chapter text");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let base = fake_api().await;
        assert!(send(&base, "throttled").await.unwrap_err().is_rate_limited());
        assert!(send(&base, "broken").await.unwrap_err().is_transient());
        assert!(matches!(
            send(&base, "invalid").await.unwrap_err(),
            ApiError::Fatal { status: 400, .. }
        ));
        assert!(matches!(
            send(&base, "garbage").await.unwrap_err(),
            ApiError::Fatal { status: 200, .. }
        ));
        assert!(send(&base, "empty").await.unwrap_err().is_transient());
        match send(&base, "blocked").await.unwrap_err() {
            ApiError::Fatal { message, .. } => assert!(message.contains("SAFETY")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_failure_is_transient_and_hides_key() {
        let err = tokio_test::assert_err!(send("http://127.0.0.1:1/v1beta", "secret-key").await);
        assert!(err.is_transient());
        assert!(!err.to_string().contains("secret-key"));
    }
}
