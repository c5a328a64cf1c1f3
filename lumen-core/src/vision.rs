//! Client for the external captioning/tagging endpoint (an Ollama-style
//! vision model API). Entirely optional: an empty base URL disables it, and
//! repeated failures put it into a cool-down during which callers get an
//! immediate "disabled" answer instead of a slow timeout.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{IndexError, Result};

/// Consecutive failures before the client backs off.
const COOLDOWN_AFTER_FAILURES: u32 = 3;
const COOLDOWN: Duration = Duration::from_secs(300);
/// Minimum spacing between requests; the two external-service stages share
/// this one limiter.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(500);

const CAPTION_PROMPT: &str =
    "Describe this photo in one concise sentence. Reply with the sentence only.";
const TAGGING_PROMPT: &str = "List up to 8 short lowercase tags describing this photo, \
                              comma separated. Reply with the tags only.";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct VisionClient {
    base_url: Option<String>,
    model: String,
    http: reqwest::Client,
    last_request: Mutex<Option<Instant>>,
    cooldown_until: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
}

impl std::fmt::Debug for VisionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionClient")
            .field("enabled", &self.base_url.is_some())
            .field("model", &self.model)
            .finish()
    }
}

impl VisionClient {
    /// `base_url` empty or None disables the client outright.
    pub fn new(base_url: Option<String>, model: impl Into<String>) -> Self {
        let base_url = base_url.filter(|url| !url.trim().is_empty());
        Self {
            base_url,
            model: model.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            last_request: Mutex::new(None),
            cooldown_until: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, "llava")
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    pub async fn caption(&self, jpeg: &[u8]) -> Result<String> {
        let text = self.generate(CAPTION_PROMPT, jpeg).await?;
        Ok(text.trim().trim_matches('"').to_string())
    }

    pub async fn tags(&self, jpeg: &[u8]) -> Result<Vec<String>> {
        let text = self.generate(TAGGING_PROMPT, jpeg).await?;
        let tags: Vec<String> = text
            .split([',', '\n'])
            .map(|t| t.trim().trim_matches('"').trim_start_matches('#').to_lowercase())
            .filter(|t| !t.is_empty() && t.len() <= 40)
            .take(8)
            .collect();
        Ok(tags)
    }

    async fn generate(&self, prompt: &str, jpeg: &[u8]) -> Result<String> {
        let Some(base_url) = &self.base_url else {
            return Err(IndexError::External("vision endpoint not configured".into()));
        };

        {
            let mut cooldown = self.cooldown_until.lock().await;
            if let Some(until) = *cooldown {
                if Instant::now() < until {
                    return Err(IndexError::External("vision endpoint cooling down".into()));
                }
                *cooldown = None;
            }
        }

        // Shared token-interval limiter across caption and tagging workers.
        {
            let mut last = self.last_request.lock().await;
            if let Some(at) = *last {
                let elapsed = at.elapsed();
                if elapsed < MIN_REQUEST_INTERVAL {
                    tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
                }
            }
            *last = Some(Instant::now());
        }

        let url = format!("{}/api/generate", base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "images": [base64::engine::general_purpose::STANDARD.encode(jpeg)],
            "stream": false,
        });

        // Transport problems are transient (the worker retries them with
        // backoff); only "disabled" and "cooling down" are External. After
        // enough consecutive transient failures the cool-down below turns
        // further calls into immediate External answers.
        let outcome = async {
            let response = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| IndexError::Internal(format!("vision request failed: {e}")))?;
            if !response.status().is_success() {
                return Err(IndexError::Internal(format!(
                    "vision endpoint returned {}",
                    response.status()
                )));
            }
            let parsed: GenerateResponse = response
                .json()
                .await
                .map_err(|e| IndexError::Internal(format!("bad vision response body: {e}")))?;
            Ok(parsed.response)
        }
        .await;

        match &outcome {
            Ok(_) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(target: "vision", %err, failures, "vision request failed");
                if failures >= COOLDOWN_AFTER_FAILURES {
                    warn!(target: "vision", "entering cool-down after {failures} consecutive failures");
                    *self.cooldown_until.lock().await = Some(Instant::now() + COOLDOWN);
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                }
            }
        }
        outcome
    }
}
