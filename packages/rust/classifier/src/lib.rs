//! Retrying remote classifier.
//!
//! [`RemoteClassifier`] wraps a single call to an OpenAI-compatible
//! chat-completions endpoint: model id, the prompt as one user message, an
//! optional reasoning-effort hint, a per-call timeout. [`RetryPolicy`] is
//! the caller-side resilience layer: bounded attempts with exponential
//! backoff that degrade to a recorded `ERROR after N attempts` string
//! instead of failing the batch.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use rostermill_shared::{Result, RostermillError};

/// User-Agent string for classifier requests.
const USER_AGENT: &str = concat!("rostermill/", env!("CARGO_PKG_VERSION"));

/// How much response body to keep in a remote error detail.
const ERROR_BODY_LIMIT: usize = 200;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A single classification attempt's failure. Never propagated past the
/// retry layer; rendered into the output column instead.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// The attempt exceeded its deadline. Cancels only this attempt.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// Transport failure, non-2xx status, or an unusable response body.
    #[error("{0}")]
    Remote(String),
}

impl ClassifyError {
    /// Stable tag used in recorded error strings.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Remote(_) => "remote-error",
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

// ---------------------------------------------------------------------------
// RemoteClassifier
// ---------------------------------------------------------------------------

/// Configuration for a [`RemoteClassifier`].
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// API base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer credential.
    pub api_key: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Optional reasoning effort hint.
    pub reasoning_effort: Option<String>,
    /// Per-attempt deadline. A hung attempt must not block sibling rows.
    pub request_timeout: Duration,
}

/// One remote text-classification capability: send prompt, get text.
#[derive(Debug, Clone)]
pub struct RemoteClassifier {
    config: ClassifierConfig,
    client: reqwest::Client,
}

impl RemoteClassifier {
    /// Build a classifier with a shared connection pool. The per-attempt
    /// timeout is enforced around each call, not on the client, so the
    /// retry layer can tell a timeout from a transport failure.
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RostermillError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// The configured model identifier.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Perform one classification attempt: returns the trimmed response
    /// text, or the attempt's tagged failure.
    pub async fn classify(&self, prompt: &str) -> std::result::Result<String, ClassifyError> {
        let deadline = self.config.request_timeout;
        match tokio::time::timeout(deadline, self.classify_inner(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifyError::Timeout(deadline)),
        }
    }

    async fn classify_inner(&self, prompt: &str) -> std::result::Result<String, ClassifyError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            reasoning_effort: self.config.reasoning_effort.as_deref(),
        };

        debug!(model = %self.config.model, prompt_len = prompt.len(), "sending classification request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifyError::Remote(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(ClassifyError::Remote(format!("HTTP {status}: {detail}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::Remote(format!("invalid response body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClassifyError::Remote("response had no choices".into()))?;

        Ok(text.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Bounded retry with exponential backoff around an unreliable call.
///
/// Attempts are strictly sequential; after a failed non-final attempt the
/// policy sleeps `backoff_unit * 2^(attempt-1)` (1, 2, 4 units). The final
/// failure is rendered as `ERROR after {n} attempts: {kind}: {detail}` and
/// returned as an ordinary string — a single row's failure must never abort
/// the batch.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    /// Run `call` until it succeeds or attempts are exhausted. The closure
    /// is invoked once per attempt, so callers can scope per-attempt state
    /// (such as a concurrency-gate permit) inside it.
    pub async fn run<F, Fut>(&self, mut call: F) -> String
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<String, ClassifyError>>,
    {
        let mut last_err = None;

        for attempt in 1..=self.max_attempts {
            match call().await {
                Ok(text) => return text,
                Err(e) => {
                    warn!(attempt, max = self.max_attempts, kind = e.kind(), error = %e, "classification attempt failed");
                    last_err = Some(e);
                }
            }

            if attempt < self.max_attempts {
                let backoff = self.backoff_unit * 2u32.pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }
        }

        // max_attempts >= 1, so a missing success implies a recorded error.
        let e = last_err.expect("at least one attempt");
        format!(
            "ERROR after {} attempts: {}: {}",
            self.max_attempts,
            e.kind(),
            e
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn classifier_for(server: &MockServer, timeout: Duration) -> RemoteClassifier {
        RemoteClassifier::new(ClassifierConfig {
            base_url: server.uri(),
            api_key: "test-key".into(),
            model: "gpt-5".into(),
            reasoning_effort: Some("high".into()),
            request_timeout: timeout,
        })
        .unwrap()
    }

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    #[tokio::test]
    async fn classify_returns_trimmed_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-5",
                "reasoning_effort": "high",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("  Distributor \n")))
            .mount(&server)
            .await;

        let classifier = classifier_for(&server, Duration::from_secs(5));
        let text = classifier.classify("classify this company").await.unwrap();
        assert_eq!(text, "Distributor");
    }

    #[tokio::test]
    async fn non_success_status_is_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let classifier = classifier_for(&server, Duration::from_secs(5));
        let err = classifier.classify("p").await.unwrap_err();
        assert_eq!(err.kind(), "remote-error");
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn empty_choices_is_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let classifier = classifier_for(&server, Duration::from_secs(5));
        let err = classifier.classify("p").await.unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body("late"))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let classifier = classifier_for(&server, Duration::from_millis(100));
        let err = classifier.classify("p").await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_on_third_attempt_with_growing_backoff() {
        let attempts = Arc::new(AtomicU32::new(0));
        let instants = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let result = policy
            .run(|| {
                let attempts = attempts.clone();
                let instants = instants.clone();
                async move {
                    instants.lock().await.push(tokio::time::Instant::now());
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(ClassifyError::Remote("transient".into()))
                    } else {
                        Ok("Broadline".to_string())
                    }
                }
            })
            .await;

        assert_eq!(result, "Broadline");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        // Backoffs of 1 then 2 units between the three attempts.
        let instants = instants.lock().await;
        assert_eq!(instants[1] - instants[0], Duration::from_secs(1));
        assert_eq!(instants[2] - instants[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_records_error_string() {
        let attempts = Arc::new(AtomicU32::new(0));

        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let result = policy
            .run(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(ClassifyError::Timeout(Duration::from_secs(45)))
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(result.starts_with("ERROR after 3 attempts: timeout:"));
    }

    #[tokio::test]
    async fn single_attempt_policy_does_not_sleep() {
        let policy = RetryPolicy::new(1, Duration::from_secs(60));
        let result = policy
            .run(|| async { Err(ClassifyError::Remote("boom".into())) })
            .await;
        assert_eq!(result, "ERROR after 1 attempts: remote-error: boom");
    }
}
