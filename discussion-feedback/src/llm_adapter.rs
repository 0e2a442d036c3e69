use crate::config::GenerationConfig;
use crate::types::{FeedbackError, GenerationError, GenerationRequest, Result, TextGenerator};
use crate::utils::text;
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

/// Chat-completions client for OpenRouter-compatible endpoints.
pub struct OpenRouterGenerator {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl OpenRouterGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| FeedbackError::Config("generation.api_key is not set (or OPENROUTER_API_KEY)".to_string()))?;
        let endpoint = Url::parse(&format!("{}/chat/completions", config.base_url.trim_end_matches('/')))?;
        let timeout = Duration::from_secs(config.timeout_seconds);

        let client = Client::builder()
            .user_agent(concat!("discussion-feedback/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key,
            timeout,
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_once(&self, body: &ChatCompletionRequest<'_>) -> std::result::Result<String, GenerationError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .header("X-Title", "discussion-feedback")
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message: text::truncate_chars(message.trim(), ERROR_BODY_CHARS),
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Network(format!("unreadable completion body: {}", e)))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                "Tokens used: {} (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }

    fn transport_error(&self, error: reqwest::Error) -> GenerationError {
        if error.is_timeout() {
            GenerationError::Timeout {
                seconds: self.timeout.as_secs_f64(),
            }
        } else {
            GenerationError::Network(error.to_string())
        }
    }
}

/// Transient failures worth another attempt.
pub fn is_retryable(error: &GenerationError) -> bool {
    match error {
        GenerationError::Timeout { .. } | GenerationError::Network(_) => true,
        GenerationError::Api { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
        }
        GenerationError::EmptyResponse | GenerationError::InvalidRequest(_) => false,
    }
}

pub fn validate_request(request: &GenerationRequest) -> std::result::Result<(), GenerationError> {
    if request.prompt.trim().is_empty() {
        return Err(GenerationError::InvalidRequest("prompt is empty".to_string()));
    }
    if request.max_tokens == 0 {
        return Err(GenerationError::InvalidRequest("max_tokens must be positive".to_string()));
    }
    if !(0.0..=2.0).contains(&request.temperature) {
        return Err(GenerationError::InvalidRequest(format!(
            "temperature {} outside [0, 2]",
            request.temperature
        )));
    }
    Ok(())
}

#[async_trait]
impl TextGenerator for OpenRouterGenerator {
    fn generator_name(&self) -> String {
        format!("OpenRouter ({})", self.model)
    }

    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
        validate_request(request)?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        debug!("Sending {} prompt chars to {}", request.prompt.len(), self.model);

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: self.retry_delay,
            initial_interval: self.retry_delay,
            max_interval: self.retry_delay * 16,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(content) => {
                    info!("Received {} chars from {}", content.len(), self.model);
                    return Ok(content);
                }
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    let delay = backoff.next_backoff().unwrap_or(self.retry_delay);
                    attempt += 1;
                    warn!(
                        "Generation attempt {} failed, retrying in {:?}: {}",
                        attempt, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// One scripted reply of [`MockGenerator`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(GenerationError),
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Text(text.into())
    }

    pub fn delayed(delay: Duration, reply: MockReply) -> Self {
        MockReply::Delay(delay, Box::new(reply))
    }
}

type Responder = Box<dyn Fn(&GenerationRequest) -> MockReply + Send + Sync>;

/// Offline generator for development and tests.
///
/// Replies come from the script first, then from the responder closure, and
/// otherwise from canned well-formed output for each pipeline stage.
pub struct MockGenerator {
    name: String,
    response_delay_ms: u64,
    script: Mutex<VecDeque<MockReply>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockGenerator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response_delay_ms: 0,
            script: Mutex::new(VecDeque::new()),
            responder: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_fn<F>(name: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&GenerationRequest) -> MockReply + Send + Sync + 'static,
    {
        let mut generator = Self::new(name);
        generator.responder = Some(Box::new(responder));
        generator
    }

    pub fn with_script(self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(replies);
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn next_reply(&self, request: &GenerationRequest) -> MockReply {
        let scripted = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        match (scripted, &self.responder) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(request),
            (None, None) => canned_reply(request),
        }
    }
}

/// Well-formed output for whichever stage the request belongs to.
pub fn canned_reply(request: &GenerationRequest) -> MockReply {
    let system = request.system_prompt.as_deref().unwrap_or_default();
    if system.contains("\"class_overview\"") {
        MockReply::text(
            r#"{"class_overview": {"total_students": "1", "average_performance": "developing", "overall_readiness": "ready for drafting"},
"common_strengths": ["clear positions"], "frequent_issues": [{"issue": "thin evidence", "frequency": "most students", "impact": "weakens arguments", "solution": "model evidence selection"}],
"teaching_priorities": ["evidence"], "exemplary_work": [], "intervention_needed": [], "class_discussion_topics": ["privacy trade-offs"], "next_steps": ["peer review"]}"#,
        )
    } else if system.contains("educational analyst") {
        MockReply::text(
            "# Executive Summary\nParticipation was steady.\n\n## Engagement & Participation Analysis\nMost sections posted outlines.\n\n\
             ## Quality of Outlines & Feedback\nFeedback was mostly constructive.\n\n## Key Insights & Pedagogical Recommendations\nModel evidence use in class.\n",
        )
    } else {
        MockReply::text(
            r#"{"overall_score": "7", "strengths": ["clear position"], "areas_for_improvement": ["add specific evidence"],
"thesis_feedback": "Arguable and specific.", "structure_feedback": "Logical order.", "evidence_feedback": "Needs concrete examples.",
"suggestions": ["cite one statistic per body paragraph"], "comparison_to_sample": "Less developed than the sample."}"#,
        )
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    fn generator_name(&self) -> String {
        format!("Mock Generator ({})", self.name)
    }

    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let mut reply = self.next_reply(request);

        if self.response_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.response_delay_ms)).await;
        }
        loop {
            match reply {
                MockReply::Text(text) => return Ok(text),
                MockReply::Fail(error) => return Err(error),
                MockReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}
