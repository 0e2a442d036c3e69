use crate::types::{DiscussionSource, FeedbackError, RawRecord, Result, SourceError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const POSTS_FUNCTION: &str = "mod_forum_get_discussion_posts";

/// LMS REST collaborator for Moodle web services.
pub struct MoodleRestSource {
    client: Client,
    endpoint: Url,
    token: String,
}

impl MoodleRestSource {
    pub fn new(base_url: &str, token: &str, timeout_seconds: u64) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(FeedbackError::Config(
                "moodle.token is not set (or MOODLE_TOKEN)".to_string(),
            ));
        }
        let endpoint = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?.join("webservice/rest/server.php")?;
        let client = Client::builder()
            .user_agent(concat!("discussion-feedback/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_seconds))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            token: token.to_string(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Decode a `mod_forum_get_discussion_posts` body. Accepts the `{"posts": [...]}`
/// envelope or a bare array; an `exception` object is an error.
pub fn decode_posts_response(body: &str, discussion_id: u64) -> std::result::Result<Vec<RawRecord>, SourceError> {
    let value: Value = serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;

    if let Some(exception) = value.get("exception") {
        let code = value.get("errorcode").and_then(Value::as_str).unwrap_or_default();
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_else(|| exception.as_str().unwrap_or("unknown exception"));
        if code == "invalidrecord" {
            return Err(SourceError::NotFound { discussion_id });
        }
        return Err(SourceError::Unavailable(format!("{} ({})", message, code)));
    }

    if let Some(warnings) = value.get("warnings").and_then(Value::as_array).filter(|w| !w.is_empty()) {
        warn!("LMS returned {} warnings for discussion {}", warnings.len(), discussion_id);
    }

    let posts = match value {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut object) => object
            .remove("posts")
            .ok_or_else(|| SourceError::Malformed("response has no posts field".to_string()))?,
        other => {
            return Err(SourceError::Malformed(format!("unexpected response: {}", other)));
        }
    };

    serde_json::from_value(posts).map_err(|e| SourceError::Malformed(e.to_string()))
}

#[async_trait]
impl DiscussionSource for MoodleRestSource {
    fn source_name(&self) -> String {
        match self.endpoint.domain() {
            Some(domain) => format!("Moodle ({})", domain),
            None => "Moodle".to_string(),
        }
    }

    async fn fetch_records(&self, discussion_id: u64) -> std::result::Result<Vec<RawRecord>, SourceError> {
        debug!("Requesting discussion {} from {}", discussion_id, self.endpoint);
        let discussion = discussion_id.to_string();
        let response = self
            .client
            .post(self.endpoint.clone())
            .form(&[
                ("wstoken", self.token.as_str()),
                ("wsfunction", POSTS_FUNCTION),
                ("moodlewsrestformat", "json"),
                ("discussionid", discussion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!("HTTP {}", status)));
        }

        let records = decode_posts_response(&body, discussion_id)?;
        info!("Fetched {} posts for discussion {}", records.len(), discussion_id);
        Ok(records)
    }
}
