use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::de;

/// Parent identifier carried by posts that start a discussion.
pub const ROOT_PARENT: u64 = 0;

/// Author block used by newer LMS forum endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAuthor {
    #[serde(default, deserialize_with = "de::opt_id")]
    pub id: Option<u64>,
    #[serde(default)]
    pub fullname: Option<String>,
}

/// One exported forum message, exactly as the LMS returned it.
///
/// Both the legacy export layout (`parent`, `created`, `userid`,
/// `userfullname`) and the newer endpoint layout (`parentid`, `timecreated`,
/// nested `author`) decode into this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(deserialize_with = "de::id")]
    pub id: u64,
    #[serde(default, alias = "discussionid", deserialize_with = "de::opt_id")]
    pub discussion: Option<u64>,
    #[serde(default, alias = "parentid", deserialize_with = "de::opt_id")]
    pub parent: Option<u64>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "timecreated", deserialize_with = "de::opt_i64")]
    pub created: Option<i64>,
    #[serde(default, alias = "timemodified", deserialize_with = "de::opt_i64")]
    pub modified: Option<i64>,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub userid: Option<u64>,
    #[serde(default)]
    pub userfullname: Option<String>,
    #[serde(default)]
    pub author: Option<RawAuthor>,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub wordcount: Option<u64>,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub charcount: Option<u64>,
}

impl RawRecord {
    /// Parent id with absent/null folded into the root sentinel.
    pub fn parent_id(&self) -> u64 {
        self.parent.unwrap_or(ROOT_PARENT)
    }

    pub fn author_id(&self) -> Option<u64> {
        self.userid.or_else(|| self.author.as_ref().and_then(|author| author.id))
    }

    pub fn author_name(&self) -> Option<&str> {
        self.userfullname
            .as_deref()
            .or_else(|| self.author.as_ref().and_then(|author| author.fullname.as_deref()))
    }
}

/// A single call to the text-generation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation timed out after {seconds}s")]
    Timeout { seconds: f64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("generation service returned no content")]
    EmptyResponse,

    #[error("invalid generation request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("discussion {discussion_id} not found")]
    NotFound { discussion_id: u64 },

    #[error("discussion source unavailable: {0}")]
    Unavailable(String),

    #[error("discussion source returned malformed data: {0}")]
    Malformed(String),
}

/// Text-generation collaborator: prompt in, generated text out.
///
/// Implementations own their retry policy; callers still bound every call
/// with their own timeout.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn generator_name(&self) -> String;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// LMS data collaborator: raw records for one discussion.
#[async_trait]
pub trait DiscussionSource: Send + Sync {
    fn source_name(&self) -> String;

    async fn fetch_records(&self, discussion_id: u64) -> Result<Vec<RawRecord>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_export_layout() {
        let record: RawRecord = serde_json::from_str(
            r#"{"id":"12","discussion":"3","parent":"0","userid":"44","userfullname":"A Student",
                "subject":"Re: Outline","message":"<p>hi</p>","created":"1694000000","wordcount":"1"}"#,
        )
        .unwrap();
        assert_eq!(record.id, 12);
        assert_eq!(record.parent_id(), ROOT_PARENT);
        assert_eq!(record.author_id(), Some(44));
        assert_eq!(record.author_name(), Some("A Student"));
        assert_eq!(record.created, Some(1_694_000_000));
        assert_eq!(record.wordcount, Some(1));
    }

    #[test]
    fn test_endpoint_layout_with_nested_author() {
        let record: RawRecord = serde_json::from_str(
            r#"{"id":5,"discussionid":2,"parentid":null,"timecreated":1694000100,
                "author":{"id":9,"fullname":"B Student"},"subject":"s","message":"m"}"#,
        )
        .unwrap();
        assert_eq!(record.parent_id(), ROOT_PARENT);
        assert_eq!(record.discussion, Some(2));
        assert_eq!(record.author_id(), Some(9));
        assert_eq!(record.author_name(), Some("B Student"));
        assert_eq!(record.wordcount, None);
    }
}
