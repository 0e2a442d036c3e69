use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
// Collaborator boundary lives in the interfaces crate
pub use interfaces::defs::{
    DiscussionSource, GenerationError, GenerationRequest, RawAuthor, RawRecord, SourceError,
    TextGenerator, ROOT_PARENT,
};

/// Anonymized author reference. Stable for a given LMS user, never the
/// display name or raw user id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorRef(String);

impl AuthorRef {
    pub fn for_user(user_id: u64) -> Self {
        let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("lms-user:{}", user_id).as_bytes());
        let simple = digest.simple().to_string();
        Self(format!("participant-{}", &simple[..8]))
    }

    /// Fallback for records without any author field.
    pub fn for_post(post_id: u64) -> Self {
        Self(format!("post-{}", post_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
    InstructorPrompt,
    StudentOutline,
    AiFeedback,
    StudentResponse,
    Reply,
    GeneralPost,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::InstructorPrompt => "instructor_prompt",
            PostType::StudentOutline => "student_outline",
            PostType::AiFeedback => "ai_feedback",
            PostType::StudentResponse => "student_response",
            PostType::Reply => "reply",
            PostType::GeneralPost => "general_post",
        }
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    None,
    TextFeedback,
    ImageBased,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::None => "none",
            FeedbackType::TextFeedback => "text_feedback",
            FeedbackType::ImageBased => "image_based",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAnalysis {
    pub feedback_type: FeedbackType,
    pub confidence: Confidence,
    pub feedback_score: u32,
    /// Vocabulary terms and pattern labels, in evaluation order.
    pub matched_signals: Vec<String>,
    pub word_count: usize,
    pub is_image: bool,
    pub image_reason: String,
}

impl FeedbackAnalysis {
    pub fn is_feedback(&self) -> bool {
        self.feedback_type != FeedbackType::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub post_type: PostType,
    pub is_instructor: bool,
    pub section_label: String,
    pub feedback_analysis: Option<FeedbackAnalysis>,
}

/// Sanitized projection of a [`RawRecord`]. Identity fields are fixed at
/// sanitization; `classification` is written once by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub discussion: Option<u64>,
    pub parent: u64,
    pub author: AuthorRef,
    pub subject: String,
    pub body: String,
    pub word_count: usize,
    pub reported_word_count: Option<u64>,
    pub reported_char_count: Option<u64>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub content_present: bool,
    pub links: Vec<String>,
    /// `<img>` elements seen in the markup before it was stripped.
    pub embedded_images: usize,
    pub classification: Option<Classification>,
}

impl Post {
    pub fn is_root(&self) -> bool {
        self.parent == ROOT_PARENT
    }

    pub fn char_len(&self) -> usize {
        self.body.chars().count()
    }

    pub fn post_type(&self) -> Option<PostType> {
        self.classification.as_ref().map(|c| c.post_type)
    }

    pub fn section_label(&self) -> &str {
        self.classification
            .as_ref()
            .map(|c| c.section_label.as_str())
            .unwrap_or(crate::section::UNKNOWN_SECTION)
    }

    pub fn is_instructor(&self) -> bool {
        self.classification.as_ref().is_some_and(|c| c.is_instructor)
    }

    pub fn feedback_analysis(&self) -> Option<&FeedbackAnalysis> {
        self.classification.as_ref().and_then(|c| c.feedback_analysis.as_ref())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("Parse error at {location}: {message}")]
    Parse { location: String, message: String },

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Discussion source error: {0}")]
    Source(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("General error: {0}")]
    General(String),
}

impl From<SourceError> for FeedbackError {
    fn from(error: SourceError) -> Self {
        FeedbackError::Source(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedbackError>;
