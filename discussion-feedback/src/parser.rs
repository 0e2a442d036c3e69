use crate::types::{AuthorRef, FeedbackError, Post, RawRecord, Result};
use crate::utils::{text, time};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Minimum plain-text length for a post to count as content.
pub const MIN_CONTENT_CHARS: usize = 15;

/// Bodies that never count as content regardless of length.
pub const TRIVIAL_TOKENS: [&str; 5] = ["1", "test", "ok", "yes", "no"];

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<]+?>").expect("Invalid tag regex"));

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']+)["']"#).expect("Invalid link regex")
});

static IMG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<img\b").expect("Invalid image regex"));

/// Decode an export document into raw records.
///
/// Accepts a flat array of records or a single-element array wrapping that
/// array. Anything else is a [`FeedbackError::Parse`] naming the offending
/// location (`$`, `$[3]`, `$[0][3]`, or a line/column for syntax errors).
pub fn parse_export(json: &str) -> Result<Vec<RawRecord>> {
    let document: Value = serde_json::from_str(json).map_err(|e| FeedbackError::Parse {
        location: format!("line {}, column {}", e.line(), e.column()),
        message: e.to_string(),
    })?;

    let mut outer = match document {
        Value::Array(items) => items,
        other => {
            return Err(FeedbackError::Parse {
                location: "$".to_string(),
                message: format!("expected an array of records, found {}", json_kind(&other)),
            })
        }
    };

    let extra = outer.len().saturating_sub(1);
    let (items, prefix) = match outer.first_mut() {
        Some(Value::Array(inner)) => {
            if extra > 0 {
                warn!("Export wraps records in a nested array; ignoring {} trailing element(s)", extra);
            }
            (std::mem::take(inner), "$[0]")
        }
        _ => (outer, "$"),
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let record: RawRecord = serde_json::from_value(item).map_err(|e| FeedbackError::Parse {
            location: format!("{}[{}]", prefix, index),
            message: e.to_string(),
        })?;
        records.push(record);
    }

    debug!("Decoded {} raw records", records.len());
    Ok(records)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Strip markup, decode the four common entities, collapse whitespace.
pub fn clean_text(markup: &str) -> String {
    if markup.is_empty() {
        return String::new();
    }
    let stripped = TAG_RE.replace_all(markup, "");
    // `&amp;` last so an escaped entity stays literal text
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    text::normalize_whitespace(&decoded)
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn extract_links(markup: &str) -> Vec<String> {
    LINK_RE
        .captures_iter(markup)
        .filter_map(|captures| captures.get(1))
        .map(|href| href.as_str().to_string())
        .collect()
}

pub fn count_embedded_images(markup: &str) -> usize {
    IMG_RE.find_iter(markup).count()
}

pub fn is_trivial(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    TRIVIAL_TOKENS.contains(&lowered.as_str())
}

/// Converts raw export records into anonymized, plain-text [`Post`]s.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    min_content_chars: usize,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self {
            min_content_chars: MIN_CONTENT_CHARS,
        }
    }

    pub fn with_min_content_chars(mut self, min_content_chars: usize) -> Self {
        self.min_content_chars = min_content_chars;
        self
    }

    /// Sanitize records, dropping duplicates and posts without content.
    /// Output keeps the input order.
    pub fn sanitize(&self, records: &[RawRecord]) -> Vec<Post> {
        let mut seen_ids = HashSet::new();
        let mut posts = Vec::with_capacity(records.len());
        let mut empty = 0usize;

        for record in records {
            if !seen_ids.insert(record.id) {
                debug!("Skipping duplicate record with id {}", record.id);
                continue;
            }
            let post = self.sanitize_record(record);
            if post.content_present {
                posts.push(post);
            } else {
                debug!("Dropping post {} without content", post.id);
                empty += 1;
            }
        }

        info!(
            "Sanitized {} records into {} posts ({} without content)",
            records.len(),
            posts.len(),
            empty
        );
        posts
    }

    /// Decode an export document and sanitize it in one step.
    pub fn sanitize_export(&self, json: &str) -> Result<Vec<Post>> {
        let records = parse_export(json)?;
        Ok(self.sanitize(&records))
    }

    /// Project one record without filtering; `content_present` reports
    /// whether [`Sanitizer::sanitize`] would keep it.
    pub fn sanitize_record(&self, record: &RawRecord) -> Post {
        let body = clean_text(&record.message);
        let subject = clean_text(&record.subject);
        let content_present = self.has_content(&body);

        let author = match record.author_id() {
            Some(user_id) => AuthorRef::for_user(user_id),
            None => AuthorRef::for_post(record.id),
        };

        Post {
            id: record.id,
            discussion: record.discussion,
            parent: record.parent_id(),
            author,
            subject,
            word_count: count_words(&body),
            body,
            reported_word_count: record.wordcount,
            reported_char_count: record.charcount,
            created: record.created.filter(|&s| s > 0).and_then(time::from_epoch),
            modified: record.modified.filter(|&s| s > 0).and_then(time::from_epoch),
            content_present,
            links: extract_links(&record.message),
            embedded_images: count_embedded_images(&record.message),
            classification: None,
        }
    }

    fn has_content(&self, plain: &str) -> bool {
        plain.chars().count() > self.min_content_chars && !is_trivial(plain)
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Anonymized token → display name, for local report rendering only.
///
/// Built from raw records so the Post graph itself never carries names.
#[derive(Debug, Clone, Default)]
pub struct ParticipantDirectory {
    names: HashMap<AuthorRef, String>,
}

impl ParticipantDirectory {
    pub fn from_records(records: &[RawRecord]) -> Self {
        let mut names = HashMap::new();
        for record in records {
            if let (Some(user_id), Some(name)) = (record.author_id(), record.author_name()) {
                let name = name.trim();
                if !name.is_empty() {
                    names.entry(AuthorRef::for_user(user_id)).or_insert_with(|| name.to_string());
                }
            }
        }
        Self { names }
    }

    pub fn display_name(&self, author: &AuthorRef) -> Option<&str> {
        self.names.get(author).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
