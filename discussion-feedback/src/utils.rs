/// Text processing utilities
pub mod text {
    /// Truncate to `max_chars` characters, appending `...` when anything was cut.
    pub fn truncate_chars(text: &str, max_chars: usize) -> String {
        match text.char_indices().nth(max_chars) {
            Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
            None => text.to_string(),
        }
    }

    /// First `max_chars` characters, no marker.
    pub fn head_chars(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((byte_index, _)) => &text[..byte_index],
            None => text,
        }
    }

    /// Collapse every whitespace run to a single space and trim.
    pub fn normalize_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Unwrap a Markdown code fence (```` ``` ```` or ```` ```json ````) around
    /// generated output. Text without a fence is returned trimmed.
    pub fn strip_code_fences(text: &str) -> &str {
        let trimmed = text.trim();
        let Some(rest) = trimmed.strip_prefix("```") else {
            return trimmed;
        };
        // Drop the info string (`json`, `markdown`, ...) on the opening line
        let body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        };
        body.trim_end().strip_suffix("```").unwrap_or(body).trim()
    }
}

/// Time utilities
pub mod time {
    use chrono::{DateTime, Utc};

    pub fn from_epoch(seconds: i64) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(seconds, 0)
    }

    pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
        timestamp.format("%Y-%m-%d %H:%M").to_string()
    }

    /// Hours between two instants, rounded to one decimal.
    pub fn hours_between(start: &DateTime<Utc>, end: &DateTime<Utc>) -> f64 {
        let seconds = end.signed_duration_since(*start).num_seconds() as f64;
        crate::utils::round1(seconds / 3600.0)
    }
}

/// Round to one decimal place, halves away from zero.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(text::truncate_chars("short", 50), "short");
        assert_eq!(text::truncate_chars("abcdef", 3), "abc...");
        assert_eq!(text::truncate_chars("ééééé", 2), "éé...");
        assert_eq!(text::head_chars("ééééé", 2), "éé");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(text::strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(text::strip_code_fences("```\n{}\n```\n"), "{}");
        assert_eq!(text::strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
        assert_eq!(text::strip_code_fences("```json\n{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_time_helpers() {
        let start = time::from_epoch(1_694_000_000).unwrap();
        let end = time::from_epoch(1_694_000_000 + 5_400).unwrap();
        assert_eq!(time::hours_between(&start, &end), 1.5);
        assert_eq!(time::format_timestamp(&start), "2023-09-06 11:33");
        assert_eq!(round1(60.0), 60.0);
        assert_eq!(round1(2.449), 2.4);
    }
}
