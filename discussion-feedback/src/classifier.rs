use crate::section::extract_section;
use crate::types::{Classification, Confidence, FeedbackAnalysis, FeedbackType, Post, PostType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Length and score cutoffs used by the heuristics. The defaults reproduce
/// the established behaviour; none of them is statistically derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    /// Plain-text length a post must exceed to count as content.
    pub min_content_chars: usize,
    /// Root post body length above which it reads as the instructor prompt.
    pub instructor_prompt_chars: usize,
    /// Root post body length above which the author is taken as instructor.
    pub instructor_chars: usize,
    pub high_feedback_score: u32,
    pub medium_feedback_score: u32,
    pub medium_word_count: usize,
    pub long_review_word_count: usize,
    pub image_very_short_words: usize,
    pub image_indicator_words: usize,
    pub image_subject_words: usize,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            min_content_chars: 15,
            instructor_prompt_chars: 200,
            instructor_chars: 300,
            high_feedback_score: 3,
            medium_feedback_score: 1,
            medium_word_count: 30,
            long_review_word_count: 100,
            image_very_short_words: 5,
            image_indicator_words: 15,
            image_subject_words: 10,
        }
    }
}

pub const OUTLINE_MARKERS: [&str; 3] = ["outline", "position:", "reason1"];
pub const AI_MENTIONS: [&str; 3] = ["deepseek", "chatgpt", "ai"];
pub const STANCE_MARKERS: [&str; 2] = ["agree", "disagree"];

pub const INSTRUCTOR_PHRASES: [&str; 4] = [
    "first spend",
    "reply to this post",
    "pair up and discuss",
    "you are an experienced",
];

pub const FEEDBACK_VOCABULARY: [&str; 26] = [
    "your outline",
    "this outline",
    "great work",
    "well done",
    "excellent",
    "good job",
    "consider",
    "suggestion",
    "feedback",
    "improvement",
    "strengthen",
    "clarify",
    "expand",
    "develop",
    "thesis statement",
    "topic sentence",
    "supporting evidence",
    "conclusion",
    "body paragraph",
    "introduction",
    "structure",
    "organization",
    "flow",
    "transition",
    "coherence",
    "clarity",
];

pub const REVIEW_TERMS: [&str; 3] = ["feedback", "comment", "review"];

pub const IMAGE_INDICATORS: [&str; 9] = [
    "attached",
    "image",
    "picture",
    "screenshot",
    "photo",
    "see above",
    "see below",
    "shown",
    "displayed",
];

pub const ADVICE_SIGNAL: &str = "suggestion pattern";
pub const SUMMARY_SIGNAL: &str = "summary pattern";

static ADVICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"you (could|should|might|can) (consider|try|add|improve)").expect("Invalid advice regex")
});

static SUMMARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(overall|in general|to summarize)").expect("Invalid summary regex"));

static IMAGE_MARKUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<img|\.jpg|\.png|\.jpeg|\.gif").expect("Invalid image markup regex"));

/// Normalized view of a post that the post-type rules read.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub body_lower: &'a str,
    pub char_len: usize,
    pub is_root_of_discussion: bool,
    pub has_parent: bool,
    pub thresholds: &'a ClassifierThresholds,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub post_type: PostType,
    pub evidence: String,
}

impl RuleMatch {
    fn new(post_type: PostType, evidence: impl Into<String>) -> Self {
        Self {
            post_type,
            evidence: evidence.into(),
        }
    }
}

pub type PostTypeRule = fn(&RuleInput<'_>) -> Option<RuleMatch>;

/// Post-type rules, first match wins. Posts matching none are `general_post`.
pub const POST_TYPE_RULES: [(&str, PostTypeRule); 5] = [
    ("outline_marker", outline_rule),
    ("ai_mention", ai_mention_rule),
    ("long_discussion_root", instructor_prompt_rule),
    ("stance", stance_rule),
    ("reply", reply_rule),
];

fn first_term<'t>(haystack: &str, terms: &[&'t str]) -> Option<&'t str> {
    terms.iter().copied().find(|term| haystack.contains(term))
}

pub fn outline_rule(input: &RuleInput<'_>) -> Option<RuleMatch> {
    first_term(input.body_lower, &OUTLINE_MARKERS).map(|term| RuleMatch::new(PostType::StudentOutline, term))
}

pub fn ai_mention_rule(input: &RuleInput<'_>) -> Option<RuleMatch> {
    first_term(input.body_lower, &AI_MENTIONS).map(|term| RuleMatch::new(PostType::AiFeedback, term))
}

pub fn instructor_prompt_rule(input: &RuleInput<'_>) -> Option<RuleMatch> {
    (input.is_root_of_discussion && input.char_len > input.thresholds.instructor_prompt_chars).then(|| {
        RuleMatch::new(
            PostType::InstructorPrompt,
            format!("root post of {} chars", input.char_len),
        )
    })
}

pub fn stance_rule(input: &RuleInput<'_>) -> Option<RuleMatch> {
    first_term(input.body_lower, &STANCE_MARKERS).map(|term| RuleMatch::new(PostType::StudentResponse, term))
}

pub fn reply_rule(input: &RuleInput<'_>) -> Option<RuleMatch> {
    input.has_parent.then(|| RuleMatch::new(PostType::Reply, "has parent"))
}

/// Evaluate [`POST_TYPE_RULES`] in order.
pub fn classify_post_type(input: &RuleInput<'_>) -> RuleMatch {
    POST_TYPE_RULES
        .iter()
        .find_map(|(_, rule)| rule(input))
        .unwrap_or_else(|| RuleMatch::new(PostType::GeneralPost, "no rule matched"))
}

/// Instructor authorship: a known instruction phrase, or a long root post.
pub fn is_instructor_post(body_lower: &str, char_len: usize, parent_is_root: bool, thresholds: &ClassifierThresholds) -> bool {
    first_term(body_lower, &INSTRUCTOR_PHRASES).is_some()
        || (char_len > thresholds.instructor_chars && parent_is_root)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageVerdict {
    pub is_image: bool,
    pub confidence: Confidence,
    pub reason: String,
}

impl ImageVerdict {
    fn image(confidence: Confidence, reason: impl Into<String>) -> Self {
        Self {
            is_image: true,
            confidence,
            reason: reason.into(),
        }
    }
}

/// Stateless post classifier. Identical inputs always yield identical tags.
#[derive(Debug, Clone, Default)]
pub struct PostClassifier {
    thresholds: ClassifierThresholds,
}

impl PostClassifier {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ClassifierThresholds {
        &self.thresholds
    }

    /// Return the post with its classification fields populated.
    pub fn classify(&self, mut post: Post, is_root_of_discussion: bool) -> Post {
        post.classification = Some(self.classification_for(&post, is_root_of_discussion));
        post
    }

    pub fn classification_for(&self, post: &Post, is_root_of_discussion: bool) -> Classification {
        let body_lower = post.body.to_lowercase();
        let char_len = post.char_len();

        let rule_match = classify_post_type(&RuleInput {
            body_lower: &body_lower,
            char_len,
            is_root_of_discussion,
            has_parent: !post.is_root(),
            thresholds: &self.thresholds,
        });
        debug!(
            "Post {} classified as {} ({})",
            post.id, rule_match.post_type, rule_match.evidence
        );

        // Roots open the discussion; only replies can carry feedback.
        let feedback_analysis = if post.is_root() {
            None
        } else {
            Some(self.analyze_feedback(&post.body, &post.subject, post.word_count, post.embedded_images))
        };

        Classification {
            post_type: rule_match.post_type,
            is_instructor: is_instructor_post(&body_lower, char_len, post.is_root(), &self.thresholds),
            section_label: extract_section(&format!("{} {}", post.body, post.subject)),
            feedback_analysis,
        }
    }

    /// Score feedback vocabulary and patterns, then decide the feedback type.
    pub fn analyze_feedback(&self, body: &str, subject: &str, word_count: usize, embedded_images: usize) -> FeedbackAnalysis {
        let body_lower = body.to_lowercase();
        let mut feedback_score = 0u32;
        let mut matched_signals = Vec::new();

        for term in FEEDBACK_VOCABULARY {
            if body_lower.contains(term) {
                feedback_score += 1;
                matched_signals.push(term.to_string());
            }
        }
        if ADVICE_RE.is_match(&body_lower) {
            feedback_score += 2;
            matched_signals.push(ADVICE_SIGNAL.to_string());
        }
        if SUMMARY_RE.is_match(&body_lower) {
            feedback_score += 1;
            matched_signals.push(SUMMARY_SIGNAL.to_string());
        }

        let image = self.detect_image(body, subject, word_count, embedded_images);
        let t = &self.thresholds;

        let (feedback_type, confidence) = if image.is_image {
            (FeedbackType::ImageBased, image.confidence)
        } else if feedback_score >= t.high_feedback_score {
            (FeedbackType::TextFeedback, Confidence::High)
        } else if feedback_score >= t.medium_feedback_score && word_count > t.medium_word_count {
            (FeedbackType::TextFeedback, Confidence::Medium)
        } else if word_count > t.long_review_word_count && first_term(&body_lower, &REVIEW_TERMS).is_some() {
            (FeedbackType::TextFeedback, Confidence::Medium)
        } else {
            (FeedbackType::None, Confidence::Low)
        };

        FeedbackAnalysis {
            feedback_type,
            confidence,
            feedback_score,
            matched_signals,
            word_count,
            is_image: image.is_image,
            image_reason: image.reason,
        }
    }

    /// Near-empty or image-referencing posts usually carry an attachment
    /// whose content the export does not include.
    pub fn detect_image(&self, body: &str, subject: &str, word_count: usize, embedded_images: usize) -> ImageVerdict {
        let t = &self.thresholds;
        let body_lower = body.to_lowercase();

        if word_count <= t.image_very_short_words {
            return ImageVerdict::image(Confidence::High, "very_short_message");
        }
        if word_count <= t.image_indicator_words {
            if let Some(indicator) = first_term(&body_lower, &IMAGE_INDICATORS) {
                return ImageVerdict::image(Confidence::High, format!("short_message_with_{}", indicator));
            }
        }
        if embedded_images > 0 || IMAGE_MARKUP_RE.is_match(body) {
            return ImageVerdict::image(Confidence::High, "image_html_tags");
        }
        if word_count <= t.image_subject_words && first_term(&subject.to_lowercase(), &REVIEW_TERMS).is_some() {
            return ImageVerdict::image(Confidence::Medium, "short_with_feedback_subject");
        }

        ImageVerdict {
            is_image: false,
            confidence: Confidence::Low,
            reason: "sufficient_text_content".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Sanitizer;
    use crate::types::RawRecord;

    fn post(id: u64, parent: u64, subject: &str, message: &str) -> Post {
        let record: RawRecord = serde_json::from_value(serde_json::json!({
            "id": id, "parent": parent, "subject": subject, "message": message, "userid": 50 + id,
        }))
        .unwrap();
        Sanitizer::new().sanitize_record(&record)
    }

    fn rule_input<'a>(body_lower: &'a str, is_root: bool, has_parent: bool, t: &'a ClassifierThresholds) -> RuleInput<'a> {
        RuleInput {
            body_lower,
            char_len: body_lower.chars().count(),
            is_root_of_discussion: is_root,
            has_parent,
            thresholds: t,
        }
    }

    #[test]
    fn test_each_post_type_rule_in_isolation() {
        let t = ClassifierThresholds::default();
        let long_root = "x".repeat(201);

        assert_eq!(outline_rule(&rule_input("my position: yes", false, true, &t)).unwrap().evidence, "position:");
        assert!(outline_rule(&rule_input("no markers here", false, true, &t)).is_none());
        assert_eq!(ai_mention_rule(&rule_input("chatgpt reply", false, true, &t)).unwrap().evidence, "chatgpt");
        assert!(instructor_prompt_rule(&rule_input(&long_root, true, false, &t)).is_some());
        assert!(instructor_prompt_rule(&rule_input(&long_root, false, false, &t)).is_none());
        assert!(instructor_prompt_rule(&rule_input(&"x".repeat(200), true, false, &t)).is_none());
        assert_eq!(stance_rule(&rule_input("i disagree", false, true, &t)).unwrap().post_type, PostType::StudentResponse);
        assert!(reply_rule(&rule_input("hello", false, false, &t)).is_none());
    }

    #[test]
    fn test_rule_precedence() {
        let t = ClassifierThresholds::default();
        // Outline beats the AI mention and stance markers.
        let both = "outline written with chatgpt; i agree";
        assert_eq!(classify_post_type(&rule_input(both, false, true, &t)).post_type, PostType::StudentOutline);
        // "ai" is a bare substring check, so "said" counts.
        assert_eq!(classify_post_type(&rule_input("she said so", false, true, &t)).post_type, PostType::AiFeedback);
        assert_eq!(classify_post_type(&rule_input("we agree", false, true, &t)).post_type, PostType::StudentResponse);
        assert_eq!(classify_post_type(&rule_input("thanks friend", false, true, &t)).post_type, PostType::Reply);
        assert_eq!(classify_post_type(&rule_input("thanks friend", false, false, &t)).post_type, PostType::GeneralPost);
    }

    #[test]
    fn test_instructor_detection() {
        let t = ClassifierThresholds::default();
        assert!(is_instructor_post("please reply to this post with your draft", 40, false, &t));
        assert!(is_instructor_post(&"y".repeat(301), 301, true, &t));
        assert!(!is_instructor_post(&"y".repeat(301), 301, false, &t));
        assert!(!is_instructor_post("short root", 10, true, &t));
    }

    #[test]
    fn test_image_short_message_beats_keyword_rule() {
        let classifier = PostClassifier::default();
        let analysis = classifier.analyze_feedback("See attached screenshot", "Re: Outline", 3, 0);
        assert_eq!(analysis.feedback_type, FeedbackType::ImageBased);
        assert_eq!(analysis.confidence, Confidence::High);
        assert_eq!(analysis.image_reason, "very_short_message");
    }

    #[test]
    fn test_image_rules_in_order() {
        let c = PostClassifier::default();
        let verdict = c.detect_image("here is the picture of my draft for you", "Re: x", 9, 0);
        assert_eq!(verdict.reason, "short_message_with_picture");

        let long_with_file = "my draft is in the file named draft_final.png which you can open from the course page now please";
        let verdict = c.detect_image(long_with_file, "Re: x", 19, 0);
        assert_eq!(verdict.reason, "image_html_tags");

        let verdict = c.detect_image("thanks for the help with my draft today", "Feedback", 8, 0);
        assert_eq!(verdict.confidence, Confidence::Medium);
        assert_eq!(verdict.reason, "short_with_feedback_subject");

        let verdict = c.detect_image("thanks for the help with my draft today", "Re: x", 8, 1);
        assert_eq!(verdict.reason, "image_html_tags");

        let verdict = c.detect_image("thanks for the help with my draft today", "Re: x", 8, 0);
        assert!(!verdict.is_image);
        assert_eq!(verdict.confidence, Confidence::Low);
    }

    #[test]
    fn test_text_feedback_confidence_levels() {
        let c = PostClassifier::default();
        let high = "Great work on your outline. Consider the thesis statement and the topic sentence.";
        let analysis = c.analyze_feedback(high, "Re: x", 14, 0);
        assert_eq!(analysis.feedback_type, FeedbackType::TextFeedback);
        assert_eq!(analysis.confidence, Confidence::High);
        assert_eq!(
            analysis.matched_signals,
            vec!["your outline", "great work", "consider", "thesis statement", "topic sentence"]
        );

        let words = "word ".repeat(31);
        let medium = format!("{} clarity", words);
        let analysis = c.analyze_feedback(&medium, "Re: x", 32, 0);
        assert_eq!(analysis.feedback_score, 1);
        assert_eq!(analysis.confidence, Confidence::Medium);

        let analysis = c.analyze_feedback(&words, "Re: x", 31, 0);
        assert_eq!(analysis.feedback_type, FeedbackType::None);
        assert!(!analysis.is_feedback());
    }

    #[test]
    fn test_advice_and_summary_patterns_score() {
        let c = PostClassifier::default();
        let analysis = c.analyze_feedback(
            "you could try a stronger hook here and overall it reads nicely for the reader",
            "Re: x",
            15,
            0,
        );
        assert_eq!(analysis.feedback_score, 3);
        assert_eq!(analysis.matched_signals, vec![ADVICE_SIGNAL, SUMMARY_SIGNAL]);
    }

    #[test]
    fn test_classify_populates_fields_and_is_deterministic() {
        let c = PostClassifier::default();
        let reply = post(2, 1, "Group 4 outline", "My outline: Position: I agree with the premise and here are reasons.");
        let first = c.classify(reply.clone(), false);
        let second = c.classify(reply, false);
        assert_eq!(first, second);

        let classification = first.classification.unwrap();
        assert_eq!(classification.post_type, PostType::StudentOutline);
        assert_eq!(classification.section_label, "4");
        assert!(!classification.is_instructor);
        assert!(classification.feedback_analysis.is_some());
    }

    #[test]
    fn test_roots_carry_no_feedback_analysis() {
        let c = PostClassifier::default();
        let root = c.classify(post(1, 0, "Topic", "Reply to this post with your thoughts on the topic."), true);
        let classification = root.classification.unwrap();
        assert!(classification.is_instructor);
        assert!(classification.feedback_analysis.is_none());
    }
}
