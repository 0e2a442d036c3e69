#![allow(dead_code)]

use discussion_feedback::{parse_export, prepare_discussion, ClassifierThresholds, DiscussionThreads, RawRecord};
use std::sync::Once;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub const PROMPT: &str = "Reply to this post with a thesis and three supporting reasons. Think about the benefits of the internet versus the risks to privacy and online fraud. Write clearly, use evidence from your reading, and respond to two peers before the deadline on Friday evening.";
pub const OUTLINE_A: &str = "Group A outline. Position: the internet does more good than harm. Reason1: access to knowledge for everyone. Reason2: remote work options.";
pub const OUTLINE_B: &str = "Group B outline. Position: risks outweigh benefits today. Reason1: fraud costs families dearly. Reason2: data leaks happen often.";
pub const PEER_FEEDBACK: &str = "Great work on your outline. Consider a clearer thesis statement and more supporting evidence in the body paragraph.";
pub const SHORT_REPLY: &str = "Thanks, I will post mine soon.";

/// One discussion in the nested export layout: an instructor prompt, two
/// outline submissions, peer feedback on the first, a short reply and a
/// trivial post.
pub fn export_json() -> String {
    serde_json::json!([[
        {"id": 1, "discussion": 7, "parent": 0, "userid": 1, "userfullname": "Prof Instructor",
         "subject": "Week 3 Outline Exercise", "message": format!("<p>{}</p>", PROMPT),
         "created": 1_694_000_000, "wordcount": 44},
        {"id": 2, "discussion": 7, "parent": 1, "userid": 10, "userfullname": "Ada Student",
         "subject": "Re: Week 3 Outline Exercise", "message": format!("<p>{}</p>", OUTLINE_A),
         "created": 1_694_003_600, "wordcount": 21},
        {"id": 3, "discussion": 7, "parent": "1", "userid": "11", "userfullname": "Ben Student",
         "subject": "Re: Week 3 Outline Exercise", "message": format!("<div>{}</div>", OUTLINE_B),
         "created": "1694007200", "wordcount": "18"},
        {"id": 4, "discussion": 7, "parent": 2, "userid": 11, "userfullname": "Ben Student",
         "subject": "Re: Week 3 Outline Exercise", "message": PEER_FEEDBACK,
         "created": 1_694_007_300, "wordcount": 18},
        {"id": 5, "discussion": 7, "parent": 1, "userid": 12, "userfullname": "Cy Student",
         "subject": "Re: Week 3 Outline Exercise", "message": "<p>ok</p>",
         "created": 1_694_007_400, "wordcount": 1},
        {"id": 6, "discussion": 7, "parent": 1, "userid": 13, "userfullname": "Dee Student",
         "subject": "Re: Week 3 Outline Exercise", "message": SHORT_REPLY,
         "created": 1_694_007_500, "wordcount": 6}
    ]])
    .to_string()
}

pub fn records() -> Vec<RawRecord> {
    parse_export(&export_json()).expect("fixture export parses")
}

pub fn threads() -> DiscussionThreads {
    prepare_discussion(&records(), &ClassifierThresholds::default())
}

pub const VALID_FEEDBACK: &str = r#"{"overall_score": "6", "strengths": ["states a position"], "areas_for_improvement": ["evidence is general"], "suggestions": ["add one statistic"]}"#;
