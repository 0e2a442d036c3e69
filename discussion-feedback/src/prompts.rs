use crate::aggregator::FeedbackEntry;
use crate::pipeline::{Candidate, CandidateFeedback, CandidateOutcome, FeedbackResult, MergeInputs};
use crate::types::Result;
use crate::utils::text;
use serde_json::json;
use std::fmt::Write as _;

/// Topic used when none is configured.
pub const DEFAULT_TOPIC: &str = "Internet benefits vs risks - To what extent do you agree or disagree that the internet's benefits outweigh privacy and cybercrime risks?";

/// Headings the merged report must contain, matched case-insensitively.
pub const REQUIRED_SECTIONS: [(&str, &str); 4] = [
    ("Executive Summary", "executive summary"),
    ("Engagement & Participation Analysis", "engagement"),
    ("Quality of Outlines & Feedback", "quality"),
    ("Key Insights & Pedagogical Recommendations", "recommendation"),
];

const MESSAGE_EXCERPT_CHARS: usize = 800;
const RAW_FEEDBACK_EXCERPT_CHARS: usize = 1500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Stage one: evaluate a single outline against the sample standard.
pub fn individual_prompt(topic: &str, sample_standard: &str, candidate: &Candidate) -> PromptPair {
    let sample = if sample_standard.trim().is_empty() {
        "(no sample outline provided)"
    } else {
        sample_standard
    };

    let system = format!(
        r#"You are an expert writing instructor providing detailed feedback on student essay outlines.

CONTEXT:
- Topic: "{topic}"
- This is an outline writing exercise where students should create structured outlines with thesis statements, topic sentences, and supporting examples.

SAMPLE OUTLINE STANDARDS (for reference):
{sample}

Evaluate the student's outline and give constructive feedback on:
1. THESIS STATEMENT QUALITY: clear, specific, arguable, takes a position
2. STRUCTURE AND ORGANIZATION: introduction, body paragraphs, conclusion, topic sentences, logical flow
3. EVIDENCE AND EXAMPLES: specific, relevant, varied support for each point
4. COHERENCE AND DEPTH: every point tied to the thesis, counterarguments addressed
5. TECHNICAL ASPECTS: grammar, clarity, academic tone

Respond with JSON only, in this format:
{{
    "overall_score": "score out of 10",
    "strengths": ["list of specific strengths"],
    "areas_for_improvement": ["list of specific issues to address"],
    "thesis_feedback": "specific feedback on thesis statement",
    "structure_feedback": "feedback on outline organization",
    "evidence_feedback": "feedback on examples and support",
    "suggestions": ["specific actionable suggestions for improvement"],
    "comparison_to_sample": "how this outline compares to the sample standard"
}}"#
    );

    let user = format!(
        "Please evaluate this student outline:\n\nPARTICIPANT: {}\nWORD COUNT: {}\n\nOUTLINE CONTENT:\n{}",
        candidate.participant, candidate.word_count, candidate.text
    );

    PromptPair { system, user }
}

/// Stage two: one synthesis call over every individual result. Failed
/// candidates are left out; fallback records go in as raw text.
pub fn aggregate_prompt(results: &[CandidateFeedback]) -> Result<PromptPair> {
    let system = r#"You are an expert writing instructor analyzing patterns across multiple student outlines for the same assignment.

Based on the individual feedback provided for each student, identify:
1. COMMON STRENGTHS across students
2. MOST FREQUENT ISSUES that need addressing
3. TEACHING PRIORITIES for the next class
4. SPECIFIC EXAMPLES of good practices to highlight
5. RECOMMENDATIONS for class-wide interventions

Respond with JSON only, in this format:
{
    "class_overview": {
        "total_students": "number",
        "average_performance": "assessment",
        "overall_readiness": "assessment for next stage"
    },
    "common_strengths": ["list of patterns in good work"],
    "frequent_issues": [
        {
            "issue": "specific problem",
            "frequency": "how many students",
            "impact": "why this matters",
            "solution": "teaching strategy"
        }
    ],
    "teaching_priorities": ["what to focus on in next class"],
    "exemplary_work": ["examples of student work to highlight"],
    "intervention_needed": ["students who need individual help"],
    "class_discussion_topics": ["topics for peer discussion"],
    "next_steps": ["recommended follow-up activities"]
}"#
    .to_string();

    let mut summaries = Vec::new();
    let mut detailed = Vec::new();
    let mut unstructured = Vec::new();
    for result in results {
        let CandidateOutcome::Completed { feedback } = &result.outcome else {
            continue;
        };
        match feedback {
            FeedbackResult::Structured(structured) => {
                summaries.push(json!({
                    "participant": result.participant,
                    "score": structured.overall_score,
                    "strengths": structured.strengths,
                    "issues": structured.areas_for_improvement,
                }));
                detailed.push(json!({
                    "participant": result.participant,
                    "post_id": result.post_id,
                    "feedback": structured,
                }));
            }
            FeedbackResult::Fallback(fallback) => {
                unstructured.push(format!(
                    "PARTICIPANT: {}\n{}",
                    result.participant,
                    text::truncate_chars(&fallback.raw_feedback, RAW_FEEDBACK_EXCERPT_CHARS)
                ));
            }
        }
    }

    let mut user = format!(
        "Analyze these student outline feedbacks:\n\nTOTAL STUDENTS: {}\n\nINDIVIDUAL FEEDBACK SUMMARY:\n{}\n\nDETAILED FEEDBACK DATA:\n{}",
        summaries.len() + unstructured.len(),
        serde_json::to_string_pretty(&summaries)?,
        serde_json::to_string_pretty(&detailed)?
    );
    if !unstructured.is_empty() {
        user.push_str("\n\nUNSTRUCTURED FEEDBACK (could not be parsed, included verbatim):\n");
        user.push_str(&unstructured.join("\n---\n"));
    }

    Ok(PromptPair { system, user })
}

/// The most detailed feedback entries, longest first, ties by post id.
pub fn merge_sample(entries: &[FeedbackEntry], cap: usize) -> Vec<&FeedbackEntry> {
    let mut sample: Vec<&FeedbackEntry> = entries.iter().collect();
    sample.sort_by(|a, b| b.word_count.cmp(&a.word_count).then(a.post_id.cmp(&b.post_id)));
    sample.truncate(cap);
    sample
}

/// Stage three: combine the overview and feedback-collection artifacts into
/// a Markdown narrative.
pub fn merge_prompt(inputs: &MergeInputs, sample_cap: usize) -> PromptPair {
    let mut system = String::from(
        "You are an expert educational analyst. Synthesize data from an LMS forum discussion into a final report.\n\n\
         Based on the provided data, generate a report with these sections:\n",
    );
    let guidance = [
        "High-level overview of engagement and quality.",
        "Compare outline submissions vs. feedback provision. Identify active and inactive sections.",
        "Infer quality from word counts and content. Assess whether feedback is constructive and cite strong examples.",
        "Key takeaways and 2-3 actionable recommendations for the instructor.",
    ];
    for (index, ((heading, _), hint)) in REQUIRED_SECTIONS.iter().zip(guidance).enumerate() {
        let _ = writeln!(system, "{}. **{}**: {}", index + 1, heading, hint);
    }
    system.push_str("\nStructure your response with Markdown headings. Be data-driven and provide actionable insights.");

    PromptPair {
        system,
        user: merge_user_prompt(inputs, sample_cap),
    }
}

fn merge_user_prompt(inputs: &MergeInputs, sample_cap: usize) -> String {
    let report = &inputs.overview;
    let overview = &report.overview;
    let feedback = &inputs.feedback;
    let mut prompt = String::from("# Comprehensive Analysis of Forum Discussion\n\n## 1. Contextual Overview\n");

    let _ = writeln!(prompt, "- **Discussion Title**: {}", overview.discussion_title);
    let _ = writeln!(prompt, "- **Total Posts**: {}", overview.total_posts);
    let _ = writeln!(prompt, "- **Unique Participants**: {}", overview.unique_participants);
    let _ = writeln!(
        prompt,
        "- **Date Range**: {} to {}",
        overview.date_range.start.as_deref().unwrap_or("Unknown"),
        overview.date_range.end.as_deref().unwrap_or("Unknown")
    );

    prompt.push_str("\n## 2. Outline Submission Analysis\n");
    let _ = writeln!(prompt, "- **Total Outlines Identified**: {}", report.outlines.summary.total_outlines);
    prompt.push_str("- **Submission Summary by Section**:\n");
    for (section, stats) in &report.outlines.by_section {
        let _ = writeln!(
            prompt,
            "  - **Section {}**: {} students, {} total words, {} avg words.",
            section, stats.participant_count, stats.total_words, stats.average_words
        );
    }

    prompt.push_str("\n## 3. AI & Peer Feedback Analysis\n");
    let _ = writeln!(prompt, "- **Total Feedback Posts**: {}", feedback.summary.total_feedback_posts);
    let _ = writeln!(prompt, "- **Text-based Feedback**: {}", feedback.summary.total_text_feedback);
    let _ = writeln!(prompt, "- **Image-based Feedback (Detected)**: {}", feedback.summary.total_image_feedback);
    prompt.push_str("- **Feedback Summary by Section**:\n");
    for (section, stats) in &feedback.by_section {
        let _ = writeln!(
            prompt,
            "  - **Section {}**: {} feedback posts ({} text, {} image).",
            section, stats.total_feedback_posts, stats.text_feedback_count, stats.image_feedback_count
        );
    }

    prompt.push_str("\n## 4. Detailed AI & Peer Feedback Content (Sample)\n");
    for (index, entry) in merge_sample(&feedback.entries, sample_cap).into_iter().enumerate() {
        let _ = write!(
            prompt,
            "\n### Feedback Post {}\n- **Participant**: {} | **Section**: {}\n- **Feedback Type**: {} ({} confidence)\n- **Message**: {}\n---\n",
            index + 1,
            entry.participant,
            entry.section,
            entry.feedback_type.as_str(),
            entry.confidence.as_str(),
            text::truncate_chars(&entry.message, MESSAGE_EXCERPT_CHARS)
        );
    }

    prompt
}

/// Required section headings absent from a Markdown report.
pub fn missing_sections(markdown: &str) -> Vec<String> {
    let headings: Vec<String> = markdown
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.starts_with('#')
                || line.starts_with("**")
                || line.split_once('.').is_some_and(|(number, _)| !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()))
        })
        .map(str::to_lowercase)
        .collect();

    REQUIRED_SECTIONS
        .iter()
        .filter(|(_, keyword)| !headings.iter().any(|heading| heading.contains(keyword)))
        .map(|(heading, _)| heading.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FallbackFeedback, OutlineFeedback};
    use crate::types::{AuthorRef, Confidence, FeedbackType};

    fn candidate() -> Candidate {
        Candidate {
            post_id: 2,
            participant: AuthorRef::for_user(10),
            section: "A".to_string(),
            text: "Thesis: the web helps more than it hurts.".to_string(),
            word_count: 8,
        }
    }

    fn entry(post_id: u64, word_count: usize) -> FeedbackEntry {
        FeedbackEntry {
            post_id,
            participant: AuthorRef::for_user(post_id),
            section: "A".to_string(),
            subject: "Re".to_string(),
            message: "m".repeat(900),
            word_count,
            feedback_type: FeedbackType::TextFeedback,
            confidence: Confidence::High,
            feedback_score: 3,
            matched_signals: Vec::new(),
            image_reason: None,
        }
    }

    #[test]
    fn test_individual_prompt_embeds_context_without_names() {
        let pair = individual_prompt(DEFAULT_TOPIC, "Sample thesis and topic sentences", &candidate());
        assert!(pair.system.contains(DEFAULT_TOPIC));
        assert!(pair.system.contains("Sample thesis and topic sentences"));
        assert!(pair.system.contains("\"comparison_to_sample\""));
        assert!(pair.user.contains("WORD COUNT: 8"));
        assert!(pair.user.contains(AuthorRef::for_user(10).as_str()));
        assert!(pair.user.ends_with("Thesis: the web helps more than it hurts."));
    }

    #[test]
    fn test_aggregate_prompt_includes_fallback_text_and_skips_failures() {
        let structured = OutlineFeedback {
            overall_score: "7".to_string(),
            strengths: vec!["clear thesis".to_string()],
            areas_for_improvement: vec!["thin evidence".to_string()],
            thesis_feedback: String::new(),
            structure_feedback: String::new(),
            evidence_feedback: String::new(),
            suggestions: Vec::new(),
            comparison_to_sample: String::new(),
        };
        let results = vec![
            CandidateFeedback {
                post_id: 2,
                participant: AuthorRef::for_user(10),
                word_count: 60,
                outcome: CandidateOutcome::Completed {
                    feedback: FeedbackResult::Structured(structured),
                },
            },
            CandidateFeedback {
                post_id: 3,
                participant: AuthorRef::for_user(11),
                word_count: 70,
                outcome: CandidateOutcome::Completed {
                    feedback: FeedbackResult::Fallback(FallbackFeedback::new("Plain prose review of the outline")),
                },
            },
            CandidateFeedback {
                post_id: 4,
                participant: AuthorRef::for_user(12),
                word_count: 80,
                outcome: CandidateOutcome::Failed {
                    error: "network error: reset".to_string(),
                },
            },
        ];
        let pair = aggregate_prompt(&results).unwrap();
        assert!(pair.user.contains("TOTAL STUDENTS: 2"));
        assert!(pair.user.contains("thin evidence"));
        assert!(pair.user.contains("Plain prose review of the outline"));
        assert!(!pair.user.contains(AuthorRef::for_user(12).as_str()));
    }

    #[test]
    fn test_merge_sample_prefers_detailed_entries() {
        let entries = vec![entry(1, 10), entry(2, 90), entry(3, 50), entry(4, 90)];
        let ids: Vec<u64> = merge_sample(&entries, 3).iter().map(|e| e.post_id).collect();
        assert_eq!(ids, vec![2, 4, 3]);
    }

    #[test]
    fn test_missing_sections() {
        let complete = "# Executive Summary\ntext\n## Engagement & Participation Analysis\n## Quality of Outlines & Feedback\n## Key Insights & Pedagogical Recommendations\n";
        assert!(missing_sections(complete).is_empty());

        let partial = "1. **Executive Summary**: fine\nThe quality was good overall.\n";
        assert_eq!(
            missing_sections(partial),
            vec![
                "Engagement & Participation Analysis".to_string(),
                "Quality of Outlines & Feedback".to_string(),
                "Key Insights & Pedagogical Recommendations".to_string(),
            ]
        );
    }
}
