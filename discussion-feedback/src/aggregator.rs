use crate::thread::DiscussionThreads;
use crate::types::{AuthorRef, Confidence, FeedbackType, Post, PostType};
use crate::utils::{round1, text, time};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

const SUBJECT_CHARS: usize = 50;
const PROMPT_EXCERPT_CHARS: usize = 500;
const PHASE_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub participant: AuthorRef,
    pub post_count: usize,
    pub word_count: usize,
    pub subject: String,
    pub feedback_type: Option<FeedbackType>,
    pub confidence: Option<Confidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionStats {
    pub section: String,
    pub participant_count: usize,
    pub post_count: usize,
    pub total_words: usize,
    pub average_words: f64,
    /// Sorted by participant token.
    pub participants: Vec<ParticipantSummary>,
}

/// Whether a classified post may enter student statistics.
pub fn is_student_content(post: &Post) -> bool {
    post.content_present
        && post.classification.is_some()
        && !post.is_instructor()
        && post.post_type() != Some(PostType::InstructorPrompt)
}

/// Groups classified student posts by section label.
#[derive(Debug, Clone, Default)]
pub struct SectionAggregator {
    post_type: Option<PostType>,
}

impl SectionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict aggregation to one post type.
    pub fn for_post_type(post_type: PostType) -> Self {
        Self {
            post_type: Some(post_type),
        }
    }

    pub fn aggregate<'a>(&self, posts: impl IntoIterator<Item = &'a Post>) -> BTreeMap<String, SectionStats> {
        let mut grouped: BTreeMap<String, BTreeMap<AuthorRef, ParticipantSummary>> = BTreeMap::new();
        let mut post_counts: HashMap<String, usize> = HashMap::new();

        for post in posts {
            if !is_student_content(post) {
                continue;
            }
            if self.post_type.is_some() && post.post_type() != self.post_type {
                continue;
            }

            let section = post.section_label().to_string();
            *post_counts.entry(section.clone()).or_default() += 1;

            let feedback = post.feedback_analysis().filter(|analysis| analysis.is_feedback());
            let summary = grouped
                .entry(section)
                .or_default()
                .entry(post.author.clone())
                .or_insert_with(|| ParticipantSummary {
                    participant: post.author.clone(),
                    post_count: 0,
                    word_count: 0,
                    subject: text::truncate_chars(&post.subject, SUBJECT_CHARS),
                    feedback_type: None,
                    confidence: None,
                });
            summary.post_count += 1;
            summary.word_count += post.word_count;
            if let Some(analysis) = feedback {
                // Keep the most confident feedback seen for this participant
                if summary.confidence.map_or(true, |current| analysis.confidence > current) {
                    summary.feedback_type = Some(analysis.feedback_type);
                    summary.confidence = Some(analysis.confidence);
                }
            }
        }

        let sections: BTreeMap<String, SectionStats> = grouped
            .into_iter()
            .map(|(section, participants)| {
                let participants: Vec<ParticipantSummary> = participants.into_values().collect();
                let total_words: usize = participants.iter().map(|p| p.word_count).sum();
                let participant_count = participants.len();
                let stats = SectionStats {
                    post_count: post_counts.get(&section).copied().unwrap_or_default(),
                    section: section.clone(),
                    participant_count,
                    total_words,
                    average_words: round1(total_words as f64 / participant_count as f64),
                    participants,
                };
                (section, stats)
            })
            .collect();

        debug!("Aggregated {} sections", sections.len());
        sections
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineSummary {
    pub total_outlines: usize,
    pub sections_with_submissions: usize,
    pub total_words: usize,
}

/// Section statistics over posts classified as outline submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineSubmissionReport {
    pub summary: OutlineSummary,
    pub by_section: BTreeMap<String, SectionStats>,
}

impl OutlineSubmissionReport {
    pub fn build<'a>(posts: impl IntoIterator<Item = &'a Post>) -> Self {
        let by_section = SectionAggregator::for_post_type(PostType::StudentOutline).aggregate(posts);
        let summary = OutlineSummary {
            total_outlines: by_section.values().map(|s| s.post_count).sum(),
            sections_with_submissions: by_section.len(),
            total_words: by_section.values().map(|s| s.total_words).sum(),
        };
        info!(
            "Outline report: {} outlines across {} sections",
            summary.total_outlines, summary.sections_with_submissions
        );
        Self { summary, by_section }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub post_id: u64,
    pub participant: AuthorRef,
    pub section: String,
    pub subject: String,
    pub message: String,
    pub word_count: usize,
    pub feedback_type: FeedbackType,
    pub confidence: Confidence,
    pub feedback_score: u32,
    pub matched_signals: Vec<String>,
    /// Why the post was judged image-based, when it was.
    pub image_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSectionStats {
    pub section: String,
    pub total_feedback_posts: usize,
    pub text_feedback_count: usize,
    pub image_feedback_count: usize,
    pub participants_with_feedback: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub total_feedback_posts: usize,
    pub total_text_feedback: usize,
    pub total_image_feedback: usize,
    pub sections_with_feedback: usize,
    pub unique_participants: usize,
}

/// Replies that carry text or image feedback, grouped by section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackCollectionReport {
    pub summary: FeedbackSummary,
    pub by_section: BTreeMap<String, FeedbackSectionStats>,
    /// In post order.
    pub entries: Vec<FeedbackEntry>,
}

impl FeedbackCollectionReport {
    pub fn build<'a>(posts: impl IntoIterator<Item = &'a Post>) -> Self {
        let mut entries = Vec::new();
        for post in posts {
            if post.is_root() || !is_student_content(post) {
                continue;
            }
            let Some(analysis) = post.feedback_analysis().filter(|a| a.is_feedback()) else {
                continue;
            };
            entries.push(FeedbackEntry {
                post_id: post.id,
                participant: post.author.clone(),
                section: post.section_label().to_string(),
                subject: text::truncate_chars(&post.subject, SUBJECT_CHARS),
                message: post.body.clone(),
                word_count: analysis.word_count,
                feedback_type: analysis.feedback_type,
                confidence: analysis.confidence,
                feedback_score: analysis.feedback_score,
                matched_signals: analysis.matched_signals.clone(),
                image_reason: analysis.is_image.then(|| analysis.image_reason.clone()),
            });
        }

        let mut by_section: BTreeMap<String, FeedbackSectionStats> = BTreeMap::new();
        let mut providers: BTreeMap<&str, BTreeSet<&AuthorRef>> = BTreeMap::new();
        for entry in &entries {
            let stats = by_section
                .entry(entry.section.clone())
                .or_insert_with(|| FeedbackSectionStats {
                    section: entry.section.clone(),
                    total_feedback_posts: 0,
                    text_feedback_count: 0,
                    image_feedback_count: 0,
                    participants_with_feedback: 0,
                });
            stats.total_feedback_posts += 1;
            match entry.feedback_type {
                FeedbackType::TextFeedback => stats.text_feedback_count += 1,
                FeedbackType::ImageBased => stats.image_feedback_count += 1,
                FeedbackType::None => {}
            }
            providers.entry(entry.section.as_str()).or_default().insert(&entry.participant);
        }
        for (section, authors) in &providers {
            if let Some(stats) = by_section.get_mut(*section) {
                stats.participants_with_feedback = authors.len();
            }
        }

        let unique_participants = entries.iter().map(|e| &e.participant).collect::<BTreeSet<_>>().len();
        let summary = FeedbackSummary {
            total_feedback_posts: entries.len(),
            total_text_feedback: by_section.values().map(|s| s.text_feedback_count).sum(),
            total_image_feedback: by_section.values().map(|s| s.image_feedback_count).sum(),
            sections_with_feedback: by_section.len(),
            unique_participants,
        };
        info!(
            "Feedback report: {} feedback posts ({} text, {} image)",
            summary.total_feedback_posts, summary.total_text_feedback, summary.total_image_feedback
        );

        Self {
            summary,
            by_section,
            entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Headline facts about one discussion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualOverview {
    pub discussion_title: String,
    pub total_posts: usize,
    pub unique_participants: usize,
    pub date_range: DateRange,
    pub instructor_prompt: Option<String>,
}

impl ContextualOverview {
    pub fn build(threads: &DiscussionThreads) -> Self {
        let opening = threads
            .instructor_context()
            .map(|node| &node.post)
            .or_else(|| threads.posts().find(|post| post.is_root()));

        let participants: BTreeSet<&AuthorRef> = threads.posts().map(|post| &post.author).collect();
        let timestamps: Vec<DateTime<Utc>> = threads.posts().filter_map(|post| post.created).collect();

        Self {
            discussion_title: opening
                .map(|post| post.subject.clone())
                .filter(|subject| !subject.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            total_posts: threads.len(),
            unique_participants: participants.len(),
            date_range: DateRange {
                start: timestamps.iter().min().map(time::format_timestamp),
                end: timestamps.iter().max().map(time::format_timestamp),
            },
            instructor_prompt: opening.map(|post| text::truncate_chars(&post.body, PROMPT_EXCERPT_CHARS)),
        }
    }
}

/// Overview, outline statistics and flow of one discussion: the first of
/// the two artifacts the final merge combines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewReport {
    pub overview: ContextualOverview,
    pub outlines: OutlineSubmissionReport,
    pub flow: DiscussionFlow,
}

impl OverviewReport {
    pub fn build(threads: &DiscussionThreads) -> Self {
        Self {
            overview: ContextualOverview::build(threads),
            outlines: OutlineSubmissionReport::build(threads.posts()),
            flow: DiscussionFlow::analyze(threads.posts()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionPhase {
    PromptIntroduction,
    OutlineSubmission,
    AiFeedbackPhase,
    PeerDiscussion,
}

impl DiscussionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscussionPhase::PromptIntroduction => "prompt_introduction",
            DiscussionPhase::OutlineSubmission => "outline_submission",
            DiscussionPhase::AiFeedbackPhase => "ai_feedback_phase",
            DiscussionPhase::PeerDiscussion => "peer_discussion",
        }
    }

    fn for_post_type(post_type: PostType) -> Option<Self> {
        match post_type {
            PostType::InstructorPrompt => Some(DiscussionPhase::PromptIntroduction),
            PostType::StudentOutline => Some(DiscussionPhase::OutlineSubmission),
            PostType::AiFeedback => Some(DiscussionPhase::AiFeedbackPhase),
            PostType::Reply => Some(DiscussionPhase::PeerDiscussion),
            PostType::StudentResponse | PostType::GeneralPost => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActivePeriod {
    InsufficientData { post_count: usize },
    NoValidTimestamps,
    Hour {
        period: String,
        post_count: usize,
        total_active_hours: usize,
    },
}

/// How the discussion unfolded over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionFlow {
    pub post_type_distribution: BTreeMap<PostType, usize>,
    /// From the first ten posts by creation time, consecutive repeats collapsed.
    pub phases: Vec<DiscussionPhase>,
    /// Whole hours between the first and last dated post.
    pub total_timeline_hours: i64,
    pub most_active_period: ActivePeriod,
}

impl DiscussionFlow {
    pub fn analyze<'a>(posts: impl IntoIterator<Item = &'a Post>) -> Self {
        let mut sorted: Vec<&Post> = posts.into_iter().filter(|post| post.classification.is_some()).collect();
        // Undated posts sort last; the sort is stable for ties
        sorted.sort_by_key(|post| (post.created.is_none(), post.created));

        let mut post_type_distribution = BTreeMap::new();
        for post in &sorted {
            if let Some(post_type) = post.post_type() {
                *post_type_distribution.entry(post_type).or_insert(0) += 1;
            }
        }

        let mut phases = Vec::new();
        let mut current = None;
        for post in sorted.iter().take(PHASE_WINDOW) {
            if let Some(phase) = post.post_type().and_then(DiscussionPhase::for_post_type) {
                current = Some(phase);
            }
            if let Some(phase) = current {
                if phases.last() != Some(&phase) {
                    phases.push(phase);
                }
            }
        }

        let dated: Vec<DateTime<Utc>> = sorted.iter().filter_map(|post| post.created).collect();
        let total_timeline_hours = match (dated.first(), dated.last()) {
            (Some(first), Some(last)) if dated.len() > 1 => last.signed_duration_since(*first).num_hours(),
            _ => 0,
        };

        Self {
            post_type_distribution,
            phases,
            total_timeline_hours,
            most_active_period: Self::most_active_period(sorted.len(), &dated),
        }
    }

    fn most_active_period(post_count: usize, dated: &[DateTime<Utc>]) -> ActivePeriod {
        if post_count < 2 {
            return ActivePeriod::InsufficientData { post_count };
        }
        if dated.is_empty() {
            return ActivePeriod::NoValidTimestamps;
        }

        let mut hourly: BTreeMap<String, usize> = BTreeMap::new();
        for created in dated {
            *hourly.entry(created.format("%Y-%m-%d %H:00").to_string()).or_default() += 1;
        }

        // Earliest hour wins ties
        let mut best: Option<(&String, usize)> = None;
        for (hour, &count) in &hourly {
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((hour, count));
            }
        }
        match best {
            Some((period, post_count)) => ActivePeriod::Hour {
                period: period.clone(),
                post_count,
                total_active_hours: hourly.len(),
            },
            None => ActivePeriod::NoValidTimestamps,
        }
    }
}
