pub mod types;
pub mod utils;
pub mod parser;
pub mod section;
pub mod classifier;
pub mod thread;
pub mod aggregator;
pub mod prompts;
pub mod pipeline;
pub mod llm_adapter;
pub mod sources;
pub mod report;
pub mod config;

pub use types::*;
pub use aggregator::{
    ContextualOverview, DiscussionFlow, FeedbackCollectionReport, OutlineSubmissionReport, OverviewReport,
    SectionAggregator, SectionStats,
};
pub use classifier::{ClassifierThresholds, PostClassifier};
pub use config::AppConfig;
pub use llm_adapter::{MockGenerator, MockReply, OpenRouterGenerator};
pub use parser::{parse_export, ParticipantDirectory, Sanitizer};
pub use pipeline::{AnalysisRun, FeedbackOrchestrator, MergeInputs, PipelineSettings, RunState};
pub use report::DiscussionReport;
pub use section::extract_section;
pub use sources::{FileDiscussionSource, MoodleRestSource};
pub use thread::{DiscussionThreads, ThreadBuilder};

/// Sanitize, thread and classify the records of one discussion.
pub fn prepare_discussion(records: &[RawRecord], thresholds: &ClassifierThresholds) -> DiscussionThreads {
    let posts = Sanitizer::new()
        .with_min_content_chars(thresholds.min_content_chars)
        .sanitize(records);
    let mut threads = ThreadBuilder::new(thresholds.clone()).build(posts);
    threads.classify_all(&PostClassifier::new(thresholds.clone()));
    threads
}
