use crate::aggregator::{ActivePeriod, FeedbackCollectionReport, OverviewReport, SectionAggregator, SectionStats};
use crate::parser::ParticipantDirectory;
use crate::pipeline::{AggregateOutcome, AnalysisRun, CandidateOutcome, FeedbackResult, MergeInputs};
use crate::thread::DiscussionThreads;
use crate::types::{AuthorRef, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub posts: usize,
    pub threads: usize,
    pub orphans: usize,
    pub max_depth: usize,
}

impl ThreadSummary {
    pub fn of(threads: &DiscussionThreads) -> Self {
        Self {
            posts: threads.len(),
            threads: threads.roots().count(),
            orphans: threads.orphan_count(),
            max_depth: threads.depth_first().into_iter().map(|(depth, _)| depth).max().unwrap_or(0),
        }
    }
}

/// Everything produced for one discussion, ready to serialize or render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionReport {
    pub discussion_id: Option<u64>,
    pub generated_at: DateTime<Utc>,
    pub threads: ThreadSummary,
    pub overview: OverviewReport,
    /// All student content by section, regardless of post type.
    pub sections: BTreeMap<String, SectionStats>,
    pub feedback: FeedbackCollectionReport,
    pub run: Option<AnalysisRun>,
}

impl DiscussionReport {
    pub fn assemble(discussion_id: Option<u64>, threads: &DiscussionThreads, run: Option<AnalysisRun>) -> Self {
        Self::from_parts(discussion_id, threads, MergeInputs::from_threads(threads), run)
    }

    /// Reuse artifacts already built for the merge stage.
    pub fn from_parts(
        discussion_id: Option<u64>,
        threads: &DiscussionThreads,
        inputs: MergeInputs,
        run: Option<AnalysisRun>,
    ) -> Self {
        Self {
            discussion_id,
            generated_at: Utc::now(),
            threads: ThreadSummary::of(threads),
            overview: inputs.overview,
            sections: SectionAggregator::new().aggregate(threads.posts()),
            feedback: inputs.feedback,
            run,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Plain-text rendering. With a directory, participants are shown by
    /// display name; this output is for local use only.
    pub fn render_text(&self, directory: Option<&ParticipantDirectory>) -> String {
        let name = |participant: &AuthorRef| -> String {
            match directory.and_then(|d| d.display_name(participant)) {
                Some(display) => format!("{} ({})", display, participant),
                None => participant.to_string(),
            }
        };

        let overview = &self.overview.overview;
        let mut out = String::new();
        out.push_str(&format!("DISCUSSION REPORT: {}\n", overview.discussion_title));
        out.push_str(&format!("{}\n\n", "=".repeat(60)));
        if let Some(id) = self.discussion_id {
            out.push_str(&format!("Discussion id: {}\n", id));
        }
        out.push_str(&format!("Generated: {}\n", self.generated_at.format("%Y-%m-%d %H:%M UTC")));
        out.push_str(&format!(
            "Posts: {} in {} threads ({} orphaned), deepest reply level {}\n",
            self.threads.posts, self.threads.threads, self.threads.orphans, self.threads.max_depth
        ));
        out.push_str(&format!("Participants: {}\n", overview.unique_participants));
        out.push_str(&format!(
            "Date range: {} to {}\n\n",
            overview.date_range.start.as_deref().unwrap_or("Unknown"),
            overview.date_range.end.as_deref().unwrap_or("Unknown")
        ));

        let flow = &self.overview.flow;
        out.push_str("FLOW\n");
        let phases: Vec<&str> = flow.phases.iter().map(|phase| phase.as_str()).collect();
        out.push_str(&format!("  Phases: {}\n", if phases.is_empty() { "-".to_string() } else { phases.join(" -> ") }));
        for (post_type, count) in &flow.post_type_distribution {
            out.push_str(&format!("  {}: {}\n", post_type, count));
        }
        out.push_str(&format!("  Timeline: {} hours\n", flow.total_timeline_hours));
        match &flow.most_active_period {
            ActivePeriod::Hour { period, post_count, .. } => {
                out.push_str(&format!("  Most active: {} ({} posts)\n", period, post_count));
            }
            ActivePeriod::InsufficientData { .. } => out.push_str("  Most active: insufficient data\n"),
            ActivePeriod::NoValidTimestamps => out.push_str("  Most active: no timestamps\n"),
        }

        out.push_str("\nSECTIONS\n");
        if self.sections.is_empty() {
            out.push_str("  (no student content)\n");
        }
        for (section, stats) in &self.sections {
            out.push_str(&format!(
                "  Section {}: {} participants, {} posts, {} words (avg {})\n",
                section, stats.participant_count, stats.post_count, stats.total_words, stats.average_words
            ));
            for participant in &stats.participants {
                out.push_str(&format!("    - {}: {} words\n", name(&participant.participant), participant.word_count));
            }
        }

        let feedback = &self.feedback.summary;
        out.push_str(&format!(
            "\nFEEDBACK POSTS: {} ({} text, {} image) from {} participants\n",
            feedback.total_feedback_posts, feedback.total_text_feedback, feedback.total_image_feedback, feedback.unique_participants
        ));

        if let Some(run) = &self.run {
            self.render_run(run, &name, &mut out);
        }
        out
    }

    fn render_run(&self, run: &AnalysisRun, name: &dyn Fn(&AuthorRef) -> String, out: &mut String) {
        out.push_str(&format!("\nFEEDBACK RUN {} [{}]\n", run.run_id, run.state));
        if run.no_data {
            out.push_str("  No outline submissions found.\n");
        }
        for failure in &run.stage_failures {
            out.push_str(&format!("  Skipped {}: {}\n", failure.stage, failure.error));
        }

        for result in &run.individual {
            out.push_str(&format!("\n  {} (post {}, {} words)\n", name(&result.participant), result.post_id, result.word_count));
            match &result.outcome {
                CandidateOutcome::Completed {
                    feedback: FeedbackResult::Structured(feedback),
                } => {
                    out.push_str(&format!("    Score: {}\n", feedback.overall_score));
                    for strength in &feedback.strengths {
                        out.push_str(&format!("    + {}\n", strength));
                    }
                    for area in &feedback.areas_for_improvement {
                        out.push_str(&format!("    - {}\n", area));
                    }
                    for suggestion in &feedback.suggestions {
                        out.push_str(&format!("    > {}\n", suggestion));
                    }
                }
                CandidateOutcome::Completed {
                    feedback: FeedbackResult::Fallback(fallback),
                } => {
                    out.push_str("    [unstructured feedback]\n");
                    out.push_str(&format!("    {}\n", fallback.raw_feedback.replace('\n', "\n    ")));
                }
                CandidateOutcome::Failed { error } => {
                    out.push_str(&format!("    [generation failed: {}]\n", error));
                }
            }
        }

        if let Some(stage) = &run.aggregate {
            out.push_str(&format!(
                "\nCLASS ANALYSIS ({} structured, {} unstructured, {} failed)\n",
                stage.students_analyzed, stage.fallback_entries, stage.errors_encountered
            ));
            match &stage.outcome {
                AggregateOutcome::Structured(analysis) => {
                    out.push_str(&format!(
                        "  Performance: {}\n  Readiness: {}\n",
                        analysis.class_overview.average_performance, analysis.class_overview.overall_readiness
                    ));
                    let lists = [
                        ("Common strengths", &analysis.common_strengths),
                        ("Teaching priorities", &analysis.teaching_priorities),
                        ("Exemplary work", &analysis.exemplary_work),
                        ("Needs intervention", &analysis.intervention_needed),
                        ("Discussion topics", &analysis.class_discussion_topics),
                        ("Next steps", &analysis.next_steps),
                    ];
                    for (title, items) in lists {
                        if items.is_empty() {
                            continue;
                        }
                        out.push_str(&format!("  {}:\n", title));
                        for item in items {
                            out.push_str(&format!("    - {}\n", item));
                        }
                    }
                    for issue in &analysis.frequent_issues {
                        out.push_str(&format!("  Issue: {} ({}): {}\n", issue.issue, issue.frequency, issue.remedy));
                    }
                }
                AggregateOutcome::Fallback(fallback) => {
                    out.push_str("  [unstructured analysis]\n");
                    out.push_str(&format!("  {}\n", fallback.raw_analysis.replace('\n', "\n  ")));
                }
            }
        }

        if let Some(report) = &run.final_report {
            out.push_str("\nFINAL REPORT\n\n");
            out.push_str(&report.markdown);
            out.push('\n');
            if !report.missing_sections.is_empty() {
                out.push_str(&format!("\n[missing sections: {}]\n", report.missing_sections.join(", ")));
            }
        }
    }

    fn file_stem(&self) -> String {
        match self.discussion_id {
            Some(id) => format!("discussion-{}-report", id),
            None => "discussion-report".to_string(),
        }
    }

    /// Write the JSON document, the text rendering and, when present, the
    /// Markdown narrative into `dir`.
    pub async fn write_artifacts(&self, dir: &Path, directory: Option<&ParticipantDirectory>) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dir).await?;
        let stem = self.file_stem();
        let mut written = Vec::new();

        let json_path = dir.join(format!("{}.json", stem));
        tokio::fs::write(&json_path, self.to_json()?).await?;
        written.push(json_path);

        let text_path = dir.join(format!("{}.txt", stem));
        tokio::fs::write(&text_path, self.render_text(directory)).await?;
        written.push(text_path);

        if let Some(report) = self.run.as_ref().and_then(|run| run.final_report.as_ref()) {
            let markdown_path = dir.join(format!("{}.md", stem));
            tokio::fs::write(&markdown_path, &report.markdown).await?;
            written.push(markdown_path);
        }

        info!("Wrote {} report files to {}", written.len(), dir.display());
        Ok(written)
    }
}
