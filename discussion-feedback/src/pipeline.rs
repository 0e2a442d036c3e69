//! Three-stage feedback generation over one discussion.
//!
//! A run moves through `Extracting → GeneratingIndividual →
//! SynthesizingAggregate → MergingFinal → Done`. Candidate failures are
//! recorded per candidate. A failed stage is recorded in
//! `stage_failures` and only that stage is skipped: the merge still runs
//! after a failed synthesis. The run ends in `Failed` when its last
//! attempted stage failed, and in a degraded `Done` otherwise.

use crate::aggregator::{FeedbackCollectionReport, OverviewReport};
use crate::parser::clean_text;
use crate::prompts::{self, PromptPair, DEFAULT_TOPIC};
use crate::thread::DiscussionThreads;
use crate::types::{AuthorRef, GenerationError, GenerationRequest, Post, Result, TextGenerator};
use crate::utils::text;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use interfaces::de::string_or_number;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A direct reply to the opening post, sent for individual evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub post_id: u64,
    pub participant: AuthorRef,
    pub section: String,
    pub text: String,
    pub word_count: usize,
}

impl Candidate {
    pub fn from_post(post: &Post) -> Self {
        Self {
            post_id: post.id,
            participant: post.author.clone(),
            section: post.section_label().to_string(),
            text: post.body.clone(),
            word_count: post.word_count,
        }
    }
}

/// Structured evaluation of one outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineFeedback {
    #[serde(default, deserialize_with = "string_or_number")]
    pub overall_score: String,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    #[serde(default)]
    pub thesis_feedback: String,
    #[serde(default)]
    pub structure_feedback: String,
    #[serde(default)]
    pub evidence_feedback: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub comparison_to_sample: String,
}

/// Generated text that did not match the outline schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackFeedback {
    pub overall_score: String,
    pub raw_feedback: String,
    pub parsing_error: bool,
}

impl FallbackFeedback {
    pub fn new(raw_feedback: impl Into<String>) -> Self {
        Self {
            overall_score: "N/A".to_string(),
            raw_feedback: raw_feedback.into(),
            parsing_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedbackResult {
    Structured(OutlineFeedback),
    Fallback(FallbackFeedback),
}

impl FeedbackResult {
    /// Parse generated output, unwrapping a code fence first. Anything that
    /// does not fit the schema is kept verbatim as a fallback record.
    pub fn from_generated(generated: &str) -> Self {
        match serde_json::from_str::<OutlineFeedback>(text::strip_code_fences(generated)) {
            Ok(feedback) => FeedbackResult::Structured(feedback),
            Err(e) => {
                warn!("Individual feedback did not match the schema, keeping raw text: {}", e);
                FeedbackResult::Fallback(FallbackFeedback::new(generated.trim()))
            }
        }
    }

    pub fn is_parsing_error(&self) -> bool {
        matches!(self, FeedbackResult::Fallback(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CandidateOutcome {
    Completed { feedback: FeedbackResult },
    Failed { error: String },
}

/// Result of the individual stage for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFeedback {
    pub post_id: u64,
    pub participant: AuthorRef,
    pub word_count: usize,
    pub outcome: CandidateOutcome,
}

impl CandidateFeedback {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, CandidateOutcome::Failed { .. })
    }

    pub fn feedback(&self) -> Option<&FeedbackResult> {
        match &self.outcome {
            CandidateOutcome::Completed { feedback } => Some(feedback),
            CandidateOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassOverview {
    #[serde(default, deserialize_with = "string_or_number")]
    pub total_students: String,
    #[serde(default)]
    pub average_performance: String,
    #[serde(default)]
    pub overall_readiness: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequentIssue {
    pub issue: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub frequency: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default, alias = "solution")]
    pub remedy: String,
}

/// Class-level synthesis of the individual results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateAnalysis {
    pub class_overview: ClassOverview,
    #[serde(default)]
    pub common_strengths: Vec<String>,
    #[serde(default)]
    pub frequent_issues: Vec<FrequentIssue>,
    #[serde(default)]
    pub teaching_priorities: Vec<String>,
    #[serde(default)]
    pub exemplary_work: Vec<String>,
    #[serde(default)]
    pub intervention_needed: Vec<String>,
    #[serde(default)]
    pub class_discussion_topics: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackAnalysis {
    pub raw_analysis: String,
    pub parsing_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregateOutcome {
    Structured(AggregateAnalysis),
    Fallback(FallbackAnalysis),
}

impl AggregateOutcome {
    pub fn from_generated(generated: &str) -> Self {
        match serde_json::from_str::<AggregateAnalysis>(text::strip_code_fences(generated)) {
            Ok(analysis) => AggregateOutcome::Structured(analysis),
            Err(e) => {
                warn!("Class analysis did not match the schema, keeping raw text: {}", e);
                AggregateOutcome::Fallback(FallbackAnalysis {
                    raw_analysis: generated.trim().to_string(),
                    parsing_error: true,
                })
            }
        }
    }

    pub fn is_parsing_error(&self) -> bool {
        matches!(self, AggregateOutcome::Fallback(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStage {
    pub outcome: AggregateOutcome,
    /// Candidates with feedback in the synthesis prompt, fallback entries
    /// included. Matches the prompt's student total.
    pub students_analyzed: usize,
    /// Of `students_analyzed`, those sent as raw text.
    pub fallback_entries: usize,
    pub errors_encountered: usize,
}

/// Markdown narrative from the merge stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub markdown: String,
    /// Required headings the narrative lacks.
    pub missing_sections: Vec<String>,
}

impl FinalReport {
    pub fn from_markdown(generated: &str) -> Self {
        let markdown = text::strip_code_fences(generated).to_string();
        let missing_sections = prompts::missing_sections(&markdown);
        if !missing_sections.is_empty() {
            warn!("Final report is missing sections: {}", missing_sections.join(", "));
        }
        Self {
            markdown,
            missing_sections,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Extracting,
    GeneratingIndividual,
    SynthesizingAggregate,
    MergingFinal,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Extracting => "extracting",
            RunState::GeneratingIndividual => "generating_individual",
            RunState::SynthesizingAggregate => "synthesizing_aggregate",
            RunState::MergingFinal => "merging_final",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

/// A stage that produced no output, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: RunState,
    pub error: String,
}

/// Everything one run produced, including partial results of a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub run_id: Uuid,
    pub discussion_id: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: RunState,
    pub transitions: Vec<Transition>,
    /// Set when extraction found nothing to evaluate.
    pub no_data: bool,
    pub candidates: Vec<Candidate>,
    /// Sorted by participant token, then post id.
    pub individual: Vec<CandidateFeedback>,
    pub aggregate: Option<AggregateStage>,
    pub final_report: Option<FinalReport>,
    /// In the order the stages ran.
    pub stage_failures: Vec<StageFailure>,
}

impl AnalysisRun {
    fn new(discussion_id: Option<u64>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            discussion_id,
            started_at: Utc::now(),
            finished_at: None,
            state: RunState::Extracting,
            transitions: Vec::new(),
            no_data: false,
            candidates: Vec::new(),
            individual: Vec::new(),
            aggregate: None,
            final_report: None,
            stage_failures: Vec::new(),
        }
    }

    fn advance(&mut self, to: RunState) {
        info!("Run {}: {} -> {}", self.run_id, self.state, to);
        self.transitions.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
    }

    /// Record a failed stage and pick the next one: the merge when it is
    /// still pending, otherwise `Failed`.
    fn fail(&mut self, stage: RunState, error: impl Into<String>, merge_pending: bool) -> RunState {
        let error = error.into();
        self.stage_failures.push(StageFailure { stage, error });
        if merge_pending {
            warn!("Run {}: {} failed, continuing with the merge", self.run_id, stage);
            RunState::MergingFinal
        } else {
            error!("Run {} failed while {}", self.run_id, stage);
            RunState::Failed
        }
    }

    /// Done, but some stage produced nothing.
    pub fn is_degraded(&self) -> bool {
        self.state == RunState::Done && !self.stage_failures.is_empty()
    }

    pub fn failure_for(&self, stage: RunState) -> Option<&StageFailure> {
        self.stage_failures.iter().find(|f| f.stage == stage)
    }

    pub fn completed_count(&self) -> usize {
        self.individual.iter().filter(|r| !r.is_failed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.individual.iter().filter(|r| r.is_failed()).count()
    }

    pub fn fallback_count(&self) -> usize {
        self.individual
            .iter()
            .filter(|r| r.feedback().is_some_and(FeedbackResult::is_parsing_error))
            .count()
    }
}

/// The two independently built artifacts the merge stage combines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeInputs {
    pub overview: OverviewReport,
    pub feedback: FeedbackCollectionReport,
}

impl MergeInputs {
    pub fn from_threads(threads: &DiscussionThreads) -> Self {
        Self {
            overview: OverviewReport::build(threads),
            feedback: FeedbackCollectionReport::build(threads.posts()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageBudget {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl StageBudget {
    pub const fn new(max_tokens: u32, temperature: f32) -> Self {
        Self { max_tokens, temperature }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub topic: String,
    /// File holding the reference sample outline; markup is stripped.
    pub sample_standard_path: Option<PathBuf>,
    /// Plain-text length a reply must exceed to be evaluated.
    pub min_candidate_chars: usize,
    pub merge_sample_cap: usize,
    /// In-flight individual generations; 1 keeps submission order.
    pub max_concurrency: usize,
    /// Upper bound on one generation call, retries included.
    pub call_timeout_seconds: f64,
    pub individual: StageBudget,
    pub aggregate: StageBudget,
    pub merge: StageBudget,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            sample_standard_path: None,
            min_candidate_chars: 50,
            merge_sample_cap: 15,
            max_concurrency: 1,
            call_timeout_seconds: 300.0,
            individual: StageBudget::new(1500, 0.3),
            aggregate: StageBudget::new(2000, 0.4),
            merge: StageBudget::new(4000, 0.5),
        }
    }
}

/// Drives one [`AnalysisRun`] per call against a [`TextGenerator`].
pub struct FeedbackOrchestrator {
    generator: Arc<dyn TextGenerator>,
    settings: PipelineSettings,
    sample_standard: String,
}

impl FeedbackOrchestrator {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: PipelineSettings) -> Self {
        Self {
            generator,
            settings,
            sample_standard: String::new(),
        }
    }

    /// Reference sample the individual prompts compare against.
    pub fn with_sample_standard(mut self, markup: &str) -> Self {
        self.sample_standard = clean_text(markup);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Direct replies to the opening post that carry enough text.
    pub fn extract_candidates(&self, threads: &DiscussionThreads) -> Vec<Candidate> {
        let Some(opening) = threads
            .instructor_context()
            .or_else(|| threads.roots().find(|node| node.post.is_root()))
        else {
            debug!("No opening post; nothing to extract");
            return Vec::new();
        };

        threads
            .children(opening.id())
            .map(|node| &node.post)
            .filter(|post| post.content_present)
            .filter(|post| post.char_len() > self.settings.min_candidate_chars)
            .map(Candidate::from_post)
            .collect()
    }

    pub async fn run(&self, discussion_id: Option<u64>, threads: &DiscussionThreads) -> AnalysisRun {
        self.execute(discussion_id, threads, None).await
    }

    /// Run every stage including the merge of `inputs`.
    pub async fn run_with_merge(
        &self,
        discussion_id: Option<u64>,
        threads: &DiscussionThreads,
        inputs: &MergeInputs,
    ) -> AnalysisRun {
        self.execute(discussion_id, threads, Some(inputs)).await
    }

    async fn execute(
        &self,
        discussion_id: Option<u64>,
        threads: &DiscussionThreads,
        merge: Option<&MergeInputs>,
    ) -> AnalysisRun {
        let mut run = AnalysisRun::new(discussion_id);
        info!(
            "Starting run {} with {} ({} posts)",
            run.run_id,
            self.generator.generator_name(),
            threads.len()
        );

        while !run.state.is_terminal() {
            let next = match run.state {
                RunState::Extracting => {
                    run.candidates = self.extract_candidates(threads);
                    info!("Extracted {} candidates", run.candidates.len());
                    if run.candidates.is_empty() {
                        run.no_data = true;
                        RunState::Done
                    } else {
                        RunState::GeneratingIndividual
                    }
                }
                RunState::GeneratingIndividual => {
                    run.individual = self.generate_individual(&run.candidates).await;
                    let failed = run.failed_count();
                    if failed == run.individual.len() {
                        run.fail(
                            RunState::GeneratingIndividual,
                            format!("all {} individual generations failed", failed),
                            merge.is_some(),
                        )
                    } else {
                        RunState::SynthesizingAggregate
                    }
                }
                RunState::SynthesizingAggregate => match self.synthesize(&run.individual).await {
                    Ok(stage) => {
                        run.aggregate = Some(stage);
                        if merge.is_some() {
                            RunState::MergingFinal
                        } else {
                            RunState::Done
                        }
                    }
                    Err(e) => run.fail(RunState::SynthesizingAggregate, e.to_string(), merge.is_some()),
                },
                RunState::MergingFinal => match merge {
                    Some(inputs) => match self.merge_reports(inputs).await {
                        Ok(report) => {
                            run.final_report = Some(report);
                            RunState::Done
                        }
                        Err(e) => run.fail(RunState::MergingFinal, e.to_string(), false),
                    },
                    None => RunState::Done,
                },
                RunState::Done | RunState::Failed => break,
            };
            run.advance(next);
        }

        run.finished_at = Some(Utc::now());
        info!(
            "Run {} finished in state {}: {} completed, {} fallback, {} failed",
            run.run_id,
            run.state,
            run.completed_count(),
            run.fallback_count(),
            run.failed_count()
        );
        run
    }

    async fn generate_individual(&self, candidates: &[Candidate]) -> Vec<CandidateFeedback> {
        let mut results: Vec<CandidateFeedback> = stream::iter(candidates)
            .map(|candidate| self.evaluate(candidate))
            .buffered(self.settings.max_concurrency.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| a.participant.cmp(&b.participant).then(a.post_id.cmp(&b.post_id)));
        results
    }

    async fn evaluate(&self, candidate: &Candidate) -> CandidateFeedback {
        let pair = prompts::individual_prompt(&self.settings.topic, &self.sample_standard, candidate);
        let outcome = match self.call(pair, self.settings.individual).await {
            Ok(generated) => CandidateOutcome::Completed {
                feedback: FeedbackResult::from_generated(&generated),
            },
            Err(e) => {
                warn!("Generation failed for post {}: {}", candidate.post_id, e);
                CandidateOutcome::Failed { error: e.to_string() }
            }
        };
        CandidateFeedback {
            post_id: candidate.post_id,
            participant: candidate.participant.clone(),
            word_count: candidate.word_count,
            outcome,
        }
    }

    async fn synthesize(&self, results: &[CandidateFeedback]) -> Result<AggregateStage> {
        let pair = prompts::aggregate_prompt(results)?;
        let generated = self.call(pair, self.settings.aggregate).await?;

        let fallback_entries = results
            .iter()
            .filter(|r| r.feedback().is_some_and(FeedbackResult::is_parsing_error))
            .count();
        let errors_encountered = results.iter().filter(|r| r.is_failed()).count();
        Ok(AggregateStage {
            outcome: AggregateOutcome::from_generated(&generated),
            students_analyzed: results.len() - errors_encountered,
            fallback_entries,
            errors_encountered,
        })
    }

    /// Combine an overview report and a feedback-collection report into the
    /// Markdown narrative. Usable on its own, outside a run.
    pub async fn merge_reports(&self, inputs: &MergeInputs) -> Result<FinalReport> {
        let pair = prompts::merge_prompt(inputs, self.settings.merge_sample_cap);
        let generated = self.call(pair, self.settings.merge).await?;
        Ok(FinalReport::from_markdown(&generated))
    }

    async fn call(&self, pair: PromptPair, budget: StageBudget) -> std::result::Result<String, GenerationError> {
        let request = GenerationRequest {
            prompt: pair.user,
            system_prompt: Some(pair.system),
            max_tokens: budget.max_tokens,
            temperature: budget.temperature,
        };
        let limit = Duration::try_from_secs_f64(self.settings.call_timeout_seconds)
            .unwrap_or_else(|_| Duration::from_secs(300));

        match tokio::time::timeout(limit, self.generator.generate(&request)).await {
            Ok(Ok(generated)) if generated.trim().is_empty() => Err(GenerationError::EmptyResponse),
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout {
                seconds: limit.as_secs_f64(),
            }),
        }
    }
}
