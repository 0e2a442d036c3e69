use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use discussion_feedback::types::{DiscussionSource, RawRecord, TextGenerator};
use discussion_feedback::{
    parse_export, prepare_discussion, AppConfig, DiscussionReport, DiscussionThreads, FeedbackOrchestrator,
    FileDiscussionSource, MergeInputs, MockGenerator, MoodleRestSource, OpenRouterGenerator,
    ParticipantDirectory,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "discussion-feedback")]
#[command(about = "Thread, classify and generate feedback for LMS forum discussions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "DISCUSSION_FEEDBACK_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the thread tree, flow and section statistics of an export
    Inspect {
        /// Export file, or a directory of discussion-<id>.json files
        input: PathBuf,

        /// Discussion id (required for directories)
        #[arg(long)]
        discussion: Option<u64>,

        /// Show display names next to participant tokens
        #[arg(long)]
        show_names: bool,
    },

    /// Run the feedback stages over an export
    Feedback {
        input: PathBuf,

        #[arg(long)]
        discussion: Option<u64>,

        /// Also merge the overview and feedback reports into a narrative
        #[arg(long)]
        merge: bool,

        /// Write report files here instead of printing
        #[arg(long)]
        output: Option<PathBuf>,

        /// Use the offline generator instead of the configured service
        #[arg(long)]
        mock: bool,

        #[arg(long)]
        show_names: bool,
    },

    /// Download a discussion from the LMS into an export file
    Fetch {
        discussion_id: u64,

        /// Target file, or directory for discussion-<id>.json
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Inspect {
            input,
            discussion,
            show_names,
        } => {
            let records = load_records(&input, discussion).await?;
            let threads = prepare_discussion(&records, &config.classifier);
            print_tree(&threads);
            let report = DiscussionReport::assemble(discussion, &threads, None);
            let directory = show_names.then(|| ParticipantDirectory::from_records(&records));
            println!("\n{}", report.render_text(directory.as_ref()));
        }
        Commands::Feedback {
            input,
            discussion,
            merge,
            output,
            mock,
            show_names,
        } => {
            let records = load_records(&input, discussion).await?;
            let threads = prepare_discussion(&records, &config.classifier);

            let generator: Arc<dyn TextGenerator> = if mock {
                Arc::new(MockGenerator::new("offline"))
            } else {
                Arc::new(OpenRouterGenerator::new(&config.generation)?)
            };
            let mut orchestrator = FeedbackOrchestrator::new(generator, config.pipeline.clone());
            if let Some(sample) = config.read_sample_standard()? {
                orchestrator = orchestrator.with_sample_standard(&sample);
            } else {
                warn!("No sample standard configured; individual prompts carry no reference outline");
            }

            let inputs = MergeInputs::from_threads(&threads);
            let run = if merge {
                orchestrator.run_with_merge(discussion, &threads, &inputs).await
            } else {
                orchestrator.run(discussion, &threads).await
            };
            let report = DiscussionReport::from_parts(discussion, &threads, inputs, Some(run));
            let directory = show_names.then(|| ParticipantDirectory::from_records(&records));

            match output {
                Some(dir) => {
                    for path in report.write_artifacts(&dir, directory.as_ref()).await? {
                        println!("{}", path.display());
                    }
                }
                None => println!("{}", report.render_text(directory.as_ref())),
            }
        }
        Commands::Fetch { discussion_id, output } => {
            let token = config.moodle.token.clone().unwrap_or_default();
            let source = MoodleRestSource::new(&config.moodle.base_url, &token, config.moodle.timeout_seconds)?;
            info!("Fetching from {}", source.source_name());
            let records = source
                .fetch_records(discussion_id)
                .await
                .with_context(|| format!("fetching discussion {}", discussion_id))?;
            let path = FileDiscussionSource::new(output).write_records(discussion_id, &records).await?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

async fn load_records(input: &Path, discussion: Option<u64>) -> Result<Vec<RawRecord>> {
    match discussion {
        Some(id) => {
            let source = FileDiscussionSource::new(input);
            Ok(source
                .fetch_records(id)
                .await
                .with_context(|| format!("reading discussion {} from {}", id, input.display()))?)
        }
        None => {
            let json = tokio::fs::read_to_string(input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            Ok(parse_export(&json)?)
        }
    }
}

fn print_tree(threads: &DiscussionThreads) {
    for (depth, node) in threads.depth_first() {
        let post = &node.post;
        println!(
            "{}[{}] #{} {} ({} words, section {})",
            "  ".repeat(depth),
            post.post_type().map(|t| t.as_str()).unwrap_or("unclassified"),
            post.id,
            post.subject,
            post.word_count,
            post.section_label()
        );
    }
}
