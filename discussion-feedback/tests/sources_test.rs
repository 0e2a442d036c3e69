mod common;

use common::*;
use discussion_feedback::sources::decode_posts_response;
use discussion_feedback::types::{DiscussionSource, Result, SourceError, TextGenerator};
use discussion_feedback::{
    DiscussionReport, FeedbackOrchestrator, FileDiscussionSource, MergeInputs, MockGenerator, MoodleRestSource,
    ParticipantDirectory, PipelineSettings,
};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_file_source_reads_directory_exports() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    std::fs::write(dir.path().join(FileDiscussionSource::file_name(7)), export_json())?;
    let source = FileDiscussionSource::new(dir.path());

    let records = source.fetch_records(7).await?;
    assert_eq!(records.len(), 6);
    assert!(matches!(
        source.fetch_records(8).await,
        Err(SourceError::NotFound { discussion_id: 8 })
    ));
    Ok(())
}

#[tokio::test]
async fn test_file_source_filters_shared_file() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    let path = dir.path().join("export.json");
    std::fs::write(&path, export_json())?;
    let source = FileDiscussionSource::new(&path);

    assert_eq!(source.fetch_records(7).await?.len(), 6);
    assert!(matches!(source.fetch_records(9).await, Err(SourceError::NotFound { .. })));

    std::fs::write(&path, "{\"not\": \"an array\"}")?;
    assert!(matches!(source.fetch_records(7).await, Err(SourceError::Malformed(_))));
    Ok(())
}

#[tokio::test]
async fn test_written_records_read_back() -> Result<()> {
    let dir = TempDir::new()?;
    let source = FileDiscussionSource::new(dir.path());
    let path = source.write_records(7, &records()).await?;
    assert!(path.ends_with("discussion-7.json"));
    assert_eq!(source.fetch_records(7).await?, records());
    Ok(())
}

#[test]
fn test_moodle_posts_envelope() {
    let body = r#"{"posts": [
        {"id": 11, "discussionid": 3, "parentid": null, "subject": "Prompt", "message": "<p>Hi</p>",
         "timecreated": 1694000000, "author": {"id": 5, "fullname": "Prof"}},
        {"id": 12, "discussionid": 3, "parentid": 11, "subject": "Re: Prompt", "message": "<p>Reply</p>",
         "timecreated": 1694000100, "author": {"id": 6, "fullname": "Student"}}
    ], "warnings": []}"#;
    let records = decode_posts_response(body, 3).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].parent_id(), 0);
    assert_eq!(records[1].parent_id(), 11);
    assert_eq!(records[1].author_id(), Some(6));
    assert_eq!(records[1].created, Some(1_694_000_100));

    let bare = decode_posts_response(r#"[{"id": 1, "message": "x"}]"#, 3).unwrap();
    assert_eq!(bare.len(), 1);
}

#[test]
fn test_moodle_exceptions_become_source_errors() {
    let missing = r#"{"exception": "dml_missing_record_exception", "errorcode": "invalidrecord", "message": "Can't find data record"}"#;
    assert!(matches!(
        decode_posts_response(missing, 4),
        Err(SourceError::NotFound { discussion_id: 4 })
    ));

    let token = r#"{"exception": "moodle_exception", "errorcode": "invalidtoken", "message": "Invalid token"}"#;
    match decode_posts_response(token, 4) {
        Err(SourceError::Unavailable(message)) => assert!(message.contains("invalidtoken")),
        other => panic!("unexpected: {:?}", other),
    }

    assert!(matches!(decode_posts_response("{\"items\": []}", 4), Err(SourceError::Malformed(_))));
}

#[test]
fn test_moodle_source_requires_token() {
    assert!(MoodleRestSource::new("https://lms.example.edu/moodle", "", 30).is_err());
    let source = MoodleRestSource::new("https://lms.example.edu/moodle", "secret", 30).unwrap();
    assert_eq!(
        source.endpoint().as_str(),
        "https://lms.example.edu/moodle/webservice/rest/server.php"
    );
}

#[tokio::test]
async fn test_report_artifacts() -> Result<()> {
    init_tracing();

    let threads = threads();
    let generator: Arc<dyn TextGenerator> = Arc::new(MockGenerator::new("canned"));
    let inputs = MergeInputs::from_threads(&threads);
    let run = FeedbackOrchestrator::new(generator, PipelineSettings::default())
        .run_with_merge(Some(7), &threads, &inputs)
        .await;
    let report = DiscussionReport::from_parts(Some(7), &threads, inputs, Some(run));

    let json = report.to_json()?;
    assert!(!json.contains("Ada Student"));
    assert!(json.contains("\"state\": \"done\""));

    let anonymous = report.render_text(None);
    assert!(anonymous.contains("Week 3 Outline Exercise"));
    assert!(!anonymous.contains("Ada Student"));
    let directory = ParticipantDirectory::from_records(&records());
    assert!(report.render_text(Some(&directory)).contains("Ada Student"));

    let dir = TempDir::new()?;
    let written = report.write_artifacts(dir.path(), None).await?;
    assert_eq!(written.len(), 3);
    for path in &written {
        assert!(path.exists());
    }
    let markdown = std::fs::read_to_string(dir.path().join("discussion-7-report.md"))?;
    assert!(markdown.starts_with("# Executive Summary"));
    Ok(())
}
