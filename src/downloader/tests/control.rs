use crate::config::SourceSettings;
use crate::downloader::test_helpers::{
    FakeSource, MockTransfer, create_test_downloader, drain_events, link_record, run_to_end,
    test_settings,
};
use crate::error::Error;
use crate::types::{Event, FinishKind, Progress, RunPhase};
use std::sync::Arc;

async fn idle_downloader() -> (crate::BitableDownloader, tempfile::TempDir, Arc<MockTransfer>) {
    let source = Arc::new(FakeSource::with_records(vec![
        link_record("rec1", Some("AIT1")),
        link_record("rec2", Some("AIT2")),
    ]));
    let transfer = Arc::new(MockTransfer::new());
    let (downloader, temp_dir) = create_test_downloader(source, transfer.clone()).await;
    (downloader, temp_dir, transfer)
}

#[tokio::test]
async fn test_stop_when_idle_is_invalid() {
    let (downloader, _temp_dir, _transfer) = idle_downloader().await;

    let err = downloader.stop().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { ref phase, .. } if phase == "idle"));
}

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let source = Arc::new(FakeSource::with_records(vec![link_record("rec1", None)]));
    let transfer = Arc::new(MockTransfer::gated());
    let (downloader, _temp_dir) = create_test_downloader(source, transfer.clone()).await;

    let run = downloader.start_with_settings(test_settings(), None).unwrap();

    let err = downloader
        .start_with_settings(test_settings(), None)
        .unwrap_err();
    assert_eq!(err.to_string(), "cannot start while running");
    let err = downloader.reset().unwrap_err();
    assert_eq!(err.to_string(), "cannot reset while running");

    transfer.release(1);
    run.await.unwrap();
}

#[tokio::test]
async fn test_progress_reflects_finished_run() {
    let (downloader, _temp_dir, _transfer) = idle_downloader().await;
    assert_eq!(downloader.progress(), Progress::default());

    run_to_end(&downloader, None).await;

    let progress = downloader.progress();
    assert_eq!(progress.completed, 2);
    assert_eq!(progress.total, 2);
    assert_eq!(progress.active, 0);
    assert_eq!(progress.phase, RunPhase::Idle);

    // Reset zeroes counters but keeps history
    downloader.reset().unwrap();
    assert_eq!(downloader.progress(), Progress::default());
    assert_eq!(downloader.history_len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_clear_history_allows_redownload() {
    let (downloader, _temp_dir, transfer) = idle_downloader().await;
    run_to_end(&downloader, None).await;
    assert_eq!(downloader.history_len().await.unwrap(), 2);

    let mut events = downloader.subscribe();
    downloader.clear_history().await.unwrap();

    assert_eq!(downloader.history_len().await.unwrap(), 0);
    assert!(matches!(
        drain_events(&mut events).as_slice(),
        [Event::HistoryCleared]
    ));

    let again = run_to_end(&downloader, None).await;
    assert_eq!(again.kind, FinishKind::Completed);
    assert_eq!(again.completed, 2);
    assert_eq!(transfer.submission_count(), 4);
}

#[tokio::test]
async fn test_start_uses_saved_settings() {
    let (downloader, _temp_dir, transfer) = idle_downloader().await;

    // Nothing saved yet: the run fails validation and dispatches nothing
    let mut events = downloader.subscribe();
    let summary = downloader.start(None).await.unwrap().await.unwrap();
    assert_eq!(summary.total, 0);
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, Event::RunError { .. })));

    downloader.save_settings(&test_settings()).await.unwrap();
    assert_eq!(downloader.settings().await.unwrap(), test_settings());

    let summary = downloader.start(Some("AIT2")).await.unwrap().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(
        transfer.submitted_urls(),
        vec!["https://cdn.example/rec2.mp4".to_string()]
    );
}

#[tokio::test]
async fn test_saved_settings_are_trimmed_on_load() {
    let (downloader, _temp_dir, _transfer) = idle_downloader().await;

    let settings = SourceSettings {
        table_id: "  tblX  ".into(),
        ..test_settings()
    };
    downloader.save_settings(&settings).await.unwrap();

    assert_eq!(downloader.settings().await.unwrap().table_id, "tblX");
}

#[tokio::test]
async fn test_wait_until_idle_returns_after_run() {
    let (downloader, _temp_dir, _transfer) = idle_downloader().await;

    let run = downloader.start_with_settings(test_settings(), None).unwrap();
    downloader.wait_until_idle().await;

    assert!(!downloader.progress().phase.is_active());
    run.await.unwrap();
}
