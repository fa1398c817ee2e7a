//! CommandRipper against a shell script standing in for the real ripper.

#![cfg(unix)]

use std::time::Duration;

use discd::core::handler::{HandlerOutcome, OutcomeMessage, OutcomeSender, RipRequest};
use discd::core::ripper::CommandRipper;
use discd::core::{DiscKind, ProgressTracker, RipperFactory};
use serde_json::{Map, Value, json};
use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

fn shell(script: &str) -> CommandRipper {
    CommandRipper::new(
        DiscKind::Video,
        "sh",
        vec!["-c".to_string(), script.to_string()],
    )
}

fn request(outdir: &std::path::Path, tracker: &ProgressTracker, options: Map<String, Value>) -> RipRequest {
    RipRequest {
        device: "/dev/sr0".to_string(),
        kind: DiscKind::Video,
        outdir: outdir.to_path_buf(),
        options,
        progress: tracker.sink("/dev/sr0"),
    }
}

async fn outcomes(rx: &mut mpsc::UnboundedReceiver<OutcomeMessage>) -> Vec<HandlerOutcome> {
    let mut seen = Vec::new();
    loop {
        let msg = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout waiting for outcome")
            .expect("outcome channel closed");
        let done = msg.outcome == HandlerOutcome::Finished;
        seen.push(msg.outcome);
        if done {
            return seen;
        }
    }
}

fn sender() -> (OutcomeSender, mpsc::UnboundedReceiver<OutcomeMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        OutcomeSender::new(Uuid::now_v7(), "/dev/sr0", DiscKind::Video, tx),
        rx,
    )
}

#[tokio::test]
async fn test_successful_rip_writes_into_rip_directory() {
    let temp = tempdir().unwrap();
    let tracker = ProgressTracker::new();
    let mut options = Map::new();
    options.insert("minlength".to_string(), json!(120));

    let ripper = shell(r#"echo 'PRGV:50,50,100'; echo "{device} {minlength}" > "{outdir}/title.txt""#);
    let (tx, mut rx) = sender();

    let handler = ripper
        .create(request(temp.path(), &tracker, options), tx)
        .unwrap();
    handler.start().unwrap();

    let seen = outcomes(&mut rx).await;
    let HandlerOutcome::Success { artifact } = &seen[0] else {
        panic!("expected success, got {:?}", seen);
    };
    assert_eq!(seen[1], HandlerOutcome::Finished);

    assert!(artifact.starts_with(temp.path()));
    assert!(
        artifact
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("sr0_")
    );
    let written = std::fs::read_to_string(artifact.join("title.txt")).unwrap();
    assert_eq!(written.trim(), "/dev/sr0 120");

    let progress = tracker.get("/dev/sr0").await.unwrap();
    assert_eq!(progress.percentage, 50);
}

#[tokio::test]
async fn test_non_zero_exit_reports_stderr() {
    let temp = tempdir().unwrap();
    let tracker = ProgressTracker::new();
    let ripper = shell("echo 'no disc in drive' >&2; exit 3");
    let (tx, mut rx) = sender();

    let handler = ripper
        .create(request(temp.path(), &tracker, Map::new()), tx)
        .unwrap();
    handler.start().unwrap();

    let seen = outcomes(&mut rx).await;
    match &seen[0] {
        HandlerOutcome::Failure { reason } => assert!(reason.contains("no disc in drive")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(seen.last(), Some(&HandlerOutcome::Finished));
}

#[tokio::test]
async fn test_cancel_kills_the_child() {
    let temp = tempdir().unwrap();
    let tracker = ProgressTracker::new();
    let ripper = shell("sleep 30");
    let (tx, mut rx) = sender();

    let handler = ripper
        .create(request(temp.path(), &tracker, Map::new()), tx)
        .unwrap();
    handler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handler.cancel();

    let seen = outcomes(&mut rx).await;
    assert_eq!(
        seen,
        vec![
            HandlerOutcome::Failure {
                reason: "rip cancelled".to_string()
            },
            HandlerOutcome::Finished
        ]
    );
    timeout(Duration::from_secs(1), handler.wait())
        .await
        .expect("handler did not stop");
}

#[tokio::test]
async fn test_missing_program_fails_cleanly() {
    let temp = tempdir().unwrap();
    let tracker = ProgressTracker::new();
    let ripper = CommandRipper::new(DiscKind::Video, "/nonexistent/makemkvcon", Vec::new());
    let (tx, mut rx) = sender();

    let handler = ripper
        .create(request(temp.path(), &tracker, Map::new()), tx)
        .unwrap();
    handler.start().unwrap();

    let seen = outcomes(&mut rx).await;
    assert!(matches!(seen[0], HandlerOutcome::Failure { .. }));
    assert_eq!(seen[1], HandlerOutcome::Finished);
}

#[test]
fn test_kind_mismatch_is_rejected() {
    let temp = tempdir().unwrap();
    let tracker = ProgressTracker::new();
    let ripper = CommandRipper::new(DiscKind::Audio, "abcde", Vec::new());
    let (tx, _rx) = sender();

    assert!(
        ripper
            .create(request(temp.path(), &tracker, Map::new()), tx)
            .is_err()
    );
}
