//! Session Channel Integration Tests
//!
//! Tests for the channel set between the supervisor and its workers.
//!
//! # Test Scenarios
//! - Blocking worker threads talking to an async supervisor
//! - Result channels behaving as a synchronous handoff
//! - Shutdown by dropping the supervisor's ends
//!
//! Run with: `cargo test -p common --test channel_tests`

use async_channel::TrySendError;
use common::test_utils::{DEFAULT_TEST_TIMEOUT, with_timeout};
use common::{
    CaptureResult, FrameOutcome, Termination, WorkerId, WorkerNotice, create_session_channels,
};
use protocol::{Command, OutboundReport};
use std::thread;

// ============================================================================
// Message Flow Tests
// ============================================================================

#[tokio::test]
async fn test_writer_round_trip_between_thread_and_task() {
    let (supervisor, workers) = create_session_channels(9);
    let writer = workers.writer;

    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        while let Ok(report) = writer.reports.recv_blocking() {
            seen.push(report.kind());
            writer.outcomes.send_blocking(FrameOutcome::Sent).unwrap();
        }
        seen
    });

    for report in [OutboundReport::start(), OutboundReport::preview("abc")] {
        supervisor.reports.send(report).await.unwrap();
        let outcome = with_timeout(DEFAULT_TEST_TIMEOUT, supervisor.outcomes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Sent);
    }

    drop(supervisor);
    assert_eq!(handle.join().unwrap(), vec!["start", "preview"]);
}

#[tokio::test]
async fn test_commands_arrive_in_send_order() {
    let (supervisor, workers) = create_session_channels(9);
    let reader = workers.reader;

    let handle = thread::spawn(move || {
        for i in 0..5 {
            let command = Command::new("capture", vec![i.to_string()]);
            reader.commands.send_blocking(command).unwrap();
        }
    });

    for i in 0..5 {
        let command = supervisor.commands.recv().await.unwrap();
        assert_eq!(command.args, vec![i.to_string()]);
    }
    handle.join().unwrap();

    // Reader gone: the supervisor's signal to end the session
    assert!(supervisor.commands.recv().await.is_err());
}

// ============================================================================
// Capacity Tests
// ============================================================================

#[test]
fn test_result_channels_hold_one_item() {
    let (_supervisor, workers) = create_session_channels(9);

    let results = &workers.capture.results;
    results
        .try_send(CaptureResult {
            line: "first".to_string(),
        })
        .unwrap();
    assert!(matches!(
        results.try_send(CaptureResult {
            line: "second".to_string(),
        }),
        Err(TrySendError::Full(_))
    ));
}

#[test]
fn test_work_channels_use_configured_capacity() {
    let (supervisor, _workers) = create_session_channels(3);

    assert_eq!(supervisor.reports.capacity(), Some(3));
    assert_eq!(supervisor.capture_requests.capacity(), Some(3));
    assert_eq!(supervisor.assembly_requests.capacity(), Some(3));
}

#[test]
fn test_zero_capacity_is_clamped() {
    let (supervisor, _workers) = create_session_channels(0);
    assert_eq!(supervisor.reports.capacity(), Some(1));
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[test]
fn test_dropping_supervisor_closes_every_worker_input() {
    let (supervisor, workers) = create_session_channels(9);
    drop(supervisor);

    assert!(workers.writer.reports.recv_blocking().is_err());
    assert!(workers.capture.requests.recv_blocking().is_err());
    assert!(workers.assembly.requests.recv_blocking().is_err());
}

#[tokio::test]
async fn test_notice_after_supervisor_exit_is_silent() {
    let (supervisor, workers) = create_session_channels(9);
    drop(supervisor);

    // Must neither block nor panic
    with_timeout(
        DEFAULT_TEST_TIMEOUT,
        workers
            .notifier
            .notify(WorkerId::Capture, Termination::Completed),
    )
    .await
    .unwrap();
}

#[test]
fn test_notices_from_several_workers() {
    let (supervisor, workers) = create_session_channels(9);

    let handles: Vec<_> = [WorkerId::Reader, WorkerId::Writer]
        .into_iter()
        .map(|worker| {
            let notifier = workers.notifier.clone();
            thread::spawn(move || notifier.notify_blocking(worker, Termination::Completed))
        })
        .collect();

    let mut seen: Vec<WorkerNotice> = (0..2)
        .map(|_| supervisor.notices.recv_blocking().unwrap())
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    seen.sort_by_key(|n| n.worker);

    assert_eq!(seen[0].worker, WorkerId::Reader);
    assert_eq!(seen[1].worker, WorkerId::Writer);
}
