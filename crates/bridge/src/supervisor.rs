//! Session supervisor
//!
//! Owns every channel end the workers talk to and is the only issuer of
//! outbound reports. It routes:
//!
//! | input                         | output                                   |
//! |-------------------------------|------------------------------------------|
//! | command `start`               | `start` report                           |
//! | command `capture`             | capture request with the command's args  |
//! | capture line `image ...`      | `preview` report                         |
//! | capture line `Processed images: ...` | image-assembly request            |
//! | image-assembly result         | `fingerprint` report                     |
//! | worker notice                 | logged, recorded, nothing else           |
//!
//! Frame outcomes and worker notices are always read. Every other input is
//! paused while an outbox it feeds is backlogged, so a stalled writer or
//! worker pushes back on the reader and the capture process.
//!
//! The session ends only when the inbound command channel closes. The
//! supervisor then drops its channels, which stops every worker, and
//! releases the accessory stack exactly once.

use crate::aoa::Release;
use async_channel::{Sender, TrySendError};
use common::{
    CaptureRequest, CaptureResult, FrameOutcome, ImageAssemblyRequest, ImageAssemblyResult,
    Result, SupervisorChannels, WorkerId, WorkerNotice,
};
use protocol::{Command, OutboundReport};
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Capture output line prefix carrying a preview image
pub const PREVIEW_PREFIX: &str = "image ";
/// Capture output line prefix listing the final images and their scores
pub const PROCESSED_PREFIX: &str = "Processed images:";

/// How often a full output channel is retried
const BACKLOG_RETRY: Duration = Duration::from_millis(20);

/// What the supervisor does when a worker stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeathPolicy {
    /// Log the notice and remember the worker; never restart or shut down
    #[default]
    LogOnly,
}

/// What happened during one session
#[derive(Debug)]
pub struct SessionSummary {
    /// Every worker notice received, in arrival order
    pub exits: Vec<WorkerNotice>,
    /// Workers that stopped while the session ran
    pub dead_workers: BTreeSet<WorkerId>,
    /// Reports handed to the writer with no outcome back yet
    pub frames_in_flight: usize,
    /// Result of releasing the accessory stack
    pub teardown: Result<()>,
}

/// Split `Processed images:` arguments into parallel locations and scores
///
/// Tokens are `location,score`; a token without a comma is a location with
/// an empty score.
pub fn parse_processed_images(rest: &str) -> ImageAssemblyRequest {
    let (locations, scores) = rest
        .split_whitespace()
        .map(|token| {
            let (location, score) = token.split_once(',').unwrap_or((token, ""));
            (location.to_string(), score.to_string())
        })
        .unzip();
    ImageAssemblyRequest { locations, scores }
}

/// Non-blocking sender with a local queue
///
/// The supervisor never awaits a send: a stalled writer waiting to hand back
/// a frame outcome would otherwise deadlock against it. The queue stays
/// short because the supervisor stops reading every input that feeds a
/// backlogged outbox.
struct Outbox<T> {
    name: &'static str,
    tx: Sender<T>,
    queue: VecDeque<T>,
}

impl<T> Outbox<T> {
    fn new(name: &'static str, tx: Sender<T>) -> Self {
        Self {
            name,
            tx,
            queue: VecDeque::new(),
        }
    }

    /// Queue `item` and deliver what fits; returns items delivered
    fn push(&mut self, item: T) -> usize {
        self.queue.push_back(item);
        self.flush()
    }

    fn flush(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(item) = self.queue.pop_front() {
            match self.tx.try_send(item) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(item)) => {
                    self.queue.push_front(item);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(
                        "{} channel closed, dropping {} queued",
                        self.name,
                        self.queue.len() + 1
                    );
                    self.queue.clear();
                    break;
                }
            }
        }
        if !self.queue.is_empty() {
            debug!("{} backlog: {}", self.name, self.queue.len());
        }
        delivered
    }

    fn is_backlogged(&self) -> bool {
        !self.queue.is_empty()
    }
}

/// Routing state that lives for one session
struct Router {
    reports: Outbox<OutboundReport>,
    capture: Outbox<CaptureRequest>,
    assembly: Outbox<ImageAssemblyRequest>,
    frames_in_flight: usize,
    exits: Vec<WorkerNotice>,
    dead_workers: BTreeSet<WorkerId>,
    policy: DeathPolicy,
}

impl Router {
    fn report(&mut self, report: OutboundReport) {
        debug!("Queueing {} report", report.kind());
        self.frames_in_flight += self.reports.push(report);
    }

    fn flush(&mut self) {
        self.frames_in_flight += self.reports.flush();
        self.capture.flush();
        self.assembly.flush();
    }

    fn is_backlogged(&self) -> bool {
        self.reports.is_backlogged() || self.capture.is_backlogged() || self.assembly.is_backlogged()
    }

    fn on_command(&mut self, command: Command) {
        match command.action.as_str() {
            Command::START => self.report(OutboundReport::start()),
            Command::CAPTURE => {
                info!("Starting capture with {:?}", command.args);
                self.capture.push(CaptureRequest { args: command.args });
            }
            _ => warn!("Ignoring unknown command: {}", command),
        }
    }

    fn on_capture_line(&mut self, result: CaptureResult) {
        let line = result.line;
        if let Some(image) = line.strip_prefix(PREVIEW_PREFIX) {
            self.report(OutboundReport::preview(image));
        } else if let Some(rest) = line.strip_prefix(PROCESSED_PREFIX) {
            let request = parse_processed_images(rest);
            info!("Assembling {} final images", request.locations.len());
            self.assembly.push(request);
        } else {
            debug!("capture: {}", line);
        }
    }

    fn on_assembly(&mut self, result: ImageAssemblyResult) {
        self.report(OutboundReport::fingerprint(result.images, result.scores));
    }

    fn on_outcome(&mut self, outcome: FrameOutcome) {
        self.frames_in_flight = self.frames_in_flight.saturating_sub(1);
        if outcome == FrameOutcome::Dropped {
            warn!("Writer dropped a report");
        }
        debug!("Frames in flight: {}", self.frames_in_flight);
    }

    fn on_notice(&mut self, notice: WorkerNotice) {
        match self.policy {
            DeathPolicy::LogOnly => {
                error!(
                    "Worker {} stopped: {:?}, continuing without it",
                    notice.worker, notice.termination
                );
                self.dead_workers.insert(notice.worker);
            }
        }
        self.exits.push(notice);
    }
}

pub struct Supervisor<S: Release> {
    channels: SupervisorChannels,
    stack: S,
    policy: DeathPolicy,
}

impl<S: Release> Supervisor<S> {
    pub fn new(channels: SupervisorChannels, stack: S) -> Self {
        Self {
            channels,
            stack,
            policy: DeathPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DeathPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Route until the inbound command channel closes, then tear down
    pub async fn run(self) -> SessionSummary {
        let Supervisor {
            channels,
            mut stack,
            policy,
        } = self;
        let SupervisorChannels {
            commands,
            reports,
            outcomes,
            notices,
            capture_requests,
            capture_results,
            assembly_requests,
            assembly_results,
        } = channels;

        let mut router = Router {
            reports: Outbox::new("report", reports),
            capture: Outbox::new("capture request", capture_requests),
            assembly: Outbox::new("image-assembly request", assembly_requests),
            frames_in_flight: 0,
            exits: Vec::new(),
            dead_workers: BTreeSet::new(),
            policy,
        };

        let mut outcomes_open = true;
        let mut notices_open = true;
        let mut capture_open = true;
        let mut assembly_open = true;

        info!("Supervisor running");
        loop {
            let backlogged = router.is_backlogged();
            // An input stays unread while any outbox it feeds is backlogged,
            // so a stalled consumer stalls its producers in turn
            let reports_full = router.reports.is_backlogged();
            let capture_full = router.capture.is_backlogged();
            let assembly_full = router.assembly.is_backlogged();
            tokio::select! {
                command = commands.recv(), if !reports_full && !capture_full => match command {
                    Ok(command) => router.on_command(command),
                    Err(_) => {
                        info!("Inbound command channel closed, ending session");
                        break;
                    }
                },
                outcome = outcomes.recv(), if outcomes_open => match outcome {
                    Ok(outcome) => router.on_outcome(outcome),
                    Err(_) => outcomes_open = false,
                },
                notice = notices.recv(), if notices_open => match notice {
                    Ok(notice) => router.on_notice(notice),
                    Err(_) => notices_open = false,
                },
                result = capture_results.recv(),
                    if capture_open && !reports_full && !assembly_full => match result {
                    Ok(result) => router.on_capture_line(result),
                    Err(_) => capture_open = false,
                },
                result = assembly_results.recv(), if assembly_open && !reports_full => match result {
                    Ok(result) => router.on_assembly(result),
                    Err(_) => assembly_open = false,
                },
                _ = tokio::time::sleep(BACKLOG_RETRY), if backlogged => {}
            }
            router.flush();
        }

        // Notices and outcomes already queued still count
        while let Ok(notice) = notices.try_recv() {
            router.on_notice(notice);
        }
        while let Ok(outcome) = outcomes.try_recv() {
            router.on_outcome(outcome);
        }

        let frames_in_flight = router.frames_in_flight;
        let exits = std::mem::take(&mut router.exits);
        let dead_workers = std::mem::take(&mut router.dead_workers);
        drop(router);
        drop((
            commands,
            outcomes,
            notices,
            capture_results,
            assembly_results,
        ));

        if frames_in_flight > 0 {
            warn!("{} reports were never confirmed by the writer", frames_in_flight);
        }

        let teardown = stack.release();
        match &teardown {
            Ok(()) => info!("Accessory stack released"),
            Err(e) => error!("Accessory stack teardown: {}", e),
        }

        SessionSummary {
            exits,
            dead_workers,
            frames_in_flight,
            teardown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{DEFAULT_TEST_TIMEOUT, with_timeout};
    use common::{Error, TeardownErrors, Termination, WorkerChannels, create_session_channels};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CountingStack {
        releases: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Release for CountingStack {
        fn release(&mut self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                let mut errors = TeardownErrors::default();
                errors.push("interface", rusb::Error::NoDevice);
                errors.push("config", rusb::Error::NoDevice);
                errors.into_result()
            } else {
                Ok(())
            }
        }
    }

    fn start(stack: CountingStack) -> (WorkerChannels, tokio::task::JoinHandle<SessionSummary>) {
        let (supervisor, workers) = create_session_channels(9);
        let handle = tokio::spawn(Supervisor::new(supervisor, stack).run());
        (workers, handle)
    }

    #[test]
    fn test_parse_processed_images() {
        let request = parse_processed_images(" /tmp/a.png,0.91 /tmp/b.png,0.77");
        assert_eq!(request.locations, vec!["/tmp/a.png", "/tmp/b.png"]);
        assert_eq!(request.scores, vec!["0.91", "0.77"]);
    }

    #[test]
    fn test_parse_token_without_score() {
        let request = parse_processed_images(" /tmp/a.png /tmp/b.png,0.5");
        assert_eq!(request.locations, vec!["/tmp/a.png", "/tmp/b.png"]);
        assert_eq!(request.scores, vec!["", "0.5"]);
    }

    #[tokio::test]
    async fn test_start_command_emits_start_report() {
        let (workers, handle) = start(CountingStack::default());

        workers
            .reader
            .commands
            .send(Command::new("start", vec![]))
            .await
            .unwrap();
        let report = with_timeout(DEFAULT_TEST_TIMEOUT, workers.writer.reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report, OutboundReport::start());

        drop(workers.reader);
        let summary = handle.await.unwrap();
        assert_eq!(summary.frames_in_flight, 1);
    }

    #[tokio::test]
    async fn test_capture_command_forwards_args() {
        let (workers, handle) = start(CountingStack::default());

        workers
            .reader
            .commands
            .send(Command::new("capture", vec!["LEFT".to_string()]))
            .await
            .unwrap();
        let request = with_timeout(DEFAULT_TEST_TIMEOUT, workers.capture.requests.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.args, vec!["LEFT"]);

        drop(workers.reader);
        handle.await.unwrap();
        assert!(workers.capture.requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_preview_line_emits_preview_report() {
        let (workers, handle) = start(CountingStack::default());

        workers
            .capture
            .results
            .send(CaptureResult {
                line: "image abc123".to_string(),
            })
            .await
            .unwrap();
        let report = with_timeout(DEFAULT_TEST_TIMEOUT, workers.writer.reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report, OutboundReport::preview("abc123"));

        drop(workers.reader);
        handle.await.unwrap();
        assert!(workers.writer.reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_processed_line_requests_assembly_then_fingerprint() {
        let (workers, handle) = start(CountingStack::default());

        workers
            .capture
            .results
            .send(CaptureResult {
                line: "Processed images: /tmp/a.png,0.91 /tmp/b.png,0.77".to_string(),
            })
            .await
            .unwrap();
        let request = with_timeout(DEFAULT_TEST_TIMEOUT, workers.assembly.requests.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.locations, vec!["/tmp/a.png", "/tmp/b.png"]);
        assert_eq!(request.scores, vec!["0.91", "0.77"]);

        workers
            .assembly
            .results
            .send(ImageAssemblyResult {
                images: vec!["YQ==".to_string(), String::new()],
                scores: request.scores.clone(),
            })
            .await
            .unwrap();
        let report = with_timeout(DEFAULT_TEST_TIMEOUT, workers.writer.reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            report,
            OutboundReport::fingerprint(
                vec!["YQ==".to_string(), String::new()],
                vec!["0.91".to_string(), "0.77".to_string()]
            )
        );

        drop(workers.reader);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unrelated_capture_line_is_ignored() {
        let (workers, handle) = start(CountingStack::default());

        workers
            .capture
            .results
            .send(CaptureResult {
                line: "Place finger on sensor".to_string(),
            })
            .await
            .unwrap();
        workers
            .reader
            .commands
            .send(Command::new("start", vec![]))
            .await
            .unwrap();

        let report = with_timeout(DEFAULT_TEST_TIMEOUT, workers.writer.reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report, OutboundReport::start());

        drop(workers.reader);
        handle.await.unwrap();
        assert!(workers.assembly.requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_outcomes_settle_in_flight_count() {
        let (workers, handle) = start(CountingStack::default());

        workers
            .reader
            .commands
            .send(Command::new("start", vec![]))
            .await
            .unwrap();
        workers.writer.reports.recv().await.unwrap();
        workers
            .writer
            .outcomes
            .send(FrameOutcome::Sent)
            .await
            .unwrap();

        drop(workers.reader);
        let summary = handle.await.unwrap();
        assert_eq!(summary.frames_in_flight, 0);
    }

    #[tokio::test]
    async fn test_reader_close_releases_stack_once() {
        let stack = CountingStack {
            fail: true,
            ..Default::default()
        };
        let releases = Arc::clone(&stack.releases);
        let (workers, handle) = start(stack);

        drop(workers.reader);
        let summary = with_timeout(DEFAULT_TEST_TIMEOUT, handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(releases.load(Ordering::SeqCst), 1);
        match summary.teardown {
            Err(Error::Teardown(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregated teardown error, got {:?}", other),
        }
        assert!(workers.writer.reports.recv().await.is_err());
        assert!(workers.capture.requests.recv().await.is_err());
        assert!(workers.assembly.requests.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_worker_death_is_logged_only() {
        let (workers, handle) = start(CountingStack::default());

        workers
            .notifier
            .notify(
                WorkerId::Capture,
                Termination::Faulted("panic: sensor".to_string()),
            )
            .await;
        workers
            .reader
            .commands
            .send(Command::new("start", vec![]))
            .await
            .unwrap();
        let report = with_timeout(DEFAULT_TEST_TIMEOUT, workers.writer.reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report, OutboundReport::start());

        drop(workers.reader);
        let summary = handle.await.unwrap();
        assert_eq!(summary.dead_workers.len(), 1);
        assert!(summary.dead_workers.contains(&WorkerId::Capture));
        assert_eq!(summary.exits.len(), 1);
        assert_eq!(summary.exits[0].worker, WorkerId::Capture);
    }

    #[tokio::test]
    async fn test_stalled_writer_stalls_capture_output() {
        let (workers, handle) = start(CountingStack::default());

        // Report channel holds 9, the outbox 1 more, the capture channel 1
        let mut accepted = 0;
        for i in 0..100 {
            let line = CaptureResult {
                line: format!("image {}", i),
            };
            let send = workers.capture.results.send(line);
            match tokio::time::timeout(Duration::from_millis(200), send).await {
                Ok(sent) => {
                    sent.unwrap();
                    accepted += 1;
                }
                Err(_) => break,
            }
        }
        assert!(
            (10..=12).contains(&accepted),
            "capture output accepted {} lines with a stalled writer",
            accepted
        );

        // Once the writer drains, every accepted line arrives in order
        for i in 0..accepted {
            let report = with_timeout(DEFAULT_TEST_TIMEOUT, workers.writer.reports.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(report, OutboundReport::preview(format!("{}", i)));
        }

        drop(workers.reader);
        let summary = with_timeout(DEFAULT_TEST_TIMEOUT, handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.frames_in_flight, accepted);
    }

    #[tokio::test]
    async fn test_stalled_capture_worker_stalls_commands() {
        let (workers, handle) = start(CountingStack::default());

        let mut accepted = 0;
        for _ in 0..100 {
            let send = workers
                .reader
                .commands
                .send(Command::new("capture", vec![]));
            match tokio::time::timeout(Duration::from_millis(200), send).await {
                Ok(sent) => {
                    sent.unwrap();
                    accepted += 1;
                }
                Err(_) => break,
            }
        }
        assert!(
            accepted < 100,
            "reader never stalled: {} commands accepted",
            accepted
        );

        for _ in 0..accepted {
            with_timeout(DEFAULT_TEST_TIMEOUT, workers.capture.requests.recv())
                .await
                .unwrap()
                .unwrap();
        }
        drop(workers.reader);
        with_timeout(DEFAULT_TEST_TIMEOUT, handle)
            .await
            .unwrap()
            .unwrap();
    }
}
