//! Channel set connecting the supervisor to its workers
//!
//! Topology:
//!
//! ```text
//! reader  ──Command──────────────▶ supervisor ──OutboundReport──▶ writer
//! writer  ──FrameOutcome─────────▶ supervisor
//! capture ──CaptureResult────────▶ supervisor ──CaptureRequest──▶ capture
//! images  ──ImageAssemblyResult──▶ supervisor ──ImageAssemblyRequest──▶ images
//! any     ──WorkerNotice─────────▶ supervisor
//! ```
//!
//! Channels carrying work into a worker are bounded with a shallow capacity.
//! Channels carrying results back have capacity 1, the closest async-channel
//! gets to a synchronous handoff, so a stalled supervisor stalls its producers.
//!
//! Shutdown is cooperative: dropping [`SupervisorChannels`] closes every
//! worker's input, and each worker exits when its input reports closed.

use async_channel::{Receiver, Sender, bounded};
use protocol::{Command, OutboundReport};
use std::fmt;
use tracing::debug;

/// Capacity of every result and notification channel
const HANDOFF_CAPACITY: usize = 1;

/// Start a capture run with these arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub args: Vec<String>,
}

/// One line of capture output, verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    pub line: String,
}

/// Files to encode, with the score reported for each
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAssemblyRequest {
    pub locations: Vec<String>,
    pub scores: Vec<String>,
}

/// Encoded images, parallel to the request; unreadable files leave an empty slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAssemblyResult {
    pub images: Vec<String>,
    pub scores: Vec<String>,
}

/// Completion signal emitted by the writer once per report it consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Header and body were both transferred
    Sent,
    /// The body exceeded the configured frame bound and was skipped
    Dropped,
}

/// Supervised workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkerId {
    Reader,
    Writer,
    Capture,
    ImageAssembly,
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerId::Reader => "usb-reader",
            WorkerId::Writer => "usb-writer",
            WorkerId::Capture => "capture",
            WorkerId::ImageAssembly => "image-assembly",
        };
        f.write_str(name)
    }
}

/// How a worker's run loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Input channel closed, loop returned normally
    Completed,
    /// Error or panic caught at the worker boundary
    Faulted(String),
}

/// Posted on the shared notification channel when a worker stops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerNotice {
    pub worker: WorkerId,
    pub termination: Termination,
}

/// Sending half of the shared notification channel
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<WorkerNotice>,
}

impl Notifier {
    pub fn new(tx: Sender<WorkerNotice>) -> Self {
        Self { tx }
    }

    /// Post a notice from async context
    ///
    /// A closed channel means the supervisor is gone and nobody is listening,
    /// which is not an error for the exiting worker.
    pub async fn notify(&self, worker: WorkerId, termination: Termination) {
        if self
            .tx
            .send(WorkerNotice {
                worker,
                termination,
            })
            .await
            .is_err()
        {
            debug!("Supervisor gone, dropping exit notice of {}", worker);
        }
    }

    /// Post a notice from a blocking thread
    pub fn notify_blocking(&self, worker: WorkerId, termination: Termination) {
        if self
            .tx
            .send_blocking(WorkerNotice {
                worker,
                termination,
            })
            .is_err()
        {
            debug!("Supervisor gone, dropping exit notice of {}", worker);
        }
    }
}

/// Supervisor's ends of every channel
pub struct SupervisorChannels {
    pub commands: Receiver<Command>,
    pub reports: Sender<OutboundReport>,
    pub outcomes: Receiver<FrameOutcome>,
    pub notices: Receiver<WorkerNotice>,
    pub capture_requests: Sender<CaptureRequest>,
    pub capture_results: Receiver<CaptureResult>,
    pub assembly_requests: Sender<ImageAssemblyRequest>,
    pub assembly_results: Receiver<ImageAssemblyResult>,
}

/// Workers' ends of every channel
pub struct WorkerChannels {
    pub reader: ReaderChannels,
    pub writer: WriterChannels,
    pub capture: CaptureChannels,
    pub assembly: AssemblyChannels,
    pub notifier: Notifier,
}

pub struct ReaderChannels {
    pub commands: Sender<Command>,
}

pub struct WriterChannels {
    pub reports: Receiver<OutboundReport>,
    pub outcomes: Sender<FrameOutcome>,
}

pub struct CaptureChannels {
    pub requests: Receiver<CaptureRequest>,
    pub results: Sender<CaptureResult>,
}

pub struct AssemblyChannels {
    pub requests: Receiver<ImageAssemblyRequest>,
    pub results: Sender<ImageAssemblyResult>,
}

/// Create the full channel set for one session
///
/// `command_capacity` bounds the channels that feed work into workers and
/// must be at least 1.
pub fn create_session_channels(command_capacity: usize) -> (SupervisorChannels, WorkerChannels) {
    let capacity = command_capacity.max(1);

    let (command_tx, command_rx) = bounded(HANDOFF_CAPACITY);
    let (report_tx, report_rx) = bounded(capacity);
    let (outcome_tx, outcome_rx) = bounded(HANDOFF_CAPACITY);
    let (notice_tx, notice_rx) = bounded(HANDOFF_CAPACITY);
    let (capture_req_tx, capture_req_rx) = bounded(capacity);
    let (capture_res_tx, capture_res_rx) = bounded(HANDOFF_CAPACITY);
    let (assembly_req_tx, assembly_req_rx) = bounded(capacity);
    let (assembly_res_tx, assembly_res_rx) = bounded(HANDOFF_CAPACITY);

    (
        SupervisorChannels {
            commands: command_rx,
            reports: report_tx,
            outcomes: outcome_rx,
            notices: notice_rx,
            capture_requests: capture_req_tx,
            capture_results: capture_res_rx,
            assembly_requests: assembly_req_tx,
            assembly_results: assembly_res_rx,
        },
        WorkerChannels {
            reader: ReaderChannels {
                commands: command_tx,
            },
            writer: WriterChannels {
                reports: report_rx,
                outcomes: outcome_tx,
            },
            capture: CaptureChannels {
                requests: capture_req_rx,
                results: capture_res_tx,
            },
            assembly: AssemblyChannels {
                requests: assembly_req_rx,
                results: assembly_res_tx,
            },
            notifier: Notifier::new(notice_tx),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_reaches_supervisor_from_blocking_thread() {
        let (supervisor, workers) = create_session_channels(9);

        let reader = workers.reader;
        let handle = std::thread::spawn(move || {
            reader
                .commands
                .send_blocking(Command::new("start", vec![]))
                .is_ok()
        });

        let cmd = supervisor.commands.recv().await.unwrap();
        assert_eq!(cmd.action, "start");
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_capacities() {
        let (supervisor, workers) = create_session_channels(9);

        assert_eq!(supervisor.reports.capacity(), Some(9));
        assert_eq!(supervisor.capture_requests.capacity(), Some(9));
        assert_eq!(supervisor.assembly_requests.capacity(), Some(9));
        assert_eq!(supervisor.commands.capacity(), Some(1));
        assert_eq!(supervisor.outcomes.capacity(), Some(1));
        assert_eq!(supervisor.notices.capacity(), Some(1));
        drop(workers);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (supervisor, _workers) = create_session_channels(0);
        assert_eq!(supervisor.reports.capacity(), Some(1));
    }

    #[test]
    fn test_dropping_supervisor_closes_worker_inputs() {
        let (supervisor, workers) = create_session_channels(4);
        drop(supervisor);

        assert!(workers.writer.reports.is_closed());
        assert!(workers.capture.requests.is_closed());
        assert!(workers.assembly.requests.is_closed());
        assert!(workers.reader.commands.is_closed());
    }

    #[tokio::test]
    async fn test_notifier_tolerates_closed_channel() {
        let (supervisor, workers) = create_session_channels(4);
        drop(supervisor);

        workers
            .notifier
            .notify(WorkerId::Capture, Termination::Completed)
            .await;
    }

    #[tokio::test]
    async fn test_notifier_delivers() {
        let (supervisor, workers) = create_session_channels(4);

        workers
            .notifier
            .notify(WorkerId::Writer, Termination::Faulted("pipe".into()))
            .await;

        let notice = supervisor.notices.recv().await.unwrap();
        assert_eq!(notice.worker, WorkerId::Writer);
        assert_eq!(notice.termination, Termination::Faulted("pipe".into()));
    }

    #[test]
    fn test_worker_id_display() {
        assert_eq!(WorkerId::Reader.to_string(), "usb-reader");
        assert_eq!(WorkerId::ImageAssembly.to_string(), "image-assembly");
    }
}
