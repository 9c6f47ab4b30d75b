//! Worker failure boundary and the async collaborators
//!
//! Every worker runs inside a boundary that turns its exit into exactly one
//! [`WorkerNotice`](common::WorkerNotice): `Completed` when its loop returned
//! `Ok`, `Faulted` for an error or a caught panic. A dead worker never takes
//! its siblings or the process with it.
//!
//! - `capture`: runs the external capture executable and streams its output
//! - `images`: reads captured image files and base64-encodes them

pub mod capture;
pub mod images;

pub use capture::run_capture;
pub use images::{assemble, encode_image_file, run_image_assembly};

use common::{Notifier, Result, Termination, WorkerId};
use std::any::Any;
use std::future::Future;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn termination_of(worker: WorkerId, outcome: std::result::Result<Result<()>, String>) -> Termination {
    match outcome {
        Ok(Ok(())) => {
            info!("Worker {} finished", worker);
            Termination::Completed
        }
        Ok(Err(e)) => {
            error!("Worker {} failed: {}", worker, e);
            Termination::Faulted(e.to_string())
        }
        Err(panic) => {
            error!("Worker {} panicked: {}", worker, panic);
            Termination::Faulted(format!("panic: {}", panic))
        }
    }
}

/// Run a blocking worker on its own named thread
pub fn spawn_supervised_thread<F>(
    worker: WorkerId,
    notifier: Notifier,
    body: F,
) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    thread::Builder::new()
        .name(worker.to_string())
        .spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(body))
                .map_err(|payload| panic_message(payload.as_ref()));
            notifier.notify_blocking(worker, termination_of(worker, outcome));
        })
}

/// Run an async worker as a tokio task
///
/// The worker body runs in its own inner task so a panic surfaces as a
/// `JoinError` here instead of unwinding through the boundary.
pub fn spawn_supervised_task<F>(
    worker: WorkerId,
    notifier: Notifier,
    body: F,
) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let outcome = match tokio::spawn(body).await {
            Ok(result) => Ok(result),
            Err(join_error) if join_error.is_panic() => {
                Err(panic_message(join_error.into_panic().as_ref()))
            }
            Err(join_error) => Err(join_error.to_string()),
        };
        notifier.notify(worker, termination_of(worker, outcome)).await;
    })
}
