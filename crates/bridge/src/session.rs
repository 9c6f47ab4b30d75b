//! Session wiring
//!
//! Takes an opened accessory link, starts the four workers around a
//! supervisor and runs until the accessory stops sending.

use crate::aoa::AccessoryLink;
use crate::config::BridgeConfig;
use crate::supervisor::{SessionSummary, Supervisor};
use crate::transport::{run_reader, run_writer};
use crate::workers::{
    run_capture, run_image_assembly, spawn_supervised_task, spawn_supervised_thread,
};
use common::{Error, Result, WorkerChannels, WorkerId, create_session_channels};
use tracing::info;

/// Run one session over `link`, releasing it when the session ends
pub async fn run_session<L: AccessoryLink>(
    mut link: L,
    config: &BridgeConfig,
) -> Result<SessionSummary> {
    let stream = link
        .take_read_stream()
        .ok_or_else(|| Error::Channel("accessory read stream already taken".to_string()))?;
    let writer = link
        .take_writer()
        .ok_or_else(|| Error::Channel("accessory writer already taken".to_string()))?;

    let (supervisor_channels, worker_channels) =
        create_session_channels(config.channels.command_capacity);
    let WorkerChannels {
        reader,
        writer: writer_channels,
        capture,
        assembly,
        notifier,
    } = worker_channels;

    // Build the supervisor first so a failed spawn still releases the link
    let supervisor = Supervisor::new(supervisor_channels, link);

    spawn_supervised_thread(WorkerId::Reader, notifier.clone(), move || {
        run_reader(stream, reader)
    })?;

    let max_frame_bytes = config.transport.max_frame_bytes;
    spawn_supervised_thread(WorkerId::Writer, notifier.clone(), move || {
        run_writer(writer, writer_channels, max_frame_bytes)
    })?;

    spawn_supervised_task(
        WorkerId::Capture,
        notifier.clone(),
        run_capture(config.capture.executable(), capture),
    );
    spawn_supervised_task(WorkerId::ImageAssembly, notifier, run_image_assembly(assembly));

    info!("Session started");
    let summary = supervisor.run().await;
    info!(
        "Session ended: {} worker exits, {} frames unconfirmed",
        summary.exits.len(),
        summary.frames_in_flight
    );
    Ok(summary)
}
