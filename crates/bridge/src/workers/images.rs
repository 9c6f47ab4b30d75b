//! Image-assembly worker
//!
//! Turns a batch of captured image paths into base64 strings for the
//! fingerprint report. The output always has one slot per input location;
//! a file that cannot be read leaves its slot empty.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::channel::AssemblyChannels;
use common::{ImageAssemblyRequest, ImageAssemblyResult, Result};
use std::path::Path;
use tracing::{debug, info, warn};

pub async fn run_image_assembly(channels: AssemblyChannels) -> Result<()> {
    while let Ok(request) = channels.requests.recv().await {
        let result = assemble(request).await;
        info!(
            "Sending {} images and {} scores",
            result.images.len(),
            result.scores.len()
        );
        if channels.results.send(result).await.is_err() {
            debug!("Supervisor gone, image assembly stopping");
            return Ok(());
        }
    }

    info!("Image assembly request channel closed");
    Ok(())
}

/// Encode every location of `request`, keeping scores as given
pub async fn assemble(request: ImageAssemblyRequest) -> ImageAssemblyResult {
    let mut images = Vec::with_capacity(request.locations.len());
    for location in &request.locations {
        match encode_image_file(location).await {
            Ok(encoded) => images.push(encoded),
            Err(e) => {
                warn!("Cannot read image {}: {}", location, e);
                images.push(String::new());
            }
        }
    }

    ImageAssemblyResult {
        images,
        scores: request.scores,
    }
}

/// Read a file and return its contents as standard base64
pub async fn encode_image_file(path: impl AsRef<Path>) -> Result<String> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    Ok(STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_encode_image_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        fs::write(&path, b"\x89PNG").unwrap();

        assert_eq!(encode_image_file(&path).await.unwrap(), "iVBORw==");
    }

    #[tokio::test]
    async fn test_unreadable_file_leaves_empty_slot() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("b.png");
        fs::write(&good, b"abc").unwrap();

        let result = assemble(ImageAssemblyRequest {
            locations: vec![
                dir.path().join("missing.png").display().to_string(),
                good.display().to_string(),
            ],
            scores: vec!["0.91".to_string(), "0.77".to_string()],
        })
        .await;

        assert_eq!(result.images, vec![String::new(), "YWJj".to_string()]);
        assert_eq!(result.scores, vec!["0.91", "0.77"]);
    }

    #[tokio::test]
    async fn test_worker_answers_each_request() {
        let (req_tx, req_rx) = async_channel::bounded(1);
        let (res_tx, res_rx) = async_channel::bounded(1);
        let worker = tokio::spawn(run_image_assembly(AssemblyChannels {
            requests: req_rx,
            results: res_tx,
        }));

        req_tx
            .send(ImageAssemblyRequest {
                locations: vec![],
                scores: vec![],
            })
            .await
            .unwrap();
        let result = res_rx.recv().await.unwrap();
        assert!(result.images.is_empty());

        drop(req_tx);
        worker.await.unwrap().unwrap();
    }
}
