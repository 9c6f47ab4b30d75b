//! Message definitions
//!
//! Two directions, two shapes:
//! - [`Command`]: what the accessory asks of us (`{"action": ..., "args": [...]}`)
//! - [`OutboundReport`]: what we tell the accessory (`{"type": ..., "data": {...}}`)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Inbound command from the accessory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Action name, e.g. `"start"` or `"capture"`
    pub action: String,
    /// Positional arguments, absent on the wire when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl Command {
    /// Action requesting a session start acknowledgement
    pub const START: &'static str = "start";
    /// Action requesting a capture run
    pub const CAPTURE: &'static str = "capture";

    pub fn new(action: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            action: action.into(),
            args,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{} {:?}}}", self.action, self.args)
    }
}

/// Outbound report to the accessory
///
/// Every variant serializes through the same `{"type", "data"}` envelope.
/// Payloads are always objects; a variant with nothing to say carries an
/// empty struct and serializes as `{}`, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum OutboundReport {
    /// Acknowledges a `start` command
    Start(StartData),
    /// Live preview frame from the capture run
    Preview(PreviewData),
    /// Final captured images with their scores
    Fingerprint(FingerprintData),
}

impl OutboundReport {
    pub fn start() -> Self {
        OutboundReport::Start(StartData {})
    }

    pub fn preview(image: impl Into<String>) -> Self {
        OutboundReport::Preview(PreviewData {
            image: image.into(),
        })
    }

    pub fn fingerprint(images: Vec<String>, scores: Vec<String>) -> Self {
        OutboundReport::Fingerprint(FingerprintData { images, scores })
    }

    /// Wire name of this report's `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundReport::Start(_) => "start",
            OutboundReport::Preview(_) => "preview",
            OutboundReport::Fingerprint(_) => "fingerprint",
        }
    }
}

/// Empty payload of a `start` report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartData {}

/// Payload of a `preview` report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewData {
    /// Encoded preview image, forwarded verbatim from the capture output
    pub image: String,
}

/// Payload of a `fingerprint` report
///
/// `images` and `scores` are parallel: entry `i` of each describes the same capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintData {
    /// Base64-encoded images; an empty string marks an image that could not be read
    pub images: Vec<String>,
    pub scores: Vec<String>,
}
