use serde::{Deserialize, Serialize};

use crate::handoff::HandoffTarget;

// ── Extracted data ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilamentEntry {
    pub material: String,
    pub weight: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJobSummary {
    pub title: String,
    pub image_url: String,
    pub page_url: String,
    pub print_time: String,
    #[serde(rename = "weight")]
    pub total_weight: String,
    pub nozzle_size: Option<String>,
    pub filaments: Vec<FilamentEntry>,
    pub plate_count: usize,
}

// ── Inbound requests ─────────────────────────────────────────────────────────

/// Tagged command, the service's stand-in for an extension message.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    Extract(PageSource),
}

/// Where the page markup comes from: posted inline, or fetched from `url`.
#[derive(Debug, Clone, Deserialize)]
pub struct PageSource {
    pub url: String,
    pub html: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    #[serde(flatten)]
    pub source: PageSource,
    #[serde(default)]
    pub target: HandoffTarget,
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct AugmentRequest {
    pub html: String,
}

// ── Replies ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PrintJobSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractReply {
    pub fn ok(data: PrintJobSummary) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub status: String,
    pub redirect_url: String,
    pub data: PrintJobSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportFailure {
    pub status: String,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AugmentResponse {
    pub augmented: usize,
    pub html: String,
}
