use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::core::mutator::{AttackKind, Probe};
use crate::error::{ReconError, Result};
use crate::http::executor::truncate_chars;
use crate::http::ResponseSnapshot;

const DISPLAY_BODY_CHARS: usize = 300;

/// Status column of a result: a numeric code or the literal `"ERROR"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProbeStatus {
    Code(u16),
    Failed(FailedMarker),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FailedMarker {
    #[serde(rename = "ERROR")]
    Error,
}

impl ProbeStatus {
    pub fn code(&self) -> Option<u16> {
        match self {
            ProbeStatus::Code(code) => Some(*code),
            ProbeStatus::Failed(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ProbeStatus::Failed(_))
    }
}

impl std::fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeStatus::Code(code) => write!(f, "{}", code),
            ProbeStatus::Failed(_) => write!(f, "ERROR"),
        }
    }
}

/// Outcome of one payload dispatch, as persisted in the results file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    pub url: String,
    pub status: ProbeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    pub body: String,
    pub attack: AttackKind,
}

impl AttackResult {
    pub fn from_outcome(probe: &Probe, outcome: Result<ResponseSnapshot>) -> Self {
        match outcome {
            Ok(snapshot) => Self {
                url: probe.url.clone(),
                status: ProbeStatus::Code(snapshot.status),
                headers: Some(snapshot.headers),
                body: snapshot.body,
                attack: probe.kind,
            },
            Err(err) => Self::failed(probe, &err),
        }
    }

    pub fn failed(probe: &Probe, err: &ReconError) -> Self {
        Self {
            url: probe.url.clone(),
            status: ProbeStatus::Failed(FailedMarker::Error),
            headers: None,
            body: err.to_string(),
            attack: probe.kind,
        }
    }

    /// Body cut for terminal display. The persisted form keeps the full body.
    pub fn display_body(&self) -> &str {
        truncate_chars(&self.body, DISPLAY_BODY_CHARS)
    }
}

/// Writes results as a pretty-printed JSON array.
pub fn save_results(path: impl AsRef<Path>, results: &[AttackResult]) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(results)?;
    fs::write(path, json)?;
    info!("Saved {} result(s) to {}", results.len(), path.display());
    Ok(())
}

pub fn load_results(path: impl AsRef<Path>) -> Result<Vec<AttackResult>> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}
