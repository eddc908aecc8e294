use std::fmt;
use std::path::Path;

use crate::core::result_aggregator::{load_results, AttackResult};
use crate::error::Result;

/// Reflected-script marker planted by the xss payload.
pub const ALERT_MARKER: &str = "alert(1)";

/// How a target reacted to a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Payload reflected or a parser error leaked.
    Vulnerable,
    /// Request refused outright.
    Strict,
    /// Anything else.
    Flexible,
}

impl Behavior {
    pub fn prefix(&self) -> &'static str {
        match self {
            Behavior::Vulnerable => "[!]",
            Behavior::Strict => "[+]",
            Behavior::Flexible => "[~]",
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Behavior::Vulnerable => write!(f, "VULNERABLE"),
            Behavior::Strict => write!(f, "STRICT"),
            Behavior::Flexible => write!(f, "FLEXIBLE"),
        }
    }
}

/// Substring rules, checked in order:
/// - body contains `alert(1)` or "syntax" (any case) → Vulnerable
/// - status 403 or body contains "access denied" (any case) → Strict
/// - otherwise → Flexible
pub fn classify(result: &AttackResult) -> Behavior {
    let body_lower = result.body.to_lowercase();

    if result.body.contains(ALERT_MARKER) || body_lower.contains("syntax") {
        return Behavior::Vulnerable;
    }

    if result.status.code() == Some(403) || body_lower.contains("access denied") {
        return Behavior::Strict;
    }

    Behavior::Flexible
}

/// Loads a results file and classifies every record, in file order.
pub fn classify_file(path: impl AsRef<Path>) -> Result<Vec<(AttackResult, Behavior)>> {
    Ok(load_results(path)?
        .into_iter()
        .map(|result| {
            let behavior = classify(&result);
            (result, behavior)
        })
        .collect())
}
