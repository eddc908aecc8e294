use serde::{Deserialize, Serialize};
use std::fmt;

/// Attack category a probe belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackKind {
    Xss,
    Sqli,
    Idor,
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackKind::Xss => write!(f, "xss"),
            AttackKind::Sqli => write!(f, "sqli"),
            AttackKind::Idor => write!(f, "idor"),
        }
    }
}

/// One catalog entry: an attack category and the payloads it sends.
#[derive(Debug, Clone, Copy)]
pub struct Mutation {
    pub kind: AttackKind,
    pub payloads: &'static [&'static str],
}

/// The fixed mutation catalog, in dispatch order.
pub const MUTATIONS: &[Mutation] = &[
    Mutation {
        kind: AttackKind::Xss,
        payloads: &["<script>alert(1)</script>"],
    },
    Mutation {
        kind: AttackKind::Sqli,
        payloads: &["' OR '1'='1"],
    },
    Mutation {
        kind: AttackKind::Idor,
        payloads: &["user_id=1", "user_id=2"],
    },
];

/// A concrete payload URL waiting to be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub kind: AttackKind,
    pub url: String,
}

impl Mutation {
    /// Injected payloads go into the `input` query parameter; object
    /// references are appended to the target as-is.
    pub fn payload_url(&self, target: &str, payload: &str) -> String {
        match self.kind {
            AttackKind::Xss | AttackKind::Sqli => format!("{}?input={}", target, payload),
            AttackKind::Idor => format!("{}{}", target, payload),
        }
    }
}

/// Expands the catalog against `target`, preserving catalog order.
pub fn expand_probes(target: &str) -> Vec<Probe> {
    MUTATIONS
        .iter()
        .flat_map(|mutation| {
            mutation.payloads.iter().map(move |payload| Probe {
                kind: mutation.kind,
                url: mutation.payload_url(target, payload),
            })
        })
        .collect()
}
