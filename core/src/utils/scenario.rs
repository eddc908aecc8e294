use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::config_store::merged;
use crate::core::engine::run_campaign;
use crate::core::result_aggregator::{save_results, AttackResult};
use crate::error::{ReconError, Result};
use crate::utils::classifier::{classify_file, Behavior};
use crate::{ReconConfig, SinkRef};

/// A scripted run loaded from YAML.
///
/// ```yaml
/// url: http://target.local/
/// steps: [analyze, classify]
/// headers:
///   Authorization: Bearer token
/// timeout: 10
/// rate_limit:
///   requests_per_second: 1
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub timeout: Option<u64>,
    pub security: Option<Value>,
    pub rate_limit: Option<Value>,
    pub cache: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Analyze,
    Classify,
    Unknown(String),
}

impl From<&str> for Step {
    fn from(raw: &str) -> Self {
        match raw.trim() {
            "analyze" => Step::Analyze,
            "classify" => Step::Classify,
            other => Step::Unknown(other.to_string()),
        }
    }
}

/// What a single step produced.
#[derive(Debug)]
pub enum StepOutcome {
    Analyzed {
        results: Vec<AttackResult>,
        saved_to: PathBuf,
    },
    Classified(Vec<(AttackResult, Behavior)>),
    Skipped(String),
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn steps(&self) -> Vec<Step> {
        self.steps.iter().map(|s| Step::from(s.as_str())).collect()
    }

    pub fn header_pairs(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// `base` with the scenario's overrides layered on top.
    pub fn config(&self, base: &ReconConfig) -> Result<ReconConfig> {
        let mut patch = Map::new();
        if let Some(timeout) = self.timeout {
            patch.insert("timeout".to_string(), Value::from(timeout));
        }
        for (key, value) in [
            ("security", &self.security),
            ("rate_limit", &self.rate_limit),
            ("cache", &self.cache),
        ] {
            if let Some(value) = value {
                patch.insert(key.to_string(), value.clone());
            }
        }

        merged(base, Value::Object(patch))
            .map_err(|e| ReconError::Validation(format!("scenario overrides: {:#}", e)))
    }

    /// Runs the steps in order. `analyze` writes `results_path`, `classify`
    /// reads it back. Unknown steps are skipped with a warning.
    pub async fn run(
        &self,
        base: &ReconConfig,
        results_path: &Path,
        sink: SinkRef,
    ) -> Result<Vec<StepOutcome>> {
        let config = self.config(base)?;
        let mut outcomes = Vec::new();

        for step in self.steps() {
            let outcome = match step {
                Step::Analyze => {
                    let results = run_campaign(
                        &config,
                        &self.url,
                        self.header_pairs(),
                        true,
                        sink.clone(),
                    )
                    .await?;
                    save_results(results_path, &results)?;
                    StepOutcome::Analyzed {
                        results,
                        saved_to: results_path.to_path_buf(),
                    }
                }
                Step::Classify => StepOutcome::Classified(classify_file(results_path)?),
                Step::Unknown(name) => {
                    warn!("Unknown scenario step: {}", name);
                    StepOutcome::Skipped(name)
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mutator::AttackKind;
    use crate::core::result_aggregator::ProbeStatus;
    use crate::SilentSink;
    use tempfile::tempdir;

    const FULL: &str = r#"
url: http://target.local/
steps:
  - analyze
  - classify
headers:
  Authorization: Bearer abc
timeout: 7
security:
  verify_ssl: false
rate_limit:
  requests_per_second: 1
cache:
  ttl: 5
"#;

    #[test]
    fn test_parse_full_scenario() {
        let scenario = Scenario::parse(FULL).unwrap();

        assert_eq!(scenario.url, "http://target.local/");
        assert_eq!(scenario.steps(), vec![Step::Analyze, Step::Classify]);
        assert_eq!(
            scenario.header_pairs(),
            vec![("Authorization".to_string(), "Bearer abc".to_string())]
        );
    }

    #[test]
    fn test_overrides_merge_into_base_config() {
        let scenario = Scenario::parse(FULL).unwrap();
        let config = scenario.config(&ReconConfig::default()).unwrap();

        assert_eq!(config.timeout, 7);
        assert!(!config.security.verify_ssl);
        assert!(config.security.follow_redirects);
        assert_eq!(config.rate_limit.requests_per_second, 1);
        assert_eq!(config.rate_limit.burst, 5);
        assert_eq!(config.cache.ttl, 5.0);
        assert_eq!(config.cache.max_size, 1000);
    }

    #[test]
    fn test_minimal_scenario_keeps_defaults() {
        let scenario = Scenario::parse("url: http://x.test/").unwrap();
        assert!(scenario.steps().is_empty());
        assert_eq!(scenario.config(&ReconConfig::default()).unwrap(), ReconConfig::default());
    }

    #[test]
    fn test_bad_override_is_a_validation_error() {
        let scenario = Scenario::parse("url: http://x.test/\ntimeout: -3").unwrap_err();
        assert!(matches!(scenario, ReconError::Yaml(_)));

        let scenario = Scenario::parse("url: http://x.test/\nsecurity:\n  max_redirects: lots").unwrap();
        assert!(matches!(
            scenario.config(&ReconConfig::default()),
            Err(ReconError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_classify_only_scenario_with_unknown_step() {
        let dir = tempdir().unwrap();
        let results_path = dir.path().join("dna_results.json");
        save_results(
            &results_path,
            &[AttackResult {
                url: "http://x.test/?input=' OR '1'='1".to_string(),
                status: ProbeStatus::Code(500),
                headers: None,
                body: "SQL syntax error".to_string(),
                attack: AttackKind::Sqli,
            }],
        )
        .unwrap();

        let scenario = Scenario::parse("url: http://x.test/\nsteps: [explode, classify]").unwrap();
        let outcomes = scenario
            .run(&ReconConfig::default(), &results_path, SilentSink::new_ref())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(&outcomes[0], StepOutcome::Skipped(name) if name == "explode"));
        match &outcomes[1] {
            StepOutcome::Classified(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].1, Behavior::Vulnerable);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_analyze_with_invalid_url_fails_fast() {
        let dir = tempdir().unwrap();
        let scenario = Scenario::parse("url: not-a-url\nsteps: [analyze]").unwrap();

        let err = scenario
            .run(&ReconConfig::default(), &dir.path().join("out.json"), SilentSink::new_ref())
            .await
            .unwrap_err();

        assert!(matches!(err, ReconError::Validation(_)));
        assert!(!dir.path().join("out.json").exists());
    }
}
