use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const RESULTS: &str = r#"[
  {"url": "http://t/?input=<script>alert(1)</script>", "status": 200, "body": "<p><script>alert(1)</script></p>", "attack": "xss"},
  {"url": "http://t/user_id=1", "status": 403, "body": "Forbidden", "attack": "idor"},
  {"url": "http://t/user_id=2", "status": "ERROR", "body": "client error: refused", "attack": "idor"}
]"#;

/// Every command gets its own config file so nothing touches ~/.dnarecon.
fn workspace() -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.json").to_str().unwrap().to_string();
    (dir, config)
}

/// --dry-run lists the four payload URLs and sends nothing.
#[test]
fn test_analyze_dry_run_lists_payloads() {
    let (_dir, config) = workspace();

    cargo_bin_cmd!("dnarecon")
        .args(["--config", &config, "analyze", "http://example.com/", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[DRY RUN] Would probe http://example.com/?input=<script>alert(1)</script> (xss)",
        ))
        .stdout(predicate::str::contains("[DRY RUN] Would probe http://example.com/?input=' OR '1'='1 (sqli)"))
        .stdout(predicate::str::contains("[DRY RUN] Would probe http://example.com/user_id=1 (idor)"))
        .stdout(predicate::str::contains("[DRY RUN] Would probe http://example.com/user_id=2 (idor)"));
}

/// Without a URL argument the configured `target` is used.
#[test]
fn test_analyze_dry_run_uses_configured_target() {
    let (_dir, config) = workspace();

    cargo_bin_cmd!("dnarecon")
        .args(["--config", &config, "config", "set", "target", "http://configured.test/"])
        .assert()
        .success();

    cargo_bin_cmd!("dnarecon")
        .args(["--config", &config, "analyze", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] Would probe http://configured.test/user_id=1 (idor)"));
}

#[test]
fn test_analyze_without_any_target_fails() {
    let (_dir, config) = workspace();

    cargo_bin_cmd!("dnarecon")
        .args(["--config", &config, "analyze", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no target given"));
}

/// A malformed target is rejected before anything is dispatched.
#[test]
fn test_analyze_invalid_url_fails() {
    let (dir, config) = workspace();
    let output = dir.path().join("out.json");

    cargo_bin_cmd!("dnarecon")
        .args(["--config", &config, "analyze", "ftp://example.com/", "-o", output.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported scheme"));

    assert!(!output.exists());
}

#[test]
fn test_classify_prints_one_line_per_record() {
    let (dir, config) = workspace();
    let results = dir.path().join("dna_results.json");
    fs::write(&results, RESULTS).unwrap();

    cargo_bin_cmd!("dnarecon")
        .args(["--config", &config, "classify", results.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("[!] VULNERABLE - http://t/?input=<script>alert(1)</script> (xss)"))
        .stdout(predicate::str::contains("[+] STRICT - http://t/user_id=1 (idor)"))
        .stdout(predicate::str::contains("[~] FLEXIBLE - http://t/user_id=2 (idor)"));
}

#[test]
fn test_classify_missing_file_fails() {
    let (dir, config) = workspace();

    cargo_bin_cmd!("dnarecon")
        .args(["--config", &config, "classify", dir.path().join("nope.json").to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("classifying"));
}

/// Scenario with an unknown step and a classify step, no network involved.
#[test]
fn test_run_scenario_classify_only() {
    let (dir, config) = workspace();
    let results = dir.path().join("results.json");
    fs::write(&results, RESULTS).unwrap();
    let scenario = dir.path().join("scenario.yaml");
    fs::write(&scenario, "url: http://t/\nsteps:\n  - fingerprint\n  - classify\n").unwrap();

    cargo_bin_cmd!("dnarecon")
        .args([
            "--config",
            &config,
            "run",
            scenario.to_str().unwrap(),
            "-o",
            results.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("[~] Skipped unknown step 'fingerprint'"))
        .stdout(predicate::str::contains("[+] STRICT - http://t/user_id=1 (idor)"));
}

#[test]
fn test_llm_tag_without_key_fails() {
    let (dir, config) = workspace();
    let results = dir.path().join("dna_results.json");
    fs::write(&results, RESULTS).unwrap();

    cargo_bin_cmd!("dnarecon")
        .env_remove("LLM_API_KEY")
        .args(["--config", &config, "llm-tag", results.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("LLM API key not found"));
}

#[test]
fn test_config_set_persists_nested_key() {
    let (_dir, config) = workspace();

    cargo_bin_cmd!("dnarecon")
        .args(["--config", &config, "config", "set", "rate_limit.requests_per_second", "9"])
        .assert()
        .success();

    let stored: serde_json::Value = serde_json::from_str(&fs::read_to_string(&config).unwrap()).unwrap();
    assert_eq!(stored["rate_limit"]["requests_per_second"], 9);
    assert_eq!(stored["rate_limit"]["burst"], 5);
}

/// Running with no arguments should fail (clap requires a subcommand).
#[test]
fn test_no_args_shows_error() {
    cargo_bin_cmd!("dnarecon").assert().failure();
}
