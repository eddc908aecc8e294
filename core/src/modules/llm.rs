use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use log::{error, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ReconConfig;

pub const API_KEY_ENV: &str = "LLM_API_KEY";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const MODEL: &str = "gpt-4";
const TEMPERATURE: f64 = 0.7;
const CONFIDENCE: f64 = 0.85;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    created: Option<i64>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// What the model said about one behaviour record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    pub analysis: String,
    pub timestamp: Option<i64>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedBehavior {
    pub original_data: Value,
    pub annotations: Annotations,
    pub confidence_score: f64,
}

/// Sends behaviour records to a chat-completions endpoint for triage notes.
pub struct LlmAnnotator {
    client: Client,
    api_key: String,
    endpoint: String,
}

/// Environment first, then the config file. An empty key counts as missing.
pub fn resolve_api_key(env_key: Option<String>, config: &ReconConfig) -> anyhow::Result<String> {
    env_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| Some(config.llm_api_key.clone()).filter(|k| !k.trim().is_empty()))
        .ok_or_else(|| {
            anyhow!(
                "LLM API key not found. Set {} or llm_api_key in the configuration file",
                API_KEY_ENV
            )
        })
}

impl LlmAnnotator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn from_env(config: &ReconConfig) -> anyhow::Result<Self> {
        let key = resolve_api_key(std::env::var(API_KEY_ENV).ok(), config)?;
        Ok(Self::new(key))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub async fn analyze_behavior(&self, record: &Value) -> anyhow::Result<AnnotatedBehavior> {
        let annotations = self.request_annotations(&build_prompt(record)).await.map_err(|e| {
            error!("LLM analysis failed: {:#}", e);
            e
        })?;

        Ok(AnnotatedBehavior {
            original_data: record.clone(),
            annotations,
            confidence_score: CONFIDENCE,
        })
    }

    async fn request_annotations(&self, prompt: &str) -> anyhow::Result<Annotations> {
        let body = ChatRequest {
            model: MODEL,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("sending LLM request")?;

        let status = response.status();
        let text = response.text().await.context("reading LLM response")?;
        if !status.is_success() {
            bail!("LLM API error: {}", text);
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).context("decoding LLM response")?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("LLM response has no choices"))?;

        Ok(Annotations {
            analysis: choice.message.content,
            timestamp: parsed.created,
            model: parsed.model,
        })
    }

    /// Annotates a JSON file holding one record or an array of records and
    /// writes the result next to it. Returns the output path.
    pub async fn annotate_file(&self, input: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
        let input = input.as_ref();
        let raw = fs::read_to_string(input)
            .with_context(|| format!("reading {}", input.display()))?;
        let data: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", input.display()))?;

        let output = match data {
            Value::Array(records) => {
                let mut annotated = Vec::with_capacity(records.len());
                for record in &records {
                    annotated.push(self.analyze_behavior(record).await?);
                }
                serde_json::to_value(annotated)?
            }
            record => serde_json::to_value(self.analyze_behavior(&record).await?)?,
        };

        let out_path = annotated_path(input);
        fs::write(&out_path, serde_json::to_string_pretty(&output)?)
            .with_context(|| format!("writing {}", out_path.display()))?;
        info!("Annotations saved to {}", out_path.display());
        Ok(out_path)
    }
}

/// `results.json` becomes `results_annotated.json` in the same directory.
pub fn annotated_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "results".to_string());
    input.with_file_name(format!("{}_annotated.json", stem))
}

fn field(record: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| record.get(*k).filter(|v| !v.is_null()))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "N/A".to_string())
}

pub fn build_prompt(record: &Value) -> String {
    let headers = record.get("headers").cloned().unwrap_or_else(|| json!({}));
    let headers = serde_json::to_string_pretty(&headers).unwrap_or_else(|_| "{}".to_string());

    format!(
        "Analyze the following web application behavior:\n\
         URL: {}\n\
         Response Status: {}\n\
         Response Time: {}\n\
         Headers: {}\n\
         Body: {}\n\n\
         Please provide:\n\
         1. Security implications\n\
         2. Potential vulnerabilities\n\
         3. Recommended actions\n",
        field(record, &["url"]),
        field(record, &["status_code", "status"]),
        field(record, &["response_time"]),
        headers,
        field(record, &["body"]),
    )
}
