//! Reasoning-oracle fallback: prompt construction, answer parsing and the
//! chat-completions client.

use crate::catalog::{Catalog, ReportDescriptor};
use crate::config::OracleConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You route questions to reporting dashboards. \
Answer with exactly one report name from the list, copied verbatim, \
or with the single word none if no report fits. Do not explain.";

/// Opaque text-in/text-out reasoning service
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn ask(&self, prompt: &OraclePrompt) -> Result<String>;
}

/// System and user message sent to the oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OraclePrompt {
    pub system: String,
    pub user: String,
}

/// Everything the prompt is built from
#[derive(Debug, Clone, Default)]
pub struct OracleContext<'a> {
    pub message: &'a str,
    /// Earlier messages from the same user, oldest first
    pub history: Vec<&'a str>,
    /// Report name -> BI field names; absent or empty when unknown
    pub fields: HashMap<String, Vec<String>>,
}

impl OracleContext<'_> {
    pub fn to_prompt(&self, catalog: &Catalog) -> OraclePrompt {
        let mut user = String::new();

        if !self.history.is_empty() {
            user.push_str("Recent messages from this user:\n");
            for earlier in &self.history {
                let _ = writeln!(user, "- {}", earlier);
            }
            user.push('\n');
        }

        user.push_str("Available reports:\n");
        for report in catalog.iter() {
            let _ = write!(user, "- {}", report.name);
            if !report.description.is_empty() {
                let _ = write!(user, ": {}", report.description);
            }
            user.push('\n');
            if let Some(fields) = self.fields.get(&report.name).filter(|f| !f.is_empty()) {
                let _ = writeln!(user, "  fields: {}", fields.join(", "));
            }
        }

        let _ = write!(user, "\nQuestion: {}", self.message);

        OraclePrompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}

/// Map an oracle answer back to a catalog report.
///
/// Exact (case-folded) name first, then the longest report name contained in
/// the answer. `none` and empty answers map to nothing.
pub fn parse_answer(catalog: &Catalog, raw: &str) -> Option<Arc<ReportDescriptor>> {
    let answer = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '*' || c == '.')
        .trim()
        .to_lowercase();

    if answer.is_empty() || answer == "none" {
        return None;
    }

    if let Some(report) = catalog.get(&answer) {
        return Some(Arc::clone(report));
    }

    let mut best: Option<&Arc<ReportDescriptor>> = None;
    for report in catalog.iter() {
        if !answer.contains(&report.name.to_lowercase()) {
            continue;
        }
        match best {
            Some(current) if current.name.len() >= report.name.len() => {}
            _ => best = Some(report),
        }
    }
    best.cloned()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client
pub struct ChatCompletionsOracle {
    client: reqwest::Client,
    config: OracleConfig,
}

impl ChatCompletionsOracle {
    pub fn new(config: OracleConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ReasoningOracle for ChatCompletionsOracle {
    async fn ask(&self, prompt: &OraclePrompt) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Oracle(format!(
                "chat completion returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| Error::Oracle("chat completion had no content".to_string()))
    }
}
