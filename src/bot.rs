//! Event handling: match an inbound message and render the replies.

use crate::bi::HttpBiClient;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::Result;
use crate::matcher::Matcher;
use crate::metadata::MetadataProvider;
use crate::oracle::ChatCompletionsOracle;
use crate::types::{FallbackStatus, InboundEvent, MatchResult, Reply, ScoredCandidate, SelectionError};
use std::sync::Arc;

const NOT_FOUND: &str =
    "Sorry, I couldn't find a report for that. Try naming the topic, for example \"daily orders\".";
const DEGRADED: &str = "I couldn't find a matching report, and my smart search is having trouble \
right now. Please try again in a moment or rephrase with a report keyword.";

/// Numbered menu, one line per candidate
pub fn render_menu(candidates: &[ScoredCandidate]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c.name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reply texts for a match outcome, in posting order
pub fn render(result: &MatchResult) -> Vec<String> {
    match result {
        MatchResult::Resolved { report, .. } => {
            let mut text = format!("*{}*", report.name);
            if !report.description.is_empty() {
                text.push('\n');
                text.push_str(&report.description);
            }
            text.push('\n');
            text.push_str(&report.url);
            vec![text]
        }
        MatchResult::Ambiguous { candidates } => vec![
            "I found several reports that could match. Reply with the number you want:".to_string(),
            render_menu(candidates),
        ],
        MatchResult::InvalidSelection { error, candidates } => {
            let prompt = match error {
                SelectionError::OutOfRange { given, max } => format!(
                    "{} is not on the list. Please reply with a number between 1 and {}:",
                    given, max
                ),
                SelectionError::NotANumber => format!(
                    "Please reply with a number between 1 and {}:",
                    candidates.len()
                ),
            };
            vec![prompt, render_menu(candidates)]
        }
        MatchResult::NotFound { fallback } => match fallback {
            FallbackStatus::Unavailable(_) => vec![DEGRADED.to_string()],
            FallbackStatus::NotConfigured | FallbackStatus::NoAnswer => vec![NOT_FOUND.to_string()],
        },
    }
}

/// The chat bot: inbound events in, replies out
pub struct ReportBot {
    matcher: Arc<Matcher>,
}

impl ReportBot {
    pub fn new(matcher: Arc<Matcher>) -> Self {
        Self { matcher }
    }

    /// Load the catalog and wire up whichever collaborators are configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let catalog = Arc::new(Catalog::load(&config.catalog_path)?);
        tracing::info!(
            path = %config.catalog_path.display(),
            reports = catalog.len(),
            "catalog loaded"
        );

        let mut matcher = Matcher::new(catalog, config);

        if let Some(oracle) = &config.oracle {
            tracing::info!(model = %oracle.model, "oracle fallback enabled");
            matcher = matcher.with_oracle(Arc::new(ChatCompletionsOracle::new(oracle.clone())?));
        }

        if let Some(bi) = &config.bi {
            tracing::info!(server = %bi.server, "BI metadata enabled");
            let provider = MetadataProvider::new(Arc::new(HttpBiClient::new(bi.clone())?), bi.timeout)
                .with_auth_retry(bi.auth_attempts, bi.auth_backoff)
                .with_sample_fields(bi.sample_fields);
            matcher = matcher.with_metadata(Arc::new(provider));
        }

        Ok(Self::new(Arc::new(matcher)))
    }

    pub fn matcher(&self) -> &Arc<Matcher> {
        &self.matcher
    }

    /// Replies for one event; ignored events produce none
    pub async fn handle(&self, event: &InboundEvent) -> Vec<Reply> {
        let Some((user_id, text)) = event.actionable() else {
            tracing::debug!(?event, "ignoring event");
            return Vec::new();
        };

        let result = self.matcher.match_message(user_id, text).await;
        tracing::info!(
            user = %user_id,
            outcome = result.kind(),
            report = result.resolved_name().unwrap_or("-"),
            "message matched"
        );

        let channel = event
            .channel
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(user_id);

        render(&result)
            .into_iter()
            .map(|text| Reply {
                user_id: user_id.to_string(),
                channel: channel.to_string(),
                text,
            })
            .collect()
    }
}
