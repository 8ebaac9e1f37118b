use crate::catalog::ReportDescriptor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A catalog entry that scored for one message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub name: String,
    pub score: u32,
    #[serde(skip)]
    pub report: Arc<ReportDescriptor>,
}

impl ScoredCandidate {
    pub fn new(report: Arc<ReportDescriptor>, score: u32) -> Self {
        Self {
            name: report.name.clone(),
            score,
            report,
        }
    }
}

/// How a report was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    /// A numeric reply to a disambiguation menu
    Selection,
    /// A strong anchor substring
    Anchor,
    /// A single keyword-scoring candidate
    Keywords,
    /// The reasoning oracle
    Oracle,
}

/// Why a reply to a pending menu was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SelectionError {
    NotANumber,
    OutOfRange { given: usize, max: usize },
}

/// What happened on the oracle path when nothing matched locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum FallbackStatus {
    /// No oracle is configured
    NotConfigured,
    /// The oracle answered, but not with a catalog report
    NoAnswer,
    /// The oracle call failed or timed out
    Unavailable(String),
}

/// Outcome of matching one message
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Resolved {
        report: Arc<ReportDescriptor>,
        source: MatchSource,
    },
    /// Two or more candidates; they are now pending for this user
    Ambiguous { candidates: Vec<ScoredCandidate> },
    /// A bad reply to a pending menu; the menu is still pending
    InvalidSelection {
        error: SelectionError,
        candidates: Vec<ScoredCandidate>,
    },
    NotFound { fallback: FallbackStatus },
}

impl MatchResult {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            MatchResult::Resolved { .. } => "resolved",
            MatchResult::Ambiguous { .. } => "ambiguous",
            MatchResult::InvalidSelection { .. } => "invalid_selection",
            MatchResult::NotFound { .. } => "not_found",
        }
    }

    pub fn resolved_name(&self) -> Option<&str> {
        match self {
            MatchResult::Resolved { report, .. } => Some(&report.name),
            _ => None,
        }
    }
}

/// An inbound chat message, independent of the platform envelope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub user_id: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub is_from_self_or_bot: bool,
    /// Where replies should go; the user id is used when absent
    #[serde(default)]
    pub channel: Option<String>,
}

impl InboundEvent {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            text: Some(text.into()),
            is_from_self_or_bot: false,
            channel: None,
        }
    }

    /// User id and text when the event should be answered at all
    pub fn actionable(&self) -> Option<(&str, &str)> {
        if self.is_from_self_or_bot {
            return None;
        }
        let user = self.user_id.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
        let text = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        Some((user, text))
    }
}

/// One outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub user_id: String,
    /// Channel to post in; the user id doubles as a direct-message channel
    pub channel: String,
    pub text: String,
}
