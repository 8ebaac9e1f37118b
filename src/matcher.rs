//! Matching and ranking of free text against the catalog.

use crate::catalog::{Catalog, ReportDescriptor};
use crate::config::{Config, PendingPolicy};
use crate::conversation::ConversationStore;
use crate::error::{Error, Result};
use crate::metadata::MetadataProvider;
use crate::oracle::{parse_answer, OracleContext, ReasoningOracle};
use crate::scorer::{PreparedText, Scorer};
use crate::types::{FallbackStatus, MatchResult, MatchSource, ScoredCandidate, SelectionError};
use std::sync::Arc;
use std::time::Duration;

/// Routes messages to catalog reports, keeping per-user state
pub struct Matcher {
    catalog: Arc<Catalog>,
    scorer: Scorer,
    min_score: u32,
    pending_policy: PendingPolicy,
    state: ConversationStore,
    oracle: Option<Arc<dyn ReasoningOracle>>,
    oracle_timeout: Duration,
    metadata: Option<Arc<MetadataProvider>>,
}

impl Matcher {
    /// Matcher with local scoring only; attach collaborators with the `with_*` methods
    pub fn new(catalog: Arc<Catalog>, config: &Config) -> Self {
        Self {
            catalog,
            scorer: Scorer::new(config.scoring_mode),
            min_score: config.min_score.max(1),
            pending_policy: config.pending_policy,
            state: ConversationStore::new(
                config.history_limit,
                config.state_capacity,
                config.state_ttl,
            ),
            oracle: None,
            oracle_timeout: config
                .oracle
                .as_ref()
                .map(|o| o.timeout)
                .unwrap_or(Duration::from_secs(20)),
            metadata: None,
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ReasoningOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<MetadataProvider>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn metadata(&self) -> Option<&Arc<MetadataProvider>> {
        self.metadata.as_ref()
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.state
    }

    /// Ranked candidates clearing the minimum score; ties keep catalog order
    pub fn rank(&self, text: &str) -> Vec<ScoredCandidate> {
        let prepared = PreparedText::new(text);
        let mut candidates: Vec<ScoredCandidate> = self
            .catalog
            .iter()
            .map(|report| {
                let score = self.scorer.score_prepared(&prepared, &report.keywords);
                ScoredCandidate::new(Arc::clone(report), score)
            })
            .filter(|c| c.score >= self.min_score)
            .collect();
        // sort_by is stable
        candidates.sort_by(|a, b| b.score.cmp(&a.score));
        candidates
    }

    /// First report (in catalog order) with an anchor inside the text
    fn anchored(&self, prepared: &PreparedText) -> Option<&Arc<ReportDescriptor>> {
        self.catalog.iter().find(|report| {
            report
                .anchors
                .iter()
                .any(|anchor| prepared.folded().contains(anchor.as_str()))
        })
    }

    /// Match one message from a user
    pub async fn match_message(&self, user_id: &str, text: &str) -> MatchResult {
        let mut entry = self.state.lock(user_id).await;
        let history: Vec<String> = entry.history().map(str::to_string).collect();
        entry.push_message(text);

        let reply = text.trim();
        if let Some(pending) = entry.pending() {
            // Bare digits only; `parse` alone would also take "+2"
            let number = if reply.bytes().all(|b| b.is_ascii_digit()) {
                reply.parse::<usize>().ok()
            } else {
                None
            };
            match number {
                Some(number) => {
                    if let Some(chosen) = pending.pick(number) {
                        let report = Arc::clone(&chosen.report);
                        entry.clear_pending();
                        return MatchResult::Resolved {
                            report,
                            source: MatchSource::Selection,
                        };
                    }
                    return MatchResult::InvalidSelection {
                        error: SelectionError::OutOfRange {
                            given: number,
                            max: pending.len(),
                        },
                        candidates: pending.candidates.clone(),
                    };
                }
                None => match self.pending_policy {
                    PendingPolicy::Reprompt => {
                        return MatchResult::InvalidSelection {
                            error: SelectionError::NotANumber,
                            candidates: pending.candidates.clone(),
                        };
                    }
                    PendingPolicy::Cancel => {
                        tracing::debug!(user = %user_id, "new query cancels pending selection");
                        entry.clear_pending();
                    }
                },
            }
        }

        let prepared = PreparedText::new(reply);
        if let Some(report) = self.anchored(&prepared) {
            return MatchResult::Resolved {
                report: Arc::clone(report),
                source: MatchSource::Anchor,
            };
        }

        let mut candidates = self.rank(reply);
        match candidates.len() {
            0 => {}
            1 => {
                let only = candidates.remove(0);
                return MatchResult::Resolved {
                    report: only.report,
                    source: MatchSource::Keywords,
                };
            }
            _ => {
                entry.set_pending(candidates.clone());
                return MatchResult::Ambiguous { candidates };
            }
        }

        let history: Vec<&str> = history.iter().map(String::as_str).collect();
        match self.ask_oracle(reply, history).await {
            Ok(Some(report)) => MatchResult::Resolved {
                report,
                source: MatchSource::Oracle,
            },
            Ok(None) => MatchResult::NotFound {
                fallback: if self.oracle.is_some() {
                    FallbackStatus::NoAnswer
                } else {
                    FallbackStatus::NotConfigured
                },
            },
            Err(e) => {
                tracing::warn!(user = %user_id, error = %e, "oracle fallback unavailable");
                MatchResult::NotFound {
                    fallback: FallbackStatus::Unavailable(e.to_string()),
                }
            }
        }
    }

    /// One oracle call; `Ok(None)` when not configured or no report fits
    async fn ask_oracle(
        &self,
        message: &str,
        history: Vec<&str>,
    ) -> Result<Option<Arc<ReportDescriptor>>> {
        let Some(oracle) = &self.oracle else {
            return Ok(None);
        };

        let fields = match &self.metadata {
            Some(metadata) => {
                let reports: Vec<Arc<ReportDescriptor>> = self.catalog.iter().cloned().collect();
                metadata.fields_for(&reports).await
            }
            None => Default::default(),
        };

        let prompt = OracleContext {
            message,
            history,
            fields,
        }
        .to_prompt(&self.catalog);

        let answer = tokio::time::timeout(self.oracle_timeout, oracle.ask(&prompt))
            .await
            .map_err(|_| Error::Timeout(format!("oracle after {:?}", self.oracle_timeout)))??;

        let report = parse_answer(&self.catalog, &answer);
        if report.is_none() {
            tracing::info!(answer = %answer.trim(), "oracle answer did not name a report");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBuilder, ScoringMode};

    fn catalog() -> Arc<Catalog> {
        Arc::new(
            Catalog::new(vec![
                ReportDescriptor::new("capacity report", ["capacity", "occupancy"], "", "u1"),
                ReportDescriptor::new("daily report", ["daily", "orders"], "", "u2"),
                ReportDescriptor::new("brand report", ["brand"], "", "u3")
                    .with_anchors(["acme"]),
            ])
            .unwrap(),
        )
    }

    fn matcher() -> Matcher {
        let config = ConfigBuilder::new("catalog.yml").build().unwrap();
        Matcher::new(catalog(), &config)
    }

    #[test]
    fn test_rank_orders_by_score_then_catalog() {
        let matcher = matcher();
        let ranked = matcher.rank("daily orders and capacity");
        let names: Vec<_> = ranked.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["daily report", "capacity report"]);
        assert_eq!(ranked[0].score, 2);

        let tied = matcher.rank("daily capacity");
        let names: Vec<_> = tied.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["capacity report", "daily report"]);
    }

    #[test]
    fn test_min_score_threshold() {
        let config = ConfigBuilder::new("catalog.yml").min_score(2).build().unwrap();
        let matcher = Matcher::new(catalog(), &config);
        let ranked = matcher.rank("daily orders and capacity");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].name, "daily report");
    }

    #[tokio::test]
    async fn test_anchor_bypasses_scoring() {
        let matcher = matcher();
        let result = matcher.match_message("U1", "ACME daily capacity").await;
        assert_eq!(
            result,
            MatchResult::Resolved {
                report: Arc::clone(matcher.catalog().get("brand report").unwrap()),
                source: MatchSource::Anchor,
            }
        );
    }

    #[tokio::test]
    async fn test_history_is_recorded() {
        let matcher = matcher();
        matcher.match_message("U1", "hello").await;
        matcher.match_message("U1", "capacity").await;
        let entry = matcher.conversations().lock("U1").await;
        assert_eq!(entry.history().collect::<Vec<_>>(), vec!["hello", "capacity"]);
    }

    #[tokio::test]
    async fn test_not_configured_fallback() {
        let matcher = matcher();
        let result = matcher.match_message("U1", "hello").await;
        assert_eq!(
            result,
            MatchResult::NotFound {
                fallback: FallbackStatus::NotConfigured
            }
        );
    }

    #[tokio::test]
    async fn test_signed_number_is_not_a_selection() {
        let matcher = matcher();
        matcher.match_message("U1", "daily capacity").await;

        let result = matcher.match_message("U1", "+2").await;
        assert!(matches!(
            result,
            MatchResult::InvalidSelection {
                error: SelectionError::NotANumber,
                ..
            }
        ));
        let result = matcher.match_message("U1", "2").await;
        assert_eq!(result.resolved_name(), Some("daily report"));
    }

    #[tokio::test]
    async fn test_cancel_policy_runs_new_query() {
        let config = ConfigBuilder::new("catalog.yml")
            .pending_policy(PendingPolicy::Cancel)
            .scoring_mode(ScoringMode::TokenOverlap)
            .build()
            .unwrap();
        let matcher = Matcher::new(catalog(), &config);

        let first = matcher.match_message("U1", "daily capacity").await;
        assert_eq!(first.kind(), "ambiguous");

        let second = matcher.match_message("U1", "occupancy please").await;
        assert_eq!(second.resolved_name(), Some("capacity report"));
        assert!(matcher.conversations().lock("U1").await.pending().is_none());
    }
}
