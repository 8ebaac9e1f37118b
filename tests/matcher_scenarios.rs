use async_trait::async_trait;
use reportbot::bi::{BiService, BiSession, ViewRecord};
use reportbot::metadata::MetadataProvider;
use reportbot::oracle::{OraclePrompt, ReasoningOracle};
use reportbot::prelude::*;
use reportbot::types::{FallbackStatus, MatchSource, SelectionError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Oracle that answers with a fixed text and records every prompt
struct ScriptedOracle {
    answer: std::result::Result<String, String>,
    delay: Duration,
    prompts: Mutex<Vec<OraclePrompt>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    fn answering(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Ok(answer.to_string()),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Err(message.to_string()),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answer: Ok("capacity report".to_string()),
            delay,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    async fn ask(&self, prompt: &OraclePrompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer.clone().map_err(Error::Oracle)
    }
}

struct FixedBi;

#[async_trait]
impl BiService for FixedBi {
    async fn sign_in(&self) -> Result<BiSession> {
        Ok(BiSession {
            token: "token".to_string(),
            site_id: "site".to_string(),
        })
    }

    async fn list_views(&self, _session: &BiSession) -> Result<Vec<ViewRecord>> {
        Ok(vec![ViewRecord {
            id: "view-1".to_string(),
            name: "Capacity".to_string(),
            content_url: "Ops/sheets/Capacity_4411".to_string(),
        }])
    }

    async fn view_headers(
        &self,
        _session: &BiSession,
        _view_id: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        Ok(["Site", "Beds", "Occupied"]
            .iter()
            .take(limit)
            .map(|s| s.to_string())
            .collect())
    }
}

fn catalog() -> Arc<Catalog> {
    Arc::new(
        Catalog::new(vec![
            ReportDescriptor::new("capacity report", ["capacity", "occupancy"], "", "u1")
                .with_view("Ops/Capacity"),
            ReportDescriptor::new("daily report", ["daily", "orders"], "", "u2"),
        ])
        .unwrap(),
    )
}

fn three_way_catalog() -> Arc<Catalog> {
    Arc::new(
        Catalog::new(vec![
            ReportDescriptor::new("alpha", ["shared", "alpha"], "", "a"),
            ReportDescriptor::new("beta", ["shared"], "", "b"),
            ReportDescriptor::new("gamma", ["shared"], "", "c"),
        ])
        .unwrap(),
    )
}

fn matcher(catalog: Arc<Catalog>) -> Matcher {
    Matcher::new(catalog, &Config::default())
}

fn names(result: &MatchResult) -> Vec<String> {
    match result {
        MatchResult::Ambiguous { candidates } | MatchResult::InvalidSelection { candidates, .. } => {
            candidates.iter().map(|c| c.name.clone()).collect()
        }
        other => panic!("expected a menu, got {:?}", other),
    }
}

#[tokio::test]
async fn test_capacity_daily_scenario() {
    let oracle = ScriptedOracle::answering("none");
    let matcher = matcher(catalog()).with_oracle(oracle.clone());

    let result = matcher.match_message("U1", "what is today's capacity").await;
    assert_eq!(result.resolved_name(), Some("capacity report"));

    let result = matcher.match_message("U2", "daily capacity numbers").await;
    assert_eq!(names(&result), vec!["capacity report", "daily report"]);

    let result = matcher.match_message("U3", "hello").await;
    assert_eq!(
        result,
        MatchResult::NotFound {
            fallback: FallbackStatus::NoAnswer
        }
    );
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn test_selection_reply_resolves_and_clears() {
    let matcher = matcher(three_way_catalog());

    let result = matcher.match_message("U1", "shared alpha").await;
    assert_eq!(names(&result), vec!["alpha", "beta", "gamma"]);

    let result = matcher.match_message("U1", " 2 ").await;
    assert_eq!(
        result,
        MatchResult::Resolved {
            report: Arc::clone(matcher.catalog().get("beta").unwrap()),
            source: MatchSource::Selection,
        }
    );
    assert!(matcher.conversations().lock("U1").await.pending().is_none());
}

#[tokio::test]
async fn test_out_of_range_keeps_pending() {
    let matcher = matcher(three_way_catalog());
    matcher.match_message("U1", "shared").await;

    let result = matcher.match_message("U1", "5").await;
    match &result {
        MatchResult::InvalidSelection { error, .. } => {
            assert_eq!(*error, SelectionError::OutOfRange { given: 5, max: 3 });
        }
        other => panic!("expected invalid selection, got {:?}", other),
    }
    assert_eq!(names(&result), vec!["alpha", "beta", "gamma"]);

    // Default policy re-prompts on free text too
    let result = matcher.match_message("U1", "never mind").await;
    assert_eq!(result.kind(), "invalid_selection");

    let result = matcher.match_message("U1", "3").await;
    assert_eq!(result.resolved_name(), Some("gamma"));
}

#[tokio::test]
async fn test_expired_menu_does_not_capture_selection() {
    let config = ConfigBuilder::new("catalog.yml")
        .state_ttl(Duration::from_millis(10))
        .build()
        .unwrap();
    let matcher = Matcher::new(three_way_catalog(), &config);

    let result = matcher.match_message("U1", "shared").await;
    assert_eq!(result.kind(), "ambiguous");

    tokio::time::sleep(Duration::from_millis(50)).await;

    // The menu expired with the rest of the user's state
    let result = matcher.match_message("U1", "2").await;
    assert_eq!(result.kind(), "not_found");
    assert_eq!(matcher.conversations().len(), 1);
}

#[tokio::test]
async fn test_pending_state_is_per_user() {
    let matcher = matcher(three_way_catalog());
    matcher.match_message("U1", "shared").await;

    // U2 has nothing pending, so "2" is an ordinary (unmatched) query
    let result = matcher.match_message("U2", "2").await;
    assert_eq!(result.kind(), "not_found");

    let result = matcher.match_message("U1", "1").await;
    assert_eq!(result.resolved_name(), Some("alpha"));
}

#[tokio::test]
async fn test_oracle_answer_resolves() {
    let oracle = ScriptedOracle::answering("I'd go with the Daily Report.");
    let matcher = matcher(catalog()).with_oracle(oracle.clone());

    matcher.match_message("U1", "good morning").await;
    let result = matcher.match_message("U1", "how did sales go yesterday").await;
    assert_eq!(
        result,
        MatchResult::Resolved {
            report: Arc::clone(matcher.catalog().get("daily report").unwrap()),
            source: MatchSource::Oracle,
        }
    );
    assert_eq!(oracle.calls(), 2);

    let prompts = oracle.prompts.lock().unwrap();
    // History excludes the message being asked about
    assert!(prompts[1].user.contains("- good morning"));
    assert!(!prompts[1].user.contains("- how did sales go yesterday"));
    assert!(prompts[1].user.ends_with("Question: how did sales go yesterday"));
}

#[tokio::test]
async fn test_oracle_failure_is_unavailable() {
    let oracle = ScriptedOracle::failing("rate limited");
    let matcher = matcher(catalog()).with_oracle(oracle.clone());

    let result = matcher.match_message("U1", "hello").await;
    assert!(matches!(
        result,
        MatchResult::NotFound {
            fallback: FallbackStatus::Unavailable(_)
        }
    ));
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn test_oracle_timeout_is_unavailable() {
    let oracle = ScriptedOracle::slow(Duration::from_secs(5));
    let matcher = matcher(catalog())
        .with_oracle(oracle.clone())
        .with_oracle_timeout(Duration::from_millis(20));

    let result = matcher.match_message("U1", "hello").await;
    match result {
        MatchResult::NotFound {
            fallback: FallbackStatus::Unavailable(reason),
        } => assert!(reason.contains("Timed out")),
        other => panic!("expected a timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_prompt_carries_bi_fields() {
    let oracle = ScriptedOracle::answering("none");
    let metadata = MetadataProvider::new(Arc::new(FixedBi), Duration::from_secs(1)).with_sample_fields(2);
    let matcher = matcher(catalog())
        .with_oracle(oracle.clone())
        .with_metadata(Arc::new(metadata));

    matcher.match_message("U1", "hello").await;

    let prompts = oracle.prompts.lock().unwrap();
    assert!(prompts[0].user.contains("- capacity report\n  fields: Site, Beds\n"));
    assert!(prompts[0].user.contains("- daily report\n"));
}

#[tokio::test]
async fn test_same_user_messages_serialize() {
    let oracle = ScriptedOracle::slow(Duration::from_millis(30));
    let matcher = Arc::new(matcher(three_way_catalog()).with_oracle(oracle.clone()));

    // First message goes to the slow oracle; the menu request must wait for it
    let first = {
        let matcher = Arc::clone(&matcher);
        tokio::spawn(async move { matcher.match_message("U1", "hello").await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = {
        let matcher = Arc::clone(&matcher);
        tokio::spawn(async move { matcher.match_message("U1", "shared").await })
    };

    first.await.unwrap();
    assert_eq!(second.await.unwrap().kind(), "ambiguous");

    let entry = matcher.conversations().lock("U1").await;
    assert_eq!(entry.history().collect::<Vec<_>>(), vec!["hello", "shared"]);
}
