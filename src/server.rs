//! HTTP surface: Slack events webhook, liveness, and the catalog/BI debug routes.

use crate::bot::ReportBot;
use crate::error::{Error, Result};
use crate::slack::{ReplySink, SignatureVerifier, SlackEnvelope};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<ReportBot>,
    pub sink: Arc<dyn ReplySink>,
    /// Messages from this user are the bot's own
    pub bot_user_id: Option<String>,
    /// Inbound events are only accepted with a valid signature when set
    pub verifier: Option<Arc<SignatureVerifier>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/slack/events", post(slack_events))
        .route("/catalog", get(catalog))
        .route("/debug/views", get(debug_views))
        .route("/debug/resolve", get(debug_resolve))
        .with_state(state)
}

/// Periodically drop conversation state idle past its TTL
fn spawn_state_sweeper(bot: Arc<ReportBot>) {
    let period = bot
        .matcher()
        .conversations()
        .ttl()
        .max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            let evicted = bot.matcher().conversations().evict_expired();
            if evicted > 0 {
                tracing::debug!(evicted, "expired conversation state");
            }
        }
    });
}

/// Bind and serve until the process is stopped
pub async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    spawn_state_sweeper(Arc::clone(&state.bot));
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": env!("CARGO_PKG_NAME") }))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Signature(format!("missing {} header", name)))
}

fn verify_request(verifier: &SignatureVerifier, headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let timestamp = header(headers, "x-slack-request-timestamp")?;
    let signature = header(headers, "x-slack-signature")?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    verifier.verify(timestamp, body, signature, now)
}

async fn slack_events(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(verifier) = &state.verifier {
        if let Err(e) = verify_request(verifier, &headers, &body) {
            tracing::warn!(error = %e, "rejecting unsigned Slack request");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    if let Some(retry) = headers.get("x-slack-retry-num") {
        tracing::debug!(?retry, "dropping Slack redelivery");
        return StatusCode::OK.into_response();
    }

    let envelope: SlackEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "unreadable Slack payload");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match envelope {
        SlackEnvelope::UrlVerification { challenge } => {
            Json(json!({ "challenge": challenge })).into_response()
        }
        SlackEnvelope::EventCallback { event } => {
            if let Some(inbound) = event.to_inbound(state.bot_user_id.as_deref()) {
                tokio::spawn(async move {
                    let replies = state.bot.handle(&inbound).await;
                    for reply in &replies {
                        if let Err(e) = state.sink.post(reply).await {
                            tracing::warn!(channel = %reply.channel, error = %e, "failed to post reply");
                        }
                    }
                });
            }
            StatusCode::OK.into_response()
        }
        SlackEnvelope::Other => StatusCode::OK.into_response(),
    }
}

async fn catalog(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.bot.matcher().catalog().keyword_sets()))
}

fn bi_not_configured() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "BI service is not configured" })),
    )
        .into_response()
}

fn bi_error(e: Error) -> Response {
    tracing::warn!(error = %e, "BI debug request failed");
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

async fn debug_views(State(state): State<AppState>) -> Response {
    let Some(metadata) = state.bot.matcher().metadata() else {
        return bi_not_configured();
    };
    match metadata.view_identifiers().await {
        Ok(views) => Json(json!({ "count": views.len(), "views": views })).into_response(),
        Err(e) => bi_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct ResolveQuery {
    path: String,
}

async fn debug_resolve(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
) -> Response {
    let Some(metadata) = state.bot.matcher().metadata() else {
        return bi_not_configured();
    };
    match metadata.dry_run(&query.path).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => bi_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, ReportDescriptor};
    use crate::config::Config;
    use crate::matcher::Matcher;
    use crate::types::Reply;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingSink {
        posted: Mutex<Vec<Reply>>,
    }

    #[async_trait::async_trait]
    impl ReplySink for RecordingSink {
        async fn post(&self, reply: &Reply) -> crate::Result<()> {
            self.posted.lock().unwrap().push(reply.clone());
            Ok(())
        }
    }

    fn state(sink: Arc<RecordingSink>) -> AppState {
        let catalog = Catalog::new(vec![
            ReportDescriptor::new("capacity report", ["capacity"], "Beds in use", "u1"),
            ReportDescriptor::new("daily report", ["daily"], "", "u2"),
        ])
        .unwrap();
        let matcher = Matcher::new(Arc::new(catalog), &Config::default());
        AppState {
            bot: Arc::new(ReportBot::new(Arc::new(matcher))),
            sink,
            bot_user_id: Some("UBOT".to_string()),
            verifier: None,
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(state(Arc::default()));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_url_verification_echoes_challenge() {
        let app = router(state(Arc::default()));
        let response = app
            .oneshot(post_json(
                "/slack/events",
                json!({"type": "url_verification", "challenge": "c-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, json!({"challenge": "c-1"}));
    }

    fn signed(
        verifier: &SignatureVerifier,
        timestamp: &str,
        signature: Option<&str>,
        body: &str,
    ) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("content-type", "application/json")
            .header("x-slack-request-timestamp", timestamp);
        let signature = match signature {
            Some(signature) => signature.to_string(),
            None => verifier.sign(timestamp, body.as_bytes()).unwrap(),
        };
        request = request.header("x-slack-signature", signature);
        request.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_signed_requests_only() {
        let verifier = Arc::new(SignatureVerifier::new("8f742231b10e8888abcd99yyyzzz85a5"));
        let mut state = state(Arc::default());
        state.verifier = Some(Arc::clone(&verifier));

        let body = json!({"type": "url_verification", "challenge": "c-2"}).to_string();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .to_string();

        let response = router(state.clone())
            .oneshot(signed(&verifier, &now, None, &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"challenge": "c-2"}));

        let forged = SignatureVerifier::new("not-the-secret");
        let response = router(state.clone())
            .oneshot(signed(&forged, &now, None, &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router(state.clone())
            .oneshot(signed(&verifier, "1531420618", None, &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router(state.clone())
            .oneshot(signed(&verifier, &now, Some("v0=deadbeef"), &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Unsigned
        let response = router(state)
            .oneshot(post_json("/slack/events", json!({"type": "url_verification", "challenge": "c-3"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_bad_request() {
        let response = router(state(Arc::default()))
            .oneshot(
                Request::post("/slack/events")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_message_event_posts_reply() {
        let sink = Arc::new(RecordingSink::default());
        let app = router(state(sink.clone()));
        let response = app
            .oneshot(post_json(
                "/slack/events",
                json!({
                    "type": "event_callback",
                    "event": {"type": "message", "user": "U1", "text": "capacity", "channel": "D1"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        for _ in 0..100 {
            if !sink.posted.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let posted = sink.posted.lock().unwrap().clone();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].channel, "D1");
        assert_eq!(posted[0].text, "*capacity report*\nBeds in use\nu1");
    }

    #[tokio::test]
    async fn test_retries_and_own_messages_are_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let state = state(sink.clone());

        let mut retry = post_json(
            "/slack/events",
            json!({
                "type": "event_callback",
                "event": {"type": "message", "user": "U1", "text": "capacity"}
            }),
        );
        retry
            .headers_mut()
            .insert("x-slack-retry-num", "1".parse().unwrap());
        let response = router(state.clone()).oneshot(retry).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let own = post_json(
            "/slack/events",
            json!({
                "type": "event_callback",
                "event": {"type": "message", "user": "UBOT", "text": "capacity"}
            }),
        );
        router(state.clone()).oneshot(own).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sink.posted.lock().unwrap().is_empty());
        assert!(state.bot.matcher().conversations().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_and_debug_routes() {
        let state = state(Arc::default());

        let response = router(state.clone())
            .oneshot(Request::get("/catalog").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            json!({"capacity report": ["capacity"], "daily report": ["daily"]})
        );

        let response = router(state.clone())
            .oneshot(
                Request::get("/debug/resolve?path=Sales/Report")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = router(state)
            .oneshot(Request::get("/debug/views").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
