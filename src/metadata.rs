//! Per-report field lists from the BI service, used to enrich the oracle
//! prompt. Every failure here degrades to an empty list.

use crate::bi::{BiService, BiSession, ViewRecord};
use crate::catalog::ReportDescriptor;
use crate::error::{Error, Result};
use crate::resolver::{self, ResolutionReport, ViewIdentifierCandidate};
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Run a BI call under the per-call timeout
async fn bounded<T>(
    timeout: Duration,
    what: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("BI {} after {:?}", what, timeout))),
    }
}

/// Fetches field metadata for catalog reports
pub struct MetadataProvider {
    service: Arc<dyn BiService>,
    timeout: Duration,
    auth_attempts: u32,
    auth_backoff: Duration,
    sample_fields: usize,
}

impl MetadataProvider {
    pub fn new(service: Arc<dyn BiService>, timeout: Duration) -> Self {
        Self {
            service,
            timeout,
            auth_attempts: 2,
            auth_backoff: Duration::from_millis(500),
            sample_fields: 20,
        }
    }

    /// Sign-in attempts (first one included) and the initial backoff
    pub fn with_auth_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.auth_attempts = attempts.max(1);
        self.auth_backoff = backoff;
        self
    }

    pub fn with_sample_fields(mut self, sample_fields: usize) -> Self {
        self.sample_fields = sample_fields;
        self
    }

    /// Sign in, retrying with exponential backoff
    async fn sign_in(&self) -> Result<BiSession> {
        let mut delay = self.auth_backoff;
        let mut last_error = None;

        for attempt in 1..=self.auth_attempts {
            match bounded(self.timeout, "sign-in", self.service.sign_in()).await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "BI sign-in failed");
                    last_error = Some(e);
                }
            }
            if attempt < self.auth_attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Err(Error::UpstreamAuth(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    async fn session_and_views(&self) -> Result<(BiSession, Vec<ViewRecord>)> {
        let session = self.sign_in().await?;
        let views = bounded(self.timeout, "view listing", self.service.list_views(&session)).await?;
        Ok((session, views))
    }

    /// Field names for every report that names a view.
    ///
    /// Reports without a view, or whose lookup fails, map to an empty list.
    pub async fn fields_for(&self, reports: &[Arc<ReportDescriptor>]) -> HashMap<String, Vec<String>> {
        let mut fields: HashMap<String, Vec<String>> = reports
            .iter()
            .map(|r| (r.name.clone(), Vec::new()))
            .collect();

        if !reports.iter().any(|r| r.view.is_some()) {
            return fields;
        }

        let (session, views) = match self.session_and_views().await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "BI metadata unavailable; continuing without fields");
                return fields;
            }
        };

        let candidates: Vec<ViewIdentifierCandidate> = views
            .iter()
            .map(|v| ViewIdentifierCandidate::new(v.content_url.as_str()))
            .collect();

        let lookups = reports.iter().filter_map(|report| {
            let loose = report.view.as_deref()?;
            let view_id = match resolver::resolve_candidates(&candidates, loose).identifier() {
                Some(identifier) => views
                    .iter()
                    .find(|v| v.content_url == identifier)
                    .map(|v| v.id.clone()),
                None => None,
            };
            let session = &session;
            Some(async move {
                let result = match view_id {
                    Some(id) => {
                        bounded(
                            self.timeout,
                            "view data",
                            self.service.view_headers(session, &id, self.sample_fields),
                        )
                        .await
                    }
                    None => Err(Error::LookupMiss(loose.to_string())),
                };
                (report.name.clone(), result)
            })
        });

        for (name, result) in join_all(lookups).await {
            match result {
                Ok(headers) => {
                    fields.insert(name, headers);
                }
                Err(e) => {
                    tracing::warn!(report = %name, error = %e, "no BI fields for report");
                }
            }
        }

        fields
    }

    /// Raw identifiers of every view, for the debug interface
    pub async fn view_identifiers(&self) -> Result<Vec<String>> {
        let (_, views) = self.session_and_views().await?;
        Ok(views.into_iter().map(|v| v.content_url).collect())
    }

    /// Resolver dry run against the live view list
    pub async fn dry_run(&self, loose_path: &str) -> Result<ResolutionReport> {
        let identifiers = self.view_identifiers().await?;
        Ok(resolver::explain(&identifiers, loose_path))
    }
}
