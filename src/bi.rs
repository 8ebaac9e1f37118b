//! Client for a Tableau-style BI REST API: personal-access-token sign-in,
//! view listing and CSV view data.

use crate::config::BiConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Safety cap on view-listing pages
const MAX_VIEW_PAGES: u32 = 20;
const PAGE_SIZE: u32 = 1000;

/// An authenticated session; the token is reused for every lookup in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiSession {
    pub token: String,
    pub site_id: String,
}

/// One view as listed by the BI service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// `Workbook/sheets/View`, the identifier the resolver matches on
    #[serde(rename = "contentUrl")]
    pub content_url: String,
}

/// Remote BI service, as seen by the metadata provider
#[async_trait]
pub trait BiService: Send + Sync {
    async fn sign_in(&self) -> Result<BiSession>;

    async fn list_views(&self, session: &BiSession) -> Result<Vec<ViewRecord>>;

    /// Column headers of a view's data, at most `limit` of them
    async fn view_headers(&self, session: &BiSession, view_id: &str, limit: usize)
        -> Result<Vec<String>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    credentials: SignInCredentials<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInCredentials<'a> {
    personal_access_token_name: &'a str,
    personal_access_token_secret: &'a str,
    site: SiteRef<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SiteRef<'a> {
    content_url: &'a str,
}

#[derive(Deserialize)]
struct SignInResponse {
    credentials: SignedInCredentials,
}

#[derive(Deserialize)]
struct SignedInCredentials {
    token: String,
    site: SignedInSite,
}

#[derive(Deserialize)]
struct SignedInSite {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewsResponse {
    #[serde(default)]
    pagination: Option<Pagination>,
    #[serde(default)]
    views: ViewList,
}

#[derive(Deserialize, Default)]
struct ViewList {
    #[serde(default)]
    view: Vec<ViewRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    /// Sent as a string by the API
    total_available: String,
}

/// Read the header row of CSV view data
pub fn parse_csv_headers(body: &str, limit: usize) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader.headers()?;
    Ok(headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .filter(|h| !h.is_empty())
        .take(limit)
        .collect())
}

/// HTTP implementation of [`BiService`]
pub struct HttpBiClient {
    client: reqwest::Client,
    config: BiConfig,
}

impl HttpBiClient {
    pub fn new(config: BiConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn api(&self, path: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.config.server, self.config.api_version, path
        )
    }
}

#[async_trait]
impl BiService for HttpBiClient {
    async fn sign_in(&self) -> Result<BiSession> {
        let request = SignInRequest {
            credentials: SignInCredentials {
                personal_access_token_name: &self.config.token_name,
                personal_access_token_secret: &self.config.token_secret,
                site: SiteRef {
                    content_url: &self.config.site,
                },
            },
        };

        let response = self
            .client
            .post(self.api("auth/signin"))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::UpstreamAuth(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamAuth(format!("sign-in returned {}", status)));
        }

        let body: SignInResponse = response
            .json()
            .await
            .map_err(|e| Error::UpstreamAuth(format!("unreadable sign-in response: {}", e)))?;

        Ok(BiSession {
            token: body.credentials.token,
            site_id: body.credentials.site.id,
        })
    }

    async fn list_views(&self, session: &BiSession) -> Result<Vec<ViewRecord>> {
        let mut views = Vec::new();

        for page in 1..=MAX_VIEW_PAGES {
            let url = self.api(&format!(
                "sites/{}/views?pageSize={}&pageNumber={}",
                session.site_id, PAGE_SIZE, page
            ));
            let body: ViewsResponse = self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .header("X-Tableau-Auth", &session.token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let received = body.views.view.len();
            views.extend(body.views.view);

            let total = body
                .pagination
                .and_then(|p| p.total_available.parse::<usize>().ok())
                .unwrap_or(views.len());
            if received == 0 || views.len() >= total {
                break;
            }
        }

        Ok(views)
    }

    async fn view_headers(
        &self,
        session: &BiSession,
        view_id: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let url = self.api(&format!(
            "sites/{}/views/{}/data",
            session.site_id, view_id
        ));
        let body = self
            .client
            .get(url)
            .header("X-Tableau-Auth", &session.token)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_csv_headers(&body, limit)
    }
}
