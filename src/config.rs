use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// How text is scored against a keyword set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoringMode {
    /// Count keywords that occur anywhere in the text, even mid-word
    #[default]
    Containment,
    /// Count keywords that equal one of the text's word tokens
    TokenOverlap,
}

impl TryFrom<&str> for ScoringMode {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "containment" | "substring" => Ok(ScoringMode::Containment),
            "token-overlap" | "tokens" => Ok(ScoringMode::TokenOverlap),
            other => Err(Error::Config(format!(
                "Invalid scoring mode '{}'. Allowed values are: containment, token-overlap",
                other
            ))),
        }
    }
}

/// What a fresh, non-numeric message does to a pending selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingPolicy {
    /// Reject it and re-show the menu; the selection stays pending
    #[default]
    Reprompt,
    /// Drop the pending selection and match the message as a new query
    Cancel,
}

impl TryFrom<&str> for PendingPolicy {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "reprompt" => Ok(PendingPolicy::Reprompt),
            "cancel" => Ok(PendingPolicy::Cancel),
            other => Err(Error::Config(format!(
                "Invalid pending policy '{}'. Allowed values are: reprompt, cancel",
                other
            ))),
        }
    }
}

/// Settings for the chat-completions reasoning oracle
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

/// Settings for the remote BI service
#[derive(Debug, Clone)]
pub struct BiConfig {
    pub server: String,
    pub api_version: String,
    /// Site content URL; empty for the default site
    pub site: String,
    pub token_name: String,
    pub token_secret: String,
    pub timeout: Duration,
    /// Sign-in attempts per match, including the first one
    pub auth_attempts: u32,
    /// Delay before the second sign-in attempt; doubles afterwards
    pub auth_backoff: Duration,
    /// Maximum number of column headers kept per view
    pub sample_fields: usize,
}

/// Settings for the chat platform
#[derive(Debug, Clone, Default)]
pub struct SlackConfig {
    pub bot_token: Option<String>,
    /// The bot's own user id, so its messages are never answered
    pub bot_user_id: Option<String>,
    /// Signing secret used to verify inbound event requests
    pub signing_secret: Option<String>,
    pub api_base: String,
}

/// Configuration for the bot
#[derive(Debug, Clone)]
pub struct Config {
    pub catalog_path: PathBuf,
    pub scoring_mode: ScoringMode,
    pub min_score: u32,
    pub history_limit: usize,
    pub pending_policy: PendingPolicy,
    pub state_capacity: usize,
    pub state_ttl: Duration,
    pub bind_addr: String,
    pub slack: SlackConfig,
    pub oracle: Option<OracleConfig>,
    pub bi: Option<BiConfig>,
}

impl Config {
    /// Create a new default configuration
    pub fn new(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            scoring_mode: ScoringMode::default(),
            min_score: 1,
            history_limit: 3,
            pending_policy: PendingPolicy::default(),
            state_capacity: 10_000,
            state_ttl: Duration::from_secs(30 * 60),
            bind_addr: "0.0.0.0:3000".to_string(),
            slack: SlackConfig {
                bot_token: None,
                bot_user_id: None,
                signing_secret: None,
                api_base: "https://slack.com/api".to_string(),
            },
            oracle: None,
            bi: None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.min_score == 0 {
            return Err(Error::Config(
                "Minimum score must be at least 1".to_string(),
            ));
        }

        if self.history_limit == 0 {
            return Err(Error::Config(
                "History limit must be at least 1".to_string(),
            ));
        }

        if self.state_capacity == 0 {
            return Err(Error::Config(
                "Conversation state capacity must be at least 1".to_string(),
            ));
        }

        if let Some(bi) = &self.bi {
            if bi.auth_attempts == 0 {
                return Err(Error::Config(
                    "BI sign-in attempts must be at least 1".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("catalog.yml")
    }
}

/// Builder for creating configurations
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default settings
    pub fn new(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            config: Config::new(catalog_path),
        }
    }

    /// Start from the process environment (and `.env`, when present)
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine; only real parse failures matter
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(Error::Config(format!("Failed to load .env: {}", e)));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Start from an arbitrary key lookup; `from_env` is the usual entry point
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut builder = Self::new(get("CATALOG_PATH").unwrap_or_else(|| "catalog.yml".into()));

        if let Some(mode) = get("SCORING_MODE") {
            builder = builder.scoring_mode_str(&mode)?;
        }
        if let Some(v) = get("MIN_SCORE") {
            builder = builder.min_score(parse_number("MIN_SCORE", &v)?);
        }
        if let Some(v) = get("HISTORY_LIMIT") {
            builder = builder.history_limit(parse_number("HISTORY_LIMIT", &v)?);
        }
        if let Some(policy) = get("PENDING_POLICY") {
            builder = builder.pending_policy_str(&policy)?;
        }
        if let Some(v) = get("STATE_CAPACITY") {
            builder = builder.state_capacity(parse_number("STATE_CAPACITY", &v)?);
        }
        if let Some(v) = get("STATE_TTL_SECS") {
            builder = builder.state_ttl(Duration::from_secs(parse_number("STATE_TTL_SECS", &v)?));
        }
        if let Some(addr) = get("BIND_ADDR") {
            builder = builder.bind_addr(addr);
        }

        builder.config.slack.bot_token = get("SLACK_BOT_TOKEN");
        builder.config.slack.bot_user_id = get("SLACK_BOT_USER_ID");
        builder.config.slack.signing_secret = get("SLACK_SIGNING_SECRET");
        if let Some(base) = get("SLACK_API_BASE") {
            builder.config.slack.api_base = base.trim_end_matches('/').to_string();
        }

        if let Some(api_key) = get("OPENAI_API_KEY") {
            let timeout = match get("ORACLE_TIMEOUT_SECS") {
                Some(v) => parse_number("ORACLE_TIMEOUT_SECS", &v)?,
                None => 20,
            };
            builder = builder.oracle(OracleConfig {
                api_key,
                base_url: get("OPENAI_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                    .trim_end_matches('/')
                    .to_string(),
                model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                timeout: Duration::from_secs(timeout),
            });
        }

        if let (Some(server), Some(token_name), Some(token_secret)) =
            (get("BI_SERVER"), get("BI_TOKEN_NAME"), get("BI_TOKEN_SECRET"))
        {
            let timeout = match get("BI_TIMEOUT_SECS") {
                Some(v) => parse_number("BI_TIMEOUT_SECS", &v)?,
                None => 15,
            };
            let auth_attempts = match get("BI_AUTH_ATTEMPTS") {
                Some(v) => parse_number("BI_AUTH_ATTEMPTS", &v)?,
                None => 2,
            };
            let sample_fields = match get("BI_SAMPLE_FIELDS") {
                Some(v) => parse_number("BI_SAMPLE_FIELDS", &v)?,
                None => 20,
            };
            builder = builder.bi(BiConfig {
                server: server.trim_end_matches('/').to_string(),
                api_version: get("BI_API_VERSION").unwrap_or_else(|| "3.21".to_string()),
                site: get("BI_SITE").unwrap_or_default(),
                token_name,
                token_secret,
                timeout: Duration::from_secs(timeout),
                auth_attempts,
                auth_backoff: Duration::from_millis(500),
                sample_fields,
            });
        }

        Ok(builder)
    }

    /// Set the catalog file
    pub fn catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.catalog_path = path.into();
        self
    }

    /// Set the scoring mode
    pub fn scoring_mode(mut self, mode: ScoringMode) -> Self {
        self.config.scoring_mode = mode;
        self
    }

    /// Set scoring mode from string
    pub fn scoring_mode_str(mut self, mode: &str) -> Result<Self> {
        self.config.scoring_mode = ScoringMode::try_from(mode)?;
        Ok(self)
    }

    /// Set the minimum score a candidate needs
    pub fn min_score(mut self, min_score: u32) -> Self {
        self.config.min_score = min_score;
        self
    }

    /// Set how many recent messages are kept per user
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.config.history_limit = limit;
        self
    }

    /// Set the pending-selection policy
    pub fn pending_policy(mut self, policy: PendingPolicy) -> Self {
        self.config.pending_policy = policy;
        self
    }

    /// Set pending-selection policy from string
    pub fn pending_policy_str(mut self, policy: &str) -> Result<Self> {
        self.config.pending_policy = PendingPolicy::try_from(policy)?;
        Ok(self)
    }

    /// Set the maximum number of tracked users
    pub fn state_capacity(mut self, capacity: usize) -> Self {
        self.config.state_capacity = capacity;
        self
    }

    /// Set how long an idle user's state is kept
    pub fn state_ttl(mut self, ttl: Duration) -> Self {
        self.config.state_ttl = ttl;
        self
    }

    /// Set the server listen address
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    /// Enable the reasoning oracle
    pub fn oracle(mut self, oracle: OracleConfig) -> Self {
        self.config.oracle = Some(oracle);
        self
    }

    /// Enable the BI integration
    pub fn bi(mut self, bi: BiConfig) -> Self {
        self.config.bi = Some(bi);
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}
