//! Chat bot that routes free-text questions to reporting dashboards.
//!
//! Messages are scored against a static catalog of reports. A single hit is
//! answered directly, several hits produce a numbered menu, and no hit falls
//! back to an optional reasoning oracle whose prompt can be enriched with
//! field names fetched from the BI service.

pub mod bi;
pub mod bot;
pub mod catalog;
pub mod config;
pub mod conversation;
pub mod error;
pub mod matcher;
pub mod metadata;
pub mod oracle;
pub mod resolver;
pub mod scorer;
pub mod server;
pub mod slack;
pub mod types;

pub use bot::ReportBot;
pub use catalog::{Catalog, ReportDescriptor};
pub use config::{Config, ConfigBuilder, PendingPolicy, ScoringMode};
pub use error::{Error, Result};
pub use matcher::Matcher;
pub use resolver::{resolve_identifier, Resolution};
pub use types::{FallbackStatus, InboundEvent, MatchResult, MatchSource, Reply, ScoredCandidate};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::bot::ReportBot;
    pub use crate::catalog::{Catalog, ReportDescriptor};
    pub use crate::config::{Config, ConfigBuilder, PendingPolicy, ScoringMode};
    pub use crate::error::{Error, Result};
    pub use crate::matcher::Matcher;
    pub use crate::oracle::ReasoningOracle;
    pub use crate::types::{InboundEvent, MatchResult, Reply};
}
