//! Report catalog: the static registry of dashboards the bot can point to.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A reportable destination and the keywords that select it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportDescriptor {
    pub name: String,
    /// Case-folded, de-duplicated, in declaration order
    pub keywords: Vec<String>,
    pub description: String,
    pub url: String,
    /// Case-folded substrings that select this report outright
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub anchors: Vec<String>,
    /// Loose BI view path (`Workbook/View`) used to fetch field metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
}

impl ReportDescriptor {
    pub fn new<I, S>(
        name: impl Into<String>,
        keywords: I,
        description: impl Into<String>,
        url: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into().trim().to_string(),
            keywords: fold_unique(keywords),
            description: description.into(),
            url: url.into(),
            anchors: Vec::new(),
            view: None,
        }
    }

    /// Add strong anchor substrings
    pub fn with_anchors<I, S>(mut self, anchors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.anchors = fold_unique(anchors);
        self
    }

    /// Attach a loose BI view path
    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }
}

/// Trim, case-fold and de-duplicate while keeping first-seen order
fn fold_unique<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let folded = item.as_ref().trim().to_lowercase();
        if !folded.is_empty() && !out.contains(&folded) {
            out.push(folded);
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct RawReport {
    keywords: Vec<String>,
    #[serde(default)]
    description: String,
    url: String,
    #[serde(default)]
    anchors: Vec<String>,
    #[serde(default)]
    view: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    reports: IndexMap<String, RawReport>,
}

/// Insertion-ordered, read-only collection of reports
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<Arc<ReportDescriptor>>,
    /// Folded name -> position in `entries`
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog, checking names are unique and keyword sets non-empty
    pub fn new(reports: Vec<ReportDescriptor>) -> Result<Self> {
        if reports.is_empty() {
            return Err(Error::Catalog("catalog has no reports".to_string()));
        }

        let mut entries = Vec::with_capacity(reports.len());
        let mut index = HashMap::with_capacity(reports.len());

        for report in reports {
            if report.name.is_empty() {
                return Err(Error::Catalog("report with an empty name".to_string()));
            }
            if report.keywords.is_empty() {
                return Err(Error::Catalog(format!(
                    "report '{}' has no keywords",
                    report.name
                )));
            }
            let key = report.name.to_lowercase();
            if index.contains_key(&key) {
                return Err(Error::Catalog(format!(
                    "duplicate report name '{}'",
                    report.name
                )));
            }
            index.insert(key, entries.len());
            entries.push(Arc::new(report));
        }

        Ok(Self { entries, index })
    }

    /// Parse a catalog from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let raw: RawCatalog = serde_yaml::from_str(contents)?;

        let reports = raw
            .reports
            .into_iter()
            .map(|(name, raw)| {
                let mut report = ReportDescriptor::new(name, raw.keywords, raw.description, raw.url)
                    .with_anchors(raw.anchors);
                report.view = raw.view.filter(|v| !v.trim().is_empty());
                report
            })
            .collect();

        Self::new(reports)
    }

    /// Load a catalog file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Catalog(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Case-insensitive lookup by report name
    pub fn get(&self, name: &str) -> Option<&Arc<ReportDescriptor>> {
        self.index
            .get(&name.trim().to_lowercase())
            .map(|&i| &self.entries[i])
    }

    /// Reports in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ReportDescriptor>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Report name -> keywords, for the introspection endpoint
    pub fn keyword_sets(&self) -> IndexMap<&str, &[String]> {
        self.entries
            .iter()
            .map(|r| (r.name.as_str(), r.keywords.as_slice()))
            .collect()
    }
}
