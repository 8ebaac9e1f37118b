//! Fuzzy resolution of BI view identifiers.
//!
//! Users and catalog authors write view paths loosely (`Sales/Report`,
//! a full dashboard URL, Turkish characters with or without diacritics)
//! while the BI service returns identifiers such as `Sales/sheets/Report_169812`
//! or `Sales/Report%C3%87`. Both sides are reduced to a set of equivalent
//! forms and compared on those.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Upper bound on repeated percent-decoding of double-encoded input
const MAX_DECODE_ROUNDS: usize = 4;

fn numeric_suffix_regex() -> &'static Regex {
    static SUFFIX: OnceLock<Regex> = OnceLock::new();
    SUFFIX.get_or_init(|| Regex::new(r"(?:_\d+)+$").expect("suffix pattern is valid"))
}

/// Percent-decode until the text stops changing
fn decode_stable(text: &str) -> String {
    let mut current = text.to_string();
    for _ in 0..MAX_DECODE_ROUNDS {
        match urlencoding::decode(&current) {
            Ok(decoded) if decoded != current => current = decoded.into_owned(),
            _ => break,
        }
    }
    current
}

/// Drop diacritics; dotless ı has no decomposition so it is mapped by hand
fn strip_diacritics(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c == 'ı' { 'i' } else { c })
        .collect()
}

/// Canonical comparison key of one segment, before variants are produced
fn canonical(segment: &str) -> String {
    let decoded = decode_stable(segment);
    let without_query = decoded
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let mut key = without_query.trim().to_string();
    loop {
        let stripped = numeric_suffix_regex().replace(&key, "").trim().to_string();
        if stripped == key {
            break;
        }
        key = stripped;
    }
    key.to_lowercase()
}

/// All equivalent forms of a path segment: folded, diacritic-stripped, and
/// the URL-encoded variants of both
pub fn normalize_forms(segment: &str) -> BTreeSet<String> {
    let folded = canonical(segment);
    let plain = strip_diacritics(&folded);

    let mut forms = BTreeSet::new();
    for form in [folded, plain] {
        if form.is_empty() {
            continue;
        }
        forms.insert(urlencoding::encode(&form).into_owned());
        forms.insert(form);
    }
    forms
}

/// Reduce a dashboard URL or loose path to `workbook/.../view`
fn path_part(loose: &str) -> &str {
    let trimmed = loose.trim();
    let after_views = match trimmed.find("/views/") {
        Some(pos) => &trimmed[pos + "/views/".len()..],
        None => trimmed,
    };
    after_views
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
}

/// First and last non-empty segment of a path
fn workbook_and_view(path: &str) -> Option<(&str, &str)> {
    let mut segments = path.split('/').filter(|s| !s.trim().is_empty());
    let workbook = segments.next()?;
    let view = segments.last().unwrap_or(workbook);
    Some((workbook, view))
}

/// A remote identifier with its precomputed comparison forms
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewIdentifierCandidate {
    pub raw: String,
    pub workbook_forms: BTreeSet<String>,
    pub view_forms: BTreeSet<String>,
}

impl ViewIdentifierCandidate {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let (workbook_forms, view_forms) = match workbook_and_view(path_part(&raw)) {
            Some((workbook, view)) => (normalize_forms(workbook), normalize_forms(view)),
            None => (BTreeSet::new(), BTreeSet::new()),
        };
        Self {
            raw,
            workbook_forms,
            view_forms,
        }
    }

    fn shares_workbook(&self, target: &LooseTarget) -> bool {
        !self.workbook_forms.is_disjoint(&target.workbook_forms)
    }

    fn view_matches(&self, target: &LooseTarget) -> bool {
        self.view_forms.iter().any(|form| {
            target
                .view_forms
                .iter()
                .any(|loose| loose == form || loose.contains(form.as_str()))
        })
    }
}

/// Normalized forms of the loose path being resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LooseTarget {
    pub workbook_forms: BTreeSet<String>,
    pub view_forms: BTreeSet<String>,
}

impl LooseTarget {
    pub fn parse(loose_path: &str) -> Option<Self> {
        let (workbook, view) = workbook_and_view(path_part(loose_path))?;
        Some(Self {
            workbook_forms: normalize_forms(workbook),
            view_forms: normalize_forms(view),
        })
    }
}

/// How an identifier was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "identifier")]
pub enum Resolution {
    /// Workbook and view both matched
    Exact(String),
    /// Only the workbook matched; first candidate in that workbook
    WorkbookOnly(String),
    Unresolved,
}

impl Resolution {
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Resolution::Exact(id) | Resolution::WorkbookOnly(id) => Some(id.as_str()),
            Resolution::Unresolved => None,
        }
    }

    pub fn into_identifier(self) -> Option<String> {
        match self {
            Resolution::Exact(id) | Resolution::WorkbookOnly(id) => Some(id),
            Resolution::Unresolved => None,
        }
    }
}

/// Resolver dry-run output for the debug interfaces
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub loose_path: String,
    pub target: Option<LooseTarget>,
    pub resolution: Resolution,
    pub candidates_considered: usize,
}

/// Resolve against already-normalized candidates
pub fn resolve_candidates(candidates: &[ViewIdentifierCandidate], loose_path: &str) -> Resolution {
    let Some(target) = LooseTarget::parse(loose_path) else {
        return Resolution::Unresolved;
    };

    let mut best: Option<&ViewIdentifierCandidate> = None;
    let mut first_in_workbook: Option<&ViewIdentifierCandidate> = None;

    for candidate in candidates.iter().filter(|c| c.shares_workbook(&target)) {
        first_in_workbook.get_or_insert(candidate);
        if candidate.view_matches(&target) {
            // Longer identifiers are assumed less truncated; first wins a tie
            match best {
                Some(current) if current.raw.len() >= candidate.raw.len() => {}
                _ => best = Some(candidate),
            }
        }
    }

    match (best, first_in_workbook) {
        (Some(found), _) => Resolution::Exact(found.raw.clone()),
        (None, Some(fallback)) => Resolution::WorkbookOnly(fallback.raw.clone()),
        (None, None) => Resolution::Unresolved,
    }
}

/// Find the identifier a loose path refers to among raw remote identifiers
pub fn resolve_identifier<S: AsRef<str>>(candidates: &[S], loose_path: &str) -> Option<String> {
    let candidates: Vec<ViewIdentifierCandidate> = candidates
        .iter()
        .map(|c| ViewIdentifierCandidate::new(c.as_ref()))
        .collect();
    resolve_candidates(&candidates, loose_path).into_identifier()
}

/// Dry run: the resolution plus the forms it was computed from
pub fn explain<S: AsRef<str>>(candidates: &[S], loose_path: &str) -> ResolutionReport {
    let normalized: Vec<ViewIdentifierCandidate> = candidates
        .iter()
        .map(|c| ViewIdentifierCandidate::new(c.as_ref()))
        .collect();
    ResolutionReport {
        loose_path: loose_path.to_string(),
        target: LooseTarget::parse(loose_path),
        resolution: resolve_candidates(&normalized, loose_path),
        candidates_considered: normalized.len(),
    }
}
