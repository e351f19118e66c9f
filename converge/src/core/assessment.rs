//! Critique severity vocabulary and free-text assessment parsing.
//!
//! The vocabulary is closed and ordered worst to best. Parsing is fail-safe:
//! text that names no severity resolves to the worst level, so an unreadable
//! critique can never end a phase.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Critique severity, ordered worst (`MajorRevision`) to best (`Excellent`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    MajorRevision,
    MinorRefinement,
    Good,
    VeryGood,
    Excellent,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::MajorRevision,
        Severity::MinorRefinement,
        Severity::Good,
        Severity::VeryGood,
        Severity::Excellent,
    ];

    pub fn worst() -> Self {
        Severity::MajorRevision
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::MajorRevision => "MAJOR_REVISION",
            Severity::MinorRefinement => "MINOR_REFINEMENT",
            Severity::Good => "GOOD",
            Severity::VeryGood => "VERY_GOOD",
            Severity::Excellent => "EXCELLENT",
        }
    }

    /// `{EXCELLENT, VERY_GOOD}`.
    pub fn default_terminal_set() -> BTreeSet<Severity> {
        BTreeSet::from([Severity::VeryGood, Severity::Excellent])
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        first_severity(s).ok_or_else(|| format!("unknown severity '{s}'"))
    }
}

// Matches "VERY GOOD", "very_good", "Major Revision Needed", etc.
static SEVERITY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:(major)[ _-]+revision|(minor)[ _-]+refinement|(very)[ _-]+good|(excellent)|(good))\b",
    )
    .expect("severity regex")
});

static ASSESSMENT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[#*\s]*(?:overall\s+)?assessment\b[*\s]*[:\-]?(.*)$")
        .expect("assessment regex")
});

static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(r"^\s*(?:[-*+\u{2022}]|\d+[.)])\s+(.+?)\s*$").expect("list item regex")
    });

fn severities_in(text: &str) -> impl Iterator<Item = Severity> + '_ {
    SEVERITY_TOKEN.captures_iter(text).filter_map(|caps| {
        if caps.get(1).is_some() {
            Some(Severity::MajorRevision)
        } else if caps.get(2).is_some() {
            Some(Severity::MinorRefinement)
        } else if caps.get(3).is_some() {
            Some(Severity::VeryGood)
        } else if caps.get(4).is_some() {
            Some(Severity::Excellent)
        } else if caps.get(5).is_some() {
            Some(Severity::Good)
        } else {
            None
        }
    })
}

/// First severity token in `text`, if any.
pub fn first_severity(text: &str) -> Option<Severity> {
    severities_in(text).next()
}

/// Worst severity mentioned anywhere in `text`, if any.
pub fn worst_severity(text: &str) -> Option<Severity> {
    severities_in(text).min()
}

/// Resolve a critic's assessment from extracted fields and raw text.
///
/// An `assessment` field or an `Assessment:` line is authoritative (first token
/// wins). Without one, the worst severity mentioned in the whole text is used.
/// Returns `None` when no token appears at all.
pub fn parse_assessment(fields: &BTreeMap<String, String>, raw_text: &str) -> Option<Severity> {
    if let Some(value) = fields.get("assessment")
        && let Some(severity) = first_severity(value)
    {
        return Some(severity);
    }
    for caps in ASSESSMENT_LINE.captures_iter(raw_text) {
        if let Some(rest) = caps.get(1)
            && let Some(severity) = first_severity(rest.as_str())
        {
            return Some(severity);
        }
    }
    worst_severity(raw_text)
}

/// Same as [`parse_assessment`], falling back to [`Severity::worst`].
pub fn resolve_assessment(fields: &BTreeMap<String, String>, raw_text: &str) -> (Severity, bool) {
    match parse_assessment(fields, raw_text) {
        Some(severity) => (severity, true),
        None => (Severity::worst(), false),
    }
}

/// Extract ordered recommendations.
///
/// Looks for a `recommendations` field, then any field mentioning
/// recommendations or improvements, then a matching section in the raw text.
pub fn parse_recommendations(fields: &BTreeMap<String, String>, raw_text: &str) -> Vec<String> {
    if let Some(value) = fields.get("recommendations") {
        let items = list_items(value);
        if !items.is_empty() {
            return items;
        }
    }
    for (key, value) in fields {
        if key.contains("recommend") || key.contains("improvement") {
            let items = list_items(value);
            if !items.is_empty() {
                return items;
            }
        }
    }
    list_items(&recommendations_section(raw_text))
}

/// Parse bullet or numbered items; plain non-empty lines when no markers exist.
pub fn list_items(text: &str) -> Vec<String> {
    let bulleted: Vec<String> = text
        .lines()
        .filter_map(|line| LIST_ITEM.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|item| !item.is_empty())
        .collect();
    if !bulleted.is_empty() {
        return bulleted;
    }
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn recommendations_section(raw_text: &str) -> String {
    let mut collecting = false;
    let mut section = Vec::new();
    for line in raw_text.lines() {
        let trimmed = line.trim_start();
        let lowered = trimmed.to_lowercase();
        let is_heading = trimmed.starts_with('#') || trimmed.starts_with("**");
        if is_heading || lowered.ends_with(':') {
            if lowered.contains("recommendation") || lowered.contains("areas for improvement") {
                collecting = true;
                continue;
            }
            if collecting && is_heading {
                break;
            }
        }
        if collecting {
            section.push(line);
        }
    }
    section.join("\n")
}
