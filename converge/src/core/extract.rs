//! Structured output extraction from free-form model text.
//!
//! Two modes, tried in order:
//! - heading-delimited: every level-1 `# Name` line opens a field that runs
//!   until the next level-1 heading (deeper headings stay inside the value)
//! - quasi-JSON: a top-level object, parsed directly and, on failure, once
//!   more after [`repair_json`]
//!
//! Extraction never invents content. Expected fields that were not found are
//! reported in [`Extraction::missing`]; callers decide whether that is fatal.

use std::collections::BTreeMap;

use serde_json::Value;

use super::repair::{repair_json, strip_code_fence};

/// Which parsing path produced the fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    Headings,
    Json,
    /// JSON that only parsed after repair.
    RepairedJson,
    /// Nothing structured was found.
    Unstructured,
}

/// Result of [`extract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub fields: BTreeMap<String, String>,
    pub missing: Vec<String>,
    pub mode: ExtractionMode,
}

impl Extraction {
    /// True when structure was found and every expected field is present.
    pub fn ok(&self) -> bool {
        self.mode != ExtractionMode::Unstructured && self.missing.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Normalize a heading or JSON key: lowercase, runs of non-alphanumerics to `_`.
pub fn normalize_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            pending_sep = false;
            key.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    key
}

/// Extract named fields from `raw_text`.
///
/// `expected` holds normalized field names (see [`normalize_key`]).
pub fn extract(raw_text: &str, expected: &[&str]) -> Extraction {
    let (fields, mode) = match heading_fields(raw_text) {
        Some(fields) => (fields, ExtractionMode::Headings),
        None => json_fields(raw_text)
            .unwrap_or_else(|| (BTreeMap::new(), ExtractionMode::Unstructured)),
    };
    let missing = expected
        .iter()
        .filter(|name| !fields.contains_key(**name))
        .map(|name| (*name).to_string())
        .collect();
    Extraction {
        fields,
        missing,
        mode,
    }
}

fn heading_name(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('#')?;
    if rest.starts_with('#') {
        return None;
    }
    let name = rest.trim();
    (!name.is_empty()).then_some(name)
}

fn heading_fields(raw_text: &str) -> Option<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    let mut in_fence = false;

    for line in raw_text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        if !in_fence && let Some(name) = heading_name(line) {
            if let Some((key, lines)) = current.take() {
                insert_first(&mut fields, key, &lines);
            }
            current = Some((normalize_key(name), Vec::new()));
            continue;
        }
        if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some((key, lines)) = current.take() {
        insert_first(&mut fields, key, &lines);
    }
    (!fields.is_empty()).then_some(fields)
}

fn insert_first(fields: &mut BTreeMap<String, String>, key: String, lines: &[&str]) {
    if key.is_empty() {
        return;
    }
    fields
        .entry(key)
        .or_insert_with(|| lines.join("\n").trim().to_string());
}

fn json_fields(raw_text: &str) -> Option<(BTreeMap<String, String>, ExtractionMode)> {
    let body = strip_code_fence(raw_text);
    if !body.contains('{') {
        return None;
    }
    if body.starts_with('{')
        && let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body)
    {
        return Some((flatten(map), ExtractionMode::Json));
    }
    let candidate = repair_json(body)?;
    match serde_json::from_str::<Value>(&candidate) {
        Ok(Value::Object(map)) => Some((flatten(map), ExtractionMode::RepairedJson)),
        _ => None,
    }
}

fn flatten(map: serde_json::Map<String, Value>) -> BTreeMap<String, String> {
    map.into_iter()
        .map(|(key, value)| (normalize_key(&key), render_value(value)))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn render_value(value: Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .into_iter()
            .map(|item| format!("- {}", render_value(item)))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(_) => serde_json::to_string_pretty(&value).unwrap_or_default(),
        other => other.to_string(),
    }
}
