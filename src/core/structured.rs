//! Untrusted model text -> structured record.
//!
//! Recovery runs three passes: the whole reply as JSON (code fences
//! stripped), the first balanced `{...}` span that parses as an object, and
//! finally field-by-field pattern matching for the fields the caller expects.
//! The JSON passes only accept objects carrying at least one expected key.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use super::errors::CoreError;

/// Placeholder stored for an expected field that fallback recovery could not locate.
pub const NOT_FOUND: &str = "Not found";

const MAX_SPAN_ATTEMPTS: usize = 64;

static LABEL_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s>#*•\-]*[A-Za-z][A-Za-z0-9 /&_\-]{0,40}[\s*]*:").unwrap());
static BULLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+(.+)$").unwrap());
static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FieldValue::Text(text) if text.trim().eq_ignore_ascii_case(NOT_FOUND))
    }

    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Text(text) => text.trim().to_string(),
            FieldValue::List(items) => items.join(", "),
        }
    }

    /// List view of the value. A text value is split on lines, or on commas
    /// and semicolons when it is a single line; the sentinel yields nothing.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            FieldValue::List(items) => items
                .iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
            FieldValue::Text(_) if self.is_not_found() => Vec::new(),
            FieldValue::Text(text) => {
                let lines: Vec<&str> = text
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .collect();
                let items: Vec<String> = if lines.len() > 1 {
                    lines.iter().map(|l| strip_bullet(l).to_string()).collect()
                } else {
                    text.split([',', ';'])
                        .map(|item| strip_bullet(item.trim()).to_string())
                        .collect()
                };
                items.into_iter().filter(|item| !item.is_empty()).collect()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// Single line of text.
    Text,
    /// Ordered list of short items.
    List,
    /// Free text that may span several lines.
    Paragraph,
}

/// A field the caller expects, with the labels a model might use for it in prose.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    pub labels: &'static [&'static str],
    pub shape: FieldShape,
}

impl FieldSpec {
    fn matches_key(&self, candidate: &str) -> bool {
        let normalized = normalize_key(candidate);
        normalize_key(self.key) == normalized
            || self.labels.iter().any(|l| normalize_key(l) == normalized)
    }

    fn label_regexes(&self) -> Vec<Regex> {
        let mut labels = vec![self.key.replace('_', " ")];
        labels.extend(self.labels.iter().map(|label| label.to_string()));
        labels
            .iter()
            .filter_map(|label| {
                let pattern = regex::escape(label).replace(' ', r"[\s_\-]+");
                Regex::new(&format!(r"(?i)^[\s>#*•\-]*{pattern}[\s*]*:[\s*]*(.*)$")).ok()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryMethod {
    Direct,
    EmbeddedObject,
    FieldPatterns,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredRecord {
    pub method: RecoveryMethod,
    fields: BTreeMap<String, FieldValue>,
}

impl StructuredRecord {
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Looks a field up by its key, tolerating the casing and label variants
    /// models tend to produce (`Required Skills`, `requiredSkills`).
    pub fn get(&self, spec: &FieldSpec) -> Option<&FieldValue> {
        self.fields.get(spec.key).or_else(|| {
            self.fields
                .iter()
                .find(|(key, _)| spec.matches_key(key))
                .map(|(_, value)| value)
        })
    }

    pub fn text(&self, spec: &FieldSpec) -> String {
        match self.get(spec) {
            Some(value) if !value.as_text().is_empty() => value.as_text(),
            _ => NOT_FOUND.to_string(),
        }
    }

    pub fn list(&self, spec: &FieldSpec) -> Vec<String> {
        self.get(spec).map(FieldValue::as_list).unwrap_or_default()
    }
}

/// Recovers a structured record from a model reply.
///
/// A JSON object only counts when at least one of its keys names an
/// expected field; `{}` or `{"error": "..."}` fall through to the later passes.
pub fn recover_record(raw: &str, fields: &[FieldSpec]) -> Result<StructuredRecord, CoreError> {
    let has_expected_key = |object: &Map<String, Value>| {
        object
            .keys()
            .any(|key| fields.iter().any(|spec| spec.matches_key(key)))
    };

    if let Some(object) = parse_object(strip_code_fences(raw)).filter(|o| has_expected_key(o)) {
        return Ok(StructuredRecord {
            method: RecoveryMethod::Direct,
            fields: object_to_fields(object),
        });
    }

    for span in balanced_object_spans(raw) {
        if let Some(object) = parse_object(span).filter(|o| has_expected_key(o)) {
            return Ok(StructuredRecord {
                method: RecoveryMethod::EmbeddedObject,
                fields: object_to_fields(object),
            });
        }
    }

    let mut recovered = BTreeMap::new();
    let mut located = 0_usize;
    for spec in fields {
        match extract_field(raw, spec, fields) {
            Some(value) => {
                located += 1;
                recovered.insert(spec.key.to_string(), value);
            }
            None => {
                recovered.insert(spec.key.to_string(), FieldValue::Text(NOT_FOUND.to_string()));
            }
        }
    }

    if located == 0 {
        return Err(CoreError::ExtractionFailure {
            raw_text: raw.to_string(),
        });
    }

    Ok(StructuredRecord {
        method: RecoveryMethod::FieldPatterns,
        fields: recovered,
    })
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(stripped) = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```JSON"))
        .or_else(|| text.strip_prefix("```"))
    else {
        return text;
    };

    stripped
        .trim_start()
        .strip_suffix("```")
        .map(|s| s.trim())
        .unwrap_or(stripped.trim_start())
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn object_to_fields(object: Map<String, Value>) -> BTreeMap<String, FieldValue> {
    object
        .into_iter()
        .map(|(key, value)| (key, to_field_value(value)))
        .collect()
}

fn to_field_value(value: Value) -> FieldValue {
    match value {
        Value::String(text) => FieldValue::Text(text),
        Value::Array(items) => FieldValue::List(
            items
                .into_iter()
                .map(|item| match item {
                    Value::String(text) => text,
                    other => other.to_string(),
                })
                .collect(),
        ),
        Value::Null => FieldValue::Text(String::new()),
        other => FieldValue::Text(other.to_string()),
    }
}

/// Balanced `{...}` spans in order of their opening brace. Braces inside
/// JSON string literals do not count. Only the first `MAX_SPAN_ATTEMPTS`
/// opening braces are tried, matched or not, so the scan stays linear.
fn balanced_object_spans(text: &str) -> impl Iterator<Item = &str> {
    text.match_indices('{').take(MAX_SPAN_ATTEMPTS).filter_map(move |(start, _)| {
        let tail = &text[start..];
        matching_brace(tail).map(|end| &tail[..=end])
    })
}

fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }

    None
}

fn extract_field(raw: &str, spec: &FieldSpec, all: &[FieldSpec]) -> Option<FieldValue> {
    extract_json_like(raw, spec).or_else(|| extract_labeled(raw, spec, all))
}

fn extract_json_like(raw: &str, spec: &FieldSpec) -> Option<FieldValue> {
    let key = regex::escape(spec.key);

    let string_re = Regex::new(&format!(r#"(?is)"{key}"\s*:\s*"((?:[^"\\]|\\.)*)""#)).ok()?;
    if let Some(captures) = string_re.captures(raw) {
        let value = unescape_json_string(captures.get(1)?.as_str());
        return Some(shape_text(value, spec.shape));
    }

    let array_re = Regex::new(&format!(r#"(?is)"{key}"\s*:\s*\[(.*?)\]"#)).ok()?;
    if let Some(captures) = array_re.captures(raw) {
        let inner = captures.get(1)?.as_str();
        let quoted: Vec<String> = QUOTED_RE
            .captures_iter(inner)
            .filter_map(|c| c.get(1).map(|m| unescape_json_string(m.as_str())))
            .collect();
        let items = if quoted.is_empty() {
            inner
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        } else {
            quoted
        };
        return Some(FieldValue::List(items));
    }

    let scalar_re =
        Regex::new(&format!(r#"(?i)"{key}"\s*:\s*(-?\d+(?:\.\d+)?%?|true|false)"#)).ok()?;
    if let Some(captures) = scalar_re.captures(raw) {
        return Some(FieldValue::Text(captures.get(1)?.as_str().to_string()));
    }

    // Reply cut off inside the last string value.
    let truncated_re = Regex::new(&format!(r#"(?s)"{key}"\s*:\s*"([^"]+)\z"#)).ok()?;
    let captures = truncated_re.captures(raw)?;
    let value = captures.get(1)?.as_str().trim();
    if value.is_empty() {
        return None;
    }
    Some(shape_text(value.to_string(), spec.shape))
}

fn extract_labeled(raw: &str, spec: &FieldSpec, all: &[FieldSpec]) -> Option<FieldValue> {
    let regexes = spec.label_regexes();
    let other_labels: Vec<Regex> = all
        .iter()
        .filter(|other| other.key != spec.key)
        .flat_map(FieldSpec::label_regexes)
        .collect();
    let lines: Vec<&str> = raw.lines().collect();

    for (index, line) in lines.iter().enumerate() {
        let Some(rest) = regexes
            .iter()
            .find_map(|re| re.captures(line).and_then(|c| c.get(1)))
            .map(|m| clean_value(m.as_str()))
        else {
            continue;
        };

        let following = &lines[index + 1..];
        let value = match spec.shape {
            FieldShape::Text => {
                if rest.is_empty() {
                    following
                        .iter()
                        .map(|l| l.trim())
                        .find(|l| !l.is_empty())
                        .filter(|l| !LABEL_LINE_RE.is_match(l))
                        .map(|l| FieldValue::Text(clean_value(strip_bullet(l))))
                } else {
                    Some(FieldValue::Text(rest))
                }
            }
            FieldShape::List => {
                let mut items: Vec<String> = if rest.is_empty() {
                    Vec::new()
                } else {
                    FieldValue::Text(rest).as_list()
                };
                for next in following {
                    if next.trim().is_empty() {
                        if items.is_empty() {
                            continue;
                        }
                        break;
                    }
                    match BULLET_RE.captures(next).and_then(|c| c.get(1)) {
                        Some(item) => items.push(clean_value(item.as_str())),
                        None => break,
                    }
                }
                (!items.is_empty()).then_some(FieldValue::List(items))
            }
            FieldShape::Paragraph => {
                let mut parts = Vec::new();
                if !rest.is_empty() {
                    parts.push(rest);
                }
                for next in following {
                    if other_labels.iter().any(|re| re.is_match(next)) {
                        break;
                    }
                    parts.push(next.trim().to_string());
                }
                let text = parts.join("\n").trim().to_string();
                (!text.is_empty()).then_some(FieldValue::Text(text))
            }
        };

        if value.is_some() {
            return value;
        }
    }

    None
}

fn shape_text(value: String, shape: FieldShape) -> FieldValue {
    match shape {
        FieldShape::List => FieldValue::List(FieldValue::Text(value).as_list()),
        FieldShape::Text | FieldShape::Paragraph => FieldValue::Text(value),
    }
}

fn unescape_json_string(inner: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{inner}\"")).unwrap_or_else(|_| inner.to_string())
}

fn clean_value(value: &str) -> String {
    value
        .trim()
        .trim_matches('*')
        .trim()
        .trim_end_matches(',')
        .trim_matches('"')
        .trim()
        .to_string()
}

fn strip_bullet(value: &str) -> &str {
    BULLET_RE
        .captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(value)
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
