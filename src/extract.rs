//! Value extraction over responses, database result sets and case data.
//!
//! Three strategies, all total; a failed extraction logs and yields
//! nothing instead of raising:
//!
//! - [`json_extract`]: a JSON-path-like query (`$`, dot/bracket child
//!   access, `[n]` index, `*` wildcard, `..name` recursive descent);
//! - [`re_extract`]: regular-expression search with capture groups;
//! - [`response_extract`]: attribute access against a captured response.
//!
//! A single match is returned directly, multiple matches as a list.

use crate::model::{CaseResponse, ExtractRules};
use crate::resolver::value_text;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Where an extraction reads from; strategies dispatch per variant.
pub enum ExtractionSource<'a> {
    Response(&'a CaseResponse),
    Database(&'a [Map<String, Value>]),
    Case(&'a Value),
}

impl ExtractionSource<'_> {
    /// The structured form path queries run against.
    fn path_target(&self) -> Value {
        match self {
            ExtractionSource::Response(response) => response.body_value(),
            ExtractionSource::Database(rows) => {
                Value::Array(rows.iter().cloned().map(Value::Object).collect())
            }
            ExtractionSource::Case(value) => (*value).clone(),
        }
    }

    /// The textual form pattern matches run against.
    fn text_target(&self) -> String {
        match self {
            ExtractionSource::Response(response) => response.text.clone(),
            ExtractionSource::Database(rows) => {
                Value::Array(rows.iter().cloned().map(Value::Object).collect()).to_string()
            }
            ExtractionSource::Case(value) => value_text(value),
        }
    }

    /// The representation used when an assertion rule names no locator.
    fn fallback(&self) -> Value {
        match self {
            ExtractionSource::Response(response) => Value::String(response.text.clone()),
            ExtractionSource::Database(rows) => {
                Value::Array(rows.iter().cloned().map(Value::Object).collect())
            }
            ExtractionSource::Case(value) => (*value).clone(),
        }
    }
}

/// Run one rule set against a source, producing output-name → value.
/// A rule that matches nothing stores null.
pub fn apply_rules(source: &ExtractionSource<'_>, rules: &ExtractRules) -> Map<String, Value> {
    let mut out = Map::new();
    if !rules.type_jsonpath.is_empty() {
        let target = source.path_target();
        for (name, expr) in &rules.type_jsonpath {
            out.insert(
                name.clone(),
                json_extract(&target, expr).unwrap_or(Value::Null),
            );
        }
    }
    if !rules.type_re.is_empty() {
        let text = source.text_target();
        for (name, expr) in &rules.type_re {
            out.insert(name.clone(), re_extract(&text, expr).unwrap_or(Value::Null));
        }
    }
    for (name, expr) in &rules.type_response {
        let value = match source {
            ExtractionSource::Response(response) => response_extract(response, expr),
            _ => {
                warn!("type_response extraction {name} only applies to responses");
                None
            }
        };
        out.insert(name.clone(), value.unwrap_or(Value::Null));
    }
    out
}

/// Resolve the actual value for an assertion rule: path query first when
/// given, else pattern match, else the source's fallback representation.
pub fn actual_value(
    source: &ExtractionSource<'_>,
    jsonpath: Option<&str>,
    pattern: Option<&str>,
) -> Value {
    if let Some(expr) = jsonpath.filter(|expr| !expr.is_empty()) {
        return json_extract(&source.path_target(), expr).unwrap_or(Value::Null);
    }
    if let Some(expr) = pattern.filter(|expr| !expr.is_empty()) {
        return re_extract(&source.text_target(), expr).unwrap_or(Value::Null);
    }
    source.fallback()
}

#[derive(Debug, PartialEq)]
enum Segment {
    Child(String),
    Recursive(String),
    Wildcard,
    Index(i64),
}

fn parse_path(expr: &str) -> Option<Vec<Segment>> {
    let chars: Vec<char> = expr.trim().chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;
    if chars.first() == Some(&'$') {
        i = 1;
    }

    let ident = |chars: &[char], mut j: usize| -> (String, usize) {
        let start = j;
        while j < chars.len()
            && (chars[j].is_alphanumeric() || chars[j] == '_' || chars[j] == '-')
        {
            j += 1;
        }
        (chars[start..j].iter().collect(), j)
    };

    while i < chars.len() {
        match chars[i] {
            '.' => {
                if chars.get(i + 1) == Some(&'.') {
                    let (name, next) = ident(&chars, i + 2);
                    if name.is_empty() {
                        return None;
                    }
                    segments.push(Segment::Recursive(name));
                    i = next;
                } else if chars.get(i + 1) == Some(&'*') {
                    segments.push(Segment::Wildcard);
                    i += 2;
                } else {
                    let (name, next) = ident(&chars, i + 1);
                    if name.is_empty() {
                        return None;
                    }
                    segments.push(Segment::Child(name));
                    i = next;
                }
            }
            '[' => {
                let close = chars[i..].iter().position(|c| *c == ']')? + i;
                let inner: String = chars[i + 1..close].iter().collect();
                let inner = inner.trim();
                if inner == "*" {
                    segments.push(Segment::Wildcard);
                } else if (inner.starts_with('\'') && inner.ends_with('\'') && inner.len() >= 2)
                    || (inner.starts_with('"') && inner.ends_with('"') && inner.len() >= 2)
                {
                    segments.push(Segment::Child(inner[1..inner.len() - 1].to_string()));
                } else {
                    segments.push(Segment::Index(inner.parse().ok()?));
                }
                i = close + 1;
            }
            _ => return None,
        }
    }
    Some(segments)
}

fn select<'a>(root: &'a Value, segments: &[Segment]) -> Vec<&'a Value> {
    let mut current = vec![root];
    for segment in segments {
        let mut next = Vec::new();
        for node in current {
            match segment {
                Segment::Child(name) => {
                    if let Some(value) = node.as_object().and_then(|map| map.get(name)) {
                        next.push(value);
                    }
                }
                Segment::Index(index) => {
                    if let Some(items) = node.as_array() {
                        let idx = if *index < 0 {
                            *index + items.len() as i64
                        } else {
                            *index
                        };
                        if idx >= 0 {
                            if let Some(value) = items.get(idx as usize) {
                                next.push(value);
                            }
                        }
                    }
                }
                Segment::Wildcard => match node {
                    Value::Object(map) => next.extend(map.values()),
                    Value::Array(items) => next.extend(items.iter()),
                    _ => {}
                },
                Segment::Recursive(name) => collect_recursive(node, name, &mut next),
            }
        }
        current = next;
    }
    current
}

fn collect_recursive<'a>(node: &'a Value, name: &str, out: &mut Vec<&'a Value>) {
    match node {
        Value::Object(map) => {
            if let Some(value) = map.get(name) {
                out.push(value);
            }
            for value in map.values() {
                collect_recursive(value, name, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_recursive(item, name, out);
            }
        }
        _ => {}
    }
}

/// Path-query extraction. No match returns `None` and logs; a single
/// match is the value itself, multiple matches a list.
pub fn json_extract(obj: &Value, expr: &str) -> Option<Value> {
    let Some(segments) = parse_path(expr) else {
        warn!("invalid path query: {expr}");
        return None;
    };
    let mut matches = select(obj, &segments);
    match matches.len() {
        0 => {
            debug!("path query {expr} matched nothing");
            None
        }
        1 => Some(matches.remove(0).clone()),
        _ => Some(Value::Array(matches.into_iter().cloned().collect())),
    }
}

/// Pattern extraction. With one capture group the group value is taken,
/// with several each match yields a list of group values, with none the
/// whole match text.
pub fn re_extract(text: &str, pattern: &str) -> Option<Value> {
    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => {
            warn!("invalid extraction pattern {pattern}: {err}");
            return None;
        }
    };
    let mut found = Vec::new();
    for caps in re.captures_iter(text) {
        let value = match caps.len() {
            1 => Value::String(caps[0].to_string()),
            2 => Value::String(caps.get(1).map_or("", |m| m.as_str()).to_string()),
            n => Value::Array(
                (1..n)
                    .map(|group| {
                        Value::String(caps.get(group).map_or("", |m| m.as_str()).to_string())
                    })
                    .collect(),
            ),
        };
        found.push(value);
    }
    match found.len() {
        0 => {
            debug!("pattern {pattern} matched nothing");
            None
        }
        1 => Some(found.remove(0)),
        _ => Some(Value::Array(found)),
    }
}

/// Attribute extraction against a captured response.
///
/// Supported heads (an optional `response.` prefix is accepted):
/// `status_code`, `elapsed_seconds`, `elapsed_ms`, `text`, `headers`,
/// `headers.name` / `headers["name"]`, `cookies` likewise, `json` with
/// an optional trailing path.
pub fn response_extract(response: &CaseResponse, expr: &str) -> Option<Value> {
    let expr = expr.trim();
    let rest = expr.strip_prefix("response.").unwrap_or(expr);
    let (head, tail) = split_attribute(rest);
    let head = head.strip_suffix("()").unwrap_or(head);

    match head {
        "status_code" => Some(Value::from(response.status)),
        "elapsed_seconds" => Some(Value::from(response.elapsed_seconds)),
        "elapsed_ms" => Some(Value::from(response.elapsed_ms)),
        "text" => Some(Value::String(response.text.clone())),
        "headers" => match attribute_key(tail) {
            Some(name) => response
                .header(&name)
                .map(|value| Value::String(value.to_string())),
            None if tail.is_empty() => {
                let mut map = Map::new();
                for (name, value) in &response.headers {
                    map.insert(name.clone(), Value::String(value.clone()));
                }
                Some(Value::Object(map))
            }
            None => None,
        },
        "cookies" => match attribute_key(tail) {
            Some(name) => response.cookies.get(&name).cloned(),
            None if tail.is_empty() => Some(Value::Object(response.cookies.clone())),
            None => None,
        },
        "json" => {
            let body = response.json.clone()?;
            if tail.is_empty() {
                Some(body)
            } else {
                json_extract(&body, &format!("${tail}"))
            }
        }
        other => {
            warn!("unsupported response attribute: {other}");
            None
        }
    }
}

/// Split `head.rest` / `head["rest"]` into the attribute head and the
/// remainder starting at the separator.
fn split_attribute(expr: &str) -> (&str, &str) {
    match expr.find(['.', '[']) {
        Some(pos) => (&expr[..pos], &expr[pos..]),
        None => (expr, ""),
    }
}

/// Extract a lookup key from `.name`, `["name"]` or `['name']`.
fn attribute_key(tail: &str) -> Option<String> {
    if let Some(name) = tail.strip_prefix('.') {
        if !name.is_empty() && !name.contains(['.', '[']) {
            return Some(name.to_string());
        }
        return None;
    }
    let inner = tail.strip_prefix('[')?.strip_suffix(']')?;
    let inner = inner.trim();
    if (inner.starts_with('"') && inner.ends_with('"') && inner.len() >= 2)
        || (inner.starts_with('\'') && inner.ends_with('\'') && inner.len() >= 2)
    {
        return Some(inner[1..inner.len() - 1].to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn sample_response() -> CaseResponse {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let mut cookies = Map::new();
        cookies.insert("session".to_string(), json!("abc123"));
        let body = json!({"code": 0, "data": {"token": "tok-1", "id": 7}});
        CaseResponse {
            status: 200,
            headers,
            cookies,
            text: body.to_string(),
            json: Some(body),
            elapsed_seconds: 0.12,
            elapsed_ms: 120.0,
        }
    }

    #[test]
    fn test_single_path_match_is_unwrapped() {
        let obj = json!({"data": {"id": 7}});
        assert_eq!(json_extract(&obj, "$.data.id"), Some(json!(7)));
    }

    #[test]
    fn test_path_index_and_negative_index() {
        let obj = json!({"items": [10, 20, 30]});
        assert_eq!(json_extract(&obj, "$.items[1]"), Some(json!(20)));
        assert_eq!(json_extract(&obj, "$.items[-1]"), Some(json!(30)));
    }

    #[test]
    fn test_path_wildcard_collects_all() {
        let obj = json!({"data": {"a": 1, "b": 2}});
        assert_eq!(json_extract(&obj, "$.data.*"), Some(json!([1, 2])));
    }

    #[test]
    fn test_path_recursive_descent() {
        let obj = json!({"data": {"id": 1, "nested": [{"id": 2}, {"id": 3}]}});
        assert_eq!(json_extract(&obj, "$..id"), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_path_bracket_child() {
        let obj = json!({"data": {"Content-Type": "text/plain"}});
        assert_eq!(
            json_extract(&obj, "$.data['Content-Type']"),
            Some(json!("text/plain"))
        );
    }

    #[test]
    fn test_path_no_match_is_none() {
        let obj = json!({"data": {}});
        assert_eq!(json_extract(&obj, "$.data.missing"), None);
    }

    #[test]
    fn test_path_root_only() {
        let obj = json!([{"id": 1}]);
        assert_eq!(json_extract(&obj, "$"), Some(obj.clone()));
        assert_eq!(json_extract(&obj, "$[0].id"), Some(json!(1)));
    }

    #[test]
    fn test_re_single_group() {
        assert_eq!(
            re_extract("token=abc123;", r"token=(\w+)"),
            Some(json!("abc123"))
        );
    }

    #[test]
    fn test_re_multiple_matches_become_list() {
        assert_eq!(
            re_extract("id=1 id=2 id=3", r"id=(\d)"),
            Some(json!(["1", "2", "3"]))
        );
    }

    #[test]
    fn test_re_no_match_is_none() {
        assert_eq!(re_extract("plain text", r"id=(\d+)"), None);
    }

    #[test]
    fn test_re_invalid_pattern_is_none() {
        assert_eq!(re_extract("anything", r"(unclosed"), None);
    }

    #[test]
    fn test_response_attributes() {
        let response = sample_response();
        assert_eq!(
            response_extract(&response, "status_code"),
            Some(json!(200))
        );
        assert_eq!(
            response_extract(&response, "response.status_code"),
            Some(json!(200))
        );
        assert_eq!(
            response_extract(&response, "headers['Content-Type']"),
            Some(json!("application/json"))
        );
        assert_eq!(
            response_extract(&response, "cookies.session"),
            Some(json!("abc123"))
        );
        assert_eq!(
            response_extract(&response, "json.data.token"),
            Some(json!("tok-1"))
        );
        assert_eq!(
            response_extract(&response, "response.json()['code']"),
            Some(json!(0))
        );
        assert_eq!(response_extract(&response, "no_such_attr"), None);
    }

    #[test]
    fn test_actual_value_priority() {
        let response = sample_response();
        let source = ExtractionSource::Response(&response);
        // Path query wins over pattern when both are given.
        assert_eq!(
            actual_value(&source, Some("$.data.id"), Some(r"token-(\w+)")),
            json!(7)
        );
        // Pattern applies when no path query exists.
        assert_eq!(
            actual_value(&source, None, Some(r#""token":"(tok-\d)""#)),
            json!("tok-1")
        );
        // Fallback is the raw text.
        assert_eq!(
            actual_value(&source, None, None),
            Value::String(response.text.clone())
        );
    }

    #[test]
    fn test_apply_rules_missing_match_stores_null() {
        let response = sample_response();
        let source = ExtractionSource::Response(&response);
        let rules: ExtractRules = serde_json::from_value(json!({
            "type_jsonpath": {"token": "$.data.token", "absent": "$.data.nothing"},
            "type_response": {"status": "status_code"}
        }))
        .unwrap();
        let out = apply_rules(&source, &rules);
        assert_eq!(out["token"], json!("tok-1"));
        assert_eq!(out["absent"], Value::Null);
        assert_eq!(out["status"], json!(200));
    }

    #[test]
    fn test_database_rows_as_path_target() {
        let rows: Vec<Map<String, Value>> = vec![
            serde_json::from_value(json!({"id": 1, "name": "a"})).unwrap(),
            serde_json::from_value(json!({"id": 2, "name": "b"})).unwrap(),
        ];
        let source = ExtractionSource::Database(&rows);
        assert_eq!(actual_value(&source, Some("$[0].id"), None), json!(1));
        assert_eq!(actual_value(&source, Some("$..name"), None), json!(["a", "b"]));
    }
}
