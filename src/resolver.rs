//! Placeholder resolution engine.
//!
//! Expands `${...}` references in strings, lists and mappings against a
//! variable-pool snapshot. A reference is either a bare pool name, a
//! registered generator call, or a literal/arithmetic expression.
//!
//! Resolution of one string runs in phases:
//!
//! 1. call-shaped expressions (ending in `)` right before the closing
//!    brace) are captured into a side-table and replaced with disposable
//!    unique tokens, so their argument text cannot collide with the
//!    simple-name substitution that follows;
//! 2. remaining `${name}` references are substituted from the pool; an
//!    unknown name is left intact;
//! 3. any `${...}` span still present (bare arithmetic, unknown names)
//!    is captured into the same side-table;
//! 4. each captured expression is invoked: a generator call if the head
//!    is registered, general evaluation otherwise. A failure restores the
//!    original placeholder text and never aborts the pass.
//!
//! A string that is exactly one placeholder naming a non-textual pool
//! entry resolves to that value with its type preserved. When an invoked
//! expression produces a non-string inside a larger template, the whole
//! string is re-parsed by the literal evaluator and, if it promotes, the
//! promoted value is resolved again from the top.

use crate::expression;
use crate::generators::GeneratorRegistry;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::{debug, warn};
use uuid::Uuid;

// Call-shaped references: the body may not contain `}` and must end
// with a closing parenthesis.
static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+\))\}").expect("call placeholder regex"));
// Identifier-shaped references, the only form the simple substitution
// touches; a call argument like `${f(${ids})}` keeps its inner `${ids}`
// reachable this way.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("name placeholder regex"));
// Any remaining reference.
static ANY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder regex"));

const MAX_DEPTH: usize = 32;

pub struct Resolver<'a> {
    registry: &'a GeneratorRegistry,
}

struct Captured {
    token: String,
    original: String,
    expr: String,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a GeneratorRegistry) -> Self {
        Self { registry }
    }

    /// Resolve every placeholder in `value` against `source`.
    ///
    /// Cookie-jar-shaped entries in the source are normalized to plain
    /// maps first so substitution serializes them deterministically.
    pub fn resolve(&self, value: &Value, source: &Map<String, Value>) -> Value {
        let mut normalized = Map::new();
        for (name, entry) in source {
            normalized.insert(name.clone(), normalize_cookie_jars(entry));
        }
        self.resolve_at(value, &normalized, 0)
    }

    fn resolve_at(&self, value: &Value, source: &Map<String, Value>, depth: usize) -> Value {
        if depth > MAX_DEPTH {
            warn!("placeholder resolution exceeded depth {MAX_DEPTH}, returning value as-is");
            return value.clone();
        }
        match value {
            Value::String(text) => self.resolve_string(text, source, depth),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_at(item, source, depth + 1))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, entry) in map {
                    out.insert(key.clone(), self.resolve_at(entry, source, depth + 1));
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    fn resolve_string(&self, input: &str, source: &Map<String, Value>, depth: usize) -> Value {
        // Phase 1: stash call-shaped expressions behind tokens.
        let (text, mut captured) = replace_and_store(&CALL_RE, input);

        // A string that is exactly `${name}` keeps the pool entry's type.
        if captured.is_empty() && text.starts_with("${") && text.ends_with('}') {
            let name = &text[2..text.len() - 1];
            if let Some(entry) = source.get(name) {
                if !entry.is_string() {
                    return self.resolve_at(entry, source, depth + 1);
                }
            }
        }

        // Phase 2: substitute simple references; unknown names survive.
        let text = NAME_RE
            .replace_all(&text, |caps: &Captures| match source.get(&caps[1]) {
                Some(entry) => value_text(entry),
                None => caps[0].to_string(),
            })
            .into_owned();

        // Phase 3: whatever is still shaped like a placeholder is an
        // expression (or an unresolvable name, which fails below and is
        // restored).
        let (mut text, rest) = replace_and_store(&ANY_RE, &text);
        captured.extend(rest);

        if captured.is_empty() {
            return Value::String(text);
        }

        let mut any_non_string = false;
        for capture in &captured {
            match self.invoke(&capture.expr) {
                Ok(result) => {
                    debug!("resolved {} -> {result}", capture.original);
                    any_non_string |= !result.is_string();
                    text = text.replace(&capture.token, &value_text(&result));
                }
                Err(err) => {
                    warn!(
                        "placeholder {} could not be resolved, keeping it verbatim: {err:#}",
                        capture.original
                    );
                    text = text.replace(&capture.token, &capture.original);
                }
            }
        }

        // Phase 4: a non-string result embedded in the template may have
        // turned the whole string into a literal; promote and re-resolve.
        if any_non_string {
            if let Ok(promoted) = expression::evaluate(&text) {
                if !promoted.is_string() {
                    return self.resolve_at(&promoted, source, depth + 1);
                }
                return promoted;
            }
        }
        Value::String(text)
    }

    fn invoke(&self, expr: &str) -> anyhow::Result<Value> {
        if let Some((head, raw_args)) = expression::split_call(expr) {
            if self.registry.contains(&head) {
                let args = expression::parse_args(&raw_args)?;
                return self.registry.call(&head, &args);
            }
        }
        expression::evaluate(expr)
    }
}

/// Replace each regex match with a fresh unique token, one occurrence at
/// a time until no match remains, recording token → expression.
fn replace_and_store(re: &Regex, input: &str) -> (String, Vec<Captured>) {
    let mut text = input.to_string();
    let mut captured = Vec::new();
    while let Some(caps) = re.captures(&text) {
        let whole = caps.get(0).expect("group 0 always present");
        let token = Uuid::new_v4().to_string();
        captured.push(Captured {
            token: token.clone(),
            original: whole.as_str().to_string(),
            expr: caps[1].to_string(),
        });
        let range = whole.range();
        text.replace_range(range, &token);
    }
    (text, captured)
}

/// Textual form used when substituting a value into a template: strings
/// verbatim, everything else as compact JSON.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert cookie-jar captures (arrays of `{name, value, ...}` records)
/// anywhere in the value into plain name → value maps.
pub(crate) fn normalize_cookie_jars(value: &Value) -> Value {
    match value {
        Value::Array(items) if is_cookie_jar(items) => {
            let mut map = Map::new();
            for item in items {
                let entry = item.as_object().expect("jar items checked above");
                let name = entry["name"].as_str().expect("jar names checked above");
                map.insert(name.to_string(), entry["value"].clone());
            }
            Value::Object(map)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_cookie_jars).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, entry) in map {
                out.insert(key.clone(), normalize_cookie_jars(entry));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn is_cookie_jar(items: &[Value]) -> bool {
    !items.is_empty()
        && items.iter().all(|item| {
            item.as_object().is_some_and(|entry| {
                entry.get("name").is_some_and(Value::is_string) && entry.contains_key("value")
            })
        })
}
