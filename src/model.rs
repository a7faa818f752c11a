//! Case records and the data shapes that travel through one execution.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// One declarative HTTP test case.
///
/// Created by the corpus loader, read-only once handed to the executor;
/// the resolver produces a [`ResolvedCase`] copy instead of mutating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Unique id within a corpus, referenced by interface dependencies.
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub severity: Option<String>,
    /// Skip flag; `false` excludes the case from corpus runs.
    #[serde(default)]
    pub run: Option<bool>,
    pub url: String,
    pub method: String,
    /// Mapping or textual form; normalized during preprocessing.
    #[serde(default)]
    pub headers: Option<Value>,
    #[serde(default)]
    pub cookies: Option<Value>,
    #[serde(default)]
    pub request_type: RequestType,
    #[serde(default)]
    pub payload: Option<Value>,
    /// File name for multipart uploads, relative to the files directory.
    #[serde(default)]
    pub files: Option<Value>,
    /// Post-send delay; number or numeric string.
    #[serde(default)]
    pub wait_seconds: Option<Value>,
    /// Request the signing hook for this case.
    #[serde(default)]
    pub is_sign: Option<bool>,
    /// Signing secret; falls back to the pool's `sign_secret`.
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Response assertion record.
    #[serde(default)]
    pub validate: Option<Map<String, Value>>,
    /// Database assertion record; rules carry their own `sql`.
    #[serde(default)]
    pub assert_sql: Option<Map<String, Value>>,
    /// Extraction spec, parsed after placeholder resolution.
    #[serde(default)]
    pub extract: Option<Value>,
    #[serde(default)]
    pub case_dependence: Option<DependenceSpec>,
}

impl CaseRecord {
    pub fn is_enabled(&self) -> bool {
        self.run.unwrap_or(true)
    }
}

/// Body-encoding mode of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestType {
    Json,
    Data,
    File,
    Params,
    #[default]
    None,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Json => "json",
            RequestType::Data => "data",
            RequestType::File => "file",
            RequestType::Params => "params",
            RequestType::None => "none",
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Corpus files spell the mode in either case; accept both, reject
// anything that is not a known mode.
impl<'de> Deserialize<'de> for RequestType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("none") => Ok(RequestType::None),
            Some("json") => Ok(RequestType::Json),
            Some("data") => Ok(RequestType::Data),
            Some("file") => Ok(RequestType::File),
            Some("params") => Ok(RequestType::Params),
            Some(other) => Err(serde::de::Error::custom(format!(
                "unsupported request_type: {other}"
            ))),
        }
    }
}

impl Serialize for RequestType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// A value that may be written as a single item or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(item) => std::slice::from_ref(item),
            OneOrMany::Many(items) => items,
        }
    }
}

/// Prerequisites of a case, applied strictly in field order:
/// variables, then interfaces, then database rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependenceSpec {
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
    #[serde(default)]
    pub interface: Option<OneOrMany<String>>,
    #[serde(default)]
    pub database: Option<OneOrMany<Value>>,
}

impl DependenceSpec {
    pub fn is_empty(&self) -> bool {
        self.variables.is_none() && self.interface.is_none() && self.database.is_none()
    }
}

/// One rule of an assertion record.
#[derive(Debug, Clone, Deserialize)]
pub struct AssertRule {
    pub assert_type: String,
    pub expect_value: Value,
    #[serde(default)]
    pub type_jsonpath: Option<String>,
    #[serde(default)]
    pub type_re: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Switches the actual-value source from the response to a query.
    #[serde(default)]
    pub sql: Option<String>,
}

/// Extraction rules grouped by method.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractRules {
    #[serde(default)]
    pub type_jsonpath: BTreeMap<String, String>,
    #[serde(default)]
    pub type_re: BTreeMap<String, String>,
    #[serde(default)]
    pub type_response: BTreeMap<String, String>,
}

impl ExtractRules {
    pub fn is_empty(&self) -> bool {
        self.type_jsonpath.is_empty() && self.type_re.is_empty() && self.type_response.is_empty()
    }
}

/// Extraction rules bound to a query result.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseRules {
    pub sql: String,
    #[serde(flatten)]
    pub rules: ExtractRules,
}

/// Per-source extraction sections of a case.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractSpec {
    #[serde(default)]
    pub case: Option<ExtractRules>,
    #[serde(default)]
    pub response: Option<ExtractRules>,
    #[serde(default)]
    pub database: Option<OneOrMany<Value>>,
}

/// A case after preprocessing: every field resolved and normalized,
/// ready for transport.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedCase {
    pub id: String,
    pub title: String,
    pub severity: Option<String>,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub cookies: Option<Map<String, Value>>,
    pub request_type: RequestType,
    pub payload: Option<Value>,
    pub files: Option<PathBuf>,
    pub wait_seconds: Option<u64>,
    pub validate: Option<Map<String, Value>>,
    pub assert_sql: Option<Map<String, Value>>,
    pub extract: Option<Value>,
}

/// Captured response of one exchange.
#[derive(Debug, Clone, Serialize)]
pub struct CaseResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Response cookies as a plain name/value map.
    pub cookies: Map<String, Value>,
    pub text: String,
    /// Best-effort parsed body; `None` when the body is not JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    pub elapsed_seconds: f64,
    pub elapsed_ms: f64,
}

impl CaseResponse {
    /// Parsed body when available, raw text otherwise.
    pub fn body_value(&self) -> Value {
        self.json
            .clone()
            .unwrap_or_else(|| Value::String(self.text.clone()))
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Result of running a single case, for summaries and report files.
#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub id: String,
    pub title: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub duration_ms: u64,
}

/// Aggregate of one corpus run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub cases: Vec<CaseOutcome>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_duration_ms: u64,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_case_record_from_yaml() {
        let yaml = r#"
id: login_01
title: login with valid credentials
severity: NORMAL
url: /api/user/login
method: POST
request_type: JSON
payload:
  username: admin
  password: "${password}"
validate:
  status_code: 200
  assert_code:
    type_jsonpath: "$.code"
    expect_value: 0
    assert_type: equals
extract:
  response:
    type_jsonpath:
      token: "$.data.token"
case_dependence:
  variables:
    locale: en
  interface: seed_01
"#;
        let record: CaseRecord = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(record.id, "login_01");
        assert_eq!(record.request_type, RequestType::Json);
        assert!(record.is_enabled());
        assert_eq!(
            record.payload.as_ref().unwrap()["password"],
            json!("${password}")
        );

        let dep = record.case_dependence.unwrap();
        assert_eq!(dep.interface.unwrap().as_slice(), ["seed_01"]);
    }

    #[test]
    fn test_request_type_case_insensitive() {
        let record: CaseRecord =
            serde_yaml::from_str("id: a\nurl: /x\nmethod: GET\nrequest_type: PARAMS\n").unwrap();
        assert_eq!(record.request_type, RequestType::Params);
    }

    #[test]
    fn test_request_type_unknown_rejected() {
        let result: Result<CaseRecord, _> =
            serde_yaml::from_str("id: a\nurl: /x\nmethod: GET\nrequest_type: export\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_request_type_defaults_to_none() {
        let record: CaseRecord = serde_yaml::from_str("id: a\nurl: /x\nmethod: GET\n").unwrap();
        assert_eq!(record.request_type, RequestType::None);
    }

    #[test]
    fn test_run_flag_disables_case() {
        let record: CaseRecord =
            serde_yaml::from_str("id: a\nurl: /x\nmethod: GET\nrun: false\n").unwrap();
        assert!(!record.is_enabled());
    }

    #[test]
    fn test_database_rules_shed_sql_key() {
        let value = json!({
            "sql": "SELECT id FROM users",
            "type_jsonpath": {"user_id": "$[0].id"}
        });
        let rules: DatabaseRules = serde_json::from_value(value).unwrap();
        assert_eq!(rules.sql, "SELECT id FROM users");
        assert_eq!(rules.rules.type_jsonpath["user_id"], "$[0].id");
        assert!(rules.rules.type_re.is_empty());
    }

    #[test]
    fn test_one_or_many_forms() {
        let one: OneOrMany<String> = serde_json::from_value(json!("login_01")).unwrap();
        assert_eq!(one.as_slice().len(), 1);

        let many: OneOrMany<String> =
            serde_json::from_value(json!(["login_01", "seed_01"])).unwrap();
        assert_eq!(many.as_slice().len(), 2);
    }

    #[test]
    fn test_response_header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let response = CaseResponse {
            status: 200,
            headers,
            cookies: Map::new(),
            text: String::new(),
            json: None,
            elapsed_seconds: 0.01,
            elapsed_ms: 10.0,
        };
        assert_eq!(response.header("Content-Type"), Some("application/json"));
    }
}
