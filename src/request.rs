//! Request preprocessing, building and sending.
//!
//! The free functions normalize individual case fields after placeholder
//! resolution (URL joining, header and cookie shapes, file paths, the
//! post-send delay); [`RequestSender`] turns a fully resolved case into
//! one HTTP exchange and captures the response.

use crate::error::{TauonError, TauonResult};
use crate::expression;
use crate::model::{CaseResponse, RequestType, ResolvedCase};
use crate::resolver::{normalize_cookie_jars, value_text};
use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, SET_COOKIE};
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Join a configured host and a path with exactly one separating slash.
/// An absolute URL passes through untouched.
pub fn url_handle(url: &str, host: &str) -> String {
    if url.to_ascii_lowercase().starts_with("http") {
        return url.to_string();
    }
    match (host.ends_with('/'), url.starts_with('/')) {
        (true, true) => format!("{}{}", &host[..host.len() - 1], url),
        (false, false) => format!("{host}/{url}"),
        _ => format!("{host}{url}"),
    }
}

/// Normalize a resolved `headers` field to name → text.
///
/// Accepts a mapping or its textual form; a `Cookie` entry holding a map
/// or cookie jar is flattened to `k=v; k2=v2`.
pub fn headers_handle(headers: Option<&Value>) -> TauonResult<BTreeMap<String, String>> {
    let map = match headers {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) => parse_mapping_text(text).ok_or_else(|| {
            TauonError::Config(format!("headers text does not describe a mapping: {text}"))
        })?,
        Some(other) => {
            return Err(TauonError::Config(format!(
                "headers must be a mapping, got: {other}"
            )))
        }
    };

    let mut out = BTreeMap::new();
    for (name, value) in map {
        let text = if name.eq_ignore_ascii_case("cookie") {
            cookie_header_text(&value)
        } else {
            value_text(&value)
        };
        out.insert(name, text);
    }
    Ok(out)
}

/// Normalize a resolved `cookies` field to a plain name → value map.
/// Anything that is not a mapping, a cookie jar, or text describing one
/// is a configuration error.
pub fn cookies_handle(cookies: Option<&Value>) -> TauonResult<Option<Map<String, Value>>> {
    let cookies = match cookies {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => normalize_cookie_jars(value),
    };
    match cookies {
        Value::Object(map) => Ok(Some(map)),
        Value::String(text) => match parse_mapping_text(&text) {
            Some(map) => Ok(Some(map)),
            None => Err(TauonError::Config(format!(
                "cookies must be a mapping or cookie jar, got text: {text}"
            ))),
        },
        other => Err(TauonError::Config(format!(
            "cookies must be a mapping or cookie jar, got: {other}"
        ))),
    }
}

/// Resolve a `files` field to a path under the files directory.
pub fn files_handle(files: Option<&Value>, files_dir: &Path) -> TauonResult<Option<PathBuf>> {
    match files {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(name)) => Ok(Some(files_dir.join(name))),
        Some(other) => Err(TauonError::Config(format!(
            "files must be a file name, got: {other}"
        ))),
    }
}

/// Accept a number or a numeric string; anything else is ignored.
pub fn wait_seconds_handle(value: Option<&Value>) -> Option<u64> {
    match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Some(Value::String(s)) => match s.trim().parse() {
            Ok(seconds) => Some(seconds),
            Err(_) => {
                debug!("ignoring non-numeric wait_seconds: {s}");
                None
            }
        },
        _ => None,
    }
}

// Mapping-shaped text appears in corpora as JSON or as a single-quoted
// literal; both parse to an object here.
fn parse_mapping_text(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str(text) {
        return Some(map);
    }
    match expression::evaluate(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn cookie_header_text(value: &Value) -> String {
    match normalize_cookie_jars(value) {
        Value::Object(map) => flatten_cookie_map(&map),
        other => value_text(&other),
    }
}

/// `k=v; k2=v2` form used in a `Cookie` header.
pub fn flatten_cookie_map(map: &Map<String, Value>) -> String {
    map.iter()
        .map(|(name, value)| format!("{name}={}", value_text(value)))
        .collect::<Vec<_>>()
        .join("; ")
}

/// HTTP transport wrapper: one fixed timeout, four body-encoding modes,
/// response captured with status, timing and a best-effort parsed body.
#[derive(Debug, Clone)]
pub struct RequestSender {
    client: Client,
    timeout: Duration,
}

impl RequestSender {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one resolved case. Transport failures propagate unmodified.
    #[instrument(skip(self, case), fields(id = %case.id, method = %case.method, url = %case.url))]
    pub async fn send(&self, case: &ResolvedCase) -> TauonResult<CaseResponse> {
        let method = Method::from_bytes(case.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| TauonError::Config(format!("unsupported method: {}", case.method)))?;

        let mut builder = self
            .client
            .request(method, &case.url)
            .timeout(self.timeout);

        for (name, value) in &case.headers {
            builder = builder.header(name, value);
        }
        if let Some(cookies) = &case.cookies {
            let has_cookie_header = case
                .headers
                .keys()
                .any(|name| name.eq_ignore_ascii_case("cookie"));
            if !cookies.is_empty() && !has_cookie_header {
                builder = builder.header("Cookie", flatten_cookie_map(cookies));
            }
        }

        builder = match case.request_type {
            RequestType::Json => match &case.payload {
                Some(payload) => builder.json(payload),
                None => builder,
            },
            RequestType::Data => builder.form(&form_pairs(case.payload.as_ref())?),
            RequestType::Params => builder.query(&form_pairs(case.payload.as_ref())?),
            RequestType::File => self.file_body(builder, case)?,
            RequestType::None => builder,
        };

        debug!("sending {} {}", case.method, case.url);
        let started = Instant::now();
        let response = builder.send().await?;

        let status = response.status().as_u16();
        let mut headers = std::collections::HashMap::new();
        for (name, value) in response.headers() {
            headers.insert(
                name.to_string(),
                value.to_str().unwrap_or_default().to_string(),
            );
        }
        let cookies = response_cookies(&response);
        let text = response.text().await?;
        let elapsed = started.elapsed().as_secs_f64();

        let json = parse_body(&headers, &text);
        debug!("received status {status} in {elapsed:.3}s");

        Ok(CaseResponse {
            status,
            headers,
            cookies,
            text,
            json,
            elapsed_seconds: round2(elapsed),
            elapsed_ms: round2(elapsed * 1000.0),
        })
    }

    fn file_body(
        &self,
        builder: reqwest::RequestBuilder,
        case: &ResolvedCase,
    ) -> TauonResult<reqwest::RequestBuilder> {
        let path = case.files.as_ref().ok_or_else(|| {
            TauonError::Config("request_type file requires a files entry".to_string())
        })?;
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("file");
        // The multipart field name comes from the payload when it is a
        // plain string.
        let field = case
            .payload
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or("file");
        let boundary = multipart_boundary();
        let body = multipart_body(&boundary, field, file_name, &bytes);
        Ok(builder
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(body))
    }
}

impl Default for RequestSender {
    fn default() -> Self {
        Self::new()
    }
}

fn form_pairs(payload: Option<&Value>) -> TauonResult<Vec<(String, String)>> {
    match payload {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map
            .iter()
            .map(|(name, value)| (name.clone(), value_text(value)))
            .collect()),
        Some(other) => Err(TauonError::Config(format!(
            "this request_type requires a mapping payload, got: {other}"
        ))),
    }
}

fn multipart_boundary() -> String {
    let now = Utc::now();
    format!(
        "------------------------{}.{:06}",
        now.timestamp(),
        now.timestamp_subsec_micros()
    )
}

fn multipart_body(boundary: &str, field: &str, file_name: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn response_cookies(response: &reqwest::Response) -> Map<String, Value> {
    let mut cookies = Map::new();
    for value in response.headers().get_all(SET_COOKIE) {
        let Ok(text) = value.to_str() else { continue };
        let pair = text.split(';').next().unwrap_or_default();
        if let Some((name, value)) = pair.split_once('=') {
            cookies.insert(
                name.trim().to_string(),
                Value::String(value.trim().to_string()),
            );
        } else {
            warn!("ignoring malformed Set-Cookie value: {text}");
        }
    }
    cookies
}

// Best-effort body parse: content-type or a JSON-looking first
// character selects JSON, failure degrades to raw text.
fn parse_body(headers: &std::collections::HashMap<String, String>, text: &str) -> Option<Value> {
    let content_type = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.to_ascii_lowercase())
        .unwrap_or_default();
    let looks_json = content_type.contains("application/json")
        || text.trim_start().starts_with(['{', '[']);
    if !looks_json {
        return None;
    }
    serde_json::from_str(text).ok()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
