//! The request orchestrator: one state machine per case execution.
//!
//! States run strictly in sequence: acquire, apply dependence,
//! preprocess, dispatch, post-wait, capture, record, assert, extract,
//! return. Capture and record precede assertion so a failed exchange is
//! still observable; extraction only runs once assertion has passed.

use crate::assertion::AssertionRunner;
use crate::corpus::CaseCorpus;
use crate::database::SqlExecutor;
use crate::dependence::apply_dependence;
use crate::error::{TauonError, TauonResult};
use crate::extract::{self, ExtractionSource};
use crate::generators::GeneratorRegistry;
use crate::model::{CaseRecord, CaseResponse, DatabaseRules, ExtractSpec, ResolvedCase};
use crate::pool::VariablePool;
use crate::request::{self, RequestSender};
use crate::resolver::{value_text, Resolver};
use crate::steps::{StepSink, TracingStepSink};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Optional hook producing a `Sign` header for cases that request one.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, payload: Option<&Value>, secret_key: Option<&str>) -> String;
}

pub struct Executor {
    corpus: CaseCorpus,
    sender: RequestSender,
    registry: GeneratorRegistry,
    steps: Arc<dyn StepSink>,
    sql: Option<Arc<dyn SqlExecutor>>,
    signer: Option<Arc<dyn RequestSigner>>,
    files_dir: PathBuf,
}

impl Executor {
    pub fn new(corpus: CaseCorpus) -> Self {
        Self {
            corpus,
            sender: RequestSender::new(),
            registry: GeneratorRegistry::new(),
            steps: Arc::new(TracingStepSink),
            sql: None,
            signer: None,
            files_dir: PathBuf::from("files"),
        }
    }

    pub fn with_sender(mut self, sender: RequestSender) -> Self {
        self.sender = sender;
        self
    }

    pub fn with_registry(mut self, registry: GeneratorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_steps(mut self, steps: Arc<dyn StepSink>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_sql(mut self, sql: Arc<dyn SqlExecutor>) -> Self {
        self.sql = Some(sql);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_files_dir(mut self, files_dir: PathBuf) -> Self {
        self.files_dir = files_dir;
        self
    }

    pub fn corpus(&self) -> &CaseCorpus {
        &self.corpus
    }

    pub(crate) fn registry(&self) -> &GeneratorRegistry {
        &self.registry
    }

    pub(crate) fn steps(&self) -> &dyn StepSink {
        self.steps.as_ref()
    }

    pub(crate) fn sql(&self) -> Option<&dyn SqlExecutor> {
        self.sql.as_deref()
    }

    /// Run one case. The returned map holds extracted variables plus
    /// the resolved payload under `_payload`, for the caller to fold
    /// into the pool.
    #[instrument(skip(self, case, pool), fields(id = %case.id))]
    pub async fn run(&self, case: &CaseRecord, pool: &mut VariablePool) -> TauonResult<Map<String, Value>> {
        let mut stack = Vec::new();
        self.execute(case, pool, &mut stack).await
    }

    /// Look a case up by id and run it.
    pub async fn run_by_id(&self, id: &str, pool: &mut VariablePool) -> TauonResult<Map<String, Value>> {
        let mut stack = Vec::new();
        self.run_dependent(id, pool, &mut stack).await
    }

    /// Run a case referenced by id with the caller's visited stack.
    /// Dependencies re-execute on every reference; results are never
    /// memoized, so a login dependency always yields fresh state.
    pub(crate) async fn run_dependent(
        &self,
        id: &str,
        pool: &mut VariablePool,
        stack: &mut Vec<String>,
    ) -> TauonResult<Map<String, Value>> {
        let case = self.corpus.find(id)?;
        self.execute(case, pool, stack).await
    }

    fn execute<'a>(
        &'a self,
        case: &'a CaseRecord,
        pool: &'a mut VariablePool,
        stack: &'a mut Vec<String>,
    ) -> BoxFuture<'a, TauonResult<Map<String, Value>>> {
        Box::pin(async move {
            if stack.iter().any(|visited| visited == &case.id) {
                let chain = stack
                    .iter()
                    .map(String::as_str)
                    .chain(std::iter::once(case.id.as_str()))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(TauonError::CyclicDependence(chain));
            }
            stack.push(case.id.clone());
            let result = self.execute_states(case, pool, stack).await;
            stack.pop();
            result
        })
    }

    async fn execute_states(
        &self,
        case: &CaseRecord,
        pool: &mut VariablePool,
        stack: &mut Vec<String>,
    ) -> TauonResult<Map<String, Value>> {
        info!("executing case {} ({})", case.id, case.title);

        // Dependence runs before preprocessing so extracted variables
        // are visible to this case's own placeholders.
        if let Some(dependence) = &case.case_dependence {
            apply_dependence(self, dependence, pool, stack).await?;
        }

        let resolved = self.preprocess(case, pool)?;

        let response = self.sender.send(&resolved).await?;

        if let Some(seconds) = resolved.wait_seconds {
            debug!("waiting {seconds}s after request");
            tokio::time::sleep(Duration::from_secs(seconds)).await;
        }

        self.record_exchange(&resolved, &response);

        let runner = AssertionRunner {
            response: Some(&response),
            sql: self.sql.as_deref(),
            steps: self.steps.as_ref(),
        };
        if let Some(validate) = &resolved.validate {
            runner.assert_record(validate).await?;
        }
        if let Some(assert_sql) = &resolved.assert_sql {
            // Database assertions read their actual values from queries,
            // never from the response.
            let sql_runner = AssertionRunner {
                response: None,
                sql: self.sql.as_deref(),
                steps: self.steps.as_ref(),
            };
            sql_runner.assert_record(assert_sql).await?;
        }

        let mut produced = Map::new();
        if let Some(extract_value) = &resolved.extract {
            produced.extend(self.apply_extract(extract_value, &resolved, &response).await?);
        }
        if let Some(payload) = &resolved.payload {
            produced.insert("_payload".to_string(), payload.clone());
        }

        self.steps
            .step("case produced", &Value::Object(produced.clone()));
        Ok(produced)
    }

    /// Resolve every field of the case against the pool and normalize
    /// the transport-facing shapes.
    fn preprocess(&self, case: &CaseRecord, pool: &VariablePool) -> TauonResult<ResolvedCase> {
        let resolver = Resolver::new(&self.registry);
        let source = pool.snapshot();
        let resolve = |value: &Value| resolver.resolve(value, &source);

        let url_value = resolve(&Value::String(case.url.clone()));
        let host = pool.get("host").map(value_text).unwrap_or_default();
        let url = request::url_handle(&value_text(&url_value), &host);

        let headers_value = case.headers.as_ref().map(|headers| resolve(headers));
        let mut headers = request::headers_handle(headers_value.as_ref())?;
        let cookies_value = case.cookies.as_ref().map(|cookies| resolve(cookies));
        let cookies = request::cookies_handle(cookies_value.as_ref())?;
        let files_value = case.files.as_ref().map(|files| resolve(files));
        let files = request::files_handle(files_value.as_ref(), &self.files_dir)?;
        let wait_value = case.wait_seconds.as_ref().map(|wait| resolve(wait));
        let wait_seconds = request::wait_seconds_handle(wait_value.as_ref());

        let payload = case.payload.as_ref().map(|payload| resolve(payload));
        let validate = case
            .validate
            .as_ref()
            .map(|record| resolve_record(&resolver, &source, record))
            .transpose()?;
        let assert_sql = case
            .assert_sql
            .as_ref()
            .map(|record| resolve_record(&resolver, &source, record))
            .transpose()?;
        let extract = case.extract.as_ref().map(|spec| resolve(spec));

        if case.is_sign.unwrap_or(false) {
            match &self.signer {
                Some(signer) => {
                    let secret = case
                        .secret_key
                        .clone()
                        .or_else(|| pool.get("sign_secret").map(value_text));
                    let signature = signer.sign(payload.as_ref(), secret.as_deref());
                    headers.insert("Sign".to_string(), signature);
                }
                None => warn!("case {} requests signing but no signer is configured", case.id),
            }
        }

        Ok(ResolvedCase {
            id: case.id.clone(),
            title: case.title.clone(),
            severity: case.severity.clone(),
            url,
            method: case.method.clone(),
            headers,
            cookies,
            request_type: case.request_type,
            payload,
            files,
            wait_seconds,
            validate,
            assert_sql,
            extract,
        })
    }

    fn record_exchange(&self, resolved: &ResolvedCase, response: &CaseResponse) {
        debug!(
            "case {} | {} {} -> {} in {}s",
            resolved.id, resolved.method, resolved.url, response.status, response.elapsed_seconds
        );
        self.steps.step(
            "case",
            &json!({
                "id": resolved.id,
                "title": resolved.title,
                "severity": resolved.severity,
            }),
        );
        self.steps.step(
            "request",
            &json!({
                "url": resolved.url,
                "method": resolved.method,
                "headers": resolved.headers,
                "cookies": resolved.cookies,
                "request_type": resolved.request_type,
                "payload": resolved.payload,
                "files": resolved.files,
                "wait_seconds": resolved.wait_seconds,
            }),
        );
        self.steps.step("status_code", &json!(response.status));
        self.steps.step("response_result", &response.body_value());
        self.steps.step(
            "elapsed",
            &json!(format!(
                "{} s || {} ms",
                response.elapsed_seconds, response.elapsed_ms
            )),
        );
    }

    /// Apply an extraction spec across its `case`, `response` and
    /// `database` sections, in that order.
    async fn apply_extract(
        &self,
        extract_value: &Value,
        resolved: &ResolvedCase,
        response: &CaseResponse,
    ) -> TauonResult<Map<String, Value>> {
        let spec: ExtractSpec = serde_json::from_value(extract_value.clone())
            .map_err(|err| TauonError::Config(format!("extract spec is malformed: {err}")))?;

        let mut produced = Map::new();

        if let Some(rules) = &spec.case {
            let case_value = serde_json::to_value(resolved)?;
            let source = ExtractionSource::Case(&case_value);
            produced.extend(extract::apply_rules(&source, rules));
        }

        if let Some(rules) = &spec.response {
            let source = ExtractionSource::Response(response);
            produced.extend(extract::apply_rules(&source, rules));
        }

        if let Some(rules) = &spec.database {
            if let Some(sql) = self.sql.as_deref() {
                for rule in rules.as_slice() {
                    let parsed: DatabaseRules =
                        serde_json::from_value(rule.clone()).map_err(|err| {
                            TauonError::Config(format!("database extract rule is malformed: {err}"))
                        })?;
                    let rows = sql.query_all(&parsed.sql).await?;
                    let source = ExtractionSource::Database(&rows);
                    produced.extend(extract::apply_rules(&source, &parsed.rules));
                }
            } else {
                warn!("extract spec names a database section but no database is configured");
            }
        }

        for (name, value) in &produced {
            self.steps.step(&format!("extracted {name}"), value);
        }
        Ok(produced)
    }
}

// Assertion records must stay mappings through resolution; a record is
// resolved entry-wise so the shape cannot degrade.
fn resolve_record(
    resolver: &Resolver<'_>,
    source: &Map<String, Value>,
    record: &Map<String, Value>,
) -> TauonResult<Map<String, Value>> {
    let mut out = Map::new();
    for (name, value) in record {
        out.insert(name.clone(), resolver.resolve(value, source));
    }
    Ok(out)
}
