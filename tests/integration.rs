use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tauon::{CaseCorpus, CaseRecord, Executor, RecordingStepSink, TauonError, VariablePool};
use tokio::task::JoinHandle;

struct TestServer {
    base_url: String,
    login_hits: Arc<AtomicUsize>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let login_hits = Arc::new(AtomicUsize::new(0));
        let hits = login_hits.clone();

        let app = Router::new()
            .route(
                "/api/user/login",
                post(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Json(json!({
                            "code": 0,
                            "data": {
                                "token": "tok-abc123",
                                "user_id": 104
                            }
                        }))
                    }
                }),
            )
            .route(
                "/api/echo",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({"code": 0, "data": body}))
                }),
            )
            .route(
                "/api/items",
                get(|| async move { Json(json!({"code": 0, "data": {"ids": [1, 2, 3]}})) }),
            )
            .route(
                "/api/code_one",
                get(|| async move { Json(json!({"code": 1})) }),
            );

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("test server failed");
        });

        Self {
            base_url: format!("http://{addr}"),
            login_hits,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

const LOGIN_CASE: &str = r#"
  - id: login_01
    title: login with valid credentials
    url: /api/user/login
    method: POST
    request_type: json
    payload:
      username: admin
      password: secret
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
          user_id: "$.data.user_id"
"#;

fn corpus_from_yaml(cases: &str) -> CaseCorpus {
    let document = format!("case_info:\n{cases}");
    let parsed: serde_yaml::Value = serde_yaml::from_str(&document).unwrap();
    let records: Vec<CaseRecord> =
        serde_yaml::from_value(parsed.get("case_info").unwrap().clone()).unwrap();
    CaseCorpus::from_cases(records)
}

fn pool_for(server: &TestServer) -> VariablePool {
    let mut pool = VariablePool::new();
    pool.insert("host", json!(server.base_url.clone()));
    pool
}

#[tokio::test]
async fn test_login_case_extracts_typed_variables() {
    let server = TestServer::spawn().await;
    let executor = Executor::new(corpus_from_yaml(LOGIN_CASE));
    let mut pool = pool_for(&server);

    let produced = executor.run_by_id("login_01", &mut pool).await.unwrap();
    assert_eq!(produced["token"], json!("tok-abc123"));
    assert_eq!(produced["user_id"], json!(104));
    assert_eq!(produced["_payload"]["username"], json!("admin"));

    pool.merge(produced);
    assert_eq!(pool.get("token"), Some(&json!("tok-abc123")));

    server.shutdown().await;
}

#[tokio::test]
async fn test_dependence_order_and_single_execution() {
    let server = TestServer::spawn().await;
    let cases = format!(
        "{LOGIN_CASE}{}",
        r#"
  - id: echo_01
    title: echo token from dependence
    url: /api/echo
    method: POST
    request_type: json
    payload:
      token: "${token}"
      greeting: "${greeting}"
    validate:
      status_code: 200
      assert_token:
        type_jsonpath: "$.data.token"
        expect_value: "tok-abc123"
        assert_type: equals
      assert_greeting:
        type_jsonpath: "$.data.greeting"
        expect_value: hello
        assert_type: "=="
    case_dependence:
      variables:
        greeting: hello
      interface: login_01
"#
    );
    let executor = Executor::new(corpus_from_yaml(&cases));
    let mut pool = pool_for(&server);

    executor.run_by_id("echo_01", &mut pool).await.unwrap();

    // The variables section merged before the interface ran, and the
    // dependent login executed exactly once.
    assert_eq!(pool.get("greeting"), Some(&json!("hello")));
    assert_eq!(pool.get("token"), Some(&json!("tok-abc123")));
    assert_eq!(server.login_hits.load(Ordering::SeqCst), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_assertion_failure_reports_both_values() {
    let server = TestServer::spawn().await;
    let cases = r#"
  - id: code_check_01
    title: expects code zero
    url: /api/code_one
    method: GET
    validate:
      status_code: 200
      assert_code:
        type_jsonpath: "$.code"
        expect_value: 0
        assert_type: equals
"#;
    let executor = Executor::new(corpus_from_yaml(cases));
    let mut pool = pool_for(&server);

    let err = executor
        .run_by_id("code_check_01", &mut pool)
        .await
        .unwrap_err();
    assert!(err.is_assertion());
    let text = err.to_string();
    assert!(text.contains('0') && text.contains('1'), "{text}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_failed_case_is_still_observable() {
    let server = TestServer::spawn().await;
    let cases = r#"
  - id: missing_01
    title: expects a page that is not there
    url: /api/not/here
    method: GET
    validate:
      status_code: 200
"#;
    let steps = Arc::new(RecordingStepSink::new());
    let executor = Executor::new(corpus_from_yaml(cases)).with_steps(steps.clone());
    let mut pool = pool_for(&server);

    let err = executor.run_by_id("missing_01", &mut pool).await.unwrap_err();
    assert!(err.is_assertion());

    // Capture and record ran before the assertion failed.
    let recorded = steps.take();
    let status = recorded
        .iter()
        .find(|(name, _)| name == "status_code")
        .map(|(_, value)| value.clone());
    assert_eq!(status, Some(json!(404)));

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_assert_type_is_config_error() {
    let server = TestServer::spawn().await;
    let cases = r#"
  - id: odd_assert_01
    title: uses an unregistered predicate
    url: /api/items
    method: GET
    validate:
      assert_ids:
        type_jsonpath: "$.data.ids"
        expect_value: [1, 2, 3]
        assert_type: roughly_equals
"#;
    let executor = Executor::new(corpus_from_yaml(cases));
    let mut pool = pool_for(&server);

    let err = executor
        .run_by_id("odd_assert_01", &mut pool)
        .await
        .unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("roughly_equals"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_cyclic_dependence_is_detected() {
    let server = TestServer::spawn().await;
    let cases = r#"
  - id: cycle_a
    title: first half of a cycle
    url: /api/items
    method: GET
    case_dependence:
      interface: cycle_b
  - id: cycle_b
    title: second half of a cycle
    url: /api/items
    method: GET
    case_dependence:
      interface: cycle_a
"#;
    let executor = Executor::new(corpus_from_yaml(cases));
    let mut pool = pool_for(&server);

    let err = executor.run_by_id("cycle_a", &mut pool).await.unwrap_err();
    match err {
        TauonError::CyclicDependence(chain) => {
            assert_eq!(chain, "cycle_a -> cycle_b -> cycle_a");
        }
        other => panic!("expected cyclic dependence, got {other}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_unresolvable_placeholder_survives_verbatim() {
    let server = TestServer::spawn().await;
    let cases = r#"
  - id: failsoft_01
    title: unknown generator stays literal
    url: /api/echo
    method: POST
    request_type: json
    payload:
      x: "${no_such_fn()}"
    validate:
      status_code: 200
      assert_x:
        type_jsonpath: "$.data.x"
        expect_value: "${no_such_fn()}"
        assert_type: str_eq
"#;
    let executor = Executor::new(corpus_from_yaml(cases));
    let mut pool = pool_for(&server);

    let produced = executor.run_by_id("failsoft_01", &mut pool).await.unwrap();
    assert_eq!(produced["_payload"]["x"], json!("${no_such_fn()}"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_typed_list_travels_through_payload() {
    let server = TestServer::spawn().await;
    let cases = r#"
  - id: typed_01
    title: list reference keeps its type
    url: /api/echo
    method: POST
    request_type: json
    payload:
      ids: "${ids}"
    validate:
      status_code: 200
      assert_ids:
        type_jsonpath: "$.data.ids"
        expect_value: [1, 2, 3]
        assert_type: equals
      assert_len:
        type_jsonpath: "$.data.ids"
        expect_value: 3
        assert_type: len_eq
"#;
    let executor = Executor::new(corpus_from_yaml(cases));
    let mut pool = pool_for(&server);
    pool.insert("ids", json!([1, 2, 3]));

    executor.run_by_id("typed_01", &mut pool).await.unwrap();

    server.shutdown().await;
}

#[tokio::test]
async fn test_params_case_builds_query_string() {
    let server = TestServer::spawn().await;
    let cases = r#"
  - id: params_01
    title: query parameters from payload
    url: /api/items
    method: GET
    request_type: params
    payload:
      page: 2
      q: widgets
    validate:
      status_code: 200
      assert_code:
        type_jsonpath: "$.code"
        expect_value: 0
        assert_type: equals
"#;
    let executor = Executor::new(corpus_from_yaml(cases));
    let mut pool = pool_for(&server);

    executor.run_by_id("params_01", &mut pool).await.unwrap();

    server.shutdown().await;
}

#[tokio::test]
async fn test_corpus_discovery_and_run() {
    let server = TestServer::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("auth");
    std::fs::create_dir(&nested).unwrap();
    std::fs::write(
        nested.join("login.yaml"),
        format!("case_info:\n{LOGIN_CASE}"),
    )
    .unwrap();

    let corpus = CaseCorpus::load(dir.path()).unwrap();
    assert_eq!(corpus.len(), 1);

    let executor = Executor::new(corpus);
    let mut pool = pool_for(&server);
    let produced = executor.run_by_id("login_01", &mut pool).await.unwrap();
    assert_eq!(produced["token"], json!("tok-abc123"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_case_id_is_not_found() {
    let executor = Executor::new(CaseCorpus::from_cases(Vec::new()));
    let mut pool = VariablePool::new();
    let err = executor.run_by_id("ghost_01", &mut pool).await.unwrap_err();
    assert!(matches!(err, TauonError::CaseNotFound(_)));
}
