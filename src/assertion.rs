//! Assertion predicates and the composite record evaluator.
//!
//! The predicate table is fixed and built statically; a rule names its
//! predicate by `assert_type`, using either the canonical name or the
//! short code the corpus format uses (`==`, `lt`, `len_eq`, ...). An
//! unknown `assert_type` is a configuration error, not an assertion
//! failure.

use crate::database::SqlExecutor;
use crate::error::{TauonError, TauonResult};
use crate::extract::{self, ExtractionSource};
use crate::model::{AssertRule, CaseResponse};
use crate::resolver::value_text;
use crate::steps::StepSink;
use serde_json::{json, Map, Value};
use tracing::debug;

struct Predicate {
    name: &'static str,
    code: &'static str,
    check: fn(&Value, &Value) -> Result<bool, String>,
}

static PREDICATES: &[Predicate] = &[
    Predicate { name: "equals", code: "==", check: check_equals },
    Predicate { name: "not_equals", code: "not_eq", check: check_not_equals },
    Predicate { name: "less_than", code: "lt", check: check_less_than },
    Predicate { name: "less_than_or_equals", code: "le", check: check_less_than_or_equals },
    Predicate { name: "greater_than", code: "gt", check: check_greater_than },
    Predicate { name: "greater_than_or_equals", code: "ge", check: check_greater_than_or_equals },
    Predicate { name: "string_equals", code: "str_eq", check: check_string_equals },
    Predicate { name: "length_equals", code: "len_eq", check: check_length_equals },
    Predicate { name: "length_greater_than", code: "len_gt", check: check_length_greater_than },
    Predicate {
        name: "length_greater_than_or_equals",
        code: "len_ge",
        check: check_length_greater_than_or_equals,
    },
    Predicate { name: "length_less_than", code: "len_lt", check: check_length_less_than },
    Predicate {
        name: "length_less_than_or_equals",
        code: "len_le",
        check: check_length_less_than_or_equals,
    },
    Predicate { name: "contains", code: "contains", check: check_contains },
    Predicate { name: "contained_by", code: "contained_by", check: check_contained_by },
    Predicate { name: "startswith", code: "startswith", check: check_startswith },
    Predicate { name: "endswith", code: "endswith", check: check_endswith },
];

fn lookup(assert_type: &str) -> Option<&'static Predicate> {
    PREDICATES
        .iter()
        .find(|p| p.name == assert_type || p.code == assert_type)
}

/// Every registered predicate name, canonical form.
pub fn predicate_names() -> impl Iterator<Item = &'static str> {
    PREDICATES.iter().map(|p| p.name)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Invoke a named predicate against expected and actual values.
///
/// A failing check raises [`TauonError::Assertion`] carrying either the
/// supplied message or one embedding both values and their types; an
/// unknown `assert_type` raises [`TauonError::Config`].
pub fn assert_value(
    assert_type: &str,
    expect: &Value,
    actual: &Value,
    message: Option<&str>,
) -> TauonResult<()> {
    let predicate = lookup(assert_type)
        .ok_or_else(|| TauonError::Config(format!("unsupported assert_type: {assert_type}")))?;

    let failure = |detail: Option<String>| {
        let text = match message.filter(|m| !m.is_empty()) {
            Some(user) => user.to_string(),
            None => {
                let base = format!(
                    "{} check failed, expect_value: {} ({}), actual_value: {} ({})",
                    predicate.name,
                    expect,
                    type_name(expect),
                    actual,
                    type_name(actual)
                );
                match detail {
                    Some(detail) => format!("{base}: {detail}"),
                    None => base,
                }
            }
        };
        TauonError::Assertion(text)
    };

    match (predicate.check)(expect, actual) {
        Ok(true) => Ok(()),
        Ok(false) => Err(failure(None)),
        Err(reason) => Err(failure(Some(reason))),
    }
}

// Numbers compare numerically regardless of integer/float encoding.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn check_equals(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(values_equal(expect, actual))
}

fn check_not_equals(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(!values_equal(expect, actual))
}

fn ordering(expect: &Value, actual: &Value) -> Result<std::cmp::Ordering, String> {
    if let (Some(a), Some(b)) = (expect.as_f64(), actual.as_f64()) {
        return a
            .partial_cmp(&b)
            .ok_or_else(|| "values are not comparable".to_string());
    }
    if let (Some(a), Some(b)) = (expect.as_str(), actual.as_str()) {
        return Ok(a.cmp(b));
    }
    Err(format!(
        "cannot order {} against {}",
        type_name(expect),
        type_name(actual)
    ))
}

fn check_less_than(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(ordering(expect, actual)?.is_lt())
}

fn check_less_than_or_equals(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(ordering(expect, actual)?.is_le())
}

fn check_greater_than(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(ordering(expect, actual)?.is_gt())
}

fn check_greater_than_or_equals(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(ordering(expect, actual)?.is_ge())
}

fn check_string_equals(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(value_text(expect) == value_text(actual))
}

fn value_len(value: &Value) -> Result<usize, String> {
    match value {
        Value::String(s) => Ok(s.chars().count()),
        Value::Array(items) => Ok(items.len()),
        Value::Object(map) => Ok(map.len()),
        other => Err(format!("actual_value of type {} has no length", type_name(other))),
    }
}

fn expect_number(expect: &Value) -> Result<f64, String> {
    expect
        .as_f64()
        .ok_or_else(|| "expect_value must be a number for length checks".to_string())
}

fn check_length_equals(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(expect_number(expect)? == value_len(actual)? as f64)
}

// Length orderings keep the expected value on the left, matching the
// plain orderings above.
fn check_length_greater_than(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(expect_number(expect)? > value_len(actual)? as f64)
}

fn check_length_greater_than_or_equals(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(expect_number(expect)? >= value_len(actual)? as f64)
}

fn check_length_less_than(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(expect_number(expect)? < value_len(actual)? as f64)
}

fn check_length_less_than_or_equals(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(expect_number(expect)? <= value_len(actual)? as f64)
}

fn check_contains(expect: &Value, actual: &Value) -> Result<bool, String> {
    match actual {
        Value::String(s) => Ok(s.contains(&value_text(expect))),
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(item, expect))),
        Value::Object(map) => expect
            .as_str()
            .map(|key| map.contains_key(key))
            .ok_or_else(|| "membership in an object requires a string key".to_string()),
        other => Err(format!(
            "actual_value must be a string, array, or object, got {}",
            type_name(other)
        )),
    }
}

fn check_contained_by(expect: &Value, actual: &Value) -> Result<bool, String> {
    // Roles reversed: the expected value is the container.
    check_contains(actual, expect)
}

fn check_startswith(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(value_text(actual).starts_with(&value_text(expect)))
}

fn check_endswith(expect: &Value, actual: &Value) -> Result<bool, String> {
    Ok(value_text(actual).ends_with(&value_text(expect)))
}

/// Evaluates composite assertion records against a response and, for
/// rules carrying `sql`, a database.
pub struct AssertionRunner<'a> {
    pub response: Option<&'a CaseResponse>,
    pub sql: Option<&'a dyn SqlExecutor>,
    pub steps: &'a dyn StepSink,
}

impl AssertionRunner<'_> {
    /// Evaluate every rule of an assertion record.
    ///
    /// The reserved key `status_code` is compared directly against the
    /// response status; every other entry resolves its actual value and
    /// dispatches on `assert_type`.
    pub async fn assert_record(&self, record: &Map<String, Value>) -> TauonResult<()> {
        for (name, raw_rule) in record {
            if name.eq_ignore_ascii_case("status_code") {
                self.assert_status(raw_rule)?;
                continue;
            }

            let rule: AssertRule = serde_json::from_value(raw_rule.clone()).map_err(|err| {
                TauonError::Config(format!("assertion rule {name} is malformed: {err}"))
            })?;
            self.steps.step(&format!("assert {name}"), raw_rule);

            let actual = self.actual_for(&rule).await?;
            debug!(
                "assert {name}: type={} expect={} actual={actual}",
                rule.assert_type, rule.expect_value
            );
            assert_value(
                &rule.assert_type,
                &rule.expect_value,
                &actual,
                rule.message.as_deref(),
            )?;
            self.steps.step(
                &format!("assert {name} passed"),
                &json!({"expect_value": rule.expect_value, "actual_value": actual}),
            );
        }
        Ok(())
    }

    fn assert_status(&self, expected: &Value) -> TauonResult<()> {
        let response = self.response.ok_or_else(|| {
            TauonError::Config("status_code assertion requires a response".to_string())
        })?;
        self.steps.step("assert status_code", expected);
        let want = expected
            .as_u64()
            .or_else(|| expected.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| {
                TauonError::Config(format!("status_code expectation is not numeric: {expected}"))
            })?;
        if want != u64::from(response.status) {
            return Err(TauonError::Assertion(format!(
                "status_code check failed, expect_value: {want}, actual_value: {}",
                response.status
            )));
        }
        self.steps
            .step("assert status_code passed", &json!(response.status));
        Ok(())
    }

    async fn actual_for(&self, rule: &AssertRule) -> TauonResult<Value> {
        if let Some(sql) = rule.sql.as_deref() {
            let executor = self.sql.ok_or_else(|| {
                TauonError::Config("assertion rule carries sql but no database is configured".to_string())
            })?;
            let rows = executor.query_all(sql).await?;
            let source = ExtractionSource::Database(&rows);
            return Ok(extract::actual_value(
                &source,
                rule.type_jsonpath.as_deref(),
                rule.type_re.as_deref(),
            ));
        }
        let response = self.response.ok_or_else(|| {
            TauonError::Config("assertion rule without sql requires a response".to_string())
        })?;
        let source = ExtractionSource::Response(response);
        Ok(extract::actual_value(
            &source,
            rule.type_jsonpath.as_deref(),
            rule.type_re.as_deref(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::RecordingStepSink;
    use serde_json::json;
    use std::collections::HashMap;

    fn response_with_body(body: Value, status: u16) -> CaseResponse {
        CaseResponse {
            status,
            headers: HashMap::new(),
            cookies: Map::new(),
            text: body.to_string(),
            json: Some(body),
            elapsed_seconds: 0.01,
            elapsed_ms: 10.0,
        }
    }

    #[test]
    fn test_equals_across_number_encodings() {
        assert!(assert_value("equals", &json!(1), &json!(1.0), None).is_ok());
        assert!(assert_value("==", &json!("a"), &json!("a"), None).is_ok());
        assert!(assert_value("equals", &json!(0), &json!(1), None).is_err());
    }

    #[test]
    fn test_failure_message_embeds_values_and_types() {
        let err = assert_value("equals", &json!(0), &json!(1), None).unwrap_err();
        let text = err.to_string();
        assert!(text.contains('0'), "{text}");
        assert!(text.contains('1'), "{text}");
        assert!(text.contains("integer"), "{text}");
    }

    #[test]
    fn test_user_message_wins() {
        let err = assert_value("equals", &json!(0), &json!(1), Some("code must be zero"))
            .unwrap_err();
        assert!(err.to_string().contains("code must be zero"));
    }

    #[test]
    fn test_unknown_assert_type_is_config_error() {
        let err = assert_value("almost_equals", &json!(1), &json!(1), None).unwrap_err();
        assert!(err.is_config());
        assert!(!err.is_assertion());
    }

    #[test]
    fn test_orderings_keep_expect_on_the_left() {
        assert!(assert_value("less_than", &json!(1), &json!(2), None).is_ok());
        assert!(assert_value("lt", &json!(2), &json!(1), None).is_err());
        assert!(assert_value("ge", &json!(2), &json!(2), None).is_ok());
        assert!(assert_value("greater_than", &json!(3), &json!(2), None).is_ok());
    }

    #[test]
    fn test_length_predicates() {
        assert!(assert_value("len_eq", &json!(3), &json!("abc"), None).is_ok());
        assert!(assert_value("len_eq", &json!(3), &json!([1, 2, 3]), None).is_ok());
        assert!(assert_value("len_gt", &json!(5), &json!("abc"), None).is_ok());
        assert!(assert_value("len_lt", &json!(2), &json!("abc"), None).is_ok());
        assert!(assert_value("len_eq", &json!(3), &json!(42), None).is_err());
    }

    #[test]
    fn test_membership_both_directions() {
        assert!(assert_value("contains", &json!(2), &json!([1, 2, 3]), None).is_ok());
        assert!(assert_value("contains", &json!("bc"), &json!("abcd"), None).is_ok());
        assert!(assert_value("contains", &json!("key"), &json!({"key": 1}), None).is_ok());
        assert!(assert_value("contained_by", &json!([1, 2, 3]), &json!(2), None).is_ok());
        assert!(assert_value("contains", &json!(9), &json!([1, 2]), None).is_err());
    }

    #[test]
    fn test_prefix_and_suffix() {
        assert!(assert_value("startswith", &json!("tok"), &json!("tok-1"), None).is_ok());
        assert!(assert_value("endswith", &json!("-1"), &json!("tok-1"), None).is_ok());
        assert!(assert_value("startswith", &json!(20), &json!(200), None).is_ok());
        assert!(assert_value("endswith", &json!("x"), &json!("tok-1"), None).is_err());
    }

    #[tokio::test]
    async fn test_record_with_status_and_rule() {
        let response = response_with_body(json!({"code": 0}), 200);
        let sink = RecordingStepSink::new();
        let runner = AssertionRunner {
            response: Some(&response),
            sql: None,
            steps: &sink,
        };
        let record: Map<String, Value> = serde_json::from_value(json!({
            "status_code": 200,
            "assert_code": {
                "type_jsonpath": "$.code",
                "expect_value": 0,
                "assert_type": "equals"
            }
        }))
        .unwrap();
        runner.assert_record(&record).await.unwrap();
        assert!(sink.len() >= 4);
    }

    #[tokio::test]
    async fn test_record_failure_carries_both_values() {
        let response = response_with_body(json!({"code": 1}), 200);
        let sink = RecordingStepSink::new();
        let runner = AssertionRunner {
            response: Some(&response),
            sql: None,
            steps: &sink,
        };
        let record: Map<String, Value> = serde_json::from_value(json!({
            "status_code": 200,
            "assert_code": {
                "type_jsonpath": "$.code",
                "expect_value": 0,
                "assert_type": "equals"
            }
        }))
        .unwrap();
        let err = runner.assert_record(&record).await.unwrap_err();
        assert!(err.is_assertion());
        let text = err.to_string();
        assert!(text.contains('0') && text.contains('1'), "{text}");
    }

    #[tokio::test]
    async fn test_status_mismatch_fails() {
        let response = response_with_body(json!({}), 404);
        let sink = RecordingStepSink::new();
        let runner = AssertionRunner {
            response: Some(&response),
            sql: None,
            steps: &sink,
        };
        let record: Map<String, Value> =
            serde_json::from_value(json!({"status_code": 200})).unwrap();
        let err = runner.assert_record(&record).await.unwrap_err();
        assert!(err.is_assertion());
    }

    #[tokio::test]
    async fn test_sql_rule_without_database_is_config_error() {
        let response = response_with_body(json!({}), 200);
        let sink = RecordingStepSink::new();
        let runner = AssertionRunner {
            response: Some(&response),
            sql: None,
            steps: &sink,
        };
        let record: Map<String, Value> = serde_json::from_value(json!({
            "assert_row": {
                "sql": "SELECT 1",
                "expect_value": 1,
                "assert_type": "equals"
            }
        }))
        .unwrap();
        let err = runner.assert_record(&record).await.unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_registry_exposes_canonical_names() {
        let names: Vec<_> = predicate_names().collect();
        assert!(names.contains(&"equals"));
        assert!(names.contains(&"contained_by"));
        assert_eq!(names.len(), 16);
    }
}
