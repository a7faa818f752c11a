//! Case dependency resolution.
//!
//! A dependency spec is applied strictly in `variables` → `interface` →
//! `database` order, mutating the shared pool as it goes. Interface
//! entries run other cases through the executor with the caller's
//! visited stack threaded through, so a dependence cycle surfaces as an
//! error instead of unbounded recursion.

use crate::error::{TauonError, TauonResult};
use crate::executor::Executor;
use crate::extract::{self, ExtractionSource};
use crate::model::{DatabaseRules, DependenceSpec};
use crate::pool::VariablePool;
use crate::resolver::Resolver;
use serde_json::{json, Value};
use tracing::{debug, warn};

pub(crate) async fn apply_dependence(
    executor: &Executor,
    spec: &DependenceSpec,
    pool: &mut VariablePool,
    stack: &mut Vec<String>,
) -> TauonResult<()> {
    if spec.is_empty() {
        debug!("no case dependence to apply");
        return Ok(());
    }

    if let Some(variables) = &spec.variables {
        let resolver = Resolver::new(executor.registry());
        // Each entry resolves against the pool as it stands, so later
        // entries of the same section can reference earlier ones.
        for (name, value) in variables {
            let resolved = resolver.resolve(value, &pool.snapshot());
            executor
                .steps()
                .step(&format!("dependence variable {name}"), &resolved);
            pool.insert(name.clone(), resolved);
        }
    }

    if let Some(interfaces) = &spec.interface {
        for id in interfaces.as_slice() {
            executor
                .steps()
                .step("dependence interface", &Value::String(id.clone()));
            let produced = executor.run_dependent(id, pool, stack).await?;
            pool.merge(produced);
        }
    }

    if let Some(rules) = &spec.database {
        let Some(sql) = executor.sql() else {
            warn!("database dependence configured but no database is available, skipping");
            return Ok(());
        };
        for rule in rules.as_slice() {
            let parsed: DatabaseRules = serde_json::from_value(rule.clone()).map_err(|err| {
                TauonError::Config(format!("database dependence rule is malformed: {err}"))
            })?;
            let rows = sql.query_all(&parsed.sql).await?;
            executor.steps().step(
                "dependence database",
                &json!({"sql": parsed.sql, "rows": rows.len()}),
            );
            let source = ExtractionSource::Database(&rows);
            for (name, value) in extract::apply_rules(&source, &parsed.rules) {
                executor
                    .steps()
                    .step(&format!("dependence database extract {name}"), &value);
                pool.insert(name, value);
            }
        }
    }

    Ok(())
}
