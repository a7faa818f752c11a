//! tauon CLI - runs declarative HTTP test cases from a YAML corpus.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use std::time::Instant;
use tauon::{
    CaseCorpus, CaseOutcome, CaseRecord, DbConfig, Executor, MySqlExecutor, RecordingStepSink,
    RunReport, VariablePool,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// tauon - declarative HTTP test case runner.
#[derive(Parser, Debug)]
#[command(name = "tauon", version, about)]
struct Cli {
    /// Case corpus file or directory.
    #[arg(short = 'p', long = "path", default_value = "testcases")]
    path: String,

    /// Filter cases by id or title (partial match).
    #[arg(short = 'f', long = "filter")]
    filter: Option<String>,

    /// Environment seed file (YAML) loaded into the variable pool.
    #[arg(short = 'e', long = "env")]
    env_file: Option<String>,

    /// Override the pool's host entry.
    #[arg(short = 'b', long = "base-url")]
    base_url: Option<String>,

    /// Directory upload file names resolve against.
    #[arg(long = "files-dir", default_value = "files")]
    files_dir: String,

    /// Directory to save run report files.
    #[arg(short = 'r', long = "report-dir")]
    report_dir: Option<String>,

    /// Report output format.
    #[arg(long = "report-format", default_value = "json")]
    report_format: ReportFormat,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum ReportFormat {
    Json,
    Yaml,
    Text,
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

/// Load the environment seed into the pool and pull out the database
/// configuration when one is present.
fn seed_pool(pool: &mut VariablePool, env_file: &str) -> Result<Option<DbConfig>> {
    let content = fs::read_to_string(env_file)
        .context(format!("failed to read environment file: {env_file}"))?;
    let seed: Map<String, Value> = serde_yaml::from_str(&content)
        .context(format!("environment file is not a mapping: {env_file}"))?;

    let db_config = match seed.get("db_info") {
        Some(value) => Some(
            serde_json::from_value::<DbConfig>(value.clone())
                .context("db_info entry is malformed")?,
        ),
        None => None,
    };

    info!("seeding pool with {} value(s) from {env_file}", seed.len());
    pool.merge(seed);
    Ok(db_config)
}

fn print_case_outcome(outcome: &CaseOutcome) {
    let status = if outcome.success {
        "\x1b[32mPASS\x1b[0m"
    } else {
        "\x1b[31mFAIL\x1b[0m"
    };
    info!(
        "{} {} - {} ({} ms)",
        status, outcome.id, outcome.title, outcome.duration_ms
    );
    if let Some(err) = &outcome.error {
        error!("  \x1b[31m{err}\x1b[0m");
    }
}

fn print_steps(steps: &[(String, Value)]) {
    for (name, value) in steps {
        let text = value.to_string();
        let truncated = if text.len() > 500 {
            format!("{}...(truncated)", &text[..500])
        } else {
            text
        };
        debug!("  {name}: {truncated}");
    }
}

fn save_report(report: &RunReport, report_dir: &Path, format: ReportFormat) -> Result<PathBuf> {
    if !report_dir.exists() {
        fs::create_dir_all(report_dir)?;
    }

    let timestamp = Utc::now().timestamp();
    let (filename, content) = match format {
        ReportFormat::Json => (
            format!("tauon-{timestamp}.json"),
            serde_json::to_string_pretty(report)?,
        ),
        ReportFormat::Yaml => (
            format!("tauon-{timestamp}.yaml"),
            serde_yaml::to_string(report)?,
        ),
        ReportFormat::Text => {
            let mut content = String::new();
            content.push_str(&format!("Run at {}\n", report.timestamp));
            content.push_str(&format!(
                "Passed: {}  Failed: {}  Skipped: {}  ({} ms)\n\n",
                report.passed, report.failed, report.skipped, report.total_duration_ms
            ));
            for outcome in &report.cases {
                content.push_str(&format!(
                    "  {} {} - {} ({} ms)\n",
                    if outcome.success { "PASS" } else { "FAIL" },
                    outcome.id,
                    outcome.title,
                    outcome.duration_ms
                ));
                if let Some(err) = &outcome.error {
                    content.push_str(&format!("       {err}\n"));
                }
            }
            (format!("tauon-{timestamp}.txt"), content)
        }
    };

    let file_path = report_dir.join(filename);
    let mut file = File::create(&file_path)?;
    file.write_all(content.as_bytes())?;
    Ok(file_path)
}

fn matches_filter(case: &CaseRecord, filter: Option<&str>) -> bool {
    match filter {
        Some(filter) => {
            let needle = filter.to_lowercase();
            case.id.to_lowercase().contains(&needle) || case.title.to_lowercase().contains(&needle)
        }
        None => true,
    }
}

fn status_from_steps(steps: &[(String, Value)]) -> Option<u16> {
    steps
        .iter()
        .rev()
        .find(|(name, _)| name == "status_code")
        .and_then(|(_, value)| value.as_u64())
        .map(|status| status as u16)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let mut pool = VariablePool::new();
    let db_config = match &args.env_file {
        Some(env_file) => seed_pool(&mut pool, env_file)?,
        None => None,
    };
    if let Some(base_url) = &args.base_url {
        pool.insert("host", Value::String(base_url.clone()));
    }

    let corpus = CaseCorpus::load(&args.path)
        .context(format!("failed to load case corpus from {}", args.path))?;
    if corpus.is_empty() {
        return Err(anyhow!("no cases found under {}", args.path));
    }

    let steps = Arc::new(RecordingStepSink::new());
    let mut executor = Executor::new(corpus)
        .with_steps(steps.clone())
        .with_files_dir(PathBuf::from(&args.files_dir));
    if let Some(config) = db_config {
        executor = executor.with_sql(Arc::new(MySqlExecutor::new(config)?));
    }

    let cases: Vec<CaseRecord> = executor
        .corpus()
        .cases()
        .iter()
        .filter(|case| matches_filter(case, args.filter.as_deref()))
        .cloned()
        .collect();
    if cases.is_empty() {
        return Err(anyhow!("no cases matching the filter were found"));
    }

    let total = cases.len();
    info!("running {total} case(s)...");

    let run_start = Instant::now();
    let mut outcomes = Vec::new();
    let mut passed = 0usize;
    let mut failed = 0usize;
    let mut skipped = 0usize;

    for (index, case) in cases.iter().enumerate() {
        if !case.is_enabled() {
            info!("case {}/{}: {} skipped (run: false)", index + 1, total, case.id);
            skipped += 1;
            continue;
        }

        info!("case {}/{}: {} - {}", index + 1, total, case.id, case.title);
        let case_start = Instant::now();
        let result = executor.run(case, &mut pool).await;
        let duration_ms = case_start.elapsed().as_millis() as u64;
        let recorded = steps.take();
        if args.verbose {
            print_steps(&recorded);
        }

        let outcome = match result {
            Ok(produced) => {
                pool.merge(produced);
                passed += 1;
                CaseOutcome {
                    id: case.id.clone(),
                    title: case.title.clone(),
                    success: true,
                    error: None,
                    status: status_from_steps(&recorded),
                    duration_ms,
                }
            }
            Err(err) => {
                failed += 1;
                CaseOutcome {
                    id: case.id.clone(),
                    title: case.title.clone(),
                    success: false,
                    error: Some(err.to_string()),
                    status: status_from_steps(&recorded),
                    duration_ms,
                }
            }
        };
        print_case_outcome(&outcome);
        outcomes.push(outcome);
    }

    let report = RunReport {
        cases: outcomes,
        passed,
        failed,
        skipped,
        total_duration_ms: run_start.elapsed().as_millis() as u64,
        timestamp: Utc::now().to_rfc3339(),
    };

    info!(
        "Summary:\n  Total: {}\n  \x1b[32mPassed: {}\x1b[0m\n  \x1b[31mFailed: {}\x1b[0m\n  Skipped: {}\n  Duration: {} ms",
        passed + failed + skipped,
        passed,
        failed,
        skipped,
        report.total_duration_ms
    );

    if let Some(report_dir) = &args.report_dir {
        match save_report(&report, Path::new(report_dir), args.report_format) {
            Ok(path) => info!("report saved: {}", path.display()),
            Err(err) => warn!("failed to save report: {err}"),
        }
    }

    if failed > 0 {
        exit(1);
    }
    Ok(())
}
