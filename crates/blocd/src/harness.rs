use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use bloc_config::HarnessConfig;
use bloc_core::{RunRole, TestResult, TestRun, TestSuite, truncate_chars};
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;

/// Test id of the single result synthesized when runner output cannot be
/// attributed to individual tests.
pub const SYNTHETIC_TEST_ID: &str = "suite";

const SYNTHETIC_OUTPUT_CHARS: usize = 500;
const PACKAGE_MARKER: &str = "__init__.py";

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("harness command is empty")]
    EmptyCommand,
    #[error("workspace does not exist: {0}")]
    MissingWorkspace(PathBuf),
    #[error("failed to write tests into {path}: {source}")]
    WriteTests {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to launch test runner `{program}`: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },
    #[error("test runner timed out after {0}s")]
    Timeout(u64),
}

/// Raw runner output, kept so the parsers can be exercised on their own.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunnerOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl RunnerOutput {
    fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Writes a test suite into a workspace and runs it with the configured
/// external runner.
#[derive(Debug, Clone)]
pub struct TestHarness {
    config: HarnessConfig,
}

impl TestHarness {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn test_dir(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.config.test_dir)
    }

    pub fn report_path(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.config.report_file)
    }

    /// Replaces the harness directory with one file per suite test, named
    /// `test_<function>_<index>.py`.
    pub fn write_suite(
        &self,
        workspace: &Path,
        suite: &TestSuite,
    ) -> Result<Vec<PathBuf>, HarnessError> {
        let dir = self.test_dir(workspace);
        let write_err = |source| HarnessError::WriteTests {
            path: dir.clone(),
            source,
        };

        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(write_err)?;
        }
        fs::create_dir_all(&dir).map_err(write_err)?;
        fs::write(dir.join(PACKAGE_MARKER), "").map_err(write_err)?;

        let mut written = Vec::with_capacity(suite.tests.len());
        for (index, test) in suite.tests.iter().enumerate() {
            let path = dir.join(test_file_name(&test.function_name, index));
            fs::write(&path, &test.test_code).map_err(write_err)?;
            written.push(path);
        }
        Ok(written)
    }

    /// Writes the suite, runs it, and parses whatever the runner left
    /// behind. Only launch failures and the wall-clock timeout are errors.
    pub async fn execute(
        &self,
        workspace: &Path,
        suite: &TestSuite,
        role: RunRole,
    ) -> Result<TestRun, HarnessError> {
        if !workspace.is_dir() {
            return Err(HarnessError::MissingWorkspace(workspace.to_path_buf()));
        }
        let Some((program, base_args)) = self.config.command.split_first() else {
            return Err(HarnessError::EmptyCommand);
        };

        let written = self.write_suite(workspace, suite)?;
        let report_path = self.report_path(workspace);
        if report_path.exists()
            && let Err(err) = fs::remove_file(&report_path)
        {
            tracing::warn!(path = %report_path.display(), error = %err, "failed to remove stale report");
        }

        let mut command = Command::new(program);
        command
            .args(base_args)
            .arg(&self.config.test_dir)
            .arg("--json-report")
            .arg(format!("--json-report-file={}", report_path.display()))
            .arg("--tb=short")
            .arg("-q")
            .arg(format!("--timeout={}", self.config.per_test_timeout_secs))
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = command.spawn().map_err(|source| HarnessError::Launch {
            program: program.clone(),
            source,
        })?;
        let output = match tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(HarnessError::Launch {
                    program: program.clone(),
                    source,
                });
            }
            Err(_) => return Err(HarnessError::Timeout(self.config.timeout_secs)),
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let runner_output = RunnerOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        let results = collect_results(&report_path, &runner_output, elapsed_ms);
        let run = TestRun::new(role, results);

        tracing::info!(
            role = role.as_str(),
            written = written.len(),
            total = run.total,
            passed = run.passed,
            failed = run.failed,
            exit_code = runner_output.exit_code,
            snapshot = %run.snapshot_hash,
            "test suite executed"
        );
        Ok(run)
    }
}

pub fn test_file_name(function_name: &str, index: usize) -> String {
    format!("test_{}_{index}.py", function_name.replace('.', "_"))
}

/// Suite index encoded in a test id produced from [`test_file_name`], for
/// example `_bloc_tests/test_billing_fee_3.py::test_rounding` yields 3.
pub fn suite_index_for_test_id(test_id: &str) -> Option<usize> {
    let file = test_id.split("::").next().unwrap_or(test_id);
    let stem = file.rsplit(['/', '\\']).next()?.strip_suffix(".py")?;
    let (_, index) = stem.strip_prefix("test_")?.rsplit_once('_')?;
    index.parse().ok()
}

/// Report first, then the line scan, then one synthetic result. Always
/// returns at least one result.
pub fn collect_results(report_path: &Path, output: &RunnerOutput, elapsed_ms: f64) -> Vec<TestResult> {
    match fs::read_to_string(report_path) {
        Ok(raw) => match parse_json_report(&raw) {
            Some(results) if !results.is_empty() => return results,
            Some(_) => tracing::debug!("runner report listed no tests"),
            None => tracing::warn!(path = %report_path.display(), "runner report is malformed"),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %report_path.display(), error = %err, "failed to read runner report")
        }
    }

    let combined = output.combined();
    let results = parse_runner_lines(&combined, elapsed_ms);
    if !results.is_empty() {
        return results;
    }
    tracing::warn!("runner output had no per-test lines; synthesizing a suite result");
    vec![synthetic_result(&combined, elapsed_ms)]
}

/// Parses a pytest-json-report style document. `None` when the text is not
/// a JSON object with a `tests` array.
pub fn parse_json_report(raw: &str) -> Option<Vec<TestResult>> {
    let report: Value = serde_json::from_str(raw).ok()?;
    let tests = report.get("tests")?.as_array()?;

    Some(
        tests
            .iter()
            .map(|test| {
                let call = test.get("call");
                let text = |key: &str| {
                    call.and_then(|call| call.get(key))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned()
                };
                let longrepr = text("longrepr");
                let output = if longrepr.trim().is_empty() {
                    text("stdout")
                } else {
                    longrepr
                };
                TestResult {
                    test_id: test
                        .get("nodeid")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_owned(),
                    passed: test.get("outcome").and_then(Value::as_str) == Some("passed"),
                    output,
                    duration_ms: call
                        .and_then(|call| call.get("duration"))
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0)
                        * 1000.0,
                }
            })
            .collect(),
    )
}

/// Lines carrying a ` PASSED`, ` FAILED`, or ` ERROR` marker, one result
/// each. The test id is the first token of the line.
pub fn parse_runner_lines(output: &str, elapsed_ms: f64) -> Vec<TestResult> {
    let marked = output
        .lines()
        .filter(|line| {
            line.contains(" PASSED") || line.contains(" FAILED") || line.contains(" ERROR")
        })
        .collect::<Vec<_>>();
    let per_test_ms = elapsed_ms / marked.len().max(1) as f64;

    marked
        .into_iter()
        .map(|line| {
            let trimmed = line.trim();
            TestResult {
                test_id: trimmed
                    .split_whitespace()
                    .next()
                    .unwrap_or(trimmed)
                    .to_owned(),
                passed: line.contains(" PASSED"),
                output: trimmed.to_owned(),
                duration_ms: per_test_ms,
            }
        })
        .collect()
}

pub fn synthetic_result(output: &str, elapsed_ms: f64) -> TestResult {
    let lowered = output.to_lowercase();
    TestResult {
        test_id: SYNTHETIC_TEST_ID.to_owned(),
        passed: !lowered.contains("failed") && !lowered.contains("error"),
        output: truncate_chars(output, SYNTHETIC_OUTPUT_CHARS),
        duration_ms: elapsed_ms,
    }
}
