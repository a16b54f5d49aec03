use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::short_sha256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub passed: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunRole {
    Baseline,
    Migrated,
}

impl RunRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Migrated => "migrated",
        }
    }
}

/// One harness execution over one workspace. Baseline and migrated runs
/// share the shape and differ only by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub role: RunRole,
    pub results: Vec<TestResult>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub snapshot_hash: String,
}

pub type BaselineRun = TestRun;
pub type MigratedRun = TestRun;

impl TestRun {
    pub fn new(role: RunRole, results: Vec<TestResult>) -> Self {
        let passed = results.iter().filter(|result| result.passed).count();
        let snapshot_hash = snapshot_hash(&results);
        Self {
            role,
            total: results.len(),
            passed,
            failed: results.len() - passed,
            results,
            snapshot_hash,
        }
    }

    pub fn result(&self, test_id: &str) -> Option<&TestResult> {
        self.results.iter().find(|result| result.test_id == test_id)
    }
}

/// Hash over identity, outcome, and output of every result, sorted by test
/// identity. Durations are excluded so reruns of identical behavior agree.
fn snapshot_hash(results: &[TestResult]) -> String {
    let mut entries = results
        .iter()
        .map(|result| (result.test_id.as_str(), result.output.as_str(), result.passed))
        .collect::<Vec<_>>();
    entries.sort();

    let serialized = entries
        .into_iter()
        .map(|(name, output, passed)| json!({"name": name, "output": output, "passed": passed}))
        .collect::<Vec<_>>();
    let payload = serde_json::Value::Array(serialized).to_string();
    short_sha256(payload.as_bytes(), 16)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    Critical,
    #[serde(alias = "non-critical")]
    NonCritical,
}

impl DriftSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::NonCritical => "non_critical",
        }
    }
}

impl std::str::FromStr for DriftSeverity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "critical" => Ok(Self::Critical),
            "non_critical" | "non-critical" => Ok(Self::NonCritical),
            other => Err(format!(
                "invalid drift severity '{other}', expected one of: critical, non_critical"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftItem {
    pub test_id: String,
    pub severity: DriftSeverity,
    pub description: String,
    pub before_output: String,
    pub after_output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ValidationResult {
    pub migrated_results: Vec<TestResult>,
    pub drifts: Vec<DriftItem>,
    pub critical_drift_count: usize,
    pub non_critical_drift_count: usize,
    pub behavior_preservation_pct: f64,
    /// Baseline tests with no counterpart in the migrated run.
    #[serde(default)]
    pub missing_from_migrated: Vec<String>,
    /// Migrated tests with no counterpart in the baseline run.
    #[serde(default)]
    pub missing_from_baseline: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTest {
    pub function_name: String,
    pub test_code: String,
    #[serde(default)]
    pub covers_side_effects: bool,
    #[serde(default)]
    pub snapshot_inputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TestSuite {
    pub tests: Vec<GeneratedTest>,
    #[serde(default)]
    pub coverage_pct: f64,
    #[serde(default)]
    pub covered_functions: Vec<String>,
    #[serde(default)]
    pub uncovered_functions: Vec<String>,
}

impl TestSuite {
    pub fn total_tests(&self) -> usize {
        self.tests.len()
    }

    /// Fraction of covered functions in `[0, 1]`, derived from the declared
    /// coverage percentage.
    pub fn coverage_fraction(&self) -> f64 {
        (self.coverage_pct / 100.0).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(test_id: &str, passed: bool, output: &str, duration_ms: f64) -> TestResult {
        TestResult {
            test_id: test_id.to_owned(),
            passed,
            output: output.to_owned(),
            duration_ms,
        }
    }

    #[test]
    fn snapshot_hash_ignores_order_and_duration() {
        let left = TestRun::new(
            RunRole::Baseline,
            vec![result("t1", true, "42", 3.0), result("t2", false, "boom", 1.0)],
        );
        let right = TestRun::new(
            RunRole::Migrated,
            vec![result("t2", false, "boom", 9.0), result("t1", true, "42", 0.5)],
        );

        assert_eq!(left.snapshot_hash, right.snapshot_hash);
        assert_eq!(left.snapshot_hash.len(), 16);
        assert_eq!(left.passed, 1);
        assert_eq!(left.failed, 1);
        assert_eq!(left.total, 2);
    }

    #[test]
    fn snapshot_hash_changes_with_output() {
        let left = TestRun::new(RunRole::Baseline, vec![result("t1", true, "42", 0.0)]);
        let right = TestRun::new(RunRole::Baseline, vec![result("t1", true, "43", 0.0)]);
        assert_ne!(left.snapshot_hash, right.snapshot_hash);
    }

    #[test]
    fn drift_severity_uses_snake_case_wire_name() {
        let json = serde_json::to_string(&DriftSeverity::NonCritical).expect("serialize");
        assert_eq!(json, "\"non_critical\"");
        assert_eq!(DriftSeverity::NonCritical.as_str(), "non_critical");
        let parsed: DriftSeverity = serde_json::from_str("\"non-critical\"").expect("parse");
        assert_eq!(parsed, DriftSeverity::NonCritical);
        assert_eq!("non_critical".parse::<DriftSeverity>(), Ok(DriftSeverity::NonCritical));
    }

    #[test]
    fn suite_coverage_fraction_is_clamped() {
        let suite = TestSuite {
            coverage_pct: 140.0,
            ..TestSuite::default()
        };
        assert_eq!(suite.coverage_fraction(), 1.0);
    }
}
