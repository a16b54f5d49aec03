use std::collections::{HashMap, HashSet};

use bloc_core::{
    ConfidenceReport, DriftItem, DriftSeverity, RiskAssessment, TestRun, TestSuite,
    ValidationResult, Verdict, truncate_chars,
};

/// Before/after output kept on each drift item.
pub const DRIFT_SNIPPET_CHARS: usize = 300;

const FAILURE_ERROR_CHARS: usize = 200;

/// Joins two runs by test id and classifies every joined test at most once.
///
/// A test that passed before and fails after is a critical drift. A test
/// that passed on both sides with a non-empty baseline output that differs
/// after trimming is a non-critical drift. Tests present on one side only
/// are listed as missing and never counted in the preservation percentage.
pub fn classify_drift(baseline: &TestRun, migrated: &TestRun) -> ValidationResult {
    let mut after_by_id = HashMap::new();
    for result in &migrated.results {
        after_by_id.entry(result.test_id.as_str()).or_insert(result);
    }

    let mut drifts = Vec::new();
    let mut seen = HashSet::new();
    let mut joined = 0usize;
    let mut joined_passed = 0usize;
    let mut missing_from_migrated = Vec::new();

    for before in &baseline.results {
        if !seen.insert(before.test_id.as_str()) {
            continue;
        }
        let Some(after) = after_by_id.get(before.test_id.as_str()) else {
            missing_from_migrated.push(before.test_id.clone());
            continue;
        };
        joined += 1;
        if after.passed {
            joined_passed += 1;
        }

        if before.passed && !after.passed {
            drifts.push(DriftItem {
                test_id: before.test_id.clone(),
                severity: DriftSeverity::Critical,
                description: format!(
                    "Test passed on legacy code but FAILED after migration. \
                     Migration likely changed behavior. Error: {}",
                    truncate_chars(&after.output, FAILURE_ERROR_CHARS)
                ),
                before_output: truncate_chars(&before.output, DRIFT_SNIPPET_CHARS),
                after_output: truncate_chars(&after.output, DRIFT_SNIPPET_CHARS),
            });
        } else if before.passed
            && after.passed
            && !before.output.trim().is_empty()
            && before.output.trim() != after.output.trim()
        {
            drifts.push(DriftItem {
                test_id: before.test_id.clone(),
                severity: DriftSeverity::NonCritical,
                description: "Test passed both before and after, but output changed. \
                              May indicate cosmetic change or subtle logic shift."
                    .to_owned(),
                before_output: truncate_chars(&before.output, DRIFT_SNIPPET_CHARS),
                after_output: truncate_chars(&after.output, DRIFT_SNIPPET_CHARS),
            });
        }
    }

    let mut missing_from_baseline = Vec::new();
    let mut listed = HashSet::new();
    for result in &migrated.results {
        let id = result.test_id.as_str();
        if baseline.result(id).is_none() && listed.insert(id) {
            missing_from_baseline.push(result.test_id.clone());
        }
    }

    let behavior_preservation_pct = preservation_pct(
        joined_passed,
        joined,
        baseline.results.is_empty() && migrated.results.is_empty(),
    );
    let critical_drift_count = drifts
        .iter()
        .filter(|drift| drift.severity == DriftSeverity::Critical)
        .count();
    let non_critical_drift_count = drifts.len() - critical_drift_count;

    tracing::info!(
        joined,
        passed = joined_passed,
        critical = critical_drift_count,
        non_critical = non_critical_drift_count,
        missing_from_migrated = missing_from_migrated.len(),
        missing_from_baseline = missing_from_baseline.len(),
        preservation_pct = behavior_preservation_pct,
        "drift classified"
    );

    ValidationResult {
        migrated_results: migrated.results.clone(),
        drifts,
        critical_drift_count,
        non_critical_drift_count,
        behavior_preservation_pct,
        missing_from_migrated,
        missing_from_baseline,
    }
}

/// Rounded to one decimal. With nothing joined, two empty runs count as
/// fully preserved and anything else as nothing preserved.
fn preservation_pct(passed: usize, total: usize, both_empty: bool) -> f64 {
    if total == 0 {
        return if both_empty { 100.0 } else { 0.0 };
    }
    let pct = passed as f64 / total as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

pub fn build_confidence_report(
    validation: &ValidationResult,
    suite: Option<&TestSuite>,
    risk: Option<&RiskAssessment>,
) -> ConfidenceReport {
    let verdict = Verdict::from_preservation(
        validation.behavior_preservation_pct,
        validation.critical_drift_count,
    );
    let mut missing_tests = validation.missing_from_migrated.clone();
    missing_tests.extend(validation.missing_from_baseline.iter().cloned());

    ConfidenceReport {
        verdict,
        behavior_preservation_pct: validation.behavior_preservation_pct,
        critical_drifts: validation.critical_drift_count,
        non_critical_drifts: validation.non_critical_drift_count,
        test_coverage_pct: suite.map(|suite| suite.coverage_pct).unwrap_or(0.0),
        risk_score: risk.map(|assessment| assessment.risk_score),
        missing_tests,
    }
}
