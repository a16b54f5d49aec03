use bloc_core::{
    ChangeType, DriftSeverity, PatchChange, RiskAssessment, RiskFactors, RiskLevel, RiskWarning,
    TestSuite, Verdict, WorkflowGraph,
};
use serde::{Deserialize, Serialize};

const CRITICAL_WARNING_WEIGHT: f64 = 0.15;
const NON_CRITICAL_WARNING_WEIGHT: f64 = 0.05;
const DRIFT_FACTOR_CAP: f64 = 0.35;

const BLOCKED_RUN_WEIGHT: f64 = 0.10;
const RISKY_RUN_WEIGHT: f64 = 0.05;
const HISTORY_FACTOR_CAP: f64 = 0.25;

const SIDE_EFFECT_WEIGHT: f64 = 0.4;
const SIDE_EFFECT_FACTOR_CAP: f64 = 0.20;

const COVERAGE_WEIGHT: f64 = 0.2;
const COVERAGE_FACTOR_CAP: f64 = 0.20;

/// Everything the score is computed from. `history` holds past run
/// verdicts newest first; only the first `history_window` entries count.
#[derive(Debug, Clone, Default)]
pub struct RiskInputs<'a> {
    pub warnings: Vec<RiskWarning>,
    pub history: Vec<Option<Verdict>>,
    pub history_window: usize,
    pub known_drift_count: usize,
    pub graph: Option<&'a WorkflowGraph>,
    pub suite: Option<&'a TestSuite>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Proceed,
    Block,
}

pub fn assess_risk(inputs: RiskInputs<'_>) -> RiskAssessment {
    let critical = inputs
        .warnings
        .iter()
        .filter(|warning| warning.severity == DriftSeverity::Critical)
        .count();
    let non_critical = inputs.warnings.len() - critical;
    let drift = (critical as f64 * CRITICAL_WARNING_WEIGHT
        + non_critical as f64 * NON_CRITICAL_WARNING_WEIGHT)
        .min(DRIFT_FACTOR_CAP);

    let recent = &inputs.history[..inputs.history_window.min(inputs.history.len())];
    let blocked_runs = recent
        .iter()
        .filter(|verdict| **verdict == Some(Verdict::Blocked))
        .count();
    let risky_runs = recent
        .iter()
        .filter(|verdict| **verdict == Some(Verdict::Risky))
        .count();
    let history = (blocked_runs as f64 * BLOCKED_RUN_WEIGHT + risky_runs as f64 * RISKY_RUN_WEIGHT)
        .min(HISTORY_FACTOR_CAP);

    // Absent inputs count as the worst case.
    let side_effect_density = inputs
        .graph
        .and_then(WorkflowGraph::side_effect_density)
        .unwrap_or(1.0);
    let side_effect = (side_effect_density * SIDE_EFFECT_WEIGHT).min(SIDE_EFFECT_FACTOR_CAP);

    let test_coverage_gap = inputs
        .suite
        .map(|suite| 1.0 - suite.coverage_fraction())
        .unwrap_or(1.0);
    let coverage = (test_coverage_gap * COVERAGE_WEIGHT).min(COVERAGE_FACTOR_CAP);

    let total = (drift + history + side_effect + coverage).min(1.0);
    let risk_score = (total * 10_000.0).round() / 10_000.0;
    let risk_level = RiskLevel::from_score(risk_score);

    tracing::info!(
        risk_score,
        risk_level = risk_level.as_str(),
        warnings = inputs.warnings.len(),
        past_runs = recent.len(),
        "risk assessed"
    );

    RiskAssessment {
        risk_score,
        risk_level,
        known_drift_count: inputs.known_drift_count,
        past_run_count: recent.len(),
        worst_historical_verdict: worst_verdict(recent.iter().copied()),
        side_effect_density,
        test_coverage_gap,
        factors: RiskFactors {
            drift,
            history,
            side_effect,
            coverage,
        },
        warnings: inputs.warnings,
        computed_at: chrono::Utc::now().to_rfc3339(),
    }
}

pub fn worst_verdict<I>(verdicts: I) -> Option<Verdict>
where
    I: IntoIterator<Item = Option<Verdict>>,
{
    verdicts
        .into_iter()
        .flatten()
        .max_by_key(|verdict| verdict.priority())
}

/// One change per mined function, used to query memory for warnings when no
/// transformation patch is available yet.
pub fn synthetic_changes(graph: &WorkflowGraph) -> Vec<PatchChange> {
    graph
        .nodes
        .iter()
        .map(|node| {
            let effects = if node.side_effects.is_empty() {
                "no side effects".to_owned()
            } else {
                node.side_effects
                    .iter()
                    .map(|effect| effect.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            PatchChange {
                file: node.module.clone(),
                change_type: ChangeType::Semantic,
                description: format!("{} ({}): {effects}", node.name, node.kind.as_str()),
                line: node.line,
            }
        })
        .collect()
}

pub fn should_notify(risk_score: f64, notify_threshold: f64) -> bool {
    risk_score > notify_threshold
}

pub fn gate_decision(risk_score: f64, block_threshold: f64) -> GateDecision {
    if risk_score >= block_threshold {
        GateDecision::Block
    } else {
        GateDecision::Proceed
    }
}
