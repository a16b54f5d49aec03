use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::pipeline::{CurrentStage, PipelineState};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_RISK_BLOCKED: i32 = 2;

pub fn exit_code(state: &PipelineState) -> i32 {
    match state.current_stage {
        CurrentStage::RiskBlocked => EXIT_RISK_BLOCKED,
        CurrentStage::Failed(_) => EXIT_FAILED,
        _ if state.error.is_some() => EXIT_FAILED,
        _ => EXIT_OK,
    }
}

/// One-line-per-fact summary of a run for the terminal.
pub fn render_summary(state: &PipelineState) -> Vec<String> {
    let mut lines = vec![format!(
        "session={} stage={}",
        state.session_id,
        state.current_stage.label()
    )];

    if let Some(graph) = &state.workflow_graph {
        lines.push(format!(
            "workflow: nodes={} edges={} entrypoints={} side_effect_paths={}",
            graph.nodes.len(),
            graph.edges.len(),
            graph.entrypoints.len(),
            graph.side_effect_paths.len()
        ));
    }
    if !state.changed_functions.is_empty() {
        lines.push(format!("changed_functions={}", state.changed_functions.len()));
    }
    if let Some(report) = &state.dead_code_report {
        lines.push(format!(
            "dead_code: total={} zero_callers={} unreachable={} commented_blocks={}",
            report.total,
            report.zero_caller_count,
            report.unreachable_count,
            report.commented_block_count
        ));
    }
    if let Some(suite) = &state.test_suite {
        lines.push(format!(
            "suite: tests={} coverage={:.1}%",
            suite.total_tests(),
            suite.coverage_pct
        ));
    }
    if let Some(run) = &state.baseline_run {
        lines.push(format!(
            "baseline: total={} passed={} failed={}",
            run.total, run.passed, run.failed
        ));
    }
    if let Some(risk) = &state.risk_assessment {
        lines.push(format!(
            "risk: score={:.4} level={} warnings={}",
            risk.risk_score,
            risk.risk_level.as_str(),
            risk.warnings.len()
        ));
    }
    if let Some(run) = &state.migrated_run {
        lines.push(format!(
            "migrated: total={} passed={} failed={}",
            run.total, run.passed, run.failed
        ));
    }
    if let Some(report) = &state.confidence_report {
        lines.push(format!(
            "verdict={} preservation={:.1}% critical={} non_critical={} coverage={:.1}%",
            report.verdict.as_str(),
            report.behavior_preservation_pct,
            report.critical_drifts,
            report.non_critical_drifts,
            report.test_coverage_pct
        ));
        if !report.missing_tests.is_empty() {
            lines.push(format!("missing_tests={}", report.missing_tests.join(", ")));
        }
    }
    if let Some(error) = &state.error {
        lines.push(format!("error: {error}"));
    }
    lines
}

/// Machine-readable outcome printed to stdout after `run` and `resume`.
pub fn outcome_json(state: &PipelineState, state_path: &Path) -> Value {
    json!({
        "session_id": state.session_id,
        "current_stage": state.current_stage,
        "state_path": state_path.display().to_string(),
        "risk_assessment": state.risk_assessment,
        "confidence_report": state.confidence_report,
        "error": state.error,
    })
}

pub fn write_json_to_stdout<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut out = std::io::stdout();
    serde_json::to_writer_pretty(&mut out, value).context("failed to serialize JSON output")?;
    writeln!(&mut out).context("failed to write trailing newline")?;
    Ok(())
}
