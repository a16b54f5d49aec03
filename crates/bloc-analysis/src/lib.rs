use std::path::PathBuf;

use thiserror::Error;

mod dead_code;
mod drift;
mod miner;
mod risk;

pub use dead_code::{analyze_dead_code, detect_graph_dead_code, scan_commented_blocks};
pub use drift::{DRIFT_SNIPPET_CHARS, build_confidence_report, classify_drift};
pub use miner::{
    DEFAULT_EXCLUDED_DIRS, MiningOutcome, SkippedFile, SourceFile, WorkflowMiner,
    build_workflow_graph, discover_source_files, filter_by_target_module,
};
pub use risk::{
    GateDecision, RiskInputs, assess_risk, gate_decision, should_notify, synthetic_changes,
    worst_verdict,
};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("repository path does not exist: {0}")]
    MissingWorkspace(PathBuf),
    #[error("repository path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("no source files found under {0}")]
    NoSourceFiles(PathBuf),
    #[error("parser setup failed: {0}")]
    Parse(#[from] bloc_parse::ParseError),
    #[error("worker pool setup failed: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
