use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use bloc_analysis::{
    GateDecision, RiskInputs, WorkflowMiner, analyze_dead_code, assess_risk,
    build_confidence_report, classify_drift, gate_decision, should_notify, synthetic_changes,
};
use bloc_config::{BlocConfig, runs_dir};
use bloc_core::{
    BaselineRun, ConfidenceReport, DeadCodeReport, MigratedRun, MigrationPatch, RiskAssessment,
    RunRole, TestSuite, ValidationResult, Verdict, WorkflowGraph, content_hash, repo_id,
};
use bloc_memory::{ChangedFunction, DriftRecordRequest, RepoMemory, RunRecordRequest};
use bloc_store::current_unix_timestamp_millis;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, Runtime};

use crate::harness::{TestHarness, suite_index_for_test_id};
use crate::notify::{Notifier, RiskNotification};

const NOTIFY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Ingest,
    Mine,
    DeadCode,
    Baseline,
    RiskGate,
    Validate,
    Report,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 7] = [
        Self::Ingest,
        Self::Mine,
        Self::DeadCode,
        Self::Baseline,
        Self::RiskGate,
        Self::Validate,
        Self::Report,
    ];

    /// Stages re-run when a run is resumed past the risk gate.
    pub const AFTER_GATE: [PipelineStage; 2] = [Self::Validate, Self::Report];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Mine => "mine",
            Self::DeadCode => "dead_code",
            Self::Baseline => "baseline",
            Self::RiskGate => "risk_gate",
            Self::Validate => "validate",
            Self::Report => "report",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CurrentStage {
    #[default]
    Starting,
    IngestComplete,
    WorkflowMined,
    DeadCodeDetected,
    BaselineComplete,
    RiskAnalyzed,
    RiskBlocked,
    ValidationComplete,
    Complete,
    Failed(PipelineStage),
}

impl CurrentStage {
    pub fn label(&self) -> String {
        match self {
            Self::Starting => "starting".to_owned(),
            Self::IngestComplete => "ingest_complete".to_owned(),
            Self::WorkflowMined => "workflow_mined".to_owned(),
            Self::DeadCodeDetected => "dead_code_detected".to_owned(),
            Self::BaselineComplete => "baseline_complete".to_owned(),
            Self::RiskAnalyzed => "risk_analyzed".to_owned(),
            Self::RiskBlocked => "risk_blocked".to_owned(),
            Self::ValidationComplete => "validation_complete".to_owned(),
            Self::Complete => "complete".to_owned(),
            Self::Failed(stage) => format!("{}_failed", stage.as_str()),
        }
    }
}

/// Everything one pipeline run has produced so far. Each stage fills its own
/// field and leaves earlier outputs untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub session_id: String,
    pub repo_path: PathBuf,
    #[serde(default)]
    pub target_module: Option<String>,
    #[serde(default)]
    pub migrated_repo_path: Option<PathBuf>,
    #[serde(default)]
    pub workflow_graph: Option<WorkflowGraph>,
    #[serde(default)]
    pub changed_functions: Vec<ChangedFunction>,
    #[serde(default)]
    pub dead_code_report: Option<DeadCodeReport>,
    #[serde(default)]
    pub test_suite: Option<TestSuite>,
    #[serde(default)]
    pub patch: Option<MigrationPatch>,
    #[serde(default)]
    pub baseline_run: Option<BaselineRun>,
    #[serde(default)]
    pub risk_assessment: Option<RiskAssessment>,
    #[serde(default)]
    pub migrated_run: Option<MigratedRun>,
    #[serde(default)]
    pub validation_result: Option<ValidationResult>,
    #[serde(default)]
    pub confidence_report: Option<ConfidenceReport>,
    #[serde(default)]
    pub current_stage: CurrentStage,
    #[serde(default)]
    pub error: Option<String>,
}

impl PipelineState {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        let repo_path = repo_path.into();
        Self {
            session_id: new_session_id(&repo_path, current_unix_timestamp_millis()),
            repo_path,
            target_module: None,
            migrated_repo_path: None,
            workflow_graph: None,
            changed_functions: Vec::new(),
            dead_code_report: None,
            test_suite: None,
            patch: None,
            baseline_run: None,
            risk_assessment: None,
            migrated_run: None,
            validation_result: None,
            confidence_report: None,
            current_stage: CurrentStage::Starting,
            error: None,
        }
    }

    pub fn failed(mut self, stage: PipelineStage, err: &anyhow::Error) -> Self {
        self.error = Some(format!("{err:#}"));
        self.current_stage = CurrentStage::Failed(stage);
        self
    }
}

pub fn new_session_id(repo_path: &Path, now_ms: i64) -> String {
    let hash = content_hash(&format!("{}:{now_ms}", repo_id(repo_path)));
    hash[..12].to_owned()
}

pub fn save_state(state: &PipelineState) -> Result<PathBuf> {
    let dir = runs_dir(&state.repo_path);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create runs directory {}", dir.display()))?;
    let path = dir.join(format!("{}.json", state.session_id));
    let content = serde_json::to_string_pretty(state).context("failed to serialize state")?;
    fs::write(&path, content)
        .with_context(|| format!("failed to write run state {}", path.display()))?;
    Ok(path)
}

pub fn load_state(path: &Path) -> Result<PipelineState> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read run state {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse run state {}", path.display()))
}

/// Collaborators shared by every stage. Built once per run by
/// [`PipelineRunner`].
pub struct StageContext {
    pub config: BlocConfig,
    pub harness: TestHarness,
    memory: Option<RepoMemory>,
    notifier: Option<Notifier>,
    runtime: Handle,
}

impl StageContext {
    pub fn memory(&self) -> Option<&RepoMemory> {
        self.memory.as_ref()
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn miner(&self, repo_path: &Path) -> WorkflowMiner {
        WorkflowMiner::new(repo_path, self.config.miner.clone())
            .with_excluded_dir(self.config.harness.test_dir.clone())
    }
}

pub type StageFn = fn(&StageContext, PipelineState) -> Result<PipelineState>;

pub fn stage_fn(stage: PipelineStage) -> StageFn {
    match stage {
        PipelineStage::Ingest => ingest,
        PipelineStage::Mine => mine,
        PipelineStage::DeadCode => dead_code,
        PipelineStage::Baseline => baseline,
        PipelineStage::RiskGate => risk_gate,
        PipelineStage::Validate => validate,
        PipelineStage::Report => report,
    }
}

pub fn ingest(ctx: &StageContext, mut state: PipelineState) -> Result<PipelineState> {
    let files = ctx
        .miner(&state.repo_path)
        .source_files(None)
        .context("ingest failed")?;
    tracing::info!(
        repo = %state.repo_path.display(),
        session_id = %state.session_id,
        files = files.len(),
        "repository ingested"
    );
    state.current_stage = CurrentStage::IngestComplete;
    Ok(state)
}

pub fn mine(ctx: &StageContext, mut state: PipelineState) -> Result<PipelineState> {
    let outcome = ctx
        .miner(&state.repo_path)
        .mine(state.target_module.as_deref())
        .context("workflow mining failed")?;

    if let Some(memory) = ctx.memory() {
        match ctx.block_on(memory.record_functions(&outcome.graph.nodes, None)) {
            Ok(changed) => {
                if !changed.is_empty() {
                    tracing::info!(changed = changed.len(), "function signatures changed since last run");
                }
                state.changed_functions = changed;
            }
            Err(err) => tracing::warn!(error = %err, "failed to record function signatures"),
        }
    }

    state.workflow_graph = Some(outcome.graph);
    state.current_stage = CurrentStage::WorkflowMined;
    Ok(state)
}

pub fn dead_code(ctx: &StageContext, mut state: PipelineState) -> Result<PipelineState> {
    let graph = state
        .workflow_graph
        .as_ref()
        .context("dead code detection requires a workflow graph")?;
    let files = ctx
        .miner(&state.repo_path)
        .source_files(state.target_module.as_deref())
        .context("failed to list source files")?;
    let report = analyze_dead_code(graph, &files, ctx.config.dead_code.min_commented_run);

    state.dead_code_report = Some(report);
    state.current_stage = CurrentStage::DeadCodeDetected;
    Ok(state)
}

pub fn baseline(ctx: &StageContext, mut state: PipelineState) -> Result<PipelineState> {
    let suite = state
        .test_suite
        .as_ref()
        .context("No test suite supplied; generate tests first")?;
    let run = ctx
        .block_on(ctx.harness.execute(&state.repo_path, suite, RunRole::Baseline))
        .context("baseline run failed")?;

    state.baseline_run = Some(run);
    state.current_stage = CurrentStage::BaselineComplete;
    Ok(state)
}

pub fn risk_gate(ctx: &StageContext, mut state: PipelineState) -> Result<PipelineState> {
    if state.baseline_run.is_none() {
        bail!("No baseline run; run baseline first");
    }

    let changes = match &state.patch {
        Some(patch) if !patch.changes.is_empty() => patch.changes.clone(),
        _ => state
            .workflow_graph
            .as_ref()
            .map(synthetic_changes)
            .unwrap_or_default(),
    };

    let window = ctx.config.risk.history_window;
    let mut warnings = Vec::new();
    let mut history = Vec::new();
    let mut known_drift_count = 0;
    if let Some(memory) = ctx.memory() {
        match ctx.block_on(memory.proactive_warnings(&changes)) {
            Ok(found) => warnings = found,
            Err(err) => tracing::warn!(error = %err, "proactive warnings unavailable"),
        }
        match memory.past_runs(u32::try_from(window).unwrap_or(u32::MAX)) {
            Ok(runs) => {
                history = runs
                    .into_iter()
                    .map(|run| run.verdict.and_then(|verdict| verdict.parse::<Verdict>().ok()))
                    .collect();
            }
            Err(err) => tracing::warn!(error = %err, "run history unavailable"),
        }
        match memory.known_drifts() {
            Ok(drifts) => known_drift_count = drifts.len(),
            Err(err) => tracing::warn!(error = %err, "drift history unavailable"),
        }
    }

    let assessment = assess_risk(RiskInputs {
        warnings,
        history,
        history_window: window,
        known_drift_count,
        graph: state.workflow_graph.as_ref(),
        suite: state.test_suite.as_ref(),
    });
    let decision = gate_decision(assessment.risk_score, ctx.config.risk.block_threshold);

    if should_notify(assessment.risk_score, ctx.config.risk.notify_threshold) {
        match &ctx.notifier {
            Some(notifier) => notifier.notify_risk(RiskNotification {
                session_id: state.session_id.clone(),
                repo_path: state.repo_path.display().to_string(),
                blocked: decision == GateDecision::Block,
                assessment: assessment.clone(),
            }),
            None => tracing::debug!("no webhook configured; skipping risk notification"),
        }
    }

    if decision == GateDecision::Block {
        tracing::warn!(
            risk_score = assessment.risk_score,
            threshold = ctx.config.risk.block_threshold,
            "migration blocked by risk gate"
        );
        if let Some(memory) = ctx.memory()
            && let Err(err) = memory.record_run(RunRecordRequest {
                session_id: state.session_id.clone(),
                verdict: Some(Verdict::Blocked),
                preservation_pct: None,
                critical_drifts: None,
                risk_score: Some(assessment.risk_score),
                patch_changes: changes,
                now_ms: None,
            })
        {
            tracing::warn!(error = %err, "failed to record blocked run");
        }
        state.current_stage = CurrentStage::RiskBlocked;
    } else {
        state.current_stage = CurrentStage::RiskAnalyzed;
    }
    state.risk_assessment = Some(assessment);
    Ok(state)
}

pub fn validate(ctx: &StageContext, mut state: PipelineState) -> Result<PipelineState> {
    let migrated = state
        .migrated_repo_path
        .clone()
        .context("No migrated workspace supplied; pass --migrated")?;
    let suite = state
        .test_suite
        .as_ref()
        .context("No test suite supplied; generate tests first")?;
    let baseline = state
        .baseline_run
        .as_ref()
        .context("No baseline run; run baseline first")?;

    let run = ctx
        .block_on(ctx.harness.execute(&migrated, suite, RunRole::Migrated))
        .context("migrated run failed")?;
    let validation = classify_drift(baseline, &run);

    state.migrated_run = Some(run);
    state.validation_result = Some(validation);
    state.current_stage = CurrentStage::ValidationComplete;
    Ok(state)
}

pub fn report(ctx: &StageContext, mut state: PipelineState) -> Result<PipelineState> {
    let validation = state
        .validation_result
        .as_ref()
        .context("No validation result; run validation first")?;
    let report = build_confidence_report(
        validation,
        state.test_suite.as_ref(),
        state.risk_assessment.as_ref(),
    );

    if let Some(memory) = ctx.memory() {
        persist_outcome(ctx, memory, &state, validation, &report);
    }

    tracing::info!(
        verdict = report.verdict.as_str(),
        preservation_pct = report.behavior_preservation_pct,
        critical = report.critical_drifts,
        non_critical = report.non_critical_drifts,
        "confidence report ready"
    );
    state.confidence_report = Some(report);
    state.current_stage = CurrentStage::Complete;
    Ok(state)
}

fn persist_outcome(
    ctx: &StageContext,
    memory: &RepoMemory,
    state: &PipelineState,
    validation: &ValidationResult,
    report: &ConfidenceReport,
) {
    let patch_changes = state
        .patch
        .as_ref()
        .map(|patch| patch.changes.clone())
        .unwrap_or_default();
    if let Err(err) = memory.record_run(RunRecordRequest {
        session_id: state.session_id.clone(),
        verdict: Some(report.verdict),
        preservation_pct: Some(report.behavior_preservation_pct),
        critical_drifts: Some(report.critical_drifts),
        risk_score: report.risk_score,
        patch_changes,
        now_ms: None,
    }) {
        tracing::warn!(error = %err, "failed to record run verdict");
    }

    for drift in &validation.drifts {
        let request = DriftRecordRequest {
            function_name: drift_function_name(&drift.test_id, state.test_suite.as_ref()),
            severity: drift.severity,
            description: drift.description.clone(),
            before_output: drift.before_output.clone(),
            after_output: drift.after_output.clone(),
            now_ms: None,
        };
        if let Err(err) = ctx.block_on(memory.record_drift(request)) {
            tracing::warn!(error = %err, test_id = %drift.test_id, "failed to record drift");
        }
    }
}

/// Suite function a test id was generated for, or the test id itself when
/// it does not follow the harness naming scheme.
pub fn drift_function_name(test_id: &str, suite: Option<&TestSuite>) -> String {
    suite_index_for_test_id(test_id)
        .and_then(|index| suite.and_then(|suite| suite.tests.get(index)))
        .map(|test| test.function_name.clone())
        .unwrap_or_else(|| test_id.to_owned())
}

/// Owns the async runtime and the stage collaborators for one invocation.
pub struct PipelineRunner {
    context: StageContext,
    runtime: Runtime,
}

impl PipelineRunner {
    /// Opens repository memory when enabled. Memory that cannot be opened is
    /// logged and the pipeline runs without it.
    pub fn new(repo_path: &Path, config: BlocConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;

        let memory = if config.memory.enabled {
            match RepoMemory::open(repo_path, &config) {
                Ok(memory) => {
                    tracing::debug!(
                        repo_id = memory.repo_id(),
                        embedder = memory.embedder_name(),
                        "repository memory opened"
                    );
                    Some(memory)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "repository memory unavailable; continuing without it");
                    None
                }
            }
        } else {
            None
        };
        let notifier = Notifier::from_config(&config.notify, runtime.handle().clone());

        Ok(Self {
            context: StageContext {
                harness: TestHarness::new(config.harness.clone()),
                config,
                memory,
                notifier,
                runtime: runtime.handle().clone(),
            },
            runtime,
        })
    }

    pub fn with_memory(mut self, memory: Option<RepoMemory>) -> Self {
        self.context.memory = memory;
        self
    }

    pub fn with_notifier(mut self, notifier: Option<Notifier>) -> Self {
        self.context.notifier = notifier;
        self
    }

    pub fn context(&self) -> &StageContext {
        &self.context
    }

    /// Runs every stage in order. Without a migrated workspace the run stops
    /// after the risk gate so it can be resumed once the transformation
    /// exists.
    pub fn run(&self, state: PipelineState) -> PipelineState {
        self.run_stages(state, &PipelineStage::ALL, true)
    }

    /// Re-runs validation and reporting on a saved state that got past, or
    /// was stopped by, the risk gate.
    pub fn resume(
        &self,
        mut state: PipelineState,
        migrated_repo_path: Option<PathBuf>,
    ) -> Result<PipelineState> {
        match &state.current_stage {
            CurrentStage::RiskAnalyzed
            | CurrentStage::RiskBlocked
            | CurrentStage::Failed(PipelineStage::Validate)
            | CurrentStage::Failed(PipelineStage::Report) => {}
            other => bail!("a run at stage '{}' cannot be resumed", other.label()),
        }
        if state.current_stage == CurrentStage::RiskBlocked {
            tracing::warn!(session_id = %state.session_id, "resuming past a risk block");
        }
        if let Some(path) = migrated_repo_path {
            state.migrated_repo_path = Some(path);
        }
        state.error = None;
        state.current_stage = CurrentStage::RiskAnalyzed;
        Ok(self.run_stages(state, &PipelineStage::AFTER_GATE, false))
    }

    /// Runs only `stages`, in order, with the usual stop conditions.
    pub fn run_partial(&self, state: PipelineState, stages: &[PipelineStage]) -> PipelineState {
        self.run_stages(state, stages, false)
    }

    fn run_stages(
        &self,
        mut state: PipelineState,
        stages: &[PipelineStage],
        pause_without_migration: bool,
    ) -> PipelineState {
        for stage in stages {
            if state.error.is_some() || state.current_stage == CurrentStage::RiskBlocked {
                break;
            }
            if pause_without_migration
                && *stage == PipelineStage::Validate
                && state.migrated_repo_path.is_none()
            {
                tracing::info!(
                    session_id = %state.session_id,
                    "no migrated workspace supplied; stopping after the risk gate"
                );
                break;
            }

            let snapshot = state.clone();
            let started = Instant::now();
            state = match stage_fn(*stage)(&self.context, state) {
                Ok(next) => {
                    tracing::info!(
                        stage = stage.as_str(),
                        current_stage = %next.current_stage.label(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "stage finished"
                    );
                    next
                }
                Err(err) => {
                    tracing::error!(stage = stage.as_str(), error = %format!("{err:#}"), "stage failed");
                    snapshot.failed(*stage, &err)
                }
            };
        }
        state
    }

    /// Waits briefly for background notifications, then stops the runtime.
    pub fn finish(self) {
        if let Some(notifier) = &self.context.notifier {
            notifier.drain(NOTIFY_DRAIN_TIMEOUT);
        }
        self.runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    }
}
