use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use bloc_analysis::{build_confidence_report, classify_drift};
use bloc_config::BlocConfig;
use bloc_core::{MigrationPatch, RunRole, TestResult, TestRun, TestSuite};
use bloc_memory::RepoMemory;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::cli::{DiffArgs, MemoryCommand, ResumeArgs, RunArgs, SearchCollection};
use crate::pipeline::{PipelineRunner, PipelineStage, PipelineState, load_state, save_state};
use crate::report::{
    EXIT_FAILED, EXIT_OK, exit_code, outcome_json, render_summary, write_json_to_stdout,
};

const MINE_STAGES: [PipelineStage; 2] = [PipelineStage::Ingest, PipelineStage::Mine];
const DEAD_CODE_STAGES: [PipelineStage; 3] = [
    PipelineStage::Ingest,
    PipelineStage::Mine,
    PipelineStage::DeadCode,
];
const MAX_LIST_LIMIT: u32 = 100;

/// Request shared by every command that works on one repository.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub workspace: PathBuf,
    pub target_module: Option<String>,
    pub config: BlocConfig,
}

pub fn run_mine_command(ctx: &CommandContext) -> Result<i32> {
    let runner = PipelineRunner::new(&ctx.workspace, ctx.config.clone())?;
    let state = runner.run_partial(new_state(ctx), &MINE_STAGES);
    runner.finish();

    if let Some(error) = &state.error {
        bail!("{error}");
    }
    write_json_to_stdout(&json!({
        "graph": state.workflow_graph,
        "changed_functions": state.changed_functions,
    }))?;
    Ok(EXIT_OK)
}

/// Dead-code detection leaves memory untouched so signature snapshots only
/// move during real pipeline runs.
pub fn run_dead_code_command(ctx: &CommandContext) -> Result<i32> {
    let runner = PipelineRunner::new(&ctx.workspace, ctx.config.clone())?.with_memory(None);
    let state = runner.run_partial(new_state(ctx), &DEAD_CODE_STAGES);
    runner.finish();

    if let Some(error) = &state.error {
        bail!("{error}");
    }
    write_json_to_stdout(&state.dead_code_report)?;
    Ok(EXIT_OK)
}

pub fn run_pipeline_command(ctx: &CommandContext, args: RunArgs) -> Result<i32> {
    let suite: TestSuite = read_json(&args.suite, "test suite")?;
    let patch = args
        .patch
        .as_deref()
        .map(|path| read_json::<MigrationPatch>(path, "patch"))
        .transpose()?;
    let migrated = args
        .migrated
        .as_deref()
        .map(resolve_workspace)
        .transpose()?;

    let mut state = new_state(ctx);
    state.test_suite = Some(suite);
    state.patch = patch;
    state.migrated_repo_path = migrated;

    let runner = PipelineRunner::new(&ctx.workspace, ctx.config.clone())?;
    let state = runner.run(state);
    runner.finish();
    finish_run(&state)
}

pub fn run_resume_command(ctx: &CommandContext, args: ResumeArgs) -> Result<i32> {
    let state = load_state(&args.state)?;
    let migrated = args
        .migrated
        .as_deref()
        .map(resolve_workspace)
        .transpose()?;

    let runner = PipelineRunner::new(&state.repo_path, ctx.config.clone())?;
    let state = runner.resume(state, migrated)?;
    runner.finish();
    finish_run(&state)
}

fn finish_run(state: &PipelineState) -> Result<i32> {
    let path = save_state(state)?;
    for line in render_summary(state) {
        eprintln!("BLOC: {line}");
    }
    write_json_to_stdout(&outcome_json(state, &path))?;
    Ok(exit_code(state))
}

pub fn run_diff_command(args: DiffArgs) -> Result<i32> {
    let baseline = read_run(&args.baseline, RunRole::Baseline)?;
    let migrated = read_run(&args.migrated, RunRole::Migrated)?;
    let validation = classify_drift(&baseline, &migrated);
    let report = build_confidence_report(&validation, None, None);

    write_json_to_stdout(&json!({
        "validation": validation,
        "confidence_report": report,
    }))?;
    Ok(if report.critical_drifts > 0 {
        EXIT_FAILED
    } else {
        EXIT_OK
    })
}

pub fn run_memory_command(ctx: &CommandContext, command: MemoryCommand) -> Result<i32> {
    let memory = RepoMemory::open(&ctx.workspace, &ctx.config)
        .context("failed to open repository memory")?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    match command {
        MemoryCommand::History(args) => {
            let runs = memory.past_runs(args.limit.clamp(1, MAX_LIST_LIMIT))?;
            write_json_to_stdout(&runs)?;
        }
        MemoryCommand::Drifts => {
            write_json_to_stdout(&memory.known_drifts()?)?;
        }
        MemoryCommand::Search(args) => {
            let limit = args.limit.clamp(1, MAX_LIST_LIMIT);
            let query = args.query.as_str();
            let hits = runtime.block_on(async {
                match args.collection {
                    SearchCollection::Functions => memory.search_functions(query, limit).await,
                    SearchCollection::Drifts => memory.search_drifts(query, limit).await,
                    SearchCollection::BizLogic => memory.search_biz_logic(query, limit).await,
                    SearchCollection::Docs => memory.search_docs(query, limit).await,
                }
            })?;
            write_json_to_stdout(&hits)?;
        }
        MemoryCommand::Stats => {
            let stats = runtime.block_on(memory.stats())?;
            write_json_to_stdout(&stats)?;
        }
        MemoryCommand::Hint(args) => {
            let indexed = runtime.block_on(memory.record_biz_logic(&args.hints))?;
            write_json_to_stdout(&json!({ "indexed": indexed }))?;
        }
        MemoryCommand::Context(args) => {
            let context = runtime.block_on(memory.memory_context(&args.topic))?;
            println!("{context}");
        }
    }
    Ok(EXIT_OK)
}

fn new_state(ctx: &CommandContext) -> PipelineState {
    let mut state = PipelineState::new(&ctx.workspace);
    state.target_module = ctx.target_module.clone();
    state
}

fn resolve_workspace(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("failed to resolve workspace path {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {what} {}", path.display()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRun {
    Run(TestRun),
    Results(Vec<TestResult>),
}

/// Accepts a full run as written by the pipeline or a bare result list.
pub fn read_run(path: &Path, role: RunRole) -> Result<TestRun> {
    Ok(match read_json::<StoredRun>(path, "test run")? {
        StoredRun::Run(run) => run,
        StoredRun::Results(results) => TestRun::new(role, results),
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn read_run_accepts_result_lists() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("run.json");
        fs::write(
            &path,
            r#"[{"test_id": "t1", "passed": true, "output": "42", "duration_ms": 1.0}]"#,
        )
        .expect("write run");

        let run = read_run(&path, RunRole::Migrated).expect("read run");
        assert_eq!(run.role, RunRole::Migrated);
        assert_eq!(run.total, 1);
        assert_eq!(run.passed, 1);
    }

    #[test]
    fn read_run_keeps_full_runs() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("run.json");
        let stored = TestRun::new(
            RunRole::Baseline,
            vec![TestResult {
                test_id: "t1".to_owned(),
                passed: false,
                output: "boom".to_owned(),
                duration_ms: 2.0,
            }],
        );
        fs::write(&path, serde_json::to_string(&stored).expect("serialize")).expect("write");

        let run = read_run(&path, RunRole::Migrated).expect("read run");
        assert_eq!(run, stored);
    }

    #[test]
    fn read_json_reports_the_path() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("missing.json");
        let err = read_json::<TestSuite>(&path, "test suite").expect_err("missing file");
        assert!(format!("{err:#}").contains("failed to read test suite"));
    }
}
