use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bloc_config::{apply_risk_threshold_override, ensure_workspace_config, validate_config};
use blocd::cli::{Cli, Commands, parse_cli};
use blocd::commands::{
    CommandContext, run_dead_code_command, run_diff_command, run_memory_command,
    run_mine_command, run_pipeline_command, run_resume_command,
};
use blocd::logging::init_tracing;

fn main() -> Result<()> {
    let cli = parse_cli();
    init_tracing(cli.log_format)?;
    let code = run(cli)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<i32> {
    let command = match cli.command {
        Commands::Diff(args) => return run_diff_command(args),
        command => command,
    };

    let workspace = resolve(&cli.workspace)?;
    let mut config = ensure_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load or create workspace config at {}",
            workspace.join(".bloc/config.toml").display()
        )
    })?;
    if let Some(threshold) = cli.risk_threshold {
        config = apply_risk_threshold_override(config, Some(&threshold.to_string()));
    }
    for warning in validate_config(&config) {
        eprintln!("BLOC config warning [{}]: {}", warning.code, warning.message);
    }

    let ctx = CommandContext {
        workspace,
        target_module: cli.target_module,
        config,
    };
    match command {
        Commands::Mine => run_mine_command(&ctx),
        Commands::DeadCode => run_dead_code_command(&ctx),
        Commands::Run(args) => run_pipeline_command(&ctx, args),
        Commands::Resume(args) => run_resume_command(&ctx, args),
        Commands::Memory(command) => run_memory_command(&ctx, command),
        Commands::Diff(args) => run_diff_command(args),
    }
}

fn resolve(workspace: &Path) -> Result<PathBuf> {
    workspace
        .canonicalize()
        .with_context(|| format!("failed to resolve workspace path {}", workspace.display()))
}
