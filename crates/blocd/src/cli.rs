use std::ffi::OsStr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SearchCollection {
    Functions,
    #[default]
    Drifts,
    BizLogic,
    Docs,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct RunArgs {
    #[arg(long, help = "Characterization test suite JSON")]
    pub suite: PathBuf,

    #[arg(long, help = "Transformation patch JSON used for proactive warnings")]
    pub patch: Option<PathBuf>,

    #[arg(
        long,
        help = "Migrated workspace to validate; without it the run stops after the risk gate"
    )]
    pub migrated: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ResumeArgs {
    #[arg(long, help = "Saved run state JSON under .bloc/runs")]
    pub state: PathBuf,

    #[arg(long, help = "Migrated workspace to validate")]
    pub migrated: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct DiffArgs {
    #[arg(long, help = "Baseline run JSON (a TestRun or a list of results)")]
    pub baseline: PathBuf,

    #[arg(long, help = "Migrated run JSON (a TestRun or a list of results)")]
    pub migrated: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct HistoryArgs {
    #[arg(
        long,
        default_value_t = 10,
        help = "Number of recent runs to list (clamped to 1..100)"
    )]
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct SearchArgs {
    #[arg(help = "Query text")]
    pub query: String,

    #[arg(long, value_enum, default_value_t = SearchCollection::Drifts)]
    pub collection: SearchCollection,

    #[arg(
        long,
        default_value_t = 5,
        help = "Result limit (clamped to 1..100)"
    )]
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct HintArgs {
    #[arg(required = true, help = "Business-logic hints to remember")]
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ContextArgs {
    #[arg(help = "Topic to gather context for")]
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum MemoryCommand {
    /// List recent pipeline runs
    History(HistoryArgs),
    /// List known drift patterns
    Drifts,
    /// Similarity search over a memory collection
    Search(SearchArgs),
    /// Show memory counts for this repository
    Stats,
    /// Store business-logic hints
    Hint(HintArgs),
    /// Print the memory context block for a topic
    Context(ContextArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Mine the workflow call graph and print it as JSON
    Mine,
    /// Report dead code in the workspace
    DeadCode,
    /// Run the full pipeline
    Run(RunArgs),
    /// Continue a saved run past the risk gate
    Resume(ResumeArgs),
    /// Classify drift between two stored test runs
    Diff(DiffArgs),
    /// Inspect or extend repository memory
    #[command(subcommand)]
    Memory(MemoryCommand),
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "BehaviorLock migration safety pipeline")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Repository root to analyze"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        help = "Restrict mining to files whose module name contains this value"
    )]
    pub target_module: Option<String>,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[arg(
        long,
        global = true,
        help = "Block threshold for the risk gate, overriding config and BLOC_RISK_THRESHOLD"
    )]
    pub risk_threshold: Option<f64>,

    #[command(subcommand)]
    pub command: Commands,
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_apply_after_subcommand() {
        let cli = Cli::try_parse_from([
            "blocd",
            "run",
            "--suite",
            "suite.json",
            "--workspace",
            "/repos/legacy",
            "--risk-threshold",
            "0.6",
            "--log-format",
            "json",
        ])
        .expect("parse run");

        assert_eq!(cli.workspace, PathBuf::from("/repos/legacy"));
        assert_eq!(cli.risk_threshold, Some(0.6));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(
            cli.command,
            Commands::Run(RunArgs {
                suite: PathBuf::from("suite.json"),
                patch: None,
                migrated: None,
            })
        );
    }

    #[test]
    fn run_requires_suite() {
        assert!(Cli::try_parse_from(["blocd", "run"]).is_err());
    }

    #[test]
    fn resume_accepts_migrated_workspace() {
        let cli = Cli::try_parse_from([
            "blocd",
            "resume",
            "--state",
            ".bloc/runs/abc.json",
            "--migrated",
            "/repos/migrated",
        ])
        .expect("parse resume");
        assert_eq!(
            cli.command,
            Commands::Resume(ResumeArgs {
                state: PathBuf::from(".bloc/runs/abc.json"),
                migrated: Some(PathBuf::from("/repos/migrated")),
            })
        );
    }

    #[test]
    fn memory_search_defaults_to_drifts() {
        let cli = Cli::try_parse_from(["blocd", "memory", "search", "rounding"])
            .expect("parse memory search");
        assert_eq!(
            cli.command,
            Commands::Memory(MemoryCommand::Search(SearchArgs {
                query: "rounding".to_owned(),
                collection: SearchCollection::Drifts,
                limit: 5,
            }))
        );

        let cli = Cli::try_parse_from([
            "blocd",
            "memory",
            "search",
            "fees",
            "--collection",
            "biz-logic",
        ])
        .expect("parse collection");
        assert!(matches!(
            cli.command,
            Commands::Memory(MemoryCommand::Search(SearchArgs {
                collection: SearchCollection::BizLogic,
                ..
            }))
        ));
    }

    #[test]
    fn rejects_unknown_log_format() {
        let err = Cli::try_parse_from(["blocd", "--log-format", "xml", "mine"])
            .expect_err("xml is not a log format");
        assert!(err.to_string().contains("invalid log format 'xml'"));
    }

    #[test]
    fn target_module_is_optional() {
        let cli = Cli::try_parse_from(["blocd", "mine", "--target-module", "billing"])
            .expect("parse mine");
        assert_eq!(cli.command, Commands::Mine);
        assert_eq!(cli.target_module.as_deref(), Some("billing"));
        let cli = Cli::try_parse_from(["blocd", "dead-code"]).expect("parse dead-code");
        assert_eq!(cli.target_module, None);
    }
}
