use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use bloc_config::MinerConfig;
use bloc_core::{
    CallEdge, CallNode, CallType, NodeId, NodeKind, WorkflowGraph, module_name_for_path,
};
use bloc_graph_algo::DiGraph;
use bloc_parse::{
    ExtractedModule, ExtractorKind, LinePatternExtractor, PythonExtractor, SourceExtractor,
    extract_with_fallback,
};
use rayon::prelude::*;
use serde::Serialize;
use walkdir::WalkDir;

use crate::AnalysisError;

/// Directory names never descended into while discovering sources.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".bloc",
    "target",
    "__pycache__",
    "venv",
    ".venv",
    "node_modules",
];

const RECEIVER_PREFIXES: &[&str] = &["self.", "cls."];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub module: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MiningOutcome {
    pub graph: WorkflowGraph,
    pub files_scanned: usize,
    pub skipped: Vec<SkippedFile>,
    /// Files read by the line-pattern scanner after the structural parse
    /// rejected them.
    pub fallback_files: Vec<PathBuf>,
}

/// Sorted by path so module order, and everything derived from it, is
/// stable across runs.
pub fn discover_source_files(
    root: &Path,
    extensions: &[String],
    excluded_dirs: &[String],
) -> Vec<SourceFile> {
    let mut files = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !excluded_dirs
                    .iter()
                    .any(|excluded| entry.file_name().to_string_lossy() == excluded.as_str())
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext.to_string_lossy())
                .is_some_and(|ext| extensions.iter().any(|wanted| wanted.as_str() == ext))
        })
        .map(|entry| SourceFile {
            module: module_name_for_path(root, entry.path()),
            path: entry.into_path(),
        })
        .collect::<Vec<_>>();
    files.sort_by(|left, right| left.path.cmp(&right.path));
    files
}

/// Keeps files whose module name contains `target`. A blank target keeps
/// everything.
pub fn filter_by_target_module(files: Vec<SourceFile>, target: Option<&str>) -> Vec<SourceFile> {
    match target.map(str::trim).filter(|target| !target.is_empty()) {
        Some(target) => files
            .into_iter()
            .filter(|file| file.module.contains(target))
            .collect(),
        None => files,
    }
}

pub struct WorkflowMiner {
    root: PathBuf,
    config: MinerConfig,
    excluded_dirs: Vec<String>,
}

impl WorkflowMiner {
    pub fn new(root: impl Into<PathBuf>, config: MinerConfig) -> Self {
        Self {
            root: root.into(),
            config,
            excluded_dirs: DEFAULT_EXCLUDED_DIRS
                .iter()
                .map(|dir| (*dir).to_owned())
                .collect(),
        }
    }

    pub fn with_excluded_dir(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() && !self.excluded_dirs.contains(&name) {
            self.excluded_dirs.push(name);
        }
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Discovered sources after the target filter. An empty result is only
    /// an error when the unfiltered tree held no sources either.
    pub fn source_files(
        &self,
        target_module: Option<&str>,
    ) -> Result<Vec<SourceFile>, AnalysisError> {
        self.validate_root()?;
        let files = discover_source_files(&self.root, &self.config.extensions, &self.excluded_dirs);
        if files.is_empty() {
            return Err(AnalysisError::NoSourceFiles(self.root.clone()));
        }
        Ok(filter_by_target_module(files, target_module))
    }

    /// One full mining pass. Fails only on input errors: a missing root, or
    /// a root with no source files at all. Unreadable or unparseable files
    /// are skipped.
    pub fn mine(&self, target_module: Option<&str>) -> Result<MiningOutcome, AnalysisError> {
        let files = self.source_files(target_module)?;
        if files.is_empty() {
            tracing::warn!(
                target_module = target_module.unwrap_or_default(),
                root = %self.root.display(),
                "target module filter matched no source files"
            );
            return Ok(MiningOutcome {
                graph: WorkflowGraph::default(),
                files_scanned: 0,
                skipped: Vec::new(),
                fallback_files: Vec::new(),
            });
        }

        // Surface grammar and pattern setup problems once, before the pool
        // starts building per-worker extractors.
        PythonExtractor::new()?;
        let fallback = LinePatternExtractor::new(self.config.fallback_window_lines)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism)
            .build()?;

        let extracted = pool.install(|| {
            files
                .par_iter()
                .map_init(
                    || (PythonExtractor::new().ok(), fallback.clone()),
                    |(primary, fallback), file| {
                        extract_file(
                            file,
                            primary.as_mut().map(|p| p as &mut dyn SourceExtractor),
                            fallback,
                        )
                    },
                )
                .collect::<Vec<_>>()
        });

        let mut modules = Vec::with_capacity(extracted.len());
        let mut skipped = Vec::new();
        let mut fallback_files = Vec::new();
        for (file, result) in files.iter().zip(extracted) {
            match result {
                Ok((module, kind)) => {
                    if kind == ExtractorKind::LinePattern {
                        tracing::debug!(file = %file.path.display(), "used line-pattern fallback");
                        fallback_files.push(file.path.clone());
                    }
                    modules.push(module);
                }
                Err(reason) => {
                    tracing::warn!(file = %file.path.display(), error = %reason, "skipping source file");
                    skipped.push(SkippedFile {
                        path: file.path.clone(),
                        reason,
                    });
                }
            }
        }

        let graph = build_workflow_graph(
            modules,
            self.config.max_path_hops,
            self.config.max_side_effect_paths,
        );
        tracing::info!(
            files = files.len(),
            skipped = skipped.len(),
            fallback = fallback_files.len(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            entrypoints = graph.entrypoints.len(),
            side_effect_paths = graph.side_effect_paths.len(),
            "workflow graph mined"
        );

        Ok(MiningOutcome {
            graph,
            files_scanned: files.len(),
            skipped,
            fallback_files,
        })
    }

    fn validate_root(&self) -> Result<(), AnalysisError> {
        if !self.root.exists() {
            return Err(AnalysisError::MissingWorkspace(self.root.clone()));
        }
        if !self.root.is_dir() {
            return Err(AnalysisError::NotADirectory(self.root.clone()));
        }
        Ok(())
    }
}

fn extract_file(
    file: &SourceFile,
    primary: Option<&mut dyn SourceExtractor>,
    fallback: &mut LinePatternExtractor,
) -> Result<(ExtractedModule, ExtractorKind), String> {
    let bytes = fs::read(&file.path).map_err(|err| err.to_string())?;
    let source = String::from_utf8_lossy(&bytes);
    extract_with_fallback(primary, fallback, &file.module, &source).map_err(|err| err.to_string())
}

/// Merges per-file extraction results into one graph. Calls resolve by
/// exact node id, then relative to the calling module, then by bare
/// function name; anything else is an external call and yields no edge.
pub fn build_workflow_graph(
    modules: Vec<ExtractedModule>,
    max_path_hops: usize,
    max_side_effect_paths: usize,
) -> WorkflowGraph {
    let mut merged: BTreeMap<NodeId, (CallNode, Vec<bloc_parse::CallSite>)> = BTreeMap::new();
    for module in modules {
        for function in module.functions {
            let node = CallNode::new(
                &module.module,
                &function.name,
                function.line,
                function.side_effects,
                function.signature,
            );
            match merged.get_mut(&node.id) {
                Some((existing, calls)) => {
                    existing.side_effects.extend(node.side_effects);
                    existing.kind = NodeKind::classify(&existing.name, &existing.side_effects);
                    calls.extend(function.calls);
                }
                None => {
                    merged.insert(node.id.clone(), (node, function.calls));
                }
            }
        }
    }

    let mut by_short_name: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, (node, _)) in &merged {
        by_short_name
            .entry(node.name.as_str())
            .or_default()
            .push(id.as_str());
    }

    // One edge per (source, target); a direct site wins over loop or
    // conditional sites collapsed into the same edge.
    let mut edges: Vec<CallEdge> = Vec::new();
    let mut edge_index: HashMap<(&str, &str), usize> = HashMap::new();
    for (id, (node, calls)) in &merged {
        for call in calls {
            let Some(target) = resolve_callee(&call.callee, &node.module, &merged, &by_short_name)
            else {
                continue;
            };
            if target == id.as_str() {
                continue;
            }
            match edge_index.get(&(id.as_str(), target)) {
                Some(&index) => {
                    if call.call_type == CallType::Direct {
                        edges[index].call_type = CallType::Direct;
                    }
                }
                None => {
                    edge_index.insert((id.as_str(), target), edges.len());
                    edges.push(CallEdge {
                        source: id.clone(),
                        target: target.to_owned(),
                        call_type: call.call_type,
                    });
                }
            }
        }
    }

    let nodes = merged
        .into_values()
        .map(|(node, _)| node)
        .collect::<Vec<_>>();
    let entrypoints = nodes
        .iter()
        .filter(|node| node.is_entrypoint())
        .map(|node| node.id.clone())
        .collect::<Vec<_>>();
    let side_effect_paths = side_effect_paths(
        &nodes,
        &edges,
        &entrypoints,
        max_path_hops,
        max_side_effect_paths,
    );

    WorkflowGraph {
        nodes,
        edges,
        entrypoints,
        side_effect_paths,
    }
}

fn resolve_callee<'a>(
    callee: &str,
    caller_module: &str,
    merged: &'a BTreeMap<NodeId, (CallNode, Vec<bloc_parse::CallSite>)>,
    by_short_name: &BTreeMap<&str, Vec<&'a str>>,
) -> Option<&'a str> {
    let callee = callee.trim();
    if callee.is_empty() {
        return None;
    }
    if let Some((id, _)) = merged.get_key_value(callee) {
        return Some(id.as_str());
    }
    if let Some((id, _)) = merged.get_key_value(&format!("{caller_module}.{callee}")) {
        return Some(id.as_str());
    }

    let short = RECEIVER_PREFIXES
        .iter()
        .find_map(|prefix| callee.strip_prefix(prefix))
        .unwrap_or(callee);
    if short.contains('.') {
        return None;
    }
    by_short_name
        .get(short)
        .and_then(|candidates| candidates.first())
        .copied()
}

/// Simple paths from each entrypoint to each side-effect node, walked in
/// id order until the global cap is reached.
fn side_effect_paths(
    nodes: &[CallNode],
    edges: &[CallEdge],
    entrypoints: &[NodeId],
    max_hops: usize,
    max_paths: usize,
) -> Vec<Vec<NodeId>> {
    let graph = DiGraph::from_edges(
        nodes.iter().map(|node| node.id.as_str()),
        edges
            .iter()
            .map(|edge| (edge.source.as_str(), edge.target.as_str())),
    );
    let sinks = nodes
        .iter()
        .filter(|node| node.has_side_effects())
        .filter_map(|node| graph.index_of(&node.id))
        .collect::<BTreeSet<_>>();

    let mut paths = Vec::new();
    for entrypoint in entrypoints {
        let Some(source) = graph.index_of(entrypoint) else {
            continue;
        };
        for sink in &sinks {
            let remaining = max_paths.saturating_sub(paths.len());
            if remaining == 0 {
                return paths;
            }
            for path in graph.simple_paths(source, *sink, max_hops, remaining) {
                paths.push(
                    path.into_iter()
                        .map(|index| graph.key(index).to_owned())
                        .collect(),
                );
            }
        }
    }
    paths
}
