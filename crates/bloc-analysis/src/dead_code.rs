use std::collections::HashSet;
use std::fs;

use bloc_core::{DeadCodeItem, DeadCodeKind, DeadCodeReport, WorkflowGraph};
use bloc_graph_algo::DiGraph;

use crate::miner::SourceFile;

const SNIPPET_LINES: usize = 6;

/// Zero-caller and unreachable functions. A node reported as zero-caller is
/// never reported again as unreachable.
pub fn detect_graph_dead_code(graph: &WorkflowGraph) -> Vec<DeadCodeItem> {
    let index = DiGraph::from_edges(
        graph.nodes.iter().map(|node| node.id.as_str()),
        graph
            .edges
            .iter()
            .map(|edge| (edge.source.as_str(), edge.target.as_str())),
    );
    let entrypoints = graph
        .entrypoints
        .iter()
        .map(String::as_str)
        .collect::<HashSet<_>>();
    let reachable = index.reachable_from(
        graph
            .entrypoints
            .iter()
            .filter_map(|entrypoint| index.index_of(entrypoint)),
    );

    let mut items = Vec::new();
    let mut reported = HashSet::new();
    for node in &graph.nodes {
        if entrypoints.contains(node.id.as_str()) {
            continue;
        }
        if index.in_degree_of(&node.id) == Some(0) {
            reported.insert((node.module.as_str(), node.name.as_str()));
            items.push(DeadCodeItem {
                name: node.name.clone(),
                module: node.module.clone(),
                line: node.line,
                kind: DeadCodeKind::ZeroCallers,
                detail: format!("Function '{}' has no callers in the call graph", node.name),
                source_snippet: String::new(),
            });
        }
    }

    for node in &graph.nodes {
        if entrypoints.contains(node.id.as_str())
            || reported.contains(&(node.module.as_str(), node.name.as_str()))
        {
            continue;
        }
        let is_reachable = index
            .index_of(&node.id)
            .is_some_and(|position| reachable.contains(&position));
        if !is_reachable {
            items.push(DeadCodeItem {
                name: node.name.clone(),
                module: node.module.clone(),
                line: node.line,
                kind: DeadCodeKind::Unreachable,
                detail: format!("Function '{}' is unreachable from any entrypoint", node.name),
                source_snippet: String::new(),
            });
        }
    }

    items
}

/// Runs of at least `min_run` consecutive comment-only lines. Shebang-style
/// `#!` lines and bare `#` separators end a run.
pub fn scan_commented_blocks(module: &str, source: &str, min_run: usize) -> Vec<DeadCodeItem> {
    let min_run = min_run.max(1);
    let mut items = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    let mut run_start = 0usize;

    let mut flush = |run: &mut Vec<&str>, start: usize| {
        if run.len() >= min_run {
            items.push(DeadCodeItem {
                name: format!("commented_block_L{start}"),
                module: module.to_owned(),
                line: start,
                kind: DeadCodeKind::CommentedBlock,
                detail: format!("Commented-out block ({} lines)", run.len()),
                source_snippet: run
                    .iter()
                    .take(SNIPPET_LINES)
                    .copied()
                    .collect::<Vec<_>>()
                    .join("\n"),
            });
        }
        run.clear();
    };

    for (offset, line) in source.lines().enumerate() {
        if is_comment_line(line) {
            if run.is_empty() {
                run_start = offset + 1;
            }
            run.push(line);
        } else {
            flush(&mut run, run_start);
        }
    }
    flush(&mut run, run_start);

    items
}

/// Graph findings followed by commented blocks from every readable file.
pub fn analyze_dead_code(
    graph: &WorkflowGraph,
    files: &[SourceFile],
    min_commented_run: usize,
) -> DeadCodeReport {
    let mut items = detect_graph_dead_code(graph);
    for file in files {
        let bytes = match fs::read(&file.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(file = %file.path.display(), error = %err, "skipping comment scan");
                continue;
            }
        };
        let source = String::from_utf8_lossy(&bytes);
        items.extend(scan_commented_blocks(
            &file.module,
            &source,
            min_commented_run,
        ));
    }

    let report = DeadCodeReport::from_items(items);
    tracing::info!(
        total = report.total,
        zero_callers = report.zero_caller_count,
        unreachable = report.unreachable_count,
        commented_blocks = report.commented_block_count,
        "dead code detected"
    );
    report
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('#') else {
        return false;
    };
    !rest.is_empty() && !rest.trim_start().starts_with('!')
}
