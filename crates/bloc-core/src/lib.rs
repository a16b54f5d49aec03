use std::path::{Component, Path};

use sha2::{Digest, Sha256};

mod behavior;
mod risk;
mod workflow;

pub use behavior::{
    BaselineRun, DriftItem, DriftSeverity, GeneratedTest, MigratedRun, RunRole, TestResult,
    TestRun, TestSuite, ValidationResult,
};
pub use risk::{
    ChangeType, ConfidenceReport, MigrationPatch, PatchChange, RiskAssessment, RiskFactors,
    RiskLevel, RiskWarning, Verdict, WarningSource,
};
pub use workflow::{
    CallEdge, CallNode, CallType, DeadCodeItem, DeadCodeKind, DeadCodeReport, ENTRYPOINT_NAMES,
    NodeId, NodeKind, SideEffect, WorkflowGraph, is_entrypoint_name,
};

/// Module name used when a source file sits directly at the repository root
/// and has no path components left after stripping the extension.
pub const ROOT_MODULE_NAME: &str = "root";

pub fn content_hash(content: &str) -> String {
    blake3_hex(content.as_bytes())
}

pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Stable repository identity: first 16 hex chars of sha256 over the
/// canonicalized repository path.
pub fn repo_id(repo_path: &Path) -> String {
    let canonical = repo_path
        .canonicalize()
        .unwrap_or_else(|_| repo_path.to_path_buf());
    let normalized = normalize_path(&canonical.to_string_lossy());
    short_sha256(normalized.as_bytes(), 16)
}

/// Dotted module name for a source file relative to the repository root.
/// `pkg/__init__.py` names the package itself; a bare `__init__.py` at the
/// root maps to [`ROOT_MODULE_NAME`].
pub fn module_name_for_path(repo_root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(repo_root).unwrap_or(file);
    let mut parts = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>();

    if let Some(last) = parts.pop() {
        let stem = match last.rsplit_once('.') {
            Some((stem, _ext)) if !stem.is_empty() => stem.to_owned(),
            _ => last,
        };
        if stem != "__init__" {
            parts.push(stem);
        }
    }

    if parts.is_empty() {
        ROOT_MODULE_NAME.to_owned()
    } else {
        parts.join(".")
    }
}

/// Truncates to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_owned(),
        None => text.to_owned(),
    }
}

pub(crate) fn short_sha256(bytes: &[u8], hex_len: usize) -> String {
    let digest = format!("{:x}", Sha256::digest(bytes));
    digest[..hex_len.min(digest.len())].to_owned()
}

fn blake3_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
