use std::collections::BTreeSet;

use bloc_core::{CallType, SideEffect};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod effects;
mod line_scan;
mod python;

pub use effects::{SIDE_EFFECT_PATTERNS, classify_call, is_env_attribute};
pub use line_scan::LinePatternExtractor;
pub use python::PythonExtractor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub callee: String,
    pub call_type: CallType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFunction {
    pub name: String,
    pub line: usize,
    pub signature: String,
    pub calls: Vec<CallSite>,
    pub side_effects: BTreeSet<SideEffect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractedModule {
    pub module: String,
    pub functions: Vec<ExtractedFunction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    TreeSitter,
    LinePattern,
}

impl ExtractorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TreeSitter => "tree_sitter",
            Self::LinePattern => "line_pattern",
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to load tree-sitter grammar: {0}")]
    Grammar(String),
    #[error("invalid tree-sitter query: {0}")]
    Query(String),
    #[error("invalid line pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("source did not produce a syntax tree")]
    NoTree,
    #[error("syntax error near line {line}")]
    Syntax { line: usize },
}

/// A way of turning one module's source text into function records.
pub trait SourceExtractor {
    fn kind(&self) -> ExtractorKind;

    fn extract(&mut self, module: &str, source: &str) -> Result<ExtractedModule, ParseError>;
}

/// Runs `primary` first and re-reads the same text with `fallback` when the
/// primary extractor rejects it.
pub fn extract_with_fallback(
    primary: Option<&mut dyn SourceExtractor>,
    fallback: &mut dyn SourceExtractor,
    module: &str,
    source: &str,
) -> Result<(ExtractedModule, ExtractorKind), ParseError> {
    if let Some(primary) = primary {
        match primary.extract(module, source) {
            Ok(extracted) => return Ok((extracted, primary.kind())),
            Err(ParseError::Syntax { .. }) | Err(ParseError::NoTree) => {}
            Err(err) => return Err(err),
        }
    }

    let extracted = fallback.extract(module, source)?;
    Ok((extracted, fallback.kind()))
}

/// Inserts or merges a function by name, keeping the first definition line.
pub(crate) fn merge_function(
    functions: &mut Vec<ExtractedFunction>,
    function: ExtractedFunction,
) -> usize {
    if let Some(position) = functions
        .iter()
        .position(|existing| existing.name == function.name)
    {
        let existing = &mut functions[position];
        existing.calls.extend(function.calls);
        existing.side_effects.extend(function.side_effects);
        return position;
    }
    functions.push(function);
    functions.len() - 1
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
