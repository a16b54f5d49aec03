use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub type NodeId = String;

/// Bare function names treated as program entry points, compared
/// case-insensitively.
pub const ENTRYPOINT_NAMES: &[&str] = &[
    "main",
    "__main__",
    "run",
    "start",
    "execute",
    "handle",
    "process",
    "app",
    "application",
    "cli",
    "entry",
];

pub fn is_entrypoint_name(name: &str) -> bool {
    let lowered = name.trim().to_lowercase();
    ENTRYPOINT_NAMES.iter().any(|candidate| *candidate == lowered)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    FileIo,
    EnvRead,
    Network,
    Db,
    Subprocess,
}

impl SideEffect {
    pub const ALL: [SideEffect; 5] = [
        Self::FileIo,
        Self::EnvRead,
        Self::Network,
        Self::Db,
        Self::Subprocess,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileIo => "file_io",
            Self::EnvRead => "env_read",
            Self::Network => "network",
            Self::Db => "db",
            Self::Subprocess => "subprocess",
        }
    }
}

impl std::str::FromStr for SideEffect {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "file_io" => Ok(Self::FileIo),
            "env_read" => Ok(Self::EnvRead),
            "network" => Ok(Self::Network),
            "db" => Ok(Self::Db),
            "subprocess" => Ok(Self::Subprocess),
            other => Err(format!(
                "invalid side effect '{other}', expected one of: file_io, env_read, network, db, subprocess"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Function,
    Entrypoint,
    #[serde(rename = "sideeffect")]
    SideEffect,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Entrypoint => "entrypoint",
            Self::SideEffect => "sideeffect",
        }
    }

    /// A non-empty side-effect set wins over entrypoint naming. Entrypoint
    /// membership is still answered by [`CallNode::is_entrypoint`].
    pub fn classify(name: &str, side_effects: &BTreeSet<SideEffect>) -> Self {
        if !side_effects.is_empty() {
            Self::SideEffect
        } else if is_entrypoint_name(name) {
            Self::Entrypoint
        } else {
            Self::Function
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallNode {
    pub id: NodeId,
    pub name: String,
    pub module: String,
    pub line: usize,
    pub kind: NodeKind,
    pub side_effects: BTreeSet<SideEffect>,
    #[serde(default)]
    pub signature: String,
}

impl CallNode {
    pub fn new(
        module: &str,
        name: &str,
        line: usize,
        side_effects: BTreeSet<SideEffect>,
        signature: String,
    ) -> Self {
        Self {
            id: format!("{module}.{name}"),
            name: name.to_owned(),
            module: module.to_owned(),
            line,
            kind: NodeKind::classify(name, &side_effects),
            side_effects,
            signature,
        }
    }

    pub fn is_entrypoint(&self) -> bool {
        is_entrypoint_name(&self.name)
    }

    pub fn has_side_effects(&self) -> bool {
        !self.side_effects.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    #[default]
    Direct,
    Conditional,
    Loop,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallEdge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub call_type: CallType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkflowGraph {
    pub nodes: Vec<CallNode>,
    pub edges: Vec<CallEdge>,
    pub entrypoints: Vec<NodeId>,
    pub side_effect_paths: Vec<Vec<NodeId>>,
}

impl WorkflowGraph {
    pub fn node(&self, id: &str) -> Option<&CallNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn side_effect_node_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.has_side_effects())
            .count()
    }

    /// Fraction of nodes carrying at least one side effect; `None` for an
    /// empty graph.
    pub fn side_effect_density(&self) -> Option<f64> {
        if self.nodes.is_empty() {
            return None;
        }
        Some(self.side_effect_node_count() as f64 / self.nodes.len() as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadCodeKind {
    ZeroCallers,
    Unreachable,
    CommentedBlock,
}

impl DeadCodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ZeroCallers => "zero_callers",
            Self::Unreachable => "unreachable",
            Self::CommentedBlock => "commented_block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadCodeItem {
    pub name: String,
    pub module: String,
    pub line: usize,
    pub kind: DeadCodeKind,
    pub detail: String,
    #[serde(default)]
    pub source_snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeadCodeReport {
    pub items: Vec<DeadCodeItem>,
    pub total: usize,
    pub zero_caller_count: usize,
    pub unreachable_count: usize,
    pub commented_block_count: usize,
}

impl DeadCodeReport {
    pub fn from_items(items: Vec<DeadCodeItem>) -> Self {
        let count = |kind: DeadCodeKind| items.iter().filter(|item| item.kind == kind).count();
        Self {
            total: items.len(),
            zero_caller_count: count(DeadCodeKind::ZeroCallers),
            unreachable_count: count(DeadCodeKind::Unreachable),
            commented_block_count: count(DeadCodeKind::CommentedBlock),
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entrypoint_names_match_case_insensitively() {
        assert!(is_entrypoint_name("main"));
        assert!(is_entrypoint_name("Main"));
        assert!(is_entrypoint_name("__main__"));
        assert!(is_entrypoint_name("CLI"));
        assert!(!is_entrypoint_name("main_loop"));
        assert!(!is_entrypoint_name("helper"));
    }

    #[test]
    fn node_kind_prefers_side_effect_over_entrypoint() {
        let effects = BTreeSet::from([SideEffect::FileIo]);
        let node = CallNode::new("app", "main", 3, effects.clone(), String::new());
        assert_eq!(node.kind, NodeKind::SideEffect);
        assert!(node.is_entrypoint());
        assert_eq!(node.id, "app.main");

        let node = CallNode::new("app", "run", 5, BTreeSet::new(), String::new());
        assert_eq!(node.kind, NodeKind::Entrypoint);

        let node = CallNode::new("app", "write_log", 9, effects, String::new());
        assert_eq!(node.kind, NodeKind::SideEffect);

        let node = CallNode::new("app", "helper", 12, BTreeSet::new(), String::new());
        assert_eq!(node.kind, NodeKind::Function);
    }

    #[test]
    fn side_effect_serializes_as_snake_case() {
        let json = serde_json::to_string(&SideEffect::FileIo).expect("serialize");
        assert_eq!(json, "\"file_io\"");
        let kind = serde_json::to_string(&NodeKind::SideEffect).expect("serialize");
        assert_eq!(kind, "\"sideeffect\"");
    }

    #[test]
    fn dead_code_report_counts_by_kind() {
        let item = |kind| DeadCodeItem {
            name: "x".to_owned(),
            module: "m".to_owned(),
            line: 1,
            kind,
            detail: String::new(),
            source_snippet: String::new(),
        };
        let report = DeadCodeReport::from_items(vec![
            item(DeadCodeKind::ZeroCallers),
            item(DeadCodeKind::ZeroCallers),
            item(DeadCodeKind::CommentedBlock),
        ]);

        assert_eq!(report.total, 3);
        assert_eq!(report.zero_caller_count, 2);
        assert_eq!(report.unreachable_count, 0);
        assert_eq!(report.commented_block_count, 1);
    }

    #[test]
    fn density_is_none_for_empty_graph() {
        assert_eq!(WorkflowGraph::default().side_effect_density(), None);
    }
}
