use std::collections::{BTreeSet, HashMap};

use bloc_core::{CallType, SideEffect};
use streaming_iterator::StreamingIterator;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor};

use crate::effects::{classify_call, is_env_attribute};
use crate::{
    CallSite, ExtractedFunction, ExtractedModule, ExtractorKind, ParseError, SourceExtractor,
    collapse_whitespace, merge_function,
};

const CAPTURE_DEFINITION: &str = "function.definition";
const CAPTURE_CALLEE: &str = "call.callee";
const CAPTURE_ATTRIBUTE: &str = "attribute.access";

pub struct PythonExtractor {
    parser: Parser,
    query: Query,
    definition_index: u32,
    callee_index: u32,
    attribute_index: u32,
}

impl PythonExtractor {
    pub fn new() -> Result<Self, ParseError> {
        let language: Language = tree_sitter_python::LANGUAGE.into();
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .map_err(|err| ParseError::Grammar(err.to_string()))?;
        let query = Query::new(&language, include_str!("queries/python_workflow.scm"))
            .map_err(|err| ParseError::Query(err.to_string()))?;

        let capture = |name: &str| {
            query
                .capture_index_for_name(name)
                .ok_or_else(|| ParseError::Query(format!("missing capture @{name}")))
        };
        let definition_index = capture(CAPTURE_DEFINITION)?;
        let callee_index = capture(CAPTURE_CALLEE)?;
        let attribute_index = capture(CAPTURE_ATTRIBUTE)?;

        Ok(Self {
            parser,
            query,
            definition_index,
            callee_index,
            attribute_index,
        })
    }
}

impl SourceExtractor for PythonExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::TreeSitter
    }

    fn extract(&mut self, module: &str, source: &str) -> Result<ExtractedModule, ParseError> {
        let tree = self.parser.parse(source, None).ok_or(ParseError::NoTree)?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(ParseError::Syntax {
                line: first_error_line(root),
            });
        }

        let bytes = source.as_bytes();
        let mut definitions = Vec::new();
        let mut callees = Vec::new();
        let mut attributes = Vec::new();

        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&self.query, root, bytes);
        while let Some(matched) = matches.next() {
            for capture in matched.captures {
                if capture.index == self.definition_index {
                    definitions.push(capture.node);
                } else if capture.index == self.callee_index {
                    callees.push(capture.node);
                } else if capture.index == self.attribute_index {
                    attributes.push(capture.node);
                }
            }
        }

        let mut functions = Vec::new();
        let mut slot_by_node = HashMap::new();
        for definition in definitions {
            let Some(name_node) = definition.child_by_field_name("name") else {
                continue;
            };
            let name = node_text(name_node, bytes);
            if name.is_empty() {
                continue;
            }
            let function = ExtractedFunction {
                signature: python_signature(definition, &name, bytes),
                name,
                line: definition.start_position().row + 1,
                calls: Vec::new(),
                side_effects: BTreeSet::new(),
            };
            let slot = merge_function(&mut functions, function);
            slot_by_node.insert(definition.id(), slot);
        }

        for callee in callees {
            let Some(call_name) = call_target(callee, bytes) else {
                continue;
            };
            let (Some(owner), call_type) = enclosing_function(callee) else {
                continue;
            };
            let Some(slot) = slot_by_node.get(&owner.id()) else {
                continue;
            };
            let function = &mut functions[*slot];
            function.side_effects.extend(classify_call(&call_name));
            function.calls.push(CallSite {
                callee: call_name,
                call_type,
            });
        }

        for attribute in attributes {
            let Some(dotted) = dotted_name(attribute, bytes) else {
                continue;
            };
            if !is_env_attribute(&dotted) {
                continue;
            }
            if let (Some(owner), _) = enclosing_function(attribute)
                && let Some(slot) = slot_by_node.get(&owner.id())
            {
                functions[*slot].side_effects.insert(SideEffect::EnvRead);
            }
        }

        Ok(ExtractedModule {
            module: module.to_owned(),
            functions,
        })
    }
}

fn node_text(node: Node<'_>, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or_default().trim().to_owned()
}

fn python_signature(definition: Node<'_>, name: &str, source: &[u8]) -> String {
    let parameters = definition
        .child_by_field_name("parameters")
        .map(|node| collapse_whitespace(&node_text(node, source)))
        .unwrap_or_else(|| "()".to_owned());
    match definition.child_by_field_name("return_type") {
        Some(return_type) => format!(
            "def {name}{parameters} -> {}",
            collapse_whitespace(&node_text(return_type, source))
        ),
        None => format!("def {name}{parameters}"),
    }
}

/// Dotted callee name for plain and attribute calls. Calls on computed
/// receivers (`make().run()`) keep only the final attribute.
fn call_target(callee: Node<'_>, source: &[u8]) -> Option<String> {
    match callee.kind() {
        "identifier" => Some(node_text(callee, source)),
        "attribute" => dotted_name(callee, source).or_else(|| {
            callee
                .child_by_field_name("attribute")
                .map(|attribute| node_text(attribute, source))
        }),
        _ => None,
    }
}

fn dotted_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, source)),
        "attribute" => {
            let object = dotted_name(node.child_by_field_name("object")?, source)?;
            let attribute = node.child_by_field_name("attribute")?;
            Some(format!("{object}.{}", node_text(attribute, source)))
        }
        _ => None,
    }
}

/// Innermost enclosing function definition, and the call context given by
/// the nearest loop or branch between the node and that function.
fn enclosing_function(node: Node<'_>) -> (Option<Node<'_>>, CallType) {
    let mut call_type = None;
    let mut current = node.parent();

    while let Some(parent) = current {
        match parent.kind() {
            "function_definition" => return (Some(parent), call_type.unwrap_or_default()),
            "for_statement"
            | "while_statement"
            | "list_comprehension"
            | "set_comprehension"
            | "dictionary_comprehension"
            | "generator_expression"
                if call_type.is_none() =>
            {
                call_type = Some(CallType::Loop);
            }
            "if_statement" | "conditional_expression" | "match_statement" | "try_statement"
                if call_type.is_none() =>
            {
                call_type = Some(CallType::Conditional);
            }
            _ => {}
        }
        current = parent.parent();
    }

    (None, call_type.unwrap_or_default())
}

fn first_error_line(node: Node<'_>) -> usize {
    if node.is_error() || node.is_missing() {
        return node.start_position().row + 1;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            return first_error_line(child);
        }
    }

    node.start_position().row + 1
}
