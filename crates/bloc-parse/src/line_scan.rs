use std::collections::BTreeSet;

use bloc_core::{CallType, SideEffect};
use regex::Regex;

use crate::effects::classify_call;
use crate::{
    CallSite, ExtractedFunction, ExtractedModule, ExtractorKind, ParseError, SourceExtractor,
    collapse_whitespace, merge_function,
};

const PYTHON_KEYWORDS: &[&str] = &[
    "and", "assert", "await", "class", "def", "del", "elif", "except", "exec", "for", "from",
    "if", "import", "in", "is", "lambda", "not", "or", "print", "raise", "return", "while",
    "with", "yield",
];

/// Regex scanner used when a file does not parse. Finds `def` lines and
/// reads a bounded window of the following body lines for calls and
/// side-effect keywords.
#[derive(Debug, Clone)]
pub struct LinePatternExtractor {
    def_pattern: Regex,
    call_pattern: Regex,
    window_lines: usize,
}

impl LinePatternExtractor {
    pub fn new(window_lines: usize) -> Result<Self, ParseError> {
        Ok(Self {
            def_pattern: Regex::new(
                r"^(?P<indent>[ \t]*)(?:async[ \t]+)?def[ \t]+(?P<name>[A-Za-z_][A-Za-z0-9_]*)[ \t]*(?P<params>\([^)]*\)?)?",
            )?,
            call_pattern: Regex::new(
                r"(?P<callee>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)[ \t]*\(",
            )?,
            window_lines: window_lines.max(1),
        })
    }

    fn scan_body(&self, lines: &[&str], def_indent: usize) -> (Vec<CallSite>, BTreeSet<SideEffect>) {
        let mut calls = Vec::new();
        let mut side_effects = BTreeSet::new();

        for raw in lines.iter().take(self.window_lines) {
            let code = strip_comment(raw);
            if code.trim().is_empty() {
                continue;
            }
            if indentation(code) <= def_indent {
                break;
            }
            if code.contains("os.environ") {
                side_effects.insert(SideEffect::EnvRead);
            }
            for captures in self.call_pattern.captures_iter(code) {
                let callee = &captures["callee"];
                if PYTHON_KEYWORDS.contains(&callee) {
                    continue;
                }
                side_effects.extend(classify_call(callee));
                calls.push(CallSite {
                    callee: callee.to_owned(),
                    call_type: CallType::Direct,
                });
            }
        }

        (calls, side_effects)
    }
}

impl SourceExtractor for LinePatternExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::LinePattern
    }

    fn extract(&mut self, module: &str, source: &str) -> Result<ExtractedModule, ParseError> {
        let lines = source.lines().collect::<Vec<_>>();
        let mut functions = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            let Some(captures) = self.def_pattern.captures(line) else {
                continue;
            };
            let name = captures["name"].to_owned();
            let def_indent = indentation(&captures["indent"]);
            let params = captures
                .name("params")
                .map(|params| collapse_whitespace(params.as_str()))
                .unwrap_or_else(|| "()".to_owned());
            let (calls, side_effects) = self.scan_body(&lines[index + 1..], def_indent);

            merge_function(
                &mut functions,
                ExtractedFunction {
                    signature: format!("def {name}{params}"),
                    name,
                    line: index + 1,
                    calls,
                    side_effects,
                },
            );
        }

        Ok(ExtractedModule {
            module: module.to_owned(),
            functions,
        })
    }
}

/// Cuts the line at the first `#` outside a string literal.
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    let mut escaped = false;
    for (position, ch) in line.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if ch == '\\' => escaped = true,
            Some(open) if ch == open => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == '#' => return &line[..position],
            None => {}
        }
    }
    line
}

fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|ch| *ch == ' ' || *ch == '\t')
        .map(|ch| if ch == '\t' { 4 } else { 1 })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_inside_a_string_is_not_a_comment() {
        assert_eq!(strip_comment("x = 1  # note"), "x = 1  ");
        assert_eq!(strip_comment("f = open(\"#tmp\", 'w')"), "f = open(\"#tmp\", 'w')");
        assert_eq!(strip_comment("s = 'it\\'s #1'  # tail"), "s = 'it\\'s #1'  ");
        assert_eq!(strip_comment("print('a') # \"quoted\""), "print('a') ");
    }

    #[test]
    fn side_effect_survives_a_hash_in_a_literal() {
        let source = "def dump():\n    fh = open(\"#tmp\", 'w')  # scratch\n";
        let mut extractor = LinePatternExtractor::new(30).expect("scanner");
        let module = extractor.extract("legacy", source).expect("scan");

        let dump = &module.functions[0];
        assert!(dump.side_effects.contains(&SideEffect::FileIo));
        assert!(dump.calls.iter().any(|call| call.callee == "open"));
    }

    #[test]
    fn scans_python2_source_that_tree_sitter_rejects() {
        let source = "import os\n\ndef main():\n    print \"starting\"\n    path = os.environ['LOG']\n    write_log(path)\n\ndef write_log(path):\n    f = open(path, 'w')\n    f.write('x')\n";
        let mut extractor = LinePatternExtractor::new(30).expect("scanner");
        let module = extractor.extract("legacy", source).expect("scan");

        assert_eq!(module.functions.len(), 2);
        let main = &module.functions[0];
        assert_eq!(main.name, "main");
        assert_eq!(main.line, 3);
        assert!(main.side_effects.contains(&SideEffect::EnvRead));
        assert!(main.calls.iter().any(|call| call.callee == "write_log"));

        let write_log = &module.functions[1];
        assert_eq!(write_log.signature, "def write_log(path)");
        assert!(write_log.side_effects.contains(&SideEffect::FileIo));
        assert!(!write_log.calls.iter().any(|call| call.callee == "main"));
    }

    #[test]
    fn window_stops_at_dedent_and_bound() {
        let mut source = String::from("def busy():\n");
        for _ in 0..5 {
            source.push_str("    noop()\n");
        }
        source.push_str("    subprocess.call(['ls'])\n");
        let mut extractor = LinePatternExtractor::new(5).expect("scanner");
        let module = extractor.extract("m", &source).expect("scan");

        assert_eq!(module.functions[0].calls.len(), 5);
        assert!(module.functions[0].side_effects.is_empty());
    }
}
