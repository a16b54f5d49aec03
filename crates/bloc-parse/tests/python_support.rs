use std::collections::BTreeSet;

use bloc_core::{CallType, SideEffect};
use bloc_parse::{
    ExtractedModule, ExtractorKind, LinePatternExtractor, PythonExtractor, SourceExtractor,
    extract_with_fallback,
};

fn extract(source: &str) -> ExtractedModule {
    let mut extractor = PythonExtractor::new().expect("extractor");
    extractor
        .extract("billing", source)
        .expect("python extraction")
}

fn function<'a>(module: &'a ExtractedModule, name: &str) -> &'a bloc_parse::ExtractedFunction {
    module
        .functions
        .iter()
        .find(|function| function.name == name)
        .unwrap_or_else(|| panic!("missing function {name}"))
}

#[test]
fn extracts_functions_methods_and_nested_definitions() {
    let module = extract(include_str!("fixtures/billing.py"));

    let names = module
        .functions
        .iter()
        .map(|function| function.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            "main",
            "load_config",
            "pending_invoices",
            "submit",
            "archive",
            "flush",
            "helper",
            "nested"
        ]
    );
    assert_eq!(function(&module, "main").line, 7);
}

#[test]
fn classifies_side_effects_from_calls_and_environ_reads() {
    let module = extract(include_str!("fixtures/billing.py"));

    assert_eq!(
        function(&module, "load_config").side_effects,
        BTreeSet::from([SideEffect::EnvRead])
    );
    assert!(
        function(&module, "pending_invoices")
            .side_effects
            .contains(&SideEffect::FileIo)
    );
    assert_eq!(
        function(&module, "submit").side_effects,
        BTreeSet::from([SideEffect::Network])
    );
    assert_eq!(
        function(&module, "archive").side_effects,
        BTreeSet::from([SideEffect::Subprocess])
    );
    assert!(function(&module, "helper").side_effects.is_empty());
}

#[test]
fn calls_are_attributed_to_the_innermost_function() {
    let module = extract(include_str!("fixtures/billing.py"));

    let main_calls = function(&module, "main")
        .calls
        .iter()
        .map(|call| (call.callee.as_str(), call.call_type))
        .collect::<Vec<_>>();
    assert!(main_calls.contains(&("load_config", CallType::Direct)));
    assert!(main_calls.contains(&("submit", CallType::Loop)));

    let submit_calls = &function(&module, "submit").calls;
    assert_eq!(submit_calls[0].callee, "requests.post");
    assert_eq!(submit_calls[0].call_type, CallType::Conditional);

    let flush_calls = &function(&module, "flush").calls;
    assert_eq!(flush_calls[0].callee, "self.archive");

    let helper_calls = function(&module, "helper")
        .calls
        .iter()
        .map(|call| call.callee.as_str())
        .collect::<Vec<_>>();
    assert_eq!(helper_calls, vec!["nested"]);
    assert_eq!(function(&module, "nested").calls[0].callee, "compute");
}

#[test]
fn fallback_scanner_takes_over_for_unparseable_source() {
    let source = "def main():\n    print \"legacy\"\n    save()\n\ndef save(:\n    open('out.txt')\n";
    let mut primary = PythonExtractor::new().expect("extractor");
    let mut fallback = LinePatternExtractor::new(30).expect("scanner");

    let (module, kind) = extract_with_fallback(Some(&mut primary), &mut fallback, "legacy", source)
        .expect("fallback extraction");

    assert_eq!(kind, ExtractorKind::LinePattern);
    assert_eq!(module.module, "legacy");
    assert_eq!(module.functions.len(), 2);
    assert!(
        module.functions[1]
            .side_effects
            .contains(&SideEffect::FileIo)
    );
}

#[test]
fn primary_extractor_is_used_when_source_parses() {
    let mut primary = PythonExtractor::new().expect("extractor");
    let mut fallback = LinePatternExtractor::new(30).expect("scanner");

    let (_, kind) = extract_with_fallback(
        Some(&mut primary),
        &mut fallback,
        "ok",
        "def run():\n    return 1\n",
    )
    .expect("extraction");

    assert_eq!(kind, ExtractorKind::TreeSitter);
}
