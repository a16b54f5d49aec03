use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use bloc_analysis::{
    RiskInputs, WorkflowMiner, analyze_dead_code, assess_risk, build_workflow_graph,
    classify_drift, detect_graph_dead_code,
};
use bloc_config::MinerConfig;
use bloc_core::{
    CallType, DeadCodeKind, DriftSeverity, NodeKind, RiskLevel, RiskWarning, RunRole, SideEffect,
    TestResult, TestRun, TestSuite, Verdict, WarningSource, WorkflowGraph,
};
use bloc_parse::{CallSite, ExtractedFunction, ExtractedModule};
use tempfile::tempdir;

fn write_file(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, content).expect("write file");
}

/// Small linear congruential generator so graph shapes vary between cases
/// but stay reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound.max(1)
    }
}

fn random_graph(seed: u64, node_count: usize, edge_count: usize) -> WorkflowGraph {
    let mut rng = Lcg(seed);
    let names = (0..node_count)
        .map(|index| match index {
            0 => "main".to_owned(),
            1 => "run".to_owned(),
            other => format!("f{other}"),
        })
        .collect::<Vec<_>>();
    let functions = names
        .iter()
        .map(|name| {
            let calls = (0..edge_count / node_count.max(1) + 1)
                .map(|_| CallSite {
                    callee: names[rng.next(node_count)].clone(),
                    call_type: CallType::Direct,
                })
                .collect();
            let side_effects = if rng.next(3) == 0 {
                BTreeSet::from([SideEffect::Network])
            } else {
                BTreeSet::new()
            };
            ExtractedFunction {
                name: name.clone(),
                line: 1,
                signature: format!("def {name}()"),
                calls,
                side_effects,
            }
        })
        .collect();
    build_workflow_graph(
        vec![ExtractedModule {
            module: "generated".to_owned(),
            functions,
        }],
        8,
        20,
    )
}

#[test]
fn entrypoint_calling_one_side_effect_function() {
    let temp = tempdir().expect("tempdir");
    write_file(
        temp.path(),
        "app.py",
        "def main():\n    write_log('started')\n\n\ndef write_log(message):\n    with open('log.txt', 'a') as handle:\n        handle.write(message)\n",
    );

    let outcome = WorkflowMiner::new(temp.path(), MinerConfig::default())
        .mine(None)
        .expect("mine");
    let graph = outcome.graph;

    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.entrypoints, vec!["app.main".to_owned()]);
    assert_eq!(graph.side_effect_paths.len(), 1);
    assert_eq!(
        graph.side_effect_paths[0],
        vec!["app.main".to_owned(), "app.write_log".to_owned()]
    );

    let write_log = graph.node("app.write_log").expect("write_log node");
    assert_eq!(write_log.kind, NodeKind::SideEffect);
    assert!(write_log.side_effects.contains(&SideEffect::FileIo));
    assert_eq!(outcome.files_scanned, 1);
    assert!(outcome.fallback_files.is_empty());
}

#[test]
fn unparseable_file_falls_back_to_line_scanner() {
    let temp = tempdir().expect("tempdir");
    write_file(
        temp.path(),
        "legacy/report.py",
        "def export(path):\n    fh = open(path, 'w')\n    fh.write(<<legacy>>)\n",
    );
    write_file(
        temp.path(),
        "legacy/clean.py",
        "def run():\n    return export('out.txt')\n",
    );

    let outcome = WorkflowMiner::new(temp.path(), MinerConfig::default())
        .mine(Some("legacy"))
        .expect("mine");

    assert_eq!(outcome.files_scanned, 2);
    assert_eq!(outcome.fallback_files.len(), 1);
    let export = outcome
        .graph
        .node("legacy.report.export")
        .expect("fallback node");
    assert!(export.side_effects.contains(&SideEffect::FileIo));
    assert!(outcome.graph.edges.iter().any(|edge| {
        edge.source == "legacy.clean.run" && edge.target == "legacy.report.export"
    }));
}

#[test]
fn target_filter_with_no_match_yields_empty_graph() {
    let temp = tempdir().expect("tempdir");
    write_file(temp.path(), "app.py", "def main():\n    pass\n");

    let outcome = WorkflowMiner::new(temp.path(), MinerConfig::default())
        .mine(Some("billing"))
        .expect("mine");
    assert!(outcome.graph.nodes.is_empty());
    assert_eq!(outcome.files_scanned, 0);
}

#[test]
fn repository_without_sources_is_an_input_error() {
    let temp = tempdir().expect("tempdir");
    write_file(temp.path(), "README.md", "# nothing here\n");

    let err = WorkflowMiner::new(temp.path(), MinerConfig::default())
        .mine(None)
        .expect_err("no sources");
    assert!(err.to_string().contains("no source files"));
}

#[test]
fn harness_directory_is_excluded_from_mining() {
    let temp = tempdir().expect("tempdir");
    write_file(temp.path(), "app.py", "def main():\n    pass\n");
    write_file(
        temp.path(),
        "_bloc_tests/test_main_0.py",
        "def test_main():\n    main()\n",
    );

    let outcome = WorkflowMiner::new(temp.path(), MinerConfig::default())
        .with_excluded_dir("_bloc_tests")
        .mine(None)
        .expect("mine");
    assert_eq!(outcome.graph.nodes.len(), 1);
}

#[test]
fn dead_code_report_combines_graph_and_comment_scan() {
    let temp = tempdir().expect("tempdir");
    let mut source = String::from(
        "def main():\n    helper()\n\n\ndef helper():\n    return 1\n\n\ndef orphan():\n    return 2\n",
    );
    for line in 0..6 {
        source.push_str(&format!("# legacy_total += {line}\n"));
    }
    write_file(temp.path(), "app.py", &source);

    let miner = WorkflowMiner::new(temp.path(), MinerConfig::default());
    let files = miner.source_files(None).expect("files");
    let outcome = miner.mine(None).expect("mine");
    let report = analyze_dead_code(&outcome.graph, &files, 6);

    assert_eq!(report.zero_caller_count, 1);
    assert_eq!(report.unreachable_count, 0);
    assert_eq!(report.commented_block_count, 1);
    assert_eq!(report.total, 2);
    assert_eq!(report.items[0].name, "orphan");
    assert_eq!(report.items[1].line, 11);
}

#[test]
fn side_effect_paths_respect_hop_and_count_bounds() {
    for seed in 0..40u64 {
        let graph = random_graph(seed, 12 + (seed as usize % 10), 60);
        assert!(graph.side_effect_paths.len() <= 20, "seed {seed}");
        for path in &graph.side_effect_paths {
            assert!(path.len() >= 2 && path.len() - 1 <= 8, "seed {seed}");
            let unique = path.iter().collect::<BTreeSet<_>>();
            assert_eq!(unique.len(), path.len(), "path repeats a node");
            assert!(graph.entrypoints.contains(&path[0]));
            let last = graph.node(&path[path.len() - 1]).expect("path end");
            assert!(last.has_side_effects());
        }
    }
}

#[test]
fn reachable_nodes_are_never_reported_dead() {
    for seed in 0..40u64 {
        let graph = random_graph(seed, 15, 25);
        let items = detect_graph_dead_code(&graph);

        let mut reachable = graph.entrypoints.iter().cloned().collect::<BTreeSet<_>>();
        loop {
            let before = reachable.len();
            for edge in &graph.edges {
                if reachable.contains(&edge.source) {
                    reachable.insert(edge.target.clone());
                }
            }
            if reachable.len() == before {
                break;
            }
        }

        for item in &items {
            let id = format!("{}.{}", item.module, item.name);
            assert!(!reachable.contains(&id), "seed {seed}: {id} is reachable");
        }
        let zero = items
            .iter()
            .filter(|item| item.kind == DeadCodeKind::ZeroCallers)
            .map(|item| item.name.clone())
            .collect::<BTreeSet<_>>();
        assert!(
            items
                .iter()
                .filter(|item| item.kind == DeadCodeKind::Unreachable)
                .all(|item| !zero.contains(&item.name))
        );
        for node in &graph.nodes {
            let has_caller = graph.edges.iter().any(|edge| edge.target == node.id);
            if !has_caller && !node.is_entrypoint() {
                assert!(zero.contains(&node.name), "seed {seed}: {}", node.id);
            }
        }
    }
}

fn result(test_id: &str, passed: bool, output: &str) -> TestResult {
    TestResult {
        test_id: test_id.to_owned(),
        passed,
        output: output.to_owned(),
        duration_ms: 2.5,
    }
}

#[test]
fn changed_output_is_non_critical_drift() {
    let baseline = TestRun::new(RunRole::Baseline, vec![result("t1", true, "42")]);
    let migrated = TestRun::new(RunRole::Migrated, vec![result("t1", true, "43")]);

    let validation = classify_drift(&baseline, &migrated);
    assert_eq!(validation.drifts.len(), 1);
    assert_eq!(validation.drifts[0].severity, DriftSeverity::NonCritical);
    assert_eq!(validation.drifts[0].before_output, "42");
    assert_eq!(validation.drifts[0].after_output, "43");
    assert_eq!(validation.behavior_preservation_pct, 100.0);
}

#[test]
fn new_failure_is_critical_and_lowers_preservation() {
    let baseline = TestRun::new(
        RunRole::Baseline,
        vec![result("t1", true, "1"), result("t2", true, "2")],
    );
    let migrated = TestRun::new(
        RunRole::Migrated,
        vec![result("t1", true, "1"), result("t2", false, "Traceback")],
    );

    let validation = classify_drift(&baseline, &migrated);
    assert_eq!(validation.critical_drift_count, 1);
    assert_eq!(validation.drifts[0].test_id, "t2");
    assert_eq!(validation.behavior_preservation_pct, 50.0);
}

#[test]
fn classifying_a_run_against_itself_finds_nothing() {
    for size in 0..6 {
        let results = (0..size)
            .map(|index| result(&format!("t{index}"), true, &format!("out {index}")))
            .collect::<Vec<_>>();
        let run = TestRun::new(RunRole::Baseline, results);
        let validation = classify_drift(&run, &run);
        assert!(validation.drifts.is_empty());
        assert_eq!(validation.behavior_preservation_pct, 100.0);
    }
}

#[test]
fn failing_baseline_against_itself_reports_the_pass_ratio() {
    let run = TestRun::new(
        RunRole::Baseline,
        vec![
            result("t0", true, "ok"),
            result("t1", true, ""),
            result("t2", false, "AssertionError"),
            result("t3", true, "42"),
        ],
    );

    let validation = classify_drift(&run, &run);

    assert!(validation.drifts.is_empty());
    assert_eq!(validation.critical_drift_count, 0);
    assert_eq!(validation.non_critical_drift_count, 0);
    assert_eq!(validation.behavior_preservation_pct, 75.0);
    assert!(validation.missing_from_migrated.is_empty());
    assert!(validation.missing_from_baseline.is_empty());
}

fn critical_warning(function: &str) -> RiskWarning {
    RiskWarning {
        source: WarningSource::Memory,
        function: function.to_owned(),
        severity: DriftSeverity::Critical,
        message: format!("Previously caused drift: {function}"),
        times_seen: 1,
    }
}

fn graph_with_density(side_effect_nodes: usize, total: usize) -> WorkflowGraph {
    let functions = (0..total)
        .map(|index| ExtractedFunction {
            name: format!("f{index}"),
            line: index + 1,
            signature: String::new(),
            calls: Vec::new(),
            side_effects: if index < side_effect_nodes {
                BTreeSet::from([SideEffect::Db])
            } else {
                BTreeSet::new()
            },
        })
        .collect();
    build_workflow_graph(
        vec![ExtractedModule {
            module: "m".to_owned(),
            functions,
        }],
        8,
        20,
    )
}

#[test]
fn clean_history_scores_zero() {
    let graph = graph_with_density(0, 4);
    let suite = TestSuite {
        coverage_pct: 100.0,
        ..TestSuite::default()
    };
    let assessment = assess_risk(RiskInputs {
        history_window: 10,
        graph: Some(&graph),
        suite: Some(&suite),
        ..RiskInputs::default()
    });
    assert_eq!(assessment.risk_score, 0.0);
    assert_eq!(assessment.risk_level, RiskLevel::Low);
    assert_eq!(assessment.past_run_count, 0);
}

#[test]
fn blocked_history_and_critical_warnings_block() {
    let graph = graph_with_density(4, 4);
    let suite = TestSuite {
        coverage_pct: 0.0,
        ..TestSuite::default()
    };
    let assessment = assess_risk(RiskInputs {
        warnings: vec![critical_warning("a"), critical_warning("b")],
        history: vec![Some(Verdict::Blocked); 3],
        history_window: 10,
        known_drift_count: 2,
        graph: Some(&graph),
        suite: Some(&suite),
    });

    assert_eq!(assessment.factors.drift, 0.3);
    assert_eq!(assessment.factors.history, 0.25);
    assert_eq!(assessment.factors.side_effect, 0.2);
    assert_eq!(assessment.factors.coverage, 0.2);
    assert_eq!(assessment.risk_score, 0.95);
    assert_eq!(assessment.risk_level, RiskLevel::Blocked);
    assert_eq!(assessment.worst_historical_verdict, Some(Verdict::Blocked));
}

#[test]
fn score_is_bounded_and_monotone_in_each_factor() {
    let suite_for = |coverage_pct: f64| TestSuite {
        coverage_pct,
        ..TestSuite::default()
    };
    let score = |criticals: usize, blocked: usize, effects: usize, coverage: f64| {
        let graph = graph_with_density(effects, 10);
        let suite = suite_for(coverage);
        assess_risk(RiskInputs {
            warnings: (0..criticals)
                .map(|index| critical_warning(&format!("f{index}")))
                .collect(),
            history: vec![Some(Verdict::Blocked); blocked],
            history_window: 10,
            known_drift_count: 0,
            graph: Some(&graph),
            suite: Some(&suite),
        })
        .risk_score
    };

    for base in [(0usize, 0usize, 0usize, 100.0f64), (1, 1, 3, 60.0), (3, 4, 10, 0.0)] {
        let (criticals, blocked, effects, coverage) = base;
        let current = score(criticals, blocked, effects, coverage);
        assert!((0.0..=1.0).contains(&current));
        assert!(score(criticals + 1, blocked, effects, coverage) >= current);
        assert!(score(criticals, blocked + 1, effects, coverage) >= current);
        assert!(score(criticals, blocked, (effects + 1).min(10), coverage) >= current);
        assert!(score(criticals, blocked, effects, (coverage - 10.0).max(0.0)) >= current);
    }
}
