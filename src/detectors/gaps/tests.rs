use super::*;
use crate::core::config::StrategyConfig;
use crate::detectors::coverage::{rollup, BuildStatus, FileCoverage, RawCoverage};
use crate::lang::common::fixtures::{function, if_else, unit};
use crate::lang::common::{BoundaryExpr, BoundaryKind, BranchArm, LineSpan};

fn record_for(source: &SourceUnit, lines: &[(usize, u64)], branches: &[(usize, Vec<Option<u64>>)]) -> CoverageRecord {
    let mut file = FileCoverage::new("Program.cpp");
    file.lines.extend(lines.iter().copied());
    file.branches.extend(branches.iter().cloned());
    let mut raw = RawCoverage::default();
    raw.insert(file);
    rollup(source, &raw, BuildStatus::Passed, 1, None)
}

fn analyzer() -> GapAnalyzer {
    GapAnalyzer::new(StrategyConfig::default())
}

#[test]
fn straight_line_function_has_no_branch_or_path_gaps() {
    let source = unit(vec![function("get", Some("Program"), 1, 3)]);
    let record = record_for(&source, &[(1, 1), (2, 1), (3, 1)], &[]);

    let report = analyzer().analyze(&source, &record, GapContext::default());
    assert_eq!(report.count(Strategy::Branch), 0);
    assert_eq!(report.count(Strategy::Path), 0);
    assert!(!report.needs_simpler_tests);
}

#[test]
fn untaken_else_arm_yields_exactly_one_branch_gap() {
    let mut run = function("run", Some("Program"), 3, 10);
    run.complexity = 2;
    run.branch_sites.push(if_else(4, 5, Some(7)));
    let source = unit(vec![run]);
    let record = record_for(
        &source,
        &[(3, 1), (4, 1), (5, 1), (7, 0), (9, 1)],
        &[(4, vec![Some(1), Some(0)])],
    );

    let report = analyzer().analyze(&source, &record, GapContext::default());
    let branch: Vec<&GapItem> = report.by_strategy(Strategy::Branch).collect();
    assert_eq!(branch.len(), 1);
    assert_eq!(branch[0].function, "Program::run");
    assert_eq!(branch[0].line, 4);
    assert_eq!(branch[0].uncovered_arms, vec!["else".to_string()]);
    assert_eq!(report.count(Strategy::Path), 0);
}

#[test]
fn implicit_else_is_derived_from_site_hits() {
    let mut run = function("run", None, 1, 8);
    run.branch_sites.push(if_else(2, 3, None));
    let source = unit(vec![run]);

    let always_taken = record_for(&source, &[(2, 4), (3, 4), (5, 4)], &[]);
    let hits = arm_hits(&source.functions[0].branch_sites[0], &always_taken);
    assert_eq!(hits, vec![Some(4), Some(0)]);

    let sometimes = record_for(&source, &[(2, 4), (3, 1), (5, 4)], &[]);
    let hits = arm_hits(&source.functions[0].branch_sites[0], &sometimes);
    assert_eq!(hits, vec![Some(1), Some(3)]);
    let report = analyzer().analyze(&source, &sometimes, GapContext::default());
    assert_eq!(report.count(Strategy::Branch), 0);
}

#[test]
fn same_line_ternary_uses_gcov_flags_only_when_counts_match() {
    let mut pick = function("pick", None, 1, 3);
    pick.branch_sites.push(BranchSite {
        kind: BranchKind::Ternary,
        line: 2,
        condition: "a < b".to_string(),
        arms: vec![BranchArm::explicit("true", 2), BranchArm::explicit("false", 2)],
    });
    let source = unit(vec![pick]);

    let matched = record_for(&source, &[(2, 3)], &[(2, vec![Some(3), Some(0)])]);
    assert_eq!(
        arm_hits(&source.functions[0].branch_sites[0], &matched),
        vec![Some(1), Some(0)]
    );

    let mismatched = record_for(&source, &[(2, 3)], &[(2, vec![Some(3), Some(0), Some(1), None])]);
    assert_eq!(
        arm_hits(&source.functions[0].branch_sites[0], &mismatched),
        vec![None, None]
    );
    let report = analyzer().analyze(&source, &mismatched, GapContext::default());
    assert_eq!(report.count(Strategy::Branch), 0);
}

#[test]
fn loop_skip_arm_is_never_flagged_without_evidence() {
    let mut sum = function("sum", None, 1, 6);
    sum.branch_sites.push(BranchSite {
        kind: BranchKind::Loop,
        line: 2,
        condition: "int i = 0; i < n; ++i".to_string(),
        arms: vec![BranchArm::explicit("enter", 3), BranchArm::implicit("skip")],
    });
    let source = unit(vec![sum]);
    let record = record_for(&source, &[(2, 5), (3, 0)], &[(2, vec![Some(0), Some(1), Some(1)])]);
    let report = analyzer().analyze(&source, &record, GapContext::default());
    let gaps: Vec<&GapItem> = report.by_strategy(Strategy::Branch).collect();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].uncovered_arms, vec!["enter".to_string()]);
}

#[test]
fn unreached_catch_handlers_are_branch_gaps() {
    let mut parse = function("parse", Some("Parser"), 1, 10);
    parse.complexity = 3;
    parse.branch_sites.push(BranchSite {
        kind: BranchKind::Try,
        line: 2,
        condition: "const std::invalid_argument& e | ...".to_string(),
        arms: vec![
            BranchArm::explicit("catch (const std::invalid_argument& e)", 5),
            BranchArm::explicit("catch (...)", 8),
        ],
    });
    let source = unit(vec![parse]);
    let record = record_for(&source, &[(1, 2), (2, 2), (3, 2), (5, 1), (6, 1), (8, 0)], &[]);

    let report = analyzer().analyze(&source, &record, GapContext::default());
    let gaps: Vec<&GapItem> = report.by_strategy(Strategy::Branch).collect();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].line, 2);
    assert_eq!(gaps[0].uncovered_arms, vec!["catch (...)".to_string()]);
    assert!(gaps[0].description.starts_with("try at line 2"));
}

#[test]
fn complex_function_gets_path_gap_even_when_branch_complete() {
    let mut dispatch = function("dispatch", Some("Program"), 10, 40);
    dispatch.complexity = 7;
    let source = unit(vec![dispatch]);
    let lines: Vec<(usize, u64)> = (10..=40).map(|l| (l, 1)).collect();
    let record = record_for(&source, &lines, &[]);

    let report = analyzer().analyze(&source, &record, GapContext::default());
    let path: Vec<&GapItem> = report.by_strategy(Strategy::Path).collect();
    assert_eq!(path.len(), 1);
    assert_eq!(path[0].line, 10);
    assert!(path[0].impact > 0.0);
}

#[test]
fn path_threshold_is_exclusive() {
    let mut f = function("f", None, 1, 5);
    f.complexity = StrategyConfig::default().path_complexity_threshold;
    let source = unit(vec![f]);
    let record = record_for(&source, &[(1, 1)], &[]);
    let report = analyzer().analyze(&source, &record, GapContext::default());
    assert_eq!(report.count(Strategy::Path), 0);
}

#[test]
fn boundary_gaps_need_execution_and_persist_until_confirmed() {
    let mut at = function("at", None, 1, 6);
    at.boundaries = vec![
        BoundaryExpr {
            kind: BoundaryKind::Index,
            line: 3,
            text: "data_[i]".to_string(),
        },
        BoundaryExpr {
            kind: BoundaryKind::NumericComparison,
            line: 5,
            text: "i < 10".to_string(),
        },
    ];
    let source = unit(vec![at]);
    let record = record_for(&source, &[(3, 2), (5, 0)], &[]);

    let report = analyzer().analyze(&source, &record, GapContext::default());
    let lines: Vec<usize> = report.by_strategy(Strategy::Boundary).map(|g| g.line).collect();
    assert_eq!(lines, vec![3]);

    let confirmed: BTreeSet<BoundaryKey> = [("at".to_string(), 3)].into_iter().collect();
    let report = analyzer().analyze(
        &source,
        &record,
        GapContext {
            confirmed_boundaries: Some(&confirmed),
            compile_errors: None,
        },
    );
    assert_eq!(report.count(Strategy::Boundary), 0);
}

#[test]
fn boundary_gap_ranks_below_branch_gap_of_equal_size() {
    let mut run = function("run", None, 1, 10);
    run.branch_sites.push(if_else(2, 3, Some(5)));
    run.boundaries.push(BoundaryExpr {
        kind: BoundaryKind::NumericComparison,
        line: 2,
        text: "x > 0".to_string(),
    });
    let source = unit(vec![run]);
    let record = record_for(&source, &[(2, 1), (3, 1), (5, 0)], &[]);

    let report = analyzer().analyze(&source, &record, GapContext::default());
    let order: Vec<Strategy> = report.items.iter().map(|g| g.strategy).collect();
    assert_eq!(order, vec![Strategy::Branch, Strategy::Boundary]);
}

#[test]
fn tie_prefers_least_covered_function() {
    let mut covered = function("covered", None, 1, 8);
    covered.branch_sites.push(if_else(2, 3, Some(5)));
    let mut cold = function("cold", None, 10, 17);
    cold.branch_sites.push(if_else(11, 12, Some(14)));
    let source = unit(vec![covered, cold]);
    let record = record_for(
        &source,
        &[(1, 1), (2, 1), (3, 1), (5, 0), (7, 1), (11, 1), (12, 1), (14, 0), (15, 0), (16, 0)],
        &[],
    );

    let report = analyzer().analyze(&source, &record, GapContext::default());
    let names: Vec<&str> = report
        .by_strategy(Strategy::Branch)
        .map(|g| g.function.as_str())
        .collect();
    assert_eq!(names, vec!["cold", "covered"]);
}

#[test]
fn disabled_strategies_produce_nothing() {
    let mut run = function("run", None, 1, 40);
    run.complexity = 9;
    run.branch_sites.push(if_else(2, 3, Some(5)));
    let source = unit(vec![run]);
    let record = record_for(&source, &[(2, 1), (3, 1), (5, 0)], &[]);

    let config = StrategyConfig {
        branch: false,
        path: false,
        ..StrategyConfig::default()
    };
    let report = GapAnalyzer::new(config).analyze(&source, &record, GapContext::default());
    assert!(report.is_empty());
}

#[test]
fn every_gap_names_a_unit_function() {
    let mut a = function("a", Some("Program"), 1, 20);
    a.complexity = 6;
    a.branch_sites.push(if_else(2, 3, None));
    let mut b = function("b", None, 22, 30);
    b.boundaries.push(BoundaryExpr {
        kind: BoundaryKind::LengthCheck,
        line: 23,
        text: "s.empty()".to_string(),
    });
    b.span = LineSpan::new(22, 30);
    let source = unit(vec![a, b]);
    let record = record_for(&source, &[(2, 1), (3, 1), (23, 1)], &[]);

    let report = analyzer().analyze(&source, &record, GapContext::default());
    assert!(!report.is_empty());
    for gap in &report.items {
        assert!(source.function(&gap.function).is_some(), "{}", gap.function);
    }
}

#[test]
fn compile_errors_are_reclassified() {
    let source = unit(vec![function("run", None, 1, 3)]);
    let record = CoverageRecord::not_compiled(source.unit_id(), 1, 1, "x");
    let errors = "test_unit.cpp:12: error: 'class InterfaceA' has no member named 'reset'";
    let report = analyzer().analyze(
        &source,
        &record,
        GapContext {
            confirmed_boundaries: None,
            compile_errors: Some(errors),
        },
    );
    assert!(report.needs_simpler_tests);
    assert!(!needs_simpler_tests("error: expected ';' before '}' token"));
}
