use super::*;
use std::io::Write;
use tempfile::NamedTempFile;
use tempfile::TempDir;

const PROGRAM_GCOV: &str = "        -:    0:Source:target/Program.cpp
        -:    0:Graph:test_unit.gcno
        -:    0:Data:test_unit.gcda
        -:    0:Runs:1
        -:    1:#include \"Program.h\"
        -:    2:
function _ZN7Program3runEi called 2 returned 100% blocks executed 75%
        2:    3:int Program::run(int mode) {
        2:    4:    if (mode > 3) {
branch  0 taken 2 (fallthrough)
branch  1 taken 0
        2:    5:        return 1;
        -:    6:    } else {
    #####:    7:        return 0;
        -:    8:    }
        1*:   9:}
function _Z8identityi called 0 returned 0% blocks executed 0%
    #####:   10:int identity(int x) { return x; }
branch  0 never executed
";

#[test]
fn test_parse_gcov_lines_branches_functions() {
    let file = parse_gcov(PROGRAM_GCOV).unwrap();
    assert_eq!(file.path, PathBuf::from("target/Program.cpp"));

    let lines: Vec<(usize, u64)> = file.lines.iter().map(|(l, h)| (*l, *h)).collect();
    assert_eq!(lines, vec![(3, 2), (4, 2), (5, 2), (7, 0), (9, 1), (10, 0)]);

    assert_eq!(file.branches.get(&4), Some(&vec![Some(2), Some(0)]));
    assert_eq!(file.branches.get(&10), Some(&vec![None]));

    let run = file.functions.get("_ZN7Program3runEi").unwrap();
    assert_eq!(run.line, 3);
    assert_eq!(run.calls, 2);
    assert_eq!(file.functions.get("_Z8identityi").unwrap().calls, 0);
}

#[test]
fn test_parse_gcov_is_deterministic() {
    let first = parse_gcov(PROGRAM_GCOV).unwrap();
    let second = parse_gcov(PROGRAM_GCOV).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_parse_gcov_percent_branches() {
    let text = "        -:    0:Source:a.cpp\n        4:    2:  if (x) {\nbranch  0 taken 75%\nbranch  1 taken 0%\n";
    let file = parse_gcov(text).unwrap();
    assert_eq!(file.branches.get(&2), Some(&vec![Some(1), Some(0)]));
}

#[test]
fn test_parse_gcov_requires_source_header() {
    let err = parse_gcov("        1:    1:int x;\n").unwrap_err();
    assert!(matches!(err, CovforgeError::Parse { .. }));
}

#[test]
fn test_parse_gcov_rejects_garbage_counts() {
    let text = "        -:    0:Source:a.cpp\n      abc:    2:int x;\n";
    let err = parse_gcov(text).unwrap_err();
    match err {
        CovforgeError::Parse { line, .. } => assert_eq!(line, Some(2)),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn test_parse_lcov_records() {
    let text = "TN:\nSF:./src/Program.cpp\nFN:3,_ZN7Program3runEi\nFNDA:2,_ZN7Program3runEi\nDA:3,2\nDA:4,2\nDA:7,0\nBRDA:4,0,0,2\nBRDA:4,0,1,-\nend_of_record\n";
    let files = parse_lcov(text).unwrap();
    assert_eq!(files.len(), 1);

    let file = &files[0];
    assert_eq!(file.path, PathBuf::from("src/Program.cpp"));
    assert_eq!(file.lines.get(&7), Some(&0));
    assert_eq!(file.branches.get(&4), Some(&vec![Some(2), None]));
    assert_eq!(
        file.functions.get("_ZN7Program3runEi"),
        Some(&FunctionHits { line: 3, calls: 2 })
    );
}

#[test]
fn test_parse_cobertura_with_conditions() {
    let xml = r#"<?xml version="1.0" ?>
<coverage line-rate="0.5" branch-rate="0.5">
  <packages><package name="src"><classes>
    <class name="Program_cpp" filename="src/Program.cpp">
      <methods>
        <method name="Program::run(int)"><lines><line number="3" hits="2"/></lines></method>
      </methods>
      <lines>
        <line number="3" hits="2" branch="false"/>
        <line number="4" hits="2" branch="true" condition-coverage="50% (1/2)"/>
        <line number="7" hits="0" branch="false"/>
      </lines>
    </class>
  </classes></package></packages>
</coverage>"#;
    let files = parse_cobertura(xml.as_bytes()).unwrap();
    assert_eq!(files.len(), 1);
    let file = &files[0];
    assert_eq!(file.lines.len(), 3);
    assert_eq!(file.branches.get(&4), Some(&vec![Some(1), Some(0)]));
    assert_eq!(file.functions.get("Program::run(int)").map(|f| f.line), Some(3));
}

#[test]
fn test_parse_report_detects_formats() {
    let mut lcov = NamedTempFile::new().unwrap();
    writeln!(lcov, "TN:\nSF:a.cpp\nDA:1,1\nend_of_record").unwrap();
    let (format, files) = parse_report(lcov.path()).unwrap();
    assert_eq!(format, CoverageFormat::Lcov);
    assert_eq!(files.len(), 1);

    let mut unknown = NamedTempFile::new().unwrap();
    writeln!(unknown, "nothing to see").unwrap();
    assert!(parse_report(unknown.path()).is_err());
}

#[test]
fn test_parse_gcov_dir_merges_in_path_order() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("b.cpp.gcov"), PROGRAM_GCOV).unwrap();
    std::fs::write(
        dir.path().join("a.cpp.gcov"),
        "        -:    0:Source:tests/test_unit.cpp\n        1:    5:TEST(A, B) {}\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let raw = parse_gcov_dir(dir.path()).unwrap();
    assert_eq!(raw.files.len(), 2);
    assert!(raw.file_for(Path::new("src/Program/Program.cpp")).is_some());
    assert!(raw.file_for(Path::new("Missing.cpp")).is_none());
}
