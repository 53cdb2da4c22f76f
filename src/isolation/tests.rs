use super::*;
use crate::lang::common::StructureProvider;
use std::fs;
use tempfile::TempDir;

const PROGRAM_H: &str = r#"#pragma once
#include "InterfaceA.h"
#include "common.h"

class Program {
public:
    explicit Program(InterfaceA& a);
    int run(int x);
private:
    InterfaceA& a_;
};
"#;

const PROGRAM_CPP: &str = r#"#include "Program.h"
#include "Missing.h"

Program::Program(InterfaceA& a) : a_(a) {}

int Program::run(int x) {
    if (a_.start()) {
        return a_.value() + x;
    }
    return kDefault;
}
"#;

const INTERFACE_A_H: &str = r#"#pragma once
#include <string>

class InterfaceA {
public:
    InterfaceA();
    virtual ~InterfaceA();
    virtual bool start();
    int value() const;
    std::string name() const;
};
"#;

struct Project {
    _dir: TempDir,
    root: PathBuf,
    source: PathBuf,
}

fn project() -> Project {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("src");
    fs::create_dir_all(root.join("Program")).unwrap();
    fs::create_dir_all(root.join("InterfaceA")).unwrap();
    fs::write(root.join("Program/Program.h"), PROGRAM_H).unwrap();
    fs::write(root.join("Program/Program.cpp"), PROGRAM_CPP).unwrap();
    fs::write(root.join("Program/common.h"), "#pragma once\nconstexpr int kDefault = -1;\n").unwrap();
    fs::write(root.join("InterfaceA/InterfaceA.h"), INTERFACE_A_H).unwrap();
    let source = root.join("Program/Program.cpp");
    Project {
        _dir: dir,
        root,
        source,
    }
}

fn builder(project: &Project) -> (Arc<CppStructureProvider>, IsolationBuilder) {
    let provider = Arc::new(CppStructureProvider::new(vec![project.root.clone()]));
    let builder = IsolationBuilder::new(Arc::clone(&provider), project.root.join(".covforge/units"));
    (provider, builder)
}

#[test]
fn mocks_dependencies_but_never_the_target_type() {
    let project = project();
    let (provider, builder) = builder(&project);
    let unit = provider.analyze(&project.source).unwrap();
    let run = unit.function("Program::run");

    let isolation = builder.describe(&unit, run);

    assert!(isolation.is_mocked("InterfaceA"));
    assert!(!isolation.is_mocked("Program"));
    assert_eq!(isolation.target_function.as_deref(), Some("Program::run"));
    assert!(matches!(
        isolation.resolutions.get("common"),
        Some(DependencyResolution::PassThrough { .. })
    ));

    let mock = &isolation.mocks["InterfaceA"];
    assert!(mock.header_text.contains("bool start()"));
    assert!(mock.header_text.contains("int value() const"));
    assert!(!mock.header_text.contains("name()"));
}

#[test]
fn missing_dependency_header_is_a_warning_not_an_error() {
    let project = project();
    let (provider, builder) = builder(&project);
    let unit = provider.analyze(&project.source).unwrap();

    let isolation = builder.describe(&unit, None);

    assert!(isolation.is_mocked("Missing"));
    assert!(isolation.warnings.iter().any(|w| matches!(
        w,
        IterationFailure::MockIncomplete { dependency, .. } if dependency == "Missing"
    )));
}

#[test]
fn include_dirs_put_mocks_first_then_target() {
    let project = project();
    let (provider, builder) = builder(&project);
    let unit = provider.analyze(&project.source).unwrap();
    let isolation = builder.describe(&unit, None);

    let dirs = isolation.include_dirs(&[project.root.clone()]);
    assert_eq!(dirs[0], isolation.mock_dir());
    assert_eq!(dirs[1], isolation.target_dir());
    assert_eq!(dirs[2], project.root.join("Program"));
    assert_eq!(dirs.last(), Some(&project.root));
}

#[test]
fn describe_is_deterministic_per_unit() {
    let project = project();
    let (provider, builder) = builder(&project);
    let unit = provider.analyze(&project.source).unwrap();

    let first = builder.describe(&unit, None);
    let second = builder.describe(&unit, unit.function("Program::run"));

    assert_eq!(first.mocks, second.mocks);
}

#[tokio::test]
async fn materialize_purges_previous_iteration() {
    let project = project();
    let (provider, builder) = builder(&project);
    let unit = provider.analyze(&project.source).unwrap();
    let isolation = builder.describe(&unit, None);

    builder.materialize(&isolation).await.unwrap();
    let stale = isolation.build_dir().join("stale.gcda");
    fs::write(&stale, b"old").unwrap();
    fs::write(isolation.mock_dir().join("Leftover.h"), b"// old").unwrap();

    builder.materialize(&isolation).await.unwrap();

    assert!(!stale.exists());
    assert!(!isolation.mock_dir().join("Leftover.h").exists());
    assert!(isolation.mock_dir().join("InterfaceA.h").is_file());
    assert!(isolation.staged_source().is_file());
    assert_eq!(
        fs::read_to_string(isolation.target_dir().join("Program.h")).unwrap(),
        PROGRAM_H
    );
}

#[test]
fn mock_paths_stay_inside_mock_dir() {
    assert_eq!(mock_relative_path("../Other/Other.h"), PathBuf::from("Other/Other.h"));
    assert_eq!(mock_relative_path("InterfaceA.h"), PathBuf::from("InterfaceA.h"));
}
