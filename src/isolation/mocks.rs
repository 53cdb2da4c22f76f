//! Mock header synthesis.
//!
//! A mock is a compilable stand-in for one dependency type. Member signatures
//! come from the real header when it can be parsed; otherwise they are inferred
//! from how the target source calls the type. Every member body is record-only:
//! it bumps a per-member call counter and returns a value-initialised result.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::lang::common::{CallSite, Dependency, SourceUnit};
use crate::lang::cpp::{ClassDecl, HeaderDeclarations, MethodDecl};

/// Namespace for helper types emitted into inferred mocks
const SUPPORT_NAMESPACE: &str = "covforge_mock";

/// A member the target source invokes on a dependency
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequiredMember {
    pub name: String,
    pub arg_count: usize,
    pub uses_result: bool,
}

/// How a mock member's signature was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureSource {
    /// Copied from the real header
    Declared,
    /// Guessed from call sites
    Inferred,
}

/// One member of a mock class
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MockMember {
    pub name: String,
    /// `None` for constructors
    pub return_type: Option<String>,
    /// Parameter list including parentheses
    pub params: String,
    pub qualifiers: String,
    pub is_static: bool,
    pub source: SignatureSource,
}

/// Synthesized, compilable substitute for one dependency type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockSpec {
    pub type_name: String,
    /// Include spelling the mock answers to, e.g. `InterfaceA.h`
    pub include: String,
    pub members: Vec<MockMember>,
    pub header_text: String,
    /// blake3 of the dependency signature this mock was built from
    pub fingerprint: String,
    /// Why the mock may not satisfy the target, when it might not
    pub incomplete_reason: Option<String>,
}

impl MockSpec {
    pub fn is_complete(&self) -> bool {
        self.incomplete_reason.is_none()
    }
}

/// Everything that determines a mock's text
#[derive(Debug, Clone, Serialize)]
pub struct MockInputs<'a> {
    pub dependency: &'a Dependency,
    pub required: &'a BTreeSet<RequiredMember>,
    /// Declarations of the real header, when it was found
    pub real: Option<&'a HeaderDeclarations>,
    /// The real header could not be located at all
    pub header_missing: bool,
}

impl MockInputs<'_> {
    /// Deterministic digest keying the per-unit mock cache
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.dependency.type_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.dependency.include.as_bytes());
        for member in self.required {
            hasher.update(
                format!("\0{}:{}:{}", member.name, member.arg_count, member.uses_result).as_bytes(),
            );
        }
        if let Some(real) = self.real {
            if let Ok(bytes) = serde_json::to_vec(real) {
                hasher.update(&bytes);
            }
        }
        hasher.update(if self.header_missing { b"missing" } else { b"present" });
        hasher.finalize().to_hex().to_string()
    }
}

/// Members of `type_name` invoked by `unit`, found through its field,
/// parameter and local bindings.
pub fn required_members(unit: &SourceUnit, type_name: &str) -> BTreeSet<RequiredMember> {
    let receivers: BTreeSet<&str> = unit
        .bindings
        .iter()
        .filter(|(_, bound)| bound.as_str() == type_name)
        .map(|(name, _)| name.as_str())
        .collect();

    unit.functions
        .iter()
        .flat_map(|f| f.calls.iter())
        .filter(|call| receivers.contains(receiver_root(call)))
        .map(|call| RequiredMember {
            name: call.method.clone(),
            arg_count: call.arg_count,
            uses_result: call.uses_result,
        })
        .collect()
}

/// `this->a_` → `a_`, `a_` → `a_`
fn receiver_root(call: &CallSite) -> &str {
    call.receiver
        .strip_prefix("this->")
        .unwrap_or(&call.receiver)
        .trim_start_matches(['*', '&', '('])
        .trim_end_matches(')')
}

/// Build the mock for one dependency.
pub fn synthesize(inputs: &MockInputs<'_>) -> MockSpec {
    let type_name = inputs.dependency.type_name.as_str();
    let class = inputs.real.and_then(|decls| decls.class(type_name));
    let mut reasons: Vec<String> = Vec::new();

    if inputs.header_missing {
        reasons.push("real header not found; signatures inferred from call sites".to_string());
    }
    if inputs.real.is_some_and(|d| d.macro_heavy) {
        reasons.push("header relies on function-like macros or failed to parse".to_string());
    }
    if class.is_some_and(|c| c.is_template) {
        reasons.push(format!("{type_name} is a class template"));
    }

    let mut members: BTreeSet<MockMember> = BTreeSet::new();
    if let Some(class) = class {
        members.extend(
            class
                .methods
                .iter()
                .filter(|m| m.return_type.is_none())
                .map(|m| declared(m)),
        );
    }

    let mut by_name: BTreeMap<&str, Vec<&RequiredMember>> = BTreeMap::new();
    for member in inputs.required {
        by_name.entry(member.name.as_str()).or_default().push(member);
    }
    for (name, uses) in by_name {
        let declared_overloads: Vec<&MethodDecl> = class
            .map(|c| {
                c.methods
                    .iter()
                    .filter(|m| m.name == name && m.return_type.is_some())
                    .collect()
            })
            .unwrap_or_default();
        if declared_overloads.is_empty() {
            if class.is_some() {
                reasons.push(format!("{type_name}::{name} is not declared in the real class"));
            }
            let uses_result = uses.iter().any(|u| u.uses_result);
            members.insert(inferred(name, uses_result));
        } else {
            members.extend(declared_overloads.into_iter().map(declared));
        }
    }

    let includes: Vec<String> = inputs
        .real
        .map(|d| {
            d.includes
                .iter()
                .filter(|line| !line.contains(&format!("\"{}\"", inputs.dependency.include)))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let members: Vec<MockMember> = members.into_iter().collect();
    let keyword = class.map_or("class", |c: &ClassDecl| c.keyword.as_str());
    let header_text = render(type_name, keyword, &includes, &members);

    MockSpec {
        type_name: type_name.to_string(),
        include: inputs.dependency.include.clone(),
        members,
        header_text,
        fingerprint: inputs.fingerprint(),
        incomplete_reason: (!reasons.is_empty()).then(|| reasons.join("; ")),
    }
}

fn declared(method: &MethodDecl) -> MockMember {
    MockMember {
        name: method.name.clone(),
        return_type: method.return_type.clone(),
        params: method.params.clone(),
        qualifiers: strip_pure(&method.qualifiers),
        is_static: method.is_static,
        source: SignatureSource::Declared,
    }
}

fn inferred(name: &str, uses_result: bool) -> MockMember {
    MockMember {
        name: name.to_string(),
        return_type: Some(if uses_result {
            format!("{SUPPORT_NAMESPACE}::AnyValue")
        } else {
            "void".to_string()
        }),
        params: "(Args&&...)".to_string(),
        qualifiers: " const".to_string(),
        is_static: false,
        source: SignatureSource::Inferred,
    }
}

/// Drop `= 0`, `override` and `final`; the mock is a concrete standalone class
fn strip_pure(qualifiers: &str) -> String {
    let kept: Vec<&str> = qualifiers
        .split_whitespace()
        .filter(|t| !matches!(*t, "=" | "0" | "override" | "final" | "=0"))
        .collect();
    if kept.is_empty() {
        String::new()
    } else {
        format!(" {}", kept.join(" "))
    }
}

fn counter_name(member: &str) -> String {
    let ident: String = member
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("calls_{ident}")
}

fn render(type_name: &str, keyword: &str, includes: &[String], members: &[MockMember]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// Mock of {type_name} generated by covforge");
    out.push_str("#pragma once\n\n");
    out.push_str("#include <type_traits>\n");
    for include in includes {
        let _ = writeln!(out, "{include}");
    }
    out.push('\n');

    if members.iter().any(|m| m.source == SignatureSource::Inferred) {
        let _ = writeln!(out, "#ifndef COVFORGE_MOCK_ANY_VALUE");
        let _ = writeln!(out, "#define COVFORGE_MOCK_ANY_VALUE");
        let _ = writeln!(out, "namespace {SUPPORT_NAMESPACE} {{");
        out.push_str("struct AnyValue {\n");
        out.push_str("    template <typename T>\n");
        out.push_str("    operator T() const { return T{}; }\n");
        out.push_str("};\n");
        let _ = writeln!(out, "}} // namespace {SUPPORT_NAMESPACE}");
        out.push_str("#endif\n\n");
    }

    let _ = writeln!(out, "{keyword} {type_name} {{");
    out.push_str("public:\n");

    let counters: BTreeSet<String> = members.iter().map(|m| counter_name(&m.name)).collect();
    for member in members {
        let counter = counter_name(&member.name);
        match (&member.return_type, member.source) {
            (None, _) => {
                let _ = writeln!(out, "    {type_name}{} {{ ++{counter}; }}", member.params);
            }
            (Some(ret), SignatureSource::Inferred) => {
                out.push_str("    template <typename... Args>\n");
                let body = if ret == "void" {
                    format!("{{ ++{counter}; }}")
                } else {
                    format!("{{ ++{counter}; return {{}}; }}")
                };
                let _ = writeln!(
                    out,
                    "    {ret} {}{}{} {body}",
                    member.name, member.params, member.qualifiers
                );
            }
            (Some(ret), SignatureSource::Declared) => {
                let prefix = if member.is_static { "static " } else { "" };
                let body = return_body(ret, &counter);
                let _ = writeln!(
                    out,
                    "    {prefix}{ret} {}{}{} {body}",
                    member.name, member.params, member.qualifiers
                );
            }
        }
    }

    if !counters.is_empty() {
        out.push('\n');
        for counter in &counters {
            let _ = writeln!(out, "    static inline int {counter} = 0;");
        }
    }
    out.push_str("};\n");
    out
}

fn return_body(return_type: &str, counter: &str) -> String {
    let trimmed = return_type.trim();
    if trimmed == "void" {
        format!("{{ ++{counter}; }}")
    } else if trimmed.ends_with('&') {
        format!(
            "{{ ++{counter}; static std::remove_cv_t<std::remove_reference_t<{trimmed}>> value{{}}; return value; }}"
        )
    } else {
        format!("{{ ++{counter}; return {{}}; }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::cpp::CppStructureProvider;

    const REAL_INTERFACE_A: &str = r#"
#pragma once
#include <string>
#include "common.h"

class InterfaceA {
public:
    InterfaceA();
    explicit InterfaceA(int seed);
    virtual ~InterfaceA();
    virtual bool start() = 0;
    int value() const;
    static InterfaceA& instance();
    void unused(double d);
private:
    int state_;
};
"#;

    fn dependency() -> Dependency {
        Dependency {
            type_name: "InterfaceA".to_string(),
            include: "InterfaceA.h".to_string(),
        }
    }

    fn required(names: &[(&str, usize, bool)]) -> BTreeSet<RequiredMember> {
        names
            .iter()
            .map(|(name, arg_count, uses_result)| RequiredMember {
                name: (*name).to_string(),
                arg_count: *arg_count,
                uses_result: *uses_result,
            })
            .collect()
    }

    #[test]
    fn declared_signatures_are_copied_for_invoked_members_only() {
        let decls = CppStructureProvider::default()
            .parse_header(REAL_INTERFACE_A)
            .unwrap();
        let dep = dependency();
        let req = required(&[("start", 0, true), ("value", 0, true)]);
        let mock = synthesize(&MockInputs {
            dependency: &dep,
            required: &req,
            real: Some(&decls),
            header_missing: false,
        });

        assert!(mock.is_complete(), "{:?}", mock.incomplete_reason);
        assert!(mock.header_text.contains("#pragma once"));
        assert!(mock.header_text.contains("#include <string>"));
        assert!(mock.header_text.contains("bool start() { ++calls_start; return {}; }"));
        assert!(mock.header_text.contains("int value() const"));
        assert!(mock.header_text.contains("explicit") || mock.header_text.contains("InterfaceA(int seed)"));
        assert!(!mock.header_text.contains("unused"));
        // no pure-virtual stand-ins; the only `= 0;` lines are call counters
        assert!(!mock.header_text.contains(") = 0"));
        assert!(mock
            .header_text
            .lines()
            .filter(|line| line.trim_end().ends_with("= 0;"))
            .all(|line| line.contains("static inline int calls_")));
        assert!(mock.members.iter().all(|m| m.source == SignatureSource::Declared));
    }

    #[test]
    fn missing_header_infers_members_and_is_incomplete() {
        let dep = dependency();
        let req = required(&[("status", 1, true), ("reset", 0, false)]);
        let mock = synthesize(&MockInputs {
            dependency: &dep,
            required: &req,
            real: None,
            header_missing: true,
        });

        assert!(!mock.is_complete());
        assert!(mock.header_text.contains("covforge_mock::AnyValue status(Args&&...) const"));
        assert!(mock.header_text.contains("void reset(Args&&...) const"));
        assert!(mock.header_text.contains("static inline int calls_reset = 0;"));
    }

    #[test]
    fn template_dependency_is_incomplete() {
        let decls = CppStructureProvider::default()
            .parse_header("template <typename T>\nclass InterfaceA {\npublic:\n    T get() const;\n};\n")
            .unwrap();
        let dep = dependency();
        let req = required(&[("get", 0, true)]);
        let mock = synthesize(&MockInputs {
            dependency: &dep,
            required: &req,
            real: Some(&decls),
            header_missing: false,
        });
        assert!(mock.incomplete_reason.as_deref().unwrap().contains("template"));
    }

    #[test]
    fn synthesis_is_deterministic() {
        let decls = CppStructureProvider::default()
            .parse_header(REAL_INTERFACE_A)
            .unwrap();
        let dep = dependency();
        let req = required(&[("value", 0, true), ("start", 0, false)]);
        let inputs = MockInputs {
            dependency: &dep,
            required: &req,
            real: Some(&decls),
            header_missing: false,
        };
        let a = synthesize(&inputs);
        let b = synthesize(&inputs);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint, inputs.fingerprint());
    }

    #[test]
    fn reference_returns_use_static_storage() {
        let body = return_body("InterfaceA&", "calls_instance");
        assert!(body.contains("static std::remove_cv_t<std::remove_reference_t<InterfaceA&>> value{}"));
        assert_eq!(return_body("void", "c"), "{ ++c; }");
    }

    #[test]
    fn strip_pure_drops_pure_and_override() {
        assert_eq!(strip_pure(" const = 0"), " const");
        assert_eq!(strip_pure(" override"), "");
    }
}
