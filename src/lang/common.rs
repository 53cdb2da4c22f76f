//! Source structure model shared by the isolation builder, the coverage
//! rollup and the gap analyzer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;

/// Inclusive 1-based line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineSpan {
    /// First line (1-based)
    pub start: usize,
    /// Last line (1-based, inclusive)
    pub end: usize,
}

impl LineSpan {
    /// Create a new span, normalising reversed bounds
    pub fn new(start: usize, end: usize) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Whether `line` falls inside the span
    pub fn contains(&self, line: usize) -> bool {
        (self.start..=self.end).contains(&line)
    }

    /// Number of lines covered by the span
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Spans always hold at least one line
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Kind of control-flow construct with alternative arms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKind {
    /// `if` / `else`
    If,
    /// `switch` with `case` / `default` labels
    Switch,
    /// `cond ? a : b`
    Ternary,
    /// `for`, `while`, `do` and range-for loops
    Loop,
    /// `try` block, one arm per `catch` handler
    Try,
}

/// One alternative of a branch site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchArm {
    /// Arm label (`then`, `else`, `case 3`, `default`, `true`, `enter`, `catch (...)`)
    pub label: String,
    /// First line of the arm body, when the arm is spelled out in source
    pub line: Option<usize>,
}

impl BranchArm {
    /// An arm with a body starting on `line`
    pub fn explicit(label: impl Into<String>, line: usize) -> Self {
        Self {
            label: label.into(),
            line: Some(line),
        }
    }

    /// An arm with no source of its own (missing `else`, missing `default`, loop skip)
    pub fn implicit(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            line: None,
        }
    }

    /// True when the arm has no body in source
    pub fn is_implicit(&self) -> bool {
        self.line.is_none()
    }
}

/// A conditional, switch, ternary, loop or try block inside a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSite {
    /// Construct kind
    pub kind: BranchKind,
    /// Line holding the condition
    pub line: usize,
    /// Normalised condition text
    pub condition: String,
    /// Alternatives in source order
    pub arms: Vec<BranchArm>,
}

/// Class of boundary-sensitive expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    /// `a[i]`
    Index,
    /// `x < 10`, `n >= 0`
    NumericComparison,
    /// `s.size()`, `v.length()`, `c.empty()`
    LengthCheck,
}

/// An expression whose behaviour differs at boundary values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundaryExpr {
    /// Expression class
    pub kind: BoundaryKind,
    /// Line of the expression
    pub line: usize,
    /// Normalised expression text
    pub text: String,
}

/// Formal parameter of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Declared type as written
    pub type_name: String,
    /// Parameter name, when given
    pub name: Option<String>,
}

/// A member call `receiver.method(..)` or `receiver->method(..)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallSite {
    /// Receiver expression (usually a field or parameter name)
    pub receiver: String,
    /// Called member name
    pub method: String,
    /// Number of arguments at the call
    pub arg_count: usize,
    /// Line of the call
    pub line: usize,
    /// True when the result is used as a value
    pub uses_result: bool,
}

/// A function or member function defined in a source unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Unqualified name
    pub name: String,
    /// Enclosing class for member functions
    pub class: Option<String>,
    /// Declared return type (`void` for constructors)
    pub return_type: String,
    /// Formal parameters
    pub params: Vec<Parameter>,
    /// Full definition span
    pub span: LineSpan,
    /// Body span (`{` to `}`)
    pub body: LineSpan,
    /// Branch sites in source order
    pub branch_sites: Vec<BranchSite>,
    /// Cyclomatic complexity: 1 + decision points
    pub complexity: u32,
    /// Boundary-sensitive expressions
    pub boundaries: Vec<BoundaryExpr>,
    /// Member calls on other objects
    pub calls: Vec<CallSite>,
    /// Number of lines in the body
    pub size_lines: usize,
}

impl Function {
    /// `Class::name` or `name`
    pub fn qualified_name(&self) -> String {
        match &self.class {
            Some(class) => format!("{class}::{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Total number of branch arms across all sites
    pub fn branch_count(&self) -> usize {
        self.branch_sites.iter().map(|site| site.arms.len()).sum()
    }

    /// Whether this function has no alternative control flow
    pub fn is_straight_line(&self) -> bool {
        self.branch_sites.is_empty() && self.complexity <= 1
    }
}

/// A dependency named by a quoted `#include`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dependency {
    /// Type name the header is expected to declare (the header stem)
    pub type_name: String,
    /// Include spelling, e.g. `InterfaceA.h`
    pub include: String,
}

/// A parsed source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnit {
    /// Source file path
    pub path: PathBuf,
    /// The target's own header, if one was found
    pub header: Option<PathBuf>,
    /// Type implemented by this unit (the file stem)
    pub target_type: String,
    /// Functions in source order
    pub functions: Vec<Function>,
    /// Quoted includes other than the target's own header
    pub dependencies: BTreeSet<Dependency>,
    /// Field, parameter and local names mapped to their declared type names
    pub bindings: BTreeMap<String, String>,
    /// blake3 digest of the source and header contents
    pub fingerprint: String,
}

impl SourceUnit {
    /// Find a function by qualified or plain name
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions
            .iter()
            .find(|f| f.qualified_name() == name)
            .or_else(|| self.functions.iter().find(|f| f.name == name))
    }

    /// The function whose span contains `line`
    pub fn function_at_line(&self, line: usize) -> Option<&Function> {
        self.functions.iter().find(|f| f.span.contains(line))
    }

    /// Stable identifier for build directories and journal records
    pub fn unit_id(&self) -> String {
        let stem = self.target_type.as_str();
        let digest = blake3::hash(self.path.to_string_lossy().as_bytes());
        format!("{stem}-{}", &digest.to_hex()[..12])
    }

    /// Whether `type_name` refers to the unit's own type
    pub fn is_target_type(&self, type_name: &str) -> bool {
        type_name == self.target_type
    }
}

/// Extracts [`SourceUnit`] structure from a file on disk.
///
/// Implementations must be deterministic for a given file content.
pub trait StructureProvider: Send + Sync {
    /// Parse (or fetch from cache) the unit at `path`
    fn analyze(&self, path: &Path) -> Result<Arc<SourceUnit>>;
}

/// Strip whitespace runs from expression text so it is stable across formatting.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip qualifiers, references and pointers from a declared type: `const Foo&` → `Foo`.
pub fn base_type_name(type_text: &str) -> String {
    let without_template = match type_text.find('<') {
        Some(idx) => &type_text[..idx],
        None => type_text,
    };
    let cleaned: String = without_template
        .replace(['&', '*'], " ")
        .split_whitespace()
        .filter(|token| !matches!(*token, "const" | "volatile" | "struct" | "class" | "mutable"))
        .collect::<Vec<_>>()
        .join(" ");
    match cleaned.rsplit("::").next() {
        Some(last) => last.trim().to_string(),
        None => cleaned,
    }
}
