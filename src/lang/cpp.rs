//! C++ structure extraction with tree-sitter.
//!
//! [`CppStructureProvider`] turns a `.cpp` file (plus its header, when one can
//! be found) into a [`SourceUnit`]: functions with their branch sites,
//! cyclomatic complexity, boundary-sensitive expressions and member calls, and
//! the quoted includes that the isolation builder later replaces with mocks.
//! Parsed units are cached and reused until the file's modification time or
//! content digest changes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use tree_sitter::{Language, Node, Parser, Tree};

use super::common::{
    base_type_name, normalize_text, BoundaryExpr, BoundaryKind, BranchArm, BranchKind,
    BranchSite, CallSite, Dependency, Function, LineSpan, Parameter, SourceUnit,
    StructureProvider,
};
use crate::core::errors::{CovforgeError, Result};

/// Header extensions searched next to a source file and on the include roots.
pub const HEADER_EXTENSIONS: &[&str] = &["h", "hpp", "hh", "hxx"];

const RELATIONAL_OPERATORS: &[&str] = &["<", "<=", ">", ">=", "==", "!="];
const LENGTH_METHODS: &[&str] = &["size", "length", "empty"];

/// Create a parser configured for C++
pub fn create_cpp_parser() -> Result<Parser> {
    let language: Language = tree_sitter_cpp::LANGUAGE.into();
    let mut parser = Parser::new();
    parser.set_language(&language).map_err(|e| {
        CovforgeError::parse("cpp", format!("Failed to load C++ grammar: {e}"))
    })?;
    Ok(parser)
}

fn parse_tree(source: &str) -> Result<Tree> {
    let mut parser = create_cpp_parser()?;
    parser
        .parse(source, None)
        .ok_or_else(|| CovforgeError::parse("cpp", "Failed to parse C++ source code"))
}

fn node_text<'a>(node: &Node, source: &'a str) -> Result<&'a str> {
    node.utf8_text(source.as_bytes()).map_err(|e| CovforgeError::parse("cpp", e.to_string()))
}

fn line_of(node: &Node) -> usize {
    node.start_position().row + 1
}

fn find_child_by_kind<'a>(node: &Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).find(|child| child.kind() == kind);
    found
}

/// Member function declared in a header, as needed for a signature-compatible stand-in
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodDecl {
    /// Member name
    pub name: String,
    /// Return type; `None` for constructors
    pub return_type: Option<String>,
    /// Parameter list text including parentheses
    pub params: String,
    /// Trailing qualifiers such as ` const`
    pub qualifiers: String,
    /// Declared `static`
    pub is_static: bool,
    /// Declared `virtual`
    pub is_virtual: bool,
}

/// Class declared in a header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDecl {
    /// Class name
    pub name: String,
    /// `class` or `struct`
    pub keyword: String,
    /// Member functions, constructors included
    pub methods: Vec<MethodDecl>,
    /// Class template
    pub is_template: bool,
}

/// Declarations extracted from a dependency header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderDeclarations {
    /// `#include` lines as written
    pub includes: Vec<String>,
    /// Classes and structs in declaration order
    pub classes: Vec<ClassDecl>,
    /// Function-like macros or parse errors make the header unreliable
    pub macro_heavy: bool,
}

impl HeaderDeclarations {
    /// Class with the given name
    pub fn class(&self, name: &str) -> Option<&ClassDecl> {
        self.classes.iter().find(|c| c.name == name)
    }
}

struct CachedUnit {
    modified: Option<SystemTime>,
    digest: String,
    unit: Arc<SourceUnit>,
}

/// Tree-sitter backed [`StructureProvider`] for C++ translation units
pub struct CppStructureProvider {
    include_roots: Vec<PathBuf>,
    cache: DashMap<PathBuf, CachedUnit>,
}

impl Default for CppStructureProvider {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl CppStructureProvider {
    /// Create a provider that looks for headers next to sources and on `include_roots`
    pub fn new(include_roots: Vec<PathBuf>) -> Self {
        Self {
            include_roots,
            cache: DashMap::new(),
        }
    }

    /// Number of cached units
    pub fn cached_units(&self) -> usize {
        self.cache.len()
    }

    /// Locate the header declaring `stem`, first beside `near`, then on the include roots
    pub fn locate_header(&self, stem: &str, near: Option<&Path>) -> Option<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        if let Some(dir) = near {
            dirs.push(dir.to_path_buf());
        }
        dirs.extend(self.include_roots.iter().cloned());

        for dir in dirs {
            for ext in HEADER_EXTENSIONS {
                let candidate = dir.join(format!("{stem}.{ext}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
            // Project layouts frequently keep each type in its own directory
            for ext in HEADER_EXTENSIONS {
                let candidate = dir.join(stem).join(format!("{stem}.{ext}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Resolve a quoted include spelling against the including file's directory and the include roots
    pub fn resolve_include(&self, include: &str, including_dir: Option<&Path>) -> Option<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        if let Some(dir) = including_dir {
            dirs.push(dir.to_path_buf());
        }
        dirs.extend(self.include_roots.iter().cloned());
        dirs.into_iter()
            .map(|dir| dir.join(include))
            .find(|candidate| candidate.is_file())
            .or_else(|| {
                let stem = Path::new(include).file_stem()?.to_str()?;
                self.locate_header(stem, None)
            })
    }

    /// Parse a source file from text. `header` is the target's own header, if known.
    pub fn analyze_source(
        &self,
        path: &Path,
        source: &str,
        header: Option<(&Path, &str)>,
    ) -> Result<SourceUnit> {
        let target_type = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                CovforgeError::parse_with_location(
                    "cpp",
                    "Source path has no file name",
                    path.display().to_string(),
                    None,
                )
            })?
            .to_string();

        let tree = parse_tree(source)?;
        let root = tree.root_node();

        let mut dependencies = BTreeSet::new();
        let mut bindings = BTreeMap::new();
        collect_includes(&root, source, &target_type, &mut dependencies)?;

        if let Some((_, header_source)) = header {
            let header_tree = parse_tree(header_source)?;
            let header_root = header_tree.root_node();
            collect_includes(&header_root, header_source, &target_type, &mut dependencies)?;
            collect_field_bindings(&header_root, header_source, &mut bindings)?;
        }
        collect_field_bindings(&root, source, &mut bindings)?;

        let mut functions = Vec::new();
        collect_functions(&root, source, &mut functions)?;
        for function in &functions {
            for param in &function.params {
                if let Some(name) = &param.name {
                    bindings
                        .entry(name.clone())
                        .or_insert_with(|| base_type_name(&param.type_name));
                }
            }
        }
        collect_local_bindings(&root, source, &mut bindings)?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(source.as_bytes());
        if let Some((_, header_source)) = header {
            hasher.update(header_source.as_bytes());
        }

        Ok(SourceUnit {
            path: path.to_path_buf(),
            header: header.map(|(p, _)| p.to_path_buf()),
            target_type,
            functions,
            dependencies,
            bindings,
            fingerprint: hasher.finalize().to_hex().to_string(),
        })
    }

    /// Extract class and include declarations from header text
    pub fn parse_header(&self, source: &str) -> Result<HeaderDeclarations> {
        let tree = parse_tree(source)?;
        let root = tree.root_node();
        let mut decls = HeaderDeclarations {
            macro_heavy: root.has_error(),
            ..HeaderDeclarations::default()
        };

        let mut stack = vec![(root, false)];
        while let Some((node, in_template)) = stack.pop() {
            match node.kind() {
                "preproc_include" => {
                    decls.includes.push(normalize_text(node_text(&node, source)?));
                    continue;
                }
                "preproc_function_def" => decls.macro_heavy = true,
                "class_specifier" | "struct_specifier" => {
                    if let Some(class) = class_declaration(&node, source, in_template)? {
                        decls.classes.push(class);
                    }
                    continue;
                }
                _ => {}
            }

            let template = in_template || node.kind() == "template_declaration";
            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).collect();
            for child in children.into_iter().rev() {
                stack.push((child, template));
            }
        }

        Ok(decls)
    }

    fn read_with_header(&self, path: &Path) -> Result<(String, Option<(PathBuf, String)>)> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            CovforgeError::io(format!("Failed to read source file: {}", path.display()), e)
        })?;
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let header = match self.locate_header(stem, path.parent()) {
            Some(header_path) => {
                let text = std::fs::read_to_string(&header_path).map_err(|e| {
                    CovforgeError::io(
                        format!("Failed to read header file: {}", header_path.display()),
                        e,
                    )
                })?;
                Some((header_path, text))
            }
            None => None,
        };
        Ok((source, header))
    }
}

impl StructureProvider for CppStructureProvider {
    fn analyze(&self, path: &Path) -> Result<Arc<SourceUnit>> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        let (source, header) = self.read_with_header(path)?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(source.as_bytes());
        if let Some((_, text)) = &header {
            hasher.update(text.as_bytes());
        }
        let digest = hasher.finalize().to_hex().to_string();

        if let Some(cached) = self.cache.get(path) {
            if cached.modified == modified && cached.digest == digest {
                debug!(path = %path.display(), "structure cache hit");
                return Ok(Arc::clone(&cached.unit));
            }
        }

        let header_ref = header.as_ref().map(|(p, t)| (p.as_path(), t.as_str()));
        let unit = Arc::new(self.analyze_source(path, &source, header_ref)?);
        debug!(
            path = %path.display(),
            functions = unit.functions.len(),
            dependencies = unit.dependencies.len(),
            "parsed source unit"
        );
        self.cache.insert(
            path.to_path_buf(),
            CachedUnit {
                modified,
                digest,
                unit: Arc::clone(&unit),
            },
        );
        Ok(unit)
    }
}

fn collect_includes(
    root: &Node,
    source: &str,
    target_type: &str,
    out: &mut BTreeSet<Dependency>,
) -> Result<()> {
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        if node.kind() == "preproc_include" {
            if let Some(path_node) = node.child_by_field_name("path") {
                if path_node.kind() == "string_literal" {
                    let include = node_text(&path_node, source)?.trim_matches('"').to_string();
                    let stem = Path::new(&include)
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or_default()
                        .to_string();
                    if !stem.is_empty() && stem != target_type {
                        out.insert(Dependency {
                            type_name: stem,
                            include,
                        });
                    }
                }
            }
            continue;
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if !is_function_node(&child) {
                stack.push(child);
            }
        }
    }
    Ok(())
}

fn last_named_child<'a>(node: &Node<'a>) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    let last = node.named_children(&mut cursor).last();
    last
}

fn is_function_node(node: &Node) -> bool {
    node.kind() == "function_definition"
}

/// Name carried by a (possibly nested) declarator, plus the pointer/reference suffix it adds.
fn declarator_name(node: &Node, source: &str) -> Result<(Option<String>, String)> {
    match node.kind() {
        "identifier" | "field_identifier" => Ok((Some(node_text(node, source)?.to_string()), String::new())),
        "pointer_declarator" | "reference_declarator" | "array_declarator" | "init_declarator" => {
            let suffix = match node.kind() {
                "pointer_declarator" => "*",
                "reference_declarator" => "&",
                "array_declarator" => "[]",
                _ => "",
            };
            let inner = node
                .child_by_field_name("declarator")
                .or_else(|| last_named_child(node));
            match inner {
                Some(inner) if inner.id() != node.id() => {
                    let (name, inner_suffix) = declarator_name(&inner, source)?;
                    Ok((name, format!("{suffix}{inner_suffix}")))
                }
                _ => Ok((None, suffix.to_string())),
            }
        }
        _ => Ok((None, String::new())),
    }
}

fn collect_field_bindings(
    root: &Node,
    source: &str,
    out: &mut BTreeMap<String, String>,
) -> Result<()> {
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        if node.kind() == "field_declaration" {
            if let (Some(type_node), Some(decl)) = (
                node.child_by_field_name("type"),
                node.child_by_field_name("declarator"),
            ) {
                if decl.kind() != "function_declarator" {
                    let (name, _) = declarator_name(&decl, source)?;
                    if let Some(name) = name {
                        out.insert(name, base_type_name(node_text(&type_node, source)?));
                    }
                }
            }
            continue;
        }
        if is_function_node(&node) {
            continue;
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            stack.push(child);
        }
    }
    Ok(())
}

fn collect_local_bindings(
    root: &Node,
    source: &str,
    out: &mut BTreeMap<String, String>,
) -> Result<()> {
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        if node.kind() == "declaration" {
            if let Some(type_node) = node.child_by_field_name("type") {
                let type_name = base_type_name(node_text(&type_node, source)?);
                let mut cursor = node.walk();
                for decl in node.children_by_field_name("declarator", &mut cursor) {
                    if decl.kind() == "function_declarator" {
                        continue;
                    }
                    if let (Some(name), _) = declarator_name(&decl, source)? {
                        out.entry(name).or_insert_with(|| type_name.clone());
                    }
                }
            }
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            stack.push(child);
        }
    }
    Ok(())
}

fn find_function_declarator<'a>(node: &Node<'a>) -> Option<Node<'a>> {
    let mut current = node.child_by_field_name("declarator")?;
    loop {
        if current.kind() == "function_declarator" {
            return Some(current);
        }
        current = current
            .child_by_field_name("declarator")
            .or_else(|| find_child_by_kind(&current, "function_declarator"))?;
    }
}

fn enclosing_class(node: &Node, source: &str) -> Result<Option<String>> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if matches!(parent.kind(), "class_specifier" | "struct_specifier") {
            if let Some(name) = parent.child_by_field_name("name") {
                return Ok(Some(node_text(&name, source)?.to_string()));
            }
        }
        current = parent.parent();
    }
    Ok(None)
}

fn function_name(declarator: &Node, source: &str) -> Result<Option<(String, Option<String>)>> {
    let Some(name_node) = declarator.child_by_field_name("declarator") else {
        return Ok(None);
    };
    match name_node.kind() {
        "qualified_identifier" => {
            // A::B::method nests as (A, (B, method)); the class is the innermost scope
            let mut scope = None;
            let mut current = name_node;
            loop {
                if let Some(s) = current.child_by_field_name("scope") {
                    scope = Some(node_text(&s, source)?.to_string());
                }
                match current.child_by_field_name("name") {
                    Some(inner) if inner.kind() == "qualified_identifier" => current = inner,
                    Some(inner) => return Ok(Some((node_text(&inner, source)?.to_string(), scope))),
                    None => return Ok(None),
                }
            }
        }
        _ => Ok(Some((node_text(&name_node, source)?.to_string(), None))),
    }
}

fn parameters(declarator: &Node, source: &str) -> Result<Vec<Parameter>> {
    let mut params = Vec::new();
    let Some(list) = declarator.child_by_field_name("parameters") else {
        return Ok(params);
    };
    let mut cursor = list.walk();
    for child in list.named_children(&mut cursor) {
        if !matches!(
            child.kind(),
            "parameter_declaration" | "optional_parameter_declaration"
        ) {
            continue;
        }
        let base = child
            .child_by_field_name("type")
            .map(|t| node_text(&t, source))
            .transpose()?
            .unwrap_or_default();
        let qualifier = if node_text(&child, source)?.trim_start().starts_with("const ") {
            "const "
        } else {
            ""
        };
        let (name, suffix) = match child.child_by_field_name("declarator") {
            Some(decl) => declarator_name(&decl, source)?,
            None => (None, String::new()),
        };
        params.push(Parameter {
            type_name: format!("{qualifier}{base}{suffix}"),
            name,
        });
    }
    Ok(params)
}

fn collect_functions(root: &Node, source: &str, out: &mut Vec<Function>) -> Result<()> {
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        if is_function_node(&node) {
            if let Some(function) = function_from_node(&node, source)? {
                out.push(function);
            }
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<_> = node.named_children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    Ok(())
}

fn function_from_node(node: &Node, source: &str) -> Result<Option<Function>> {
    let Some(body) = node.child_by_field_name("body") else {
        return Ok(None);
    };
    let Some(declarator) = find_function_declarator(node) else {
        return Ok(None);
    };
    let Some((name, scope)) = function_name(&declarator, source)? else {
        return Ok(None);
    };
    let class = match scope {
        Some(scope) => Some(scope),
        None => enclosing_class(node, source)?,
    };

    let mut return_type = node
        .child_by_field_name("type")
        .map(|t| node_text(&t, source))
        .transpose()?
        .map(normalize_text)
        .unwrap_or_else(|| "void".to_string());
    if let Some(outer) = node.child_by_field_name("declarator") {
        match outer.kind() {
            "pointer_declarator" => return_type.push('*'),
            "reference_declarator" => return_type.push('&'),
            _ => {}
        }
    }

    let span = LineSpan::new(line_of(node), node.end_position().row + 1);
    let body_span = LineSpan::new(line_of(&body), body.end_position().row + 1);
    let mut scan = BodyScan::default();
    scan.walk(&body, source)?;

    Ok(Some(Function {
        name,
        class,
        return_type,
        params: parameters(&declarator, source)?,
        span,
        body: body_span,
        branch_sites: scan.sites,
        complexity: 1 + scan.decision_points,
        boundaries: scan.boundaries,
        calls: scan.calls,
        size_lines: body_span.len(),
    }))
}

/// First line of the code an arm executes
fn arm_line(node: &Node) -> usize {
    if node.kind() == "compound_statement" {
        let mut cursor = node.walk();
        let first = node
            .named_children(&mut cursor)
            .find(|child| child.kind() != "comment");
        if let Some(first) = first {
            return line_of(&first);
        }
    }
    line_of(node)
}

#[derive(Default)]
struct BodyScan {
    sites: Vec<BranchSite>,
    decision_points: u32,
    boundaries: Vec<BoundaryExpr>,
    calls: Vec<CallSite>,
}

impl BodyScan {
    fn walk(&mut self, body: &Node, source: &str) -> Result<()> {
        let mut stack = vec![*body];
        while let Some(node) = stack.pop() {
            self.visit(&node, source)?;
            let mut cursor = node.walk();
            let children: Vec<_> = node.named_children(&mut cursor).collect();
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }
        self.sites.sort_by_key(|site| site.line);
        Ok(())
    }

    fn condition_text(node: &Node, source: &str) -> Result<String> {
        Ok(node
            .child_by_field_name("condition")
            .map(|c| node_text(&c, source))
            .transpose()?
            .map(|t| normalize_text(t.trim_start_matches('(').trim_end_matches(')')))
            .unwrap_or_default())
    }

    fn visit(&mut self, node: &Node, source: &str) -> Result<()> {
        match node.kind() {
            "if_statement" => {
                self.decision_points += 1;
                let mut arms = Vec::new();
                if let Some(consequence) = node.child_by_field_name("consequence") {
                    arms.push(BranchArm::explicit("then", arm_line(&consequence)));
                }
                match node.child_by_field_name("alternative") {
                    Some(alternative) => {
                        let statement = if alternative.kind() == "else_clause" {
                            last_named_child(&alternative)
                        } else {
                            Some(alternative)
                        };
                        let line = statement.map_or_else(|| line_of(&alternative), |s| arm_line(&s));
                        arms.push(BranchArm::explicit("else", line));
                    }
                    None => arms.push(BranchArm::implicit("else")),
                }
                self.sites.push(BranchSite {
                    kind: BranchKind::If,
                    line: line_of(node),
                    condition: Self::condition_text(node, source)?,
                    arms,
                });
            }
            "switch_statement" => {
                let mut arms = Vec::new();
                let mut has_default = false;
                if let Some(body) = node.child_by_field_name("body") {
                    let mut cursor = body.walk();
                    for case in body.named_children(&mut cursor) {
                        if case.kind() != "case_statement" {
                            continue;
                        }
                        let value = case.child_by_field_name("value");
                        let label = match &value {
                            Some(v) => format!("case {}", normalize_text(node_text(v, source)?)),
                            None => {
                                has_default = true;
                                "default".to_string()
                            }
                        };
                        let mut inner = case.walk();
                        let first_statement = case.named_children(&mut inner).find(|child| {
                            value.map_or(true, |v| v.id() != child.id()) && child.kind() != "comment"
                        });
                        let line = first_statement.map_or_else(|| line_of(&case), |s| line_of(&s));
                        arms.push(BranchArm::explicit(label, line));
                    }
                }
                if !has_default {
                    arms.push(BranchArm::implicit("default"));
                }
                self.sites.push(BranchSite {
                    kind: BranchKind::Switch,
                    line: line_of(node),
                    condition: Self::condition_text(node, source)?,
                    arms,
                });
            }
            "case_statement" => {
                if node.child_by_field_name("value").is_some() {
                    self.decision_points += 1;
                }
            }
            "conditional_expression" => {
                self.decision_points += 1;
                let mut arms = Vec::new();
                if let Some(consequence) = node.child_by_field_name("consequence") {
                    arms.push(BranchArm::explicit("true", line_of(&consequence)));
                }
                if let Some(alternative) = node.child_by_field_name("alternative") {
                    arms.push(BranchArm::explicit("false", line_of(&alternative)));
                }
                self.sites.push(BranchSite {
                    kind: BranchKind::Ternary,
                    line: line_of(node),
                    condition: Self::condition_text(node, source)?,
                    arms,
                });
            }
            "for_statement" | "for_range_loop" | "while_statement" => {
                self.decision_points += 1;
                let mut arms = Vec::new();
                if let Some(body) = node.child_by_field_name("body") {
                    arms.push(BranchArm::explicit("enter", arm_line(&body)));
                }
                arms.push(BranchArm::implicit("skip"));
                let condition = match node.kind() {
                    "for_range_loop" => node
                        .child_by_field_name("right")
                        .map(|r| node_text(&r, source))
                        .transpose()?
                        .map(normalize_text)
                        .unwrap_or_default(),
                    _ => Self::condition_text(node, source)?,
                };
                self.sites.push(BranchSite {
                    kind: BranchKind::Loop,
                    line: line_of(node),
                    condition,
                    arms,
                });
            }
            "try_statement" => {
                let mut arms = Vec::new();
                let mut handled = Vec::new();
                let mut cursor = node.walk();
                for handler in node.named_children(&mut cursor) {
                    if handler.kind() != "catch_clause" {
                        continue;
                    }
                    let declaration = handler
                        .child_by_field_name("parameters")
                        .map(|p| node_text(&p, source))
                        .transpose()?
                        .map(normalize_text)
                        .unwrap_or_else(|| "(...)".to_string());
                    let line = handler
                        .child_by_field_name("body")
                        .map_or_else(|| line_of(&handler), |body| arm_line(&body));
                    handled.push(declaration.trim_start_matches('(').trim_end_matches(')').to_string());
                    arms.push(BranchArm::explicit(format!("catch {declaration}"), line));
                }
                if !arms.is_empty() {
                    self.sites.push(BranchSite {
                        kind: BranchKind::Try,
                        line: line_of(node),
                        condition: handled.join(" | "),
                        arms,
                    });
                }
            }
            "do_statement" | "catch_clause" => self.decision_points += 1,
            "binary_expression" => self.visit_binary(node, source)?,
            "subscript_expression" => self.boundaries.push(BoundaryExpr {
                kind: BoundaryKind::Index,
                line: line_of(node),
                text: normalize_text(node_text(node, source)?),
            }),
            "call_expression" => self.visit_call(node, source)?,
            _ => {}
        }
        Ok(())
    }

    fn visit_binary(&mut self, node: &Node, source: &str) -> Result<()> {
        let Some(operator) = node.child_by_field_name("operator") else {
            return Ok(());
        };
        let op = operator.kind();
        if matches!(op, "&&" | "||" | "and" | "or") {
            self.decision_points += 1;
            return Ok(());
        }
        if !RELATIONAL_OPERATORS.contains(&op) {
            return Ok(());
        }

        let left = node.child_by_field_name("left");
        let right = node.child_by_field_name("right");
        let operands = [left, right];
        let text = normalize_text(node_text(node, source)?);

        let is_length = operands
            .iter()
            .flatten()
            .any(|operand| is_length_call(operand, source));
        let is_numeric = operands.iter().flatten().any(is_numeric_literal);

        if is_length {
            self.boundaries.push(BoundaryExpr {
                kind: BoundaryKind::LengthCheck,
                line: line_of(node),
                text,
            });
        } else if is_numeric {
            self.boundaries.push(BoundaryExpr {
                kind: BoundaryKind::NumericComparison,
                line: line_of(node),
                text,
            });
        }
        Ok(())
    }

    fn visit_call(&mut self, node: &Node, source: &str) -> Result<()> {
        let Some(function) = node.child_by_field_name("function") else {
            return Ok(());
        };
        if function.kind() != "field_expression" {
            return Ok(());
        }
        let (Some(receiver), Some(field)) = (
            function.child_by_field_name("argument"),
            function.child_by_field_name("field"),
        ) else {
            return Ok(());
        };

        let method = node_text(&field, source)?.to_string();
        let parent_kind = node.parent().map(|p| p.kind()).unwrap_or_default();

        if LENGTH_METHODS.contains(&method.as_str()) {
            let compared = parent_kind == "binary_expression"
                && node
                    .parent()
                    .and_then(|p| p.child_by_field_name("operator"))
                    .is_some_and(|op| RELATIONAL_OPERATORS.contains(&op.kind()));
            if !compared {
                self.boundaries.push(BoundaryExpr {
                    kind: BoundaryKind::LengthCheck,
                    line: line_of(node),
                    text: normalize_text(node_text(node, source)?),
                });
            }
        }

        let arg_count = node
            .child_by_field_name("arguments")
            .map_or(0, |args| args.named_child_count());
        self.calls.push(CallSite {
            receiver: normalize_text(node_text(&receiver, source)?),
            method,
            arg_count,
            line: line_of(node),
            uses_result: parent_kind != "expression_statement",
        });
        Ok(())
    }
}

fn is_numeric_literal(node: &Node) -> bool {
    match node.kind() {
        "number_literal" | "char_literal" => true,
        "unary_expression" => node
            .child_by_field_name("argument")
            .is_some_and(|arg| arg.kind() == "number_literal"),
        _ => false,
    }
}

fn is_length_call(node: &Node, source: &str) -> bool {
    if node.kind() != "call_expression" {
        return false;
    }
    node.child_by_field_name("function")
        .filter(|f| f.kind() == "field_expression")
        .and_then(|f| f.child_by_field_name("field"))
        .and_then(|field| node_text(&field, source).ok())
        .is_some_and(|name| LENGTH_METHODS.contains(&name))
}

fn class_declaration(node: &Node, source: &str, is_template: bool) -> Result<Option<ClassDecl>> {
    let (Some(name), Some(body)) = (
        node.child_by_field_name("name"),
        node.child_by_field_name("body"),
    ) else {
        return Ok(None);
    };
    let class_name = node_text(&name, source)?.to_string();
    let keyword = if node.kind() == "struct_specifier" {
        "struct"
    } else {
        "class"
    };

    let mut methods = Vec::new();
    let mut cursor = body.walk();
    for member in body.named_children(&mut cursor) {
        let member = if member.kind() == "template_declaration" {
            match last_named_child(&member) {
                Some(inner) => inner,
                None => continue,
            }
        } else {
            member
        };
        if !matches!(
            member.kind(),
            "field_declaration" | "declaration" | "function_definition"
        ) {
            continue;
        }
        let Some(declarator) = find_function_declarator(&member) else {
            continue;
        };
        let Some(name_node) = declarator.child_by_field_name("declarator") else {
            continue;
        };
        let name = node_text(&name_node, source)?.to_string();
        if name.starts_with('~') || name.starts_with("operator") {
            continue;
        }

        let mut return_type = member
            .child_by_field_name("type")
            .map(|t| node_text(&t, source))
            .transpose()?
            .map(normalize_text);
        if let (Some(rt), Some(outer)) = (return_type.as_mut(), member.child_by_field_name("declarator")) {
            match outer.kind() {
                "pointer_declarator" => rt.push('*'),
                "reference_declarator" => rt.push('&'),
                _ => {}
            }
        }

        let params = declarator
            .child_by_field_name("parameters")
            .map(|p| node_text(&p, source))
            .transpose()?
            .map(normalize_text)
            .unwrap_or_else(|| "()".to_string());

        let mut qualifiers = String::new();
        let mut inner = declarator.walk();
        for child in declarator.children(&mut inner) {
            if child.kind() == "type_qualifier" {
                qualifiers.push(' ');
                qualifiers.push_str(node_text(&child, source)?);
            }
        }

        let mut is_static = false;
        let mut is_virtual = false;
        let mut inner = member.walk();
        for child in member.children(&mut inner) {
            let text = node_text(&child, source)?;
            match child.kind() {
                "storage_class_specifier" if text == "static" => is_static = true,
                _ if text == "virtual" => is_virtual = true,
                _ => {}
            }
        }

        // Constructors of the class itself have no return type
        if return_type.is_none() && name != class_name {
            continue;
        }

        methods.push(MethodDecl {
            name,
            return_type,
            params,
            qualifiers,
            is_static,
            is_virtual,
        });
    }

    Ok(Some(ClassDecl {
        name: class_name,
        keyword: keyword.to_string(),
        methods,
        is_template,
    }))
}

#[cfg(test)]
#[path = "cpp_tests.rs"]
mod tests;
