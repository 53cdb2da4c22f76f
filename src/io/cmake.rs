//! CMake project reader for source and include-root discovery.
//!
//! Only the commands that name translation units or include directories are
//! interpreted: `set`, `list(APPEND ..)`, `option`, `if`/`elseif`/`else`/`endif`,
//! `include`, `add_subdirectory`, `add_executable`, `add_library`,
//! `target_sources`, `include_directories` and `target_include_directories`.
//! Everything else is skipped.
//!
//! Conditions are evaluated when every operand is a declared option, a known
//! variable or a boolean constant; any other condition (platform checks,
//! comparisons) is taken as true so guarded sources are not lost.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::core::errors::{CovforgeError, Result, ResultExt};
use crate::io::discovery::is_source;

/// Name of the project file read in a directory
pub const CMAKE_LISTS: &str = "CMakeLists.txt";

/// Build-output directories never used as include roots
const BUILD_OUTPUT_MARKERS: &[&str] = &["out/build", "cmake-build-debug", "cmake-build-release"];

const TARGET_KEYWORDS: &[&str] = &[
    "STATIC",
    "SHARED",
    "MODULE",
    "OBJECT",
    "INTERFACE",
    "IMPORTED",
    "ALIAS",
    "GLOBAL",
    "EXCLUDE_FROM_ALL",
    "WIN32",
    "MACOSX_BUNDLE",
    "PUBLIC",
    "PRIVATE",
];

const INCLUDE_KEYWORDS: &[&str] = &["SYSTEM", "BEFORE", "AFTER", "PUBLIC", "PRIVATE", "INTERFACE"];

/// Sources and include roots declared by a CMake project
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmakeProject {
    pub root: PathBuf,
    /// Existing translation units, sorted
    pub sources: Vec<PathBuf>,
    /// Project root first, then declared directories in declaration order
    pub include_dirs: Vec<PathBuf>,
    /// `option(..)` values after evaluation
    pub options: BTreeMap<String, bool>,
}

impl CmakeProject {
    /// Read `root/CMakeLists.txt` and everything it includes
    pub fn load(root: &Path) -> Result<Self> {
        let lists = root.join(CMAKE_LISTS);
        if !lists.is_file() {
            return Err(CovforgeError::validation(format!(
                "no {CMAKE_LISTS} in {}",
                root.display()
            )));
        }

        let mut reader = Reader::new(root);
        reader.read_file(&lists, root)?;
        Ok(reader.finish())
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// One command invocation, name lowercased
#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    name: String,
    args: Vec<String>,
    line: usize,
}

/// Open `if` block
#[derive(Debug, Clone, Copy)]
struct Block {
    parent_active: bool,
    active: bool,
    taken: bool,
}

struct Reader {
    root: PathBuf,
    vars: BTreeMap<String, Vec<String>>,
    options: BTreeMap<String, bool>,
    sources: BTreeSet<PathBuf>,
    include_dirs: Vec<PathBuf>,
    visited: HashSet<PathBuf>,
}

impl Reader {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            vars: BTreeMap::new(),
            options: BTreeMap::new(),
            sources: BTreeSet::new(),
            include_dirs: Vec::new(),
            visited: HashSet::new(),
        }
    }

    fn read_file(&mut self, file: &Path, current_dir: &Path) -> Result<()> {
        if !self.visited.insert(normalize(file)) {
            return Ok(());
        }
        let text = fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let invocations = tokenize(&text).map_err(|(message, line)| {
            CovforgeError::parse_with_location("cmake", message, file.display().to_string(), Some(line))
        })?;
        debug!(file = %file.display(), commands = invocations.len(), "reading cmake file");

        let mut blocks: Vec<Block> = Vec::new();
        for invocation in invocations {
            let active = blocks.last().map_or(true, |b| b.active);
            match invocation.name.as_str() {
                "if" => {
                    let holds = active && self.condition(&invocation.args, current_dir);
                    blocks.push(Block {
                        parent_active: active,
                        active: holds,
                        taken: holds,
                    });
                }
                "elseif" => {
                    let holds = blocks
                        .last()
                        .is_some_and(|b| b.parent_active && !b.taken)
                        && self.condition(&invocation.args, current_dir);
                    if let Some(block) = blocks.last_mut() {
                        block.active = holds;
                        block.taken |= holds;
                    }
                }
                "else" => {
                    if let Some(block) = blocks.last_mut() {
                        block.active = block.parent_active && !block.taken;
                        block.taken = true;
                    }
                }
                "endif" => {
                    blocks.pop();
                }
                _ if !active => {}
                _ => self.apply(&invocation, current_dir)?,
            }
        }
        if !blocks.is_empty() {
            warn!(file = %file.display(), open = blocks.len(), "unterminated if() blocks");
        }
        Ok(())
    }

    fn apply(&mut self, invocation: &Invocation, current_dir: &Path) -> Result<()> {
        let args = &invocation.args;
        match invocation.name.as_str() {
            "set" => {
                if let Some((name, rest)) = args.split_first() {
                    let values = rest
                        .iter()
                        .take_while(|a| *a != "CACHE" && *a != "PARENT_SCOPE")
                        .flat_map(|a| self.expand(a, current_dir))
                        .collect();
                    self.vars.insert(name.clone(), values);
                }
            }
            "list" if args.first().is_some_and(|a| a == "APPEND") && args.len() >= 2 => {
                let values: Vec<String> = args[2..]
                    .iter()
                    .flat_map(|a| self.expand(a, current_dir))
                    .collect();
                self.vars.entry(args[1].clone()).or_default().extend(values);
            }
            "option" => {
                if let Some(name) = args.first() {
                    let on = args.get(2).is_some_and(|v| truthy(v) == Some(true));
                    let value = *self.options.entry(name.clone()).or_insert(on);
                    self.vars
                        .entry(name.clone())
                        .or_insert_with(|| vec![if value { "ON" } else { "OFF" }.to_string()]);
                }
            }
            "include" => {
                let Some(target) = args.first().and_then(|a| self.expand(a, current_dir).into_iter().next())
                else {
                    return Ok(());
                };
                let file = resolve(current_dir, &target);
                if file.is_file() {
                    // included files keep the includer's source directory
                    self.read_file(&file, current_dir)?;
                } else {
                    debug!(module = %target, line = invocation.line, "skipping cmake module include");
                }
            }
            "add_subdirectory" => {
                if let Some(target) = args.first().and_then(|a| self.expand(a, current_dir).into_iter().next()) {
                    let dir = resolve(current_dir, &target);
                    let lists = dir.join(CMAKE_LISTS);
                    if lists.is_file() {
                        self.read_file(&lists, &dir)?;
                    } else {
                        warn!(
                            dir = %dir.display(),
                            line = invocation.line,
                            "add_subdirectory without {CMAKE_LISTS}"
                        );
                    }
                }
            }
            "add_executable" | "add_library" | "target_sources" => {
                let items: Vec<String> = args
                    .iter()
                    .skip(1)
                    .filter(|a| !TARGET_KEYWORDS.contains(&a.as_str()))
                    .flat_map(|a| self.expand(a, current_dir))
                    .collect();
                self.add_sources(&items, current_dir);
            }
            "include_directories" => {
                let items: Vec<String> = args
                    .iter()
                    .filter(|a| !INCLUDE_KEYWORDS.contains(&a.as_str()))
                    .flat_map(|a| self.expand(a, current_dir))
                    .collect();
                self.add_include_dirs(&items, current_dir);
            }
            "target_include_directories" => {
                let items: Vec<String> = args
                    .iter()
                    .skip(1)
                    .filter(|a| !INCLUDE_KEYWORDS.contains(&a.as_str()))
                    .flat_map(|a| self.expand(a, current_dir))
                    .collect();
                self.add_include_dirs(&items, current_dir);
            }
            _ => {}
        }
        Ok(())
    }

    fn add_sources(&mut self, items: &[String], current_dir: &Path) {
        for item in items {
            let path = resolve(current_dir, item);
            if !is_source(&path) {
                continue;
            }
            if path.is_file() {
                self.sources.insert(path);
            } else {
                warn!(source = %path.display(), "declared source does not exist");
            }
        }
    }

    fn add_include_dirs(&mut self, items: &[String], current_dir: &Path) {
        for item in items {
            let dir = resolve(current_dir, item);
            let text = dir.to_string_lossy().replace('\\', "/");
            if BUILD_OUTPUT_MARKERS.iter().any(|m| text.contains(m)) {
                continue;
            }
            if !dir.is_dir() {
                debug!(dir = %dir.display(), "declared include directory does not exist");
                continue;
            }
            if !self.include_dirs.contains(&dir) {
                self.include_dirs.push(dir);
            }
        }
    }

    /// Substitute `${VAR}` references and split the result as a CMake list
    fn expand(&self, arg: &str, current_dir: &Path) -> Vec<String> {
        if arg.starts_with("$<") {
            return Vec::new();
        }
        let mut out = String::new();
        let mut rest = arg;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            out.push_str(&self.lookup(&after[..end], current_dir));
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out.split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn lookup(&self, name: &str, current_dir: &Path) -> String {
        match name {
            "CMAKE_SOURCE_DIR" | "PROJECT_SOURCE_DIR" => self.root.display().to_string(),
            "CMAKE_CURRENT_SOURCE_DIR" | "CMAKE_CURRENT_LIST_DIR" => {
                current_dir.display().to_string()
            }
            _ => self.vars.get(name).map(|v| v.join(";")).unwrap_or_default(),
        }
    }

    fn condition(&self, args: &[String], current_dir: &Path) -> bool {
        self.evaluate(args, current_dir).unwrap_or(true)
    }

    /// `None` when the condition depends on something this reader does not model
    fn evaluate(&self, args: &[String], current_dir: &Path) -> Option<bool> {
        if let Some(split) = args.iter().position(|a| a == "OR") {
            let left = self.evaluate(&args[..split], current_dir)?;
            let right = self.evaluate(&args[split + 1..], current_dir)?;
            return Some(left || right);
        }
        if let Some(split) = args.iter().position(|a| a == "AND") {
            let left = self.evaluate(&args[..split], current_dir)?;
            let right = self.evaluate(&args[split + 1..], current_dir)?;
            return Some(left && right);
        }
        match args {
            [not, rest @ ..] if not == "NOT" => self.evaluate(rest, current_dir).map(|v| !v),
            [single] => {
                if let Some(value) = self.options.get(single) {
                    return Some(*value);
                }
                if let Some(value) = self.vars.get(single) {
                    return truthy(&value.join(";"));
                }
                let expanded = self.expand(single, current_dir).join(";");
                if single.contains("${") {
                    return truthy(&expanded);
                }
                truthy(single)
            }
            _ => None,
        }
    }

    fn finish(self) -> CmakeProject {
        let mut sources = self.sources;
        if let Some(declared) = self.vars.get("SOURCES") {
            for item in declared {
                let path = resolve(&self.root, item);
                if is_source(&path) && path.is_file() {
                    sources.insert(path);
                }
            }
        }

        let mut include_dirs = vec![self.root.clone()];
        for dir in self.include_dirs {
            if !include_dirs.contains(&dir) {
                include_dirs.push(dir);
            }
        }

        CmakeProject {
            root: self.root,
            sources: sources.into_iter().collect(),
            include_dirs,
            options: self.options,
        }
    }
}

/// CMake truthiness of a constant; `None` for anything that is not one
fn truthy(value: &str) -> Option<bool> {
    let upper = value.trim().to_ascii_uppercase();
    match upper.as_str() {
        "ON" | "YES" | "TRUE" | "Y" => Some(true),
        "OFF" | "NO" | "FALSE" | "N" | "IGNORE" | "" => Some(false),
        _ if upper.ends_with("-NOTFOUND") || upper == "NOTFOUND" => Some(false),
        _ => upper.parse::<f64>().ok().map(|n| n != 0.0),
    }
}

fn resolve(base: &Path, item: &str) -> PathBuf {
    let path = Path::new(item);
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Lexically drop `.` and fold `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Split CMake source into command invocations.
///
/// Errors carry a message and the 1-based line where the problem starts.
fn tokenize(text: &str) -> std::result::Result<Vec<Invocation>, (String, usize)> {
    let chars: Vec<char> = text.chars().collect();
    let mut invocations = Vec::new();
    let mut i = 0;
    let mut line = 1;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
        } else if c.is_whitespace() {
            i += 1;
        } else if c == '#' {
            i = skip_comment(&chars, i, &mut line);
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect::<String>().to_ascii_lowercase();
            let command_line = line;
            while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
                i += 1;
            }
            if chars.get(i) != Some(&'(') {
                return Err((format!("expected '(' after {name}"), command_line));
            }
            let (args, next) = read_args(&chars, i + 1, &mut line)
                .ok_or_else(|| (format!("unterminated {name}("), command_line))?;
            i = next;
            invocations.push(Invocation {
                name,
                args,
                line: command_line,
            });
        } else {
            return Err((format!("unexpected character '{c}'"), line));
        }
    }
    Ok(invocations)
}

fn skip_comment(chars: &[char], mut i: usize, line: &mut usize) -> usize {
    if chars.get(i + 1) == Some(&'[') && chars.get(i + 2) == Some(&'[') {
        i += 3;
        while i < chars.len() {
            if chars[i] == '\n' {
                *line += 1;
            }
            if chars[i] == ']' && chars.get(i + 1) == Some(&']') {
                return i + 2;
            }
            i += 1;
        }
        return i;
    }
    while i < chars.len() && chars[i] != '\n' {
        i += 1;
    }
    i
}

/// Read arguments after the opening parenthesis; returns them and the index
/// past the closing one
fn read_args(chars: &[char], mut i: usize, line: &mut usize) -> Option<(Vec<String>, usize)> {
    let mut args = Vec::new();
    let mut depth = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                *line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '#' => i = skip_comment(chars, i, line),
            '(' => {
                depth += 1;
                i += 1;
            }
            ')' if depth == 0 => return Some((args, i + 1)),
            ')' => {
                depth -= 1;
                i += 1;
            }
            '"' => {
                let mut value = String::new();
                i += 1;
                loop {
                    let c = *chars.get(i)?;
                    match c {
                        '"' => break,
                        '\\' => {
                            if let Some(&next) = chars.get(i + 1) {
                                value.push(match next {
                                    'n' => '\n',
                                    't' => '\t',
                                    other => other,
                                });
                                i += 1;
                            }
                        }
                        '\n' => {
                            *line += 1;
                            value.push(c);
                        }
                        _ => value.push(c),
                    }
                    i += 1;
                }
                args.push(value);
                i += 1;
            }
            _ => {
                let start = i;
                while i < chars.len() {
                    let c = chars[i];
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    i += 1;
                }
                args.push(chars[start..i].iter().collect());
            }
        }
    }
    None
}
