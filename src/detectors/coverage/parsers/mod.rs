use crate::core::errors::{CovforgeError, Result};
use crate::detectors::coverage::types::{CoverageFormat, FileCoverage, FunctionHits, RawCoverage};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Parse a single coverage artifact, returning the detected format and the files it describes.
pub fn parse_report(path: &Path) -> Result<(CoverageFormat, Vec<FileCoverage>)> {
    let bytes = fs::read(path).map_err(|err| {
        CovforgeError::io(
            format!("Failed to read coverage report at {}", path.display()),
            err,
        )
    })?;

    let format = detect_format(path, &bytes);
    let files = match format {
        CoverageFormat::Gcov => parse_gcov(&String::from_utf8_lossy(&bytes)).map(|f| vec![f]),
        CoverageFormat::Lcov => parse_lcov(&String::from_utf8_lossy(&bytes)),
        CoverageFormat::Cobertura => parse_cobertura(&bytes),
        CoverageFormat::Unknown => Err(CovforgeError::validation(format!(
            "Unsupported or unknown coverage report format: {}",
            path.display()
        ))),
    }?;

    Ok((format, files))
}

/// Parse every `.gcov` file under `dir` in path order.
pub fn parse_gcov_dir(dir: &Path) -> Result<RawCoverage> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "gcov"))
        .collect();
    paths.sort();

    let mut raw = RawCoverage::default();
    for path in paths {
        let text = fs::read_to_string(&path).map_err(|err| {
            CovforgeError::io(format!("Failed to read {}", path.display()), err)
        })?;
        raw.insert(parse_gcov(&text)?);
    }
    Ok(raw)
}

/// Detect the artifact format from the extension, then from the leading bytes.
fn detect_format(path: &Path, bytes: &[u8]) -> CoverageFormat {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        match ext.to_ascii_lowercase().as_str() {
            "gcov" => return CoverageFormat::Gcov,
            "info" | "lcov" => return CoverageFormat::Lcov,
            "xml" => return CoverageFormat::Cobertura,
            _ => {}
        }
    }

    let snippet = String::from_utf8_lossy(&bytes[..bytes.len().min(4096)]);
    let trimmed = snippet.trim_start();
    if trimmed.starts_with('<') {
        CoverageFormat::Cobertura
    } else if trimmed.contains("TN:") || trimmed.contains("SF:") {
        CoverageFormat::Lcov
    } else if trimmed.contains(":Source:") {
        CoverageFormat::Gcov
    } else {
        CoverageFormat::Unknown
    }
}

fn normalize_report_path(path: &str) -> PathBuf {
    let trimmed = path.trim().trim_matches('"');
    let without_prefix = trimmed.strip_prefix("./").unwrap_or(trimmed);
    PathBuf::from(without_prefix.replace('\\', "/"))
}

/// Parse a gcov execution count column: `-` (not executable), `#####`/`=====` (zero),
/// a count, or a count with the unexecuted-block marker `*`.
fn parse_gcov_count(raw: &str) -> Option<Option<u64>> {
    let count = raw.trim();
    match count {
        "-" => Some(None),
        "#####" | "=====" | "%%%%%" | "$$$$$" => Some(Some(0)),
        other => other
            .trim_end_matches('*')
            .parse::<u64>()
            .ok()
            .map(Some),
    }
}

/// Parse `taken 3`, `taken 40%`, `never executed` into a branch entry.
fn parse_gcov_branch(rest: &str) -> Option<Option<u64>> {
    if rest.contains("never executed") {
        return Some(None);
    }
    let after = rest.split("taken").nth(1)?.trim();
    let token = after.split_whitespace().next()?;
    if let Some(percent) = token.strip_suffix('%') {
        let value: f64 = percent.parse().ok()?;
        return Some(Some(u64::from(value > 0.0)));
    }
    token.parse::<u64>().ok().map(Some)
}

/// Parse the text of one `.gcov` file.
pub fn parse_gcov(text: &str) -> Result<FileCoverage> {
    let mut file = FileCoverage::default();
    let mut current_line: Option<usize> = None;
    let mut pending_functions: Vec<(String, u64)> = Vec::new();

    for (index, raw_line) in text.lines().enumerate() {
        let trimmed = raw_line.trim_start();

        if let Some(rest) = trimmed.strip_prefix("function ") {
            let mut parts = rest.split_whitespace();
            let Some(name) = parts.next() else { continue };
            let calls = rest
                .split("called")
                .nth(1)
                .and_then(|tail| tail.split_whitespace().next())
                .and_then(|n| n.parse::<u64>().ok())
                .unwrap_or(0);
            pending_functions.push((name.to_string(), calls));
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("branch") {
            let Some(line) = current_line else { continue };
            if let Some(entry) = parse_gcov_branch(rest) {
                file.branches.entry(line).or_default().push(entry);
            }
            continue;
        }

        if trimmed.starts_with("call") || trimmed.starts_with("------") || trimmed.is_empty() {
            continue;
        }

        let mut columns = raw_line.splitn(3, ':');
        let (Some(count), Some(number), source) = (columns.next(), columns.next(), columns.next())
        else {
            continue;
        };
        let Ok(line_number) = number.trim().parse::<usize>() else {
            // Lines that are neither records nor metadata (e.g. demangled block headers)
            continue;
        };

        if line_number == 0 {
            if let Some(path) = source.and_then(|s| s.strip_prefix("Source:")) {
                file.path = normalize_report_path(path);
            }
            continue;
        }

        let Some(count) = parse_gcov_count(count) else {
            return Err(CovforgeError::parse_with_location(
                "gcov",
                format!("Unrecognised execution count '{}'", count.trim()),
                file.path.display().to_string(),
                Some(index + 1),
            ));
        };

        for (name, calls) in pending_functions.drain(..) {
            file.functions.insert(
                name,
                FunctionHits {
                    line: line_number,
                    calls,
                },
            );
        }

        current_line = Some(line_number);
        if let Some(hits) = count {
            file.lines
                .entry(line_number)
                .and_modify(|existing| *existing = (*existing).max(hits))
                .or_insert(hits);
        }
    }

    if file.path.as_os_str().is_empty() {
        return Err(CovforgeError::parse("gcov", "Missing Source: header"));
    }
    Ok(file)
}

/// Parse an LCOV tracefile (`SF`, `DA`, `BRDA`, `FN`, `FNDA`).
pub fn parse_lcov(text: &str) -> Result<Vec<FileCoverage>> {
    let mut raw = RawCoverage::default();
    let mut current: Option<FileCoverage> = None;
    let mut function_lines: Vec<(String, usize)> = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("SF:") {
            if let Some(done) = current.take() {
                raw.insert(done);
            }
            current = Some(FileCoverage::new(normalize_report_path(rest)));
            function_lines.clear();
            continue;
        }
        if line == "end_of_record" {
            if let Some(done) = current.take() {
                raw.insert(done);
            }
            continue;
        }
        let Some(file) = current.as_mut() else { continue };

        if let Some(rest) = line.strip_prefix("DA:") {
            let mut parts = rest.split(',');
            let (Some(Ok(number)), Some(Ok(hits))) = (
                parts.next().map(str::parse::<usize>),
                parts.next().map(str::parse::<u64>),
            ) else {
                continue;
            };
            file.lines
                .entry(number)
                .and_modify(|existing| *existing = (*existing).max(hits))
                .or_insert(hits);
        } else if let Some(rest) = line.strip_prefix("BRDA:") {
            let parts: Vec<&str> = rest.split(',').collect();
            if parts.len() != 4 {
                continue;
            }
            let Ok(number) = parts[0].parse::<usize>() else { continue };
            let taken = match parts[3] {
                "-" => None,
                count => count.parse::<u64>().ok(),
            };
            file.branches.entry(number).or_default().push(taken);
        } else if let Some(rest) = line.strip_prefix("FN:") {
            if let Some((number, name)) = rest.split_once(',') {
                if let Ok(number) = number.parse::<usize>() {
                    function_lines.push((name.to_string(), number));
                }
            }
        } else if let Some(rest) = line.strip_prefix("FNDA:") {
            if let Some((calls, name)) = rest.split_once(',') {
                let calls = calls.parse::<u64>().unwrap_or(0);
                let line = function_lines
                    .iter()
                    .find(|(n, _)| n == name)
                    .map_or(0, |(_, l)| *l);
                file.functions
                    .insert(name.to_string(), FunctionHits { line, calls });
            }
        }
    }

    if let Some(done) = current.take() {
        raw.insert(done);
    }
    Ok(raw.files.into_values().collect())
}

fn parse_condition_coverage(value: &str) -> Option<(usize, usize)> {
    let start = value.find('(')?;
    let end = value[start..].find(')')? + start;
    let fraction = value[(start + 1)..end].trim();
    let mut parts = fraction.split('/');
    let covered = parts.next()?.trim().parse::<usize>().ok()?;
    let total = parts.next()?.trim().parse::<usize>().ok()?;
    Some((covered, total))
}

fn attribute_value(tag: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    tag.attributes()
        .with_checks(false)
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| String::from_utf8(attr.value.into_owned()).ok())
}

/// Parse Cobertura XML as produced by gcovr.
pub fn parse_cobertura(bytes: &[u8]) -> Result<Vec<FileCoverage>> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut raw = RawCoverage::default();
    let mut current: Option<FileCoverage> = None;
    let mut current_method: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(tag)) | Ok(Event::Empty(tag)) => match tag.name().as_ref() {
                b"class" => {
                    if let Some(done) = current.take() {
                        raw.insert(done);
                    }
                    current = attribute_value(&tag, b"filename")
                        .map(|name| FileCoverage::new(normalize_report_path(&name)));
                }
                b"method" => current_method = attribute_value(&tag, b"name"),
                b"line" => {
                    let Some(file) = current.as_mut() else { continue };
                    let Some(number) =
                        attribute_value(&tag, b"number").and_then(|v| v.parse::<usize>().ok())
                    else {
                        continue;
                    };
                    let hits = attribute_value(&tag, b"hits")
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(0);

                    if let Some(method) = current_method.take() {
                        file.functions.entry(method).or_insert(FunctionHits {
                            line: number,
                            calls: hits,
                        });
                    }

                    file.lines
                        .entry(number)
                        .and_modify(|existing| *existing = (*existing).max(hits))
                        .or_insert(hits);

                    let is_branch = attribute_value(&tag, b"branch")
                        .is_some_and(|b| b.eq_ignore_ascii_case("true"));
                    if is_branch && !file.branches.contains_key(&number) {
                        if let Some((covered, total)) = attribute_value(&tag, b"condition-coverage")
                            .as_deref()
                            .and_then(parse_condition_coverage)
                        {
                            let covered = covered.min(total);
                            let mut entries = vec![Some(1); covered];
                            entries.extend(std::iter::repeat(Some(0)).take(total - covered));
                            file.branches.insert(number, entries);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::End(tag)) => match tag.name().as_ref() {
                b"class" => {
                    if let Some(done) = current.take() {
                        raw.insert(done);
                    }
                }
                b"method" => current_method = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(CovforgeError::parse(
                    "cobertura",
                    format!("Failed to parse Cobertura coverage XML: {}", err),
                ));
            }
            _ => {}
        }
        buf.clear();
    }

    if let Some(done) = current.take() {
        raw.insert(done);
    }
    Ok(raw.files.into_values().collect())
}

#[cfg(test)]
mod tests;
