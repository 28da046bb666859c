// This module applies the request's filters to listing text asmview reads itself: PTX files,
// SASS from the device disassembler and plain objdump output. Each line is kept or dropped
// according to the filters, source positions are tracked from .file/.loc directives and
// nvdisasm line markers, and label definitions are indexed by their 1-based line. Demangling
// is a separate async step because it runs the configured demangler over the kept lines.

//! Filter-driven assembly post-processing.
//!
//! [`AsmTextParser`] turns raw listing text (PTX, SASS, objdump output)
//! into [`ParsedAsm`], dropping what the request's [`Filters`] hide and
//! attaching source positions from `.loc` and `//## File` markers.
//! [`post_process_asm`] then runs the demangler over the result.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::core::{
    AsmLine, DriverResult, ExecResult, Filters, ParsedAsm, SourceLoc, Stage,
};
use crate::exec::{ExecOptions, ProcessRunner};

/// Normalise disassembler output before parsing.
pub fn normalize_objdump_output(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let mut out: Vec<&str> = text.lines().map(str::trim_end).collect();
    while out.last().is_some_and(|line| line.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$')
}

/// Name of the label defined on this line, if the line is a label.
fn label_definition(line: &str) -> Option<&str> {
    let name = line.trim().strip_suffix(':')?;
    if !name.is_empty() && name.chars().all(is_ident_char) {
        Some(name)
    } else {
        None
    }
}

fn is_comment_only(trimmed: &str) -> bool {
    trimmed.starts_with("//") || trimmed.starts_with('#') || trimmed.starts_with(';')
}

/// Remove `/* 0x... */` instruction encodings printed by `nvdisasm -hex`.
fn strip_encodings(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find("/* 0x") {
        let Some(len) = rest[start..].find("*/") else {
            break;
        };
        let body = &rest[start + 5..start + len];
        if !body.trim().chars().all(|c| c.is_ascii_hexdigit()) {
            out.push_str(&rest[..start + len + 2]);
            rest = &rest[start + len + 2..];
            continue;
        }
        out.push_str(&rest[..start]);
        rest = &rest[start + len + 2..];
    }
    out.push_str(rest);
    out.trim_end().to_string()
}

fn squash_whitespace(line: &str) -> String {
    let indented = line.starts_with(char::is_whitespace);
    let squashed = line.split_whitespace().collect::<Vec<_>>().join(" ");
    if indented && !squashed.is_empty() {
        format!("  {}", squashed)
    } else {
        squashed
    }
}

/// `//## File "/src/example.cu", line 12` as emitted with `-lineinfo`.
fn sass_source_marker(trimmed: &str) -> Option<SourceLoc> {
    let rest = trimmed.strip_prefix("//## File \"")?;
    let (file, rest) = rest.split_once('"')?;
    let line = rest.trim_start_matches(',').trim().strip_prefix("line")?;
    let line = line.trim().split(|c: char| !c.is_ascii_digit()).next()?;
    Some(SourceLoc {
        file: Some(file.to_string()),
        line: line.parse().ok()?,
    })
}

/// Parser for device and objdump listings.
#[derive(Debug, Default, Clone)]
pub struct AsmTextParser;

impl AsmTextParser {
    pub fn new() -> Self {
        Self
    }

    pub fn process(&self, text: &str, filters: &Filters) -> ParsedAsm {
        let used_labels = if filters.labels {
            Some(referenced_labels(text))
        } else {
            None
        };

        let mut files: HashMap<u32, String> = HashMap::new();
        let mut current: Option<SourceLoc> = None;
        let mut asm = Vec::new();
        let mut label_definitions = BTreeMap::new();

        for raw in text.lines() {
            let line = if filters.binary {
                strip_encodings(raw)
            } else {
                raw.to_string()
            };
            let trimmed = line.trim();

            if filters.binary && trimmed.is_empty() && !raw.trim().is_empty() {
                continue;
            }
            if let Some(loc) = sass_source_marker(trimmed) {
                current = Some(loc);
            }
            let mut words = trimmed.split_whitespace();
            match words.next() {
                Some(".file") => {
                    if let (Some(idx), Some(name)) = (words.next(), words.next()) {
                        if let Ok(idx) = idx.parse() {
                            files.insert(idx, name.trim_matches('"').to_string());
                        }
                    }
                }
                Some(".loc") => {
                    let idx = words.next().and_then(|w| w.parse::<u32>().ok());
                    let line_no = words.next().and_then(|w| w.parse::<u32>().ok());
                    if let (Some(idx), Some(line_no)) = (idx, line_no) {
                        current = Some(SourceLoc {
                            file: files.get(&idx).cloned(),
                            line: line_no,
                        });
                    }
                }
                _ => {}
            }

            let label = label_definition(trimmed);
            if filters.comment_only && is_comment_only(trimmed) {
                continue;
            }
            if filters.directives && label.is_none() && trimmed.starts_with('.') {
                continue;
            }
            if let (Some(name), Some(used)) = (label, &used_labels) {
                if !used.contains(name) {
                    continue;
                }
            }
            if filters.trim && trimmed.is_empty() {
                continue;
            }

            let text = if filters.trim {
                squash_whitespace(&line)
            } else {
                line.clone()
            };
            if let Some(name) = label {
                label_definitions.insert(name.to_string(), asm.len() + 1);
            }
            let source = if label.is_some() || trimmed.is_empty() {
                None
            } else {
                current.clone()
            };
            asm.push(AsmLine { text, source });
        }

        ParsedAsm {
            asm,
            label_definitions,
            ok_to_cache: false,
            objdump_time_ms: None,
        }
    }
}

/// Identifiers mentioned anywhere other than in their own definition.
fn referenced_labels(text: &str) -> HashSet<String> {
    let mut used = HashSet::new();
    for line in text.lines() {
        if label_definition(line).is_some() {
            continue;
        }
        for word in line.split(|c: char| !is_ident_char(c)) {
            if !word.is_empty() {
                used.insert(word.to_string());
            }
        }
    }
    used
}

/// Demangle symbol names and set cache eligibility.
///
/// Demangling is skipped when the filter is off or no demangler is
/// configured. A demangler that exits nonzero leaves the names mangled.
pub async fn post_process_asm(
    mut parsed: ParsedAsm,
    filters: &Filters,
    demangler: Option<&Path>,
    runner: &dyn ProcessRunner,
    options: ExecOptions,
) -> DriverResult<ParsedAsm> {
    parsed.ok_to_cache = filters.demangle;
    let Some(demangler) = demangler.filter(|_| filters.demangle && !parsed.asm.is_empty()) else {
        return Ok(parsed);
    };

    let input = parsed.text();
    let options = ExecOptions {
        stage: Stage::Disassembly,
        ..options
    }
    .input(input);
    let ExecResult { code, stdout, .. } = runner.exec(demangler, &[], options).await?;
    if code != 0 {
        log::warn!("{} returned {}, keeping mangled names", demangler.display(), code);
        return Ok(parsed);
    }

    let demangled: Vec<&str> = stdout.lines().collect();
    if demangled.len() != parsed.asm.len() {
        log::warn!(
            "{} changed the line count ({} -> {}), keeping mangled names",
            demangler.display(),
            parsed.asm.len(),
            demangled.len()
        );
        return Ok(parsed);
    }
    for (line, text) in parsed.asm.iter_mut().zip(demangled) {
        line.text = text.to_string();
    }
    Ok(parsed)
}
