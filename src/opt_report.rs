// This module turns the optimization record a compiler saved next to its output into
// remarks the caller can render. The record is a YAML stream, but only a small flat subset of
// YAML ever appears in it, so it is read line by line instead of through a YAML library. A
// record that cannot be read is reported to the caller, which treats it as "no remarks".

//! Optimization record parsing.
//!
//! Compilers asked to save an optimization record write a YAML stream of
//! remark documents (`--- !Passed`, `--- !Missed`, `--- !Analysis`). Only
//! the flat subset those records use is understood here: top-level
//! `Key: value` pairs, an inline `DebugLoc` map and an `Args` list whose
//! values are concatenated into a readable message.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{DriverError, DriverResult, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemarkKind {
    Passed,
    Missed,
    Analysis,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptRemark {
    pub kind: RemarkKind,
    pub pass: String,
    pub name: String,
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_loc: Option<DebugLoc>,
    pub display_string: String,
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
        .unwrap_or(value)
}

/// Split on `sep` except inside single or double quotes.
fn split_unquoted(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == sep => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            None => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// `{ File: example.cu, Line: 4, Column: 5 }`
fn parse_debug_loc(value: &str) -> Option<DebugLoc> {
    let inner = value.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut loc = DebugLoc {
        file: String::new(),
        line: 0,
        column: 0,
    };
    for field in split_unquoted(inner, ',') {
        let (key, val) = field.split_once(':')?;
        match key.trim() {
            "File" => loc.file = unquote(val).to_string(),
            "Line" => loc.line = val.trim().parse().ok()?,
            "Column" => loc.column = val.trim().parse().ok()?,
            _ => {}
        }
    }
    Some(loc)
}

/// Parse every remark document in `text`.
pub fn parse_opt_record(text: &str) -> Vec<OptRemark> {
    let mut remarks = Vec::new();
    let mut current: Option<OptRemark> = None;
    let mut in_args = false;

    for line in text.lines() {
        if let Some(tag) = line.strip_prefix("--- !") {
            remarks.extend(current.take());
            let kind = match tag.trim() {
                "Passed" => RemarkKind::Passed,
                "Missed" => RemarkKind::Missed,
                "Analysis" => RemarkKind::Analysis,
                _ => RemarkKind::Other,
            };
            current = Some(OptRemark {
                kind,
                pass: String::new(),
                name: String::new(),
                function: String::new(),
                debug_loc: None,
                display_string: String::new(),
            });
            in_args = false;
            continue;
        }
        let Some(remark) = current.as_mut() else {
            continue;
        };
        if line.trim() == "..." {
            remarks.extend(current.take());
            continue;
        }

        if in_args {
            if let Some(item) = line.trim_start().strip_prefix("- ") {
                if let Some((key, value)) = item.split_once(':') {
                    if key.trim() != "DebugLoc" {
                        remark.display_string.push_str(unquote(value));
                    }
                }
                continue;
            }
            if line.starts_with(' ') {
                continue;
            }
            in_args = false;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key {
            "Pass" => remark.pass = unquote(value).to_string(),
            "Name" => remark.name = unquote(value).to_string(),
            "Function" => remark.function = unquote(value).to_string(),
            "DebugLoc" => remark.debug_loc = parse_debug_loc(value),
            "Args" => in_args = true,
            _ => {}
        }
    }
    remarks.extend(current);
    remarks
}

/// Read and parse the optimization record saved at `path`.
pub async fn process_opt_output(path: &Path) -> DriverResult<Vec<OptRemark>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DriverError::io(Stage::OptimizationReport, path, source))?;
    let remarks = parse_opt_record(&text);
    log::debug!("{} optimization remarks in {}", remarks.len(), path.display());
    Ok(remarks)
}
