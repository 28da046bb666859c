// This module defines the data that flows through a job: the static compiler descriptor,
// the immutable request, the raw exec result of each tool run, the device artifacts found in
// a job directory and the final result. Wire shapes use camelCase through serde so results
// can be handed to a front end unchanged.

//! Shared data types for compilation jobs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::filters::{AsmSyntax, Filters};
use crate::opt_report::OptRemark;

/// Which toolchain policy handles a compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerKind {
    Nvcc,
    Generic,
}

/// Static description of one installed toolchain.
///
/// Loaded once from the `[[compiler]]` table of the configuration and
/// shared read-only between jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: CompilerKind,
    pub exe: PathBuf,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub instruction_set: String,
    #[serde(default)]
    pub objdumper: Option<PathBuf>,
    /// Disassembler for binary device artifacts (`nvdisasm`).
    #[serde(default)]
    pub device_disassembler: Option<PathBuf>,
    #[serde(default)]
    pub external_parser: Option<PathBuf>,
    #[serde(default)]
    pub demangler: Option<PathBuf>,
    #[serde(default)]
    pub supports_opt_output: bool,
    /// Flags asking the compiler to save its optimization record, with
    /// `{record}` standing for the record path. Empty when the user's own
    /// options already make the compiler write `output.opt.yaml`.
    #[serde(default)]
    pub opt_args: Vec<String>,
    #[serde(default)]
    pub supports_device_asm_view: bool,
    /// Extra environment for every tool run on behalf of this compiler.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CompilerDescriptor {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// One compilation request. Immutable for the lifetime of the job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildRequest {
    pub compiler_id: String,
    pub source: String,
    pub user_options: Vec<String>,
    pub filters: Filters,
    pub asm_syntax: AsmSyntax,
    pub high_priority: bool,
}

/// Outcome of one process execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub exec_time_ms: u64,
    pub dir_path: Option<PathBuf>,
    pub truncated: bool,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Kind of a secondary artifact left in a job directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Textual intermediate code (`.ptx`).
    IntermediateText,
    /// Device machine code that needs a disassembler (`.cubin`).
    BinaryMachineCode,
}

impl ArtifactKind {
    /// Classify a file by suffix.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".ptx") {
            Some(ArtifactKind::IntermediateText)
        } else if name.ends_with(".cubin") {
            Some(ArtifactKind::BinaryMachineCode)
        } else {
            None
        }
    }

    /// Label used in the devices map.
    pub fn label(self) -> &'static str {
        match self {
            ArtifactKind::IntermediateText => "PTX",
            ArtifactKind::BinaryMachineCode => "SASS",
        }
    }

    pub fn is_binary(self) -> bool {
        self == ArtifactKind::BinaryMachineCode
    }
}

/// A device artifact discovered in a job directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceArtifact {
    pub file_name: String,
    pub kind: ArtifactKind,
    /// Architecture/code tuple from the file name, lowercase, may be empty.
    pub target: String,
}

impl DeviceArtifact {
    /// Classify a directory entry; `None` for unrelated files.
    pub fn classify(file_name: &str) -> Option<Self> {
        let kind = ArtifactKind::from_file_name(file_name)?;
        let parts: Vec<&str> = file_name.split('.').collect();
        let target = if parts.len() > 2 {
            parts[1..parts.len() - 1].join(", ").to_lowercase()
        } else {
            String::new()
        };
        Some(Self {
            file_name: file_name.to_string(),
            kind,
            target,
        })
    }

    /// Key of this artifact in [`CompilationResult::devices`].
    pub fn key(&self) -> String {
        if self.target.is_empty() {
            self.kind.label().to_string()
        } else {
            format!("{} ({})", self.kind.label(), self.target)
        }
    }
}

/// Source position attached to an assembly line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsmLine {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceLoc>,
}

/// Filtered assembly for one device artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedAsm {
    pub asm: Vec<AsmLine>,
    pub label_definitions: BTreeMap<String, usize>,
    pub ok_to_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objdump_time_ms: Option<u64>,
}

impl ParsedAsm {
    pub fn text(&self) -> String {
        let lines: Vec<&str> = self.asm.iter().map(|line| line.text.as_str()).collect();
        lines.join("\n")
    }
}

/// Result of the external parser: its JSON fields layered over the exec
/// result, minus the raw `stdout`/`stderr` text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParsedAsmResult(Map<String, Value>);

impl ParsedAsmResult {
    /// Merge `parsed` onto `exec`. Fields from the parser win; raw output
    /// fields are always removed.
    pub fn merge(exec: &ExecResult, parsed: Map<String, Value>) -> Self {
        let mut fields = match serde_json::to_value(exec) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        fields.extend(parsed);
        fields.remove("stdout");
        fields.remove("stderr");
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Structured assembly, if the parser produced one.
    pub fn asm(&self) -> Option<&Value> {
        self.0.get("asm")
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Host assembly in whichever shape it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AsmOutput {
    Text(String),
    Structured(Value),
}

impl Default for AsmOutput {
    fn default() -> Self {
        AsmOutput::Text(String::new())
    }
}

impl AsmOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AsmOutput::Text(text) => Some(text),
            AsmOutput::Structured(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub compile_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objdump_ms: Option<u64>,
    pub post_process_ms: u64,
    pub total_ms: u64,
}

/// Everything a job returns to the rendering layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationResult {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub asm: AsmOutput,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub opt_output: Vec<OptRemark>,
    pub devices: BTreeMap<String, ParsedAsm>,
    pub compilation_options: Vec<String>,
    pub timings: Timings,
}
