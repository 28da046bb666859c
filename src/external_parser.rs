// This module delegates assembly production and parsing to two external tools: a
// disassembler and a standalone asm parser that prints one JSON object on stdout. Chaining
// the two goes through a launcher script generated per job and written into the job
// directory, so the parser's flags always match the filters of the request that produced it.
// Paths handed to the tools are masked first so the real sandbox location never shows up in
// their output. The decoded JSON is layered over the exec result with the raw stdout/stderr
// removed; anything other than exactly one JSON object is a protocol error.

//! External disassemble-and-parse pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::core::{
    CompilerDescriptor, DriverError, DriverResult, ExecResult, Filters, Limits, ParsedAsmResult,
    SandboxConfig, Stage,
};
use crate::exec::{ExecOptions, ProcessRunner};

/// File name of the generated launcher inside a job directory.
pub const LAUNCHER_SCRIPT_NAME: &str = "dump-and-parse.sh";

/// Parser flags for a filter set, in a fixed order.
pub fn parser_arguments(filters: &Filters, from_stdin: bool) -> Vec<&'static str> {
    let table = [
        (from_stdin, "-stdin"),
        (filters.binary, "-binary"),
        (filters.labels, "-unused_labels"),
        (filters.directives, "-directives"),
        (filters.comment_only, "-comment_only"),
        (filters.trim, "-whitespace"),
        (filters.library_code, "-library_functions"),
    ];
    table
        .into_iter()
        .filter_map(|(enabled, flag)| enabled.then_some(flag))
        .collect()
}

/// Launcher text piping the disassembler (given all script arguments)
/// into the parser reading from stdin.
pub fn launcher_script(objdumper: &Path, parser: &Path, filters: &Filters) -> String {
    let flags = parser_arguments(filters, true).join(" ");
    format!(
        "#!/bin/sh\nOBJDUMP={}\nASMPARSER={}\n\"$OBJDUMP\" \"$@\" | \"$ASMPARSER\" {}\n",
        shell_quote(&objdumper.to_string_lossy()),
        shell_quote(&parser.to_string_lossy()),
        flags
    )
}

/// Single-quote `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Decode parser stdout; it must be exactly one JSON object.
fn parse_exec_result(tool: &Path, exec: ExecResult) -> DriverResult<ParsedAsmResult> {
    let protocol = |reason: String| DriverError::Protocol {
        tool: tool.to_path_buf(),
        reason,
    };
    match serde_json::from_str::<Value>(&exec.stdout) {
        Ok(Value::Object(fields)) => Ok(ParsedAsmResult::merge(&exec, fields)),
        Ok(other) => Err(protocol(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(err) => Err(protocol(format!("invalid JSON: {}", err))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Adapter for one toolchain's external parser.
pub struct ExternalParser {
    objdumper: PathBuf,
    parser: PathBuf,
    env: BTreeMap<String, String>,
    runner: Arc<dyn ProcessRunner>,
    sandbox: SandboxConfig,
    max_output: usize,
    timeout: Duration,
}

impl ExternalParser {
    /// `None` when the descriptor has no external parser configured.
    pub fn for_compiler(
        descriptor: &CompilerDescriptor,
        runner: Arc<dyn ProcessRunner>,
        sandbox: &SandboxConfig,
        limits: &Limits,
    ) -> DriverResult<Option<Self>> {
        let Some(parser) = descriptor.external_parser.clone() else {
            return Ok(None);
        };
        let objdumper = descriptor.objdumper.clone().ok_or_else(|| DriverError::Config {
            reason: format!(
                "compiler '{}' has an external parser but no objdumper",
                descriptor.id
            ),
        })?;
        Ok(Some(Self {
            objdumper,
            parser,
            env: descriptor.env.clone(),
            runner,
            sandbox: sandbox.clone(),
            max_output: limits.max_asm_size,
            timeout: limits.exec_timeout(),
        }))
    }

    fn exec_options(&self) -> ExecOptions {
        ExecOptions::new(Stage::ExternalParser, self.max_output)
            .env(&self.env)
            .timeout(self.timeout)
    }

    async fn write_launcher(&self, build_dir: &Path, filters: &Filters) -> DriverResult<PathBuf> {
        let path = build_dir.join(LAUNCHER_SCRIPT_NAME);
        let script = launcher_script(&self.objdumper, &self.parser, filters);
        let io_err = |source| DriverError::io(Stage::ExternalParser, &path, source);

        tokio::fs::write(&path, script).await.map_err(io_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(io_err)?;
        }
        Ok(path)
    }

    /// Disassemble with the objdumper and parse the listing in one pipeline
    /// run inside `build_dir`.
    pub async fn objdump_and_parse_assembly(
        &self,
        build_dir: &Path,
        objdump_args: &[String],
        filters: &Filters,
    ) -> DriverResult<ParsedAsmResult> {
        let args: Vec<String> = objdump_args
            .iter()
            .map(|arg| self.sandbox.mask_rootdir(arg))
            .collect();
        self.write_launcher(build_dir, filters).await?;
        // Relative to the job directory, which is the child's cwd.
        let program = Path::new(".").join(LAUNCHER_SCRIPT_NAME);

        log::debug!("external parser: {} {:?}", program.display(), args);
        let exec = self
            .runner
            .exec(&program, &args, self.exec_options().cwd(build_dir))
            .await?;
        parse_exec_result(&self.parser, exec)
    }

    /// Parse an existing assembly file without disassembling.
    pub async fn parse_assembly(
        &self,
        filepath: &Path,
        filters: &Filters,
    ) -> DriverResult<ParsedAsmResult> {
        let mut args: Vec<String> = parser_arguments(filters, false)
            .into_iter()
            .map(String::from)
            .collect();
        args.push(filepath.to_string_lossy().into_owned());

        let exec = self.runner.exec(&self.parser, &args, self.exec_options()).await?;
        parse_exec_result(&self.parser, exec)
    }
}
