// This module produces the host listing when the request asked for a binary. With an
// external parser configured the objdumper runs through the parser's launcher and the result
// stays structured JSON; otherwise the objdumper output is normalised and returned as text.
// A disassembler that exits nonzero yields a placeholder listing instead of failing the job.

//! Host disassembly.
//!
//! Binary output is disassembled with the compiler's objdumper, either
//! through the external parser pipeline (structured result) or directly
//! (listing text).

use std::path::Path;

use serde_json::Value;

use crate::asm::normalize_objdump_output;
use crate::core::{AsmOutput, AsmSyntax, DriverError, DriverResult, Filters, Stage};
use crate::toolchain::PolicyContext;

/// objdump flags for disassembling `object` with line info.
pub fn objdump_arguments(object: &Path, filters: &Filters, syntax: AsmSyntax) -> Vec<String> {
    let mut args = vec![
        "-d".to_string(),
        object.to_string_lossy().into_owned(),
        "-l".to_string(),
        "--insn-width=16".to_string(),
    ];
    if filters.demangle {
        args.push("-C".to_string());
    }
    if syntax == AsmSyntax::Intel {
        args.push("-M".to_string());
        args.push("intel".to_string());
    }
    args
}

/// Placeholder shown when a disassembler fails.
pub fn no_output_placeholder(tool: &Path, code: i32) -> String {
    let name = tool.file_name().unwrap_or(tool.as_os_str()).to_string_lossy();
    format!("<No output: {} returned {}>", name, code)
}

/// Disassemble `object`, returning the assembly and the disassembler's
/// run time.
pub async fn objdump(
    ctx: &PolicyContext,
    object: &Path,
    build_dir: &Path,
    filters: &Filters,
    syntax: AsmSyntax,
) -> DriverResult<(AsmOutput, Option<u64>)> {
    let args = objdump_arguments(object, filters, syntax);

    if let Some(parser) = &ctx.external_parser {
        let parsed = parser
            .objdump_and_parse_assembly(build_dir, &args, filters)
            .await?;
        let time = parsed.get("execTimeMs").and_then(Value::as_u64);
        let asm = parsed
            .asm()
            .cloned()
            .map(AsmOutput::Structured)
            .unwrap_or_default();
        return Ok((asm, time));
    }

    let objdumper = ctx.descriptor.objdumper.as_deref().ok_or_else(|| DriverError::Config {
        reason: format!("compiler '{}' has no objdumper configured", ctx.descriptor.id),
    })?;
    let options = ctx
        .exec_options(Stage::Disassembly, ctx.limits.max_asm_size)
        .cwd(build_dir);
    let exec = ctx.runner.exec(objdumper, &args, options).await?;
    if !exec.success() {
        log::warn!("{} returned {}", objdumper.display(), exec.code);
        return Ok((AsmOutput::Text(no_output_placeholder(objdumper, exec.code)), None));
    }
    Ok((
        AsmOutput::Text(normalize_objdump_output(&exec.stdout)),
        Some(exec.exec_time_ms),
    ))
}
