// This module handles the device side of heterogeneous compilers. After the compiler has
// run, the job directory is listed once and every PTX or cubin file becomes an artifact whose
// map key is derived from its file name. PTX is read as text, cubins go through the device
// disassembler, whose flags depend on the toolchain version. Artifacts are processed as
// separate tasks under a per-job semaphore, and one artifact's disassembler failing only
// replaces that artifact's listing with a placeholder.

//! Device code extraction.
//!
//! After a successful compile the job directory is listed once, every
//! `.ptx`/`.cubin` file in that snapshot becomes a [`DeviceArtifact`], and
//! artifacts are processed in parallel (bounded by `max_device_tasks`).
//! Map keys come from file names alone, so tasks never contend for an
//! entry; if two files derive the same key, the one finishing last wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{DeviceMap, PolicyContext};
use crate::asm::{normalize_objdump_output, post_process_asm};
use crate::core::{
    ArtifactKind, DeviceArtifact, DriverError, DriverResult, ExecResult, Filters, ParsedAsm, Stage,
};
use crate::disasm::no_output_placeholder;

/// First device disassembler release that understands `-hex`.
pub const HEX_FLAG_MIN_VERSION: (u64, u64, u64) = (11, 0, 0);

/// Parse a toolchain version like `"11.8.89"` or `"V12.2.140"`.
/// Strings that do not parse compare as newer than any release.
pub fn parse_version(version: &str) -> (u64, u64, u64) {
    const NEWEST: (u64, u64, u64) = (u64::MAX, u64::MAX, u64::MAX);
    let trimmed = version.trim().trim_start_matches(|c| c == 'v' || c == 'V');
    if trimmed.is_empty() {
        return NEWEST;
    }
    let parts: Result<Vec<u64>, _> = trimmed.split('.').map(str::parse).collect();
    match parts.as_deref() {
        Ok([major]) => (*major, 0, 0),
        Ok([major, minor]) => (*major, *minor, 0),
        Ok([major, minor, patch, ..]) => (*major, *minor, *patch),
        _ => NEWEST,
    }
}

/// Device disassembler flags for `artifact`, keyed on the toolchain version.
pub fn device_disassembler_arguments(artifact: &Path, version: &str) -> Vec<String> {
    let mut args = vec![
        artifact.to_string_lossy().into_owned(),
        "-c".to_string(),
        "-g".to_string(),
    ];
    if parse_version(version) >= HEX_FLAG_MIN_VERSION {
        args.push("-hex".to_string());
    }
    args
}

/// Disassemble a binary device artifact.
///
/// A nonzero exit does not fail the job: the listing becomes a
/// placeholder naming the tool and its exit code.
pub async fn disassemble_device_binary(
    ctx: &PolicyContext,
    artifact: &Path,
    build_dir: &Path,
) -> DriverResult<(String, Option<u64>)> {
    let tool = ctx
        .descriptor
        .device_disassembler
        .as_deref()
        .ok_or_else(|| DriverError::Config {
            reason: format!(
                "compiler '{}' has no device disassembler configured",
                ctx.descriptor.id
            ),
        })?;
    let args = device_disassembler_arguments(artifact, &ctx.descriptor.version);
    let options = ctx
        .exec_options(Stage::Disassembly, ctx.limits.max_asm_size)
        .cwd(build_dir);
    let ExecResult {
        code,
        stdout,
        exec_time_ms,
        ..
    } = ctx.runner.exec(tool, &args, options).await?;

    if code == 0 {
        Ok((normalize_objdump_output(&stdout), Some(exec_time_ms)))
    } else {
        log::warn!("{} returned {} for {}", tool.display(), code, artifact.display());
        Ok((no_output_placeholder(tool, code), None))
    }
}

/// List `dir` once and classify its entries.
pub async fn snapshot_artifacts(dir: &Path) -> DriverResult<Vec<DeviceArtifact>> {
    let io_err = |source| DriverError::io(Stage::Classification, dir, source);
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut artifacts = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let name = entry.file_name();
        if let Some(artifact) = name.to_str().and_then(DeviceArtifact::classify) {
            artifacts.push(artifact);
        }
    }
    artifacts.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    log::debug!("{} device artifacts in {}", artifacts.len(), dir.display());
    Ok(artifacts)
}

async fn process_artifact(
    ctx: &PolicyContext,
    dir: &Path,
    artifact: &DeviceArtifact,
    filters: &Filters,
) -> DriverResult<ParsedAsm> {
    let path = dir.join(&artifact.file_name);
    let (text, objdump_time_ms) = match artifact.kind {
        ArtifactKind::IntermediateText => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| DriverError::io(Stage::Classification, &path, source))?;
            (text, None)
        }
        ArtifactKind::BinaryMachineCode => disassemble_device_binary(ctx, &path, dir).await?,
    };

    let filters = filters.with_binary(artifact.kind.is_binary());
    let mut parsed = ctx.asm_parser.process(&text, &filters);
    parsed.objdump_time_ms = objdump_time_ms;
    post_process_asm(
        parsed,
        &filters,
        ctx.descriptor.demangler.as_deref(),
        ctx.runner.as_ref(),
        ctx.exec_options(Stage::Disassembly, ctx.limits.max_asm_size),
    )
    .await
}

fn task_aborted(reason: String) -> DriverError {
    DriverError::TaskAborted {
        stage: Stage::Classification,
        reason,
    }
}

/// Collect every device artifact of a finished compile.
pub async fn extract_device_code(
    ctx: &Arc<PolicyContext>,
    compiled: &ExecResult,
    filters: &Filters,
) -> DriverResult<DeviceMap> {
    let Some(dir) = compiled.dir_path.clone() else {
        return Ok(DeviceMap::new());
    };
    let artifacts = snapshot_artifacts(&dir).await?;

    let limiter = Arc::new(Semaphore::new(ctx.limits.max_device_tasks));
    let mut tasks = JoinSet::new();
    for artifact in artifacts {
        let ctx = Arc::clone(ctx);
        let limiter = Arc::clone(&limiter);
        let dir: PathBuf = dir.clone();
        let filters = *filters;
        tasks.spawn(async move {
            let _slot = limiter
                .acquire_owned()
                .await
                .map_err(|_| task_aborted("device task limiter closed".into()))?;
            let asm = process_artifact(&ctx, &dir, &artifact, &filters).await?;
            log::trace!("device artifact {} done", artifact.file_name);
            Ok::<_, DriverError>((artifact.key(), asm))
        });
    }

    let mut devices = DeviceMap::new();
    while let Some(joined) = tasks.join_next().await {
        let (key, asm) = match joined {
            Ok(done) => done?,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => return Err(task_aborted(format!("device task aborted: {}", err))),
        };
        devices.insert(key, asm);
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CompilerKind, DriverConfig};
    use crate::exec::testing::RecordingRunner;
    use crate::exec::{ExecOptions, ProcessRunner};
    use crate::toolchain::test_support::{context, descriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_version_boundary() {
        let cubin = Path::new("k.sm_75.cubin");
        assert_eq!(device_disassembler_arguments(cubin, "10.2.0"), vec!["k.sm_75.cubin", "-c", "-g"]);
        assert_eq!(
            device_disassembler_arguments(cubin, "11.0.0"),
            vec!["k.sm_75.cubin", "-c", "-g", "-hex"]
        );
        assert!(device_disassembler_arguments(cubin, "12.2.140").contains(&"-hex".to_string()));
        assert!(device_disassembler_arguments(cubin, "trunk").contains(&"-hex".to_string()));
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("10.2"), (10, 2, 0));
        assert_eq!(parse_version("V11.8.89"), (11, 8, 89));
        assert_eq!(parse_version(""), (u64::MAX, u64::MAX, u64::MAX));
        assert!(parse_version("10.2.0") < HEX_FLAG_MIN_VERSION);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_placeholder() {
        let runner = RecordingRunner::new(|_, _, _| {
            Ok(ExecResult {
                code: 1,
                stderr: "nvdisasm fatal".into(),
                ..ExecResult::default()
            })
        });
        let ctx = context(descriptor(CompilerKind::Nvcc, "12.2.0"), runner);
        let (text, time) =
            disassemble_device_binary(&ctx, Path::new("/j/k.sm_75.cubin"), Path::new("/j"))
                .await
                .unwrap();
        assert!(text.contains("nvdisasm"));
        assert!(text.contains('1'));
        assert_eq!(text, "<No output: nvdisasm returned 1>");
        assert_eq!(time, None);
    }

    #[tokio::test]
    async fn test_extract_every_artifact() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("example.ptx"), ".version 8.2\n  ret;\n").unwrap();
        std::fs::write(dir.path().join("example.sm_75.cubin"), [0x7f, b'E', b'L', b'F']).unwrap();
        std::fs::write(dir.path().join("example.sm_80.cubin"), [0x7f, b'E', b'L', b'F']).unwrap();
        std::fs::write(dir.path().join("example.cudafe1.cpp"), "int x;").unwrap();

        let runner = RecordingRunner::new(|_, args, _| {
            if args[0].ends_with("sm_80.cubin") {
                Ok(ExecResult {
                    code: 1,
                    ..ExecResult::default()
                })
            } else {
                Ok(ExecResult {
                    stdout: "        /*0000*/ EXIT ;\n".into(),
                    ..ExecResult::default()
                })
            }
        });
        let ctx = Arc::new(context(descriptor(CompilerKind::Nvcc, "12.2.0"), runner.clone()));
        let compiled = ExecResult {
            dir_path: Some(dir.path().to_path_buf()),
            ..ExecResult::default()
        };

        let devices = extract_device_code(&ctx, &compiled, &Filters::default())
            .await
            .unwrap();
        let keys: Vec<&str> = devices.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["PTX", "SASS (sm_75)", "SASS (sm_80)"]);
        assert!(devices["PTX"].text().contains("ret;"));
        assert!(devices["SASS (sm_75)"].text().contains("EXIT"));
        assert_eq!(devices["SASS (sm_80)"].text(), "<No output: nvdisasm returned 1>");
        // Only the two cubins needed the disassembler.
        assert_eq!(runner.calls().len(), 2);
    }

    /// Answers every call after a short sleep and records the highest
    /// number of calls in flight at once.
    #[derive(Default)]
    struct InFlightRunner {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ProcessRunner for InFlightRunner {
        async fn exec(
            &self,
            _program: &Path,
            _args: &[String],
            _options: ExecOptions,
        ) -> DriverResult<ExecResult> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(ExecResult {
                stdout: "        /*0000*/ EXIT ;\n".into(),
                ..ExecResult::default()
            })
        }
    }

    async fn peak_disassemblies(max_device_tasks: usize) -> usize {
        let dir = tempfile::tempdir().unwrap();
        for arch in ["sm_70", "sm_75", "sm_80", "sm_86", "sm_90"] {
            std::fs::write(dir.path().join(format!("example.{}.cubin", arch)), "cubin").unwrap();
        }
        let runner = Arc::new(InFlightRunner::default());
        let mut ctx = PolicyContext::new(
            descriptor(CompilerKind::Nvcc, "12.2.0"),
            runner.clone(),
            &DriverConfig::default(),
        )
        .unwrap();
        ctx.limits.max_device_tasks = max_device_tasks;
        let compiled = ExecResult {
            dir_path: Some(dir.path().to_path_buf()),
            ..ExecResult::default()
        };

        let devices = extract_device_code(&Arc::new(ctx), &compiled, &Filters::default())
            .await
            .unwrap();
        assert_eq!(devices.len(), 5);
        runner.peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_fan_out_is_bounded() {
        assert_eq!(peak_disassemblies(1).await, 1);
        assert!(peak_disassemblies(2).await <= 2);
    }

    #[test]
    fn test_aborted_task_reports_classification() {
        let err = task_aborted("device task aborted: cancelled".into());
        assert_eq!(err.stage(), Stage::Classification);
    }

    #[tokio::test]
    async fn test_unknown_dir_yields_nothing() {
        let ctx = Arc::new(context(
            descriptor(CompilerKind::Nvcc, "12.2.0"),
            RecordingRunner::with_stdout(""),
        ));
        let devices = extract_device_code(&ctx, &ExecResult::default(), &Filters::default())
            .await
            .unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_is_classification_error() {
        let ctx = Arc::new(context(
            descriptor(CompilerKind::Nvcc, "12.2.0"),
            RecordingRunner::with_stdout(""),
        ));
        let compiled = ExecResult {
            dir_path: Some(PathBuf::from("/nonexistent/asmview-job")),
            ..ExecResult::default()
        };
        let err = extract_device_code(&ctx, &compiled, &Filters::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Classification);
    }
}
