// This module holds the per-compiler policies. A ToolchainPolicy knows one class of compiler:
// how to turn filters into command-line flags, when the user asked for an optimization record,
// how to extract the host assembly once the compiler has run, and (for heterogeneous targets)
// how to find and disassemble device code left in the job directory. Policies are plain
// values stored in a ToolchainRegistry keyed by compiler id; shared behaviour lives in free
// functions so an override can reuse the default instead of reaching for a base class.

//! Toolchain policies and their registry.

pub mod device;
pub mod generic;
pub mod nvcc;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::asm::AsmTextParser;
use crate::core::{
    AsmOutput, AsmSyntax, CompilerDescriptor, CompilerKind, DriverConfig, DriverError,
    DriverResult, ExecResult, Filters, Limits, ParsedAsm, SandboxConfig, Stage,
};
use crate::disasm;
use crate::exec::{ExecOptions, ProcessRunner};
use crate::external_parser::ExternalParser;
use crate::opt_report::{self, OptRemark};

pub use generic::GenericPolicy;
pub use nvcc::NvccPolicy;

/// Device listings keyed by `"PTX"`, `"SASS (sm_75)"`, ...
pub type DeviceMap = BTreeMap<String, ParsedAsm>;

/// Everything a policy needs to run tools for one compiler.
pub struct PolicyContext {
    pub descriptor: CompilerDescriptor,
    pub runner: Arc<dyn ProcessRunner>,
    pub limits: Limits,
    pub sandbox: SandboxConfig,
    pub external_parser: Option<ExternalParser>,
    pub asm_parser: AsmTextParser,
}

impl PolicyContext {
    pub fn new(
        descriptor: CompilerDescriptor,
        runner: Arc<dyn ProcessRunner>,
        config: &DriverConfig,
    ) -> DriverResult<Self> {
        let external_parser = ExternalParser::for_compiler(
            &descriptor,
            Arc::clone(&runner),
            &config.sandbox,
            &config.limits,
        )?;
        Ok(Self {
            descriptor,
            runner,
            limits: config.limits.clone(),
            sandbox: config.sandbox.clone(),
            external_parser,
            asm_parser: AsmTextParser::new(),
        })
    }

    /// Options for a tool run on behalf of this compiler.
    pub fn exec_options(&self, stage: Stage, max_output: usize) -> ExecOptions {
        ExecOptions::new(stage, max_output)
            .env(&self.descriptor.env)
            .timeout(self.limits.exec_timeout())
    }
}

/// The compiler run a policy post-processes.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub exec: ExecResult,
    pub output_path: PathBuf,
    /// Where the optimization record was requested, if it was.
    pub opt_record: Option<PathBuf>,
}

impl CompileOutcome {
    pub fn build_dir(&self) -> PathBuf {
        self.exec
            .dir_path
            .clone()
            .or_else(|| self.output_path.parent().map(Path::to_path_buf))
            .unwrap_or_default()
    }
}

/// Host-side results of post-processing.
#[derive(Debug, Clone, Default)]
pub struct PostProcessed {
    pub asm: AsmOutput,
    pub opt_output: Vec<OptRemark>,
    pub objdump_time_ms: Option<u64>,
}

/// Conventions and post-processing for one class of compiler.
#[async_trait]
pub trait ToolchainPolicy: Send + Sync {
    fn context(&self) -> &PolicyContext;

    fn descriptor(&self) -> &CompilerDescriptor {
        &self.context().descriptor
    }

    /// Name the request's source is saved under.
    fn source_file_name(&self) -> &'static str;

    /// Flags derived from the filters. User options and the source path
    /// are appended by the caller.
    fn build_arguments(
        &self,
        filters: &Filters,
        output_path: &Path,
        user_options: &[String],
    ) -> Vec<String>;

    fn wants_optimization_report(&self, options: &[String]) -> bool {
        requests_optimization_record(options)
    }

    /// Flags asking the compiler to save its optimization record.
    fn optimization_report_arguments(&self, record_path: &Path) -> Vec<String> {
        configured_opt_args(self.descriptor(), record_path)
    }

    /// Extract the host assembly and the optimization record.
    async fn post_process(
        &self,
        outcome: &CompileOutcome,
        filters: &Filters,
        syntax: AsmSyntax,
    ) -> DriverResult<PostProcessed> {
        default_post_process(self.context(), outcome, filters, syntax).await
    }

    /// Collect device code from the job directory. Host-only compilers
    /// have none.
    async fn extract_device_code(
        &self,
        _compiled: &ExecResult,
        _filters: &Filters,
    ) -> DriverResult<DeviceMap> {
        Ok(DeviceMap::new())
    }
}

/// The common way of asking for an optimization record.
pub fn requests_optimization_record(options: &[String]) -> bool {
    options.iter().any(|opt| opt == "-fsave-optimization-record")
}

/// The descriptor's `opt_args` with `{record}` filled in.
pub fn configured_opt_args(descriptor: &CompilerDescriptor, record_path: &Path) -> Vec<String> {
    let record = record_path.to_string_lossy();
    descriptor
        .opt_args
        .iter()
        .map(|arg| arg.replace("{record}", &record))
        .collect()
}

/// Optimization record and host assembly, extracted concurrently.
///
/// A missing or unreadable optimization record only empties `opt_output`;
/// errors from assembly extraction are returned once both branches finish.
pub async fn default_post_process(
    ctx: &PolicyContext,
    outcome: &CompileOutcome,
    filters: &Filters,
    syntax: AsmSyntax,
) -> DriverResult<PostProcessed> {
    let opt_branch = async {
        let Some(record) = &outcome.opt_record else {
            return Vec::new();
        };
        opt_report::process_opt_output(record)
            .await
            .unwrap_or_else(|err| {
                log::warn!("optimization record unavailable: {}", err);
                Vec::new()
            })
    };
    let asm_branch = async {
        if filters.binary {
            disasm::objdump(ctx, &outcome.output_path, &outcome.build_dir(), filters, syntax)
                .await
        } else {
            read_text_output(&outcome.output_path).await.map(|asm| (asm, None))
        }
    };

    let (opt_output, asm) = tokio::join!(opt_branch, asm_branch);
    let (asm, objdump_time_ms) = asm?;
    Ok(PostProcessed {
        asm,
        opt_output,
        objdump_time_ms,
    })
}

async fn read_text_output(path: &Path) -> DriverResult<AsmOutput> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(AsmOutput::Text(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            Ok(AsmOutput::Text(format!("<No output file {}>", name)))
        }
        Err(err) => Err(DriverError::io(Stage::Disassembly, path, err)),
    }
}

/// Policies keyed by compiler id.
#[derive(Default)]
pub struct ToolchainRegistry {
    policies: BTreeMap<String, Arc<dyn ToolchainPolicy>>,
}

impl ToolchainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One policy per configured compiler, chosen by its `kind`.
    pub fn from_config(config: &DriverConfig, runner: Arc<dyn ProcessRunner>) -> DriverResult<Self> {
        let mut registry = Self::new();
        for descriptor in &config.compilers {
            let ctx = PolicyContext::new(descriptor.clone(), Arc::clone(&runner), config)?;
            let policy: Arc<dyn ToolchainPolicy> = match descriptor.kind {
                CompilerKind::Nvcc => Arc::new(NvccPolicy::new(ctx)),
                CompilerKind::Generic => Arc::new(GenericPolicy::new(ctx)),
            };
            registry.register(policy);
        }
        log::info!("registered {} compilers", registry.len());
        Ok(registry)
    }

    pub fn register(&mut self, policy: Arc<dyn ToolchainPolicy>) {
        let id = policy.descriptor().id.clone();
        if self.policies.insert(id.clone(), policy).is_some() {
            log::warn!("compiler '{}' registered twice, keeping the latest", id);
        }
    }

    pub fn get(&self, id: &str) -> DriverResult<Arc<dyn ToolchainPolicy>> {
        self.policies
            .get(id)
            .cloned()
            .ok_or_else(|| DriverError::UnknownCompiler { id: id.to_string() })
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &CompilerDescriptor> {
        self.policies.values().map(|policy| policy.descriptor())
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::exec::testing::RecordingRunner;

    #[test]
    fn test_registry_lookup() {
        let mut config = DriverConfig::default();
        config.compilers.push(descriptor(CompilerKind::Nvcc, "12.2.0"));
        config.compilers.push(descriptor(CompilerKind::Generic, "13.2.0"));
        let registry =
            ToolchainRegistry::from_config(&config, Arc::new(RecordingRunner::with_stdout("")))
                .unwrap();

        assert_eq!(registry.len(), 2);
        let nvcc = registry.get("nvcc-12.2.0").unwrap();
        assert_eq!(nvcc.source_file_name(), "example.cu");
        let err = registry.get("icc").err().unwrap();
        assert!(matches!(err, DriverError::UnknownCompiler { .. }));
    }

    #[tokio::test]
    async fn test_post_process_reads_text_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output.s");
        std::fs::write(&output, "square:\n  ret\n").unwrap();

        let ctx = context(
            descriptor(CompilerKind::Generic, "13.2.0"),
            RecordingRunner::with_stdout(""),
        );
        let outcome = CompileOutcome {
            exec: ExecResult {
                dir_path: Some(dir.path().to_path_buf()),
                ..ExecResult::default()
            },
            output_path: output,
            opt_record: Some(dir.path().join("output.opt.yaml")),
        };
        let post = default_post_process(&ctx, &outcome, &Filters::default(), AsmSyntax::Att)
            .await
            .unwrap();
        assert_eq!(post.asm, AsmOutput::Text("square:\n  ret\n".into()));
        // The record was requested but never written.
        assert!(post.opt_output.is_empty());
    }

    #[tokio::test]
    async fn test_missing_output_file_is_reported_in_asm() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            descriptor(CompilerKind::Generic, "13.2.0"),
            RecordingRunner::with_stdout(""),
        );
        let outcome = CompileOutcome {
            exec: ExecResult::default(),
            output_path: dir.path().join("output.s"),
            opt_record: None,
        };
        let post = default_post_process(&ctx, &outcome, &Filters::default(), AsmSyntax::Att)
            .await
            .unwrap();
        assert_eq!(post.asm, AsmOutput::Text("<No output file output.s>".into()));
    }
}
