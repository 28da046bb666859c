// This module ties the pieces together for one request. The driver looks up the toolchain
// policy, waits for an execution slot from the scheduler, creates a private job directory,
// writes the source and builds the command line, runs the compiler, and then runs the
// policy's host post-processing and device extraction side by side. The job only completes
// once both have finished; nothing is streamed back early. A compiler that exits nonzero is a
// normal result carrying its diagnostics, only unrecoverable tool failures become errors.

//! Request orchestration.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::core::{
    AsmOutput, BuildRequest, CompilationResult, CompilerDescriptor, DriverConfig, DriverError,
    DriverResult, Stage, Timings,
};
use crate::exec::{ProcessRunner, TokioProcessRunner};
use crate::job::{Job, JobState};
use crate::scheduler::{Priority, SlotScheduler};
use crate::toolchain::{CompileOutcome, DeviceMap, ToolchainPolicy, ToolchainRegistry};

const OUTPUT_FILE_NAME: &str = "output.s";
const HEALTHY: &str = "Everything is awesome";

/// Outcome of [`Driver::health_check`].
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub compilers: usize,
    pub available_slots: usize,
    /// Configured tool paths that do not exist on this machine.
    pub missing_tools: Vec<PathBuf>,
    /// Contents of the configured health file, or a default greeting.
    pub message: String,
}

/// Runs compilation requests against the configured toolchains.
pub struct Driver {
    config: Arc<DriverConfig>,
    registry: ToolchainRegistry,
    scheduler: SlotScheduler,
    runner: Arc<dyn ProcessRunner>,
    next_job: AtomicU64,
}

impl Driver {
    pub fn new(config: DriverConfig, runner: Arc<dyn ProcessRunner>) -> DriverResult<Self> {
        config.validate()?;
        let registry = ToolchainRegistry::from_config(&config, Arc::clone(&runner))?;
        let scheduler = SlotScheduler::new(
            config.limits.max_concurrent_jobs,
            config.limits.job_timeout(),
        );
        Ok(Self {
            config: Arc::new(config),
            registry,
            scheduler,
            runner,
            next_job: AtomicU64::new(1),
        })
    }

    /// Driver launching tools as local child processes.
    pub fn with_local_processes(config: DriverConfig) -> DriverResult<Self> {
        Self::new(config, Arc::new(TokioProcessRunner))
    }

    pub fn registry(&self) -> &ToolchainRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &SlotScheduler {
        &self.scheduler
    }

    /// Configured compilers, optionally only those for one instruction set.
    pub fn compilers(&self, instruction_set: Option<&str>) -> Vec<&CompilerDescriptor> {
        self.registry
            .descriptors()
            .filter(|d| instruction_set.map_or(true, |isa| d.instruction_set == isa))
            .collect()
    }

    /// Compile `request` once the scheduler grants a slot.
    pub async fn compile(&self, request: &BuildRequest) -> DriverResult<CompilationResult> {
        let policy = self.registry.get(&request.compiler_id)?;
        let priority = if request.high_priority {
            Priority::High
        } else {
            Priority::Normal
        };
        let job_id = self.next_job.fetch_add(1, Ordering::Relaxed);
        self.scheduler
            .enqueue(priority, || self.run_job(job_id, policy, request))
            .await
    }

    async fn run_job(
        &self,
        job_id: u64,
        policy: Arc<dyn ToolchainPolicy>,
        request: &BuildRequest,
    ) -> DriverResult<CompilationResult> {
        let mut job = Job::new(job_id, &request.compiler_id);
        let result = self.run_stages(&mut job, policy.as_ref(), request).await;
        if let Err(err) = &result {
            log::warn!("job {} failed during {}: {}", job.id(), err.stage(), err);
            job.advance(JobState::Failed);
        }
        result
    }

    async fn run_stages(
        &self,
        job: &mut Job,
        policy: &dyn ToolchainPolicy,
        request: &BuildRequest,
    ) -> DriverResult<CompilationResult> {
        let started = Instant::now();
        let descriptor = policy.descriptor();
        let sandbox = &self.config.sandbox;
        let limits = &self.config.limits;

        let job_dir = create_job_dir(&sandbox.root).await?;
        let dir = job_dir.path().to_path_buf();
        let source_path = dir.join(policy.source_file_name());
        tokio::fs::write(&source_path, &request.source)
            .await
            .map_err(|source| DriverError::io(Stage::PrimaryCompile, &source_path, source))?;

        let output_path = dir.join(OUTPUT_FILE_NAME);
        let filters = request.filters;
        let mut args = policy.build_arguments(&filters, &output_path, &request.user_options);
        let opt_record = (descriptor.supports_opt_output
            && policy.wants_optimization_report(&request.user_options))
        .then(|| output_path.with_extension("opt.yaml"));
        if let Some(record) = &opt_record {
            args.extend(policy.optimization_report_arguments(record));
        }
        args.extend(request.user_options.iter().cloned());
        args.push(source_path.to_string_lossy().into_owned());
        job.advance(JobState::ArgsBuilt);

        job.advance(JobState::Executing);
        log::debug!("job {}: {} {}", job.id(), descriptor.exe.display(), args.join(" "));
        let options = policy
            .context()
            .exec_options(Stage::PrimaryCompile, limits.max_output)
            .cwd(&dir);
        let mut exec = self.runner.exec(&descriptor.exe, &args, options).await?;
        exec.dir_path.get_or_insert_with(|| dir.clone());
        let compile_ms = exec.exec_time_ms;

        let mut result = CompilationResult {
            code: exec.code,
            stdout: sandbox.mask_text(&exec.stdout),
            stderr: sandbox.mask_text(&exec.stderr),
            compilation_options: args.iter().map(|arg| sandbox.mask_rootdir(arg)).collect(),
            ..CompilationResult::default()
        };

        if !exec.success() {
            job.advance(JobState::CompileFailed);
            result.asm = AsmOutput::Text("<Compilation failed>".to_string());
            result.timings = Timings {
                compile_ms,
                total_ms: started.elapsed().as_millis() as u64,
                ..Timings::default()
            };
            job.advance(JobState::Done);
            return Ok(result);
        }
        job.advance(JobState::Succeeded);

        job.advance(JobState::PostProcessing);
        let post_started = Instant::now();
        let outcome = CompileOutcome {
            exec,
            output_path,
            opt_record,
        };
        let device_view = descriptor.supports_device_asm_view;
        let (post, devices) = tokio::join!(
            policy.post_process(&outcome, &filters, request.asm_syntax),
            async {
                if device_view {
                    policy.extract_device_code(&outcome.exec, &filters).await
                } else {
                    Ok(DeviceMap::new())
                }
            }
        );
        let post = post?;
        result.devices = devices?;
        result.asm = post.asm;
        result.opt_output = post.opt_output;
        result.timings = Timings {
            compile_ms,
            objdump_ms: post.objdump_time_ms,
            post_process_ms: post_started.elapsed().as_millis() as u64,
            total_ms: started.elapsed().as_millis() as u64,
        };
        job.advance(JobState::Done);

        log::info!(
            "job {} [{}] done in {}ms ({} device listings)",
            job.id(),
            descriptor.id,
            result.timings.total_ms,
            result.devices.len()
        );
        Ok(result)
    }

    /// Push an empty high priority job through the scheduler, check that
    /// compilers are configured and read the health file if there is one.
    pub async fn health_check(&self) -> DriverResult<HealthReport> {
        self.scheduler
            .enqueue(Priority::High, || async { Ok(()) })
            .await?;
        if self.registry.is_empty() {
            return Err(DriverError::Config {
                reason: "no compilers configured".into(),
            });
        }

        let mut missing_tools = Vec::new();
        for descriptor in self.registry.descriptors() {
            let tools = [
                Some(&descriptor.exe),
                descriptor.objdumper.as_ref(),
                descriptor.device_disassembler.as_ref(),
                descriptor.external_parser.as_ref(),
                descriptor.demangler.as_ref(),
            ];
            for tool in tools.into_iter().flatten() {
                if !tokio::fs::try_exists(tool).await.unwrap_or(false) {
                    missing_tools.push(tool.clone());
                }
            }
        }
        let message = match &self.config.health_file {
            None => HEALTHY.to_string(),
            Some(path) => read_health_file(path).await?,
        };
        Ok(HealthReport {
            compilers: self.registry.len(),
            available_slots: self.scheduler.available(),
            missing_tools,
            message,
        })
    }
}

async fn read_health_file(path: &Path) -> DriverResult<String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DriverError::io(Stage::Configuration, path, source))?;
    if content.is_empty() {
        log::error!("health check failure: {} is empty", path.display());
        return Err(DriverError::Config {
            reason: format!("health file {} is empty", path.display()),
        });
    }
    Ok(content)
}

async fn create_job_dir(root: &Path) -> DriverResult<tempfile::TempDir> {
    let io_err = |source| DriverError::io(Stage::PrimaryCompile, root, source);
    tokio::fs::create_dir_all(root).await.map_err(io_err)?;
    tempfile::Builder::new()
        .prefix("asmview-")
        .tempdir_in(root)
        .map_err(io_err)
}
