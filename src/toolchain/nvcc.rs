// This module is the policy for NVIDIA's nvcc. It always asks for debug line info so device
// listings can be mapped back to the source, keeps intermediate files in the job directory
// when only compiling, and forwards optimization record flags to the host compiler through
// -Xcompiler. Device extraction is delegated to the device module.

//! NVIDIA CUDA compiler driver.
//!
//! Keeps intermediate files in the job directory so PTX and cubin
//! artifacts can be shown next to the host assembly.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    configured_opt_args, device, requests_optimization_record, DeviceMap, PolicyContext,
    ToolchainPolicy,
};
use crate::core::{DriverResult, ExecResult, Filters};

pub struct NvccPolicy {
    ctx: Arc<PolicyContext>,
}

impl NvccPolicy {
    pub fn new(ctx: PolicyContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }
}

#[async_trait]
impl ToolchainPolicy for NvccPolicy {
    fn context(&self) -> &PolicyContext {
        &self.ctx
    }

    fn source_file_name(&self) -> &'static str {
        "example.cu"
    }

    fn build_arguments(
        &self,
        filters: &Filters,
        output_path: &Path,
        _user_options: &[String],
    ) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            output_path.to_string_lossy().into_owned(),
            "-g".to_string(),
            "-lineinfo".to_string(),
        ];
        if !filters.execute {
            let keep_dir = output_path.parent().unwrap_or(Path::new("."));
            args.extend([
                "-c".to_string(),
                "-keep".to_string(),
                "-keep-dir".to_string(),
                keep_dir.to_string_lossy().into_owned(),
            ]);
            if !filters.binary {
                args.push("-Xcompiler=-S".to_string());
            }
        }
        args
    }

    fn wants_optimization_report(&self, options: &[String]) -> bool {
        requests_optimization_record(options)
            || options
                .iter()
                .any(|opt| opt == "--optimization-info" || opt == "-opt-info")
    }

    /// Record flags belong to the host compiler.
    fn optimization_report_arguments(&self, record_path: &Path) -> Vec<String> {
        configured_opt_args(&self.ctx.descriptor, record_path)
            .into_iter()
            .map(|arg| format!("-Xcompiler={}", arg))
            .collect()
    }

    async fn extract_device_code(
        &self,
        compiled: &ExecResult,
        filters: &Filters,
    ) -> DriverResult<DeviceMap> {
        device::extract_device_code(&self.ctx, compiled, filters).await
    }
}
