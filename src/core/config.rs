// This module loads the driver configuration. A TOML file supplies the limits, the sandbox
// layout and the compiler table; ASMVIEW_* environment variables then override single
// values so a deployment can tune limits without editing the file. Validation rejects zero
// limits and duplicate compiler ids before any driver is built.

//! Driver configuration.
//!
//! Read from a TOML file holding limits, the sandbox layout and a
//! `[[compiler]]` table, then overridden from `ASMVIEW_*` environment
//! variables.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use super::error::ConfigError;
use super::types::CompilerDescriptor;

/// Default ceiling for disassembly output.
pub const DEFAULT_MAX_ASM_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub limits: Limits,
    pub sandbox: SandboxConfig,
    #[serde(rename = "compiler")]
    pub compilers: Vec<CompilerDescriptor>,
    /// File served by the health check; it must be readable and non-empty.
    pub health_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Byte cap on disassembler output.
    pub max_asm_size: usize,
    /// Byte cap on compiler stdout/stderr.
    pub max_output: usize,
    pub exec_timeout_ms: u64,
    pub job_timeout_ms: u64,
    pub max_concurrent_jobs: usize,
    /// Device artifacts disassembled in parallel within one job.
    pub max_device_tasks: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_asm_size: DEFAULT_MAX_ASM_SIZE,
            max_output: 1024 * 1024,
            exec_timeout_ms: 20_000,
            job_timeout_ms: 60_000,
            max_concurrent_jobs: 2,
            max_device_tasks: 4,
        }
    }
}

impl Limits {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Parent directory of per-job working directories.
    pub root: PathBuf,
    /// Replacement for `root` in paths shown to tools and users.
    pub mask_root: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir(),
            mask_root: None,
        }
    }
}

impl SandboxConfig {
    /// Rewrite a path under the sandbox root so the real location does not
    /// leak into tool output. Other values pass through unchanged.
    pub fn mask_rootdir(&self, value: &str) -> String {
        let Some(mask) = &self.mask_root else {
            return value.to_string();
        };
        let root = self.root.to_string_lossy();
        let root = root.trim_end_matches('/');
        if root.is_empty() {
            return value.to_string();
        }
        match value.strip_prefix(root) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                format!("{}{}", mask.trim_end_matches('/'), rest)
            }
            _ => value.to_string(),
        }
    }

    /// Mask every occurrence of the sandbox root inside tool output.
    pub fn mask_text(&self, text: &str) -> String {
        let root = self.root.to_string_lossy();
        let root = root.trim_end_matches('/');
        match &self.mask_root {
            Some(mask) if !root.is_empty() => text.replace(root, mask.trim_end_matches('/')),
            _ => text.to_string(),
        }
    }
}

impl DriverConfig {
    /// Load a configuration file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&text)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override limits and sandbox settings from `ASMVIEW_*` variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let limits = &mut self.limits;
        override_from_env("ASMVIEW_MAX_ASM_SIZE", &mut limits.max_asm_size)?;
        override_from_env("ASMVIEW_MAX_OUTPUT", &mut limits.max_output)?;
        override_from_env("ASMVIEW_EXEC_TIMEOUT_MS", &mut limits.exec_timeout_ms)?;
        override_from_env("ASMVIEW_JOB_TIMEOUT_MS", &mut limits.job_timeout_ms)?;
        override_from_env("ASMVIEW_MAX_CONCURRENT_JOBS", &mut limits.max_concurrent_jobs)?;
        override_from_env("ASMVIEW_MAX_DEVICE_TASKS", &mut limits.max_device_tasks)?;

        if let Ok(root) = std::env::var("ASMVIEW_SANDBOX_ROOT") {
            self.sandbox.root = PathBuf::from(root);
        }
        if let Ok(mask) = std::env::var("ASMVIEW_MASK_ROOT") {
            self.sandbox.mask_root = Some(mask);
        }
        if let Ok(file) = std::env::var("ASMVIEW_HEALTH_FILE") {
            self.health_file = Some(PathBuf::from(file));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        let zero = [
            ("max_asm_size", limits.max_asm_size == 0),
            ("max_output", limits.max_output == 0),
            ("exec_timeout_ms", limits.exec_timeout_ms == 0),
            ("job_timeout_ms", limits.job_timeout_ms == 0),
            ("max_concurrent_jobs", limits.max_concurrent_jobs == 0),
            ("max_device_tasks", limits.max_device_tasks == 0),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::Invalid(format!("limits.{} must be positive", name)));
        }

        let mut seen = HashSet::new();
        for compiler in &self.compilers {
            if compiler.id.is_empty() {
                return Err(ConfigError::Invalid("compiler with empty id".into()));
            }
            if !seen.insert(compiler.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate compiler id '{}'",
                    compiler.id
                )));
            }
        }
        Ok(())
    }
}

fn override_from_env<T: FromStr>(key: &str, slot: &mut T) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(key) {
        *slot = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        })?;
    }
    Ok(())
}
