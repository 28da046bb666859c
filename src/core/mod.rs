// This module collects the data shared by every part of asmview: the fixed Filters record,
// the request and result shapes that cross the library boundary, static compiler
// descriptors, the error taxonomy and the configuration loader. Nothing in here launches
// processes or touches a job directory; those concerns live in exec, toolchain and driver.

//! Core asmview types.
//!
//! # Key Components
//!
//! - [`filters`]: the fixed set of output filters
//! - [`types`]: requests, descriptors, exec results, device artifacts, results
//! - [`error`]: `DriverError` with the failing [`Stage`]
//! - [`config`]: TOML + environment configuration

pub mod config;
pub mod error;
pub mod filters;
pub mod types;

pub use config::{DriverConfig, Limits, SandboxConfig, DEFAULT_MAX_ASM_SIZE};
pub use error::{ConfigError, DriverError, DriverResult, Stage};
pub use filters::{AsmSyntax, Filters};
pub use types::{
    ArtifactKind, AsmLine, AsmOutput, BuildRequest, CompilationResult, CompilerDescriptor,
    CompilerKind, DeviceArtifact, ExecResult, ParsedAsm, ParsedAsmResult, SourceLoc, Timings,
};
