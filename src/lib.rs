//! asmview - compiler output inspection.
//!
//! asmview runs a native compiler toolchain over a single source file and
//! returns what it produced: the host assembly (as text or as a structured
//! listing from an external parser), the optimization remarks, and, for
//! heterogeneous targets like CUDA, one listing per device artifact (PTX
//! and SASS per GPU architecture).
//!
//! # Primary Usage
//!
//! ```ignore
//! use asmview::{BuildRequest, Driver, DriverConfig};
//!
//! let config = DriverConfig::load("asmview.toml".as_ref())?;
//! let driver = Driver::with_local_processes(config)?;
//! let result = driver
//!     .compile(&BuildRequest {
//!         compiler_id: "nvcc122".into(),
//!         source: std::fs::read_to_string("square.cu")?,
//!         ..BuildRequest::default()
//!     })
//!     .await?;
//! for (name, listing) in &result.devices {
//!     println!("{}: {} lines", name, listing.asm.len());
//! }
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Shared types, configuration and errors
//! - [`toolchain`] - Per-compiler policies and device code extraction
//! - [`external_parser`] - Launcher for the external assembly parser
//! - [`driver`] - Request orchestration
//! - [`scheduler`] - Bounded, priority-aware job admission

pub mod core;

pub mod asm;
pub mod disasm;
pub mod driver;
pub mod exec;
pub mod external_parser;
pub mod job;
pub mod opt_report;
pub mod scheduler;
pub mod toolchain;

pub use crate::core::{
    AsmLine, AsmOutput, AsmSyntax, BuildRequest, CompilationResult, CompilerDescriptor,
    CompilerKind, ConfigError, DeviceArtifact, DriverConfig, DriverError, DriverResult,
    ExecResult, Filters, ParsedAsm, ParsedAsmResult, Stage,
};
pub use driver::{Driver, HealthReport};
pub use exec::{ExecOptions, ProcessRunner, TokioProcessRunner};
pub use scheduler::{Priority, SlotScheduler};
pub use toolchain::{ToolchainPolicy, ToolchainRegistry};
