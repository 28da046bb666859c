// This module is the policy for host-only compilers that follow gcc/clang command-line
// conventions. It only needs its own argument building; post-processing and the opt record
// flags come from the defaults shared by every policy.

//! Host-only compilers following gcc/clang conventions.

use std::path::Path;

use super::{PolicyContext, ToolchainPolicy};
use crate::core::Filters;

pub struct GenericPolicy {
    ctx: PolicyContext,
}

impl GenericPolicy {
    pub fn new(ctx: PolicyContext) -> Self {
        Self { ctx }
    }
}

impl ToolchainPolicy for GenericPolicy {
    fn context(&self) -> &PolicyContext {
        &self.ctx
    }

    fn source_file_name(&self) -> &'static str {
        "example.cpp"
    }

    fn build_arguments(
        &self,
        filters: &Filters,
        output_path: &Path,
        _user_options: &[String],
    ) -> Vec<String> {
        let mut args = vec![
            "-g".to_string(),
            "-o".to_string(),
            output_path.to_string_lossy().into_owned(),
        ];
        if !filters.execute {
            args.push(if filters.binary { "-c" } else { "-S" }.to_string());
        }
        args
    }
}
