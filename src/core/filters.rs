// This module defines the fixed set of output filters a request can switch on. Filters are
// plain booleans copied into every task that needs them.

//! Output filters selected by a request.
//!
//! The set of recognized filters is fixed. Unknown keys in a serialized
//! filter object are ignored, missing keys mean "off".

use serde::{Deserialize, Serialize};

/// Boolean switches selecting requested output transformations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Filters {
    /// Link and run the program instead of stopping at assembly.
    pub execute: bool,
    /// Produce a binary object and disassemble it.
    pub binary: bool,
    pub demangle: bool,
    /// Hide unused labels.
    pub labels: bool,
    pub directives: bool,
    pub comment_only: bool,
    pub trim: bool,
    /// Hide code attributed to library functions.
    pub library_code: bool,
}

impl Filters {
    /// Build a filter set from option names such as `"binary"` or
    /// `"commentOnly"`. Unrecognized names are skipped.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut filters = Filters::default();
        for name in names {
            match name {
                "execute" => filters.execute = true,
                "binary" => filters.binary = true,
                "demangle" => filters.demangle = true,
                "labels" => filters.labels = true,
                "directives" => filters.directives = true,
                "commentOnly" | "comment_only" => filters.comment_only = true,
                "trim" => filters.trim = true,
                "libraryCode" | "library_code" => filters.library_code = true,
                other => log::debug!("ignoring unrecognized filter '{}'", other),
            }
        }
        filters
    }

    /// Same filters with `binary` replaced.
    pub fn with_binary(self, binary: bool) -> Self {
        Filters { binary, ..self }
    }
}

/// Disassembly syntax for x86 output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsmSyntax {
    #[default]
    Att,
    Intel,
}
