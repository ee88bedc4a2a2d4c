//! Compiler configuration for extensibility
//!
//! This module provides configuration types that allow the driver
//! (`src/main.rs`) to steer the core pipeline without the core knowing
//! anything about CLI argument parsing.
//!
//! # Example
//!
//! ```rust,ignore
//! use pawc::{CompilerConfig, EmitKind, OptimizationLevel};
//!
//! let config = CompilerConfig::new()
//!     .with_emit(EmitKind::LlvmIr)
//!     .with_optimization(OptimizationLevel::O2)
//!     .with_verbose(true);
//!
//! compile_file_with_config(source_path, output_path, &config)?;
//! ```

use std::path::PathBuf;

/// Optimization hint forwarded to the external toolchain. The core
/// never runs optimizer passes itself (spec §1 Non-goals); this value
/// is carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationLevel {
    #[default]
    O0,
    O1,
    O2,
    O3,
}

impl OptimizationLevel {
    /// The flag spelling passed through to the external C/LLVM toolchain.
    pub fn as_flag(self) -> &'static str {
        match self {
            OptimizationLevel::O0 => "-O0",
            OptimizationLevel::O1 => "-O1",
            OptimizationLevel::O2 => "-O2",
            OptimizationLevel::O3 => "-O3",
        }
    }
}

/// What artifact the pipeline should stop at and hand back to the
/// driver (spec §6 `--emit-c` / `--emit-llvm` / `--emit-obj` / default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitKind {
    CSource,
    LlvmIr,
    Object,
    #[default]
    Executable,
}

/// Configuration for the Paw compiler core.
///
/// Built with a builder pattern so the driver can assemble it from CLI
/// flags without the core depending on `clap`.
#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    pub optimization: OptimizationLevel,
    pub emit: EmitKind,
    pub print_ast: bool,
    pub print_ir: bool,
    pub verbose: bool,

    /// Additional prelude modules conceptually concatenated ahead of
    /// user source (spec §6, "a prelude module is conceptually
    /// concatenated ahead of user source").
    pub extra_prelude: Vec<PathBuf>,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_optimization(mut self, level: OptimizationLevel) -> Self {
        self.optimization = level;
        self
    }

    pub fn with_emit(mut self, emit: EmitKind) -> Self {
        self.emit = emit;
        self
    }

    pub fn with_print_ast(mut self, yes: bool) -> Self {
        self.print_ast = yes;
        self
    }

    pub fn with_print_ir(mut self, yes: bool) -> Self {
        self.print_ir = yes;
        self
    }

    pub fn with_verbose(mut self, yes: bool) -> Self {
        self.verbose = yes;
        self
    }

    pub fn with_prelude(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_prelude.push(path.into());
        self
    }

    pub fn with_preludes(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.extra_prelude.extend(paths);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_executable_at_o0() {
        let config = CompilerConfig::new();
        assert_eq!(config.emit, EmitKind::Executable);
        assert_eq!(config.optimization, OptimizationLevel::O0);
        assert!(!config.verbose);
    }

    #[test]
    fn builder_chains_into_expected_config() {
        let config = CompilerConfig::new()
            .with_emit(EmitKind::LlvmIr)
            .with_optimization(OptimizationLevel::O2)
            .with_print_ir(true)
            .with_verbose(true);

        assert_eq!(config.emit, EmitKind::LlvmIr);
        assert_eq!(config.optimization, OptimizationLevel::O2);
        assert!(config.print_ir);
        assert!(config.verbose);
    }

    #[test]
    fn optimization_level_flags_match_toolchain_spelling() {
        assert_eq!(OptimizationLevel::O0.as_flag(), "-O0");
        assert_eq!(OptimizationLevel::O3.as_flag(), "-O3");
    }

    #[test]
    fn prelude_paths_accumulate_in_order() {
        let config = CompilerConfig::new()
            .with_prelude("a.paw")
            .with_prelude("b.paw");
        assert_eq!(config.extra_prelude, vec![PathBuf::from("a.paw"), PathBuf::from("b.paw")]);
    }
}
