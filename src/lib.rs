//! Paw Compiler Library
//!
//! Provides compilation from `.paw` source to portable C or LLVM IR, and
//! (by delegating to an external C/LLVM toolchain) to a linked executable.
//!
//! The core pipeline is Lexer -> Parser -> TypeChecker -> CodeGen, each
//! stage living in its own module. This crate does not invoke a C
//! compiler or LLVM linker itself beyond shelling out to `cc`/`clang` as
//! a convenience for [`compile_file_with_config`]; driving that from a
//! richer CLI (option parsing, `--print-ast`, shell completions) is
//! `src/main.rs`'s job, not this library's.
//!
//! # Extending the Compiler
//!
//! External callers can steer emission and optimization hints with
//! [`CompilerConfig`]:
//!
//! ```rust,ignore
//! use pawc::{CompilerConfig, EmitKind, OptimizationLevel};
//! use pawc::compile_file_with_config;
//!
//! let config = CompilerConfig::new()
//!     .with_emit(EmitKind::LlvmIr)
//!     .with_optimization(OptimizationLevel::O2);
//!
//! compile_file_with_config(source_path, output_path, &config)?;
//! ```

pub mod ast;
pub mod codegen_c;
pub mod codegen_llvm;
pub mod config;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod typechecker;
pub mod types;

pub use ast::Program;
pub use config::{CompilerConfig, EmitKind, OptimizationLevel};
pub use diagnostics::{CompileError, Diagnostic, DiagnosticSink, Severity};
pub use typechecker::TypeTables;

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

/// Result of running the front end (lex, parse, type-check) without
/// invoking either backend. Used by `check` and as the shared prefix of
/// every `compile_*` entry point.
pub struct CheckedProgram {
    pub program: Program,
    pub tables: TypeTables,
}

/// Run Lexer -> Parser -> TypeChecker over `source` and return the
/// type-annotated program, or the accumulated diagnostics from whichever
/// stage failed first (spec §7: stages collect diagnostics, then the
/// pipeline aborts before the next stage runs).
pub fn check_source(source: &str, filename: &str) -> Result<CheckedProgram, CompileError> {
    let stream = lexer::tokenize(source, filename)?;
    let program = parser::parse(&stream)?;
    let tables = typechecker::check_program(&program, filename)?;
    Ok(CheckedProgram { program, tables })
}

/// Type-check check a `.paw` file and report diagnostics, performing no
/// code generation (the `check <file>` CLI subcommand, spec §6).
pub fn check_file(source_path: &Path) -> Result<(), CompileError> {
    let source = read_source(source_path, &CompilerConfig::default())?;
    let filename = source_path.display().to_string();
    check_source(&source, &filename).map(|_| ())
}

/// Prepend any `extra_prelude` files ahead of the user's source, matching
/// spec §6's "a prelude module is conceptually concatenated ahead of
/// user source".
fn read_source(source_path: &Path, config: &CompilerConfig) -> Result<String, CompileError> {
    let mut combined = String::new();
    for prelude_path in &config.extra_prelude {
        let prelude = fs::read_to_string(prelude_path).map_err(|e| diagnostics::IoError::Read {
            path: prelude_path.clone(),
            source: e,
        })?;
        combined.push_str(&prelude);
        combined.push('\n');
    }
    let source = fs::read_to_string(source_path).map_err(|e| diagnostics::IoError::Read {
        path: source_path.to_path_buf(),
        source: e,
    })?;
    combined.push_str(&source);
    Ok(combined)
}

/// What a non-`check`, non-default compile produced, handed back to the
/// driver so it can decide whether to also print IR/AST or invoke the
/// external toolchain.
pub enum Emitted {
    /// `--emit-c`: a C11 translation unit, not yet compiled.
    CSource(String),
    /// `--emit-llvm`: textual LLVM IR, not yet compiled.
    LlvmIr(String),
    /// `--emit-obj` or the default executable: the backend's textual IR
    /// was produced and handed to the external toolchain, which wrote
    /// `output_path`.
    Linked,
}

/// Compile a `.paw` source file per `config.emit`. For `EmitKind::CSource`
/// / `EmitKind::LlvmIr` this returns the generated text without invoking
/// any external toolchain (spec §1: "file I/O and the invocation of the
/// external C compiler or LLVM linker" are a driver concern) — the
/// caller decides where to write it. For `Object`/`Executable` this
/// shells out to `cc`/`clang` and writes `output_path` directly, since
/// those emit kinds have no other useful observable result.
pub fn compile_file_with_config(
    source_path: &Path,
    output_path: &Path,
    config: &CompilerConfig,
) -> Result<Emitted, CompileError> {
    let t_start = Instant::now();
    let source = read_source(source_path, config)?;
    let filename = source_path.display().to_string();

    let t_lex = Instant::now();
    let stream = lexer::tokenize(&source, filename.as_str())?;
    log_stage(config, "lex", t_lex);

    let t_parse = Instant::now();
    let program = parser::parse(&stream)?;
    log_stage(config, "parse", t_parse);

    if config.print_ast {
        eprintln!("{:#?}", program);
    }

    let t_check = Instant::now();
    let tables = typechecker::check_program(&program, &filename)?;
    log_stage(config, "typecheck", t_check);

    let t_codegen = Instant::now();
    let result = match config.emit {
        EmitKind::CSource => {
            let c_source = codegen_c::codegen_program(&program, &tables)?;
            log_stage(config, "codegen (C)", t_codegen);
            if config.print_ir {
                eprintln!("{}", c_source);
            }
            Emitted::CSource(c_source)
        }
        EmitKind::LlvmIr => {
            let ir = codegen_llvm::codegen_program(&program, &tables)?;
            log_stage(config, "codegen (LLVM)", t_codegen);
            if config.print_ir {
                eprintln!("{}", ir);
            }
            Emitted::LlvmIr(ir)
        }
        EmitKind::Object | EmitKind::Executable => {
            let ir = codegen_llvm::codegen_program(&program, &tables)?;
            log_stage(config, "codegen (LLVM)", t_codegen);
            if config.print_ir {
                eprintln!("{}", ir);
            }
            link_via_clang(&ir, output_path, config)?;
            Emitted::Linked
        }
    };

    log_stage(config, "total", t_start);
    Ok(result)
}

/// Compile a `.paw` source file to an executable using the default
/// configuration.
pub fn compile_file(source_path: &Path, output_path: &Path) -> Result<(), CompileError> {
    compile_file_with_config(source_path, output_path, &CompilerConfig::default()).map(|_| ())
}

fn log_stage(config: &CompilerConfig, stage: &str, since: Instant) {
    if config.verbose {
        eprintln!("[pawc] {stage}: {:.3}ms", since.elapsed().as_secs_f64() * 1000.0);
    }
}

/// Write LLVM IR to a temporary `.ll` file and invoke `clang` to produce
/// `output_path`, either an object file (`Object`) or a linked
/// executable (`Executable`). This is a thin convenience wrapper; a
/// full-featured driver may instead write the IR itself and invoke the
/// toolchain with project-specific flags.
fn link_via_clang(
    ir: &str,
    output_path: &Path,
    config: &CompilerConfig,
) -> Result<(), CompileError> {
    let ir_path = output_path.with_extension("ll");
    fs::write(&ir_path, ir).map_err(|e| diagnostics::IoError::Write {
        path: ir_path.clone(),
        source: e,
    })?;

    let mut clang = Command::new("clang");
    clang.arg(config.optimization.as_flag()).arg(&ir_path);
    if config.emit == EmitKind::Object {
        clang.arg("-c");
    }
    clang.arg("-o").arg(output_path);
    let command_str = format!("{:?}", clang);

    let output = clang.output().map_err(|_| diagnostics::LinkError {
        command: command_str.clone(),
        status: None,
    })?;

    fs::remove_file(&ir_path).ok();

    if !output.status.success() {
        return Err(diagnostics::LinkError {
            command: command_str,
            status: output.status.code(),
        }
        .into());
    }
    Ok(())
}

/// Scaffold a new project directory (the `init <name>` CLI subcommand,
/// spec §6): `name/src/main.paw` with a hello-world `main`, plus a
/// `name/Paw.toml` manifest stub.
pub fn init_project(name: &Path) -> Result<(), CompileError> {
    let src_dir = name.join("src");
    fs::create_dir_all(&src_dir).map_err(|e| diagnostics::IoError::Write {
        path: src_dir.clone(),
        source: e,
    })?;

    let main_paw = src_dir.join("main.paw");
    let main_contents = "fn main() -> i32 {\n    return 0;\n}\n";
    fs::write(&main_paw, main_contents).map_err(|e| diagnostics::IoError::Write {
        path: main_paw.clone(),
        source: e,
    })?;

    let manifest_path = name.join("Paw.toml");
    let project_name = name
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("paw-project");
    let manifest = format!("[package]\nname = \"{project_name}\"\nversion = \"0.1.0\"\n");
    fs::write(&manifest_path, manifest).map_err(|e| diagnostics::IoError::Write {
        path: manifest_path.clone(),
        source: e,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_source_accepts_a_valid_program() {
        assert!(check_source("fn main() -> i32 { return 40 + 2; }", "t.paw").is_ok());
    }

    #[test]
    fn check_source_reports_missing_main() {
        let err = check_source("fn helper() -> i32 { return 1; }", "t.paw").unwrap_err();
        assert!(matches!(err, CompileError::Type(_)));
    }

    #[test]
    fn compile_file_with_config_emits_c_source_text() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("hello.paw");
        fs::write(&src_path, "fn main() -> i32 { return 42; }").unwrap();
        let out_path = dir.path().join("hello");

        let config = CompilerConfig::new().with_emit(EmitKind::CSource);
        let emitted = compile_file_with_config(&src_path, &out_path, &config).unwrap();
        match emitted {
            Emitted::CSource(src) => {
                assert!(src.contains("main(void)"));
            }
            _ => panic!("expected C source"),
        }
    }

    #[test]
    fn compile_file_with_config_emits_llvm_ir_text() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("hello.paw");
        fs::write(&src_path, "fn main() -> i32 { return 42; }").unwrap();
        let out_path = dir.path().join("hello");

        let config = CompilerConfig::new().with_emit(EmitKind::LlvmIr);
        let emitted = compile_file_with_config(&src_path, &out_path, &config).unwrap();
        match emitted {
            Emitted::LlvmIr(ir) => {
                assert!(ir.contains("define"));
            }
            _ => panic!("expected LLVM IR"),
        }
    }

    #[test]
    fn init_project_scaffolds_hello_world() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("demo");
        init_project(&project).unwrap();
        assert!(project.join("src/main.paw").exists());
        assert!(project.join("Paw.toml").exists());
    }

    #[test]
    fn check_file_rejects_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("bad.paw");
        fs::write(&src_path, "fn main( -> i32 { return 1; }").unwrap();
        assert!(check_file(&src_path).is_err());
    }
}
