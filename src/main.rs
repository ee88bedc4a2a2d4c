//! Paw Compiler CLI
//!
//! Thin driver over the `pawc` library: owns argument parsing, file I/O,
//! and external-toolchain invocation, none of which are the core
//! pipeline's concern (spec §1). The default action (no subcommand)
//! compiles a `.paw` file; `check` runs only the front end; `init`
//! scaffolds a project; `completions` shells out to `clap_complete`.

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use pawc::{CompilerConfig, EmitKind, Emitted, OptimizationLevel};
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OptLevel {
    O0,
    O1,
    O2,
    O3,
}

impl From<OptLevel> for OptimizationLevel {
    fn from(level: OptLevel) -> Self {
        match level {
            OptLevel::O0 => OptimizationLevel::O0,
            OptLevel::O1 => OptimizationLevel::O1,
            OptLevel::O2 => OptimizationLevel::O2,
            OptLevel::O3 => OptimizationLevel::O3,
        }
    }
}

#[derive(Parser)]
#[command(name = "pawc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Paw compiler - compile .paw programs to C, LLVM IR, or executables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input .paw source file (default action: compile it)
    input: Option<PathBuf>,

    /// Output artifact path (defaults to the input filename without its extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit a C11 source file instead of linking an executable
    #[arg(long, conflicts_with_all = ["emit_llvm", "emit_obj"])]
    emit_c: bool,

    /// Emit textual LLVM IR instead of linking an executable
    #[arg(long, conflicts_with_all = ["emit_c", "emit_obj"])]
    emit_llvm: bool,

    /// Emit a linked object file instead of an executable
    #[arg(long, conflicts_with_all = ["emit_c", "emit_llvm"])]
    emit_obj: bool,

    /// Print the parsed AST to stderr before type-checking
    #[arg(long)]
    print_ast: bool,

    /// Print the generated IR/C source to stderr before writing it
    #[arg(long)]
    print_ir: bool,

    /// Optimization hint forwarded to the external C/LLVM toolchain
    #[arg(short = 'O', value_enum, default_value = "o0")]
    opt: OptLevel,

    /// Echo each pipeline stage's timing to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Additional prelude file(s) concatenated ahead of the source
    #[arg(long = "prelude", value_name = "PATH")]
    preludes: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Type-check a .paw file without generating code
    Check {
        /// Input .paw source file
        input: PathBuf,
    },

    /// Scaffold a new Paw project directory
    Init {
        /// Directory to create
        name: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check { input }) => run_check(&input),
        Some(Commands::Init { name }) => run_init(&name),
        Some(Commands::Completions { shell }) => run_completions(shell),
        None => match cli.input {
            Some(input) => run_build(
                &input,
                cli.output.as_deref(),
                build_config(&cli),
            ),
            None => {
                let _ = Cli::command().print_help();
                process::exit(1);
            }
        },
    }
}

fn build_config(cli: &Cli) -> CompilerConfig {
    let emit = if cli.emit_c {
        EmitKind::CSource
    } else if cli.emit_llvm {
        EmitKind::LlvmIr
    } else if cli.emit_obj {
        EmitKind::Object
    } else {
        EmitKind::Executable
    };

    CompilerConfig::new()
        .with_emit(emit)
        .with_optimization(cli.opt.into())
        .with_print_ast(cli.print_ast)
        .with_print_ir(cli.print_ir)
        .with_verbose(cli.verbose)
        .with_preludes(cli.preludes.iter().cloned())
}

fn default_output_path(input: &std::path::Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default();
    PathBuf::from(stem)
}

fn run_build(input: &std::path::Path, output: Option<&std::path::Path>, config: CompilerConfig) {
    let owned_output;
    let output = match output {
        Some(path) => path,
        None => {
            owned_output = default_output_path(input);
            &owned_output
        }
    };

    match pawc::compile_file_with_config(input, output, &config) {
        Ok(Emitted::CSource(src)) => {
            if let Err(e) = std::fs::write(output.with_extension("c"), src) {
                eprintln!("Error writing C source: {}", e);
                process::exit(1);
            }
            println!("Wrote {}", output.with_extension("c").display());
        }
        Ok(Emitted::LlvmIr(ir)) => {
            if let Err(e) = std::fs::write(output.with_extension("ll"), ir) {
                eprintln!("Error writing LLVM IR: {}", e);
                process::exit(1);
            }
            println!("Wrote {}", output.with_extension("ll").display());
        }
        Ok(Emitted::Linked) => {
            println!("Compiled {} -> {}", input.display(), output.display());
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn run_check(input: &std::path::Path) {
    match pawc::check_file(input) {
        Ok(()) => println!("{}: no errors", input.display()),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn run_init(name: &std::path::Path) {
    match pawc::init_project(name) {
        Ok(()) => println!("Created project at {}", name.display()),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "pawc", &mut io::stdout());
}
