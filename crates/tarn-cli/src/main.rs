//! Tarn compiler CLI.
//!
//! Provides the `tarn` binary with subcommands for working with textual
//! GIR modules:
//!
//! - `optimize --pass <Name> <file>` parses the module, runs the named
//!   passes in a single pipeline stage, and prints the result;
//! - `print <file>` parses and re-prints (a round-trip check);
//! - `emit <file> [-o out.ll]` verifies the module and emits LLVM IR;
//! - `tokens <file>` lexes a surface file and shows the layout-inserted
//!   token stream.
//!
//! Exit codes: 0 on success, 1 on verification or pass failure, 2 on
//! parse errors, 3 on I/O errors.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use tarn_gir::{parse_module, pass_by_name, print_module, verify, GirError, Module, Pipeline};

/// Tarn compiler and GIR tools.
#[derive(Parser)]
#[command(name = "tarn", about = "Tarn compiler and GIR tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run optimization passes over a textual GIR module.
    Optimize {
        /// Pass names, in order (e.g. SimplifyCFG). Repeatable.
        #[arg(short, long = "pass", required = true)]
        passes: Vec<String>,

        /// Path to the textual GIR module.
        file: PathBuf,
    },

    /// Parse a textual GIR module and print it back.
    Print {
        /// Path to the textual GIR module.
        file: PathBuf,
    },

    /// Verify a module and emit LLVM IR.
    Emit {
        /// Path to the textual GIR module.
        file: PathBuf,

        /// Output path; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Lex a surface file and show the layout-inserted token stream.
    Tokens {
        /// Path to the surface source file.
        file: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Optimize { passes, file } => run_optimize(&passes, &file),
        Commands::Print { file } => run_print(&file),
        Commands::Emit { file, output } => run_emit(&file, output.as_deref()),
        Commands::Tokens { file } => run_tokens(&file),
    };
    process::exit(exit_code);
}

/// Loads a textual GIR module, mapping failures onto exit codes.
fn load_module(path: &std::path::Path) -> Result<Module, i32> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            return Err(3);
        }
    };
    match parse_module(&text) {
        Ok(module) => Ok(module),
        Err(errors) => {
            for error in &errors {
                eprintln!("{}: {}", path.display(), error);
            }
            Err(2)
        }
    }
}

/// Execute the optimize subcommand.
fn run_optimize(passes: &[String], file: &std::path::Path) -> i32 {
    let mut module = match load_module(file) {
        Ok(module) => module,
        Err(code) => return code,
    };

    let mut pipeline = Pipeline::new();
    let stage = match pipeline.add_stage("optimize") {
        Ok(stage) => stage,
        Err(e) => {
            eprintln!("error: {}", e);
            return 1;
        }
    };
    for name in passes {
        let factory = match pass_by_name(name) {
            Some(factory) => factory,
            None => {
                eprintln!("error: {}", GirError::UnknownPass { name: name.clone() });
                return 1;
            }
        };
        if let Err(e) = pipeline.add_pass(stage, factory) {
            eprintln!("error: {}", e);
            return 1;
        }
    }

    if let Err(e) = pipeline.execute(&mut module) {
        eprintln!("error: {}", e);
        return 1;
    }

    match print_module(&module) {
        Ok(text) => {
            print!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("error: {}", e);
            1
        }
    }
}

/// Execute the print subcommand.
fn run_print(file: &std::path::Path) -> i32 {
    let module = match load_module(file) {
        Ok(module) => module,
        Err(code) => return code,
    };
    match print_module(&module) {
        Ok(text) => {
            print!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("error: {}", e);
            1
        }
    }
}

/// Execute the emit subcommand.
fn run_emit(file: &std::path::Path, output: Option<&std::path::Path>) -> i32 {
    let module = match load_module(file) {
        Ok(module) => module,
        Err(code) => return code,
    };
    if let Err(e) = verify(&module) {
        eprintln!("error: {}", e);
        if let GirError::VerificationFailed(failures) = e {
            for failure in &failures {
                eprintln!("  - {}", failure);
            }
        }
        return 1;
    }
    let ir = match tarn_codegen::emit_to_ir(&module) {
        Ok(ir) => ir,
        Err(e) => {
            eprintln!("error: {}", e);
            return 1;
        }
    };
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, ir) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                return 3;
            }
            0
        }
        None => {
            print!("{}", ir);
            0
        }
    }
}

/// Execute the tokens subcommand.
fn run_tokens(file: &std::path::Path) -> i32 {
    let source = match std::fs::read_to_string(file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", file.display(), e);
            return 3;
        }
    };
    match tarn_syntax::tokenize(&source) {
        Ok(tokens) => {
            for token in tokens {
                let marker = match token.presence {
                    tarn_syntax::Presence::Synthetic => " (synthetic)",
                    tarn_syntax::Presence::User => "",
                };
                println!("{:?} {:?}{}", token.kind, token.text, marker);
            }
            0
        }
        Err(e) => {
            eprintln!("error: {}", e);
            2
        }
    }
}
