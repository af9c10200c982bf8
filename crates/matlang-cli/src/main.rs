//! The `matlang` binary.
//!
//! Connects to the parser front-end, parses the target source file,
//! loads the resulting functions into the interpreter, and runs the
//! entry unit (a script runs directly; otherwise the first function is
//! called with no arguments). `-name value` pairs set configuration
//! variables; the trailing positional argument is the source file.
//!
//! Uses the same interpreter/JIT pipeline as embedded use, so behavior
//! matches whichever way the core is driven.

use std::process;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use matlang_check::interpreter::Interpreter;
use matlang_core::{config, metrics};
use matlang_frontend::{reader, ParserClient};

/// A just-in-time optimizing interpreter for a matrix language.
#[derive(Parser)]
#[command(name = "matlang", about = "Matrix-language interpreter and JIT")]
struct Cli {
    /// Parser front-end host.
    #[arg(long, default_value = matlang_frontend::client::DEFAULT_HOST)]
    frontend_host: String,

    /// Parser front-end port.
    #[arg(long, default_value_t = matlang_frontend::client::DEFAULT_PORT)]
    frontend_port: u16,

    /// Configuration options (`-name value` pairs) followed by the
    /// source file to run.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    rest: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    // The JIT registers its config variables before the command line is
    // parsed against the registry.
    matlang_codegen::initialize();

    let target = match config::parse_args(&cli.rest) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };

    let filter = if config::get_bool("verbose") {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let start_dir = config::get_str("start_dir");
    if !start_dir.is_empty() {
        if let Err(e) = std::env::set_current_dir(&start_dir) {
            eprintln!("Error: cannot enter start directory '{}': {}", start_dir, e);
            return 2;
        }
    }

    let Some(file) = target else {
        eprintln!("Error: no source file given");
        return 2;
    };

    let client = match ParserClient::connect(&cli.frontend_host, cli.frontend_port) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 3;
        }
    };

    let reply = match client.parse_file(&file) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 3;
        }
    };
    let units = match reader::read_compilation_units(&reply) {
        Ok(u) => u,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };
    if units.is_empty() {
        eprintln!("Error: '{}' contains no functions or scripts", file);
        return 2;
    }
    debug!(count = units.len(), %file, "compilation units loaded");

    let status = Interpreter::with(|interp| {
        interp.load_functions(&units);
        // A script unit runs as-is; a function file runs its first
        // (main) function with no arguments.
        let entry = units[0];
        match interp.call_function(entry, &[], 0) {
            Ok(_) => 0,
            Err(e) => {
                eprintln!("{}", e);
                1
            }
        }
    });

    if config::get_bool("verbose") {
        let snapshot = metrics::snapshot();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => eprintln!("{}", json),
            Err(e) => eprintln!("metrics serialization failed: {}", e),
        }
    }
    status
}
