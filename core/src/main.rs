use std::path::PathBuf;

use clap::Parser;

use faultloc_core::ast::{CFrontend, JsonCFrontend};
use faultloc_core::diag::CoreError;
use faultloc_core::instrument::{self, InstrumentOptions};

const EXIT_OK: i32 = 0;
const EXIT_USAGE_ERROR: i32 = 2;
const EXIT_SYSTEM_ERROR: i32 = 3;

/// The §6 CLI surface: number and instrument one translation unit. The
/// predicate-engine and variant-representation subsystems have no CLI of
/// their own — they are library entry points for a genetic-search driver,
/// not standalone tools (see SPEC_FULL.md Non-goals).
#[derive(Parser, Debug)]
#[command(
    name = "flc-instrument",
    version,
    about = "Numbers and instruments a C translation unit for coverage tracing"
)]
struct Cli {
    /// JSON-encoded AST produced by an external C frontend (see
    /// `faultloc_core::ast::CFrontend`)
    source: PathBuf,

    /// Output path for the instrumented translation unit (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Split call-containing statements so a traced call can be isolated
    /// from its surrounding straight-line code
    #[arg(long)]
    calls: bool,

    /// Record source locations alongside each numbered statement
    #[arg(long)]
    loc: bool,

    /// Include source-location text in each trace record, not just the sid
    #[arg(long)]
    loc_debug: bool,

    /// Functions to split calls to when --calls is set (repeatable)
    #[arg(long = "split-target")]
    split_targets: Vec<String>,

    /// Path the instrumented program's trace records will be written to
    /// at runtime
    #[arg(long, default_value = "trace.path")]
    trace_path: String,

    /// Print the pristine (numbered, uninstrumented) AST instead of the
    /// instrumented program
    #[arg(long)]
    emit_pristine: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.loc_debug && !cli.loc {
        eprintln!("error: --loc-debug requires --loc");
        std::process::exit(EXIT_USAGE_ERROR);
    }

    let frontend = JsonCFrontend;
    let program = match frontend.parse(&cli.source) {
        Ok(p) => p,
        Err(e) => {
            report(&e);
            std::process::exit(exit_code_for(&e));
        }
    };

    let opts = InstrumentOptions {
        calls: cli.calls,
        loc: cli.loc,
        loc_debug: cli.loc_debug,
        split_targets: cli.split_targets.clone(),
    };

    let program = instrument::split_calls(program, &opts.split_targets);
    let result = instrument::number_statements(program, &opts);

    let artifacts = instrument::artifact_paths(&cli.source);
    if let Err(e) = instrument::serialize_pristine_ast(&result.program, &artifacts.ast) {
        report(&e);
        std::process::exit(exit_code_for(&e));
    }
    if let Err(e) = instrument::write_ht_artifact(&result.map, result.next_sid, &artifacts.ht) {
        report(&e);
        std::process::exit(exit_code_for(&e));
    }
    if let Some(loc_map) = &result.loc_map {
        if let Err(e) = instrument::write_loc_artifact(loc_map, &artifacts.loc_ht) {
            report(&e);
            std::process::exit(exit_code_for(&e));
        }
    }

    if cli.emit_pristine {
        emit(&cli.output, &format!("{:#?}", result.program));
        std::process::exit(EXIT_OK);
    }

    let instrumented = match &result.loc_map {
        Some(loc_map) => instrument::instrument_with_locations(
            result.program,
            loc_map,
            &cli.trace_path,
            &opts,
        ),
        None => instrument::instrument(result.program, &cli.trace_path, &opts),
    };

    emit(&cli.output, &format!("{:#?}", instrumented));
    std::process::exit(EXIT_OK);
}

fn emit(output: &Option<PathBuf>, content: &str) {
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, content) {
                eprintln!("error: failed to write {}: {}", path.display(), e);
                std::process::exit(EXIT_SYSTEM_ERROR);
            }
        }
        None => println!("{content}"),
    }
}

fn report(e: &CoreError) {
    eprintln!("error: {e}");
}

fn exit_code_for(e: &CoreError) -> i32 {
    match e {
        CoreError::Io { .. } => EXIT_USAGE_ERROR,
        _ => EXIT_SYSTEM_ERROR,
    }
}
