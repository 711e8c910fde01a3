use sedge::cli::{self, Invocation, ScriptSource};
use sedge::{InputSource, Sed, SedError};
use std::io;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let invocation = match cli::parse_args() {
        Ok(invocation) => invocation,
        Err(err) => {
            eprintln!("sedge: {err}");
            return 1;
        }
    };
    init_tracing(invocation.options.debug);

    let verbose = invocation.options.verbose;
    match execute(invocation) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err, verbose);
            err.exit_code()
        }
    }
}

fn execute(invocation: Invocation) -> std::result::Result<i32, SedError> {
    let mut sed = Sed::new(invocation.options);
    for source in invocation.sources {
        match source {
            ScriptSource::Expression(text) => sed.add_expression(text),
            ScriptSource::File(path) => sed.add_script_file(path)?,
        }
    }
    for input in invocation.inputs {
        if input == "-" {
            sed.add_input(InputSource::Stdin);
        } else {
            sed.add_file(input);
        }
    }

    let stdout = io::stdout();
    sed.execute(stdout.lock())
}

/// Single-line failures prefixed with the program name; `--verbose` adds a
/// context trail.
fn report_error(err: &SedError, verbose: bool) {
    eprintln!("sedge: {err}");
    if verbose {
        match err {
            SedError::ScriptParse { offset, .. } => {
                eprintln!("sedge: while parsing the script, at byte offset {offset}");
            }
            other => {
                eprintln!("sedge: while executing: {other:?}");
            }
        }
    }
}

/// With `--debug`, execution annotations go to stderr at debug level;
/// otherwise `RUST_LOG` decides what is shown.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("sedge=debug")
    } else {
        EnvFilter::from_default_env()
    };
    let subscriber = registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(false)
                .with_target(false),
        )
        .with(filter);
    let _ = tracing::subscriber::set_global_default(subscriber);
}
