//! Command-line interface.
//!
//! The flag surface follows GNU sed. The one wrinkle clap cannot express
//! directly is that `-e` and `-f` sources must be concatenated in the order
//! they appeared on the command line, so the builder matches are consulted
//! for argument indices and the two lists are interleaved accordingly.

use crate::options::Options;
use anyhow::{bail, Result};
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sedge")]
#[command(about = "A sed-compatible stream editor with both CLI and library interfaces")]
#[command(version)]
#[command(after_help = "If no -e or -f option is given, the first positional argument is taken \
as the script to interpret. Remaining arguments are input files; with none, standard input is \
read. A lone `-` names standard input explicitly.")]
struct Cli {
    /// Script to execute, only if no -e or -f option is given
    #[arg(value_name = "SCRIPT")]
    script: Option<String>,

    /// Input file(s) to edit
    #[arg(value_name = "INPUT_FILE")]
    input_files: Vec<String>,

    /// Suppress automatic printing of pattern space
    #[arg(short = 'n', long = "quiet", visible_alias = "silent")]
    quiet: bool,

    /// Add the script to the commands to be executed (repeatable)
    #[arg(short = 'e', long = "expression", value_name = "SCRIPT")]
    expressions: Vec<String>,

    /// Add the contents of script-file to the commands to be executed (repeatable)
    #[arg(short = 'f', long = "file", value_name = "SCRIPT_FILE")]
    script_files: Vec<PathBuf>,

    /// Edit files in place (makes a backup if SUFFIX is supplied)
    #[arg(
        short = 'i',
        long = "in-place",
        value_name = "SUFFIX",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = ""
    )]
    in_place: Option<String>,

    /// Follow symlinks when processing in place
    #[arg(long = "follow-symlinks")]
    follow_symlinks: bool,

    /// Specify the desired line-wrap length for the `l' command
    #[arg(short = 'l', long = "line-length", value_name = "N")]
    line_length: Option<u64>,

    /// Disable all GNU extensions
    #[arg(long)]
    posix: bool,

    /// Use extended regular expressions in the script
    #[arg(short = 'E', short_alias = 'r', long = "regexp-extended")]
    regexp_extended: bool,

    /// Consider files as separate rather than as a single continuous stream
    #[arg(short = 's', long = "separate")]
    separate: bool,

    /// Operate in sandbox mode (disable e/r/w commands)
    #[arg(long)]
    sandbox: bool,

    /// Load minimal amounts of data and flush the output buffers more often
    #[arg(short = 'u', long = "unbuffered")]
    unbuffered: bool,

    /// Record terminator byte (a single character, or one of \0 \n \t \r \\)
    #[arg(long = "end", value_name = "C")]
    end: Option<String>,

    /// Separate lines by NUL characters
    #[arg(short = 'z', long = "null-data")]
    null_data: bool,

    /// Annotate program execution
    #[arg(long)]
    debug: bool,

    /// Show verbose errors
    #[arg(long)]
    verbose: bool,
}

/// One script source, in command-line order.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptSource {
    Expression(String),
    File(PathBuf),
}

/// Everything `main` needs to configure a run.
#[derive(Debug)]
pub struct Invocation {
    pub options: Options,
    pub sources: Vec<ScriptSource>,
    pub inputs: Vec<String>,
}

/// Parse the process arguments. Usage errors, `--help`, and `--version`
/// are handled by clap and exit directly.
pub fn parse_args() -> Result<Invocation> {
    let matches = match Cli::command().try_get_matches_from(std::env::args()) {
        Ok(matches) => matches,
        Err(err) => err.exit(),
    };
    build_invocation(matches)
}

fn build_invocation(matches: ArgMatches) -> Result<Invocation> {
    let cli = Cli::from_arg_matches(&matches)?;

    let sources = ordered_sources(&matches, &cli);

    let (sources, inputs) = if sources.is_empty() {
        let Some(script) = cli.script else {
            bail!("no script specified; use a positional script, -e, or -f");
        };
        (vec![ScriptSource::Expression(script)], cli.input_files)
    } else {
        // With -e/-f present, every positional argument is an input file.
        let mut inputs = Vec::new();
        inputs.extend(cli.script);
        inputs.extend(cli.input_files);
        (sources, inputs)
    };

    let term = if cli.null_data {
        0
    } else {
        match &cli.end {
            Some(spec) => parse_terminator(spec)?,
            None => b'\n',
        }
    };

    let options = Options {
        quiet: cli.quiet,
        in_place: cli.in_place,
        follow_symlinks: cli.follow_symlinks,
        line_wrap: cli.line_length.unwrap_or(70),
        posix: cli.posix,
        extended_regex: cli.regexp_extended,
        separate: cli.separate,
        sandbox: cli.sandbox,
        unbuffered: cli.unbuffered,
        term,
        debug: cli.debug,
        verbose: cli.verbose,
    };

    Ok(Invocation {
        options,
        sources,
        inputs,
    })
}

/// Interleave `-e` and `-f` sources back into command-line order using the
/// argument indices clap recorded.
fn ordered_sources(matches: &ArgMatches, cli: &Cli) -> Vec<ScriptSource> {
    let mut tagged: Vec<(usize, ScriptSource)> = Vec::new();
    if let Some(indices) = matches.indices_of("expressions") {
        for (index, value) in indices.zip(cli.expressions.iter()) {
            tagged.push((index, ScriptSource::Expression(value.clone())));
        }
    }
    if let Some(indices) = matches.indices_of("script_files") {
        for (index, value) in indices.zip(cli.script_files.iter()) {
            tagged.push((index, ScriptSource::File(value.clone())));
        }
    }
    tagged.sort_by_key(|(index, _)| *index);
    tagged.into_iter().map(|(_, source)| source).collect()
}

/// `--end` accepts a single character or one of the usual escapes.
fn parse_terminator(spec: &str) -> Result<u8> {
    let bytes = spec.as_bytes();
    match bytes {
        [b] => Ok(*b),
        br"\0" => Ok(0),
        br"\n" => Ok(b'\n'),
        br"\t" => Ok(b'\t'),
        br"\r" => Ok(b'\r'),
        br"\\" => Ok(b'\\'),
        _ => bail!("invalid record terminator: {spec}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(args: &[&str]) -> Invocation {
        let mut full = vec!["sedge"];
        full.extend_from_slice(args);
        let matches = Cli::command().try_get_matches_from(full).unwrap();
        build_invocation(matches).unwrap()
    }

    #[test]
    fn test_positional_script() {
        let inv = invocation(&["s/a/b/", "one.txt", "two.txt"]);
        assert_eq!(
            inv.sources,
            vec![ScriptSource::Expression("s/a/b/".to_string())]
        );
        assert_eq!(inv.inputs, vec!["one.txt", "two.txt"]);
    }

    #[test]
    fn test_positional_becomes_input_with_expression_flag() {
        let inv = invocation(&["-e", "p", "data.txt"]);
        assert_eq!(inv.sources, vec![ScriptSource::Expression("p".to_string())]);
        assert_eq!(inv.inputs, vec!["data.txt"]);
    }

    #[test]
    fn test_expression_and_file_order_preserved() {
        let inv = invocation(&["-e", "p", "-f", "a.sed", "-e", "d"]);
        assert_eq!(
            inv.sources,
            vec![
                ScriptSource::Expression("p".to_string()),
                ScriptSource::File(PathBuf::from("a.sed")),
                ScriptSource::Expression("d".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_script_is_an_error() {
        let matches = Cli::command().try_get_matches_from(["sedge"]).unwrap();
        assert!(build_invocation(matches).is_err());
    }

    #[test]
    fn test_flags_map_to_options() {
        let inv = invocation(&["-n", "-E", "-s", "-u", "--sandbox", "--posix", "p"]);
        assert!(inv.options.quiet);
        assert!(inv.options.extended_regex);
        assert!(inv.options.separate);
        assert!(inv.options.unbuffered);
        assert!(inv.options.sandbox);
        assert!(inv.options.posix);
    }

    #[test]
    fn test_in_place_with_and_without_suffix() {
        let inv = invocation(&["-i", "p", "f.txt"]);
        assert_eq!(inv.options.in_place, Some(String::new()));

        let inv = invocation(&["--in-place=.bak", "p", "f.txt"]);
        assert_eq!(inv.options.in_place, Some(".bak".to_string()));

        let inv = invocation(&["p", "f.txt"]);
        assert_eq!(inv.options.in_place, None);
    }

    #[test]
    fn test_null_data_and_end_terminator() {
        let inv = invocation(&["-z", "p"]);
        assert_eq!(inv.options.term, 0);

        let inv = invocation(&["--end", r"\0", "p"]);
        assert_eq!(inv.options.term, 0);

        let inv = invocation(&["--end", ";", "p"]);
        assert_eq!(inv.options.term, b';');

        let inv = invocation(&["p"]);
        assert_eq!(inv.options.term, b'\n');
    }

    #[test]
    fn test_invalid_terminator_rejected() {
        assert!(parse_terminator("ab").is_err());
        assert!(parse_terminator("").is_err());
        assert_eq!(parse_terminator(r"\t").unwrap(), b'\t');
    }

    #[test]
    fn test_line_length() {
        let inv = invocation(&["-l", "120", "p"]);
        assert_eq!(inv.options.line_wrap, 120);
        let inv = invocation(&["p"]);
        assert_eq!(inv.options.line_wrap, 70);
    }

    #[test]
    fn test_short_r_alias_for_extended() {
        let inv = invocation(&["-r", "p"]);
        assert!(inv.options.extended_regex);
    }
}
