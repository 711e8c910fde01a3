//! Error types for script parsing and execution.
//!
//! Parse errors carry the byte offset into the assembled script so the CLI
//! can report `char N` positions the way classic sed implementations do.

use std::io;
use std::path::PathBuf;

/// Errors surfaced by the parser, reader, engine, and in-place editor.
#[derive(Debug, thiserror::Error)]
pub enum SedError {
    /// The script text could not be parsed. `offset` is the byte position
    /// into the assembled script where parsing failed; the message carries
    /// the user-facing location (`-e expression #N, char M`) once the
    /// script assembly has decorated it.
    #[error("{message}")]
    ScriptParse { offset: usize, message: String },

    /// A `b`, `t`, or `T` command referenced a label that no `:` defines.
    #[error("can't find label for jump to `{0}'")]
    UndefinedLabel(String),

    /// An unrecognized command character was found in the script.
    #[error("unknown command: `{0}'")]
    UnknownCommand(char),

    /// A regular expression failed to compile on the host engine.
    #[error("invalid regex `{pattern}': {message}")]
    RegexCompile { pattern: String, message: String },

    /// An input file could not be opened.
    #[error("can't read {name}: {source}")]
    InputOpen { name: String, source: io::Error },

    /// An input stream failed mid-read.
    #[error("read error on {name}: {source}")]
    InputRead { name: String, source: io::Error },

    /// The sink or a `w`/`W` target failed to accept bytes.
    #[error("couldn't write output: {0}")]
    OutputWrite(#[source] io::Error),

    /// A command forbidden by `--sandbox` appeared in the script.
    #[error("e/r/w commands disabled in sandbox mode")]
    Sandbox,

    /// The `e` command (or `s///e` flag) failed to run the shell.
    #[error("couldn't exec command: {0}")]
    ShellExec(#[source] io::Error),

    /// In-place editing failed; the original file is untouched.
    #[error("couldn't edit {}: {message}", path.display())]
    InPlace { path: PathBuf, message: String },
}

impl SedError {
    /// Exit code for the CLI: 1 for script errors, 2 for unreadable inputs,
    /// 4 for write-side failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            SedError::ScriptParse { .. }
            | SedError::UndefinedLabel(_)
            | SedError::UnknownCommand(_)
            | SedError::RegexCompile { .. }
            | SedError::Sandbox => 1,
            SedError::InputOpen { .. } | SedError::InputRead { .. } => 2,
            SedError::OutputWrite(_) | SedError::ShellExec(_) | SedError::InPlace { .. } => 4,
        }
    }

    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> SedError {
        SedError::ScriptParse {
            offset,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SedError>;
