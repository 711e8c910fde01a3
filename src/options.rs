//! Run configuration and the embeddable `Sed` facade.
//!
//! [`Options`] mirrors the CLI flags one-to-one. [`Sed`] collects script
//! sources (`-e` expressions, `-f` files, pre-built commands) and input
//! files, assembles and parses the script once, and then drives the engine:
//! to a caller-supplied writer, or per file through the in-place editor.

use crate::command::{Command, Instruction, Program};
use crate::dialect::Dialect;
use crate::engine::{Engine, EngineConfig};
use crate::error::{Result, SedError};
use crate::inplace::InPlaceTarget;
use crate::parser::{parse_script, ParseSettings};
use crate::reader::{InputSource, RecordReader};
use crate::sink::Sink;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// All run options; the CLI flags as plain properties.
#[derive(Debug, Clone)]
pub struct Options {
    /// `-n`: suppress the default print.
    pub quiet: bool,
    /// `-i[SUFFIX]`: rewrite inputs in place. An empty suffix keeps no
    /// backup.
    pub in_place: Option<String>,
    /// `--follow-symlinks`: resolve links before in-place rewriting.
    pub follow_symlinks: bool,
    /// `-l N`: default width for the `l` command (0 disables wrapping).
    pub line_wrap: u64,
    /// `--posix`: disable extensions.
    pub posix: bool,
    /// `-E`/`-r`: extended regex dialect.
    pub extended_regex: bool,
    /// `-s`: per-file line counter and `$`.
    pub separate: bool,
    /// `--sandbox`: reject `e`, `r`, `R`, `w`, `W`.
    pub sandbox: bool,
    /// `-u`: flush after each record.
    pub unbuffered: bool,
    /// `--end C` / `-z`: record terminator byte.
    pub term: u8,
    /// `--debug`: annotate the execution trace.
    pub debug: bool,
    /// `--verbose`: verbose error reporting.
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            quiet: false,
            in_place: None,
            follow_symlinks: false,
            line_wrap: 70,
            posix: false,
            extended_regex: false,
            separate: false,
            sandbox: false,
            unbuffered: false,
            term: b'\n',
            debug: false,
            verbose: false,
        }
    }
}

enum ScriptFragment {
    Expression(Vec<u8>),
    File { path: PathBuf, text: Vec<u8> },
}

impl ScriptFragment {
    fn text(&self) -> &[u8] {
        match self {
            ScriptFragment::Expression(text) => text,
            ScriptFragment::File { text, .. } => text,
        }
    }
}

/// A configured stream-editor run.
pub struct Sed {
    options: Options,
    fragments: Vec<ScriptFragment>,
    extra_commands: Vec<Instruction>,
    inputs: Vec<InputSource>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Sed {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            fragments: Vec::new(),
            extra_commands: Vec::new(),
            inputs: Vec::new(),
            cancel: None,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Append a script expression (`-e`).
    pub fn add_expression(&mut self, script: impl AsRef<[u8]>) {
        self.fragments
            .push(ScriptFragment::Expression(script.as_ref().to_vec()));
    }

    /// Append the contents of a script file (`-f`). Read eagerly so an
    /// unreadable script fails before any input is touched.
    pub fn add_script_file(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let text = std::fs::read(&path).map_err(|e| SedError::InputOpen {
            name: path.display().to_string(),
            source: e,
        })?;
        self.fragments.push(ScriptFragment::File { path, text });
        Ok(())
    }

    /// Append a pre-built command to run after the scripted ones.
    pub fn add_command(&mut self, command: Instruction) {
        self.extra_commands.push(command);
    }

    pub fn add_commands(&mut self, commands: impl IntoIterator<Item = Instruction>) {
        self.extra_commands.extend(commands);
    }

    pub fn clear_commands(&mut self) {
        self.fragments.clear();
        self.extra_commands.clear();
    }

    /// Append an input file.
    pub fn add_file(&mut self, path: impl Into<PathBuf>) {
        self.inputs.push(InputSource::File(path.into()));
    }

    pub fn add_input(&mut self, source: InputSource) {
        self.inputs.push(source);
    }

    pub fn clear_files(&mut self) {
        self.inputs.clear();
    }

    /// Cooperative cancellation: the engine checks this flag between
    /// cycles.
    pub fn set_cancel_token(&mut self, token: Arc<AtomicBool>) {
        self.cancel = Some(token);
    }

    /// Assemble and parse the script. Parse errors come back decorated with
    /// their expression number or script-file line.
    pub fn compile(&self) -> Result<Program> {
        let term = self.options.term;
        let mut script = Vec::new();
        for (i, fragment) in self.fragments.iter().enumerate() {
            if i > 0 {
                script.push(term);
            }
            script.extend_from_slice(fragment.text());
        }
        let settings = ParseSettings {
            term,
            posix: self.options.posix,
            sandbox: self.options.sandbox,
        };
        let mut program =
            parse_script(&script, settings).map_err(|e| self.decorate_parse_error(e))?;
        if !self.extra_commands.is_empty() {
            program.instructions.extend(self.extra_commands.iter().cloned());
            resolve_branches(&mut program)?;
        }
        Ok(program)
    }

    /// Run the configured edit, writing output to `writer` (ignored in
    /// in-place mode). Returns the exit code carried by `q`/`Q`, else 0.
    pub fn execute<W: Write>(&self, writer: W) -> Result<i32> {
        let program = self.compile()?;
        let config = EngineConfig {
            term: self.options.term,
            suppress_default_print: self.options.quiet || program.suppress_default_print,
            posix: self.options.posix,
            // In-place editing treats every target as its own universe.
            separate: self.options.separate || self.options.in_place.is_some(),
            line_wrap: self.options.line_wrap,
            dialect: if self.options.extended_regex {
                Dialect::Extended
            } else {
                Dialect::Basic
            },
            cancel: self.cancel.clone(),
        };

        match &self.options.in_place {
            Some(suffix) => {
                let _ = writer;
                self.execute_in_place(&program, config, suffix)
            }
            None => {
                let sources = if self.inputs.is_empty() {
                    vec![InputSource::Stdin]
                } else {
                    self.inputs.clone()
                };
                let reader = RecordReader::new(sources, config.term, config.separate);
                let sink = Sink::new(writer, config.term, self.options.unbuffered);
                let engine = Engine::new(&program, reader, sink, config);
                Ok(engine.run()?.exit_code)
            }
        }
    }

    fn execute_in_place(
        &self,
        program: &Program,
        config: EngineConfig,
        suffix: &str,
    ) -> Result<i32> {
        let backup = if suffix.is_empty() {
            None
        } else {
            Some(suffix)
        };
        if self.inputs.is_empty() {
            return Err(SedError::InPlace {
                path: PathBuf::from("-"),
                message: "no input files to edit in place".to_string(),
            });
        }
        let mut exit_code = 0;
        for source in &self.inputs {
            let InputSource::File(path) = source else {
                return Err(SedError::InPlace {
                    path: PathBuf::from("-"),
                    message: "cannot edit standard input in place".to_string(),
                });
            };
            let target = InPlaceTarget::begin(path, self.options.follow_symlinks)?;
            let reader = RecordReader::new(vec![source.clone()], config.term, true);
            let sink = Sink::new(target.writer()?, config.term, self.options.unbuffered);
            let engine = Engine::new(program, reader, sink, config.clone());
            // An execution error drops `target`, discarding the temp file
            // and leaving the original untouched.
            let outcome = engine.run()?;
            target.commit(backup)?;
            exit_code = outcome.exit_code;
            if outcome.quit {
                break;
            }
        }
        Ok(exit_code)
    }

    fn decorate_parse_error(&self, err: SedError) -> SedError {
        let SedError::ScriptParse { offset, message } = err else {
            return err;
        };
        let term = self.options.term;
        let mut start = 0;
        let mut expr_index = 0;
        for fragment in &self.fragments {
            let end = start + fragment.text().len();
            if offset <= end {
                let local = offset - start;
                let message = match fragment {
                    ScriptFragment::Expression(_) => format!(
                        "-e expression #{}, char {}: {}",
                        expr_index + 1,
                        local + 1,
                        message
                    ),
                    ScriptFragment::File { path, text } => {
                        let line =
                            text[..local].iter().filter(|&&b| b == term).count() + 1;
                        format!("file {} line {}: {}", path.display(), line, message)
                    }
                };
                return SedError::ScriptParse { offset, message };
            }
            start = end + 1;
            if matches!(fragment, ScriptFragment::Expression(_)) {
                expr_index += 1;
            }
        }
        SedError::ScriptParse {
            offset,
            message: format!("char {}: {}", offset + 1, message),
        }
    }
}

/// Re-resolve branch targets after commands were appended: labels may now
/// live past the parsed script, and "branch to end" means the new end.
fn resolve_branches(program: &mut Program) -> Result<()> {
    let appended_labels: Vec<(String, usize)> = program
        .instructions
        .iter()
        .enumerate()
        .filter_map(|(i, inst)| match &inst.command {
            Command::Label { name } => Some((name.clone(), i)),
            _ => None,
        })
        .collect();
    for (name, index) in appended_labels {
        program.labels.entry(name).or_insert(index);
    }

    let end = program.instructions.len();
    for inst in &mut program.instructions {
        if let Command::Branch(t) | Command::Test(t) | Command::TestNot(t) = &mut inst.command {
            match &t.label {
                None => t.target = end,
                Some(name) => {
                    t.target = *program
                        .labels
                        .get(name)
                        .ok_or_else(|| SedError::UndefinedLabel(name.clone()))?;
                }
            }
        }
    }
    Ok(())
}

/// Convenience wrapper: run `script` over `inputs` and collect the output.
pub fn run_to_vec(
    options: Options,
    script: &str,
    inputs: &[impl AsRef<Path>],
) -> Result<(i32, Vec<u8>)> {
    let mut sed = Sed::new(options);
    sed.add_expression(script);
    for path in inputs {
        let path: &Path = path.as_ref();
        sed.add_file(path);
    }
    let mut out = Vec::new();
    let code = sed.execute(&mut out)?;
    Ok((code, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::AddressSpec;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_expressions_joined_by_terminator() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "in.txt", b"abc\n");
        let mut sed = Sed::new(Options::default());
        sed.add_expression("s/a/x/");
        sed.add_expression("s/c/z/");
        sed.add_file(&input);
        let mut out = Vec::new();
        sed.execute(&mut out).unwrap();
        assert_eq!(out, b"xbz\n");
    }

    #[test]
    fn test_script_file_source() {
        let dir = TempDir::new().unwrap();
        let script = write_file(&dir, "script.sed", b"s/a/b/\n");
        let input = write_file(&dir, "in.txt", b"a\n");
        let mut sed = Sed::new(Options::default());
        sed.add_script_file(&script).unwrap();
        sed.add_file(&input);
        let mut out = Vec::new();
        sed.execute(&mut out).unwrap();
        assert_eq!(out, b"b\n");
    }

    #[test]
    fn test_missing_script_file() {
        let mut sed = Sed::new(Options::default());
        let err = sed.add_script_file("/nonexistent/script.sed").unwrap_err();
        assert!(matches!(err, SedError::InputOpen { .. }));
    }

    #[test]
    fn test_parse_error_decorated_with_expression_number() {
        let mut sed = Sed::new(Options::default());
        sed.add_expression("p");
        sed.add_expression("s/a");
        let err = sed.compile().unwrap_err();
        let message = err.to_string();
        assert!(
            message.starts_with("-e expression #2, char 1:"),
            "unexpected message: {message}"
        );
    }

    #[test]
    fn test_parse_error_decorated_with_file_line() {
        let dir = TempDir::new().unwrap();
        let script = write_file(&dir, "script.sed", b"p\np\ns/a\n");
        let mut sed = Sed::new(Options::default());
        sed.add_script_file(&script).unwrap();
        let err = sed.compile().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("line 3"), "unexpected message: {message}");
    }

    #[test]
    fn test_add_command_appends_to_program() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "in.txt", b"a\nb\n");
        let mut sed = Sed::new(Options {
            quiet: true,
            ..Options::default()
        });
        sed.add_command(Instruction::new(AddressSpec::None, false, Command::Print));
        sed.add_file(&input);
        let mut out = Vec::new();
        sed.execute(&mut out).unwrap();
        assert_eq!(out, b"a\nb\n");
    }

    #[test]
    fn test_clear_commands_and_files() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "in.txt", b"a\n");
        let mut sed = Sed::new(Options::default());
        sed.add_expression("d");
        sed.clear_commands();
        sed.add_file(&input);
        sed.clear_files();
        sed.add_file(&input);
        let mut out = Vec::new();
        sed.execute(&mut out).unwrap();
        assert_eq!(out, b"a\n");
    }

    #[test]
    fn test_exit_code_from_quit() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "in.txt", b"a\nb\n");
        let (code, out) = run_to_vec(Options::default(), "q 3", &[&input]).unwrap();
        assert_eq!(code, 3);
        assert_eq!(out, b"a\n");
    }

    #[test]
    fn test_in_place_edit() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "in.txt", b"a\nb\n");
        let options = Options {
            in_place: Some(String::new()),
            ..Options::default()
        };
        let mut sed = Sed::new(options);
        sed.add_expression("s/a/x/");
        sed.add_file(&input);
        sed.execute(std::io::sink()).unwrap();
        assert_eq!(fs::read(&input).unwrap(), b"x\nb\n");
    }

    #[test]
    fn test_in_place_with_backup() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "in.txt", b"a\n");
        let options = Options {
            in_place: Some(".bak".to_string()),
            ..Options::default()
        };
        let mut sed = Sed::new(options);
        sed.add_expression("s/a/x/");
        sed.add_file(&input);
        sed.execute(std::io::sink()).unwrap();
        assert_eq!(fs::read(&input).unwrap(), b"x\n");
        assert_eq!(fs::read(dir.path().join("in.txt.bak")).unwrap(), b"a\n");
    }

    #[test]
    fn test_in_place_counts_lines_per_file() {
        let dir = TempDir::new().unwrap();
        let one = write_file(&dir, "one.txt", b"a\nb\n");
        let two = write_file(&dir, "two.txt", b"c\nd\n");
        let options = Options {
            in_place: Some(String::new()),
            ..Options::default()
        };
        let mut sed = Sed::new(options);
        sed.add_expression("$d");
        sed.add_file(&one);
        sed.add_file(&two);
        sed.execute(std::io::sink()).unwrap();
        // `$` is each file's own last line under -i.
        assert_eq!(fs::read(&one).unwrap(), b"a\n");
        assert_eq!(fs::read(&two).unwrap(), b"c\n");
    }

    #[test]
    fn test_in_place_quit_stops_remaining_files() {
        let dir = TempDir::new().unwrap();
        let one = write_file(&dir, "one.txt", b"a\n");
        let two = write_file(&dir, "two.txt", b"b\n");
        let options = Options {
            in_place: Some(String::new()),
            ..Options::default()
        };
        let mut sed = Sed::new(options);
        sed.add_expression("s/./X/;q");
        sed.add_file(&one);
        sed.add_file(&two);
        sed.execute(std::io::sink()).unwrap();
        assert_eq!(fs::read(&one).unwrap(), b"X\n");
        // The second file was never touched.
        assert_eq!(fs::read(&two).unwrap(), b"b\n");
    }

    #[test]
    fn test_in_place_requires_file_inputs() {
        let options = Options {
            in_place: Some(String::new()),
            ..Options::default()
        };
        let sed = Sed::new(options);
        let err = sed.execute(std::io::sink()).unwrap_err();
        assert!(matches!(err, SedError::InPlace { .. }));
    }

    #[test]
    fn test_sandbox_rejected_at_compile_time() {
        let options = Options {
            sandbox: true,
            ..Options::default()
        };
        let mut sed = Sed::new(options);
        sed.add_expression("w /tmp/out");
        assert!(matches!(sed.compile().unwrap_err(), SedError::Sandbox));
    }

    #[test]
    fn test_extended_regex_option() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "in.txt", b"abab\n");
        let options = Options {
            extended_regex: true,
            ..Options::default()
        };
        let (_, out) = run_to_vec(options, "s/(ab)+/X/", &[&input]).unwrap();
        assert_eq!(out, b"X\n");
        // Same pattern in basic mode: parens are literal, no match.
        let (_, out) = run_to_vec(Options::default(), "s/(ab)+/X/", &[&input]).unwrap();
        assert_eq!(out, b"abab\n");
    }

    #[test]
    fn test_null_data_option() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "in.txt", b"a\nb\0c\0");
        let options = Options {
            term: 0,
            ..Options::default()
        };
        let (_, out) = run_to_vec(options, "s/b/X/", &[&input]).unwrap();
        assert_eq!(out, b"a\nX\0c\0");
    }
}
