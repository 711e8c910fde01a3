//! Execution engine.
//!
//! Drives the pattern space through the program once per record: evaluate
//! each instruction's addresses, execute the ones that fire, then emit the
//! pattern space and drain the append queue. Control flow out of a cycle
//! (`d`, `D`, `q`, `Q`, `n`/`N` at end of input) is modeled as an explicit
//! [`ExecOutcome`] rather than unwinding.
//!
//! One engine owns one run: the spaces, per-instruction range states, the
//! append queue, `R` read cursors, and the `w`/`W` file registry. Nothing is
//! process-global, so several runs can coexist in one process.

use crate::command::{
    Address, Address2, AddressSpec, Command, Instruction, Program, RegexFlags, SubstitutionFlags,
};
use crate::dialect::Dialect;
use crate::error::{Result, SedError};
use crate::reader::{Record, RecordReader};
use crate::regex_adapter::{substitute, RegexAdapter, Replacement};
use crate::sink::Sink;
use regex::bytes::Regex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Per-run knobs the engine needs.
#[derive(Clone)]
pub struct EngineConfig {
    pub term: u8,
    pub suppress_default_print: bool,
    pub posix: bool,
    pub separate: bool,
    /// Default wrap width for `l`; 0 disables wrapping.
    pub line_wrap: u64,
    pub dialect: Dialect,
    /// Checked at the top of every cycle; when set, the engine stops
    /// cleanly without draining further queues.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            term: b'\n',
            suppress_default_print: false,
            posix: false,
            separate: false,
            line_wrap: 70,
            dialect: Dialect::Basic,
            cancel: None,
        }
    }
}

/// How a pass over the program ended.
enum ExecOutcome {
    /// Fell off the end of the script.
    Finished,
    /// `d` (and `c`): no default print this cycle.
    Delete,
    /// `D` with an embedded terminator: rerun the program, no new record.
    RestartProgram,
    /// `q [code]`.
    EndWithPrint(i32),
    /// `Q [code]`.
    EndNoPrint(i32),
    /// `n`/`N` found no next record; printing/draining already settled.
    EndOfInput { print: bool, drain: bool },
}

/// Range activation state, one slot per instruction.
#[derive(Clone)]
enum RangeState {
    Inactive,
    Active(ActiveEnd),
}

#[derive(Clone)]
enum ActiveEnd {
    /// Resolved absolute line number to stop at (inclusive).
    Line(u64),
    Last,
    Regex { pattern: Vec<u8>, flags: RegexFlags },
}

pub struct Engine<'p, W: Write> {
    program: &'p Program,
    config: EngineConfig,
    adapter: RegexAdapter,
    reader: RecordReader,
    sink: Sink<W>,

    pattern: Vec<u8>,
    pattern_terminated: bool,
    hold: Vec<u8>,
    append: Vec<Vec<u8>>,
    sub_made: bool,
    line: u64,

    range_states: Vec<RangeState>,
    /// Pre-parsed replacement templates, one slot per instruction.
    replacements: Vec<Option<Replacement>>,
    /// Most recently used regex; an empty `//` reuses it.
    last_regex: Option<(Vec<u8>, RegexFlags)>,
    /// Per-path read cursors for `R`.
    read_cursors: HashMap<PathBuf, BufReader<File>>,
    /// Per-path targets for `w`/`W`; truncated once, appended thereafter.
    write_files: HashMap<PathBuf, File>,
}

impl<'p, W: Write> Engine<'p, W> {
    pub fn new(
        program: &'p Program,
        reader: RecordReader,
        sink: Sink<W>,
        config: EngineConfig,
    ) -> Self {
        let range_states = program
            .instructions
            .iter()
            .map(|inst| match &inst.addresses {
                // `0,/re/` is active before the first record so the end
                // regex is checked from record one.
                AddressSpec::Range(Address::Line(0), Address2::Abs(Address::Regex {
                    pattern,
                    flags,
                })) => RangeState::Active(ActiveEnd::Regex {
                    pattern: pattern.clone(),
                    flags: *flags,
                }),
                _ => RangeState::Inactive,
            })
            .collect();
        let replacements = program
            .instructions
            .iter()
            .map(|inst| match &inst.command {
                Command::Substitute { replacement, .. } => {
                    Some(Replacement::parse(replacement))
                }
                _ => None,
            })
            .collect();
        let dialect = config.dialect;
        Self {
            program,
            config,
            adapter: RegexAdapter::new(dialect),
            reader,
            sink,
            pattern: Vec::new(),
            pattern_terminated: true,
            hold: Vec::new(),
            append: Vec::new(),
            sub_made: false,
            line: 0,
            range_states,
            replacements,
            last_regex: None,
            read_cursors: HashMap::new(),
            write_files: HashMap::new(),
        }
    }

    /// Run all cycles.
    pub fn run(mut self) -> Result<RunOutcome<W>> {
        let mut exit_code = 0;
        let mut quit = false;
        loop {
            if self.cancelled() {
                break;
            }
            let Some(record) = self.pull_record()? else { break };
            self.pattern = record.bytes;
            self.pattern_terminated = record.terminated;
            self.sub_made = false;

            match self.run_program()? {
                ExecOutcome::Finished => {
                    self.auto_print()?;
                    self.drain_append()?;
                }
                ExecOutcome::Delete => {
                    self.drain_append()?;
                }
                ExecOutcome::EndWithPrint(code) => {
                    self.auto_print()?;
                    self.drain_append()?;
                    exit_code = code;
                    quit = true;
                    break;
                }
                ExecOutcome::EndNoPrint(code) => {
                    exit_code = code;
                    quit = true;
                    break;
                }
                ExecOutcome::EndOfInput { print, drain } => {
                    if print {
                        self.auto_print()?;
                    }
                    if drain {
                        self.drain_append()?;
                    }
                    break;
                }
                ExecOutcome::RestartProgram => unreachable!("handled in run_program"),
            }
        }
        self.sink.flush()?;
        Ok(RunOutcome {
            exit_code,
            quit,
            writer: self.sink.finish()?,
        })
    }

    fn cancelled(&self) -> bool {
        self.config
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Pull the next record, maintaining the line counter (per file in
    /// separate mode).
    fn pull_record(&mut self) -> Result<Option<Record>> {
        let record = self.reader.next_record()?;
        if record.is_some() {
            if self.config.separate && self.reader.current_file_changed() {
                self.line = 0;
            }
            self.line += 1;
        }
        Ok(record)
    }

    /// Run the program over the current pattern space, looping on `D`.
    fn run_program(&mut self) -> Result<ExecOutcome> {
        loop {
            match self.execute_pass()? {
                ExecOutcome::RestartProgram => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    fn execute_pass(&mut self) -> Result<ExecOutcome> {
        let program = self.program;
        let mut ip = 0;
        while ip < program.len() {
            let inst = &program.instructions[ip];
            let firing = self.evaluate(ip, inst)?;
            if !firing.fires {
                if let Command::BlockStart { end } = inst.command {
                    ip = end;
                }
                ip += 1;
                continue;
            }
            debug!(
                instruction = ip,
                line = self.line,
                command = command_name(&inst.command),
                "execute"
            );
            match &inst.command {
                Command::BlockStart { .. }
                | Command::BlockEnd { .. }
                | Command::Label { .. }
                | Command::Comment => {}

                Command::Print => {
                    let terminated = self.pattern_terminated;
                    self.sink.write_record(&self.pattern, terminated)?;
                }
                Command::PrintFirstLine => {
                    let end = first_line_len(&self.pattern, self.config.term);
                    let line = self.pattern[..end].to_vec();
                    self.sink.write_record(&line, true)?;
                }
                Command::List { width } => {
                    let width = width.unwrap_or(self.config.line_wrap);
                    let rendered = self.render_unambiguous(width);
                    self.sink.write_record(&rendered, true)?;
                }
                Command::LineNumber => {
                    let text = self.line.to_string();
                    self.sink.write_record(text.as_bytes(), true)?;
                }
                Command::FileName => {
                    let name = self.reader.current_file_name().as_bytes().to_vec();
                    self.sink.write_record(&name, true)?;
                }

                Command::Delete => return Ok(ExecOutcome::Delete),
                Command::DeleteFirstLine => {
                    match self.pattern.iter().position(|&b| b == self.config.term) {
                        Some(pos) => {
                            self.pattern.drain(..=pos);
                            return Ok(ExecOutcome::RestartProgram);
                        }
                        None => return Ok(ExecOutcome::Delete),
                    }
                }

                Command::Get => {
                    self.pattern = self.hold.clone();
                }
                Command::GetAppend => {
                    self.pattern.push(self.config.term);
                    self.pattern.extend_from_slice(&self.hold);
                }
                Command::Hold => {
                    self.hold = self.pattern.clone();
                }
                Command::HoldAppend => {
                    self.hold.push(self.config.term);
                    self.hold.extend_from_slice(&self.pattern);
                }
                Command::Exchange => {
                    std::mem::swap(&mut self.pattern, &mut self.hold);
                }

                Command::Next => {
                    self.auto_print()?;
                    self.drain_append()?;
                    match self.pull_record()? {
                        Some(record) => {
                            self.pattern = record.bytes;
                            self.pattern_terminated = record.terminated;
                        }
                        None => {
                            return Ok(ExecOutcome::EndOfInput {
                                print: false,
                                drain: false,
                            })
                        }
                    }
                }
                Command::NextAppend => {
                    // Draining here mirrors the queue flush that happens
                    // whenever a record is pulled.
                    match self.pull_record()? {
                        Some(record) => {
                            self.drain_append()?;
                            self.pattern.push(self.config.term);
                            self.pattern.extend_from_slice(&record.bytes);
                            self.pattern_terminated = record.terminated;
                        }
                        None => {
                            return Ok(ExecOutcome::EndOfInput {
                                print: true,
                                drain: !self.config.posix,
                            })
                        }
                    }
                }

                Command::Append { text } => {
                    self.append.push(text.clone());
                }
                Command::Insert { text } => {
                    self.sink.write_record(text, true)?;
                }
                Command::Change { text } => {
                    let closes = firing.closes_range || !self.reader.has_more()?;
                    if closes {
                        self.sink.write_record(text, true)?;
                    }
                    self.pattern.clear();
                    return Ok(ExecOutcome::Delete);
                }

                Command::ReadFile { path } => {
                    // A missing file is deliberately not an error.
                    if let Ok(mut file) = File::open(path) {
                        let mut contents = Vec::new();
                        if file.read_to_end(&mut contents).is_ok() {
                            self.append.push(contents);
                        }
                    }
                }
                Command::ReadLine { path } => {
                    if let Some(line) = self.next_line_of(path)? {
                        self.append.push(line);
                    }
                }
                Command::WriteFile { path } => {
                    let mut bytes = self.pattern.clone();
                    bytes.push(self.config.term);
                    self.write_to_file(path, &bytes)?;
                }
                Command::WriteFirstLine { path } => {
                    let end = first_line_len(&self.pattern, self.config.term);
                    let mut bytes = self.pattern[..end].to_vec();
                    bytes.push(self.config.term);
                    self.write_to_file(path, &bytes)?;
                }

                Command::Substitute {
                    pattern,
                    replacement: _,
                    flags,
                } => {
                    let flags = flags.clone();
                    let re = self.compile_with_history(pattern, flags.regex)?;
                    let template = self.replacements[ip]
                        .as_ref()
                        .expect("substitute instruction has a parsed template");
                    // captures_len counts the implicit whole-match group.
                    let max_group = template.max_group();
                    if max_group >= re.captures_len() {
                        return Err(SedError::RegexCompile {
                            pattern: String::from_utf8_lossy(pattern).into_owned(),
                            message: format!(
                                "invalid reference \\{max_group} on `s' command's RHS"
                            ),
                        });
                    }
                    let nth = flags.nth.unwrap_or(1);
                    let (rewritten, count) =
                        substitute(&re, &self.pattern, template, nth, flags.global);
                    if count > 0 {
                        self.pattern = rewritten;
                        self.sub_made = true;
                        self.after_substitution(&flags)?;
                    }
                }
                Command::Transliterate { from, to } => {
                    for byte in self.pattern.iter_mut() {
                        if let Some(pos) = from.iter().position(|b| b == byte) {
                            *byte = to[pos];
                        }
                    }
                }

                Command::Branch(t) => {
                    ip = t.target;
                    continue;
                }
                Command::Test(t) => {
                    let taken = self.sub_made;
                    self.sub_made = false;
                    if taken {
                        ip = t.target;
                        continue;
                    }
                }
                Command::TestNot(t) => {
                    let taken = !self.sub_made;
                    self.sub_made = false;
                    if taken {
                        ip = t.target;
                        continue;
                    }
                }

                Command::Quit { code } => return Ok(ExecOutcome::EndWithPrint(*code)),
                Command::QuitSilent { code } => return Ok(ExecOutcome::EndNoPrint(*code)),

                Command::Execute { command } => {
                    let script = match command {
                        Some(cmd) => cmd.clone(),
                        None => self.pattern.clone(),
                    };
                    let stdout = self.run_shell(&script)?;
                    self.pattern = stdout;
                    if self.pattern.last() == Some(&self.config.term) {
                        self.pattern.pop();
                    }
                }
            }
            ip += 1;
        }
        Ok(ExecOutcome::Finished)
    }

    fn after_substitution(&mut self, flags: &SubstitutionFlags) -> Result<()> {
        if flags.evaluate {
            let script = self.pattern.clone();
            self.pattern = self.run_shell(&script)?;
            if self.pattern.last() == Some(&self.config.term) {
                self.pattern.pop();
            }
        }
        if flags.print {
            let terminated = self.pattern_terminated;
            self.sink.write_record(&self.pattern, terminated)?;
        }
        if let Some(path) = &flags.write_file {
            let mut bytes = self.pattern.clone();
            bytes.push(self.config.term);
            let path = path.clone();
            self.write_to_file(&path, &bytes)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Address evaluation
    // ------------------------------------------------------------------

    fn evaluate(&mut self, ip: usize, inst: &Instruction) -> Result<Firing> {
        let (fires, closes_range) = match &inst.addresses {
            AddressSpec::None => (true, true),
            AddressSpec::One(addr) => (self.match_address(addr)?, true),
            AddressSpec::Range(a1, a2) => self.evaluate_range(ip, a1, a2)?,
        };
        if inst.negated {
            // The negated decision has no notion of a closing record; each
            // firing stands alone.
            Ok(Firing {
                fires: !fires,
                closes_range: true,
            })
        } else {
            Ok(Firing {
                fires,
                closes_range,
            })
        }
    }

    fn evaluate_range(
        &mut self,
        ip: usize,
        a1: &Address,
        a2: &Address2,
    ) -> Result<(bool, bool)> {
        match self.range_states[ip].clone() {
            RangeState::Inactive => {
                if !self.match_address(a1)? {
                    return Ok((false, false));
                }
                match self.resolve_end(a2)? {
                    // Already satisfied: the range is this one record.
                    None => Ok((true, true)),
                    Some(end) => {
                        self.range_states[ip] = RangeState::Active(end);
                        Ok((true, false))
                    }
                }
            }
            RangeState::Active(end) => {
                let closes = match &end {
                    ActiveEnd::Line(n) => self.line >= *n,
                    ActiveEnd::Last => !self.reader.has_more()?,
                    ActiveEnd::Regex { pattern, flags } => self.match_regex(pattern, *flags)?,
                };
                if closes {
                    self.range_states[ip] = RangeState::Inactive;
                }
                Ok((true, closes))
            }
        }
    }

    /// Resolve address2 at range-open time. `None` means the end condition
    /// already holds on the opening record.
    fn resolve_end(&mut self, a2: &Address2) -> Result<Option<ActiveEnd>> {
        Ok(match a2 {
            Address2::Abs(Address::Line(n)) => {
                if *n <= self.line {
                    None
                } else {
                    Some(ActiveEnd::Line(*n))
                }
            }
            Address2::Abs(Address::Last) => Some(ActiveEnd::Last),
            Address2::Abs(Address::Regex { pattern, flags }) => Some(ActiveEnd::Regex {
                pattern: pattern.clone(),
                flags: *flags,
            }),
            // The parser only produces the forms above plus the two below.
            Address2::Abs(Address::Step { .. }) => None,
            Address2::RelOffset(n) => {
                if *n == 0 {
                    None
                } else {
                    Some(ActiveEnd::Line(self.line + n))
                }
            }
            Address2::NextMultiple(m) => {
                let target = self.line.div_ceil(*m) * m;
                if target == self.line {
                    None
                } else {
                    Some(ActiveEnd::Line(target))
                }
            }
        })
    }

    fn match_address(&mut self, addr: &Address) -> Result<bool> {
        match addr {
            Address::Line(n) => Ok(self.line == *n),
            Address::Last => Ok(!self.reader.has_more()?),
            Address::Regex { pattern, flags } => self.match_regex(pattern, *flags),
            Address::Step { first, step } => {
                if *step == 0 {
                    Ok(self.line == *first)
                } else {
                    Ok(self.line >= *first && (self.line - first) % step == 0)
                }
            }
        }
    }

    fn match_regex(&mut self, pattern: &[u8], flags: RegexFlags) -> Result<bool> {
        let re = self.compile_with_history(pattern, flags)?;
        Ok(re.is_match(&self.pattern))
    }

    /// Compile a pattern, routing empty sources through the last-used regex
    /// and recording the one actually used.
    fn compile_with_history(&mut self, pattern: &[u8], flags: RegexFlags) -> Result<Arc<Regex>> {
        let (source, flags) = if pattern.is_empty() {
            self.last_regex
                .clone()
                .ok_or_else(|| SedError::RegexCompile {
                    pattern: String::new(),
                    message: "no previous regular expression".to_string(),
                })?
        } else {
            (pattern.to_vec(), flags)
        };
        let re = self.adapter.compile(&source, flags)?;
        self.last_regex = Some((source, flags));
        Ok(re)
    }

    // ------------------------------------------------------------------
    // Output helpers
    // ------------------------------------------------------------------

    fn auto_print(&mut self) -> Result<()> {
        if self.config.suppress_default_print {
            return Ok(());
        }
        let terminated = self.pattern_terminated;
        self.sink.write_record(&self.pattern, terminated)
    }

    fn drain_append(&mut self) -> Result<()> {
        for buf in std::mem::take(&mut self.append) {
            self.sink.write_terminated(&buf)?;
        }
        Ok(())
    }

    /// Unambiguous rendering for `l`: standard escapes, `\xHH` for the
    /// rest, wrapped at `width` columns with a trailing backslash, closed
    /// by `$`.
    fn render_unambiguous(&self, width: u64) -> Vec<u8> {
        let wrap = width as usize;
        let mut out = Vec::with_capacity(self.pattern.len() + 2);
        let mut col = 0usize;
        let mut scratch = [0u8; 4];
        for &b in &self.pattern {
            let piece: &[u8] = match b {
                b'\\' => b"\\\\",
                0x07 => b"\\a",
                0x08 => b"\\b",
                b'\t' => b"\\t",
                b'\n' => b"\\n",
                0x0B => b"\\v",
                0x0C => b"\\f",
                b'\r' => b"\\r",
                0x20..=0x7E => {
                    scratch[0] = b;
                    &scratch[..1]
                }
                _ => {
                    scratch[0] = b'\\';
                    scratch[1] = b'x';
                    scratch[2] = HEX_DIGITS[(b >> 4) as usize];
                    scratch[3] = HEX_DIGITS[(b & 0x0F) as usize];
                    &scratch
                }
            };
            if wrap > 1 && col + piece.len() > wrap - 1 {
                out.push(b'\\');
                out.push(self.config.term);
                col = 0;
            }
            out.extend_from_slice(piece);
            col += piece.len();
        }
        out.push(b'$');
        out
    }

    fn write_to_file(&mut self, path: &Path, bytes: &[u8]) -> Result<()> {
        if path == Path::new("/dev/stdout") {
            return self.sink.write_all(bytes);
        }
        let file = match self.write_files.entry(path.to_path_buf()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = File::create(path).map_err(SedError::OutputWrite)?;
                entry.insert(file)
            }
        };
        file.write_all(bytes).map_err(SedError::OutputWrite)
    }

    /// Next unread line of `path` for `R`. Missing files and exhausted
    /// cursors yield nothing.
    fn next_line_of(&mut self, path: &Path) -> Result<Option<Vec<u8>>> {
        let cursor = match self.read_cursors.entry(path.to_path_buf()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match File::open(path) {
                Ok(file) => entry.insert(BufReader::new(file)),
                Err(_) => return Ok(None),
            },
        };
        let mut buf = Vec::new();
        let read = cursor
            .read_until(self.config.term, &mut buf)
            .map_err(|e| SedError::InputRead {
                name: path.display().to_string(),
                source: e,
            })?;
        if read == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&self.config.term) {
            buf.pop();
        }
        Ok(Some(buf))
    }

    fn run_shell(&mut self, script: &[u8]) -> Result<Vec<u8>> {
        let command = String::from_utf8_lossy(script).into_owned();
        let output = ProcessCommand::new("/bin/sh")
            .arg("-c")
            .arg(&command)
            .output()
            .map_err(SedError::ShellExec)?;
        Ok(output.stdout)
    }
}

/// What a finished run reports back.
#[derive(Debug)]
pub struct RunOutcome<W> {
    /// 0 unless `q`/`Q` carried an explicit code.
    pub exit_code: i32,
    /// True when `q`/`Q` ended the run before the input was exhausted.
    pub quit: bool,
    pub writer: W,
}

struct Firing {
    fires: bool,
    /// True when this firing completes the match: a single address, a
    /// negated decision, or the record that deactivates a range.
    closes_range: bool,
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn first_line_len(pattern: &[u8], term: u8) -> usize {
    pattern
        .iter()
        .position(|&b| b == term)
        .unwrap_or(pattern.len())
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::BlockStart { .. } => "{",
        Command::BlockEnd { .. } => "}",
        Command::Append { .. } => "a",
        Command::Insert { .. } => "i",
        Command::Change { .. } => "c",
        Command::Delete => "d",
        Command::DeleteFirstLine => "D",
        Command::Get => "g",
        Command::GetAppend => "G",
        Command::Hold => "h",
        Command::HoldAppend => "H",
        Command::Exchange => "x",
        Command::Next => "n",
        Command::NextAppend => "N",
        Command::Print => "p",
        Command::PrintFirstLine => "P",
        Command::List { .. } => "l",
        Command::LineNumber => "=",
        Command::FileName => "F",
        Command::Quit { .. } => "q",
        Command::QuitSilent { .. } => "Q",
        Command::ReadFile { .. } => "r",
        Command::ReadLine { .. } => "R",
        Command::WriteFile { .. } => "w",
        Command::WriteFirstLine { .. } => "W",
        Command::Substitute { .. } => "s",
        Command::Transliterate { .. } => "y",
        Command::Branch(_) => "b",
        Command::Test(_) => "t",
        Command::TestNot(_) => "T",
        Command::Label { .. } => ":",
        Command::Comment => "#",
        Command::Execute { .. } => "e",
    }
}
