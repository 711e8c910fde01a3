//! Script parser.
//!
//! Turns the assembled script bytes (all `-e` texts and `-f` file contents,
//! joined by the record terminator) into a [`Program`]. The tokenizer is a
//! hand-written state machine over bytes — it has to be, because the
//! delimiter and escaping rules change with the command at hand: `s` and `y`
//! pick their own delimiter, `a`/`i`/`c`/`r`/`w`/`:`/`#` swallow the rest of
//! the logical line, and a backslash immediately before the terminator
//! continues any argument onto the next physical line.
//!
//! Parsing is two-pass: commands and labels are collected first, then
//! branch targets are resolved to instruction indices. Duplicate labels,
//! dangling references, and unmatched braces are rejected before any
//! execution starts.

use crate::command::{
    Address, Address2, AddressSpec, BranchTarget, Command, Instruction, Program, RegexFlags,
    SubstitutionFlags,
};
use crate::error::{Result, SedError};
use std::collections::HashMap;
use std::path::PathBuf;

/// Knobs that change what the parser accepts.
#[derive(Debug, Clone, Copy)]
pub struct ParseSettings {
    /// Record terminator; also the script's line separator.
    pub term: u8,
    /// Reject GNU-only commands, flags, and address forms.
    pub posix: bool,
    /// Reject `e`, `r`, `R`, `w`, `W` and the `e`/`w` flags of `s`.
    pub sandbox: bool,
}

impl Default for ParseSettings {
    fn default() -> Self {
        Self {
            term: b'\n',
            posix: false,
            sandbox: false,
        }
    }
}

/// Parse a complete script into an executable program.
pub fn parse_script(script: &[u8], settings: ParseSettings) -> Result<Program> {
    ScriptParser::new(script, settings).run()
}

struct ScriptParser<'a> {
    bytes: &'a [u8],
    pos: usize,
    term: u8,
    posix: bool,
    sandbox: bool,
}

impl<'a> ScriptParser<'a> {
    fn new(script: &'a [u8], settings: ParseSettings) -> Self {
        Self {
            bytes: script,
            pos: 0,
            term: settings.term,
            posix: settings.posix,
            sandbox: settings.sandbox,
        }
    }

    fn run(mut self) -> Result<Program> {
        let mut instructions: Vec<Instruction> = Vec::new();
        let mut labels: HashMap<String, usize> = HashMap::new();
        // Open blocks: (instruction index of `{`, byte offset for errors).
        let mut blocks: Vec<(usize, usize)> = Vec::new();

        // A leading `#n` line is equivalent to -n.
        let mut suppress_default_print = false;
        if self.bytes.starts_with(b"#n")
            && (self.bytes.len() == 2 || self.bytes[2] == self.term)
        {
            suppress_default_print = true;
            self.pos = 2;
        }

        loop {
            self.skip_separators();
            let Some(c) = self.peek() else { break };

            if c == b'#' {
                self.skip_to_line_end();
                continue;
            }

            let stmt_start = self.pos;
            let addresses = self.parse_addresses()?;
            self.skip_blanks();

            let mut negated = false;
            if self.peek() == Some(b'!') {
                negated = true;
                self.bump();
                self.skip_blanks();
                if self.peek() == Some(b'!') {
                    return Err(self.err(self.pos, "multiple `!'s"));
                }
            }

            let Some(c) = self.peek() else {
                return Err(self.err(self.pos, "missing command"));
            };

            match c {
                b'{' => {
                    self.bump();
                    blocks.push((instructions.len(), stmt_start));
                    instructions.push(Instruction::new(
                        addresses,
                        negated,
                        Command::BlockStart { end: 0 },
                    ));
                }
                b'}' => {
                    self.bump();
                    if addresses != AddressSpec::None || negated {
                        return Err(self.err(stmt_start, "`}' doesn't want any addresses"));
                    }
                    let Some((open, _)) = blocks.pop() else {
                        return Err(self.err(stmt_start, "unexpected `}'"));
                    };
                    let close = instructions.len();
                    if let Command::BlockStart { end } = &mut instructions[open].command {
                        *end = close;
                    }
                    instructions.push(Instruction::new(
                        AddressSpec::None,
                        false,
                        Command::BlockEnd { start: open },
                    ));
                }
                b'a' | b'i' | b'c' => {
                    self.bump();
                    let text = self.parse_text_argument(c)?;
                    let command = match c {
                        b'a' => Command::Append { text },
                        b'i' => Command::Insert { text },
                        _ => Command::Change { text },
                    };
                    instructions.push(Instruction::new(addresses, negated, command));
                }
                b'r' | b'R' | b'w' | b'W' => {
                    self.bump();
                    if self.sandbox {
                        return Err(SedError::Sandbox);
                    }
                    if self.posix && (c == b'R' || c == b'W') {
                        return Err(self.gnu_only(stmt_start, c));
                    }
                    let path = self.parse_filename(c)?;
                    let command = match c {
                        b'r' => Command::ReadFile { path },
                        b'R' => Command::ReadLine { path },
                        b'w' => Command::WriteFile { path },
                        _ => Command::WriteFirstLine { path },
                    };
                    instructions.push(Instruction::new(addresses, negated, command));
                }
                b':' => {
                    self.bump();
                    if addresses != AddressSpec::None || negated {
                        return Err(self.err(stmt_start, ": doesn't want any addresses"));
                    }
                    let raw = self.read_logical_line_raw();
                    let name = trim_blanks(&raw);
                    if name.is_empty() {
                        return Err(self.err(stmt_start, "\":\" lacks a label"));
                    }
                    let name = String::from_utf8_lossy(name).into_owned();
                    let index = instructions.len();
                    if labels.insert(name.clone(), index).is_some() {
                        return Err(self.err(stmt_start, format!("duplicate label `{name}'")));
                    }
                    instructions.push(Instruction::new(
                        AddressSpec::None,
                        false,
                        Command::Label { name },
                    ));
                }
                b'b' | b't' | b'T' => {
                    self.bump();
                    if self.posix && c == b'T' {
                        return Err(self.gnu_only(stmt_start, c));
                    }
                    let label = self.parse_label_operand();
                    let target = BranchTarget { label, target: 0 };
                    let command = match c {
                        b'b' => Command::Branch(target),
                        b't' => Command::Test(target),
                        _ => Command::TestNot(target),
                    };
                    instructions.push(Instruction::new(addresses, negated, command));
                }
                b's' => {
                    self.bump();
                    let command = self.parse_substitute(stmt_start)?;
                    instructions.push(Instruction::new(addresses, negated, command));
                }
                b'y' => {
                    self.bump();
                    let command = self.parse_transliterate(stmt_start)?;
                    self.expect_end_of_command()?;
                    instructions.push(Instruction::new(addresses, negated, command));
                }
                b'q' | b'Q' => {
                    self.bump();
                    if self.posix && c == b'Q' {
                        return Err(self.gnu_only(stmt_start, c));
                    }
                    let code = self.parse_optional_number()?;
                    if self.posix && code.is_some() {
                        return Err(self.err(stmt_start, "exit codes are a GNU extension"));
                    }
                    self.expect_end_of_command()?;
                    let code = code.unwrap_or(0) as i32;
                    let command = if c == b'q' {
                        Command::Quit { code }
                    } else {
                        Command::QuitSilent { code }
                    };
                    instructions.push(Instruction::new(addresses, negated, command));
                }
                b'l' => {
                    self.bump();
                    let width = self.parse_optional_number()?;
                    self.expect_end_of_command()?;
                    instructions.push(Instruction::new(
                        addresses,
                        negated,
                        Command::List { width },
                    ));
                }
                b'e' => {
                    self.bump();
                    if self.sandbox {
                        return Err(SedError::Sandbox);
                    }
                    if self.posix {
                        return Err(self.gnu_only(stmt_start, c));
                    }
                    self.skip_blanks();
                    let rest = self.read_logical_line_raw();
                    let command = if rest.is_empty() {
                        Command::Execute { command: None }
                    } else {
                        Command::Execute {
                            command: Some(rest),
                        }
                    };
                    instructions.push(Instruction::new(addresses, negated, command));
                }
                b'v' => {
                    // Version requirement; accepted and ignored.
                    self.bump();
                    if self.posix {
                        return Err(self.gnu_only(stmt_start, c));
                    }
                    self.read_logical_line_raw();
                    instructions.push(Instruction::new(AddressSpec::None, false, Command::Comment));
                }
                b'F' => {
                    self.bump();
                    if self.posix {
                        return Err(self.gnu_only(stmt_start, c));
                    }
                    self.expect_end_of_command()?;
                    instructions.push(Instruction::new(addresses, negated, Command::FileName));
                }
                b'd' | b'D' | b'g' | b'G' | b'h' | b'H' | b'x' | b'n' | b'N' | b'p' | b'P'
                | b'=' => {
                    self.bump();
                    self.expect_end_of_command()?;
                    let command = match c {
                        b'd' => Command::Delete,
                        b'D' => Command::DeleteFirstLine,
                        b'g' => Command::Get,
                        b'G' => Command::GetAppend,
                        b'h' => Command::Hold,
                        b'H' => Command::HoldAppend,
                        b'x' => Command::Exchange,
                        b'n' => Command::Next,
                        b'N' => Command::NextAppend,
                        b'p' => Command::Print,
                        b'P' => Command::PrintFirstLine,
                        _ => Command::LineNumber,
                    };
                    instructions.push(Instruction::new(addresses, negated, command));
                }
                other => return Err(SedError::UnknownCommand(char::from(other))),
            }
        }

        if let Some((_, offset)) = blocks.pop() {
            return Err(self.err(offset, "unmatched `{'"));
        }

        // Second pass: resolve branch targets.
        let end = instructions.len();
        for inst in &mut instructions {
            if let Command::Branch(t) | Command::Test(t) | Command::TestNot(t) = &mut inst.command
            {
                match &t.label {
                    None => t.target = end,
                    Some(name) => {
                        t.target = *labels
                            .get(name)
                            .ok_or_else(|| SedError::UndefinedLabel(name.clone()))?;
                    }
                }
            }
        }

        Ok(Program {
            instructions,
            labels,
            suppress_default_print,
        })
    }

    // ------------------------------------------------------------------
    // Addresses
    // ------------------------------------------------------------------

    fn parse_addresses(&mut self) -> Result<AddressSpec> {
        let Some(first) = self.parse_one_address(true)? else {
            return Ok(AddressSpec::None);
        };
        self.skip_blanks();
        if self.peek() != Some(b',') {
            if first == Address::Line(0) {
                return Err(self.err(self.pos, "invalid usage of line address 0"));
            }
            return Ok(AddressSpec::One(first));
        }
        self.bump();
        self.skip_blanks();
        let second = self.parse_address2()?;
        if first == Address::Line(0)
            && !matches!(second, Address2::Abs(Address::Regex { .. }))
        {
            return Err(self.err(self.pos, "invalid usage of line address 0"));
        }
        Ok(AddressSpec::Range(first, second))
    }

    fn parse_address2(&mut self) -> Result<Address2> {
        match self.peek() {
            Some(b'+') => {
                self.bump();
                if self.posix {
                    return Err(self.err(self.pos, "relative addressing is a GNU extension"));
                }
                let n = self.parse_number()?;
                Ok(Address2::RelOffset(n))
            }
            Some(b'~') => {
                self.bump();
                if self.posix {
                    return Err(self.err(self.pos, "`~' addressing is a GNU extension"));
                }
                let n = self.parse_number()?;
                if n == 0 {
                    return Err(self.err(self.pos, "number option to `~' may not be zero"));
                }
                Ok(Address2::NextMultiple(n))
            }
            _ => match self.parse_one_address(false)? {
                Some(addr) => Ok(Address2::Abs(addr)),
                None => Err(self.err(self.pos, "unexpected `,'")),
            },
        }
    }

    fn parse_one_address(&mut self, allow_step: bool) -> Result<Option<Address>> {
        match self.peek() {
            Some(b'$') => {
                self.bump();
                Ok(Some(Address::Last))
            }
            Some(d) if d.is_ascii_digit() => {
                let first = self.parse_number()?;
                if allow_step && self.peek() == Some(b'~') {
                    self.bump();
                    if self.posix {
                        return Err(self.err(self.pos, "step addresses are a GNU extension"));
                    }
                    let step = self.parse_number()?;
                    return Ok(Some(Address::Step { first, step }));
                }
                Ok(Some(Address::Line(first)))
            }
            Some(b'/') => {
                self.bump();
                Ok(Some(self.parse_address_regex(b'/')?))
            }
            Some(b'\\') => {
                // `\cREGEXc`: address regex with a custom delimiter.
                self.bump();
                let Some(delim) = self.bump() else {
                    return Err(self.err(self.pos, "unterminated address regex"));
                };
                Ok(Some(self.parse_address_regex(delim)?))
            }
            _ => Ok(None),
        }
    }

    fn parse_address_regex(&mut self, delim: u8) -> Result<Address> {
        let start = self.pos;
        let pattern = self
            .read_delimited(delim, true)
            .map_err(|_| self.err(start, "unterminated address regex"))?;
        let mut flags = RegexFlags::default();
        loop {
            match self.peek() {
                Some(b'I') => {
                    self.bump();
                    if self.posix {
                        return Err(self.err(self.pos, "`I' modifier is a GNU extension"));
                    }
                    flags.case_insensitive = true;
                }
                Some(b'M') => {
                    self.bump();
                    if self.posix {
                        return Err(self.err(self.pos, "`M' modifier is a GNU extension"));
                    }
                    flags.multi_line = true;
                }
                _ => break,
            }
        }
        Ok(Address::Regex { pattern, flags })
    }

    // ------------------------------------------------------------------
    // Command operands
    // ------------------------------------------------------------------

    /// Text of `a`, `i`, `c`: both the classic `a\` + next-line form and the
    /// one-line form. Standard escapes are processed; backslash-terminator
    /// continues onto the next physical line.
    fn parse_text_argument(&mut self, cmd: u8) -> Result<Vec<u8>> {
        self.skip_blanks();
        if self.peek() == Some(b'\\') {
            self.bump();
            if self.peek() == Some(self.term) {
                self.bump();
            }
        } else if self.posix {
            return Err(self.err(
                self.pos,
                format!("expected \\ after `{}'", char::from(cmd)),
            ));
        }
        Ok(self.read_logical_line_text())
    }

    /// Rest of the logical line, escapes processed (for a/i/c text).
    fn read_logical_line_text(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = self.peek() {
            if b == self.term {
                break;
            }
            self.bump();
            if b != b'\\' {
                out.push(b);
                continue;
            }
            match self.bump() {
                None => {
                    out.push(b'\\');
                    break;
                }
                Some(n) if n == self.term => out.push(self.term),
                Some(b'\\') => out.push(b'\\'),
                Some(b'a') => out.push(0x07),
                Some(b'b') => out.push(0x08),
                Some(b'f') => out.push(0x0C),
                Some(b'n') => out.push(b'\n'),
                Some(b'r') => out.push(b'\r'),
                Some(b't') => out.push(b'\t'),
                Some(b'v') => out.push(0x0B),
                Some(b'x') => match self.parse_hex_byte() {
                    Some(value) => out.push(value),
                    None => out.push(b'x'),
                },
                Some(other) => out.push(other),
            }
        }
        out
    }

    /// Rest of the logical line, verbatim except that backslash-terminator
    /// embeds the terminator (for filenames, labels, `e` operands).
    fn read_logical_line_raw(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = self.peek() {
            if b == self.term {
                break;
            }
            self.bump();
            if b == b'\\' && self.peek() == Some(self.term) {
                self.bump();
                out.push(self.term);
            } else {
                out.push(b);
            }
        }
        out
    }

    fn parse_filename(&mut self, cmd: u8) -> Result<PathBuf> {
        self.skip_blanks();
        let raw = self.read_logical_line_raw();
        if raw.is_empty() {
            return Err(self.err(
                self.pos,
                format!("missing filename in `{}' command", char::from(cmd)),
            ));
        }
        Ok(PathBuf::from(String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Optional label after `b`, `t`, `T`: ends at `;` or the terminator.
    fn parse_label_operand(&mut self) -> Option<String> {
        self.skip_blanks();
        let mut out = Vec::new();
        while let Some(b) = self.peek() {
            if b == self.term || b == b';' || b == b'}' {
                break;
            }
            self.bump();
            out.push(b);
        }
        let trimmed = trim_blanks(&out);
        if trimmed.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(trimmed).into_owned())
        }
    }

    fn parse_substitute(&mut self, stmt_start: usize) -> Result<Command> {
        let delim = match self.bump() {
            Some(d) if d != self.term && d != b'\\' => d,
            _ => return Err(self.err(stmt_start, "unterminated `s' command")),
        };
        let pattern = self
            .read_delimited(delim, true)
            .map_err(|_| self.err(stmt_start, "unterminated `s' command"))?;
        let replacement = self
            .read_delimited(delim, false)
            .map_err(|_| self.err(stmt_start, "unterminated `s' command"))?;

        let mut flags = SubstitutionFlags::default();
        loop {
            match self.peek() {
                Some(b'g') => {
                    self.bump();
                    if flags.global {
                        return Err(self.err(self.pos, "multiple `g' options to `s' command"));
                    }
                    flags.global = true;
                }
                Some(b'p') => {
                    self.bump();
                    if flags.print {
                        return Err(self.err(self.pos, "multiple `p' options to `s' command"));
                    }
                    flags.print = true;
                }
                Some(d) if d.is_ascii_digit() => {
                    if flags.nth.is_some() {
                        return Err(
                            self.err(self.pos, "multiple number options to `s' command")
                        );
                    }
                    let n = self.parse_number()?;
                    if n == 0 {
                        return Err(
                            self.err(self.pos, "number option to `s' command may not be zero")
                        );
                    }
                    flags.nth = Some(n as usize);
                }
                Some(b'i') | Some(b'I') => {
                    self.bump();
                    if self.posix {
                        return Err(self.err(self.pos, "`I' flag is a GNU extension"));
                    }
                    flags.regex.case_insensitive = true;
                }
                Some(b'm') | Some(b'M') => {
                    self.bump();
                    if self.posix {
                        return Err(self.err(self.pos, "`M' flag is a GNU extension"));
                    }
                    flags.regex.multi_line = true;
                }
                Some(b'e') => {
                    self.bump();
                    if self.sandbox {
                        return Err(SedError::Sandbox);
                    }
                    if self.posix {
                        return Err(self.err(self.pos, "`e' flag is a GNU extension"));
                    }
                    flags.evaluate = true;
                }
                Some(b'w') => {
                    self.bump();
                    if self.sandbox {
                        return Err(SedError::Sandbox);
                    }
                    flags.write_file = Some(self.parse_filename(b'w')?);
                    break;
                }
                Some(b';') | Some(b'}') | Some(b'#') | None => break,
                Some(b) if b == self.term => break,
                Some(b) if is_blank(b) => break,
                Some(_) => return Err(self.err(self.pos, "unknown option to `s'")),
            }
        }
        self.expect_end_of_command()?;
        Ok(Command::Substitute {
            pattern,
            replacement,
            flags,
        })
    }

    fn parse_transliterate(&mut self, stmt_start: usize) -> Result<Command> {
        let delim = match self.bump() {
            Some(d) if d != self.term && d != b'\\' => d,
            _ => return Err(self.err(stmt_start, "unterminated `y' command")),
        };
        let from_raw = self
            .read_delimited(delim, false)
            .map_err(|_| self.err(stmt_start, "unterminated `y' command"))?;
        let to_raw = self
            .read_delimited(delim, false)
            .map_err(|_| self.err(stmt_start, "unterminated `y' command"))?;
        let from = unescape_transliteration(&from_raw);
        let to = unescape_transliteration(&to_raw);
        if from.len() != to.len() {
            return Err(self.err(
                stmt_start,
                "strings for `y' command are different lengths",
            ));
        }
        Ok(Command::Transliterate { from, to })
    }

    /// Bytes up to the next unescaped `delim`. `\<delim>` embeds a literal
    /// delimiter (kept escaped in regex position when the delimiter is a
    /// regex metacharacter), backslash-terminator embeds the terminator, and
    /// every other escape is passed through untouched. An unescaped
    /// terminator or EOF is an error (message supplied by the caller).
    fn read_delimited(&mut self, delim: u8, regex_position: bool) -> std::result::Result<Vec<u8>, ()> {
        let mut out = Vec::new();
        loop {
            let Some(b) = self.bump() else { return Err(()) };
            if b == delim {
                return Ok(out);
            }
            if b == self.term {
                return Err(());
            }
            if b != b'\\' {
                out.push(b);
                continue;
            }
            let Some(n) = self.bump() else { return Err(()) };
            if n == delim {
                if regex_position && is_regex_meta(delim) {
                    out.push(b'\\');
                }
                out.push(delim);
            } else if n == self.term {
                out.push(self.term);
            } else {
                out.push(b'\\');
                out.push(n);
            }
        }
    }

    // ------------------------------------------------------------------
    // Low-level helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn skip_blanks(&mut self) {
        while matches!(self.peek(), Some(b) if is_blank(b)) {
            self.pos += 1;
        }
    }

    fn skip_separators(&mut self) {
        while let Some(b) = self.peek() {
            if is_blank(b) || b == b';' || b == self.term {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn skip_to_line_end(&mut self) {
        while let Some(b) = self.bump() {
            if b == self.term {
                break;
            }
        }
    }

    fn parse_number(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut value: u64 = 0;
        let mut any = false;
        while let Some(d) = self.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            self.bump();
            any = true;
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((d - b'0') as u64))
                .ok_or_else(|| self.err(start, "number out of range"))?;
        }
        if !any {
            return Err(self.err(start, "expected a number"));
        }
        Ok(value)
    }

    fn parse_optional_number(&mut self) -> Result<Option<u64>> {
        self.skip_blanks();
        match self.peek() {
            Some(d) if d.is_ascii_digit() => Ok(Some(self.parse_number()?)),
            _ => Ok(None),
        }
    }

    fn parse_hex_byte(&mut self) -> Option<u8> {
        let mut value: u32 = 0;
        let mut used = 0;
        while used < 2 {
            let Some(b) = self.peek() else { break };
            let digit = match b {
                b'0'..=b'9' => b - b'0',
                b'a'..=b'f' => b - b'a' + 10,
                b'A'..=b'F' => b - b'A' + 10,
                _ => break,
            };
            self.bump();
            value = value * 16 + digit as u32;
            used += 1;
        }
        if used == 0 {
            None
        } else {
            Some(value as u8)
        }
    }

    fn expect_end_of_command(&mut self) -> Result<()> {
        self.skip_blanks();
        match self.peek() {
            None | Some(b';') | Some(b'}') | Some(b'#') => Ok(()),
            Some(b) if b == self.term => Ok(()),
            Some(_) => Err(self.err(self.pos, "extra characters after command")),
        }
    }

    fn err(&self, offset: usize, message: impl Into<String>) -> SedError {
        SedError::parse(offset, message)
    }

    fn gnu_only(&self, offset: usize, cmd: u8) -> SedError {
        self.err(
            offset,
            format!("`{}' is a GNU extension", char::from(cmd)),
        )
    }
}

fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn is_regex_meta(b: u8) -> bool {
    matches!(
        b,
        b'\\' | b'.' | b'+' | b'*' | b'?' | b'(' | b')' | b'[' | b']' | b'{' | b'}' | b'|' | b'^'
            | b'$'
    )
}

fn trim_blanks(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| !is_blank(b)).unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|&b| !is_blank(b))
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}

/// Resolve escapes inside `y` strings so source and target lengths compare
/// byte for byte.
fn unescape_transliteration(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b != b'\\' || i + 1 >= raw.len() {
            out.push(b);
            i += 1;
            continue;
        }
        let n = raw[i + 1];
        i += 2;
        match n {
            b'\\' => out.push(b'\\'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0B),
            other => out.push(other),
        }
    }
    out
}
