//! Regex compilation and substitution on raw bytes.
//!
//! Patterns are translated from their scripting dialect to host syntax
//! (see [`crate::dialect`]) and compiled with `regex::bytes`, so matching
//! never requires the pattern space to be valid UTF-8. Compiled regexes are
//! cached per run, keyed by source + dialect + flags; the cache is read-only
//! once populated and safe to share across runs.
//!
//! Documented deviation: with `m/M`, `^`/`$` follow the host engine and
//! match at `\n` boundaries only. A non-newline record terminator does not
//! create multi-line anchor points.

use crate::command::RegexFlags;
use crate::dialect::{to_host_syntax, Dialect};
use crate::error::{Result, SedError};
use regex::bytes::{Captures, Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    pattern: Vec<u8>,
    dialect: Dialect,
    flags: RegexFlags,
}

/// Compiles and caches patterns for one run.
pub struct RegexAdapter {
    dialect: Dialect,
    cache: HashMap<CacheKey, Arc<Regex>>,
}

impl RegexAdapter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            cache: HashMap::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Compile `pattern` under the run's dialect, reusing a cached matcher
    /// when the same source + flags were compiled before.
    pub fn compile(&mut self, pattern: &[u8], flags: RegexFlags) -> Result<Arc<Regex>> {
        let key = CacheKey {
            pattern: pattern.to_vec(),
            dialect: self.dialect,
            flags,
        };
        if let Some(re) = self.cache.get(&key) {
            return Ok(Arc::clone(re));
        }

        let host = to_host_syntax(pattern, self.dialect);
        let source = String::from_utf8_lossy(&host).into_owned();
        let re = RegexBuilder::new(&source)
            .unicode(false)
            .case_insensitive(flags.case_insensitive)
            .multi_line(flags.multi_line)
            .build()
            .map_err(|e| SedError::RegexCompile {
                pattern: String::from_utf8_lossy(pattern).into_owned(),
                message: e.to_string(),
            })?;
        let re = Arc::new(re);
        self.cache.insert(key, Arc::clone(&re));
        Ok(re)
    }
}

/// Case-altering state driven by `\l`, `\u`, `\L`, `\U`, `\E`.
#[derive(Clone, Copy, PartialEq)]
enum Case {
    Upper,
    Lower,
}

#[derive(Default)]
struct CaseState {
    one_shot: Option<Case>,
    mode: Option<Case>,
}

impl CaseState {
    fn push(&mut self, out: &mut Vec<u8>, bytes: &[u8]) {
        for &b in bytes {
            let applied = match self.one_shot.take().or(self.mode) {
                Some(Case::Upper) => b.to_ascii_uppercase(),
                Some(Case::Lower) => b.to_ascii_lowercase(),
                None => b,
            };
            out.push(applied);
        }
    }
}

enum ReplacePart {
    Literal(Vec<u8>),
    /// `\1`..`\9`; an unmatched group substitutes nothing.
    Group(usize),
    /// Unescaped `&`.
    WholeMatch,
    UpperNext,
    LowerNext,
    UpperRest,
    LowerRest,
    CaseEnd,
}

/// A parsed replacement template. `\&` and `\\` are literal, standard
/// escapes and `\xHH` are resolved, and an unknown escape yields the bare
/// character. Case toggles apply to everything that follows them, literal
/// text and captured text alike; an unterminated `\L`/`\U` runs to the end.
pub struct Replacement {
    parts: Vec<ReplacePart>,
}

impl Replacement {
    pub fn parse(template: &[u8]) -> Replacement {
        let mut parts = Vec::new();
        let mut literal = Vec::new();
        let mut i = 0;
        while i < template.len() {
            let b = template[i];
            if b == b'&' {
                flush_literal(&mut parts, &mut literal);
                parts.push(ReplacePart::WholeMatch);
                i += 1;
                continue;
            }
            if b != b'\\' {
                literal.push(b);
                i += 1;
                continue;
            }
            if i + 1 >= template.len() {
                literal.push(b'\\');
                break;
            }
            let next = template[i + 1];
            i += 2;
            match next {
                b'1'..=b'9' => {
                    flush_literal(&mut parts, &mut literal);
                    parts.push(ReplacePart::Group((next - b'0') as usize));
                }
                b'&' => literal.push(b'&'),
                b'\\' => literal.push(b'\\'),
                b'l' => {
                    flush_literal(&mut parts, &mut literal);
                    parts.push(ReplacePart::LowerNext);
                }
                b'u' => {
                    flush_literal(&mut parts, &mut literal);
                    parts.push(ReplacePart::UpperNext);
                }
                b'L' => {
                    flush_literal(&mut parts, &mut literal);
                    parts.push(ReplacePart::LowerRest);
                }
                b'U' => {
                    flush_literal(&mut parts, &mut literal);
                    parts.push(ReplacePart::UpperRest);
                }
                b'E' => {
                    flush_literal(&mut parts, &mut literal);
                    parts.push(ReplacePart::CaseEnd);
                }
                b'n' => literal.push(b'\n'),
                b't' => literal.push(b'\t'),
                b'r' => literal.push(b'\r'),
                b'a' => literal.push(0x07),
                b'f' => literal.push(0x0C),
                b'v' => literal.push(0x0B),
                b'x' => {
                    let (byte, used) = parse_hex_escape(&template[i..]);
                    match byte {
                        Some(value) => {
                            literal.push(value);
                            i += used;
                        }
                        None => literal.push(b'x'),
                    }
                }
                other => literal.push(other),
            }
        }
        flush_literal(&mut parts, &mut literal);
        Replacement { parts }
    }

    fn apply(&self, caps: &Captures, out: &mut Vec<u8>) {
        let mut case = CaseState::default();
        for part in &self.parts {
            match part {
                ReplacePart::Literal(bytes) => case.push(out, bytes),
                ReplacePart::WholeMatch => {
                    let m = caps.get(0).expect("match group 0 always present");
                    case.push(out, m.as_bytes());
                }
                ReplacePart::Group(n) => {
                    if let Some(m) = caps.get(*n) {
                        case.push(out, m.as_bytes());
                    }
                }
                ReplacePart::UpperNext => case.one_shot = Some(Case::Upper),
                ReplacePart::LowerNext => case.one_shot = Some(Case::Lower),
                ReplacePart::UpperRest => {
                    case.mode = Some(Case::Upper);
                    case.one_shot = None;
                }
                ReplacePart::LowerRest => {
                    case.mode = Some(Case::Lower);
                    case.one_shot = None;
                }
                ReplacePart::CaseEnd => {
                    case.mode = None;
                    case.one_shot = None;
                }
            }
        }
    }

    /// Highest `\N` group referenced. The engine compares this against the
    /// compiled pattern's capture count and rejects a reference to a group
    /// the pattern does not define.
    pub fn max_group(&self) -> usize {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ReplacePart::Group(n) => Some(*n),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }
}

fn flush_literal(parts: &mut Vec<ReplacePart>, literal: &mut Vec<u8>) {
    if !literal.is_empty() {
        parts.push(ReplacePart::Literal(std::mem::take(literal)));
    }
}

/// `\xHH` with one or two hex digits. Returns the byte and how many input
/// bytes were consumed past the `x`.
fn parse_hex_escape(rest: &[u8]) -> (Option<u8>, usize) {
    let mut value: u32 = 0;
    let mut used = 0;
    for &b in rest.iter().take(2) {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => break,
        };
        value = value * 16 + digit as u32;
        used += 1;
    }
    if used == 0 {
        (None, 0)
    } else {
        (Some(value as u8), used)
    }
}

/// Apply `replacement` to every selected match of `re` in `input`.
///
/// Selection follows sed's `s` flags: with neither `nth` nor `global`, only
/// the first match; `nth` alone, only the N-th; `global` alone, every match;
/// both, the N-th and all following. Returns the rewritten bytes and the
/// number of replacements actually performed.
pub fn substitute(
    re: &Regex,
    input: &[u8],
    replacement: &Replacement,
    nth: usize,
    global: bool,
) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(input.len());
    let mut count = 0;
    let mut last = 0;
    let mut index = 0;

    for caps in re.captures_iter(input) {
        let m = caps.get(0).expect("match group 0 always present");
        index += 1;
        let selected = if global { index >= nth } else { index == nth };
        if !selected {
            continue;
        }
        out.extend_from_slice(&input[last..m.start()]);
        replacement.apply(&caps, &mut out);
        last = m.end();
        count += 1;
        if !global {
            break;
        }
    }

    out.extend_from_slice(&input[last..]);
    (out, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RegexFlags;

    fn compile(pattern: &str) -> Arc<Regex> {
        RegexAdapter::new(Dialect::Extended)
            .compile(pattern.as_bytes(), RegexFlags::default())
            .unwrap()
    }

    fn sub(pattern: &str, input: &str, template: &str, nth: usize, global: bool) -> (String, usize) {
        let re = compile(pattern);
        let replacement = Replacement::parse(template.as_bytes());
        let (out, n) = substitute(&re, input.as_bytes(), &replacement, nth, global);
        (String::from_utf8(out).unwrap(), n)
    }

    #[test]
    fn test_first_match_only() {
        assert_eq!(sub("o", "hello world", "0", 1, false), ("hell0 world".into(), 1));
    }

    #[test]
    fn test_global() {
        assert_eq!(sub("o", "hello world", "0", 1, true), ("hell0 w0rld".into(), 2));
    }

    #[test]
    fn test_nth_match() {
        assert_eq!(sub("a", "aaa", "b", 2, false), ("aba".into(), 1));
    }

    #[test]
    fn test_nth_plus_global() {
        assert_eq!(sub("a", "aaa", "b", 2, true), ("abb".into(), 2));
    }

    #[test]
    fn test_no_match_counts_zero() {
        assert_eq!(sub("x", "abc", "y", 1, true), ("abc".into(), 0));
    }

    #[test]
    fn test_whole_match_reference() {
        assert_eq!(sub("l+", "hello", "[&]", 1, false), ("he[ll]o".into(), 1));
    }

    #[test]
    fn test_escaped_ampersand_literal() {
        assert_eq!(sub("o", "foo", r"\&", 1, false), ("f&o".into(), 1));
    }

    #[test]
    fn test_group_references() {
        assert_eq!(
            sub("(f)(o+)", "foo bar", r"\2\1", 1, false),
            ("oof bar".into(), 1)
        );
    }

    #[test]
    fn test_unmatched_group_is_empty() {
        assert_eq!(sub("a(x)?b", "ab", r"[\1]", 1, false), ("[]".into(), 1));
    }

    #[test]
    fn test_case_toggles() {
        assert_eq!(sub("(.*)", "hello", r"\U\1", 1, false), ("HELLO".into(), 1));
        assert_eq!(sub("(.*)", "HELLO", r"\L\1", 1, false), ("hello".into(), 1));
        assert_eq!(sub("(.*)", "hello", r"\u\1", 1, false), ("Hello".into(), 1));
        assert_eq!(sub("(.*)", "HEY", r"\l\1", 1, false), ("hEY".into(), 1));
        assert_eq!(
            sub("(h+)(e+)", "hhee", r"\U\1\E\2", 1, false),
            ("HHee".into(), 1)
        );
    }

    #[test]
    fn test_case_toggle_spans_literal_text() {
        assert_eq!(sub("x", "x", r"\Uab\Ecd", 1, false), ("ABcd".into(), 1));
    }

    #[test]
    fn test_standard_escapes_in_replacement() {
        assert_eq!(sub("-", "a-b", r"\n", 1, false), ("a\nb".into(), 1));
        assert_eq!(sub("-", "a-b", r"\t", 1, false), ("a\tb".into(), 1));
        assert_eq!(sub("-", "a-b", r"\x41", 1, false), ("aAb".into(), 1));
    }

    #[test]
    fn test_unknown_escape_drops_backslash() {
        assert_eq!(sub("-", "a-b", r"\z", 1, false), ("azb".into(), 1));
    }

    #[test]
    fn test_identity_replacement_is_noop() {
        let (out, n) = sub("l+o", "hello hello", "&", 1, true);
        assert_eq!(out, "hello hello");
        assert_eq!(n, 2);
    }

    #[test]
    fn test_basic_dialect_compiles_through_translation() {
        let mut adapter = RegexAdapter::new(Dialect::Basic);
        let re = adapter
            .compile(br"\(ab\)\+", RegexFlags::default())
            .unwrap();
        assert!(re.is_match(b"abab"));
        let literal = adapter.compile(br"a+b", RegexFlags::default()).unwrap();
        assert!(literal.is_match(b"a+b"));
        assert!(!literal.is_match(b"aab"));
    }

    #[test]
    fn test_cache_returns_same_instance() {
        let mut adapter = RegexAdapter::new(Dialect::Extended);
        let a = adapter.compile(b"foo", RegexFlags::default()).unwrap();
        let b = adapter.compile(b"foo", RegexFlags::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_case_insensitive_flag() {
        let mut adapter = RegexAdapter::new(Dialect::Extended);
        let flags = RegexFlags {
            case_insensitive: true,
            multi_line: false,
        };
        let re = adapter.compile(b"foo", flags).unwrap();
        assert!(re.is_match(b"FOO"));
    }

    #[test]
    fn test_multi_line_anchors_follow_host_engine() {
        // The documented deviation: `m` gives `^`/`$` newline boundaries.
        let mut adapter = RegexAdapter::new(Dialect::Extended);
        let flags = RegexFlags {
            case_insensitive: false,
            multi_line: true,
        };
        let re = adapter.compile(b"^b$", flags).unwrap();
        assert!(re.is_match(b"a\nb\nc"));
        let plain = adapter.compile(b"^b$", RegexFlags::default()).unwrap();
        assert!(!plain.is_match(b"a\nb\nc"));
    }

    #[test]
    fn test_max_group() {
        let r = Replacement::parse(br"\1 and \3");
        assert_eq!(r.max_group(), 3);
        assert_eq!(Replacement::parse(b"plain").max_group(), 0);
    }

    #[test]
    fn test_empty_match_replacement_advances() {
        // `s/x*/-/g` on "ab" must terminate and touch each position.
        let (out, n) = sub("x*", "ab", "-", 1, true);
        assert_eq!(out, "-a-b-");
        assert_eq!(n, 3);
    }
}
