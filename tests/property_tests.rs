//! Property-based tests for sedge
//!
//! This module uses proptest to verify the engine's core invariants and
//! algebraic laws, plus a handful of deterministic end-to-end scenarios.
//! Property-based testing generates hundreds of random inputs to verify
//! that certain properties always hold true.

use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use sedge::{Options, Sed};

// Import proptest macro
use proptest::prelude::*;

/// Run `script` over `input` and collect the output bytes.
fn run_sed(options: Options, script: &str, input: &[u8]) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let path: PathBuf = dir.path().join("input.txt");
    fs::write(&path, input).unwrap();

    let mut sed = Sed::new(options);
    sed.add_expression(script);
    sed.add_file(&path);
    let mut out = Vec::new();
    sed.execute(&mut out).unwrap();
    out
}

fn run_default(script: &str, input: &[u8]) -> Vec<u8> {
    run_sed(Options::default(), script, input)
}

fn run_quiet(script: &str, input: &[u8]) -> Vec<u8> {
    let options = Options {
        quiet: true,
        ..Options::default()
    };
    run_sed(options, script, input)
}

// ============================================================================
// Property 1: Identity laws
// ============================================================================
// An empty script copies input to output byte for byte; -n silences it.

proptest! {
    /// Empty script, default flags: output equals input exactly, including
    /// inputs without a trailing newline and with embedded empty lines.
    #[test]
    fn prop_empty_script_is_identity(
        lines in prop::collection::vec("[a-zA-Z0-9 .,!?-]{0,30}", 0..20),
        trailing_newline in any::<bool>()
    ) {
        let mut input = lines.join("\n").into_bytes();
        if trailing_newline && !input.is_empty() {
            input.push(b'\n');
        }
        let output = run_default("", &input);
        prop_assert_eq!(output, input);
    }

    /// Empty script with -n: output is empty.
    #[test]
    fn prop_quiet_empty_script_is_empty(
        lines in prop::collection::vec("[a-z]{0,20}", 0..10)
    ) {
        let mut input = lines.join("\n").into_bytes();
        if !input.is_empty() {
            input.push(b'\n');
        }
        let output = run_quiet("", &input);
        prop_assert_eq!(output, Vec::<u8>::new());
    }
}

// ============================================================================
// Property 2: Hold-space laws
// ============================================================================
// h;g and x;x leave the pattern space unchanged for every input.

proptest! {
    /// `h;g` copies pattern to hold and back: a no-op on the output.
    #[test]
    fn prop_hold_get_is_identity(
        lines in prop::collection::vec("[a-z0-9]{0,25}", 1..15)
    ) {
        let input = format!("{}\n", lines.join("\n")).into_bytes();
        prop_assert_eq!(run_default("h;g", &input), input);
    }

    /// `x;x` swaps the spaces twice: a no-op on the output.
    #[test]
    fn prop_double_exchange_is_identity(
        lines in prop::collection::vec("[a-z0-9]{0,25}", 1..15)
    ) {
        let input = format!("{}\n", lines.join("\n")).into_bytes();
        prop_assert_eq!(run_default("x;x", &input), input);
    }
}

// ============================================================================
// Property 3: Substitution laws
// ============================================================================

proptest! {
    /// `s/re/&/` replaces every match with itself: byte identity.
    #[test]
    fn prop_substitute_whole_match_is_identity(
        lines in prop::collection::vec("[a-z]{1,30}", 1..10),
        pattern in "[a-z]{1,3}"
    ) {
        let input = format!("{}\n", lines.join("\n")).into_bytes();
        let script = format!("s/{pattern}/&/g");
        prop_assert_eq!(run_default(&script, &input), input);
    }

    /// `y/ab/ab/` maps each byte to itself: byte identity.
    #[test]
    fn prop_transliterate_identity(
        lines in prop::collection::vec("[a-d]{0,30}", 1..10)
    ) {
        let input = format!("{}\n", lines.join("\n")).into_bytes();
        prop_assert_eq!(run_default("y/ab/ab/", &input), input);
    }

    /// A substitution whose pattern cannot match the alphabet of the input
    /// is idempotent: the second pass sees no match.
    #[test]
    fn prop_converged_script_is_stable(
        lines in prop::collection::vec("[a-m]{1,30}", 1..10)
    ) {
        let input = format!("{}\n", lines.join("\n")).into_bytes();
        let once = run_default("s/[n-z]/0/g", &input);
        let twice = run_default("s/[n-z]/0/g", &once);
        prop_assert_eq!(once, twice);
    }

    /// The line counter agrees with the number of records consumed.
    #[test]
    fn prop_line_counter_matches_record_count(
        lines in prop::collection::vec("[a-z]{0,10}", 1..20)
    ) {
        let input = format!("{}\n", lines.join("\n")).into_bytes();
        let output = run_quiet("$=", &input);
        let expected = format!("{}\n", lines.len()).into_bytes();
        prop_assert_eq!(output, expected);
    }
}

// ============================================================================
// Deterministic scenarios
// ============================================================================
// The canonical end-to-end behaviors, pinned exactly.

#[test]
fn test_scenario_global_substitution() {
    assert_eq!(run_default("s/o/0/g", b"hello\nworld\n"), b"hell0\nw0rld\n");
}

#[test]
fn test_scenario_print_second_line_quiet() {
    assert_eq!(run_quiet("2p", b"a\nb\nc\n"), b"b\n");
}

#[test]
fn test_scenario_keep_only_last_line() {
    assert_eq!(run_default("$!d", b"1\n2\n3\n4\n"), b"4\n");
}

#[test]
fn test_scenario_join_lines() {
    assert_eq!(run_default(r"N;s/\n/ /", b"foo\nbar\n"), b"foo bar\n");
}

#[test]
fn test_scenario_double_space() {
    assert_eq!(run_default("G", b"x\ny\n"), b"x\n\ny\n\n");
}

#[test]
fn test_scenario_nth_occurrence() {
    assert_eq!(run_default("s/a/b/2", b"aaa\n"), b"aba\n");
    assert_eq!(run_default("s/a/b/2g", b"aaa\n"), b"abb\n");
}

#[test]
fn test_scenario_branch_loop() {
    assert_eq!(run_default(": loop\n s/x/y/\n t loop", b"xxx\n"), b"yyy\n");
}

#[test]
fn test_multiple_input_files_are_one_stream() {
    let dir = TempDir::new().unwrap();
    let one = dir.path().join("one.txt");
    let two = dir.path().join("two.txt");
    fs::write(&one, b"a\nb\n").unwrap();
    fs::write(&two, b"c\n").unwrap();

    let mut sed = Sed::new(Options {
        quiet: true,
        ..Options::default()
    });
    sed.add_expression("$=");
    sed.add_file(&one);
    sed.add_file(&two);
    let mut out = Vec::new();
    sed.execute(&mut out).unwrap();
    // Concatenated: only the very last record is `$`, and numbering runs on.
    assert_eq!(out, b"3\n");
}

#[test]
fn test_separate_mode_scopes_each_file() {
    let dir = TempDir::new().unwrap();
    let one = dir.path().join("one.txt");
    let two = dir.path().join("two.txt");
    fs::write(&one, b"a\nb\n").unwrap();
    fs::write(&two, b"c\n").unwrap();

    let mut sed = Sed::new(Options {
        quiet: true,
        separate: true,
        ..Options::default()
    });
    sed.add_expression("$=");
    sed.add_file(&one);
    sed.add_file(&two);
    let mut out = Vec::new();
    sed.execute(&mut out).unwrap();
    assert_eq!(out, b"2\n1\n");
}

#[test]
fn test_inputs_never_mutated_without_in_place() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.txt");
    fs::write(&input, b"a\nb\n").unwrap();

    let mut sed = Sed::new(Options::default());
    sed.add_expression("s/a/CHANGED/");
    sed.add_file(&input);
    let mut out = Vec::new();
    sed.execute(&mut out).unwrap();

    assert_eq!(out, b"CHANGED\nb\n");
    assert_eq!(fs::read(&input).unwrap(), b"a\nb\n");
}

#[test]
fn test_in_place_round_trip_with_backup() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.txt");
    fs::write(&input, b"old text\n").unwrap();

    let mut sed = Sed::new(Options {
        in_place: Some(".orig".to_string()),
        ..Options::default()
    });
    sed.add_expression("s/old/new/");
    sed.add_file(&input);
    sed.execute(std::io::sink()).unwrap();

    assert_eq!(fs::read(&input).unwrap(), b"new text\n");
    assert_eq!(
        fs::read(dir.path().join("input.txt.orig")).unwrap(),
        b"old text\n"
    );
}

#[test]
fn test_null_data_records() {
    let options = Options {
        term: 0,
        ..Options::default()
    };
    assert_eq!(run_sed(options, "s/a/b/", b"aa\0ba\0"), b"ba\0bb\0");
}

#[test]
fn test_parse_error_aborts_before_any_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.txt");
    fs::write(&input, b"a\n").unwrap();

    let mut sed = Sed::new(Options::default());
    sed.add_expression("p");
    sed.add_expression("s/a");
    sed.add_file(&input);
    let mut out = Vec::new();
    let err = sed.execute(&mut out).unwrap_err();
    assert!(err.to_string().contains("expression #2"));
    assert!(out.is_empty());
}
