//! Unified diff generation and strict in-process application.
//!
//! Diffs are the authoritative representation of every content-changing
//! edit: replay reconstructs file states by re-applying them, so application
//! must fail loudly on any context mismatch rather than fuzzing hunks into
//! place.

use crate::error::{HistoryError, Result};
use similar::TextDiff;

/// Generates a unified diff between two text states.
///
/// Uses 3 lines of context and `a/<label>` / `b/<label>` headers. Identical
/// inputs produce an empty string.
///
/// # Examples
///
/// ```
/// use hist_core::diff::{apply_diff, generate_diff};
///
/// let d = generate_diff("hello\n", "world\n", "a.txt");
/// assert!(d.starts_with("--- a/a.txt"));
/// assert_eq!(apply_diff("hello\n", &d).unwrap(), "world\n");
/// assert!(generate_diff("same\n", "same\n", "a.txt").is_empty());
/// ```
pub fn generate_diff(old: &str, new: &str, label: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    diff.unified_diff()
        .context_radius(3)
        .header(&format!("a/{label}"), &format!("b/{label}"))
        .to_string()
}

/// Applies a unified diff to `old`, returning the patched text.
///
/// Application is strict: every context and deletion line must match the
/// input exactly at the position the hunk names. A mismatch fails with
/// `PatchContextMismatch`; nothing is ever applied with an offset.
///
/// An empty diff returns `old` unchanged.
pub fn apply_diff(old: &str, diff: &str) -> Result<String> {
    let hunks = parse_unified_diff(diff)?;
    if hunks.is_empty() {
        return Ok(old.to_string());
    }

    let old_lines: Vec<&str> = old.split_inclusive('\n').collect();
    let mut out = String::with_capacity(old.len());
    let mut cursor = 0usize; // index into old_lines

    for hunk in &hunks {
        // For zero-length old ranges the header's start names the line
        // after which the insertion happens, so it is already the 0-based
        // splice position. Non-empty ranges are 1-based.
        let hunk_pos = if hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };

        if hunk_pos < cursor {
            return Err(HistoryError::MalformedDiff(format!(
                "hunk at -{} overlaps the previous hunk",
                hunk.old_start
            )));
        }
        if hunk_pos > old_lines.len() {
            return Err(HistoryError::PatchContextMismatch {
                edit_id: None,
                line: hunk.old_start,
                expected: "<line within file>".to_string(),
                found: "<end of file>".to_string(),
            });
        }

        for line in &old_lines[cursor..hunk_pos] {
            out.push_str(line);
        }
        cursor = hunk_pos;

        for op in &hunk.ops {
            match op.kind {
                OpKind::Context | OpKind::Delete => {
                    let found = old_lines.get(cursor).copied().unwrap_or("");
                    if found != op.text {
                        return Err(HistoryError::PatchContextMismatch {
                            edit_id: None,
                            line: cursor + 1,
                            expected: op.text.clone(),
                            found: found.to_string(),
                        });
                    }
                    if op.kind == OpKind::Context {
                        out.push_str(found);
                    }
                    cursor += 1;
                }
                OpKind::Insert => {
                    out.push_str(&op.text);
                }
            }
        }
    }

    for line in &old_lines[cursor..] {
        out.push_str(line);
    }

    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Context,
    Delete,
    Insert,
}

#[derive(Debug)]
struct DiffOp {
    kind: OpKind,
    /// Line content including its terminator, or without one when the diff
    /// carried a `\ No newline at end of file` marker.
    text: String,
}

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    old_count: usize,
    ops: Vec<DiffOp>,
}

/// Parses unified diff text into hunks.
///
/// Header lines (`---`, `+++`) are skipped; hunks are delimited by their
/// `@@` headers and line counts. `\ No newline at end of file` markers strip
/// the terminator from the preceding op.
fn parse_unified_diff(diff: &str) -> Result<Vec<Hunk>> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut lines = diff.split_inclusive('\n').peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.strip_suffix('\n').unwrap_or(line);
        if trimmed.starts_with("--- ") || trimmed.starts_with("+++ ") || trimmed.is_empty() {
            continue;
        }
        if let Some(header) = trimmed.strip_prefix("@@ ") {
            let (old_start, old_count, new_count) = parse_hunk_header(header)?;
            let mut ops = Vec::new();
            let mut old_left = old_count;
            let mut new_left = new_count;

            while old_left > 0 || new_left > 0 {
                let body = lines.next().ok_or_else(|| {
                    HistoryError::MalformedDiff("hunk ends before its counted lines".to_string())
                })?;
                let (sign, rest) = split_sign(body)?;
                match sign {
                    ' ' => {
                        if old_left == 0 || new_left == 0 {
                            return Err(HistoryError::MalformedDiff(
                                "context line exceeds hunk counts".to_string(),
                            ));
                        }
                        old_left -= 1;
                        new_left -= 1;
                        ops.push(DiffOp {
                            kind: OpKind::Context,
                            text: rest.to_string(),
                        });
                    }
                    '-' => {
                        if old_left == 0 {
                            return Err(HistoryError::MalformedDiff(
                                "deletion line exceeds hunk counts".to_string(),
                            ));
                        }
                        old_left -= 1;
                        ops.push(DiffOp {
                            kind: OpKind::Delete,
                            text: rest.to_string(),
                        });
                    }
                    '+' => {
                        if new_left == 0 {
                            return Err(HistoryError::MalformedDiff(
                                "insertion line exceeds hunk counts".to_string(),
                            ));
                        }
                        new_left -= 1;
                        ops.push(DiffOp {
                            kind: OpKind::Insert,
                            text: rest.to_string(),
                        });
                    }
                    '\\' => {
                        strip_terminator(&mut ops)?;
                    }
                    other => {
                        return Err(HistoryError::MalformedDiff(format!(
                            "unexpected line prefix {other:?} inside hunk"
                        )));
                    }
                }
            }

            // A trailing no-newline marker belongs to the hunk's last line.
            if let Some(peek) = lines.peek() {
                if peek.starts_with('\\') {
                    lines.next();
                    strip_terminator(&mut ops)?;
                }
            }

            hunks.push(Hunk {
                old_start,
                old_count,
                ops,
            });
        } else {
            return Err(HistoryError::MalformedDiff(format!(
                "unexpected line outside hunk: {trimmed:?}"
            )));
        }
    }

    Ok(hunks)
}

/// Splits a hunk body line into its sign and payload (with terminator).
fn split_sign(body: &str) -> Result<(char, &str)> {
    let mut chars = body.chars();
    let sign = chars
        .next()
        .ok_or_else(|| HistoryError::MalformedDiff("empty line inside hunk".to_string()))?;
    Ok((sign, &body[sign.len_utf8()..]))
}

/// Drops the trailing newline of the most recent non-marker op.
fn strip_terminator(ops: &mut [DiffOp]) -> Result<()> {
    let last = ops.last_mut().ok_or_else(|| {
        HistoryError::MalformedDiff("no-newline marker before any hunk line".to_string())
    })?;
    if last.text.ends_with('\n') {
        last.text.pop();
        if last.text.ends_with('\r') {
            last.text.pop();
        }
    }
    Ok(())
}

/// Parses `-a,b +c,d @@ ...` (counts defaulting to 1 when omitted).
fn parse_hunk_header(header: &str) -> Result<(usize, usize, usize)> {
    let malformed = || HistoryError::MalformedDiff(format!("bad hunk header: @@ {header}"));

    let body = header.split(" @@").next().ok_or_else(malformed)?;
    let mut parts = body.split_whitespace();
    let old_part = parts.next().ok_or_else(malformed)?;
    let new_part = parts.next().ok_or_else(malformed)?;

    let parse_range = |part: &str, sign: char| -> Result<(usize, usize)> {
        let body = part.strip_prefix(sign).ok_or_else(malformed)?;
        match body.split_once(',') {
            Some((start, count)) => Ok((
                start.parse().map_err(|_| malformed())?,
                count.parse().map_err(|_| malformed())?,
            )),
            None => Ok((body.parse().map_err(|_| malformed())?, 1)),
        }
    };

    let (old_start, old_count) = parse_range(old_part, '-')?;
    let (_, new_count) = parse_range(new_part, '+')?;
    Ok((old_start, old_count, new_count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_inputs_yield_empty_diff() {
        assert_eq!(generate_diff("a\nb\n", "a\nb\n", "f"), "");
    }

    #[test]
    fn test_roundtrip_simple_replace() {
        let old = "one\ntwo\nthree\n";
        let new = "one\nTWO\nthree\n";
        let d = generate_diff(old, new, "f.txt");
        assert!(d.contains("-two"));
        assert!(d.contains("+TWO"));
        assert_eq!(apply_diff(old, &d).unwrap(), new);
    }

    #[test]
    fn test_roundtrip_creation_from_empty() {
        let d = generate_diff("", "alpha\nbeta\n", "new.txt");
        assert_eq!(apply_diff("", &d).unwrap(), "alpha\nbeta\n");
    }

    #[test]
    fn test_roundtrip_to_empty() {
        let old = "gone\n";
        let d = generate_diff(old, "", "f");
        assert_eq!(apply_diff(old, &d).unwrap(), "");
    }

    #[test]
    fn test_roundtrip_multiple_hunks() {
        let old: String = (1..=30).map(|i| format!("line {i}\n")).collect();
        let new = old.replace("line 3\n", "LINE 3\n").replace("line 27\n", "LINE 27\n");
        let d = generate_diff(&old, &new, "long.txt");
        assert!(d.matches("@@").count() >= 4, "expected two hunks: {d}");
        assert_eq!(apply_diff(&old, &d).unwrap(), new);
    }

    #[test]
    fn test_roundtrip_missing_trailing_newline() {
        let old = "a\nb";
        let new = "a\nb\nc";
        let d = generate_diff(old, new, "f");
        assert!(d.contains("No newline"));
        assert_eq!(apply_diff(old, &d).unwrap(), new);
    }

    #[test]
    fn test_roundtrip_adds_trailing_newline() {
        let old = "a\nb";
        let new = "a\nb\n";
        let d = generate_diff(old, new, "f");
        assert_eq!(apply_diff(old, &d).unwrap(), new);
    }

    #[test]
    fn test_context_mismatch_is_rejected() {
        let d = generate_diff("one\ntwo\n", "one\nTWO\n", "f");
        let err = apply_diff("one\nTWO-ALREADY\n", &d).unwrap_err();
        assert!(matches!(err, HistoryError::PatchContextMismatch { .. }));
    }

    #[test]
    fn test_mismatch_reports_line_and_content() {
        let d = generate_diff("a\nb\nc\n", "a\nB\nc\n", "f");
        match apply_diff("a\nX\nc\n", &d).unwrap_err() {
            HistoryError::PatchContextMismatch {
                line,
                expected,
                found,
                ..
            } => {
                assert_eq!(line, 2);
                assert_eq!(expected, "b\n");
                assert_eq!(found, "X\n");
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn test_no_fuzzy_offset_application() {
        // The same change, but the file gained a leading line; a fuzzy
        // patcher would slide the hunk. This one must refuse.
        let d = generate_diff("one\ntwo\n", "one\nTWO\n", "f");
        let err = apply_diff("zero\none\ntwo\n", &d).unwrap_err();
        assert!(matches!(err, HistoryError::PatchContextMismatch { .. }));
    }

    #[test]
    fn test_empty_diff_is_identity() {
        assert_eq!(apply_diff("anything\n", "").unwrap(), "anything\n");
    }

    #[test]
    fn test_malformed_diff_rejected() {
        let err = apply_diff("x\n", "not a diff at all\n").unwrap_err();
        assert!(matches!(err, HistoryError::MalformedDiff(_)));
    }

    #[test]
    fn test_truncated_hunk_rejected() {
        let bad = "--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n one\n";
        let err = apply_diff("one\ntwo\n", bad).unwrap_err();
        assert!(matches!(err, HistoryError::MalformedDiff(_)));
    }

    #[test]
    fn test_hunk_beyond_eof_rejected() {
        let bad = "--- a/f\n+++ b/f\n@@ -10,1 +10,1 @@\n-ten\n+TEN\n";
        let err = apply_diff("one\n", bad).unwrap_err();
        assert!(matches!(err, HistoryError::PatchContextMismatch { .. }));
    }

    #[test]
    fn test_insertion_only_hunk_position() {
        let old = "a\nb\nc\nd\ne\nf\ng\nh\ni\nj\n";
        let new = "a\nb\nc\nd\ne\nX\nf\ng\nh\ni\nj\n";
        let d = generate_diff(old, new, "f");
        assert_eq!(apply_diff(old, &d).unwrap(), new);
    }

    #[test]
    fn test_crlf_content_roundtrip() {
        let old = "a\r\nb\r\n";
        let new = "a\r\nB\r\n";
        let d = generate_diff(old, new, "f");
        assert_eq!(apply_diff(old, &d).unwrap(), new);
    }
}
