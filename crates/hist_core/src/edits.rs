//! In-place edit specifications: line-selector and content-anchored.
//!
//! Both produce the complete new content from the pre-edit content; the
//! tracker turns that into a write plus a recorded diff. Nothing here
//! touches the filesystem.

use crate::error::{HistoryError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Maximum anchor characters echoed back in error messages.
const SNIPPET_LEN: usize = 50;

/// A parsed line selector.
///
/// Selectors address the original, pre-edit numbering (1-based):
/// `"N"` replaces line N, `"N-M"` the inclusive range (empty content
/// deletes it), `"Ni"` inserts after line N (`"0i"` at the beginning), and
/// `"a"` appends at the end of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Selector {
    /// Replace lines `start..=end` (1-based, inclusive).
    Replace { start: usize, end: usize },
    /// Insert after line `after` (0 = beginning of file).
    Insert { after: usize },
}

/// Applies a set of line-selector edits to `original`.
///
/// All selectors are resolved against the original numbering; overlapping
/// selectors are rejected with `ConflictingEdit` before anything is
/// applied.
pub fn apply_line_edits(original: &str, edits: &BTreeMap<String, String>) -> Result<String> {
    let lines: Vec<&str> = original.split_inclusive('\n').collect();
    let line_count = lines.len();

    // Parse and validate every selector up front.
    let mut parsed: Vec<(String, Selector, &str)> = Vec::with_capacity(edits.len());
    for (spec, content) in edits {
        let selector = parse_selector(spec, line_count)?;
        parsed.push((spec.clone(), selector, content.as_str()));
    }

    detect_conflicts(&parsed)?;

    // Apply bottom-up so earlier line numbers stay valid. An insertion
    // after line N sits below a replacement starting at N, so it must be
    // spliced first.
    parsed.sort_by(|a, b| {
        let pos = |s: &Selector| match s {
            Selector::Replace { start, .. } => 2 * *start,
            Selector::Insert { after } => 2 * *after + 1,
        };
        pos(&b.1).cmp(&pos(&a.1))
    });

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    for (_spec, selector, content) in &parsed {
        match selector {
            Selector::Replace { start, end } => {
                let replacement = content_lines(content, *end == line_count);
                out.splice(start - 1..*end, replacement);
            }
            Selector::Insert { after } => {
                let insertion = content_lines(content, *after == line_count);
                out.splice(*after..*after, insertion);
            }
        }
    }

    Ok(out.concat())
}

/// Splits replacement content into lines, normalizing terminators.
///
/// Every line keeps its newline; the final line gains one unless the edit
/// sits at the end of the file, where the caller's trailing-newline choice
/// is preserved.
fn content_lines(content: &str, at_eof: bool) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();
    if !at_eof {
        if let Some(last) = lines.last_mut() {
            if !last.ends_with('\n') {
                last.push('\n');
            }
        }
    }
    lines
}

fn parse_selector(spec: &str, line_count: usize) -> Result<Selector> {
    let invalid = |reason: String| HistoryError::InvalidSelector {
        selector: spec.to_string(),
        reason,
    };

    if spec.eq_ignore_ascii_case("a") {
        return Ok(Selector::Insert { after: line_count });
    }

    if let Some(num) = spec.strip_suffix('i') {
        let after: usize = num
            .parse()
            .map_err(|_| invalid("insertion must be 'Ni' with N a line number".to_string()))?;
        if after > line_count {
            return Err(invalid(format!(
                "insertion point {after} out of range (0-{line_count})"
            )));
        }
        return Ok(Selector::Insert { after });
    }

    let (start, end) = match spec.split_once('-') {
        Some((s, e)) => {
            let start: usize = s
                .parse()
                .map_err(|_| invalid("range must be 'N-M' with line numbers".to_string()))?;
            let end: usize = e
                .parse()
                .map_err(|_| invalid("range must be 'N-M' with line numbers".to_string()))?;
            (start, end)
        }
        None => {
            let n: usize = spec
                .parse()
                .map_err(|_| invalid("selector must be a line number".to_string()))?;
            (n, n)
        }
    };

    if start < 1 || start > line_count {
        return Err(invalid(format!(
            "start line {start} out of range (1-{line_count})"
        )));
    }
    if end < start {
        return Err(invalid(format!("end line {end} is before start line {start}")));
    }
    if end > line_count {
        return Err(invalid(format!(
            "end line {end} out of range (1-{line_count})"
        )));
    }

    Ok(Selector::Replace { start, end })
}

/// Rejects overlapping selector pairs.
///
/// Two replacements conflict when their ranges intersect; an insertion
/// conflicts with a replacement when its point falls strictly inside the
/// replaced block (inserting after the block's last line is fine); two
/// insertions conflict when they name the same point.
fn detect_conflicts(parsed: &[(String, Selector, &str)]) -> Result<()> {
    for (i, (spec_a, a, _)) in parsed.iter().enumerate() {
        for (spec_b, b, _) in &parsed[i + 1..] {
            let conflict = match (a, b) {
                (
                    Selector::Replace { start: s1, end: e1 },
                    Selector::Replace { start: s2, end: e2 },
                ) => s1 <= e2 && s2 <= e1,
                (Selector::Replace { start, end }, Selector::Insert { after })
                | (Selector::Insert { after }, Selector::Replace { start, end }) => {
                    *after >= *start && *after < *end
                }
                (Selector::Insert { after: a1 }, Selector::Insert { after: a2 }) => a1 == a2,
            };
            if conflict {
                return Err(HistoryError::ConflictingEdit {
                    first: spec_a.clone(),
                    second: spec_b.clone(),
                });
            }
        }
    }
    Ok(())
}

/// A content-anchored edit specification.
///
/// `replacements` maps existing literal text to its replacement;
/// `inserts` maps an anchor to content inserted immediately after it, with
/// the empty anchor meaning the beginning of the file. `replace_all`
/// applies to every occurrence instead of the first.
#[derive(Debug, Clone, Default)]
pub struct ContentEdits {
    pub replacements: BTreeMap<String, String>,
    pub inserts: BTreeMap<String, String>,
    pub replace_all: bool,
}

impl ContentEdits {
    /// True when the specification contains no operations.
    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty() && self.inserts.is_empty()
    }
}

/// Applies a content-anchored edit to `original`.
///
/// Replacements run first (in key order), then inserts; inserts anchor
/// against the already-replaced content. Any target or anchor that does
/// not occur fails the whole edit with `AnchorNotFound` before anything is
/// reported applied.
pub fn apply_content_edits(path: &Path, original: &str, spec: &ContentEdits) -> Result<String> {
    let mut content = original.to_string();

    for (target, replacement) in &spec.replacements {
        if target.is_empty() {
            return Err(HistoryError::InvalidSelector {
                selector: String::new(),
                reason: "empty string cannot be a replacement target".to_string(),
            });
        }
        if !content.contains(target.as_str()) {
            return Err(anchor_not_found(path, target));
        }
        if spec.replace_all {
            content = content.replace(target.as_str(), replacement);
        } else {
            content = content.replacen(target.as_str(), replacement, 1);
        }
    }

    for (anchor, insertion) in &spec.inserts {
        if anchor.is_empty() {
            content.insert_str(0, insertion);
            continue;
        }
        if !content.contains(anchor.as_str()) {
            return Err(anchor_not_found(path, anchor));
        }
        if spec.replace_all {
            content = insert_after_each(&content, anchor, insertion);
        } else {
            let pos = content.find(anchor.as_str()).unwrap() + anchor.len();
            content.insert_str(pos, insertion);
        }
    }

    Ok(content)
}

fn insert_after_each(content: &str, anchor: &str, insertion: &str) -> String {
    let mut out = String::with_capacity(content.len() + insertion.len());
    let mut rest = content;
    while let Some(pos) = rest.find(anchor) {
        let split = pos + anchor.len();
        out.push_str(&rest[..split]);
        out.push_str(insertion);
        rest = &rest[split..];
    }
    out.push_str(rest);
    out
}

fn anchor_not_found(path: &Path, anchor: &str) -> HistoryError {
    let snippet: String = anchor.chars().take(SNIPPET_LEN).collect();
    HistoryError::AnchorNotFound {
        path: path.to_path_buf(),
        snippet,
    }
}
