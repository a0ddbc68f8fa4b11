//! Failure reports
//!
//! Every component produces a labeled block of text rather than raising
//! when a proxy misbehaves. An empty report means that component saw
//! nothing wrong; reports are merged by concatenation so no failure is
//! ever dropped in favor of another.

use std::fmt;

/// Lines of unchanged context kept around each hunk of a transfer diff
const DIFF_CONTEXT: usize = 3;

/// Accumulated failure text for one component or one whole scenario
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    text: String,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing has been reported
    pub fn is_clean(&self) -> bool {
        self.text.is_empty()
    }

    /// Append one `<label> <message>` line
    pub fn push_line(&mut self, label: &str, message: &str) {
        self.text.push_str(label);
        self.text.push(' ');
        self.text.push_str(message);
        self.text.push('\n');
    }

    /// Append preformatted text verbatim
    pub fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Append another report after this one
    pub fn append(&mut self, other: Report) {
        self.text.push_str(&other.text);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl From<String> for Report {
    fn from(text: String) -> Self {
        Self { text }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Prefix every line of `text` with `| ` after trimming surrounding whitespace
pub fn indent(text: &str) -> String {
    let lines: Vec<&str> = text.trim().split('\n').collect();
    format!("| {}", lines.join("\n| "))
}

/// Render bytes with printable ASCII kept and everything else escaped
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out
}

/// Unified-format line diff between two payloads
///
/// Returns an empty report when the payloads are identical; otherwise the
/// label on its own line followed by the diff.
pub fn diff(label: &str, expected: &[u8], received: &[u8]) -> Report {
    if expected == received {
        return Report::new();
    }

    let old: Vec<&[u8]> = expected.split(|&b| b == b'\n').collect();
    let new: Vec<&[u8]> = received.split(|&b| b == b'\n').collect();
    let ops = line_ops(&old, &new);

    let mut out = String::new();
    out.push_str(label);
    out.push('\n');
    out.push_str("--- expected\n+++ received\n");

    for (start, end) in hunks(&ops) {
        let (mut old_line, mut new_line) = (0usize, 0usize);
        for op in &ops[..start] {
            match op {
                LineOp::Same(_) => {
                    old_line += 1;
                    new_line += 1;
                }
                LineOp::Removed(_) => old_line += 1,
                LineOp::Added(_) => new_line += 1,
            }
        }
        let old_len = ops[start..end]
            .iter()
            .filter(|op| !matches!(op, LineOp::Added(_)))
            .count();
        let new_len = ops[start..end]
            .iter()
            .filter(|op| !matches!(op, LineOp::Removed(_)))
            .count();

        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            hunk_range(old_line, old_len),
            hunk_range(new_line, new_len)
        ));
        for op in &ops[start..end] {
            let (sign, line) = match op {
                LineOp::Same(l) => (' ', *l),
                LineOp::Removed(l) => ('-', *l),
                LineOp::Added(l) => ('+', *l),
            };
            out.push(sign);
            out.push_str(&escape_bytes(line));
            out.push('\n');
        }
    }

    Report::from(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineOp<'a> {
    Same(&'a [u8]),
    Removed(&'a [u8]),
    Added(&'a [u8]),
}

/// Longest-common-subsequence edit script between two line lists
fn line_ops<'a>(old: &[&'a [u8]], new: &[&'a [u8]]) -> Vec<LineOp<'a>> {
    let (n, m) = (old.len(), new.len());
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    let mut ops = Vec::with_capacity(n + m);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(LineOp::Same(old[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(LineOp::Removed(old[i]));
            i += 1;
        } else {
            ops.push(LineOp::Added(new[j]));
            j += 1;
        }
    }
    ops.extend(old[i..].iter().map(|l| LineOp::Removed(l)));
    ops.extend(new[j..].iter().map(|l| LineOp::Added(l)));
    ops
}

/// Group changed lines into `[start, end)` ranges over `ops`, with context
fn hunks(ops: &[LineOp<'_>]) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for (idx, op) in ops.iter().enumerate() {
        if matches!(op, LineOp::Same(_)) {
            continue;
        }
        let start = idx.saturating_sub(DIFF_CONTEXT);
        let end = (idx + 1 + DIFF_CONTEXT).min(ops.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => ranges.push((start, end)),
        }
    }
    ranges
}

fn hunk_range(before: usize, len: usize) -> String {
    match len {
        0 => format!("{},0", before),
        1 => format!("{}", before + 1),
        _ => format!("{},{}", before + 1, len),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_identical_is_empty() {
        assert!(diff("errors in transfer:", b"a\nb\n", b"a\nb\n").is_clean());
    }

    #[test]
    fn test_diff_single_changed_line() {
        let report = diff("errors in transfer:", b"one\ntwo\nthree", b"one\n2\nthree");
        assert_eq!(
            report.as_str(),
            "errors in transfer:\n--- expected\n+++ received\n@@ -1,3 +1,3 @@\n one\n-two\n+2\n three\n"
        );
    }

    #[test]
    fn test_diff_against_empty_capture() {
        let report = diff("errors in transfer:", b"hello\n", b"");
        let text = report.as_str();
        assert!(text.starts_with("errors in transfer:\n"));
        assert!(text.contains("-hello\n"));
    }

    #[test]
    fn test_diff_keeps_hunks_apart() {
        let old: Vec<String> = (0..20).map(|i| format!("line {i}")).collect();
        let mut new = old.clone();
        new[1] = "changed".to_string();
        new[18] = "changed".to_string();
        let report = diff("x", old.join("\n").as_bytes(), new.join("\n").as_bytes());
        assert_eq!(report.as_str().matches("@@ -").count(), 2);
    }

    #[test]
    fn test_diff_escapes_unprintable() {
        let report = diff("x", b"\x05\x00", b"\x05\xff");
        assert!(report.as_str().contains("-\\x05\\x00\n"));
        assert!(report.as_str().contains("+\\x05\\xff\n"));
    }

    #[test]
    fn test_indent() {
        assert_eq!(indent("  a\nb\n\n"), "| a\n| b");
        assert_eq!(indent(""), "| ");
    }

    #[test]
    fn test_report_accumulates() {
        let mut report = Report::new();
        assert!(report.is_clean());
        report.push_line("proxy", "exit code: 3");
        let mut other = Report::new();
        other.push_line("proxy server", "killed: signal 9");
        report.append(other);
        assert_eq!(
            report.as_str(),
            "proxy exit code: 3\nproxy server killed: signal 9\n"
        );
    }
}
