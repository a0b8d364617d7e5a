//! Submission detection and validation.
//!
//! A command whose output starts with a sentinel line hands the rest of its output in as the
//! final submission. When validation is enabled the submission must be a diff touching at least
//! one source file.

use std::collections::BTreeSet;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{NonTerminating, StepError, Terminating};

/// First-line markers that turn command output into a submission.
pub const SUBMISSION_SENTINELS: [&str; 2] = [
    "MINI_SWE_AGENT_FINAL_OUTPUT",
    "COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT",
];

/// Suffix accepted as a source file even when no configured pattern matches.
// Only Python sources get this fallback regardless of `source_path_patterns`; kept as-is.
pub const FALLBACK_SOURCE_SUFFIX: &str = ".py";

const NULL_DEVICE: &str = "/dev/null";

/// Return the submission payload if `output` opens with a sentinel line.
///
/// Leading whitespace is ignored. The payload is everything after the sentinel line, with line
/// terminators preserved. Lines end at `\n`, `\r\n`, a bare `\r`, or any of the other Unicode
/// line boundaries (`\x0b`, `\x0c`, `\x1c`..`\x1e`, `\u{85}`, `\u{2028}`, `\u{2029}`).
pub fn detect_submission(output: &str) -> Option<String> {
    let (first, rest) = split_first_line(output.trim_start());
    if !SUBMISSION_SENTINELS.contains(&first.trim()) {
        return None;
    }
    Some(rest.to_string())
}

/// Split `text` after its first line terminator; the terminator belongs to neither half.
fn split_first_line(text: &str) -> (&str, &str) {
    for (idx, ch) in text.char_indices() {
        if ch == '\r' {
            let next = if text[idx + 1..].starts_with('\n') {
                idx + 2
            } else {
                idx + 1
            };
            return (&text[..idx], &text[next..]);
        }
        if is_line_break(ch) {
            return (&text[..idx], &text[idx + ch.len_utf8()..]);
        }
    }
    (text, "")
}

fn is_line_break(ch: char) -> bool {
    matches!(
        ch,
        '\n' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Collect the file paths a unified diff touches.
///
/// Reads `diff --git a/x b/y` headers and `---`/`+++` lines; strips the `a/`/`b/` prefix and
/// skips `/dev/null`.
pub fn changed_paths(diff: &str) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    for line in diff.lines() {
        if line.starts_with("diff --git") {
            for field in line.split_whitespace().skip(2).take(2) {
                paths.insert(strip_side_prefix(field).to_string());
            }
        } else if line.starts_with("+++") || line.starts_with("---") {
            let Some(field) = line.split_whitespace().nth(1) else {
                continue;
            };
            if field == NULL_DEVICE {
                continue;
            }
            paths.insert(strip_side_prefix(field).to_string());
        }
    }
    paths
}

fn strip_side_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// Glob matcher for "source file" paths.
///
/// `*` also matches `/`, so `*.py` accepts `pkg/mod.py`.
#[derive(Debug, Clone)]
pub struct SourceMatcher {
    patterns: Vec<String>,
    set: GlobSet,
}

impl SourceMatcher {
    pub fn new(patterns: &[String]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            patterns: patterns.to_vec(),
            set: builder.build()?,
        })
    }

    pub fn is_source(&self, path: &str) -> bool {
        self.set.is_match(path) || path.ends_with(FALLBACK_SOURCE_SUFFIX)
    }

    /// True if any path in `diff` is a source file.
    pub fn touches_source(&self, diff: &str) -> bool {
        changed_paths(diff).iter().any(|path| self.is_source(path))
    }

    fn rejection_message(&self) -> String {
        format!(
            "Submission rejected: No source files were modified. \
             You must modify at least one source file (matching patterns: {}) \
             for the submission to be valid.",
            self.patterns.join(", ")
        )
    }
}

/// Inspect command output for a submission.
///
/// Returns `Ok(())` when no sentinel is present. A sentinel yields `Submitted`, unless
/// `validator` is set and the payload touches no source file, in which case the submission is
/// rejected with a `FormatError`.
pub fn check_completion(output: &str, validator: Option<&SourceMatcher>) -> Result<(), StepError> {
    let Some(submission) = detect_submission(output) else {
        return Ok(());
    };
    if let Some(matcher) = validator
        && !matcher.touches_source(&submission)
    {
        return Err(NonTerminating::FormatError(matcher.rejection_message()).into());
    }
    Err(Terminating::Submitted(submission).into())
}
