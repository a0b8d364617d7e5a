//! Extraction of the single shell action a model response must contain.

use regex::{Regex, RegexBuilder};

/// Default pattern: one fenced ```` ```bash ```` block.
pub const DEFAULT_ACTION_PATTERN: &str = r"```bash\s*\n(.*?)\n```";

/// Compiled action pattern.
///
/// Matching runs with `.` matching newlines so a block may span several lines. When the pattern
/// has a capture group, the first group is the action text; otherwise the whole match is.
#[derive(Debug, Clone)]
pub struct ActionExtractor {
    regex: Regex,
}

/// Result of scanning a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Exactly one block; trimmed.
    Single(String),
    /// Zero or several blocks, untrimmed, in order of appearance.
    Invalid(Vec<String>),
}

impl ActionExtractor {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern)
            .dot_matches_new_line(true)
            .build()?;
        Ok(Self { regex })
    }

    /// Collect every non-overlapping match in `content`.
    pub fn find_all(&self, content: &str) -> Vec<String> {
        let use_group = self.regex.captures_len() > 1;
        self.regex
            .captures_iter(content)
            .map(|caps| {
                let matched = if use_group { caps.get(1) } else { caps.get(0) };
                // An unmatched optional group still counts as a match with empty text.
                matched.map_or("", |m| m.as_str()).to_string()
            })
            .collect()
    }

    /// Scan `content` and decide whether it holds exactly one action.
    pub fn extract(&self, content: &str) -> Extraction {
        let mut found = self.find_all(content);
        if found.len() == 1 {
            let action = found.remove(0);
            return Extraction::Single(action.trim().to_string());
        }
        Extraction::Invalid(found)
    }
}
