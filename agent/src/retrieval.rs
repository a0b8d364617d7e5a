//! Retrieval-mode guidelines for the system prompt.
//!
//! File suggestion itself happens outside the agent; this module only maps the strategy that
//! produced the suggestions to a short paragraph telling the model how to use them.

use std::fmt;

/// Strategy used to pre-select files for the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetrievalStrategy {
    #[default]
    None,
    Bm25,
    Bm25Py,
    Bm25Source,
    Bm25TwoStage,
    Hybrid,
}

impl RetrievalStrategy {
    /// Parse a strategy name. Matching is case-insensitive; unknown names select `None`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "bm25" => RetrievalStrategy::Bm25,
            "bm25_py" => RetrievalStrategy::Bm25Py,
            "bm25_source" => RetrievalStrategy::Bm25Source,
            "bm25_two_stage" => RetrievalStrategy::Bm25TwoStage,
            "hybrid" => RetrievalStrategy::Hybrid,
            _ => RetrievalStrategy::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalStrategy::None => "none",
            RetrievalStrategy::Bm25 => "bm25",
            RetrievalStrategy::Bm25Py => "bm25_py",
            RetrievalStrategy::Bm25Source => "bm25_source",
            RetrievalStrategy::Bm25TwoStage => "bm25_two_stage",
            RetrievalStrategy::Hybrid => "hybrid",
        }
    }

    /// Guideline paragraph for the system prompt; empty for `None`.
    pub fn guidelines(self) -> &'static str {
        match self {
            RetrievalStrategy::None => "",
            RetrievalStrategy::Bm25 => {
                "Retrieval mode: BM25. Relevant files have been suggested based on the task \
                 description. Start by examining the suggested files to understand the codebase \
                 structure."
            }
            RetrievalStrategy::Bm25Py => {
                "Retrieval mode: BM25 (Python files only). Relevant Python files have been \
                 suggested based on the task description. Start by examining the suggested files \
                 to understand the codebase structure."
            }
            RetrievalStrategy::Bm25Source => {
                "Retrieval mode: BM25 (source code only). Relevant source files have been \
                 suggested based on the task description. Files have been filtered to focus on the \
                 main source code directory. Start by examining the suggested files to understand \
                 the codebase structure."
            }
            RetrievalStrategy::Bm25TwoStage => {
                "Retrieval mode: BM25 two-stage. Files have been suggested using a two-stage \
                 retrieval process: initial candidate generation followed by semantic reranking. \
                 Focus on the suggested files to understand the codebase structure."
            }
            RetrievalStrategy::Hybrid => {
                "Retrieval mode: Hybrid (embedding + BM25). Code chunks have been retrieved using \
                 a hybrid approach combining semantic embeddings and BM25 scoring. Focus on the \
                 suggested code chunks to understand the codebase structure."
            }
        }
    }

    /// Append this strategy's guidelines to a system template.
    ///
    /// The template is returned unchanged when there is nothing to add or the paragraph is
    /// already present.
    pub fn apply_to_system_template(self, template: &str) -> String {
        let guidelines = self.guidelines();
        if guidelines.is_empty() || template.contains(guidelines) {
            return template.to_string();
        }
        format!("{template}\n\n{guidelines}").trim().to_string()
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
