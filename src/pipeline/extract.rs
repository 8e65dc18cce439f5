//! Extraction: isolate a LaTeX document from a model's free-text reply.
//!
//! Models are told to answer with nothing but LaTeX and regularly ignore
//! that: they open with "Sure! Here is…", wrap the file in ```` ```latex ````
//! fences, or append an explanation after `\end{document}`. Extraction
//! tries the most specific shape first and degrades to returning the text
//! unchanged; it never fails.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

const DOCUMENT_CLASS: &str = "\\documentclass";
const END_DOCUMENT: &str = "\\end{document}";

static RE_LATEX_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)```latex\s(.*?)```").unwrap());

/// How the document was located in the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Found inside a ```` ```latex ```` fence.
    Fenced,
    /// Found between `\documentclass` and `\end{document}` (or end of text).
    Marker,
    /// No LaTeX markers at all; the trimmed reply was returned as-is.
    Passthrough,
}

/// The candidate document and how it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub document: String,
    pub confidence: Confidence,
}

/// Extract the best-effort LaTeX document from `response`.
///
/// Priority order:
/// 1. Interior of the first ```` ```latex ```` fence, trimmed, unless it is
///    empty. Anything before a `\documentclass` inside the fence is dropped.
/// 2. `\documentclass` through the first following `\end{document}`
///    (inclusive), or to the end of the text when there is no end marker.
/// 3. The trimmed input.
pub fn extract_latex(response: &str) -> Extraction {
    if let Some(inside) = RE_LATEX_FENCE
        .captures(response)
        .map(|caps| caps.get(1).unwrap().as_str().trim())
        .filter(|inside| !inside.is_empty())
    {
        let document = match inside.find(DOCUMENT_CLASS) {
            Some(idx) if idx > 0 => inside[idx..].trim(),
            _ => inside,
        };
        return Extraction {
            document: document.to_string(),
            confidence: Confidence::Fenced,
        };
    }

    let Some(start) = response.find(DOCUMENT_CLASS) else {
        return Extraction {
            document: response.trim().to_string(),
            confidence: Confidence::Passthrough,
        };
    };

    let document = match response[start..].find(END_DOCUMENT) {
        Some(rel) => &response[start..start + rel + END_DOCUMENT.len()],
        None => &response[start..],
    };

    Extraction {
        document: document.trim().to_string(),
        confidence: Confidence::Marker,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = "\\documentclass{article}\n\\begin{document}\nHello\n\\end{document}";

    #[test]
    fn fenced_block_interior_is_returned_trimmed() {
        let input = format!("Here you go:\n```latex\n\n{ARTICLE}\n\n```\nLet me know!");
        let out = extract_latex(&input);
        assert_eq!(out.document, ARTICLE);
        assert_eq!(out.confidence, Confidence::Fenced);
    }

    #[test]
    fn fence_tag_is_case_insensitive() {
        let input = format!("```LaTeX\n{ARTICLE}\n```");
        assert_eq!(extract_latex(&input).document, ARTICLE);
    }

    #[test]
    fn text_before_documentclass_inside_fence_is_dropped() {
        let input = format!("```latex\n% generated file\n{ARTICLE}\n```");
        assert_eq!(extract_latex(&input).document, ARTICLE);
    }

    #[test]
    fn fence_without_documentclass_is_kept_whole() {
        let input = "```latex\n\\section{Only a fragment}\n```";
        let out = extract_latex(input);
        assert_eq!(out.document, "\\section{Only a fragment}");
        assert_eq!(out.confidence, Confidence::Fenced);
    }

    #[test]
    fn empty_fence_falls_through_to_markers() {
        let input = format!("```latex\n```\nHere it is properly:\n{ARTICLE}");
        let out = extract_latex(&input);
        assert_eq!(out.document, ARTICLE);
        assert_eq!(out.confidence, Confidence::Marker);
    }

    #[test]
    fn markers_without_fence() {
        let input = format!("Sure thing.\n{ARTICLE}\nThis document says hello.");
        let out = extract_latex(&input);
        assert_eq!(out.document, ARTICLE);
        assert_eq!(out.confidence, Confidence::Marker);
    }

    #[test]
    fn missing_end_marker_takes_rest_of_text() {
        let input = "intro \\documentclass{article}\n\\begin{document}\nHi  \n";
        let out = extract_latex(input);
        assert_eq!(out.document, "\\documentclass{article}\n\\begin{document}\nHi");
        assert_eq!(out.confidence, Confidence::Marker);
    }

    #[test]
    fn end_marker_before_documentclass_is_ignored() {
        let input = "\\end{document} junk \\documentclass{report}\nbody\n\\end{document} tail";
        let out = extract_latex(input);
        assert_eq!(out.document, "\\documentclass{report}\nbody\n\\end{document}");
    }

    #[test]
    fn no_markers_passes_through_trimmed() {
        let out = extract_latex("  just some prose \n");
        assert_eq!(out.document, "just some prose");
        assert_eq!(out.confidence, Confidence::Passthrough);
    }

    #[test]
    fn untagged_fence_is_not_a_latex_fence() {
        let input = format!("```\n{ARTICLE}\n```");
        let out = extract_latex(&input);
        assert_eq!(out.document, ARTICLE);
        assert_eq!(out.confidence, Confidence::Marker);
    }
}
