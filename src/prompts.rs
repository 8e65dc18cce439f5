//! System prompt and user-message preparation for LaTeX generation.
//!
//! Centralising the prompt here keeps the orchestrator free of prompt text
//! and lets unit tests inspect the rules the model is given.
//!
//! Callers can override the default via [`crate::config::ServiceConfig::system_prompt`];
//! the constant here is used only when no override is provided.

use once_cell::sync::Lazy;
use regex::Regex;

/// Default system prompt for producing a complete LaTeX document.
///
/// The rules mirror what the post-processing pipeline can and cannot repair:
/// `minted` and fences are stripped anyway, but asking for `lstlisting` up
/// front avoids a lossy rewrite.
pub const SYSTEM_PROMPT: &str = r#"You are Overleaf itself.

Guidelines:
1. Output ONLY a complete LaTeX file, from \documentclass to \end{document}.
2. Avoid minted or shell-escape references.
3. If user wants code in a given language, use \lstlisting with [language=XYZ].
4. No extra text or code fences (like ```latex).
5. End with \end{document}.
6. For bold text, use \textbf{} instead of markdown-style ** or *.
7. For mathematical expressions, use proper LaTeX math mode with $ or $$ delimiters.
8. For matrices, use the \begin{matrix} or \begin{pmatrix} environment.
9. For enumerated lists, use \begin{enumerate} with \item."#;

static RE_MARKDOWN_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());

/// Rewrite markdown bold (`**text**`) in the user's message as `\textbf{text}`.
///
/// Users paste chat-style emphasis; if it reaches the model verbatim the
/// model tends to echo the asterisks into the document body.
pub fn prepare_user_message(message: &str) -> String {
    RE_MARKDOWN_BOLD
        .replace_all(message, r"\textbf{$1}")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_becomes_textbf() {
        assert_eq!(
            prepare_user_message("make **this** and **that** bold"),
            r"make \textbf{this} and \textbf{that} bold"
        );
    }

    #[test]
    fn plain_message_unchanged() {
        assert_eq!(prepare_user_message("write hello world"), "write hello world");
    }

    #[test]
    fn unpaired_asterisks_unchanged() {
        assert_eq!(prepare_user_message("2 ** 8 is 256"), "2 ** 8 is 256");
    }

    #[test]
    fn system_prompt_forbids_minted_and_fences() {
        assert!(SYSTEM_PROMPT.contains("minted"));
        assert!(SYSTEM_PROMPT.contains("code fences"));
        assert!(SYSTEM_PROMPT.contains("[language=XYZ]"));
    }
}
