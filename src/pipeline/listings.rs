//! Listing-language patcher.
//!
//! The `listings` package aborts the whole compile on `[language=Foo]` when
//! it has no definition for `Foo`. Models tag code blocks with whatever the
//! user mentioned ("Rust", "TypeScript", "Zig"), so every distinct tag gets a
//! minimal C-like fallback definition in the preamble.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static RE_LANGUAGE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[language=([^\]]+)\]").unwrap());
static RE_LISTINGS_PACKAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\usepackage(\[.*?\])?\{listings\}").unwrap());

/// Insert one fallback `\lstdefinelanguage` block per distinct `[language=X]`.
///
/// The blocks go right after the first `\usepackage{listings}`; without one
/// they are prepended to the document. A document with no language tags is
/// returned unchanged.
pub fn define_listing_languages(doc: &str) -> String {
    let languages: BTreeSet<&str> = RE_LANGUAGE_TAG
        .captures_iter(doc)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect();

    if languages.is_empty() {
        return doc.to_string();
    }

    let blocks: String = languages.iter().map(|lang| fallback_definition(lang)).collect();

    match RE_LISTINGS_PACKAGE.find(doc) {
        Some(m) => {
            let mut out = String::with_capacity(doc.len() + blocks.len() + 2);
            out.push_str(&doc[..m.end()]);
            out.push('\n');
            out.push_str(&blocks);
            out.push('\n');
            out.push_str(&doc[m.end()..]);
            out
        }
        None => format!("{blocks}\n{doc}"),
    }
}

fn fallback_definition(lang: &str) -> String {
    format!(
        "\n% Auto-defined fallback for language={lang}\n\
         \\lstdefinelanguage{{{lang}}}{{\n  \
         keywordstyle=\\bfseries,\n  \
         basicstyle=\\ttfamily,\n  \
         comment=[l]{{//}},\n  \
         morecomment=[s]{{/*}}{{*/}},\n  \
         morestring=[b]\",\n  \
         sensitive=true\n\
         }}\n"
    )
}
