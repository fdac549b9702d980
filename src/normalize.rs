//! Text normalization: markup stripping, composite documents, tokens.

use regex::Regex;
use std::sync::OnceLock;

use crate::corpus::Question;

fn markup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^<>]*>").unwrap())
}

/// Remove markup tags and decode the handful of entities that survive in
/// CDATA sections. Tags are dropped, not interpreted; the text between them
/// is kept and whitespace is collapsed.
pub fn strip_markup(text: &str) -> String {
    let without_tags = markup_re().replace_all(text, " ");
    let decoded = decode_entities(&without_tags);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Name, then body, then answers, separated by single spaces. Fields are
/// already plain text and are not stripped a second time.
pub fn composite_text(question: &Question) -> String {
    std::iter::once(question.name.as_str())
        .chain(std::iter::once(question.body_text.as_str()))
        .chain(question.answer_texts.iter().map(String::as_str))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Case-fold and split on runs of non-alphanumeric characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// One token sequence per question, indexed like the corpus.
pub fn tokenize_corpus(questions: &[Question]) -> Vec<Vec<String>> {
    questions
        .iter()
        .map(|q| tokenize(&composite_text(q)))
        .collect()
}
