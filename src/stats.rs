//! Bank-quality statistics: kinds, categories, tags, feedback coverage and
//! structural problems in individual questions.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::corpus::{Corpus, Question, QuestionKind, SourceLocation};
use crate::error::{LoadError, Result};
use crate::report::{self, OutputFormat};

const TOP_TAGS: usize = 20;
const MAX_LISTED_ISSUES: usize = 50;

/// Positive answer fractions of a multichoice question must reach this.
const MIN_CORRECT_FRACTION: f64 = 95.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Count {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub location: SourceLocation,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LengthStats {
    pub mean: f64,
    pub min: usize,
    pub max: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BankStats {
    pub documents_loaded: usize,
    pub documents_skipped: usize,
    pub questions: usize,
    pub by_kind: Vec<Count>,
    pub by_category: Vec<Count>,
    pub top_tags: Vec<Count>,
    pub distinct_tags: usize,
    pub with_tags: usize,
    pub without_tags: usize,
    pub with_feedback: usize,
    pub without_feedback: usize,
    pub empty_questions: usize,
    pub html_questions: usize,
    /// Averaged over questions that have at least one answer.
    pub avg_answers: Option<f64>,
    pub length: Option<LengthStats>,
    /// `(depth, documents)` pairs, shallowest first.
    pub files_by_depth: Vec<(usize, usize)>,
    pub issues: Vec<Issue>,
    pub skipped: Vec<LoadError>,
}

pub fn collect(corpus: &Corpus, errors: &[LoadError]) -> BankStats {
    let questions = corpus.questions();

    let mut kinds: BTreeMap<String, usize> = BTreeMap::new();
    let mut categories: BTreeMap<String, usize> = BTreeMap::new();
    let mut tags: BTreeMap<String, usize> = BTreeMap::new();
    let mut depths: BTreeMap<usize, usize> = BTreeMap::new();
    let mut issues = Vec::new();

    let mut with_tags = 0;
    let mut with_feedback = 0;
    let mut empty_questions = 0;
    let mut html_questions = 0;
    let mut answer_counts = Vec::new();
    let mut lengths = Vec::with_capacity(questions.len());

    for q in questions {
        *kinds.entry(q.kind.as_str().to_string()).or_insert(0) += 1;
        if let Some(category) = &q.category {
            *categories.entry(category.clone()).or_insert(0) += 1;
        }
        match &q.tags {
            Some(set) if !set.is_empty() => {
                with_tags += 1;
                for tag in set {
                    *tags.entry(tag.clone()).or_insert(0) += 1;
                }
            }
            _ => {}
        }
        if q.has_feedback {
            with_feedback += 1;
        }
        if q.name.is_empty() && q.body_text.is_empty() {
            empty_questions += 1;
        }
        if q.body_format.as_deref() == Some("html") {
            html_questions += 1;
        }
        if !q.answer_fractions.is_empty() {
            answer_counts.push(q.answer_fractions.len());
        }
        lengths.push(q.name.chars().count() + q.body_text.chars().count());

        issues.extend(validate(q).into_iter().map(|message| Issue {
            location: q.source.clone(),
            message,
        }));
    }

    for doc in corpus.documents() {
        *depths.entry(doc.depth).or_insert(0) += 1;
    }

    let length = if lengths.is_empty() {
        None
    } else {
        Some(LengthStats {
            mean: lengths.iter().sum::<usize>() as f64 / lengths.len() as f64,
            min: lengths.iter().copied().min().unwrap_or(0),
            max: lengths.iter().copied().max().unwrap_or(0),
        })
    };

    let distinct_tags = tags.len();
    let mut top_tags = by_count(tags);
    top_tags.truncate(TOP_TAGS);

    BankStats {
        documents_loaded: corpus.documents().len(),
        documents_skipped: errors.len(),
        questions: questions.len(),
        by_kind: by_count(kinds),
        by_category: by_count(categories),
        top_tags,
        distinct_tags,
        with_tags,
        without_tags: questions.len() - with_tags,
        with_feedback,
        without_feedback: questions.len() - with_feedback,
        empty_questions,
        html_questions,
        avg_answers: (!answer_counts.is_empty())
            .then(|| answer_counts.iter().sum::<usize>() as f64 / answer_counts.len() as f64),
        length,
        files_by_depth: depths.into_iter().collect(),
        issues,
        skipped: errors.to_vec(),
    }
}

/// Count descending, then name ascending.
fn by_count(counts: BTreeMap<String, usize>) -> Vec<Count> {
    let mut out: Vec<Count> = counts
        .into_iter()
        .map(|(name, count)| Count { name, count })
        .collect();
    // BTreeMap order is already by name; a stable sort keeps it for ties.
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

/// Structural problems that make a question unusable or suspicious.
pub fn validate(q: &Question) -> Vec<String> {
    let mut problems = Vec::new();
    if q.kind == QuestionKind::Description {
        return problems;
    }

    if q.name.is_empty() {
        problems.push(format!("{} question without a name", q.kind));
    }
    if q.body_text.is_empty() {
        problems.push(format!("{} question without question text", q.kind));
    }
    if q.kind.requires_answers() && q.answer_fractions.is_empty() {
        problems.push(format!("{} question without answers", q.kind));
    }
    if q.kind == QuestionKind::MultiChoice && !q.answer_fractions.is_empty() {
        let correct: f64 = q.answer_fractions.iter().filter(|&&f| f > 0.0).sum();
        if correct < MIN_CORRECT_FRACTION {
            problems.push(format!(
                "multichoice question without a correct answer (positive fractions sum to {:.1}%)",
                correct
            ));
        }
    }
    problems
}

pub fn render(stats: &BankStats, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(stats)),
        _ => report::serialize(stats, format),
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

pub fn render_text(stats: &BankStats) -> String {
    let rule = "-".repeat(80);
    let mut lines: Vec<String> = Vec::new();

    lines.push("QUESTION BANK STATISTICS".to_string());
    lines.push("=".repeat(80));
    lines.push(format!("Documents loaded:  {}", stats.documents_loaded));
    lines.push(format!("Documents skipped: {}", stats.documents_skipped));
    lines.push(format!("Questions:         {}", stats.questions));
    lines.push(String::new());

    lines.push("QUESTION TYPES".to_string());
    lines.push(rule.clone());
    for entry in &stats.by_kind {
        lines.push(format!(
            "  {:20} {:5} ({:5.1}%)",
            entry.name,
            entry.count,
            percent(entry.count, stats.questions)
        ));
    }
    lines.push(String::new());

    if !stats.by_category.is_empty() {
        lines.push("CATEGORIES".to_string());
        lines.push(rule.clone());
        for entry in &stats.by_category {
            lines.push(format!("  {:60} {:4}", entry.name, entry.count));
        }
        lines.push(String::new());
    }

    lines.push(format!("TOP TAGS ({} distinct)", stats.distinct_tags));
    lines.push(rule.clone());
    if stats.top_tags.is_empty() {
        lines.push("  No tags found".to_string());
    }
    for entry in &stats.top_tags {
        lines.push(format!("  {:30} {:4}", entry.name, entry.count));
    }
    lines.push(String::new());

    lines.push("CONTENT QUALITY".to_string());
    lines.push(rule.clone());
    lines.push(format!("  With tags:         {}", stats.with_tags));
    lines.push(format!("  Without tags:      {}", stats.without_tags));
    lines.push(format!("  With feedback:     {}", stats.with_feedback));
    lines.push(format!("  Without feedback:  {}", stats.without_feedback));
    lines.push(format!("  Empty questions:   {}", stats.empty_questions));
    lines.push(format!("  HTML format:       {}", stats.html_questions));
    if let Some(avg) = stats.avg_answers {
        lines.push(format!("  Answers/question:  {:.2}", avg));
    }
    if let Some(len) = &stats.length {
        lines.push(format!(
            "  Length (chars):    mean {:.0}, min {}, max {}",
            len.mean, len.min, len.max
        ));
    }
    lines.push(String::new());

    lines.push("FILES BY DIRECTORY DEPTH".to_string());
    lines.push(rule.clone());
    for (depth, count) in &stats.files_by_depth {
        lines.push(format!("  Level {}: {} files", depth, count));
    }
    lines.push(String::new());

    if !stats.skipped.is_empty() {
        lines.push("SKIPPED DOCUMENTS".to_string());
        lines.push(rule.clone());
        for err in &stats.skipped {
            lines.push(format!("  {}", err));
        }
        lines.push(String::new());
    }

    if !stats.issues.is_empty() {
        lines.push(format!("ISSUES ({})", stats.issues.len()));
        lines.push(rule.clone());
        for issue in stats.issues.iter().take(MAX_LISTED_ISSUES) {
            lines.push(format!("  {}: {}", issue.location, issue.message));
        }
        if stats.issues.len() > MAX_LISTED_ISSUES {
            lines.push(format!(
                "  ... and {} more",
                stats.issues.len() - MAX_LISTED_ISSUES
            ));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}
