//! Ranked duplicate report.
//!
//! [`build_report`] is a pure function of the corpus, the matched pairs and
//! the options; rendering turns the finished [`Report`] into one string, so a
//! report is either produced whole or not at all.

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::corpus::{Corpus, Question, QuestionKind, SourceLocation};
use crate::error::{LoadError, QdupError, Result};
use crate::markdown;
use crate::similarity::{Scope, SimilarityConfig, SimilarityPair};

/// Pairs at or above this score are flagged as near-exact copies.
pub const NEAR_EXACT: f64 = 0.99;

const RULE: &str = "--------------------------------------------------------------------------------";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
    /// Human review document with a unified diff per cross-document pair.
    Markdown,
}

/// External two-file comparison command with `{left}` and `{right}`
/// placeholders. Paths are substituted shell-quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolTemplate(String);

impl ToolTemplate {
    pub fn new(template: &str) -> Result<Self> {
        if !template.contains("{left}") || !template.contains("{right}") {
            return Err(QdupError::config(format!(
                "tool template must contain {{left}} and {{right}}: '{}'",
                template
            )));
        }
        Ok(Self(template.to_string()))
    }

    pub fn render(&self, left: &Path, right: &Path) -> String {
        let left = shell_quote(&left.to_string_lossy());
        let right = shell_quote(&right.to_string_lossy());
        // Single pass so a path containing "{right}" is not expanded again.
        let mut out = String::with_capacity(self.0.len() + left.len() + right.len());
        let mut rest = self.0.as_str();
        while let Some(pos) = rest.find('{') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix("{left}") {
                out.push_str(&left);
                rest = after;
            } else if let Some(after) = tail.strip_prefix("{right}") {
                out.push_str(&right);
                rest = after;
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub verbose: bool,
    pub tool: ToolTemplate,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub mode: &'static str,
    pub input: PathBuf,
    pub scope: Scope,
    #[serde(serialize_with = "three_decimals")]
    pub threshold: f64,
}

impl RunInfo {
    pub fn new(mode: &'static str, input: &Path, config: &SimilarityConfig) -> Self {
        Self {
            mode,
            input: input.to_path_buf(),
            scope: config.scope(),
            threshold: config.threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub documents_loaded: usize,
    pub documents_skipped: usize,
    pub questions: usize,
    pub pairs_compared: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionDetail {
    pub body_text: String,
    pub answers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionRef {
    pub index: usize,
    pub kind: QuestionKind,
    pub name: String,
    pub location: SourceLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<QuestionDetail>,
}

impl QuestionRef {
    fn new(index: usize, question: &Question, verbose: bool) -> Self {
        Self {
            index,
            kind: question.kind.clone(),
            name: question.name.clone(),
            location: question.source.clone(),
            detail: verbose.then(|| QuestionDetail {
                body_text: question.body_text.clone(),
                answers: question.answer_texts.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateEntry {
    pub rank: usize,
    #[serde(serialize_with = "three_decimals")]
    pub score: f64,
    pub cross_document: bool,
    pub left: QuestionRef,
    pub right: QuestionRef,
    pub command: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoreStats {
    pub pairs: usize,
    #[serde(serialize_with = "three_decimals_opt")]
    pub mean: Option<f64>,
    #[serde(serialize_with = "three_decimals_opt")]
    pub min: Option<f64>,
    #[serde(serialize_with = "three_decimals_opt")]
    pub max: Option<f64>,
    pub near_exact: usize,
    pub cross_document: usize,
    pub same_document: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run: RunInfo,
    pub summary: Summary,
    pub skipped: Vec<LoadError>,
    pub duplicates: Vec<DuplicateEntry>,
    pub statistics: ScoreStats,
    /// Files holding at least one question duplicated in another file.
    pub files_with_cross_document_duplicates: Vec<PathBuf>,
}

/// Score descending, ties by ascending `(i, j)`.
pub fn rank_pairs(pairs: &[SimilarityPair]) -> Vec<SimilarityPair> {
    let mut ranked = pairs.to_vec();
    ranked.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => (a.i, a.j).cmp(&(b.i, b.j)),
        other => other,
    });
    ranked
}

pub fn build_report(
    run: RunInfo,
    corpus: &Corpus,
    errors: &[LoadError],
    pairs: &[SimilarityPair],
    pairs_compared: usize,
    options: &ReportOptions,
) -> Report {
    let ranked = rank_pairs(pairs);
    let mut files = BTreeSet::new();

    let duplicates: Vec<DuplicateEntry> = ranked
        .iter()
        .enumerate()
        .map(|(n, pair)| {
            let a = &corpus.questions()[pair.i];
            let b = &corpus.questions()[pair.j];
            let cross_document = a.source.path != b.source.path;
            if cross_document {
                files.insert(a.source.path.clone());
                files.insert(b.source.path.clone());
            }
            DuplicateEntry {
                rank: n + 1,
                score: pair.score,
                cross_document,
                left: QuestionRef::new(pair.i, a, options.verbose),
                right: QuestionRef::new(pair.j, b, options.verbose),
                command: options.tool.render(&a.source.path, &b.source.path),
            }
        })
        .collect();

    let statistics = score_stats(&duplicates);

    Report {
        run,
        summary: Summary {
            documents_loaded: corpus.documents().len(),
            documents_skipped: errors.len(),
            questions: corpus.len(),
            pairs_compared,
        },
        skipped: errors.to_vec(),
        duplicates,
        statistics,
        files_with_cross_document_duplicates: files.into_iter().collect(),
    }
}

fn score_stats(entries: &[DuplicateEntry]) -> ScoreStats {
    if entries.is_empty() {
        return ScoreStats::default();
    }
    let scores: Vec<f64> = entries.iter().map(|e| e.score).collect();
    let cross = entries.iter().filter(|e| e.cross_document).count();
    ScoreStats {
        pairs: entries.len(),
        mean: Some(scores.iter().sum::<f64>() / scores.len() as f64),
        min: scores.iter().copied().reduce(f64::min),
        max: scores.iter().copied().reduce(f64::max),
        near_exact: scores.iter().filter(|&&s| s >= NEAR_EXACT).count(),
        cross_document: cross,
        same_document: entries.len() - cross,
    }
}

pub fn render(report: &Report, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(report)),
        OutputFormat::Markdown => Ok(markdown::render(report)),
        OutputFormat::Json | OutputFormat::Yaml => serialize(report, format),
    }
}

/// Machine-readable rendering. `Text` and `Markdown` have no generic form
/// and are rejected.
pub fn serialize<T: Serialize>(value: &T, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)
            .map(|s| s + "\n")
            .map_err(|e| QdupError::Render(e.to_string())),
        OutputFormat::Yaml => {
            serde_yaml::to_string(value).map_err(|e| QdupError::Render(e.to_string()))
        }
        OutputFormat::Text | OutputFormat::Markdown => Err(QdupError::Render(format!(
            "{:?} output has no generic serialization",
            format
        ))),
    }
}

pub fn render_text(report: &Report) -> String {
    let mut lines: Vec<String> = Vec::new();
    let s = &report.summary;

    lines.push("QUESTION DUPLICATE REPORT".to_string());
    lines.push("=".repeat(RULE.len()));
    lines.push(format!("Mode:              {} (scope: {})", report.run.mode, report.run.scope));
    lines.push(format!("Input:             {}", report.run.input.display()));
    lines.push(format!("Threshold:         {:.3}", report.run.threshold));
    lines.push(format!("Documents loaded:  {}", s.documents_loaded));
    lines.push(format!("Documents skipped: {}", s.documents_skipped));
    lines.push(format!("Questions:         {}", s.questions));
    lines.push(format!("Pairs compared:    {}", s.pairs_compared));
    lines.push(String::new());

    if !report.skipped.is_empty() {
        lines.push("SKIPPED DOCUMENTS".to_string());
        lines.push(RULE.to_string());
        for err in &report.skipped {
            lines.push(format!("  {}", err));
        }
        lines.push(String::new());
    }

    lines.push(format!("DUPLICATE PAIRS ({})", report.duplicates.len()));
    lines.push(RULE.to_string());
    if report.duplicates.is_empty() {
        lines.push(format!(
            "  No pairs at or above threshold {:.3}.",
            report.run.threshold
        ));
        lines.push(String::new());
    }
    for entry in &report.duplicates {
        let marker = if entry.cross_document {
            "cross-document"
        } else {
            "same document"
        };
        lines.push(format!("#{}  score {:.3}  [{}]", entry.rank, entry.score, marker));
        push_question(&mut lines, "A", &entry.left);
        push_question(&mut lines, "B", &entry.right);
        lines.push(String::new());
    }

    let st = &report.statistics;
    lines.push("STATISTICS".to_string());
    lines.push(RULE.to_string());
    lines.push(format!("  Pairs reported:       {}", st.pairs));
    if let (Some(mean), Some(min), Some(max)) = (st.mean, st.min, st.max) {
        lines.push(format!("  Mean score:           {:.3}", mean));
        lines.push(format!("  Min score:            {:.3}", min));
        lines.push(format!("  Max score:            {:.3}", max));
    }
    lines.push(format!("  Near-exact (>= {:.2}): {}", NEAR_EXACT, st.near_exact));
    lines.push(format!("  Cross-document pairs: {}", st.cross_document));
    lines.push(format!("  Same-document pairs:  {}", st.same_document));
    lines.push(String::new());

    if !report.files_with_cross_document_duplicates.is_empty() {
        lines.push("FILES WITH CROSS-DOCUMENT DUPLICATES".to_string());
        lines.push(RULE.to_string());
        for path in &report.files_with_cross_document_duplicates {
            lines.push(format!("  {}", path.display()));
        }
        lines.push(String::new());
    }

    if !report.duplicates.is_empty() {
        lines.push("RESOLUTION COMMANDS".to_string());
        lines.push(RULE.to_string());
        for entry in &report.duplicates {
            lines.push(format!("# {} - score {:.3}", entry.rank, entry.score));
            lines.push(entry.command.clone());
        }
        lines.push(String::new());
    }

    // Every section ends with a blank entry, so the join ends in a newline.
    lines.join("\n")
}

fn push_question(lines: &mut Vec<String>, label: &str, q: &QuestionRef) {
    lines.push(format!("  {} ({}) {}", label, q.kind, display_name(&q.name)));
    lines.push(format!("    {}", q.location));
    if let Some(detail) = &q.detail {
        lines.push(format!("    Text: {}", detail.body_text));
        for (n, answer) in detail.answers.iter().enumerate() {
            lines.push(format!("    Answer {}: {}", n + 1, answer));
        }
    }
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "<unnamed>"
    } else {
        name
    }
}

/// A question in a removal candidate and the copy that stays.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupCopy {
    pub duplicate: SourceLocation,
    pub kept: SourceLocation,
    pub score: f64,
}

/// A file whose every question has a near-exact copy in another file.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupCandidate {
    pub path: PathBuf,
    pub copies: Vec<CleanupCopy>,
}

/// Files that could be removed without losing a question. Only
/// cross-document pairs at or above [`NEAR_EXACT`] count, and the right-hand
/// question is always the one treated as redundant: it comes later in corpus
/// order, so the earliest copy of any question is never a candidate.
pub fn cleanup_candidates(report: &Report, corpus: &Corpus) -> Vec<CleanupCandidate> {
    let mut covered: BTreeMap<&Path, BTreeMap<usize, &DuplicateEntry>> = BTreeMap::new();
    for entry in &report.duplicates {
        if !entry.cross_document || entry.score < NEAR_EXACT {
            continue;
        }
        // Ranked order: the first entry seen for a question is its best match.
        covered
            .entry(entry.right.location.path.as_path())
            .or_default()
            .entry(entry.right.location.index)
            .or_insert(entry);
    }

    corpus
        .documents()
        .iter()
        .filter_map(|doc| {
            let questions = covered.get(doc.path.as_path())?;
            (questions.len() == doc.questions).then(|| CleanupCandidate {
                path: doc.path.clone(),
                copies: questions
                    .values()
                    .map(|entry| CleanupCopy {
                        duplicate: entry.right.location.clone(),
                        kept: entry.left.location.clone(),
                        score: entry.score,
                    })
                    .collect(),
            })
        })
        .collect()
}

/// Shell script that removes the candidates. It is only written, never run.
pub fn render_cleanup_script(report: &Report, candidates: &[CleanupCandidate]) -> String {
    let mut lines: Vec<String> = vec![
        "#!/bin/sh".to_string(),
        "# Duplicate cleanup candidates found by qdup. Review before running.".to_string(),
        format!("# Input: {}", report.run.input.display()),
        format!(
            "# Every question in a listed file has a copy scoring >= {:.2} in a kept file.",
            NEAR_EXACT
        ),
        "set -e".to_string(),
        String::new(),
    ];

    if candidates.is_empty() {
        lines.push("# No files qualify.".to_string());
        lines.push(String::new());
    }
    for candidate in candidates {
        lines.push(format!("# {}", candidate.path.display()));
        for copy in &candidate.copies {
            lines.push(format!(
                "#   {} duplicates {} (score {:.3})",
                copy.duplicate, copy.kept, copy.score
            ));
        }
        lines.push(format!("rm -- {}", shell_quote(&candidate.path.to_string_lossy())));
        lines.push(String::new());
    }

    lines.join("\n")
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn three_decimals<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(round3(*value))
}

fn three_decimals_opt<S: Serializer>(
    value: &Option<f64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_some(&round3(*v)),
        None => serializer.serialize_none(),
    }
}
