//! Markdown review document: the duplicate report plus a unified diff of the
//! two source files behind every cross-document pair.

use similar::TextDiff;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::report::{QuestionRef, Report, NEAR_EXACT};

const DIFF_CONTEXT: usize = 3;

pub fn render(report: &Report) -> String {
    let mut lines: Vec<String> = Vec::new();
    let s = &report.summary;

    lines.push("# Question Duplicate Report".to_string());
    lines.push(String::new());
    lines.push(format!("- **Mode:** {} (scope: {})", report.run.mode, report.run.scope));
    lines.push(format!("- **Input:** `{}`", report.run.input.display()));
    lines.push(format!("- **Threshold:** {:.3}", report.run.threshold));
    lines.push(format!("- **Documents loaded:** {}", s.documents_loaded));
    lines.push(format!("- **Documents skipped:** {}", s.documents_skipped));
    lines.push(format!("- **Questions:** {}", s.questions));
    lines.push(format!("- **Pairs compared:** {}", s.pairs_compared));
    lines.push(String::new());

    if !report.skipped.is_empty() {
        lines.push("## Skipped Documents".to_string());
        lines.push(String::new());
        for err in &report.skipped {
            lines.push(format!("- `{}`: {}", err.path.display(), err.reason));
        }
        lines.push(String::new());
    }

    let st = &report.statistics;
    lines.push("## Statistics".to_string());
    lines.push(String::new());
    lines.push(format!("- **Pairs reported:** {}", st.pairs));
    if let (Some(mean), Some(min), Some(max)) = (st.mean, st.min, st.max) {
        lines.push(format!("- **Mean score:** {:.3}", mean));
        lines.push(format!("- **Min score:** {:.3}", min));
        lines.push(format!("- **Max score:** {:.3}", max));
    }
    lines.push(format!("- **Near-exact (>= {:.2}):** {}", NEAR_EXACT, st.near_exact));
    lines.push(format!("- **Cross-document pairs:** {}", st.cross_document));
    lines.push(format!("- **Same-document pairs:** {}", st.same_document));
    lines.push(String::new());

    lines.push(format!("## Duplicate Pairs ({})", report.duplicates.len()));
    lines.push(String::new());
    if report.duplicates.is_empty() {
        lines.push(format!(
            "No pairs at or above threshold {:.3}.",
            report.run.threshold
        ));
        lines.push(String::new());
    }

    // The same two files can back many pairs; diff each combination once.
    let mut diffs: BTreeMap<(PathBuf, PathBuf), String> = BTreeMap::new();

    for entry in &report.duplicates {
        let marker = if entry.cross_document {
            "cross-document"
        } else {
            "same document"
        };
        lines.push(format!(
            "### Pair {}: score {:.3} ({})",
            entry.rank, entry.score, marker
        ));
        lines.push(String::new());
        push_question(&mut lines, "A", &entry.left);
        push_question(&mut lines, "B", &entry.right);

        if entry.cross_document {
            let left = &entry.left.location.path;
            let right = &entry.right.location.path;
            let diff = diffs
                .entry((left.clone(), right.clone()))
                .or_insert_with(|| file_diff(left, right));
            lines.push("<details>".to_string());
            lines.push("<summary>File diff</summary>".to_string());
            lines.push(String::new());
            lines.push("```diff".to_string());
            lines.push(diff.trim_end().to_string());
            lines.push("```".to_string());
            lines.push(String::new());
            lines.push("</details>".to_string());
            lines.push(String::new());
        }

        lines.push(format!("Resolve: `{}`", entry.command));
        lines.push(String::new());
        lines.push("---".to_string());
        lines.push(String::new());
    }

    if !report.files_with_cross_document_duplicates.is_empty() {
        lines.push("## Files With Cross-Document Duplicates".to_string());
        lines.push(String::new());
        for path in &report.files_with_cross_document_duplicates {
            lines.push(format!("- `{}`", path.display()));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn push_question(lines: &mut Vec<String>, label: &str, q: &QuestionRef) {
    let name = if q.name.is_empty() { "<unnamed>" } else { q.name.as_str() };
    lines.push(format!("#### {}: {}", label, name));
    lines.push(String::new());
    lines.push(format!("- **Location:** `{}`", q.location));
    lines.push(format!("- **Type:** {}", q.kind));
    lines.push(String::new());
    if let Some(detail) = &q.detail {
        if !detail.body_text.is_empty() {
            lines.push(format!("> {}", detail.body_text));
            lines.push(String::new());
        }
        if !detail.answers.is_empty() {
            for (n, answer) in detail.answers.iter().enumerate() {
                lines.push(format!("{}. {}", n + 1, answer));
            }
            lines.push(String::new());
        }
    }
}

/// Unified diff of two files, or a one-line note when there is nothing to
/// show. Read failures are reported inline; they do not fail the report.
fn file_diff(left: &Path, right: &Path) -> String {
    let read = |path: &Path| {
        fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
    };
    let (old, new) = match (read(left), read(right)) {
        (Ok(old), Ok(new)) => (old, new),
        (Err(e), _) | (_, Err(e)) => return format!("diff unavailable: {}", e),
    };

    let left_name = left.display().to_string();
    let right_name = right.display().to_string();
    let diff = TextDiff::from_lines(old.as_str(), new.as_str());
    let text = diff
        .unified_diff()
        .context_radius(DIFF_CONTEXT)
        .header(&left_name, &right_name)
        .to_string();

    if text.is_empty() {
        "files are identical".to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Corpus, DocumentSummary, Question, QuestionKind, SourceLocation};
    use crate::report::{build_report, ReportOptions, RunInfo, ToolTemplate};
    use crate::similarity::{Scope, SimilarityConfig, SimilarityPair};
    use tempfile::TempDir;

    fn question(path: &Path, name: &str) -> Question {
        Question {
            id: None,
            kind: QuestionKind::ShortAnswer,
            name: name.to_string(),
            body_text: format!("What is {}?", name),
            answer_texts: vec!["yes".to_string()],
            has_feedback: false,
            tags: None,
            source: SourceLocation::new(path.to_path_buf(), 1),
            answer_fractions: vec![100.0],
            body_format: None,
            category: None,
        }
    }

    fn two_file_report(tmp: &TempDir, left: &str, right: &str) -> Report {
        let a = tmp.path().join("a.xml");
        let b = tmp.path().join("b.xml");
        fs::write(&a, left).unwrap();
        fs::write(&b, right).unwrap();

        let documents = [&a, &b]
            .iter()
            .map(|p| DocumentSummary {
                path: p.to_path_buf(),
                questions: 1,
                depth: 1,
            })
            .collect();
        let corpus = Corpus::new(
            tmp.path().to_path_buf(),
            documents,
            vec![question(&a, "ohm"), question(&b, "ohm")],
        );
        let config = SimilarityConfig::new(0.9, Scope::Global).unwrap();
        let options = ReportOptions {
            verbose: true,
            tool: ToolTemplate::new("meld {left} {right}").unwrap(),
        };
        build_report(
            RunInfo::new("directory", tmp.path(), &config),
            &corpus,
            &[],
            &[SimilarityPair { i: 0, j: 1, score: 1.0 }],
            1,
            &options,
        )
    }

    #[test]
    fn test_markdown_includes_pair_and_diff() {
        let tmp = TempDir::new().unwrap();
        let report = two_file_report(&tmp, "<quiz>\n<a/>\n</quiz>\n", "<quiz>\n<b/>\n</quiz>\n");
        let md = render(&report);

        assert!(md.starts_with("# Question Duplicate Report\n"));
        assert!(md.contains("### Pair 1: score 1.000 (cross-document)"));
        assert!(md.contains("#### A: ohm"));
        assert!(md.contains("> What is ohm?"));
        assert!(md.contains("1. yes"));
        assert!(md.contains("```diff\n"));
        assert!(md.contains("\n-<a/>\n+<b/>\n"));
        assert!(md.contains("Resolve: `meld '"));
        assert!(md.ends_with("\n"));
    }

    #[test]
    fn test_identical_files_are_noted() {
        let tmp = TempDir::new().unwrap();
        let report = two_file_report(&tmp, "<quiz/>\n", "<quiz/>\n");
        assert!(render(&report).contains("```diff\nfiles are identical\n```"));
    }

    #[test]
    fn test_unreadable_file_does_not_fail_the_report() {
        let tmp = TempDir::new().unwrap();
        let report = two_file_report(&tmp, "<quiz/>\n", "<quiz/>\n");
        fs::remove_file(tmp.path().join("b.xml")).unwrap();
        assert!(render(&report).contains("diff unavailable: cannot read"));
    }

    #[test]
    fn test_file_diff_headers_name_both_files() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("left.xml");
        let b = tmp.path().join("right.xml");
        fs::write(&a, "one\ntwo\n").unwrap();
        fs::write(&b, "one\nthree\n").unwrap();
        let diff = file_diff(&a, &b);
        assert!(diff.contains(&format!("--- {}", a.display())));
        assert!(diff.contains(&format!("+++ {}", b.display())));
        assert!(diff.contains("-two\n+three"));
    }
}
