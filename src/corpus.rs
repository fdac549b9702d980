//! Question records and the corpus loader.
//!
//! Documents are Moodle-style quiz XML files: a `<quiz>` root holding any
//! number of `<question type="...">` records. `category` records are not
//! questions; they set the category for the records that follow them.

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use roxmltree::{Document, Node, ParsingOptions};
use serde::{Serialize, Serializer};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{LoadError, QdupError, Result};
use crate::normalize::strip_markup;

/// Question type tag. Unknown tags pass through unclassified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuestionKind {
    MultiChoice,
    TrueFalse,
    ShortAnswer,
    Matching,
    Essay,
    Numerical,
    Description,
    MultiAnswer,
    Calculated,
    DragDropText,
    GapSelect,
    Unclassified(String),
}

impl QuestionKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "multichoice" => QuestionKind::MultiChoice,
            "truefalse" => QuestionKind::TrueFalse,
            "shortanswer" => QuestionKind::ShortAnswer,
            "matching" => QuestionKind::Matching,
            "essay" => QuestionKind::Essay,
            "numerical" => QuestionKind::Numerical,
            "description" => QuestionKind::Description,
            "cloze" | "multianswer" => QuestionKind::MultiAnswer,
            "calculated" => QuestionKind::Calculated,
            "ddwtos" => QuestionKind::DragDropText,
            "gapselect" => QuestionKind::GapSelect,
            _ => QuestionKind::Unclassified(tag.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            QuestionKind::MultiChoice => "multichoice",
            QuestionKind::TrueFalse => "truefalse",
            QuestionKind::ShortAnswer => "shortanswer",
            QuestionKind::Matching => "matching",
            QuestionKind::Essay => "essay",
            QuestionKind::Numerical => "numerical",
            QuestionKind::Description => "description",
            QuestionKind::MultiAnswer => "multianswer",
            QuestionKind::Calculated => "calculated",
            QuestionKind::DragDropText => "ddwtos",
            QuestionKind::GapSelect => "gapselect",
            QuestionKind::Unclassified(raw) if raw.is_empty() => "unknown",
            QuestionKind::Unclassified(raw) => raw,
        }
    }

    /// Kinds that are unusable without at least one `<answer>`.
    pub fn requires_answers(&self) -> bool {
        matches!(
            self,
            QuestionKind::MultiChoice
                | QuestionKind::TrueFalse
                | QuestionKind::Matching
                | QuestionKind::ShortAnswer
        )
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for QuestionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// File path plus the 1-based ordinal of the `<question>` element in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceLocation {
    pub path: PathBuf,
    pub index: usize,
}

impl SourceLocation {
    pub fn new(path: PathBuf, index: usize) -> Self {
        Self { path, index }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path.display(), self.index)
    }
}

/// One question record. `name`, `body_text` and `answer_texts` hold
/// markup-stripped plain text.
#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub id: Option<String>,
    pub kind: QuestionKind,
    pub name: String,
    pub body_text: String,
    pub answer_texts: Vec<String>,
    pub has_feedback: bool,
    pub tags: Option<BTreeSet<String>>,
    pub source: SourceLocation,
    #[serde(skip)]
    pub answer_fractions: Vec<f64>,
    #[serde(skip)]
    pub body_format: Option<String>,
    #[serde(skip)]
    pub category: Option<String>,
}

/// One document that contributed to the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub path: PathBuf,
    pub questions: usize,
    /// Path components below the corpus root (1 for a file directly in it).
    pub depth: usize,
}

/// Immutable, ordered question list. Positions are the identity used by
/// every later stage.
#[derive(Debug, Clone)]
pub struct Corpus {
    root: PathBuf,
    documents: Vec<DocumentSummary>,
    questions: Vec<Question>,
}

impl Corpus {
    pub fn new(root: PathBuf, documents: Vec<DocumentSummary>, questions: Vec<Question>) -> Self {
        Self {
            root,
            documents,
            questions,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn documents(&self) -> &[DocumentSummary] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// What to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Document(PathBuf),
    Directory { root: PathBuf, recursive: bool },
}

impl Input {
    pub fn root(&self) -> &Path {
        match self {
            Input::Document(path) => path,
            Input::Directory { root, .. } => root,
        }
    }
}

/// Discovery filters for directory mode.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    extensions: HashSet<String>,
    exclude: GlobSet,
}

impl LoaderOptions {
    pub fn new(extensions: &[String], exclude: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude {
            let glob = Glob::new(pattern)
                .map_err(|e| QdupError::config(format!("invalid exclude pattern '{}': {}", pattern, e)))?;
            builder.add(glob);
        }
        let exclude = builder
            .build()
            .map_err(|e| QdupError::config(format!("invalid exclude patterns: {}", e)))?;

        let extensions: HashSet<String> = extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(QdupError::config("at least one document extension is required"));
        }

        Ok(Self { extensions, exclude })
    }

    fn accepts(&self, root: &Path, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if !self.extensions.contains(&ext) {
            return false;
        }
        let rel = path.strip_prefix(root).unwrap_or(path);
        !self.exclude.is_match(rel)
    }
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            extensions: ["xml".to_string()].into_iter().collect(),
            exclude: GlobSet::empty(),
        }
    }
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub corpus: Corpus,
    pub errors: Vec<LoadError>,
}

/// Load every document named by `input`. Per-document failures are
/// collected in `errors`; only an empty result is fatal.
pub fn load(input: &Input, options: &LoaderOptions) -> Result<LoadOutcome> {
    let start = Instant::now();
    let root = input.root().to_path_buf();

    let paths = match input {
        Input::Document(path) => vec![path.clone()],
        Input::Directory { root, recursive } => discover(root, *recursive, options),
    };
    info!(documents = paths.len(), root = %root.display(), "discovered documents");

    let results: Vec<(PathBuf, std::result::Result<Vec<Question>, LoadError>)> = paths
        .par_iter()
        .map(|path| (path.clone(), load_document(path)))
        .collect();

    let mut documents = Vec::new();
    let mut questions = Vec::new();
    let mut errors = Vec::new();

    for (path, result) in results {
        match result {
            Ok(found) => {
                debug!(path = %path.display(), questions = found.len(), "loaded document");
                let rel = path.strip_prefix(&root).unwrap_or(&path);
                documents.push(DocumentSummary {
                    path: path.clone(),
                    questions: found.len(),
                    depth: rel.components().count(),
                });
                questions.extend(found);
            }
            Err(err) => {
                warn!(path = %err.path.display(), reason = %err.reason, "skipping document");
                errors.push(err);
            }
        }
    }

    info!(
        questions = questions.len(),
        skipped = errors.len(),
        elapsed = ?start.elapsed(),
        "corpus loaded"
    );

    let corpus = Corpus::new(root, documents, questions);
    if corpus.is_empty() {
        return Err(QdupError::EmptyCorpus { root: corpus.root });
    }

    Ok(LoadOutcome { corpus, errors })
}

/// Candidate documents under `root`, sorted so corpus order is reproducible.
pub fn discover(root: &Path, recursive: bool, options: &LoaderOptions) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder.hidden(true).git_ignore(true).git_global(false);
    if !recursive {
        builder.max_depth(Some(1));
    }

    let mut paths: Vec<PathBuf> = builder
        .build()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.into_path())
        .filter(|p| options.accepts(root, p))
        .collect();

    paths.sort();
    paths
}

/// Read and parse one document.
pub fn load_document(path: &Path) -> std::result::Result<Vec<Question>, LoadError> {
    let content = fs::read_to_string(path)
        .map_err(|e| LoadError::new(path, format!("read failed: {}", e)))?;
    parse_document(path, &content).map_err(|reason| LoadError::new(path, reason))
}

/// Extract every question record from quiz XML. `path` only labels the
/// resulting source locations.
pub fn parse_document(path: &Path, content: &str) -> std::result::Result<Vec<Question>, String> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(content, options)
        .map_err(|e| format!("XML parse error: {}", e))?;

    let root = doc.root_element();
    if !root.has_tag_name("quiz") {
        return Err(format!(
            "root element is <{}>, expected <quiz>",
            root.tag_name().name()
        ));
    }

    let mut questions = Vec::new();
    let mut category: Option<String> = None;

    for (i, node) in root
        .children()
        .filter(|n| n.has_tag_name("question"))
        .enumerate()
    {
        let tag = node.attribute("type").unwrap_or("");
        if tag == "category" {
            category = text_at(node, &["category", "text"]).filter(|c| !c.is_empty());
            continue;
        }
        let mut question = parse_question(node, SourceLocation::new(path.to_path_buf(), i + 1));
        question.category = category.clone();
        questions.push(question);
    }

    Ok(questions)
}

fn parse_question(node: Node, source: SourceLocation) -> Question {
    let kind = QuestionKind::from_tag(node.attribute("type").unwrap_or(""));
    let name = text_at(node, &["name", "text"]).unwrap_or_default();
    let body_text = text_at(node, &["questiontext", "text"]).unwrap_or_default();
    let body_format = child(node, "questiontext")
        .and_then(|q| q.attribute("format"))
        .map(str::to_string);
    let id = text_at(node, &["idnumber"]).filter(|s| !s.is_empty());

    let mut answer_texts = Vec::new();
    let mut answer_fractions = Vec::new();
    let mut has_feedback = text_at(node, &["generalfeedback", "text"])
        .map(|t| !t.is_empty())
        .unwrap_or(false);

    for answer in node.children().filter(|n| n.has_tag_name("answer")) {
        answer_fractions.push(
            answer
                .attribute("fraction")
                .and_then(|f| f.trim().parse::<f64>().ok())
                .unwrap_or(0.0),
        );
        if let Some(text) = text_at(answer, &["text"]).filter(|t| !t.is_empty()) {
            answer_texts.push(text);
        }
        if text_at(answer, &["feedback", "text"]).map(|t| !t.is_empty()).unwrap_or(false) {
            has_feedback = true;
        }
    }

    let tags = child(node, "tags").map(|tags| {
        tags.children()
            .filter(|n| n.has_tag_name("tag"))
            .filter_map(|tag| text_at(tag, &["text"]))
            .filter(|t| !t.is_empty())
            .collect::<BTreeSet<_>>()
    });

    Question {
        id,
        kind,
        name,
        body_text,
        answer_texts,
        has_feedback,
        tags,
        source,
        answer_fractions,
        body_format,
        category: None,
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|c| c.has_tag_name(name))
}

/// Markup-stripped text of the element reached by following `path` through
/// child elements. CDATA sections are plain text nodes to the parser.
fn text_at(node: Node, path: &[&str]) -> Option<String> {
    let mut current = node;
    for name in path {
        current = child(current, name)?;
    }
    let raw: String = current
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    Some(strip_markup(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TWO_QUESTIONS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<quiz>
  <question type="category">
    <category><text>$course$/Networks</text></category>
  </question>
  <question type="multichoice">
    <name><text>TCP handshake</text></name>
    <questiontext format="html"><text><![CDATA[<p>How many segments does the <b>TCP</b> handshake use?</p>]]></text></questiontext>
    <generalfeedback format="html"><text></text></generalfeedback>
    <idnumber>net-01</idnumber>
    <answer fraction="100"><text>Three</text><feedback><text>Right</text></feedback></answer>
    <answer fraction="0"><text>Two</text></answer>
    <tags><tag><text>tcp</text></tag><tag><text>layer4</text></tag></tags>
  </question>
  <question type="essay">
    <name><text>Explain routing</text></name>
    <questiontext format="moodle_auto_format"><text>Describe how a router forwards packets.</text></questiontext>
  </question>
</quiz>"#;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn single(name: &str, body: &str) -> String {
        format!(
            "<quiz><question type=\"shortanswer\"><name><text>{}</text></name>\
             <questiontext><text>{}</text></questiontext>\
             <answer fraction=\"100\"><text>yes</text></answer></question></quiz>",
            name, body
        )
    }

    #[test]
    fn test_parse_document_extracts_fields() {
        let questions = parse_document(Path::new("bank.xml"), TWO_QUESTIONS).unwrap();
        assert_eq!(questions.len(), 2);

        let q = &questions[0];
        assert_eq!(q.kind, QuestionKind::MultiChoice);
        assert_eq!(q.name, "TCP handshake");
        assert_eq!(q.body_text, "How many segments does the TCP handshake use?");
        assert_eq!(q.answer_texts, vec!["Three", "Two"]);
        assert_eq!(q.answer_fractions, vec![100.0, 0.0]);
        assert_eq!(q.id.as_deref(), Some("net-01"));
        assert!(q.has_feedback);
        assert_eq!(q.body_format.as_deref(), Some("html"));
        assert_eq!(q.category.as_deref(), Some("$course$/Networks"));
        let tags = q.tags.as_ref().unwrap();
        assert!(tags.contains("tcp") && tags.contains("layer4"));
        // The category record still counts toward the ordinal.
        assert_eq!(q.source.index, 2);

        let essay = &questions[1];
        assert_eq!(essay.kind, QuestionKind::Essay);
        assert!(essay.answer_texts.is_empty());
        assert!(!essay.has_feedback);
        assert!(essay.tags.is_none());
        assert!(essay.id.is_none());
        assert_eq!(essay.source.index, 3);
    }

    #[test]
    fn test_parse_document_rejects_non_quiz_root() {
        let err = parse_document(Path::new("x.xml"), "<bank><question/></bank>").unwrap_err();
        assert!(err.contains("expected <quiz>"));
    }

    #[test]
    fn test_parse_document_rejects_malformed_xml() {
        let err = parse_document(Path::new("x.xml"), "<quiz><question>").unwrap_err();
        assert!(err.starts_with("XML parse error"));
    }

    #[test]
    fn test_unknown_kind_passes_through() {
        let kind = QuestionKind::from_tag("ordering");
        assert_eq!(kind, QuestionKind::Unclassified("ordering".to_string()));
        assert_eq!(kind.as_str(), "ordering");
        assert_eq!(QuestionKind::from_tag("").as_str(), "unknown");
        assert_eq!(QuestionKind::from_tag("cloze"), QuestionKind::MultiAnswer);
    }

    #[test]
    fn test_load_directory_skips_malformed_documents() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.xml", &single("A", "first question"));
        write(tmp.path(), "b.xml", "<quiz><question");
        write(tmp.path(), "c.xml", &single("C", "third question"));
        write(tmp.path(), "notes.txt", "not a question bank");

        let input = Input::Directory {
            root: tmp.path().to_path_buf(),
            recursive: false,
        };
        let outcome = load(&input, &LoaderOptions::default()).unwrap();

        assert_eq!(outcome.corpus.len(), 2);
        assert_eq!(outcome.corpus.documents().len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].path.ends_with("b.xml"));
        assert_eq!(outcome.corpus.questions()[0].name, "A");
        assert_eq!(outcome.corpus.questions()[1].name, "C");
    }

    #[test]
    fn test_load_respects_recursion_flag() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "top.xml", &single("Top", "top level"));
        write(tmp.path(), "unit1/nested.xml", &single("Nested", "nested level"));

        let flat = Input::Directory {
            root: tmp.path().to_path_buf(),
            recursive: false,
        };
        let deep = Input::Directory {
            root: tmp.path().to_path_buf(),
            recursive: true,
        };
        let options = LoaderOptions::default();

        assert_eq!(load(&flat, &options).unwrap().corpus.len(), 1);
        let outcome = load(&deep, &options).unwrap();
        assert_eq!(outcome.corpus.len(), 2);
        let depths: Vec<usize> = outcome.corpus.documents().iter().map(|d| d.depth).collect();
        assert_eq!(depths, vec![1, 2]);
    }

    #[test]
    fn test_load_applies_exclude_globs() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "keep.xml", &single("Keep", "kept"));
        write(tmp.path(), "drafts/skip.xml", &single("Skip", "skipped"));

        let input = Input::Directory {
            root: tmp.path().to_path_buf(),
            recursive: true,
        };
        let options = LoaderOptions::new(&["xml".to_string()], &["drafts/**".to_string()]).unwrap();
        let outcome = load(&input, &options).unwrap();
        assert_eq!(outcome.corpus.len(), 1);
        assert_eq!(outcome.corpus.questions()[0].name, "Keep");
    }

    #[test]
    fn test_invalid_exclude_glob_is_config_error() {
        let err = LoaderOptions::new(&["xml".to_string()], &["a[".to_string()]).unwrap_err();
        assert!(matches!(err, QdupError::Config(_)));
    }

    #[test]
    fn test_empty_corpus_is_fatal() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "broken.xml", "not xml at all");
        let input = Input::Directory {
            root: tmp.path().to_path_buf(),
            recursive: false,
        };
        let err = load(&input, &LoaderOptions::default()).unwrap_err();
        assert!(matches!(err, QdupError::EmptyCorpus { .. }));
    }

    #[test]
    fn test_load_single_document() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "exam.xml", TWO_QUESTIONS);
        let outcome = load(&Input::Document(path.clone()), &LoaderOptions::default()).unwrap();
        assert_eq!(outcome.corpus.len(), 2);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.corpus.questions()[1].source, SourceLocation::new(path, 3));
    }
}
