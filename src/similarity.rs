//! Pairwise cosine similarity over normalized document vectors.
//!
//! The pair space of each comparison block is flattened to `0..m(m-1)/2`
//! and cut into fixed-size chunks that rayon scores independently. Results
//! are sorted by `(i, j)` afterwards, so the output never depends on how
//! the chunks were scheduled.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Instant;
use tracing::info;

use crate::corpus::Corpus;
use crate::error::{QdupError, Result};
use crate::vectorize::DocumentVector;

const CHUNK_PAIRS: usize = 1 << 14;

/// Which question pairs are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// Only questions from the same source document.
    WithinDocument,
    /// Every unordered pair in the corpus.
    Global,
    /// Every pair whose questions come from different documents.
    CrossDocument,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::WithinDocument => "within-document",
            Scope::Global => "global",
            Scope::CrossDocument => "cross-document",
        })
    }
}

/// Threshold and scope for one run. Each invocation mode supplies its own
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityConfig {
    threshold: f64,
    scope: Scope,
}

impl SimilarityConfig {
    pub fn new(threshold: f64, scope: Scope) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(QdupError::config(format!(
                "threshold must be between 0.0 and 1.0, got {}",
                threshold
            )));
        }
        Ok(Self { threshold, scope })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }
}

/// Candidate duplicate: `i < j`, `score` in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityPair {
    pub i: usize,
    pub j: usize,
    pub score: f64,
}

/// Scores this close to 1.0 are identical directions that lost a few ulps
/// in normalization.
const UNIT_TOLERANCE: f64 = 1e-9;

/// Cosine similarity of two unit vectors, in `[0, 1]`. Rounding drift on
/// either side of 1.0 is snapped to exactly 1.0.
pub fn cosine(a: &DocumentVector, b: &DocumentVector) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let score = a.dot(b);
    if (1.0 - score).abs() < UNIT_TOLERANCE {
        1.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Every eligible pair scoring at or above the threshold, sorted by `(i, j)`.
pub fn find_pairs(
    corpus: &Corpus,
    vectors: &[DocumentVector],
    config: &SimilarityConfig,
) -> Vec<SimilarityPair> {
    debug_assert_eq!(corpus.len(), vectors.len());
    let start = Instant::now();
    let blocks = comparison_blocks(corpus, config.scope);
    let same_doc = |i: usize, j: usize| source_path(corpus, i) == source_path(corpus, j);

    let mut pairs: Vec<SimilarityPair> = Vec::new();
    for block in &blocks {
        let total = pair_space(block.len());
        let chunks = total.div_ceil(CHUNK_PAIRS);
        let found: Vec<SimilarityPair> = (0..chunks)
            .into_par_iter()
            .flat_map_iter(|chunk| {
                let first = chunk * CHUNK_PAIRS;
                let len = CHUNK_PAIRS.min(total - first);
                PairRange::starting_at(first, block.len(), len)
            })
            .filter_map(|(a, b)| {
                let (i, j) = (block[a], block[b]);
                if config.scope == Scope::CrossDocument && same_doc(i, j) {
                    return None;
                }
                let score = cosine(&vectors[i], &vectors[j]);
                (score >= config.threshold).then_some(SimilarityPair { i, j, score })
            })
            .collect();
        pairs.extend(found);
    }

    pairs.sort_by(|x, y| (x.i, x.j).cmp(&(y.i, y.j)));
    info!(
        scope = %config.scope,
        candidates = eligible_pairs(corpus, config.scope),
        matches = pairs.len(),
        elapsed = ?start.elapsed(),
        "pairwise comparison finished"
    );
    pairs
}

/// Number of pairs the scope compares.
pub fn eligible_pairs(corpus: &Corpus, scope: Scope) -> usize {
    match scope {
        Scope::Global => pair_space(corpus.len()),
        Scope::WithinDocument => comparison_blocks(corpus, scope)
            .iter()
            .map(|b| pair_space(b.len()))
            .sum(),
        Scope::CrossDocument => {
            let within: usize = comparison_blocks(corpus, Scope::WithinDocument)
                .iter()
                .map(|b| pair_space(b.len()))
                .sum();
            pair_space(corpus.len()) - within
        }
    }
}

fn source_path(corpus: &Corpus, index: usize) -> &Path {
    &corpus.questions()[index].source.path
}

/// Index groups whose members are compared with each other. Each group is
/// ascending, so `a < b` within a group implies `i < j`.
fn comparison_blocks(corpus: &Corpus, scope: Scope) -> Vec<Vec<usize>> {
    match scope {
        Scope::Global | Scope::CrossDocument => vec![(0..corpus.len()).collect()],
        Scope::WithinDocument => {
            let mut blocks: Vec<Vec<usize>> = Vec::new();
            let mut current: Option<&Path> = None;
            for (idx, q) in corpus.questions().iter().enumerate() {
                if current != Some(q.source.path.as_path()) {
                    current = Some(q.source.path.as_path());
                    blocks.push(Vec::new());
                }
                if let Some(block) = blocks.last_mut() {
                    block.push(idx);
                }
            }
            blocks
        }
    }
}

fn pair_space(m: usize) -> usize {
    m * m.saturating_sub(1) / 2
}

/// Start of row `a` in the flattened space of `m` items.
fn row_offset(a: usize, m: usize) -> usize {
    a * (2 * m - a - 1) / 2
}

/// Map a flattened index `k` back to `(a, b)` with `a < b < m`.
fn unrank_pair(k: usize, m: usize) -> (usize, usize) {
    let n = (2 * m - 1) as f64;
    let estimate = ((n - (n * n - 8.0 * k as f64).max(0.0).sqrt()) / 2.0).floor();
    let mut a = (estimate.max(0.0) as usize).min(m.saturating_sub(2));
    while a > 0 && row_offset(a, m) > k {
        a -= 1;
    }
    while a + 1 < m - 1 && row_offset(a + 1, m) <= k {
        a += 1;
    }
    (a, a + 1 + (k - row_offset(a, m)))
}

/// Walks `len` consecutive pairs of the flattened space.
struct PairRange {
    a: usize,
    b: usize,
    m: usize,
    remaining: usize,
}

impl PairRange {
    fn starting_at(k: usize, m: usize, len: usize) -> Self {
        let (a, b) = if len == 0 { (0, 1) } else { unrank_pair(k, m) };
        Self {
            a,
            b,
            m,
            remaining: len,
        }
    }
}

impl Iterator for PairRange {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = (self.a, self.b);
        self.remaining -= 1;
        self.b += 1;
        if self.b == self.m {
            self.a += 1;
            self.b = self.a + 1;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Question, QuestionKind, SourceLocation};
    use crate::normalize::tokenize_corpus;
    use crate::vectorize::vectorize;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn question(file: &str, index: usize, body: &str) -> Question {
        Question {
            id: None,
            kind: QuestionKind::MultiChoice,
            name: String::new(),
            body_text: body.to_string(),
            answer_texts: vec![],
            has_feedback: false,
            tags: None,
            source: SourceLocation::new(PathBuf::from(file), index),
            answer_fractions: vec![],
            body_format: None,
            category: None,
        }
    }

    fn build(items: &[(&str, &str)]) -> (Corpus, Vec<DocumentVector>) {
        let questions: Vec<Question> = items
            .iter()
            .enumerate()
            .map(|(i, (file, body))| question(file, i + 1, body))
            .collect();
        let corpus = Corpus::new(PathBuf::from("."), vec![], questions);
        let tokens = tokenize_corpus(corpus.questions());
        let (_, vectors) = vectorize(&tokens);
        (corpus, vectors)
    }

    fn sample() -> (Corpus, Vec<DocumentVector>) {
        build(&[
            ("a.xml", "what is the capital of france"),
            ("a.xml", "what is the capital of spain"),
            ("b.xml", "what is the capital of france"),
            ("b.xml", "name a prime number greater than ten"),
            ("c.xml", "name a prime number greater than twenty"),
            ("c.xml", "describe photosynthesis in plants"),
        ])
    }

    fn pair_set(pairs: &[SimilarityPair]) -> HashSet<(usize, usize)> {
        pairs.iter().map(|p| (p.i, p.j)).collect()
    }

    #[test]
    fn test_unrank_covers_space_in_order() {
        for m in 2..40 {
            let mut expected = Vec::new();
            for a in 0..m {
                for b in (a + 1)..m {
                    expected.push((a, b));
                }
            }
            let got: Vec<_> = (0..pair_space(m)).map(|k| unrank_pair(k, m)).collect();
            assert_eq!(got, expected, "m = {}", m);
        }
    }

    #[test]
    fn test_pair_range_matches_nested_loop() {
        let m = 9;
        let all: Vec<_> = PairRange::starting_at(0, m, pair_space(m)).collect();
        assert_eq!(all.len(), 36);
        let tail: Vec<_> = PairRange::starting_at(10, m, 5).collect();
        assert_eq!(tail, all[10..15].to_vec());
    }

    #[test]
    fn test_worked_example_threshold() {
        let (corpus, vectors) = build(&[("a.xml", "a b c"), ("a.xml", "a b d")]);

        let strict = SimilarityConfig::new(0.6, Scope::Global).unwrap();
        assert!(find_pairs(&corpus, &vectors, &strict).is_empty());

        let loose = SimilarityConfig::new(0.4, Scope::Global).unwrap();
        let pairs = find_pairs(&corpus, &vectors, &loose);
        assert_eq!(pairs.len(), 1);
        assert_eq!((pairs[0].i, pairs[0].j), (0, 1));
        assert!((pairs[0].score - 0.503).abs() < 0.001);
    }

    #[test]
    fn test_symmetry_and_range() {
        let (_, vectors) = sample();
        for a in 0..vectors.len() {
            for b in 0..vectors.len() {
                let ab = cosine(&vectors[a], &vectors[b]);
                assert_eq!(ab, cosine(&vectors[b], &vectors[a]));
                assert!((0.0..=1.0).contains(&ab));
            }
        }
    }

    #[test]
    fn test_self_similarity_is_one() {
        let (_, vectors) = sample();
        for v in &vectors {
            assert_eq!(cosine(v, v), 1.0);
        }
    }

    #[test]
    fn test_identical_text_scores_one_and_disjoint_zero() {
        let (_, vectors) = sample();
        assert!((cosine(&vectors[0], &vectors[2]) - 1.0).abs() < 1e-9);
        assert_eq!(format!("{:.3}", cosine(&vectors[0], &vectors[2])), "1.000");
        assert_eq!(cosine(&vectors[0], &vectors[5]), 0.0);
    }

    #[test]
    fn test_identical_text_is_kept_at_threshold_one() {
        let bodies = [
            "what is the capital of france",
            "explain how a router forwards packets between networks",
            "which of the following is a prime number greater than ten",
            "describe photosynthesis in plants and name the gas they absorb",
        ];
        let items: Vec<(String, &str)> = bodies
            .iter()
            .enumerate()
            .flat_map(|(n, body)| {
                let file = format!("exam{}.xml", n);
                [(file.clone(), *body), (file, *body)]
            })
            .collect();
        let borrowed: Vec<(&str, &str)> = items.iter().map(|(f, b)| (f.as_str(), *b)).collect();
        let (corpus, vectors) = build(&borrowed);

        let config = SimilarityConfig::new(1.0, Scope::WithinDocument).unwrap();
        let pairs = find_pairs(&corpus, &vectors, &config);
        let expected: Vec<(usize, usize)> = (0..bodies.len()).map(|n| (2 * n, 2 * n + 1)).collect();
        assert_eq!(pairs.iter().map(|p| (p.i, p.j)).collect::<Vec<_>>(), expected);
        assert!(pairs.iter().all(|p| p.score == 1.0));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let (corpus, vectors) = build(&[("a.xml", "a b c"), ("a.xml", "a b d")]);
        let score = cosine(&vectors[0], &vectors[1]);

        let at = SimilarityConfig::new(score, Scope::Global).unwrap();
        let pairs = find_pairs(&corpus, &vectors, &at);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].score, score);

        let above = SimilarityConfig::new(score + 1e-6, Scope::Global).unwrap();
        assert!(find_pairs(&corpus, &vectors, &above).is_empty());
    }

    #[test]
    fn test_pairs_are_unique_and_ordered() {
        let (corpus, vectors) = sample();
        let config = SimilarityConfig::new(0.0, Scope::Global).unwrap();
        let pairs = find_pairs(&corpus, &vectors, &config);
        assert_eq!(pairs.len(), 15);
        assert!(pairs.iter().all(|p| p.i < p.j));
        assert_eq!(pair_set(&pairs).len(), pairs.len());
        assert!(pairs.windows(2).all(|w| (w[0].i, w[0].j) < (w[1].i, w[1].j)));
    }

    #[test]
    fn test_threshold_monotonicity() {
        let (corpus, vectors) = sample();
        let mut previous: Option<HashSet<(usize, usize)>> = None;
        for t in [0.0, 0.1, 0.3, 0.5, 0.7, 0.9, 1.0] {
            let config = SimilarityConfig::new(t, Scope::Global).unwrap();
            let current = pair_set(&find_pairs(&corpus, &vectors, &config));
            if let Some(prev) = &previous {
                assert!(current.is_subset(prev), "threshold {}", t);
            }
            previous = Some(current);
        }
    }

    #[test]
    fn test_scopes() {
        let (corpus, vectors) = sample();
        let run = |scope| {
            let config = SimilarityConfig::new(0.0, scope).unwrap();
            pair_set(&find_pairs(&corpus, &vectors, &config))
        };

        let within = run(Scope::WithinDocument);
        assert_eq!(within, [(0, 1), (2, 3), (4, 5)].into_iter().collect());

        let cross = run(Scope::CrossDocument);
        let global = run(Scope::Global);
        assert_eq!(cross.len(), 12);
        assert!(cross.is_disjoint(&within));
        assert_eq!(cross.union(&within).copied().collect::<HashSet<_>>(), global);

        assert_eq!(eligible_pairs(&corpus, Scope::Global), 15);
        assert_eq!(eligible_pairs(&corpus, Scope::WithinDocument), 3);
        assert_eq!(eligible_pairs(&corpus, Scope::CrossDocument), 12);
    }

    #[test]
    fn test_chunked_search_matches_nested_loop() {
        let bodies: Vec<String> = (0..220)
            .map(|i| format!("topic{} shared words item{}", i % 17, i % 5))
            .collect();
        let items: Vec<(&str, &str)> = bodies.iter().map(|b| ("bank.xml", b.as_str())).collect();
        let (corpus, vectors) = build(&items);
        let config = SimilarityConfig::new(0.5, Scope::Global).unwrap();

        let mut expected = Vec::new();
        for i in 0..vectors.len() {
            for j in (i + 1)..vectors.len() {
                let score = cosine(&vectors[i], &vectors[j]);
                if score >= 0.5 {
                    expected.push(SimilarityPair { i, j, score });
                }
            }
        }
        assert_eq!(find_pairs(&corpus, &vectors, &config), expected);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(SimilarityConfig::new(-0.1, Scope::Global).is_err());
        assert!(SimilarityConfig::new(1.01, Scope::Global).is_err());
        assert!(SimilarityConfig::new(f64::NAN, Scope::Global).is_err());
        assert!(SimilarityConfig::new(0.0, Scope::Global).is_ok());
        assert!(SimilarityConfig::new(1.0, Scope::WithinDocument).is_ok());
    }

    #[test]
    fn test_single_question_has_no_pairs() {
        let (corpus, vectors) = build(&[("a.xml", "alone")]);
        let config = SimilarityConfig::new(0.0, Scope::Global).unwrap();
        assert!(find_pairs(&corpus, &vectors, &config).is_empty());
    }
}
