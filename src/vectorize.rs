//! TF-IDF vector space over a tokenized corpus.

use ahash::AHashMap;

/// Sparse, L2-normalized document vector. Entries are sorted by term id and
/// every weight is positive; a document without terms is empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentVector {
    entries: Vec<(u32, f64)>,
}

impl DocumentVector {
    #[cfg(test)]
    pub fn entries(&self) -> &[(u32, f64)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn norm(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt()
    }

    /// Sparse dot product: a sorted merge that only touches shared terms.
    pub fn dot(&self, other: &DocumentVector) -> f64 {
        let (a, b) = (&self.entries, &other.entries);
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < a.len() && j < b.len() {
            let (ta, wa) = a[i];
            let (tb, wb) = b[j];
            if ta == tb {
                sum += wa * wb;
                i += 1;
                j += 1;
            } else if ta < tb {
                i += 1;
            } else {
                j += 1;
            }
        }
        sum
    }
}

/// Vocabulary plus IDF table, computed once for the whole corpus.
#[derive(Debug, Clone)]
pub struct TfIdfModel {
    vocabulary: AHashMap<String, u32>,
    idf: Vec<f64>,
    documents: usize,
}

impl TfIdfModel {
    /// Term ids follow first appearance (document order, then token order),
    /// so the same corpus always yields the same ids.
    pub fn fit(token_docs: &[Vec<String>]) -> Self {
        let mut vocabulary: AHashMap<String, u32> = AHashMap::new();
        let mut doc_freq: Vec<usize> = Vec::new();
        let mut last_seen: Vec<usize> = Vec::new();

        for (doc, tokens) in token_docs.iter().enumerate() {
            for token in tokens {
                let next_id = vocabulary.len() as u32;
                let id = *vocabulary.entry(token.clone()).or_insert(next_id);
                if id as usize == doc_freq.len() {
                    doc_freq.push(0);
                    last_seen.push(usize::MAX);
                }
                // Count each term at most once per document.
                if last_seen[id as usize] != doc {
                    last_seen[id as usize] = doc;
                    doc_freq[id as usize] += 1;
                }
            }
        }

        let n = token_docs.len() as f64;
        let idf = doc_freq
            .iter()
            .map(|&df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        Self {
            vocabulary,
            idf,
            documents: token_docs.len(),
        }
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn document_count(&self) -> usize {
        self.documents
    }

    pub fn term_id(&self, term: &str) -> Option<u32> {
        self.vocabulary.get(term).copied()
    }

    #[cfg(test)]
    pub fn idf(&self, term: &str) -> Option<f64> {
        self.term_id(term).map(|id| self.idf[id as usize])
    }

    /// Raw counts times IDF, divided by the Euclidean norm. Tokens outside
    /// the vocabulary are ignored.
    pub fn transform(&self, tokens: &[String]) -> DocumentVector {
        let mut counts: AHashMap<u32, usize> = AHashMap::new();
        for token in tokens {
            if let Some(id) = self.term_id(token) {
                *counts.entry(id).or_insert(0) += 1;
            }
        }

        let mut entries: Vec<(u32, f64)> = counts
            .into_iter()
            .map(|(id, tf)| (id, tf as f64 * self.idf[id as usize]))
            .collect();
        entries.sort_unstable_by_key(|&(id, _)| id);

        let mut vector = DocumentVector { entries };
        let norm = vector.norm();
        if norm > 0.0 {
            for (_, w) in vector.entries.iter_mut() {
                *w /= norm;
            }
        } else {
            vector.entries.clear();
        }
        vector
    }
}

/// Fit on the whole corpus and emit one vector per document, same order.
pub fn vectorize(token_docs: &[Vec<String>]) -> (TfIdfModel, Vec<DocumentVector>) {
    let model = TfIdfModel::fit(token_docs);
    let vectors = token_docs.iter().map(|t| model.transform(t)).collect();
    (model, vectors)
}
