//! Okapi BM25 lexical index over lowercased whitespace token bags.
//!
//! One index per chunk size class, rebuilt lazily at the next query after
//! the chunk list changes. Scores for multi-variant queries are summed
//! across variants before normalization, which biases toward queries with
//! more variants; preserved deliberately from the reference pipeline.

use std::collections::HashMap;

/// Term saturation parameter.
const K1: f64 = 1.5;
/// Length normalization parameter.
const B: f64 = 0.75;

/// An immutable BM25 index over a chunk corpus.
#[derive(Debug)]
pub struct Bm25Index {
    /// Per-document term frequencies.
    term_freqs: Vec<HashMap<String, usize>>,
    /// Inverse document frequency per term.
    idf: HashMap<String, f64>,
    /// Per-document token counts.
    doc_lens: Vec<usize>,
    /// Average document length.
    avg_doc_len: f64,
}

impl Bm25Index {
    /// Builds an index over the token bags of a corpus.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn build(corpus: &[Vec<String>]) -> Self {
        let doc_count = corpus.len();
        let mut term_freqs = Vec::with_capacity(doc_count);
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        let mut doc_lens = Vec::with_capacity(doc_count);

        for tokens in corpus {
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(tokens.len());
            term_freqs.push(freqs);
        }

        let total_len: usize = doc_lens.iter().sum();
        let avg_doc_len = if doc_count == 0 {
            0.0
        } else {
            total_len as f64 / doc_count as f64
        };

        // Lucene-style smoothed idf: always non-negative, so fused scores
        // never flip sign for very common terms.
        let idf = doc_freqs
            .into_iter()
            .map(|(term, df)| {
                let n = doc_count as f64;
                let df = df as f64;
                (term, (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        Self {
            term_freqs,
            idf,
            doc_lens,
            avg_doc_len,
        }
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.term_freqs.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.term_freqs.is_empty()
    }

    /// BM25 score of every document against a tokenized query.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn scores(&self, query_tokens: &[String]) -> Vec<f64> {
        let mut scores = vec![0.0; self.term_freqs.len()];
        if self.avg_doc_len == 0.0 {
            return scores;
        }

        for term in query_tokens {
            let Some(&idf) = self.idf.get(term) else {
                continue;
            };
            for (doc_idx, freqs) in self.term_freqs.iter().enumerate() {
                let Some(&tf) = freqs.get(term) else {
                    continue;
                };
                let tf = tf as f64;
                let len_norm = 1.0 - B + B * (self.doc_lens[doc_idx] as f64 / self.avg_doc_len);
                scores[doc_idx] += idf * (tf * (K1 + 1.0)) / (tf + K1 * len_norm);
            }
        }

        scores
    }
}
