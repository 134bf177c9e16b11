//! Okapi BM25 over an in-memory corpus
//!
//! Statistics are computed per call from the documents supplied; nothing is
//! cached between queries.

use ahash::{HashMap, HashMapExt};
use regex::Regex;
use std::sync::LazyLock;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("word pattern is valid"));

/// Lowest idf a matching term may carry
const IDF_FLOOR: f64 = 1e-6;

/// Case-insensitive word tokens
pub fn tokenize(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct Bm25 {
    pub k1: f64,
    pub b: f64,
    /// Fraction of the mean idf assigned to terms whose idf is not positive
    pub epsilon: f64,
}

impl Default for Bm25 {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

impl Bm25 {
    /// Score every document against the query tokens; output is parallel to `documents`.
    pub fn score(&self, documents: &[Vec<String>], query: &[String]) -> Vec<f64> {
        let corpus_size = documents.len();
        if corpus_size == 0 {
            return Vec::new();
        }

        let total_len: usize = documents.iter().map(Vec::len).sum();
        let avgdl = total_len as f64 / corpus_size as f64;

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        let mut term_freqs: Vec<HashMap<&str, usize>> = Vec::with_capacity(corpus_size);
        for doc in documents {
            let mut tf: HashMap<&str, usize> = HashMap::new();
            for token in doc {
                *tf.entry(token.as_str()).or_insert(0) += 1;
            }
            for &term in tf.keys() {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let idf = self.idf(&doc_freq, corpus_size);

        documents
            .iter()
            .zip(&term_freqs)
            .map(|(doc, tf)| {
                let dl = doc.len() as f64;
                let norm = if avgdl > 0.0 {
                    1.0 - self.b + self.b * dl / avgdl
                } else {
                    1.0
                };
                query
                    .iter()
                    .filter_map(|term| {
                        let freq = *tf.get(term.as_str())? as f64;
                        let term_idf = *idf.get(term.as_str())?;
                        Some(term_idf * (freq * (self.k1 + 1.0)) / (freq + self.k1 * norm))
                    })
                    .sum()
            })
            .collect()
    }

    fn idf<'a>(&self, doc_freq: &HashMap<&'a str, usize>, corpus_size: usize) -> HashMap<&'a str, f64> {
        let n = corpus_size as f64;
        let mut idf: HashMap<&str, f64> = HashMap::with_capacity(doc_freq.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();

        for (&term, &df) in doc_freq {
            let df = df as f64;
            let value = (n - df + 0.5).ln() - (df + 0.5).ln();
            idf_sum += value;
            if value <= 0.0 {
                negative.push(term);
            }
            idf.insert(term, value);
        }

        let mean = if idf.is_empty() {
            0.0
        } else {
            idf_sum / idf.len() as f64
        };
        let eps = (self.epsilon * mean).max(IDF_FLOOR);
        for term in negative {
            idf.insert(term, eps);
        }

        idf
    }
}
