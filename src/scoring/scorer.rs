/// Scorer trait
pub trait Scorer: Send + Sync {
    /// Inverse document frequency of a term found in `doc_freq` of `total_docs` live documents.
    fn idf(&self, doc_freq: u64, total_docs: u64) -> f32;

    /// Contribution of one term occurring `term_freq` times in a document.
    fn score(&self, term_freq: u32, idf: f32) -> f32;

    fn name(&self) -> &str;
}

/// Classic TF-IDF: `tf × ln(N / df)`, with raw occurrence counts
#[derive(Debug, Clone, Copy, Default)]
pub struct TfIdfScorer;

impl Scorer for TfIdfScorer {
    fn idf(&self, doc_freq: u64, total_docs: u64) -> f32 {
        if doc_freq == 0 || total_docs == 0 {
            return 0.0;
        }
        (total_docs as f64 / doc_freq as f64).ln() as f32
    }

    fn score(&self, term_freq: u32, idf: f32) -> f32 {
        term_freq as f32 * idf
    }

    fn name(&self) -> &str {
        "tfidf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idf_follows_the_natural_log_ratio() {
        let scorer = TfIdfScorer;
        assert!((scorer.idf(1, 2) - 2f32.ln()).abs() < 1e-6);
        assert_eq!(scorer.idf(2, 2), 0.0);
        assert_eq!(scorer.idf(0, 2), 0.0);
        assert!((scorer.score(3, scorer.idf(1, 4)) - 3.0 * 4f32.ln()).abs() < 1e-5);
    }
}
