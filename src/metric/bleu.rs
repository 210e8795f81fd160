// ============================================================
// Metric — Sentence BLEU
// ============================================================
// BLEU of one tokenised hypothesis against one or more tokenised
// references (Papineni et al., 2002):
//
//   p_n = Σ min(count_hyp(g), max_ref count_ref(g)) / max(1, Σ count_hyp(g))
//   BP  = 1                      if c > r
//         exp(1 - r / c)         otherwise          (c = 0 → 0)
//   BLEU = BP · exp(Σ w_n · ln p_n)
//
// with r the reference length closest to c (shorter wins ties).
//
// Zero n-gram precisions are smoothed with "method 4" of
// Chen & Cherry (2014): the i-th zero precision becomes
// 1 / (2^i · k / ln c) / denominator, k = 5.
// No unigram match at all short-circuits to 0.

use std::collections::HashMap;

/// Uniform 4-gram weights
pub const DEFAULT_WEIGHTS: [f64; 4] = [0.25; 4];
const METHOD4_K: f64 = 5.0;

/// Sentence BLEU with uniform 4-gram weights and method-4 smoothing.
pub fn sentence_bleu<S: AsRef<str>>(references: &[Vec<S>], hypothesis: &[S]) -> f64 {
    sentence_bleu_weighted(references, hypothesis, &DEFAULT_WEIGHTS)
}

pub fn sentence_bleu_weighted<S: AsRef<str>>(
    references: &[Vec<S>],
    hypothesis: &[S],
    weights:    &[f64],
) -> f64 {
    let hyp: Vec<&str> = hypothesis.iter().map(AsRef::as_ref).collect();
    let refs: Vec<Vec<&str>> = references
        .iter()
        .map(|r| r.iter().map(AsRef::as_ref).collect())
        .collect();
    if refs.is_empty() {
        return 0.0;
    }

    // ── Step 1: clipped n-gram counts ──
    let counts: Vec<(usize, usize)> = (1..=weights.len())
        .map(|n| modified_precision(&refs, &hyp, n))
        .collect();
    if counts.first().map_or(true, |&(matched, _)| matched == 0) {
        return 0.0;
    }

    // ── Step 2: brevity penalty ──
    let hyp_len = hyp.len();
    let ref_len = closest_ref_length(&refs, hyp_len);
    let bp      = brevity_penalty(ref_len, hyp_len);

    // ── Step 3: smoothed precisions, weighted geometric mean ──
    let precisions = smooth_method4(&counts, hyp_len);
    if precisions.iter().any(|&p| p <= 0.0) {
        // ln(0) is undefined; such a pair scores 0.
        return 0.0;
    }
    let log_sum: f64 = weights.iter().zip(&precisions).map(|(w, p)| w * p.ln()).sum();
    bp * log_sum.exp()
}

/// (clipped matches, max(1, total hypothesis n-grams))
fn modified_precision(references: &[Vec<&str>], hypothesis: &[&str], n: usize) -> (usize, usize) {
    let hyp_ngrams = extract_ngrams(hypothesis, n);

    let mut max_ref_counts: HashMap<&[&str], usize> = HashMap::new();
    for reference in references {
        for (ngram, count) in extract_ngrams(reference, n) {
            let entry = max_ref_counts.entry(ngram).or_insert(0);
            *entry = (*entry).max(count);
        }
    }

    let clipped: usize = hyp_ngrams
        .iter()
        .map(|(ngram, &count)| count.min(max_ref_counts.get(ngram).copied().unwrap_or(0)))
        .sum();
    let total: usize = hyp_ngrams.values().sum();

    (clipped, total.max(1))
}

fn extract_ngrams<'a, 'b>(tokens: &'b [&'a str], n: usize) -> HashMap<&'b [&'a str], usize> {
    let mut counts = HashMap::new();
    if n > 0 && tokens.len() >= n {
        for window in tokens.windows(n) {
            *counts.entry(window).or_insert(0) += 1;
        }
    }
    counts
}

fn closest_ref_length(references: &[Vec<&str>], hyp_len: usize) -> usize {
    references
        .iter()
        .map(Vec::len)
        .min_by_key(|&len| (len.abs_diff(hyp_len), len))
        .unwrap_or(0)
}

fn brevity_penalty(closest_ref_len: usize, hyp_len: usize) -> f64 {
    if hyp_len > closest_ref_len {
        1.0
    } else if hyp_len == 0 {
        0.0
    } else {
        (1.0 - closest_ref_len as f64 / hyp_len as f64).exp()
    }
}

fn smooth_method4(counts: &[(usize, usize)], hyp_len: usize) -> Vec<f64> {
    let mut incvnt = 1;
    counts
        .iter()
        .map(|&(matched, total)| {
            if matched == 0 && hyp_len > 1 {
                let numerator = 1.0 / (2f64.powi(incvnt) * METHOD4_K / (hyp_len as f64).ln());
                incvnt += 1;
                numerator / total as f64
            } else {
                matched as f64 / total as f64
            }
        })
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_identical_sentence_scores_one() {
        let hyp = words("Alice works at Bank .");
        let score = sentence_bleu(&[hyp.clone()], &hyp);
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_disjoint_vocabulary_scores_zero() {
        let score = sentence_bleu(&[words("Alice works at Bank .")], &words("completely different words here"));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_method4_smoothing_known_value() {
        // p = [1/2, ln2/10, ln2/20, ln2/40], equal lengths
        let score = sentence_bleu(&[words("the dog")], &words("the cat"));
        assert!((score - 0.067_544_361_420_347).abs() < 1e-9, "{score}");
    }

    #[test]
    fn test_brevity_penalty_known_value() {
        // p = [1, 1, 1, ln3/10], BP = exp(1 - 5/3)
        let score = sentence_bleu(&[words("a b c d e")], &words("a b c"));
        assert!((score - 0.295_584_365_212_268_8).abs() < 1e-9, "{score}");
    }

    #[test]
    fn test_best_reference_is_used() {
        let refs  = vec![words("nothing in common"), words("Alice works at Bank .")];
        let score = sentence_bleu(&refs, &words("Alice works at Bank ."));
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_clipping_limits_repeated_words() {
        let (matched, total) = modified_precision(&[vec!["the", "cat"]], &["the", "the", "the"], 1);
        assert_eq!((matched, total), (1, 3));
    }

    #[test]
    fn test_closest_reference_length_prefers_shorter_on_tie() {
        let refs = vec![vec!["a"; 6], vec!["a"; 4]];
        assert_eq!(closest_ref_length(&refs, 5), 4);
    }

    #[test]
    fn test_single_token_hypothesis_scores_zero() {
        assert_eq!(sentence_bleu(&[words("Alice")], &words("Alice")), 0.0);
    }

    #[test]
    fn test_empty_hypothesis_scores_zero() {
        assert_eq!(sentence_bleu(&[words("Alice works")], &Vec::<String>::new()), 0.0);
    }
}
