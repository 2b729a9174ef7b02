use std::collections::HashMap;

use anyhow::{Result, bail};

use super::{MetricColumn, MetricProvider};
use crate::model::Record;
use crate::registry::SIGNAL_CHRF2;

pub const CHAR_ORDER: usize = 6;
pub const BETA: f64 = 2.0;

/// Per-order (hyp n-grams, ref n-grams, matched n-grams), summable across sentences.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct OrderStats {
    hyp: usize,
    reference: usize,
    matched: usize,
}

fn char_ngrams(text: &str, order: usize) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    let boundaries = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect::<Vec<_>>();

    for window in boundaries.windows(order + 1) {
        let ngram = &text[window[0]..window[order]];
        *counts.entry(ngram).or_insert(0usize) += 1;
    }
    counts
}

fn sentence_stats(hyp: &str, reference: &str) -> [OrderStats; CHAR_ORDER] {
    let hyp = hyp.split_whitespace().collect::<String>();
    let reference = reference.split_whitespace().collect::<String>();

    let mut stats = [OrderStats::default(); CHAR_ORDER];
    for (index, slot) in stats.iter_mut().enumerate() {
        let order = index + 1;
        let hyp_counts = char_ngrams(&hyp, order);
        let ref_counts = char_ngrams(&reference, order);

        slot.hyp = hyp_counts.values().sum();
        slot.reference = ref_counts.values().sum();
        slot.matched = hyp_counts
            .iter()
            .map(|(ngram, count)| (*count).min(ref_counts.get(ngram).copied().unwrap_or(0)))
            .sum();
    }
    stats
}

fn f_score(stats: &[OrderStats; CHAR_ORDER]) -> f64 {
    let factor = BETA * BETA;
    let mut effective_order = 0usize;
    let mut precision_sum = 0.0_f64;
    let mut recall_sum = 0.0_f64;

    for order in stats {
        if order.hyp == 0 || order.reference == 0 {
            continue;
        }
        effective_order += 1;
        precision_sum += order.matched as f64 / order.hyp as f64;
        recall_sum += order.matched as f64 / order.reference as f64;
    }

    if effective_order == 0 {
        return 0.0;
    }

    let precision = precision_sum / effective_order as f64;
    let recall = recall_sum / effective_order as f64;
    let denominator = factor * precision + recall;
    if denominator <= 0.0 {
        return 0.0;
    }
    100.0 * (1.0 + factor) * precision * recall / denominator
}

/// Corpus chrF (β = 2, character order 6, whitespace ignored) on a 0–100 scale.
pub fn corpus_chrf<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> f64 {
    let mut totals = [OrderStats::default(); CHAR_ORDER];
    for (hyp, reference) in pairs {
        for (total, order) in totals.iter_mut().zip(sentence_stats(hyp, reference)) {
            total.hyp += order.hyp;
            total.reference += order.reference;
            total.matched += order.matched;
        }
    }
    f_score(&totals)
}

/// Corpus-level chrF2 broadcast to every record. A disabled provider computes
/// nothing, leaving any precomputed `chrf2` column in place.
pub struct ChrfProvider {
    pub enabled: bool,
}

impl MetricProvider for ChrfProvider {
    fn name(&self) -> &'static str {
        "chrf2"
    }

    fn signals(&self) -> Vec<String> {
        vec![SIGNAL_CHRF2.to_string()]
    }

    fn compute(&self, records: &[Record]) -> Result<Vec<MetricColumn>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        if records.is_empty() {
            return Ok(vec![MetricColumn::new(SIGNAL_CHRF2, Vec::new())]);
        }

        let mut pairs = Vec::with_capacity(records.len());
        for record in records {
            let Some(reference) = record.reference.as_deref() else {
                bail!("record {} has no reference text", record.id);
            };
            pairs.push((record.hyp.as_str(), reference));
        }

        let score = corpus_chrf(pairs);
        Ok(vec![MetricColumn::broadcast(
            SIGNAL_CHRF2,
            Some(score),
            records.len(),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_corpus_scores_one_hundred() {
        let score = corpus_chrf([("the cat sat", "the cat sat"), ("hello there", "hello there")]);
        assert!((score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_characters_score_zero() {
        let score = corpus_chrf([("aaaa", "bbbb")]);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn whitespace_is_ignored() {
        let spaced = corpus_chrf([("the cat", "thecat")]);
        assert!((spaced - 100.0).abs() < 1e-9);
    }

    #[test]
    fn partial_overlap_lands_between_bounds() {
        let score = corpus_chrf([("the cat sat on the mat", "the cat sat on a rug")]);
        assert!(score > 0.0 && score < 100.0);
    }

    #[test]
    fn char_ngrams_respect_multibyte_boundaries() {
        let grams = char_ngrams("héé", 2);
        assert_eq!(grams.get("hé"), Some(&1));
        assert_eq!(grams.get("éé"), Some(&1));
    }

    #[test]
    fn disabled_provider_computes_nothing() {
        let records = vec![Record::new("0", "s", "h")];
        let columns = ChrfProvider { enabled: false }
            .compute(&records)
            .expect("compute");
        assert!(columns.is_empty());
    }

    #[test]
    fn missing_reference_fails_provider() {
        let records = vec![Record::new("0", "s", "h")];
        let err = ChrfProvider { enabled: true }
            .compute(&records)
            .expect_err("reference is required");
        assert!(err.to_string().contains("no reference"));
    }
}
