use std::collections::HashMap;

use anyhow::Result;

use super::{MetricColumn, MetricProvider};
use crate::model::Record;
use crate::registry::SIGNAL_TNG_COUNT;

/// Most frequent whitespace-token n-gram and its count. Ties go to the n-gram
/// seen first. Texts shorter than `n` tokens yield `("", 0)`.
pub fn top_ngram_count(text: &str, n: usize) -> (String, usize) {
    let n = n.max(1);
    let tokens = text.split_whitespace().collect::<Vec<_>>();
    if tokens.len() < n {
        return (String::new(), 0);
    }

    let mut counts = HashMap::<&[&str], (usize, usize)>::new();
    for (position, window) in tokens.windows(n).enumerate() {
        counts.entry(window).or_insert((0, position)).0 += 1;
    }

    counts
        .into_iter()
        .max_by(|left, right| {
            let (left_count, left_first) = left.1;
            let (right_count, right_first) = right.1;
            left_count
                .cmp(&right_count)
                .then(right_first.cmp(&left_first))
        })
        .map(|(window, (count, _))| (window.join(" "), count))
        .unwrap_or_default()
}

/// Excess repetition of the hypothesis' top n-gram over the source's. Excess
/// below `threshold` is reported as zero.
pub struct NgramRepetitionProvider {
    pub n: usize,
    pub threshold: f64,
}

impl NgramRepetitionProvider {
    pub fn score(&self, src: &str, hyp: &str) -> f64 {
        let (_, src_count) = top_ngram_count(src, self.n);
        let (_, hyp_count) = top_ngram_count(hyp, self.n);
        let excess = hyp_count as f64 - src_count as f64;
        if excess >= self.threshold { excess } else { 0.0 }
    }
}

impl MetricProvider for NgramRepetitionProvider {
    fn name(&self) -> &'static str {
        "ngram_repetition"
    }

    fn signals(&self) -> Vec<String> {
        vec![SIGNAL_TNG_COUNT.to_string()]
    }

    fn compute(&self, records: &[Record]) -> Result<Vec<MetricColumn>> {
        let values = records
            .iter()
            .map(|record| Some(self.score(&record.src, &record.hyp)))
            .collect();
        Ok(vec![MetricColumn::new(SIGNAL_TNG_COUNT, values)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_ngram_count_finds_most_repeated_window() {
        let (ngram, count) = top_ngram_count("a b c a b c a b c d", 3);
        assert_eq!(ngram, "a b c");
        assert_eq!(count, 3);
    }

    #[test]
    fn top_ngram_count_prefers_first_seen_on_ties() {
        let (ngram, count) = top_ngram_count("x y z", 2);
        assert_eq!(ngram, "x y");
        assert_eq!(count, 1);
    }

    #[test]
    fn short_text_has_no_ngrams() {
        assert_eq!(top_ngram_count("too short", 3), (String::new(), 0));
        assert_eq!(top_ngram_count("", 1), (String::new(), 0));
    }

    #[test]
    fn score_reports_only_excess_at_or_above_threshold() {
        let provider = NgramRepetitionProvider {
            n: 2,
            threshold: 3.0,
        };
        let looping = "the cat the cat the cat the cat the cat";
        assert_eq!(provider.score("the cat sat", looping), 4.0);
        assert_eq!(provider.score("the cat sat", "the cat the cat sat"), 0.0);
    }

    #[test]
    fn compute_defines_value_for_every_record() {
        let provider = NgramRepetitionProvider {
            n: 3,
            threshold: 3.0,
        };
        let records = vec![Record::new("0", "a b c", "a b c"), Record::new("1", "", "")];

        let columns = provider.compute(&records).expect("compute");
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, SIGNAL_TNG_COUNT);
        assert_eq!(columns[0].values, vec![Some(0.0), Some(0.0)]);
    }
}
