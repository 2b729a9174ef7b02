use std::collections::HashMap;

use anyhow::Result;

use super::{MetricColumn, MetricProvider};
use crate::model::Record;
use crate::registry::SIGNAL_RT;

/// How many hypotheses in the corpus are exactly identical to each record's.
pub struct RepeatedTargetProvider;

pub fn repeated_targets<'a>(hyps: impl IntoIterator<Item = &'a str>) -> HashMap<&'a str, usize> {
    let mut counts = HashMap::new();
    for hyp in hyps {
        *counts.entry(hyp).or_insert(0usize) += 1;
    }
    counts
}

impl MetricProvider for RepeatedTargetProvider {
    fn name(&self) -> &'static str {
        "repeated_targets"
    }

    fn signals(&self) -> Vec<String> {
        vec![SIGNAL_RT.to_string()]
    }

    fn compute(&self, records: &[Record]) -> Result<Vec<MetricColumn>> {
        let counts = repeated_targets(records.iter().map(|record| record.hyp.as_str()));
        let values = records
            .iter()
            .map(|record| counts.get(record.hyp.as_str()).map(|count| *count as f64))
            .collect();
        Ok(vec![MetricColumn::new(SIGNAL_RT, values)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_hypotheses_share_their_count() {
        let records = vec![
            Record::new("0", "s0", "the the the"),
            Record::new("1", "s1", "a unique output"),
            Record::new("2", "s2", "the the the"),
            Record::new("3", "s3", "the the the "),
        ];

        let columns = RepeatedTargetProvider.compute(&records).expect("compute");
        assert_eq!(
            columns[0].values,
            vec![Some(2.0), Some(1.0), Some(2.0), Some(1.0)]
        );
    }
}
