use crate::model::{LabelCounts, MetricValues, Record};
use crate::registry::ThresholdRule;

/// OR over every rule whose signal is defined. No defined signal means no
/// evidence, which labels the record negative.
pub fn fused_label(metrics: &MetricValues, rules: &[ThresholdRule]) -> bool {
    rules.iter().any(|rule| {
        metrics
            .get(&rule.signal)
            .is_some_and(|value| rule.comparison.holds(value, rule.threshold))
    })
}

/// Sets `label` on every record: the human label when present, otherwise the
/// fused rule label.
pub fn apply_labels(records: &mut [Record], rules: &[ThresholdRule]) -> LabelCounts {
    let mut counts = LabelCounts::default();

    for record in records.iter_mut() {
        let label = match record.human_label {
            Some(human) => {
                counts.human_labeled += 1;
                human
            }
            None => {
                counts.rule_labeled += 1;
                fused_label(&record.metrics, rules)
            }
        };

        if label {
            counts.positive += 1;
        } else {
            counts.negative += 1;
        }
        record.label = Some(label);
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{
        FusionThresholds, MetricRegistry, SIGNAL_CHRF2, SIGNAL_COMET, SIGNAL_SEQ_LOGPROB,
        SIGNAL_TNG_COUNT,
    };

    fn default_rules() -> Vec<ThresholdRule> {
        MetricRegistry::with_thresholds(FusionThresholds::default()).rules
    }

    fn record_with(values: &[(&str, f64)]) -> Record {
        let mut record = Record::new("1", "src", "hyp");
        for (signal, value) in values {
            record.metrics.set(signal, Some(*value));
        }
        record
    }

    #[test]
    fn low_sequence_logprob_alone_flags_record() {
        let record = record_with(&[(SIGNAL_SEQ_LOGPROB, -6.0)]);
        assert!(fused_label(&record.metrics, &default_rules()));
    }

    #[test]
    fn one_failing_signal_is_enough() {
        let record = record_with(&[(SIGNAL_COMET, 0.5), (SIGNAL_CHRF2, 40.0)]);
        assert!(fused_label(&record.metrics, &default_rules()));
    }

    #[test]
    fn passing_signals_do_not_flag() {
        let record = record_with(&[
            (SIGNAL_SEQ_LOGPROB, -1.2),
            (SIGNAL_TNG_COUNT, 2.0),
            (SIGNAL_COMET, 0.8),
            (SIGNAL_CHRF2, 61.0),
        ]);
        assert!(!fused_label(&record.metrics, &default_rules()));
    }

    #[test]
    fn repetition_threshold_is_inclusive() {
        let record = record_with(&[(SIGNAL_TNG_COUNT, 3.0)]);
        assert!(fused_label(&record.metrics, &default_rules()));
    }

    #[test]
    fn thresholds_are_caller_configurable() {
        let rules = MetricRegistry::with_thresholds(FusionThresholds {
            seq_logprob: -7.0,
            ..FusionThresholds::default()
        })
        .rules;
        let record = record_with(&[(SIGNAL_SEQ_LOGPROB, -6.0)]);
        assert!(!fused_label(&record.metrics, &rules));
    }

    #[test]
    fn record_without_any_signal_gets_negative_label() {
        let mut records = vec![Record::new("1", "src", "hyp")];
        let counts = apply_labels(&mut records, &default_rules());

        assert_eq!(records[0].label, Some(false));
        assert_eq!(counts.rule_labeled, 1);
        assert_eq!(counts.negative, 1);
    }

    #[test]
    fn human_label_takes_precedence_over_rules() {
        let mut flagged = record_with(&[(SIGNAL_SEQ_LOGPROB, -9.0)]);
        flagged.human_label = Some(false);
        let mut clean = record_with(&[(SIGNAL_COMET, 0.95)]);
        clean.human_label = Some(true);
        let mut records = vec![flagged, clean];

        let counts = apply_labels(&mut records, &default_rules());

        assert_eq!(records[0].label, Some(false));
        assert_eq!(records[1].label, Some(true));
        assert_eq!(counts.human_labeled, 2);
        assert_eq!(counts.rule_labeled, 0);
        assert_eq!(counts.positive, 1);
    }
}
