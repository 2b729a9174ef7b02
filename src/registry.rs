use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const SIGNAL_SEQ_LOGPROB: &str = "seq_logprob";
pub const SIGNAL_TNG_COUNT: &str = "tng_count";
pub const SIGNAL_RT: &str = "rt";
pub const SIGNAL_COMET: &str = "comet";
pub const SIGNAL_CHRF2: &str = "chrf2";
pub const SIGNAL_ATTN_EOS: &str = "attn_eos";
pub const SIGNAL_ATTN_IGNSRC: &str = "attn_ignsrc";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badness {
    LargerIsWorse,
    SmallerIsWorse,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Below,
    AtOrAbove,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Below => value < threshold,
            Self::AtOrAbove => value >= threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionSignal {
    pub name: String,
    pub badness: Badness,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub signal: String,
    pub comparison: Comparison,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionThresholds {
    pub seq_logprob: f64,
    pub tng_count: f64,
    pub comet: f64,
    pub chrf2: f64,
}

impl Default for FusionThresholds {
    fn default() -> Self {
        Self {
            seq_logprob: -5.0,
            tng_count: 3.0,
            comet: 0.3,
            chrf2: 45.0,
        }
    }
}

/// Signal directions for selection and threshold rules for fusion. Adding a
/// signal to either table is the only wiring needed for it to participate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRegistry {
    pub selection: Vec<SelectionSignal>,
    pub rules: Vec<ThresholdRule>,
}

#[derive(Debug, Deserialize)]
struct RegistryOverride {
    selection: Option<Vec<SelectionSignal>>,
    rules: Option<Vec<ThresholdRule>>,
}

const DEFAULT_SELECTION: &[(&str, Badness)] = &[
    (SIGNAL_COMET, Badness::SmallerIsWorse),
    (SIGNAL_TNG_COUNT, Badness::LargerIsWorse),
    (SIGNAL_RT, Badness::LargerIsWorse),
    (SIGNAL_CHRF2, Badness::SmallerIsWorse),
    (SIGNAL_ATTN_EOS, Badness::LargerIsWorse),
    (SIGNAL_ATTN_IGNSRC, Badness::LargerIsWorse),
];

impl MetricRegistry {
    pub fn with_thresholds(thresholds: FusionThresholds) -> Self {
        let selection = DEFAULT_SELECTION
            .iter()
            .map(|(name, badness)| SelectionSignal {
                name: (*name).to_string(),
                badness: *badness,
            })
            .collect();

        let rules = vec![
            rule(SIGNAL_SEQ_LOGPROB, Comparison::Below, thresholds.seq_logprob),
            rule(SIGNAL_TNG_COUNT, Comparison::AtOrAbove, thresholds.tng_count),
            rule(SIGNAL_COMET, Comparison::Below, thresholds.comet),
            rule(SIGNAL_CHRF2, Comparison::Below, thresholds.chrf2),
        ];

        Self { selection, rules }
    }

    /// Built-in tables, with any table present in the file replacing its default.
    pub fn load(path: Option<&Path>, thresholds: FusionThresholds) -> Result<Self> {
        let mut registry = Self::with_thresholds(thresholds);
        let Some(path) = path else {
            return Ok(registry);
        };

        let raw =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let overrides: RegistryOverride = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse registry {}", path.display()))?;

        if let Some(selection) = overrides.selection {
            registry.selection = selection;
        }
        if let Some(rules) = overrides.rules {
            registry.rules = rules;
        }

        registry
            .validate()
            .with_context(|| format!("invalid registry {}", path.display()))?;
        Ok(registry)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for signal in &self.selection {
            if signal.name.trim().is_empty() {
                bail!("selection signal with empty name");
            }
            if !seen.insert(signal.name.as_str()) {
                bail!("duplicate selection signal: {}", signal.name);
            }
        }

        for rule in &self.rules {
            if rule.signal.trim().is_empty() {
                bail!("threshold rule with empty signal name");
            }
            if !rule.threshold.is_finite() {
                bail!("threshold for {} is not finite", rule.signal);
            }
        }

        Ok(())
    }
}

fn rule(signal: &str, comparison: Comparison, threshold: f64) -> ThresholdRule {
    ThresholdRule {
        signal: signal.to_string(),
        comparison,
        threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_matches_pipeline_directions() {
        let registry = MetricRegistry::with_thresholds(FusionThresholds::default());
        let direction = |name: &str| {
            registry
                .selection
                .iter()
                .find(|signal| signal.name == name)
                .map(|signal| signal.badness)
        };

        assert_eq!(direction(SIGNAL_COMET), Some(Badness::SmallerIsWorse));
        assert_eq!(direction(SIGNAL_CHRF2), Some(Badness::SmallerIsWorse));
        assert_eq!(direction(SIGNAL_TNG_COUNT), Some(Badness::LargerIsWorse));
        assert_eq!(direction(SIGNAL_RT), Some(Badness::LargerIsWorse));
        assert_eq!(direction(SIGNAL_ATTN_EOS), Some(Badness::LargerIsWorse));
        assert_eq!(direction(SIGNAL_ATTN_IGNSRC), Some(Badness::LargerIsWorse));
        assert_eq!(direction(SIGNAL_SEQ_LOGPROB), None);
        assert_eq!(registry.rules.len(), 4);
    }

    #[test]
    fn comparison_boundaries() {
        assert!(Comparison::AtOrAbove.holds(3.0, 3.0));
        assert!(!Comparison::AtOrAbove.holds(2.9, 3.0));
        assert!(Comparison::Below.holds(-6.0, -5.0));
        assert!(!Comparison::Below.holds(-5.0, -5.0));
    }

    #[test]
    fn load_replaces_only_tables_present_in_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");
        std::fs::write(
            &path,
            r#"{"selection": [{"name": "len_ratio", "badness": "larger_is_worse"}]}"#,
        )
        .expect("write registry");

        let registry =
            MetricRegistry::load(Some(&path), FusionThresholds::default()).expect("load");
        assert_eq!(registry.selection.len(), 1);
        assert_eq!(registry.selection[0].name, "len_ratio");
        assert_eq!(registry.rules.len(), 4);
    }

    #[test]
    fn load_rejects_duplicate_selection_signals() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");
        std::fs::write(
            &path,
            r#"{"selection": [
                {"name": "rt", "badness": "larger_is_worse"},
                {"name": "rt", "badness": "smaller_is_worse"}
            ]}"#,
        )
        .expect("write registry");

        let err = MetricRegistry::load(Some(&path), FusionThresholds::default())
            .expect_err("duplicates must be rejected");
        assert!(format!("{err:#}").contains("duplicate selection signal"));
    }
}
