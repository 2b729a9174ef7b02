use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use super::{MetricColumn, MetricProvider};
use crate::model::Record;
use crate::registry::SIGNAL_COMET;
use crate::util::parse_optional_f64;

/// COMET scores produced out of process, one per record in input order. Either
/// a JSON array (numbers or nulls) or one value per line. Without a scores file
/// nothing is computed and a `comet` column from the input table is kept.
pub struct CometScoresProvider {
    pub scores_path: Option<PathBuf>,
    pub model: Option<String>,
}

impl CometScoresProvider {
    /// Reference-free (QE) checkpoints score without the `ref` field.
    pub fn is_reference_free(&self) -> bool {
        self.model
            .as_deref()
            .is_some_and(|model| model.to_ascii_lowercase().contains("qe"))
    }
}

pub fn load_scores(path: &Path) -> Result<Vec<Option<f64>>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let trimmed = raw.trim_start_matches('\u{feff}').trim();

    if trimmed.starts_with('[') {
        let values: Vec<Option<f64>> = serde_json::from_str(trimmed)
            .with_context(|| format!("failed to parse score array {}", path.display()))?;
        return Ok(values
            .into_iter()
            .map(|value| value.filter(|value| value.is_finite()))
            .collect());
    }

    let mut values = Vec::new();
    for (line_index, line) in trimmed.lines().enumerate() {
        let cell = line.trim();
        let value = parse_optional_f64(cell);
        if value.is_none() && !cell.is_empty() && !cell.eq_ignore_ascii_case("nan") {
            bail!(
                "invalid score on line {} of {}: {cell}",
                line_index + 1,
                path.display()
            );
        }
        values.push(value);
    }
    Ok(values)
}

impl MetricProvider for CometScoresProvider {
    fn name(&self) -> &'static str {
        "comet"
    }

    fn signals(&self) -> Vec<String> {
        vec![SIGNAL_COMET.to_string()]
    }

    fn compute(&self, records: &[Record]) -> Result<Vec<MetricColumn>> {
        let Some(path) = self.scores_path.as_deref() else {
            return Ok(Vec::new());
        };

        if !self.is_reference_free() {
            if let Some(record) = records.iter().find(|record| record.reference.is_none()) {
                bail!(
                    "reference-based COMET scores need reference text; record {} has none",
                    record.id
                );
            }
        }

        let values = load_scores(path)?;
        if values.len() != records.len() {
            bail!(
                "{} holds {} scores for {} records",
                path.display(),
                values.len(),
                records.len()
            );
        }
        Ok(vec![MetricColumn::new(SIGNAL_COMET, values)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(count: usize) -> Vec<Record> {
        (0..count)
            .map(|index| {
                let mut record = Record::new(index.to_string(), "src", "hyp");
                record.reference = Some("ref".to_string());
                record
            })
            .collect()
    }

    #[test]
    fn loads_json_array_with_nulls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("comet.json");
        fs::write(&path, "[0.25, null, 0.9]").expect("write fixture");

        assert_eq!(
            load_scores(&path).expect("load"),
            vec![Some(0.25), None, Some(0.9)]
        );
    }

    #[test]
    fn loads_line_per_score() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("comet.txt");
        fs::write(&path, "0.1\nnan\n\n0.7\n").expect("write fixture");

        assert_eq!(
            load_scores(&path).expect("load"),
            vec![Some(0.1), None, None, Some(0.7)]
        );
    }

    #[test]
    fn rejects_garbage_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("comet.txt");
        fs::write(&path, "0.1\nbroken\n").expect("write fixture");

        assert!(load_scores(&path).is_err());
    }

    #[test]
    fn count_mismatch_fails_provider() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("comet.json");
        fs::write(&path, "[0.25]").expect("write fixture");
        let provider = CometScoresProvider {
            scores_path: Some(path),
            model: None,
        };

        let err = provider.compute(&records(2)).expect_err("mismatch");
        assert!(err.to_string().contains("1 scores for 2 records"));
    }

    #[test]
    fn without_scores_nothing_is_computed() {
        let provider = CometScoresProvider {
            scores_path: None,
            model: None,
        };
        let columns = provider.compute(&records(3)).expect("compute");
        assert!(columns.is_empty());
    }

    #[test]
    fn qe_models_do_not_need_references() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("comet.json");
        fs::write(&path, "[0.5]").expect("write fixture");
        let provider = CometScoresProvider {
            scores_path: Some(path),
            model: Some("wmt20-comet-qe-da-v2".to_string()),
        };

        let columns = provider
            .compute(&[Record::new("0", "src", "hyp")])
            .expect("reference-free scores");
        assert_eq!(columns[0].values, vec![Some(0.5)]);
    }
}
