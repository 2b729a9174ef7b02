use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-record signal values. A signal that is absent from the map is undefined;
/// non-finite values are never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricValues {
    values: BTreeMap<String, f64>,
}

impl MetricValues {
    pub fn get(&self, signal: &str) -> Option<f64> {
        self.values.get(signal).copied()
    }

    pub fn set(&mut self, signal: &str, value: Option<f64>) {
        match value.filter(|value| value.is_finite()) {
            Some(value) => {
                self.values.insert(signal.to_string(), value);
            }
            None => {
                self.values.remove(signal);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub id: String,
    pub src: String,
    pub reference: Option<String>,
    pub hyp: String,
    pub metrics: MetricValues,
    /// Non-numeric input columns, carried through to the output unchanged.
    pub passthrough: BTreeMap<String, String>,
    pub human_label: Option<bool>,
    pub label: Option<bool>,
}

impl Record {
    pub fn new(id: impl Into<String>, src: impl Into<String>, hyp: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            src: src.into(),
            hyp: hyp.into(),
            ..Self::default()
        }
    }
}

/// Records plus the ordered metric and passthrough columns known for them. A
/// metric column can be present while every value in it is undefined.
#[derive(Debug, Clone, Default)]
pub struct RecordTable {
    pub records: Vec<Record>,
    pub metric_columns: Vec<String>,
    pub text_columns: Vec<String>,
}

impl RecordTable {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn has_column(&self, signal: &str) -> bool {
        self.metric_columns.iter().any(|column| column == signal)
    }

    pub fn has_text_column(&self, name: &str) -> bool {
        self.text_columns.iter().any(|column| column == name)
    }

    /// Declares a metric column without touching existing values. A passthrough
    /// column of the same name stays as it is.
    pub fn ensure_column(&mut self, signal: &str) {
        if !self.has_column(signal) && !self.has_text_column(signal) {
            self.metric_columns.push(signal.to_string());
        }
    }

    /// Replaces a column wholesale. `values` must be aligned with `records`.
    /// A passthrough column of the same name is replaced by the metric.
    pub fn set_column(&mut self, signal: &str, values: &[Option<f64>]) {
        if self.has_text_column(signal) {
            self.text_columns.retain(|column| column != signal);
            for record in &mut self.records {
                record.passthrough.remove(signal);
            }
        }
        self.ensure_column(signal);
        for (record, value) in self.records.iter_mut().zip(values) {
            record.metrics.set(signal, *value);
        }
    }

    pub fn clear_column(&mut self, signal: &str) {
        self.ensure_column(signal);
        for record in &mut self.records {
            record.metrics.set(signal, None);
        }
    }

    pub fn defined_count(&self, signal: &str) -> usize {
        self.records
            .iter()
            .filter(|record| record.metrics.get(signal).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionSummary {
    pub signal: String,
    pub defined_count: usize,
    pub worst_count: usize,
    pub tail_pool_size: usize,
    pub tail_count: usize,
    pub picked_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelCounts {
    pub human_labeled: usize,
    pub rule_labeled: usize,
    pub positive: usize,
    pub negative: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildParams {
    pub worst_k: usize,
    pub tail_frac: f64,
    pub tail_k: usize,
    pub seed: u64,
    pub tng_n: usize,
    pub tng_thresh: f64,
    pub seqlog_thresh: f64,
    pub comet_thresh: f64,
    pub chrf_thresh: f64,
    pub compute_chrf: bool,
    pub comet_model: Option<String>,
    pub output_mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildPaths {
    pub parsed_path: String,
    pub parsed_sha256: String,
    pub out_path: String,
    pub annot_path: Option<String>,
    pub registry_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub paths: BuildPaths,
    pub params: BuildParams,
    pub record_count: usize,
    pub metric_columns: Vec<String>,
    pub annotation_status: String,
    pub selections: Vec<SelectionSummary>,
    pub selected_count: usize,
    pub labels: Option<LabelCounts>,
    pub warnings: Vec<String>,
}
