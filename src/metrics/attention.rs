use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::{MetricColumn, MetricProvider};
use crate::model::Record;
use crate::registry::{SIGNAL_ATTN_EOS, SIGNAL_ATTN_IGNSRC};

/// Target-length x source-length attention weights for one sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionMatrix {
    rows: Vec<Vec<f64>>,
    src_len: usize,
}

#[derive(Debug, Deserialize)]
struct AttentionEntry {
    attn: Option<Vec<Vec<f64>>>,
}

impl AttentionMatrix {
    /// `None` for empty or ragged matrices.
    pub fn new(rows: Vec<Vec<f64>>) -> Option<Self> {
        let src_len = rows.first().map(Vec::len)?;
        if src_len == 0 || rows.iter().any(|row| row.len() != src_len) {
            return None;
        }
        Some(Self { rows, src_len })
    }

    fn column_sum(&self, column: usize) -> f64 {
        self.rows.iter().map(|row| row[column]).sum()
    }

    fn total(&self) -> f64 {
        self.rows.iter().flatten().sum()
    }

    /// Share of all attention mass that lands on the EOS source position.
    pub fn eos_mass(&self, eos_index: Option<usize>) -> Option<f64> {
        let eos = eos_index.unwrap_or(self.src_len - 1);
        if eos >= self.src_len {
            return None;
        }
        Some(self.column_sum(eos) / (self.total() + 1e-12))
    }

    /// Fraction of source positions whose received attention is below `threshold`.
    pub fn ignored_source_share(&self, threshold: f64) -> f64 {
        let ignored = (0..self.src_len)
            .filter(|column| self.column_sum(*column) < threshold)
            .count();
        ignored as f64 / self.src_len as f64
    }
}

pub fn load_attentions(path: &Path) -> Result<Vec<Option<AttentionMatrix>>> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let body = raw.strip_prefix("\u{feff}".as_bytes()).unwrap_or(raw.as_slice());
    let entries: Vec<AttentionEntry> = serde_json::from_slice(body)
        .with_context(|| format!("failed to parse attention matrices {}", path.display()))?;

    Ok(entries
        .into_iter()
        .map(|entry| entry.attn.and_then(AttentionMatrix::new))
        .collect())
}

/// Attention statistics looked up by sentence index, which is the record id
/// read as an integer.
pub struct AttentionProvider {
    pub path: PathBuf,
    pub eos_index: Option<usize>,
    pub ignore_threshold: f64,
}

impl MetricProvider for AttentionProvider {
    fn name(&self) -> &'static str {
        "attention"
    }

    fn signals(&self) -> Vec<String> {
        vec![SIGNAL_ATTN_EOS.to_string(), SIGNAL_ATTN_IGNSRC.to_string()]
    }

    fn compute(&self, records: &[Record]) -> Result<Vec<MetricColumn>> {
        let matrices = load_attentions(&self.path)?;

        let mut eos = Vec::with_capacity(records.len());
        let mut ignored = Vec::with_capacity(records.len());
        for record in records {
            let matrix = record
                .id
                .parse::<usize>()
                .ok()
                .and_then(|index| matrices.get(index))
                .and_then(Option::as_ref);

            eos.push(matrix.and_then(|matrix| matrix.eos_mass(self.eos_index)));
            ignored.push(matrix.map(|matrix| matrix.ignored_source_share(self.ignore_threshold)));
        }

        Ok(vec![
            MetricColumn::new(SIGNAL_ATTN_EOS, eos),
            MetricColumn::new(SIGNAL_ATTN_IGNSRC, ignored),
        ])
    }
}
