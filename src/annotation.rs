use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use tracing::{info, warn};

use crate::model::Record;
use crate::table::{COLUMN_ID, COLUMN_IS_HALLU, column_index, normalized_headers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationStatus {
    Absent,
    Malformed(String),
    Merged { matched: usize },
}

impl AnnotationStatus {
    pub fn describe(&self) -> String {
        match self {
            Self::Absent => "absent".to_string(),
            Self::Malformed(reason) => format!("malformed: {reason}"),
            Self::Merged { matched } => format!("merged ({matched} matched)"),
        }
    }
}

/// Human labels keyed by record id. Blank labels are kept as `None`.
#[derive(Debug, Clone, Default)]
pub struct AnnotationTable {
    labels: HashMap<String, Option<bool>>,
}

impl AnnotationTable {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn get(&self, id: &str) -> Option<bool> {
        self.labels.get(id).copied().flatten()
    }
}

/// Outcome of reading an annotation file that could be opened.
#[derive(Debug, Clone)]
pub enum AnnotationRead {
    Table(AnnotationTable),
    Malformed(String),
}

pub fn parse_hallu_flag(raw: &str) -> Result<Option<bool>, String> {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "" | "nan" | "na" | "null" => Ok(None),
        "1" | "true" | "yes" => Ok(Some(true)),
        "0" | "false" | "no" => Ok(Some(false)),
        other => match other.parse::<f64>() {
            Ok(value) if value == 1.0 => Ok(Some(true)),
            Ok(value) if value == 0.0 => Ok(Some(false)),
            _ => Err(format!("unrecognized is_hallu value: {raw}")),
        },
    }
}

/// Reads an annotation table. A schema without `id` and `is_hallu` is reported
/// as `AnnotationRead::Malformed`; I/O and CSV errors propagate.
pub fn read_annotations(path: &Path, warnings: &mut Vec<String>) -> Result<AnnotationRead> {
    let mut reader = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open annotation table {}", path.display()))?;
    let headers = normalized_headers(
        reader
            .headers()
            .with_context(|| format!("failed to read header of {}", path.display()))?,
    );

    let (Some(id_index), Some(flag_index)) = (
        column_index(&headers, COLUMN_ID),
        column_index(&headers, COLUMN_IS_HALLU),
    ) else {
        return Ok(AnnotationRead::Malformed(format!(
            "missing required columns `{COLUMN_ID}`, `{COLUMN_IS_HALLU}`"
        )));
    };

    let mut table = AnnotationTable::default();
    let mut unrecognized = 0usize;
    let mut duplicates = 0usize;
    for (row_index, row) in reader.records().enumerate() {
        let row = row.with_context(|| {
            format!("failed to read row {} of {}", row_index + 1, path.display())
        })?;
        let id = row.get(id_index).unwrap_or("").trim().to_string();
        if id.is_empty() {
            continue;
        }

        let flag = match parse_hallu_flag(row.get(flag_index).unwrap_or("")) {
            Ok(flag) => flag,
            Err(_) => {
                unrecognized += 1;
                None
            }
        };

        if table.labels.contains_key(&id) {
            duplicates += 1;
            continue;
        }
        table.labels.insert(id, flag);
    }

    if unrecognized > 0 {
        let message = format!(
            "{unrecognized} annotation rows in {} have unrecognized is_hallu values; treated as unlabeled",
            path.display()
        );
        warn!(path = %path.display(), unrecognized, "unrecognized annotation labels");
        warnings.push(message);
    }
    if duplicates > 0 {
        let message = format!(
            "{duplicates} duplicate annotation ids in {}; first occurrence kept",
            path.display()
        );
        warn!(path = %path.display(), duplicates, "duplicate annotation ids");
        warnings.push(message);
    }

    Ok(AnnotationRead::Table(table))
}

/// Left-joins human labels onto `records`. Every failure mode leaves all human
/// labels undefined and is recorded in `warnings`.
pub fn merge_annotations(
    records: &mut [Record],
    path: Option<&Path>,
    warnings: &mut Vec<String>,
) -> AnnotationStatus {
    for record in records.iter_mut() {
        record.human_label = None;
    }

    let Some(path) = path else {
        return AnnotationStatus::Absent;
    };

    if !path.exists() {
        let message = format!("annotation file {} does not exist; ignoring", path.display());
        warn!(path = %path.display(), "annotation file missing");
        warnings.push(message);
        return AnnotationStatus::Absent;
    }

    let annotations = match read_annotations(path, warnings) {
        Ok(AnnotationRead::Table(annotations)) => annotations,
        Ok(AnnotationRead::Malformed(reason)) => {
            warn!(path = %path.display(), reason = %reason, "annotation schema mismatch; ignoring");
            warnings.push(format!("annotation file {}: {reason}", path.display()));
            return AnnotationStatus::Malformed(reason);
        }
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(path = %path.display(), error = %reason, "annotation file unreadable; ignoring");
            warnings.push(format!("annotation file {}: {reason}", path.display()));
            return AnnotationStatus::Malformed(reason);
        }
    };

    let mut matched = 0usize;
    for record in records.iter_mut() {
        record.human_label = annotations.get(&record.id);
        if record.human_label.is_some() {
            matched += 1;
        }
    }

    info!(
        path = %path.display(),
        annotations = annotations.len(),
        matched,
        "merged human annotations"
    );

    AnnotationStatus::Merged { matched }
}
