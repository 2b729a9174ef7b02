use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, StringRecord, Writer};
use tracing::info;

use crate::model::{Record, RecordTable};
use crate::util::{ensure_parent_directory, parse_optional_f64};

pub const COLUMN_ID: &str = "id";
pub const COLUMN_SRC: &str = "src";
pub const COLUMN_REF: &str = "ref";
pub const COLUMN_HYP: &str = "hyp";
pub const COLUMN_IS_HALLU: &str = "is_hallu";
pub const COLUMN_LABEL: &str = "label";

const RESERVED_COLUMNS: &[&str] = &[
    COLUMN_ID,
    COLUMN_SRC,
    COLUMN_REF,
    COLUMN_HYP,
    COLUMN_IS_HALLU,
    COLUMN_LABEL,
];

/// Header names with surrounding whitespace and a leading byte-order mark removed.
pub fn normalized_headers(headers: &StringRecord) -> Vec<String> {
    headers
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let name = if index == 0 {
                name.trim_start_matches('\u{feff}')
            } else {
                name
            };
            name.trim().to_string()
        })
        .collect()
}

pub fn column_index(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|header| header == name)
}

pub fn read_records(path: &Path) -> Result<RecordTable> {
    let mut reader = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open record table {}", path.display()))?;
    let headers = normalized_headers(
        reader
            .headers()
            .with_context(|| format!("failed to read header of {}", path.display()))?,
    );

    let Some(id_index) = column_index(&headers, COLUMN_ID) else {
        bail!("record table {} has no `{COLUMN_ID}` column", path.display());
    };
    let Some(hyp_index) = column_index(&headers, COLUMN_HYP) else {
        bail!("record table {} has no `{COLUMN_HYP}` column", path.display());
    };
    let src_index = column_index(&headers, COLUMN_SRC);
    let ref_index = column_index(&headers, COLUMN_REF);

    let extra_columns = headers
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.is_empty() && !RESERVED_COLUMNS.contains(&name.as_str()))
        .map(|(index, name)| (index, name.clone()))
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for (row_index, row) in reader.records().enumerate() {
        let row = row.with_context(|| {
            format!("failed to read row {} of {}", row_index + 1, path.display())
        })?;
        rows.push(row);
    }

    let (metric_columns, text_columns): (Vec<_>, Vec<_>) =
        extra_columns.into_iter().partition(|(index, _)| {
            rows.iter()
                .all(|row| is_numeric_cell(row.get(*index).unwrap_or("")))
        });

    let mut table = RecordTable::default();
    for (_, name) in &metric_columns {
        table.ensure_column(name);
    }
    table.text_columns = text_columns.iter().map(|(_, name)| name.clone()).collect();

    let mut seen_ids = HashSet::new();
    for (row_index, row) in rows.iter().enumerate() {
        let field = |index: usize| row.get(index).unwrap_or("");

        let id = field(id_index).trim().to_string();
        if id.is_empty() {
            bail!("row {} of {} has an empty id", row_index + 1, path.display());
        }
        if !seen_ids.insert(id.clone()) {
            bail!("duplicate id {id} in {}", path.display());
        }

        let mut record = Record::new(
            id,
            src_index.map(field).unwrap_or_default(),
            field(hyp_index),
        );
        record.reference = ref_index.map(|index| field(index).to_string());
        for (index, name) in &metric_columns {
            record.metrics.set(name, parse_optional_f64(field(*index)));
        }
        for (index, name) in &text_columns {
            record
                .passthrough
                .insert(name.clone(), field(*index).to_string());
        }

        table.records.push(record);
    }

    info!(
        path = %path.display(),
        records = table.len(),
        metric_columns = table.metric_columns.len(),
        text_columns = table.text_columns.len(),
        "loaded record table"
    );

    Ok(table)
}

/// Blank cells and the usual missing-value spellings count as numeric, so a
/// column with gaps still loads as a metric.
fn is_numeric_cell(raw: &str) -> bool {
    let cell = raw.trim();
    cell.is_empty()
        || cell.parse::<f64>().is_ok()
        || matches!(
            cell.to_ascii_lowercase().as_str(),
            "na" | "n/a" | "null" | "none"
        )
}

pub fn write_records(path: &Path, table: &RecordTable, include_label: bool) -> Result<()> {
    ensure_parent_directory(path)?;
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    let mut header = vec![COLUMN_ID, COLUMN_SRC, COLUMN_REF, COLUMN_HYP];
    header.extend(table.text_columns.iter().map(String::as_str));
    header.extend(table.metric_columns.iter().map(String::as_str));
    header.push(COLUMN_IS_HALLU);
    if include_label {
        header.push(COLUMN_LABEL);
    }
    writer
        .write_record(&header)
        .with_context(|| format!("failed to write header to {}", path.display()))?;

    for record in &table.records {
        let mut row = vec![
            record.id.clone(),
            record.src.clone(),
            record.reference.clone().unwrap_or_default(),
            record.hyp.clone(),
        ];
        row.extend(table.text_columns.iter().map(|column| {
            record
                .passthrough
                .get(column)
                .cloned()
                .unwrap_or_default()
        }));
        row.extend(table.metric_columns.iter().map(|column| {
            record
                .metrics
                .get(column)
                .map(|value| value.to_string())
                .unwrap_or_default()
        }));
        row.push(render_flag(record.human_label));
        if include_label {
            row.push(render_flag(record.label));
        }

        writer
            .write_record(&row)
            .with_context(|| format!("failed to write record {} to {}", record.id, path.display()))?;
    }

    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

fn render_flag(value: Option<bool>) -> String {
    match value {
        Some(true) => "1".to_string(),
        Some(false) => "0".to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn read_records_parses_metrics_and_strips_bom() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("parsed.csv");
        fs::write(
            &path,
            "\u{feff}id,src,ref,hyp,seq_logprob\n\
             0,a b,x y,\"hello, world\",-1.5\n\
             1,c d,z,foo,\n\
             2,e f,w,bar,nan\n",
        )
        .expect("write fixture");

        let table = read_records(&path).expect("read");
        assert_eq!(table.len(), 3);
        assert_eq!(table.metric_columns, vec!["seq_logprob".to_string()]);
        assert_eq!(table.records[0].id, "0");
        assert_eq!(table.records[0].hyp, "hello, world");
        assert_eq!(table.records[0].reference.as_deref(), Some("x y"));
        assert_eq!(table.records[0].metrics.get("seq_logprob"), Some(-1.5));
        assert_eq!(table.records[1].metrics.get("seq_logprob"), None);
        assert_eq!(table.records[2].metrics.get("seq_logprob"), None);
    }

    #[test]
    fn text_columns_pass_through_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("parsed.csv");
        let output = dir.path().join("hallu.csv");
        fs::write(
            &input,
            "id,src,ref,hyp,comet,lang,note\n\
             0,a,b,c,0.1,de,\n\
             1,d,e,f,NA,fr,\"long, quoted\"\n",
        )
        .expect("write fixture");

        let table = read_records(&input).expect("read");
        assert_eq!(table.metric_columns, vec!["comet".to_string()]);
        assert_eq!(
            table.text_columns,
            vec!["lang".to_string(), "note".to_string()]
        );
        assert_eq!(table.records[0].metrics.get("comet"), Some(0.1));
        assert_eq!(table.records[1].metrics.get("comet"), None);
        assert_eq!(
            table.records[1].passthrough.get("note").map(String::as_str),
            Some("long, quoted")
        );

        write_records(&output, &table, false).expect("write");
        let written = fs::read_to_string(&output).expect("read back");
        let mut lines = written.lines();
        assert_eq!(
            lines.next(),
            Some("id,src,ref,hyp,lang,note,comet,is_hallu")
        );
        assert_eq!(lines.next(), Some("0,a,b,c,de,,0.1,"));
        assert_eq!(lines.next(), Some("1,d,e,f,fr,\"long, quoted\",,"));
    }

    #[test]
    fn read_records_requires_id_and_hyp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("parsed.csv");
        fs::write(&path, "id,src,ref\n0,a,b\n").expect("write fixture");

        let err = read_records(&path).expect_err("missing hyp must be fatal");
        assert!(err.to_string().contains("`hyp`"));
    }

    #[test]
    fn read_records_rejects_duplicate_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("parsed.csv");
        fs::write(&path, "id,hyp\n7,a\n7,b\n").expect("write fixture");

        let err = read_records(&path).expect_err("duplicate id must be fatal");
        assert!(err.to_string().contains("duplicate id 7"));
    }

    #[test]
    fn write_records_emits_every_metric_column_and_labels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out").join("hallu.csv");

        let mut record = Record::new("3", "src", "hyp");
        record.reference = Some("ref".to_string());
        record.metrics.set("rt", Some(2.0));
        record.label = Some(true);
        let mut table = RecordTable::new(vec![record]);
        table.ensure_column("rt");
        table.ensure_column("comet");

        write_records(&path, &table, true).expect("write");
        let written = fs::read_to_string(&path).expect("read back");
        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("id,src,ref,hyp,rt,comet,is_hallu,label"));
        assert_eq!(lines.next(), Some("3,src,ref,hyp,2,,,1"));

        write_records(&path, &table, false).expect("write unlabeled");
        let written = fs::read_to_string(&path).expect("read back");
        assert!(written.starts_with("id,src,ref,hyp,rt,comet,is_hallu\n"));
    }
}
