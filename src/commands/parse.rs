use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use csv::Writer;
use regex::Regex;
use tracing::{info, warn};

use crate::cli::ParseArgs;
use crate::model::Record;
use crate::registry::SIGNAL_SEQ_LOGPROB;
use crate::table::{COLUMN_HYP, COLUMN_ID, COLUMN_REF, COLUMN_SRC};
use crate::util::ensure_parent_directory;

pub fn run(args: ParseArgs) -> Result<()> {
    let file = File::open(&args.gen_path)
        .with_context(|| format!("failed to open {}", args.gen_path.display()))?;
    let parsed = parse_generate_output(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", args.gen_path.display()))?;

    if parsed.incomplete > 0 {
        warn!(
            incomplete = parsed.incomplete,
            "sentences missing a source, reference or hypothesis line were dropped"
        );
    }

    write_parsed(&args.out, &parsed.records)?;
    info!(
        path = %args.out.display(),
        records = parsed.records.len(),
        "wrote parsed records"
    );

    Ok(())
}

#[derive(Debug, Default)]
pub struct ParsedGenerate {
    pub records: Vec<Record>,
    pub incomplete: usize,
}

#[derive(Debug, Default)]
struct SentenceLines {
    src: Option<String>,
    reference: Option<String>,
    hypothesis: Option<(f64, String)>,
}

/// Collects `S-`, `T-` and `H-` lines of fairseq-generate output. Sentences are
/// emitted in ascending index order and only when all three lines were seen.
pub fn parse_generate_output(reader: impl BufRead) -> Result<ParsedGenerate> {
    let pattern =
        Regex::new(r"^([STH])-(\d+)\t(.*)$").context("failed to compile generate line regex")?;
    let mut sentences = BTreeMap::<u64, SentenceLines>::new();

    for (line_index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", line_index + 1))?;
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(captures) = pattern.captures(line) else {
            continue;
        };

        let kind = &captures[1];
        let index = captures[2]
            .parse::<u64>()
            .with_context(|| format!("invalid sentence index on line {}", line_index + 1))?;
        let rest = &captures[3];
        let entry = sentences.entry(index).or_default();

        match kind {
            "S" => entry.src = Some(rest.trim().to_string()),
            "T" => entry.reference = Some(rest.trim().to_string()),
            _ => {
                let mut fields = rest.trim().splitn(2, '\t');
                let raw_score = fields.next().unwrap_or_default();
                let score = raw_score.trim().parse::<f64>().with_context(|| {
                    format!(
                        "invalid hypothesis score {raw_score:?} on line {}",
                        line_index + 1
                    )
                })?;
                let hyp = fields.next().unwrap_or_default();
                let hyp = hyp.split('\t').next().unwrap_or_default().to_string();
                entry.hypothesis = Some((score, hyp));
            }
        }
    }

    let mut parsed = ParsedGenerate::default();
    for (index, sentence) in sentences {
        let SentenceLines {
            src: Some(src),
            reference: Some(reference),
            hypothesis: Some((score, hyp)),
        } = sentence
        else {
            parsed.incomplete += 1;
            continue;
        };

        let mut record = Record::new(index.to_string(), src, hyp);
        record.reference = Some(reference);
        record.metrics.set(SIGNAL_SEQ_LOGPROB, Some(score));
        parsed.records.push(record);
    }

    Ok(parsed)
}

pub fn write_parsed(path: &Path, records: &[Record]) -> Result<()> {
    ensure_parent_directory(path)?;
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    writer
        .write_record([
            COLUMN_ID,
            COLUMN_SRC,
            COLUMN_REF,
            COLUMN_HYP,
            SIGNAL_SEQ_LOGPROB,
        ])
        .with_context(|| format!("failed to write header to {}", path.display()))?;

    for record in records {
        let score = record
            .metrics
            .get(SIGNAL_SEQ_LOGPROB)
            .map(|value| value.to_string())
            .unwrap_or_default();
        writer
            .write_record([
                record.id.as_str(),
                record.src.as_str(),
                record.reference.as_deref().unwrap_or_default(),
                record.hyp.as_str(),
                score.as_str(),
            ])
            .with_context(|| format!("failed to write record {} to {}", record.id, path.display()))?;
    }

    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}
