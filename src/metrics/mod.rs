use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::model::{Record, RecordTable};

mod attention;
mod chrf;
mod comet;
mod ngram;
mod repeats;

pub use attention::AttentionProvider;
pub use chrf::ChrfProvider;
pub use comet::CometScoresProvider;
pub use ngram::NgramRepetitionProvider;
pub use repeats::RepeatedTargetProvider;

/// One scored signal, aligned with the record order it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricColumn {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl MetricColumn {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// The same corpus-level value for every record.
    pub fn broadcast(name: impl Into<String>, value: Option<f64>, len: usize) -> Self {
        Self::new(name, vec![value; len])
    }
}

pub trait MetricProvider {
    fn name(&self) -> &'static str;

    /// Every column the provider owns. All of them are persisted; they are
    /// filled with undefined values when the provider fails.
    fn signals(&self) -> Vec<String>;

    fn compute(&self, records: &[Record]) -> Result<Vec<MetricColumn>>;
}

/// Runs each provider against the table. A failing provider never aborts the
/// run: its columns become undefined and the failure lands in `warnings`.
pub fn attach_metrics(
    table: &mut RecordTable,
    providers: &[Box<dyn MetricProvider>],
    warnings: &mut Vec<String>,
) {
    for provider in providers {
        match run_provider(provider.as_ref(), &table.records) {
            Ok(columns) => {
                for column in columns {
                    table.set_column(&column.name, &column.values);
                    info!(
                        provider = provider.name(),
                        signal = %column.name,
                        defined = table.defined_count(&column.name),
                        "metric attached"
                    );
                }
                // Signals a provider declares but did not compute keep whatever
                // the input table already holds for them.
                for signal in provider.signals() {
                    table.ensure_column(&signal);
                }
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(provider = provider.name(), error = %reason, "metric provider failed; signals left undefined");
                warnings.push(format!("metric provider {} failed: {reason}", provider.name()));
                for signal in provider.signals() {
                    table.clear_column(&signal);
                }
            }
        }
    }
}

fn run_provider(provider: &dyn MetricProvider, records: &[Record]) -> Result<Vec<MetricColumn>> {
    let columns = provider.compute(records)?;
    for column in &columns {
        if column.values.len() != records.len() {
            bail!(
                "signal {} has {} values for {} records",
                column.name,
                column.values.len(),
                records.len()
            );
        }
    }
    Ok(columns)
}
