use std::collections::BTreeSet;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use tracing::{debug, info};

use crate::model::{Record, RecordTable, SelectionSummary};
use crate::registry::{Badness, MetricRegistry, SelectionSignal};

pub const DEFAULT_WORST_K: usize = 250;
pub const DEFAULT_TAIL_FRAC: f64 = 0.004;
pub const DEFAULT_TAIL_K: usize = 250;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionParams {
    pub worst_k: usize,
    pub tail_frac: f64,
    pub tail_k: usize,
    pub seed: u64,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            worst_k: DEFAULT_WORST_K,
            tail_frac: DEFAULT_TAIL_FRAC,
            tail_k: DEFAULT_TAIL_K,
            seed: DEFAULT_SEED,
        }
    }
}

impl SelectionParams {
    /// Size of the "bad band" the tail sample is drawn from.
    pub fn tail_pool_size(&self, ranked_len: usize) -> usize {
        let scaled = (ranked_len as f64 * self.tail_frac.max(0.0)).floor() as usize;
        scaled.max(self.tail_k)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalSelection {
    pub signal: String,
    pub defined_count: usize,
    pub worst: Vec<String>,
    pub tail_pool_size: usize,
    pub tail: Vec<String>,
}

impl SignalSelection {
    pub fn picked(&self) -> BTreeSet<String> {
        self.worst.iter().chain(self.tail.iter()).cloned().collect()
    }

    pub fn summary(&self) -> SelectionSummary {
        SelectionSummary {
            signal: self.signal.clone(),
            defined_count: self.defined_count,
            worst_count: self.worst.len(),
            tail_pool_size: self.tail_pool_size,
            tail_count: self.tail.len(),
            picked_count: self.picked().len(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectionOutcome {
    pub selected: BTreeSet<String>,
    pub per_signal: Vec<SignalSelection>,
}

impl SelectionOutcome {
    pub fn summaries(&self) -> Vec<SelectionSummary> {
        self.per_signal.iter().map(SignalSelection::summary).collect()
    }
}

/// Records with a defined value for `signal`, worst first. Ties keep input order.
pub fn rank_by_badness<'a>(
    records: &'a [Record],
    signal: &str,
    badness: Badness,
) -> Vec<(&'a Record, f64)> {
    let mut ranked = records
        .iter()
        .filter_map(|record| record.metrics.get(signal).map(|value| (record, value)))
        .collect::<Vec<_>>();

    match badness {
        Badness::LargerIsWorse => ranked.sort_by(|left, right| right.1.total_cmp(&left.1)),
        Badness::SmallerIsWorse => ranked.sort_by(|left, right| left.1.total_cmp(&right.1)),
    }

    ranked
}

pub fn select_for_signal(
    records: &[Record],
    signal: &SelectionSignal,
    params: &SelectionParams,
) -> SignalSelection {
    let ranked = rank_by_badness(records, &signal.name, signal.badness);
    if ranked.is_empty() {
        return SignalSelection {
            signal: signal.name.clone(),
            ..SignalSelection::default()
        };
    }

    let worst = ranked
        .iter()
        .take(params.worst_k)
        .map(|(record, _)| record.id.clone())
        .collect::<Vec<_>>();

    let pool_size = params.tail_pool_size(ranked.len()).min(ranked.len());
    let pool = &ranked[..pool_size];
    let sample_size = params.tail_k.min(pool.len());

    let mut rng = StdRng::seed_from_u64(params.seed);
    let tail = index::sample(&mut rng, pool.len(), sample_size)
        .into_iter()
        .map(|position| pool[position].0.id.clone())
        .collect::<Vec<_>>();

    debug!(
        signal = %signal.name,
        ranked = ranked.len(),
        worst = worst.len(),
        tail_pool = pool_size,
        tail = tail.len(),
        "signal ranked"
    );

    SignalSelection {
        signal: signal.name.clone(),
        defined_count: ranked.len(),
        worst,
        tail_pool_size: pool_size,
        tail,
    }
}

/// Union of per-signal worst and tail sets over every registered signal that
/// exists as a column in `table`.
pub fn select_candidates(
    table: &RecordTable,
    registry: &MetricRegistry,
    params: &SelectionParams,
) -> SelectionOutcome {
    let mut outcome = SelectionOutcome::default();

    for signal in &registry.selection {
        if !table.has_column(&signal.name) {
            debug!(signal = %signal.name, "signal column absent; skipped");
            continue;
        }

        let selection = select_for_signal(&table.records, signal, params);
        let picked = selection.picked();
        info!(
            signal = %signal.name,
            defined = selection.defined_count,
            picked = picked.len(),
            "signal selection complete"
        );

        outcome.selected.extend(picked);
        outcome.per_signal.push(selection);
    }

    outcome
}

/// Records whose id was selected, in input order.
pub fn retain_selected(records: &[Record], selected: &BTreeSet<String>) -> Vec<Record> {
    records
        .iter()
        .filter(|record| selected.contains(&record.id))
        .cloned()
        .collect()
}
