use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::annotation::{AnnotationStatus, merge_annotations};
use crate::cli::{BuildArgs, OutputMode};
use crate::fusion::apply_labels;
use crate::metrics::{
    AttentionProvider, ChrfProvider, CometScoresProvider, MetricProvider, NgramRepetitionProvider,
    RepeatedTargetProvider, attach_metrics,
};
use crate::model::{BuildParams, BuildPaths, BuildRunManifest, LabelCounts, RecordTable};
use crate::registry::{FusionThresholds, MetricRegistry};
use crate::selection::{SelectionOutcome, SelectionParams, retain_selected, select_candidates};
use crate::table::{read_records, write_records};
use crate::util::{
    default_manifest_path, now_utc_string, sha256_file, utc_compact_string, write_json_pretty,
};

pub fn run(args: BuildArgs) -> Result<()> {
    let started_at = now_utc_string();
    let run_id = format!("build-{}", utc_compact_string(Utc::now()));
    let manifest_path = args
        .manifest_path
        .clone()
        .unwrap_or_else(|| default_manifest_path(&args.out));

    info!(parsed = %args.parsed.display(), run_id = %run_id, "starting build");

    let thresholds = fusion_thresholds(&args);
    let registry = MetricRegistry::load(args.registry_path.as_deref(), thresholds)?;
    let params = selection_params(&args);
    let parsed_sha256 = sha256_file(&args.parsed)?;
    let table = read_records(&args.parsed)?;
    let record_count = table.len();

    let mut warnings = Vec::new();
    check_comet_args(&args, &mut warnings);
    let providers = build_providers(&args);
    let outcome = run_pipeline(
        table,
        &providers,
        args.annot.as_deref(),
        &registry,
        &params,
        args.output_mode,
        &mut warnings,
    );

    let status = if outcome.table.is_empty() {
        warn!(
            records = record_count,
            "no record was selected by any signal; output is empty"
        );
        warnings.push("selection is empty: no signal contributed any record".to_string());
        "empty"
    } else {
        "completed"
    };

    write_records(
        &args.out,
        &outcome.table,
        args.output_mode == OutputMode::Labeled,
    )?;
    info!(
        path = %args.out.display(),
        selected = outcome.table.len(),
        records = record_count,
        "wrote hallucination dataset"
    );

    let manifest = BuildRunManifest {
        manifest_version: 1,
        run_id,
        status: status.to_string(),
        started_at,
        updated_at: now_utc_string(),
        paths: BuildPaths {
            parsed_path: args.parsed.display().to_string(),
            parsed_sha256,
            out_path: args.out.display().to_string(),
            annot_path: args.annot.as_ref().map(|path| path.display().to_string()),
            registry_path: args
                .registry_path
                .as_ref()
                .map(|path| path.display().to_string()),
        },
        params: BuildParams {
            worst_k: params.worst_k,
            tail_frac: params.tail_frac,
            tail_k: params.tail_k,
            seed: params.seed,
            tng_n: args.tng_n,
            tng_thresh: args.tng_thresh,
            seqlog_thresh: args.seqlog_thresh,
            comet_thresh: args.comet_thresh,
            chrf_thresh: args.chrf_thresh,
            compute_chrf: args.compute_chrf,
            comet_model: args.comet_model.clone(),
            output_mode: args.output_mode.as_str().to_string(),
        },
        record_count,
        metric_columns: outcome.table.metric_columns.clone(),
        annotation_status: outcome.annotation.describe(),
        selections: outcome.selection.summaries(),
        selected_count: outcome.table.len(),
        labels: outcome.labels,
        warnings,
    };
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), status, "wrote build manifest");

    Ok(())
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub table: RecordTable,
    pub selection: SelectionOutcome,
    pub annotation: AnnotationStatus,
    pub labels: Option<LabelCounts>,
}

/// Metrics, annotation merge, selection and labeling over an in-memory table.
/// Every recoverable problem is appended to `warnings`.
pub fn run_pipeline(
    mut table: RecordTable,
    providers: &[Box<dyn MetricProvider>],
    annot: Option<&Path>,
    registry: &MetricRegistry,
    params: &SelectionParams,
    output_mode: OutputMode,
    warnings: &mut Vec<String>,
) -> PipelineOutcome {
    attach_metrics(&mut table, providers, warnings);
    let annotation = merge_annotations(&mut table.records, annot, warnings);

    let selection = select_candidates(&table, registry, params);
    let mut selected = RecordTable {
        records: retain_selected(&table.records, &selection.selected),
        metric_columns: table.metric_columns,
        text_columns: table.text_columns,
    };
    info!(
        selected = selected.len(),
        signals = selection.per_signal.len(),
        "selection complete (after dedup)"
    );

    let labels = match output_mode {
        OutputMode::Labeled => {
            let counts = apply_labels(&mut selected.records, &registry.rules);
            info!(
                human = counts.human_labeled,
                rule = counts.rule_labeled,
                positive = counts.positive,
                "labels assigned"
            );
            Some(counts)
        }
        OutputMode::SelectionOnly => None,
    };

    PipelineOutcome {
        table: selected,
        selection,
        annotation,
        labels,
    }
}

fn build_providers(args: &BuildArgs) -> Vec<Box<dyn MetricProvider>> {
    let mut providers: Vec<Box<dyn MetricProvider>> = vec![
        Box::new(NgramRepetitionProvider {
            n: args.tng_n,
            threshold: args.tng_thresh,
        }),
        Box::new(RepeatedTargetProvider),
        Box::new(ChrfProvider {
            enabled: args.compute_chrf,
        }),
        Box::new(CometScoresProvider {
            scores_path: args.comet_scores.clone(),
            model: args.comet_model.clone(),
        }),
    ];

    if let Some(path) = &args.attn {
        providers.push(Box::new(AttentionProvider {
            path: path.clone(),
            eos_index: args.attn_eos_index,
            ignore_threshold: args.attn_ign_threshold,
        }));
    }

    providers
}

fn check_comet_args(args: &BuildArgs, warnings: &mut Vec<String>) {
    if let (Some(model), None) = (&args.comet_model, &args.comet_scores) {
        warn!(model = %model, "--comet-model has no effect without --comet-scores");
        warnings.push(format!(
            "comet model {model} ignored: no --comet-scores file was given"
        ));
    }
}

fn fusion_thresholds(args: &BuildArgs) -> FusionThresholds {
    FusionThresholds {
        seq_logprob: args.seqlog_thresh,
        tng_count: args.tng_thresh,
        comet: args.comet_thresh,
        chrf2: args.chrf_thresh,
    }
}

fn selection_params(args: &BuildArgs) -> SelectionParams {
    SelectionParams {
        worst_k: args.worst_k,
        tail_frac: args.tail_frac,
        tail_k: args.tail_k,
        seed: args.seed,
    }
}
