pub mod automap;
pub mod changes;
pub mod cli;
pub mod ingest;
pub mod keys;
pub mod lock;
pub mod meta;
pub mod pipeline;
pub mod plan;
pub mod publicid;
pub mod store;
pub mod table;
pub mod version;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands, DimensionArg},
    lock::VersionLocks,
    pipeline::{ImportOrchestrator, PipelineFlavor},
    plan::MappedDimension,
    store::{Dataset, DatasetStore, DatasetVersion, VersionStatus},
    version::{MappingSummary, VersionNumber},
};

static LOGGER: OnceLock<()> = OnceLock::new();
static LOCKS: OnceLock<VersionLocks> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("dataset_managed", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

fn locks() -> &'static VersionLocks {
    LOCKS.get_or_init(VersionLocks::new)
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => handle_import(&args),
        Commands::Next(args) => handle_next(&args),
        Commands::Complete(args) => handle_complete(&args),
        Commands::Map(args) => handle_map(&args),
        Commands::Publish(args) => handle_publish(&args),
        Commands::Status(args) => handle_status(&args),
        Commands::Changes(args) => handle_changes(&args),
        Commands::Retry(args) => handle_retry(&args),
    }
}

fn handle_import(args: &cli::ImportArgs) -> Result<()> {
    let store = DatasetStore::open(&args.store)?;
    let mut dataset = store.create_dataset(&args.title)?;
    let version = store.create_version(
        dataset.id,
        VersionNumber::FIRST,
        &args.data,
        &args.meta,
    )?;
    dataset.latest_draft = Some(version.id);
    store.update_dataset(&dataset)?;
    info!(
        "Importing '{}' as version {} ({})",
        args.title, version.number, version.id
    );
    let orchestrator = ImportOrchestrator::new(&store, locks());
    orchestrator.run(version.id, PipelineFlavor::InitialVersion)?;
    let version = store.version(version.id)?;
    println!(
        "Imported '{}' version {} ({} rows), status {}",
        args.title,
        version.number,
        version.row_count.unwrap_or_default(),
        version.status
    );
    Ok(())
}

fn handle_next(args: &cli::NextArgs) -> Result<()> {
    let store = DatasetStore::open(&args.store)?;
    let dataset = require_dataset(&store, &args.title)?;
    let live_id = dataset
        .latest_live
        .ok_or_else(|| anyhow!("Dataset '{}' has no published version; publish one first", args.title))?;
    if dataset.latest_draft.is_some() {
        bail!("Dataset '{}' already has a draft in progress", args.title);
    }
    let live = store.version(live_id)?;
    // Provisional minor bump; the mapping stages recompute it from the flags.
    let provisional = live.number.next(&MappingSummary {
        locations_complete: true,
        filters_complete: true,
        ..Default::default()
    });
    let version = store.create_version(dataset.id, provisional, &args.data, &args.meta)?;
    let mut dataset = dataset;
    dataset.latest_draft = Some(version.id);
    store.update_dataset(&dataset)?;
    info!(
        "Starting next version of '{}' from {} ({})",
        args.title, live.number, version.id
    );
    let orchestrator = ImportOrchestrator::new(&store, locks());
    orchestrator.run(version.id, PipelineFlavor::NextVersionMapping)?;

    let version = store.version(version.id)?;
    let mapping = store.mapping(version.id)?;
    print_mapping_report(&mapping);
    println!(
        "Version {} of '{}' is awaiting manual mapping review (status {})",
        version.number, args.title, version.status
    );
    Ok(())
}

fn handle_complete(args: &cli::CompleteArgs) -> Result<()> {
    let store = DatasetStore::open(&args.store)?;
    let dataset = require_dataset(&store, &args.title)?;
    let version = require_reviewable_draft(&store, &dataset)?;
    let orchestrator = ImportOrchestrator::new(&store, locks());
    orchestrator.run(version.id, PipelineFlavor::NextVersionCompletion)?;

    let version = store.version(version.id)?;
    let changes = store.changes(version.id)?;
    println!(
        "Version {} of '{}' completed with {} change record(s)",
        version.number,
        args.title,
        changes.total()
    );
    table::print_table(
        &headers(&["category", "change", "detail"]),
        &changes.changelog_rows(),
    );
    Ok(())
}

fn handle_map(args: &cli::MapArgs) -> Result<()> {
    let store = DatasetStore::open(&args.store)?;
    let dataset = require_dataset(&store, &args.title)?;
    let mut version = require_reviewable_draft(&store, &dataset)?;
    let dimension = match args.dimension {
        DimensionArg::Location => MappedDimension::Locations,
        DimensionArg::Filter => MappedDimension::Filters,
    };

    let mut mapping = store.mapping(version.id)?;
    mapping.resolve_manual(
        dimension,
        &args.group,
        &args.source_key,
        args.candidate_key.as_deref(),
    )?;
    automap::refresh_completeness(&mut mapping);
    store.save_mapping(&mapping)?;

    // The bump rule re-runs on every mapping edit; the draft number must
    // never lag the flags.
    let source = store.version(mapping.source_version)?;
    version.number = source.number.next(&mapping.summary());
    store.update_version(&version)?;

    println!(
        "Recorded {} mapping for '{}'; locations complete: {}, filters complete: {}, next version {}",
        dimension, args.source_key, mapping.locations_complete, mapping.filters_complete,
        version.number
    );
    Ok(())
}

fn handle_publish(args: &cli::PublishArgs) -> Result<()> {
    let store = DatasetStore::open(&args.store)?;
    let mut dataset = require_dataset(&store, &args.title)?;
    let draft_id = dataset
        .latest_draft
        .ok_or_else(|| anyhow!("Dataset '{}' has no draft to publish", args.title))?;
    let mut draft = store.version(draft_id)?;
    if draft.status != VersionStatus::Draft {
        bail!(
            "Version {} is {}, not a publishable draft",
            draft.number,
            draft.status
        );
    }

    if let Some(live_id) = dataset.latest_live {
        let mut live = store.version(live_id)?;
        live.status = VersionStatus::Deprecated;
        store.update_version(&live)?;
    }
    draft.status = VersionStatus::Published;
    store.update_version(&draft)?;
    dataset.latest_live = Some(draft.id);
    dataset.latest_draft = None;
    store.update_dataset(&dataset)?;
    println!("Published '{}' version {}", args.title, draft.number);
    Ok(())
}

fn handle_status(args: &cli::StatusArgs) -> Result<()> {
    let store = DatasetStore::open(&args.store)?;
    let datasets = match &args.title {
        Some(title) => vec![require_dataset(&store, title)?],
        None => store.list_datasets()?,
    };

    let mut rows = Vec::new();
    for dataset in &datasets {
        for version in store.versions_for(dataset.id)? {
            let run_cell = match store.runs(version.id)?.last() {
                Some(run) => format!(
                    "{} {} ({})",
                    run.flavor,
                    run.stage,
                    run.outcome.map(|o| o.as_str()).unwrap_or("running")
                ),
                None => "-".to_string(),
            };
            rows.push(vec![
                dataset.title.clone(),
                version.number.to_string(),
                version.status.to_string(),
                version
                    .row_count
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                run_cell,
            ]);
        }
    }
    table::print_table(
        &headers(&["dataset", "version", "status", "rows", "last run"]),
        &rows,
    );
    Ok(())
}

fn handle_changes(args: &cli::ChangesArgs) -> Result<()> {
    let store = DatasetStore::open(&args.store)?;
    let dataset = require_dataset(&store, &args.title)?;
    let version = match &args.version {
        Some(raw) => {
            let number: VersionNumber = raw.parse()?;
            store
                .versions_for(dataset.id)?
                .into_iter()
                .find(|v| v.number == number)
                .ok_or_else(|| {
                    anyhow!("Dataset '{}' has no version {number}", args.title)
                })?
        }
        None => {
            let draft_id = dataset
                .latest_draft
                .ok_or_else(|| anyhow!("Dataset '{}' has no draft version", args.title))?;
            store.version(draft_id)?
        }
    };
    let changes = store
        .changes(version.id)
        .with_context(|| format!("No changes computed yet for version {}", version.number))?;
    println!(
        "Changes for '{}' version {} ({} record(s)):",
        args.title,
        version.number,
        changes.total()
    );
    table::print_table(
        &headers(&["category", "change", "detail"]),
        &changes.changelog_rows(),
    );
    Ok(())
}

fn handle_retry(args: &cli::RetryArgs) -> Result<()> {
    let store = DatasetStore::open(&args.store)?;
    let dataset = require_dataset(&store, &args.title)?;
    let failed = store
        .versions_for(dataset.id)?
        .into_iter()
        .find(|v| v.status == VersionStatus::Failed)
        .ok_or_else(|| anyhow!("Dataset '{}' has no failed version", args.title))?;
    let last_run = store
        .runs(failed.id)?
        .last()
        .cloned()
        .ok_or_else(|| anyhow!("Version {} has no import runs", failed.number))?;

    let mut version = failed;
    version.status = VersionStatus::Processing;
    store.update_version(&version)?;
    info!(
        "Retrying {} pipeline for '{}' version {}",
        last_run.flavor, args.title, version.number
    );
    let orchestrator = ImportOrchestrator::new(&store, locks());
    let run = orchestrator.run(version.id, last_run.flavor)?;
    println!(
        "Retried '{}' version {} with run {}; final stage {}",
        args.title, version.number, run.instance_id, run.stage
    );
    Ok(())
}

fn require_dataset(store: &DatasetStore, title: &str) -> Result<Dataset> {
    store
        .find_dataset_by_title(title)?
        .ok_or_else(|| anyhow!("No dataset titled '{title}'"))
}

/// The draft a reviewer may act on: it exists and is awaiting review.
fn require_reviewable_draft(store: &DatasetStore, dataset: &Dataset) -> Result<DatasetVersion> {
    let draft_id = dataset
        .latest_draft
        .ok_or_else(|| anyhow!("Dataset '{}' has no draft version", dataset.title))?;
    let version = store.version(draft_id)?;
    if version.status != VersionStatus::Mapping {
        bail!(
            "Version {} is {}, not awaiting mapping review",
            version.number,
            version.status
        );
    }
    Ok(version)
}

fn print_mapping_report(mapping: &plan::VersionMapping) {
    let mut rows = Vec::new();
    for (dimension, plan) in [("location", &mapping.locations), ("filter", &mapping.filters)] {
        for (group_key, group) in &plan.groups {
            for (source_key, entry) in &group.mappings {
                rows.push(vec![
                    dimension.to_string(),
                    group_key.clone(),
                    source_key.clone(),
                    entry.resolution.to_string(),
                    entry.candidate_key.clone().unwrap_or_else(|| "-".to_string()),
                ]);
            }
            if group.mappings.is_empty() {
                rows.push(vec![
                    dimension.to_string(),
                    group_key.clone(),
                    "-".to_string(),
                    "new group".to_string(),
                    format!("{} candidate(s)", group.candidates.len()),
                ]);
            }
        }
    }
    table::print_table(
        &headers(&["dimension", "group", "source", "resolution", "candidate"]),
        &rows,
    );
}

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
