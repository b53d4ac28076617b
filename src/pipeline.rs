//! Import pipeline orchestration.
//!
//! A dataset version moves through a fixed, linear sequence of stages per
//! pipeline flavor. The orchestrator persists the stage marker before each
//! activity runs, executes activities under the version's lock, and routes
//! every activity error through one failure handler that marks the version
//! failed without touching the marker, so the failing stage stays visible.
//! Activities are idempotent upserts: a crashed run resumed under a new
//! worker re-executes its marker stage safely.

use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result, anyhow, ensure};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    automap,
    changes::ChangeSet,
    ingest, keys,
    lock::VersionLocks,
    meta::{DatasetVersionMeta, ensure_finalized},
    plan::VersionMapping,
    publicid,
    store::{DataManifest, DatasetStore, DatasetVersion, VersionStatus},
};

/// The stages a version can pass through, in pipeline order.
///
/// The declared order is a public contract: consumers decide "has this stage
/// already run" by ordinal comparison, so new stages may only be appended or
/// inserted with a documented ordering change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Stage {
    CopyCsvFiles,
    ImportMetadata,
    ImportData,
    WriteDataFiles,
    CreateMappings,
    ApplyAutoMappings,
    CompleteMappingProcessing,
    CreateChanges,
    Complete,
}

impl Stage {
    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::CopyCsvFiles => "copy-csv-files",
            Stage::ImportMetadata => "import-metadata",
            Stage::ImportData => "import-data",
            Stage::WriteDataFiles => "write-data-files",
            Stage::CreateMappings => "create-mappings",
            Stage::ApplyAutoMappings => "apply-auto-mappings",
            Stage::CompleteMappingProcessing => "complete-mapping-processing",
            Stage::CreateChanges => "create-changes",
            Stage::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineFlavor {
    /// First version of a dataset: full import, no mapping.
    InitialVersion,
    /// Next version, first half: import and map, then suspend for review.
    NextVersionMapping,
    /// Next version, second half: finalize, compute changes, complete.
    NextVersionCompletion,
}

impl PipelineFlavor {
    pub fn stages(self) -> &'static [Stage] {
        match self {
            PipelineFlavor::InitialVersion => &[
                Stage::CopyCsvFiles,
                Stage::ImportMetadata,
                Stage::ImportData,
                Stage::WriteDataFiles,
                Stage::Complete,
            ],
            PipelineFlavor::NextVersionMapping => &[
                Stage::CopyCsvFiles,
                Stage::CreateMappings,
                Stage::ApplyAutoMappings,
                Stage::CompleteMappingProcessing,
            ],
            PipelineFlavor::NextVersionCompletion => {
                &[Stage::CreateChanges, Stage::Complete]
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineFlavor::InitialVersion => "initial-version",
            PipelineFlavor::NextVersionMapping => "next-version-mapping",
            PipelineFlavor::NextVersionCompletion => "next-version-completion",
        }
    }
}

impl fmt::Display for PipelineFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an import run ended. Absent while the run is still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Failed => "failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

/// One execution attempt of a pipeline for one version. Re-running after a
/// failure mints a fresh instance id; the failed run keeps its final stage
/// as a diagnostic breadcrumb.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRun {
    pub instance_id: Uuid,
    pub version_id: Uuid,
    pub flavor: PipelineFlavor,
    /// Last stage this run started. Stages before it have completed.
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportRun {
    pub fn start(version_id: Uuid, flavor: PipelineFlavor) -> ImportRun {
        ImportRun {
            instance_id: Uuid::new_v4(),
            version_id,
            flavor,
            stage: flavor.stages()[0],
            outcome: None,
            completed_at: None,
        }
    }

    /// Whether `stage` finished in this run, by position within the run's
    /// own flavor. Stages the flavor never executes report false; the
    /// marker stage itself only counts once the whole run completed, since
    /// a failed or cancelled run stopped inside (or before) it.
    pub fn has_run(&self, stage: Stage) -> bool {
        let stages = self.flavor.stages();
        let Some(position) = stages.iter().position(|s| *s == stage) else {
            return false;
        };
        let marker = stages
            .iter()
            .position(|s| *s == self.stage)
            .unwrap_or_default();
        position < marker || (position == marker && self.outcome == Some(RunOutcome::Completed))
    }

    fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = Some(outcome);
        self.completed_at = Some(Utc::now());
    }
}

/// An activity error, tagged with the stage it was raised in.
#[derive(Debug, Error)]
#[error("Stage {stage} failed")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

pub struct ImportOrchestrator<'a> {
    store: &'a DatasetStore,
    locks: &'a VersionLocks,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> ImportOrchestrator<'a> {
    pub fn new(store: &'a DatasetStore, locks: &'a VersionLocks) -> Self {
        ImportOrchestrator {
            store,
            locks,
            cancel: None,
        }
    }

    /// Installs a cancellation flag, checked only at stage boundaries: a
    /// stage once started runs to completion or failure.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Drives a version through the given flavor: resumes the active run if
    /// one exists, otherwise mints a fresh instance, then executes the
    /// remaining stages in order.
    pub fn run(&self, version_id: Uuid, flavor: PipelineFlavor) -> Result<ImportRun> {
        let mut run = self.resume_or_start(version_id, flavor)?;
        let stages = flavor.stages();
        let start = stages
            .iter()
            .position(|s| *s == run.stage)
            .unwrap_or_default();

        for &stage in &stages[start..] {
            if self.cancelled() {
                info!("Import run {} cancelled before stage {stage}", run.instance_id);
                self.set_status(version_id, VersionStatus::Cancelled)?;
                run.finish(RunOutcome::Cancelled);
                self.store.save_run(&run)?;
                return Ok(run);
            }

            run.stage = stage;
            self.store.save_run(&run)?;

            let handle = self.locks.handle(version_id);
            let _guard = handle.lock_scoped();
            info!(
                "Import run {} ({}) stage {stage}",
                run.instance_id, run.flavor
            );
            if let Err(source) = self.run_stage(&run, stage) {
                let failure = StageFailure {
                    stage,
                    source: source.into(),
                };
                return Err(self.fail(&mut run, failure));
            }
        }

        run.finish(RunOutcome::Completed);
        self.store.save_run(&run)?;
        Ok(run)
    }

    fn resume_or_start(&self, version_id: Uuid, flavor: PipelineFlavor) -> Result<ImportRun> {
        let runs = self.store.runs(version_id)?;
        if let Some(active) = runs.last().filter(|r| r.completed_at.is_none()) {
            ensure!(
                active.flavor == flavor,
                "Version {version_id} has an active {} run; cannot start {flavor}",
                active.flavor
            );
            info!(
                "Resuming import run {} at stage {}",
                active.instance_id, active.stage
            );
            return Ok(active.clone());
        }
        let run = ImportRun::start(version_id, flavor);
        self.store.save_run(&run)?;
        Ok(run)
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// The single failure path for every stage: mark the version failed,
    /// stamp the run, leave the stage marker where the failure happened.
    /// Bookkeeping errors here are logged rather than allowed to mask the
    /// original failure.
    fn fail(&self, run: &mut ImportRun, failure: StageFailure) -> anyhow::Error {
        warn!(
            "Import run {} failed at stage {}: {}",
            run.instance_id, failure.stage, failure.source
        );
        if let Err(err) = self.set_status(run.version_id, VersionStatus::Failed) {
            warn!("Could not mark version {} failed: {err:#}", run.version_id);
        }
        run.finish(RunOutcome::Failed);
        if let Err(err) = self.store.save_run(run) {
            warn!("Could not stamp failed run {}: {err:#}", run.instance_id);
        }
        anyhow::Error::new(failure)
    }

    fn set_status(&self, version_id: Uuid, status: VersionStatus) -> Result<()> {
        let mut version = self.store.version(version_id)?;
        version.status = status;
        self.store.update_version(&version)
    }

    fn run_stage(&self, run: &ImportRun, stage: Stage) -> Result<()> {
        match stage {
            Stage::CopyCsvFiles => self.copy_csv_files(run),
            Stage::ImportMetadata => self.import_metadata(run),
            Stage::ImportData => self.import_data(run),
            Stage::WriteDataFiles => self.write_data_files(run),
            Stage::CreateMappings => self.create_mappings(run),
            Stage::ApplyAutoMappings => self.apply_auto_mappings(run),
            Stage::CompleteMappingProcessing => self.complete_mapping_processing(run),
            Stage::CreateChanges => self.create_changes(run),
            Stage::Complete => self.complete(run),
        }
    }

    fn data_path(&self, version_id: Uuid) -> Result<PathBuf> {
        Ok(self.store.files_dir(version_id)?.join("data.csv"))
    }

    fn meta_path(&self, version_id: Uuid) -> Result<PathBuf> {
        Ok(self.store.files_dir(version_id)?.join("metadata.json"))
    }

    fn copy_csv_files(&self, run: &ImportRun) -> Result<()> {
        let version = self.store.version(run.version_id)?;
        copy_if_changed(&version.source_data, &self.data_path(version.id)?)?;
        copy_if_changed(&version.source_meta, &self.meta_path(version.id)?)?;
        Ok(())
    }

    fn import_metadata(&self, run: &ImportRun) -> Result<()> {
        let mut version = self.store.version(run.version_id)?;
        if version.meta.is_some() {
            debug!("Metadata already imported for version {}", version.id);
            return Ok(());
        }
        let extract = ingest::load_extract(&self.meta_path(version.id)?)?;
        let first_id = self.store.allocate_internal_ids(extract.item_count())?;
        let mut meta = ingest::build_meta(&extract, first_id)?;
        // Initial version: every item is new, so every public id is fresh.
        finalize_public_ids(&mut meta, &HashMap::new());
        meta.check_public_ids_unique()?;
        info!(
            "Imported metadata for version {}: {} filter(s), {} level(s), {} indicator(s)",
            version.id,
            meta.filters.len(),
            meta.locations.len(),
            meta.indicators.len()
        );
        version.meta = Some(meta);
        self.store.update_version(&version)
    }

    fn import_data(&self, run: &ImportRun) -> Result<()> {
        let mut version = self.store.version(run.version_id)?;
        let meta = version
            .meta
            .as_ref()
            .ok_or_else(|| anyhow!("Version {} has no imported metadata", version.id))?;
        let (_, rows) = ingest::validate_data_file(&self.data_path(version.id)?, meta)?;
        version.row_count = Some(rows);
        self.store.update_version(&version)
    }

    fn write_data_files(&self, run: &ImportRun) -> Result<()> {
        let mut version = self.store.version(run.version_id)?;
        let meta = version
            .meta
            .as_ref()
            .ok_or_else(|| anyhow!("Version {} has no imported metadata", version.id))?;
        let data_path = self.data_path(version.id)?;
        let (headers, rows) = ingest::validate_data_file(&data_path, meta)?;
        let manifest = DataManifest {
            row_count: rows,
            headers,
            digest: ingest::file_digest(&data_path)?,
        };
        let manifest_path = self.store.files_dir(version.id)?.join("data-manifest.json");
        let rendered = serde_json::to_string_pretty(&manifest)
            .context("Rendering data manifest")?;
        fs::write(&manifest_path, rendered)
            .with_context(|| format!("Writing {manifest_path:?}"))?;
        version.manifest = Some(manifest);
        self.store.update_version(&version)
    }

    fn create_mappings(&self, run: &ImportRun) -> Result<()> {
        let mut version = self.store.version(run.version_id)?;
        let source = self.source_version(&version)?;
        let source_meta = source
            .meta
            .as_ref()
            .ok_or_else(|| anyhow!("Source version {} has no metadata", source.id))?;
        ensure_finalized(source_meta, "source")?;

        if version.meta.is_none() {
            let extract = ingest::load_extract(&self.meta_path(version.id)?)?;
            let first_id = self.store.allocate_internal_ids(extract.item_count())?;
            version.meta = Some(ingest::build_meta(&extract, first_id)?);
            self.store.update_version(&version)?;
        }
        let target_meta = version
            .meta
            .as_ref()
            .ok_or_else(|| anyhow!("Version {} has no imported metadata", version.id))?;

        if self.store.try_mapping(version.id)?.is_none() {
            let mapping = VersionMapping::new(source.id, version.id, source_meta, target_meta);
            self.store.save_mapping(&mapping)?;
            info!(
                "Created mapping {} -> {} ({} location group(s), {} filter group(s))",
                source.number,
                version.number,
                mapping.locations.groups.len(),
                mapping.filters.groups.len()
            );
        }
        Ok(())
    }

    fn apply_auto_mappings(&self, run: &ImportRun) -> Result<()> {
        let mut mapping = self.store.mapping(run.version_id)?;
        automap::apply(&mut mapping);
        self.store.save_mapping(&mapping)?;
        self.recompute_version_number(run.version_id, &mapping)
    }

    fn complete_mapping_processing(&self, run: &ImportRun) -> Result<()> {
        self.set_status(run.version_id, VersionStatus::Mapping)?;
        info!(
            "Version {} is awaiting manual mapping review",
            run.version_id
        );
        Ok(())
    }

    fn create_changes(&self, run: &ImportRun) -> Result<()> {
        let mut version = self.store.version(run.version_id)?;
        version.status = VersionStatus::Finalising;
        self.store.update_version(&version)?;

        // Manual resolutions may have landed since auto-mapping ran, so the
        // flags and version number are re-derived before anything is final.
        let mut mapping = self.store.mapping(version.id)?;
        automap::refresh_completeness(&mut mapping);
        self.store.save_mapping(&mapping)?;
        self.recompute_version_number(version.id, &mapping)?;
        let mut version = self.store.version(version.id)?;

        let source = self.store.version(mapping.source_version)?;
        let source_meta = source
            .meta
            .as_ref()
            .ok_or_else(|| anyhow!("Source version {} has no metadata", source.id))?;
        ensure_finalized(source_meta, "source")?;
        let mut target_meta = version
            .meta
            .clone()
            .ok_or_else(|| anyhow!("Version {} has no imported metadata", version.id))?;

        let carried = carried_public_ids(source_meta, &target_meta, &mapping)?;
        finalize_public_ids(&mut target_meta, &carried);
        target_meta.check_public_ids_unique()?;

        let changes = ChangeSet::compute(source_meta, &target_meta, version.id)?;
        info!(
            "Computed {} change record(s) for version {}",
            changes.total(),
            version.id
        );
        self.store.save_changes(&changes)?;

        version.meta = Some(target_meta);
        self.store.update_version(&version)
    }

    fn complete(&self, run: &ImportRun) -> Result<()> {
        let mut version = self.store.version(run.version_id)?;
        version.status = VersionStatus::Draft;
        self.store.update_version(&version)?;

        let mut dataset = self.store.dataset(version.dataset_id)?;
        dataset.latest_draft = Some(version.id);
        self.store.update_dataset(&dataset)?;
        info!(
            "Version {} of '{}' is ready as draft {}",
            version.number, dataset.title, version.id
        );
        Ok(())
    }

    fn source_version(&self, version: &DatasetVersion) -> Result<DatasetVersion> {
        let dataset = self.store.dataset(version.dataset_id)?;
        let source_id = dataset
            .latest_live
            .ok_or_else(|| anyhow!("Dataset '{}' has no published version to map from", dataset.title))?;
        self.store.version(source_id)
    }

    fn recompute_version_number(&self, version_id: Uuid, mapping: &VersionMapping) -> Result<()> {
        let source = self.store.version(mapping.source_version)?;
        let mut version = self.store.version(version_id)?;
        let next = source.number.next(&mapping.summary());
        if version.number != next {
            debug!(
                "Version {} number recomputed: {} -> {next}",
                version_id, version.number
            );
            version.number = next;
            self.store.update_version(&version)?;
        }
        Ok(())
    }
}

/// Copies `source` to `dest` unless an identical copy is already there, so
/// a replayed copy stage neither duplicates work nor clobbers mid-read
/// files with the same bytes.
fn copy_if_changed(source: &Path, dest: &Path) -> Result<()> {
    if dest.exists() && ingest::file_digest(source)? == ingest::file_digest(dest)? {
        debug!("Skipping copy of {source:?}; {dest:?} is identical");
        return Ok(());
    }
    fs::copy(source, dest)
        .with_context(|| format!("Copying {source:?} to {dest:?}"))?;
    Ok(())
}

/// Collects the target-internal-id -> public-id assignments inherited from
/// the source version: structural matches for the single-level dimensions,
/// resolved mapping entries for location and filter options, and the level
/// set's identifier unconditionally.
fn carried_public_ids(
    source: &DatasetVersionMeta,
    target: &DatasetVersionMeta,
    mapping: &VersionMapping,
) -> Result<HashMap<u64, String>> {
    let mut carried = HashMap::new();
    let required = |public_id: &Option<String>, what: &str| -> Result<String> {
        public_id
            .clone()
            .ok_or_else(|| anyhow!("Source {what} has no public id"))
    };

    for target_filter in &target.filters {
        if let Some(source_filter) = source
            .filters
            .iter()
            .find(|f| keys::filter_group_key(f) == keys::filter_group_key(target_filter))
        {
            carried.insert(
                target_filter.id,
                required(&source_filter.public_id, "filter")?,
            );
        }
    }
    for target_level in &target.locations {
        if let Some(source_level) = source
            .locations
            .iter()
            .find(|l| keys::location_group_key(l) == keys::location_group_key(target_level))
        {
            carried.insert(
                target_level.id,
                required(&source_level.public_id, "location level")?,
            );
        }
    }
    for target_indicator in &target.indicators {
        if let Some(source_indicator) = source
            .indicators
            .iter()
            .find(|i| keys::indicator_key(i) == keys::indicator_key(target_indicator))
        {
            carried.insert(
                target_indicator.id,
                required(&source_indicator.public_id, "indicator")?,
            );
        }
    }
    for target_period in &target.time_periods {
        if let Some(source_period) = source
            .time_periods
            .iter()
            .find(|t| t.natural_key() == target_period.natural_key())
        {
            carried.insert(
                target_period.id,
                required(&source_period.public_id, "time period")?,
            );
        }
    }
    carried.insert(
        target.geographic_level_set.id,
        required(&source.geographic_level_set.public_id, "geographic level set")?,
    );

    for (plan, what) in [(&mapping.locations, "location"), (&mapping.filters, "filter")] {
        for (group_key, group) in &plan.groups {
            for entry in group.mappings.values() {
                if !entry.resolution.is_mapped() {
                    continue;
                }
                if let Some(candidate) = plan.resolved_candidate(group_key, entry) {
                    carried.insert(
                        candidate.id,
                        required(&entry.source.public_id, &format!("{what} option"))?,
                    );
                }
            }
        }
    }
    Ok(carried)
}

/// Assigns every item its final public id: the carried one when the item
/// was matched to a source item, otherwise a fresh code minted from the
/// internal id. Deterministic, so replaying the finalisation stage yields
/// byte-identical metadata.
fn finalize_public_ids(meta: &mut DatasetVersionMeta, carried: &HashMap<u64, String>) {
    let assign = |id: u64, public_id: &mut Option<String>| {
        *public_id = Some(
            carried
                .get(&id)
                .cloned()
                .unwrap_or_else(|| publicid::encode(id)),
        );
    };
    for filter in &mut meta.filters {
        assign(filter.id, &mut filter.public_id);
        for option in &mut filter.options {
            assign(option.id, &mut option.public_id);
        }
    }
    for level in &mut meta.locations {
        assign(level.id, &mut level.public_id);
        for option in &mut level.options {
            assign(option.id, &mut option.public_id);
        }
    }
    for indicator in &mut meta.indicators {
        assign(indicator.id, &mut indicator.public_id);
    }
    for period in &mut meta.time_periods {
        assign(period.id, &mut period.public_id);
    }
    assign(
        meta.geographic_level_set.id,
        &mut meta.geographic_level_set.public_id,
    );
}
