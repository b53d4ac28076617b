//! File-backed document store for datasets, versions, runs, mappings, and
//! change sets.
//!
//! Stand-in for the relational persistence layer: every aggregate is one
//! pretty-printed JSON document under the store root. Dataset pointers to
//! the latest live and draft versions are plain ids written explicitly,
//! never traversed as an object graph.

use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    changes::ChangeSet,
    meta::DatasetVersionMeta,
    pipeline::ImportRun,
    plan::VersionMapping,
    publicid,
    version::VersionNumber,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionStatus {
    Processing,
    Mapping,
    Draft,
    Finalising,
    Published,
    Deprecated,
    Withdrawn,
    Failed,
    Cancelled,
}

impl VersionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VersionStatus::Processing => "processing",
            VersionStatus::Mapping => "mapping",
            VersionStatus::Draft => "draft",
            VersionStatus::Finalising => "finalising",
            VersionStatus::Published => "published",
            VersionStatus::Deprecated => "deprecated",
            VersionStatus::Withdrawn => "withdrawn",
            VersionStatus::Failed => "failed",
            VersionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub title: String,
    /// Latest published version, if any. At most one at a time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_live: Option<Uuid>,
    /// Latest in-progress version, if any. At most one at a time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_draft: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Summary of the data file written alongside a version once the
/// write-data-files stage has run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataManifest {
    pub row_count: u64,
    pub headers: Vec<String>,
    pub digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub number: VersionNumber,
    pub status: VersionStatus,
    /// Where the ingestion collaborator left the source extract; copied into
    /// the store by the first pipeline stage.
    pub source_data: PathBuf,
    pub source_meta: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DatasetVersionMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<DataManifest>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Catalog {
    datasets: Vec<Dataset>,
    /// Monotonic counter backing internal row ids across the whole store,
    /// so fresh public ids derived from them can never collide.
    next_internal_id: u64,
    /// Which public-id encoding minted this store's identifiers. A store
    /// written under a different encoding must not be silently reused.
    public_id_encoding: u32,
}

#[derive(Debug)]
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    pub fn open(root: &Path) -> Result<DatasetStore> {
        for dir in ["versions", "runs", "mappings", "changes", "files"] {
            fs::create_dir_all(root.join(dir))
                .with_context(|| format!("Creating store directory {:?}", root.join(dir)))?;
        }
        let store = DatasetStore {
            root: root.to_path_buf(),
        };
        if store.catalog_path().exists() {
            let catalog = store.catalog()?;
            if catalog.public_id_encoding != publicid::ENCODING_VERSION {
                bail!(
                    "Store at {root:?} uses public-id encoding {}, expected {}",
                    catalog.public_id_encoding,
                    publicid::ENCODING_VERSION
                );
            }
        } else {
            store.save_catalog(&Catalog {
                datasets: Vec::new(),
                next_internal_id: 1,
                public_id_encoding: publicid::ENCODING_VERSION,
            })?;
        }
        Ok(store)
    }

    fn catalog_path(&self) -> PathBuf {
        self.root.join("datasets.json")
    }

    fn catalog(&self) -> Result<Catalog> {
        read_json(&self.catalog_path())
    }

    fn save_catalog(&self, catalog: &Catalog) -> Result<()> {
        write_json(&self.catalog_path(), catalog)
    }

    pub fn create_dataset(&self, title: &str) -> Result<Dataset> {
        let mut catalog = self.catalog()?;
        if catalog.datasets.iter().any(|d| d.title == title) {
            bail!("A dataset titled '{title}' already exists");
        }
        let dataset = Dataset {
            id: Uuid::new_v4(),
            title: title.to_string(),
            latest_live: None,
            latest_draft: None,
            created_at: Utc::now(),
        };
        catalog.datasets.push(dataset.clone());
        self.save_catalog(&catalog)?;
        Ok(dataset)
    }

    pub fn dataset(&self, id: Uuid) -> Result<Dataset> {
        self.catalog()?
            .datasets
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| anyhow!("No dataset with id {id}"))
    }

    pub fn find_dataset_by_title(&self, title: &str) -> Result<Option<Dataset>> {
        Ok(self
            .catalog()?
            .datasets
            .into_iter()
            .find(|d| d.title == title))
    }

    pub fn list_datasets(&self) -> Result<Vec<Dataset>> {
        Ok(self.catalog()?.datasets)
    }

    /// Rewrites one dataset record, including its live/draft pointers. The
    /// pointer update is always an explicit write through here.
    pub fn update_dataset(&self, dataset: &Dataset) -> Result<()> {
        let mut catalog = self.catalog()?;
        let slot = catalog
            .datasets
            .iter_mut()
            .find(|d| d.id == dataset.id)
            .ok_or_else(|| anyhow!("No dataset with id {}", dataset.id))?;
        *slot = dataset.clone();
        self.save_catalog(&catalog)
    }

    /// Hands out a contiguous block of internal ids and returns its first id.
    pub fn allocate_internal_ids(&self, count: u64) -> Result<u64> {
        let mut catalog = self.catalog()?;
        let start = catalog.next_internal_id;
        catalog.next_internal_id = start
            .checked_add(count)
            .ok_or_else(|| anyhow!("Internal id space exhausted"))?;
        self.save_catalog(&catalog)?;
        Ok(start)
    }

    fn version_path(&self, id: Uuid) -> PathBuf {
        self.root.join("versions").join(format!("{id}.json"))
    }

    pub fn create_version(
        &self,
        dataset_id: Uuid,
        number: VersionNumber,
        source_data: &Path,
        source_meta: &Path,
    ) -> Result<DatasetVersion> {
        let version = DatasetVersion {
            id: Uuid::new_v4(),
            dataset_id,
            number,
            status: VersionStatus::Processing,
            source_data: source_data.to_path_buf(),
            source_meta: source_meta.to_path_buf(),
            row_count: None,
            meta: None,
            manifest: None,
            created_at: Utc::now(),
        };
        self.update_version(&version)?;
        Ok(version)
    }

    pub fn version(&self, id: Uuid) -> Result<DatasetVersion> {
        read_json(&self.version_path(id))
            .with_context(|| format!("Loading dataset version {id}"))
    }

    pub fn update_version(&self, version: &DatasetVersion) -> Result<()> {
        write_json(&self.version_path(version.id), version)
    }

    pub fn versions_for(&self, dataset_id: Uuid) -> Result<Vec<DatasetVersion>> {
        let dir = self.root.join("versions");
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("Reading {dir:?}"))? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let version: DatasetVersion = read_json(&path)?;
                if version.dataset_id == dataset_id {
                    versions.push(version);
                }
            }
        }
        versions.sort_by_key(|v| (v.number, v.created_at));
        Ok(versions)
    }

    fn runs_path(&self, version_id: Uuid) -> PathBuf {
        self.root.join("runs").join(format!("{version_id}.json"))
    }

    /// Full import-run history for a version, oldest first. Failed runs are
    /// retained as diagnostic breadcrumbs.
    pub fn runs(&self, version_id: Uuid) -> Result<Vec<ImportRun>> {
        let path = self.runs_path(version_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    pub fn save_runs(&self, version_id: Uuid, runs: &[ImportRun]) -> Result<()> {
        write_json(&self.runs_path(version_id), &runs)
    }

    /// Upserts one run into the version's history by instance id.
    pub fn save_run(&self, run: &ImportRun) -> Result<()> {
        let mut runs = self.runs(run.version_id)?;
        match runs.iter_mut().find(|r| r.instance_id == run.instance_id) {
            Some(slot) => *slot = run.clone(),
            None => runs.push(run.clone()),
        }
        self.save_runs(run.version_id, &runs)
    }

    fn mapping_path(&self, target_version_id: Uuid) -> PathBuf {
        self.root
            .join("mappings")
            .join(format!("{target_version_id}.json"))
    }

    pub fn save_mapping(&self, mapping: &VersionMapping) -> Result<()> {
        write_json(&self.mapping_path(mapping.target_version), mapping)
    }

    pub fn mapping(&self, target_version_id: Uuid) -> Result<VersionMapping> {
        self.try_mapping(target_version_id)?
            .ok_or_else(|| anyhow!("No mapping exists for version {target_version_id}"))
    }

    pub fn try_mapping(&self, target_version_id: Uuid) -> Result<Option<VersionMapping>> {
        let path = self.mapping_path(target_version_id);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn changes_path(&self, version_id: Uuid) -> PathBuf {
        self.root.join("changes").join(format!("{version_id}.json"))
    }

    pub fn save_changes(&self, changes: &ChangeSet) -> Result<()> {
        write_json(&self.changes_path(changes.version_id), changes)
    }

    pub fn changes(&self, version_id: Uuid) -> Result<ChangeSet> {
        read_json(&self.changes_path(version_id))
            .with_context(|| format!("Loading changes for version {version_id}"))
    }

    /// Per-version directory holding the copied source files.
    pub fn files_dir(&self, version_id: Uuid) -> Result<PathBuf> {
        let dir = self.root.join("files").join(version_id.to_string());
        fs::create_dir_all(&dir).with_context(|| format!("Creating {dir:?}"))?;
        Ok(dir)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Creating {path:?}"))?;
    serde_json::to_writer_pretty(file, value)
        .with_context(|| format!("Writing JSON to {path:?}"))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Opening {path:?}"))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).with_context(|| format!("Parsing JSON in {path:?}"))
}
