//! The ingestion collaborator boundary.
//!
//! Upstream extraction hands over two files per version: a JSON metadata
//! extract (dimension entities with no identifiers assigned) and the source
//! data CSV. This module owns parsing and validating the extract, turning it
//! into [`DatasetVersionMeta`] with internal ids assigned, and the row-level
//! validation the import-data stage performs against the CSV.

use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, Read},
    path::Path,
    sync::OnceLock,
};

use anyhow::{Context, Result, bail, ensure};
use heck::ToSnakeCase;
use log::debug;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::meta::{
    DatasetVersionMeta, FilterMeta, FilterOptionMeta, GeographicLevelSetMeta, IndicatorMeta,
    LocationLevelMeta, LocationOptionMeta, TimePeriodMeta,
};

/// Columns every source data file must carry alongside filter and indicator
/// columns.
pub const REQUIRED_COLUMNS: &[&str] = &["time_period", "time_identifier", "geographic_level"];

fn time_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(AY|CY|FY|TY|T[1-3]|M(1[0-2]|[1-9]))$").expect("valid pattern")
    })
}

fn period_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}(/\d{2})?$").expect("valid pattern"))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Extract {
    #[serde(default)]
    pub filters: Vec<ExtractFilter>,
    #[serde(default)]
    pub locations: Vec<ExtractLevel>,
    #[serde(default)]
    pub indicators: Vec<ExtractIndicator>,
    /// Explicit level-set override; defaults to the location level codes.
    #[serde(default)]
    pub geographic_levels: Vec<String>,
    #[serde(default)]
    pub time_periods: Vec<ExtractTimePeriod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractFilter {
    pub label: String,
    #[serde(default)]
    pub hint: Option<String>,
    /// Source column; derived from the label when omitted.
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractLevel {
    pub code: String,
    pub label: String,
    #[serde(default)]
    pub options: Vec<ExtractLocationOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractLocationOption {
    pub label: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub old_code: Option<String>,
    #[serde(default)]
    pub urn: Option<String>,
    #[serde(default)]
    pub ukprn: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractIndicator {
    pub label: String,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub decimal_places: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractTimePeriod {
    pub code: String,
    pub period: String,
}

impl Extract {
    /// Number of internal ids building this extract will consume.
    pub fn item_count(&self) -> u64 {
        let filter_items: usize = self.filters.iter().map(|f| 1 + f.options.len()).sum();
        let location_items: usize = self.locations.iter().map(|l| 1 + l.options.len()).sum();
        (filter_items + location_items + self.indicators.len() + self.time_periods.len() + 1)
            as u64
    }
}

pub fn load_extract(path: &Path) -> Result<Extract> {
    let file = File::open(path).with_context(|| format!("Opening extract {path:?}"))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).with_context(|| format!("Parsing extract {path:?}"))
}

/// Validates an extract and builds version metadata from it, assigning
/// internal ids sequentially from `first_id`. Public identifiers are left
/// unassigned; finalisation fills them in later.
pub fn build_meta(extract: &Extract, first_id: u64) -> Result<DatasetVersionMeta> {
    let mut next_id = first_id;
    let mut take_id = || {
        let id = next_id;
        next_id += 1;
        id
    };

    let mut filters = Vec::with_capacity(extract.filters.len());
    let mut filter_columns = HashSet::new();
    for raw in &extract.filters {
        ensure!(!raw.label.trim().is_empty(), "A filter has an empty label");
        let column = match &raw.column {
            Some(column) if !column.trim().is_empty() => column.trim().to_string(),
            _ => raw.label.to_snake_case(),
        };
        if !filter_columns.insert(column.clone()) {
            bail!("Duplicate filter column '{column}'");
        }
        let mut option_labels = HashSet::new();
        let filter_id = take_id();
        let mut options = Vec::with_capacity(raw.options.len());
        for label in &raw.options {
            ensure!(
                !label.trim().is_empty(),
                "Filter '{}' has an option with an empty label",
                raw.label
            );
            if !option_labels.insert(label.trim().to_string()) {
                bail!("Filter '{}' has duplicate option '{label}'", raw.label);
            }
            options.push(FilterOptionMeta {
                id: take_id(),
                public_id: None,
                label: label.trim().to_string(),
            });
        }
        filters.push(FilterMeta {
            id: filter_id,
            public_id: None,
            label: raw.label.trim().to_string(),
            hint: raw.hint.clone(),
            column,
            options,
        });
    }

    let mut locations = Vec::with_capacity(extract.locations.len());
    let mut level_codes = HashSet::new();
    for raw in &extract.locations {
        ensure!(!raw.code.trim().is_empty(), "A location level has an empty code");
        ensure!(
            !raw.label.trim().is_empty(),
            "Location level '{}' has an empty label",
            raw.code
        );
        if !level_codes.insert(raw.code.trim().to_string()) {
            bail!("Duplicate location level '{}'", raw.code);
        }
        let level_id = take_id();
        let mut options = Vec::with_capacity(raw.options.len());
        for option in &raw.options {
            ensure!(
                !option.label.trim().is_empty(),
                "Location level '{}' has an option with an empty label",
                raw.code
            );
            options.push(LocationOptionMeta {
                id: take_id(),
                public_id: None,
                label: option.label.trim().to_string(),
                code: option.code.clone(),
                old_code: option.old_code.clone(),
                urn: option.urn.clone(),
                ukprn: option.ukprn.clone(),
            });
        }
        locations.push(LocationLevelMeta {
            id: level_id,
            public_id: None,
            code: raw.code.trim().to_string(),
            label: raw.label.trim().to_string(),
            options,
        });
    }

    let mut indicators = Vec::with_capacity(extract.indicators.len());
    let mut indicator_columns = HashSet::new();
    for raw in &extract.indicators {
        ensure!(!raw.label.trim().is_empty(), "An indicator has an empty label");
        let column = match &raw.column {
            Some(column) if !column.trim().is_empty() => column.trim().to_string(),
            _ => raw.label.to_snake_case(),
        };
        if !indicator_columns.insert(column.clone()) {
            bail!("Duplicate indicator column '{column}'");
        }
        indicators.push(IndicatorMeta {
            id: take_id(),
            public_id: None,
            label: raw.label.trim().to_string(),
            column,
            unit: raw.unit.clone(),
            decimal_places: raw.decimal_places,
        });
    }

    let mut time_periods = Vec::with_capacity(extract.time_periods.len());
    let mut period_keys = HashSet::new();
    for raw in &extract.time_periods {
        ensure!(
            time_code_pattern().is_match(raw.code.trim()),
            "Unknown time identifier code '{}'",
            raw.code
        );
        ensure!(
            period_pattern().is_match(raw.period.trim()),
            "Time period '{}' must look like 2024 or 2024/25",
            raw.period
        );
        if !period_keys.insert((raw.code.trim().to_string(), raw.period.trim().to_string())) {
            bail!("Duplicate time period '{} {}'", raw.code, raw.period);
        }
        time_periods.push(TimePeriodMeta {
            id: take_id(),
            public_id: None,
            code: raw.code.trim().to_string(),
            period: raw.period.trim().to_string(),
        });
    }

    let mut levels: Vec<String> = if extract.geographic_levels.is_empty() {
        locations.iter().map(|l| l.code.clone()).collect()
    } else {
        extract
            .geographic_levels
            .iter()
            .map(|l| l.trim().to_string())
            .collect()
    };
    levels.sort();
    levels.dedup();
    for level in locations.iter().map(|l| &l.code) {
        ensure!(
            levels.contains(level),
            "Location level '{level}' is missing from the geographic level set"
        );
    }
    let geographic_level_set = GeographicLevelSetMeta {
        id: take_id(),
        public_id: None,
        levels,
    };

    Ok(DatasetVersionMeta {
        filters,
        locations,
        indicators,
        geographic_level_set,
        time_periods,
    })
}

/// Streams the data CSV, checking that every row has the header's field
/// count and that the columns the metadata references all exist. Returns the
/// headers and row count.
pub fn validate_data_file(path: &Path, meta: &DatasetVersionMeta) -> Result<(Vec<String>, u64)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Opening data file {path:?}"))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Reading headers of {path:?}"))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    for required in REQUIRED_COLUMNS {
        ensure!(
            headers.iter().any(|h| h == required),
            "Data file is missing required column '{required}'"
        );
    }
    for filter in &meta.filters {
        ensure!(
            headers.iter().any(|h| *h == filter.column),
            "Data file is missing filter column '{}'",
            filter.column
        );
    }
    for indicator in &meta.indicators {
        ensure!(
            headers.iter().any(|h| *h == indicator.column),
            "Data file is missing indicator column '{}'",
            indicator.column
        );
    }

    let mut record = csv::ByteRecord::new();
    let mut rows = 0u64;
    while reader
        .read_byte_record(&mut record)
        .with_context(|| format!("Reading row {} of {path:?}", rows + 1))?
    {
        rows += 1;
    }
    debug!("Validated {rows} row(s) in {path:?}");
    Ok((headers, rows))
}

/// SHA-256 of a file's bytes, hex encoded.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Opening {path:?}"))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("Reading {path:?}"))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_meta_derives_missing_columns_from_labels() {
        let extract = Extract {
            filters: vec![ExtractFilter {
                label: "School Type".to_string(),
                hint: None,
                column: None,
                options: vec!["Total".to_string()],
            }],
            ..Extract::default()
        };
        let meta = build_meta(&extract, 1).unwrap();
        assert_eq!(meta.filters[0].column, "school_type");
        assert_eq!(meta.filters[0].id, 1);
        assert_eq!(meta.filters[0].options[0].id, 2);
    }

    #[test]
    fn build_meta_rejects_duplicate_options() {
        let extract = Extract {
            filters: vec![ExtractFilter {
                label: "School Type".to_string(),
                hint: None,
                column: None,
                options: vec!["Total".to_string(), "Total".to_string()],
            }],
            ..Extract::default()
        };
        let err = build_meta(&extract, 1).unwrap_err();
        assert!(err.to_string().contains("duplicate option"));
    }

    #[test]
    fn build_meta_validates_time_periods() {
        let extract = Extract {
            time_periods: vec![ExtractTimePeriod {
                code: "XX".to_string(),
                period: "2024/25".to_string(),
            }],
            ..Extract::default()
        };
        assert!(build_meta(&extract, 1).is_err());

        let extract = Extract {
            time_periods: vec![ExtractTimePeriod {
                code: "AY".to_string(),
                period: "24-25".to_string(),
            }],
            ..Extract::default()
        };
        assert!(build_meta(&extract, 1).is_err());
    }

    #[test]
    fn level_set_defaults_to_location_levels() {
        let extract = Extract {
            locations: vec![ExtractLevel {
                code: "LA".to_string(),
                label: "Local authority".to_string(),
                options: Vec::new(),
            }],
            ..Extract::default()
        };
        let meta = build_meta(&extract, 1).unwrap();
        assert_eq!(meta.geographic_level_set.levels, vec!["LA"]);
    }
}
