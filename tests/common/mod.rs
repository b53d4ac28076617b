#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns the store root used by tests driving the pipeline.
    pub fn store_path(&self) -> PathBuf {
        self.temp_dir.path().join("store")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// A data CSV matching [`extract_v1`]: one filter column, one indicator.
pub fn data_csv_v1() -> &'static str {
    "time_period,time_identifier,geographic_level,la_code,characteristic,enrolments\n\
     2024/25,AY,LA,E100,Total,100\n\
     2024/25,AY,LA,E100,FSM,40\n"
}

/// First-version metadata extract: filter `Characteristic` with options
/// Total and FSM, level LA with one option, one indicator, one time period.
pub fn extract_v1() -> &'static str {
    r#"{
  "filters": [
    {
      "label": "Characteristic",
      "column": "characteristic",
      "options": ["Total", "FSM"]
    }
  ],
  "locations": [
    {
      "code": "LA",
      "label": "Local authority",
      "options": [{ "label": "Sheffield", "code": "E100" }]
    }
  ],
  "indicators": [
    { "label": "Enrolments", "column": "enrolments", "unit": null, "decimal_places": 0 }
  ],
  "time_periods": [{ "code": "AY", "period": "2024/25" }]
}"#
}

/// Second-version extract: option FSM is gone and Ever FSM arrives, a new
/// School level appears, and a new time period is added.
pub fn extract_v2() -> &'static str {
    r#"{
  "filters": [
    {
      "label": "Characteristic",
      "column": "characteristic",
      "options": ["Total", "Ever FSM"]
    }
  ],
  "locations": [
    {
      "code": "LA",
      "label": "Local authority",
      "options": [{ "label": "Sheffield", "code": "E100" }]
    },
    {
      "code": "School",
      "label": "School",
      "options": [{ "label": "Oak Academy", "urn": "140000" }]
    }
  ],
  "indicators": [
    { "label": "Enrolments", "column": "enrolments", "unit": null, "decimal_places": 0 }
  ],
  "time_periods": [
    { "code": "AY", "period": "2024/25" },
    { "code": "AY", "period": "2025/26" }
  ]
}"#
}

pub fn data_csv_v2() -> &'static str {
    "time_period,time_identifier,geographic_level,la_code,characteristic,enrolments\n\
     2025/26,AY,LA,E100,Total,110\n\
     2025/26,AY,LA,E100,Ever FSM,44\n"
}
