#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Two sections over three years. `registration` is complete; `mail` forgets
/// one field in 2018.
pub const SAMPLE_CONFIG: &str = r#"
config_version: "2024.2"
global:
  project_id: eavs-392800
  analytics_dataset: eavs_analytics
retry:
  max_attempts: 2
  initial_backoff_ms: 0
  max_backoff_ms: 0
sections:
  registration:
    section_code: a_reg
    view: eavs_county_reg_union
    years: [2016, 2020, 2024]
    composite_key: jurisdiction_key
    standard_fields: [total_reg, active_reg, other_reasons]
    mappings:
      2016: { total_reg: A1a, active_reg: A1b, other_reasons: "A9i + A9j + A9k" }
      2020: { total_reg: A1a, active_reg: A1b, other_reasons: A9i }
      2024: { total_reg: A1a, active_reg: null, other_reasons: "null" }
  mail:
    section_code: c_mail
    view: eavs_county_mail_union
    years: [2016, 2018]
    standard_fields: [total_mail, mail_rejected]
    mappings:
      2016: { total_mail: C1a, mail_rejected: C4a }
      2018: { total_mail: C1a }
"#;

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

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn sample_config(&self) -> PathBuf {
        self.write("views.yaml", SAMPLE_CONFIG)
    }
}
