use crate::models::TaskOutcome;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

#[derive(Debug, Serialize)]
pub struct ReportEntry {
    pub input: PathBuf,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xml_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one batch, entries in submission order
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub entries: Vec<ReportEntry>,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: &[TaskOutcome]) -> Self {
        let entries: Vec<ReportEntry> = outcomes.iter().map(ReportEntry::from).collect();
        let succeeded = entries
            .iter()
            .filter(|e| e.status == Status::Success)
            .count();
        Self {
            total: entries.len(),
            succeeded,
            failed: entries.len() - succeeded,
            entries,
        }
    }

    /// Writes the report as pretty JSON through a temp file and rename.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let tmp_path = path.with_extension("json.tmp");
        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create temp report file: {:?}", tmp_path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).context("Failed to serialize report")?;
        writer.flush().context("Failed to flush report")?;
        drop(writer);

        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename temp report: {:?}", path))?;
        debug!(path = ?path, entries = self.total, "Report written");
        Ok(())
    }
}

impl From<&TaskOutcome> for ReportEntry {
    fn from(outcome: &TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Success(result) => ReportEntry {
                input: result.input.clone(),
                status: Status::Success,
                output_dir: Some(result.output_dir.clone()),
                xml_file: Some(result.xml_file.clone()),
                error: None,
            },
            TaskOutcome::Failure { input, error } => ReportEntry {
                input: input.clone(),
                status: Status::Failure,
                output_dir: None,
                xml_file: None,
                error: Some(error.to_string()),
            },
        }
    }
}
