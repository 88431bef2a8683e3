use crate::config::DEFAULT_SUFFIX;
use crate::error::ConvertError;
use std::path::PathBuf;

/// Whether non-empty values are written to side files or inlined in the XML
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkDataMode {
    /// Every non-sequence value with content goes to a side file referenced by URI
    #[default]
    Uri,
    Inline,
}

/// Identity fields observed mid-stream that name the output files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectIdentity {
    pub patient_name: Option<String>,
    pub patient_id: Option<String>,
    pub preferred_suffix: String,
}

impl Default for SubjectIdentity {
    fn default() -> Self {
        Self {
            patient_name: None,
            patient_id: None,
            preferred_suffix: DEFAULT_SUFFIX.to_string(),
        }
    }
}

impl SubjectIdentity {
    /// `<patientName>_<patientId>`, with unset fields rendered empty.
    pub fn file_stem(&self) -> String {
        let name = self.patient_name.as_deref().unwrap_or("");
        let id = self.patient_id.as_deref().unwrap_or("");
        let mut stem = String::with_capacity(name.len() + id.len() + 1);
        stem.push_str(&sanitize_component(name));
        stem.push('_');
        stem.push_str(&sanitize_component(id));
        stem
    }

    pub fn xml_file_name(&self) -> String {
        format!("{}.xml", self.file_stem())
    }
}

/// Keeps a decoded identity value from naming a path outside the task directory.
fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect()
}

/// Location of a value written to a side file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDataReference {
    pub uri: String,
    pub offset: u64,
    pub length: u64,
    pub big_endian: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub xml_file: PathBuf,
}

#[derive(Debug)]
pub enum TaskOutcome {
    Success(ConversionResult),
    Failure { input: PathBuf, error: ConvertError },
}

impl TaskOutcome {
    pub fn input(&self) -> &PathBuf {
        match self {
            TaskOutcome::Success(result) => &result.input,
            TaskOutcome::Failure { input, .. } => input,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }
}
