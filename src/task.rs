use crate::config::{INPUT_READ_BUFFER, TASK_DIR_RAND_LEN};
use crate::decoder::DicomDecoder;
use crate::error::{ConvertError, Result};
use crate::models::{BulkDataMode, ConversionResult, TaskOutcome};
use crate::transcoder::XmlTranscoder;
use bzip2::read::BzDecoder;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Converts one input file into its own directory under a shared output root.
#[derive(Debug, Clone)]
pub struct ConversionTask {
    input: PathBuf,
    output_root: PathBuf,
    bulk_data: BulkDataMode,
}

impl ConversionTask {
    pub fn new(input: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_root: output_root.into(),
            bulk_data: BulkDataMode::Uri,
        }
    }

    pub fn with_bulk_data(mut self, mode: BulkDataMode) -> Self {
        self.bulk_data = mode;
        self
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Runs the conversion. Failures are returned as an outcome, never raised.
    pub fn run(&self) -> TaskOutcome {
        debug!(input = ?self.input, "Started converting");
        match self.convert() {
            Ok(result) => {
                info!(
                    input = ?result.input,
                    output = ?result.xml_file,
                    "Successfully converted"
                );
                TaskOutcome::Success(result)
            }
            Err(e) => {
                error!(input = ?self.input, error = %e, "Conversion failed");
                TaskOutcome::Failure {
                    input: self.input.clone(),
                    error: e,
                }
            }
        }
    }

    fn convert(&self) -> Result<ConversionResult> {
        let output_dir = self.create_task_dir()?;
        let reader = open_input(&self.input)?;

        let mut decoder = DicomDecoder::new(reader)?.with_bulk_data(self.bulk_data);
        let mut transcoder = XmlTranscoder::new(&output_dir);
        decoder.read_dataset(&mut transcoder)?;

        let xml_file = transcoder
            .xml_file()
            .map(Path::to_path_buf)
            .ok_or_else(|| ConvertError::malformed("dataset produced no document"))?;
        Ok(ConversionResult {
            input: self.input.clone(),
            output_dir,
            xml_file,
        })
    }

    /// Creates `<root>/<file name><random>` and returns its canonical path, so
    /// bulk data URIs are absolute.
    fn create_task_dir(&self) -> Result<PathBuf> {
        let prefix = self
            .input
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("input"));
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .rand_bytes(TASK_DIR_RAND_LEN)
            .tempdir_in(&self.output_root)
            .map_err(|source| ConvertError::OutputDirectory {
                path: self.output_root.clone(),
                source,
            })?
            .keep();
        dir.canonicalize()
            .map_err(|source| ConvertError::OutputDirectory { path: dir, source })
    }
}

/// Opens `path` for sequential reading, decompressing `.bz2` inputs.
fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path)?;
    let compressed = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("bz2"));
    if compressed {
        Ok(Box::new(BufReader::with_capacity(
            INPUT_READ_BUFFER,
            BzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(INPUT_READ_BUFFER, file)))
    }
}
