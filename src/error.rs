use std::path::PathBuf;

/// Errors raised while decoding a DICOM stream or writing its XML rendition
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// Reading the input or writing an output file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A bulk data copy ended before the declared length
    #[error("short copy: expected {expected} bytes, copied {copied}")]
    ShortCopy { expected: u64, copied: u64 },

    /// The decoder met a structure it cannot parse
    #[error("malformed DICOM stream: {0}")]
    MalformedStream(String),

    /// The output root or a task subdirectory could not be created
    #[error("cannot create output directory {path:?}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("cannot express {0:?} as a file URI")]
    InvalidUri(PathBuf),

    /// The batch was cancelled before this task started
    #[error("task cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl ConvertError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        ConvertError::MalformedStream(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
