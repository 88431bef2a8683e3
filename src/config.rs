use std::time::Duration;

/// Upper bound on the worker pool size, whatever the caller requests
pub const MAX_WORKERS: usize = 10;

/// How long shutdown waits for pool threads before cancelling stragglers
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(800);

/// XML is written here first and renamed once the subject identity is known
pub const PROVISIONAL_XML_NAME: &str = "output.xml";

pub const NATIVE_DICOM_NAMESPACE: &str = "http://dicom.nema.org/PS3.19/models/NativeDICOM";

/// Bulk data suffix when no SOP class has been seen or it is unmapped
pub const DEFAULT_SUFFIX: &str = ".jpg";

/// Random characters appended to task directory names
pub const TASK_DIR_RAND_LEN: usize = 8;

/// Buffer sizes for the XML writer, bulk data copies and input reads
pub const XML_WRITE_BUFFER: usize = 128 * 1024;
pub const BULK_COPY_BUFFER: usize = 256 * 1024;
pub const INPUT_READ_BUFFER: usize = 64 * 1024;
