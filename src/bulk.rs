use crate::config::BULK_COPY_BUFFER;
use crate::error::{ConvertError, Result};
use crate::models::{BulkDataReference, SubjectIdentity};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::trace;
use url::Url;

/// Writes values to uniquely named side files inside one task directory
pub struct BulkDataSink {
    dir: PathBuf,
}

impl BulkDataSink {
    /// `dir` must be absolute so the returned URIs resolve.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Streams exactly `length` bytes from `source` into a new file named
    /// `<stem>_<random><suffix>`, using the identity known at this point.
    pub fn materialize<R: Read + ?Sized>(
        &self,
        identity: &SubjectIdentity,
        source: &mut R,
        length: u64,
        big_endian: bool,
    ) -> Result<BulkDataReference> {
        let prefix = format!("{}_", identity.file_stem());
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&identity.preferred_suffix)
            .tempfile_in(&self.dir)?;

        // Until kept, the file is removed on every early return
        let mut out = BufWriter::with_capacity(BULK_COPY_BUFFER, file.as_file_mut());
        let copied = io::copy(&mut source.take(length), &mut out)?;
        out.flush()?;
        drop(out);
        if copied != length {
            return Err(ConvertError::ShortCopy {
                expected: length,
                copied,
            });
        }
        let (_, path) = file.keep().map_err(|e| ConvertError::Io(e.error))?;

        let uri = Url::from_file_path(&path)
            .map_err(|_| ConvertError::InvalidUri(path.clone()))?
            .to_string();
        trace!(path = ?path, length, "Bulk data written");

        Ok(BulkDataReference {
            uri,
            offset: 0,
            length,
            big_endian,
        })
    }
}
