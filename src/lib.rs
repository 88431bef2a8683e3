//! dicomxml: streaming DICOM to Native DICOM Model XML conversion
//!
//! This crate converts DICOM Part 10 files into the XML rendition of the
//! Native DICOM Model, one document per input, with binary payloads written to
//! side files referenced by `file:` URI:
//!
//! 1. **Decoding** -- A push-style decoder walks the byte stream once and calls
//!    back into a handler for every element, sequence item and fragment
//! 2. **Transcoding** -- The XML handler writes each element as it arrives, so
//!    memory use does not grow with the dataset
//! 3. **Deferred naming** -- The document is written under a provisional name
//!    and renamed to `<patientName>_<patientId>.xml` once the stream ends
//! 4. **Batching** -- Many inputs run on a bounded worker pool, each in its own
//!    uniquely named output directory, with per-file outcomes in input order
//!
//! # Key Modules
//!
//! - [`decoder`] -- Part 10 stream decoder and the [`decoder::ParseHandler`] trait
//! - [`transcoder`] -- XML writer driven by decoder events
//! - [`bulk`] -- Side files for values written by reference
//! - [`task`] -- One input file to one output directory
//! - [`scheduler`] -- Bounded-concurrency batch runner
//! - [`report`] -- JSON summary of a batch
//! - [`vr`], [`charset`], [`person_name`], [`dictionary`] -- Value decoding support
//! - [`suffix`] -- SOP class to bulk data file suffix
//! - [`models`] -- Core data types (SubjectIdentity, TaskOutcome, ...)
//! - [`error`] -- The [`error::ConvertError`] type
//! - [`config`] -- Constants
//!
//! # Example Usage
//!
//! ```bash
//! # Convert three files on up to four workers
//! dicomxml -c 4 -o output/ a.dcm b.dcm c.dcm
//!
//! # Inline every value and name the XML after the patient
//! dicomxml --inline --report batch.json scans/*.dcm
//! ```

pub mod bulk;
pub mod charset;
pub mod config;
pub mod decoder;
pub mod dictionary;
pub mod error;
pub mod models;
pub mod person_name;
pub mod report;
pub mod scheduler;
pub mod suffix;
pub mod task;
pub mod transcoder;
pub mod vr;
