//! Shared fixtures: builds DICOM Part 10 byte streams in memory.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub const IMPLICIT_LE: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_LE: &str = "1.2.840.10008.1.2.1";
pub const EXPLICIT_BE: &str = "1.2.840.10008.1.2.2";
pub const ENCAPSULATED_PDF: &str = "1.2.840.10008.5.1.4.1.1.104.1";

const UNDEFINED: u32 = 0xFFFF_FFFF;
const LONG_HEADER_VRS: &[&str] = &[
    "OB", "OD", "OF", "OL", "OV", "OW", "SQ", "SV", "UC", "UN", "UR", "UT", "UV",
];

/// Accumulates explicit VR data elements in the chosen byte order.
#[derive(Clone)]
pub struct DatasetBuilder {
    big_endian: bool,
    bytes: Vec<u8>,
}

impl DatasetBuilder {
    pub fn little_endian() -> Self {
        Self {
            big_endian: false,
            bytes: Vec::new(),
        }
    }

    pub fn big_endian() -> Self {
        Self {
            big_endian: true,
            bytes: Vec::new(),
        }
    }

    fn u16(&mut self, v: u16) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.bytes.extend_from_slice(&b);
    }

    fn u32(&mut self, v: u32) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.bytes.extend_from_slice(&b);
    }

    fn tag(&mut self, tag: u32) {
        self.u16((tag >> 16) as u16);
        self.u16(tag as u16);
    }

    fn header(&mut self, tag: u32, vr: &str, length: u32) {
        self.tag(tag);
        self.bytes.extend_from_slice(vr.as_bytes());
        if LONG_HEADER_VRS.contains(&vr) {
            self.bytes.extend_from_slice(&[0, 0]);
            self.u32(length);
        } else {
            self.u16(length as u16);
        }
    }

    /// Raw value, written as given.
    pub fn element(mut self, tag: u32, vr: &str, value: &[u8]) -> Self {
        self.header(tag, vr, value.len() as u32);
        self.bytes.extend_from_slice(value);
        self
    }

    /// Text value padded to even length (NUL for UI, space otherwise).
    pub fn text(self, tag: u32, vr: &str, value: &str) -> Self {
        let mut bytes = value.as_bytes().to_vec();
        if bytes.len() % 2 == 1 {
            bytes.push(if vr == "UI" { 0 } else { b' ' });
        }
        self.element(tag, vr, &bytes)
    }

    pub fn us(self, tag: u32, value: u16) -> Self {
        let bytes = if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        self.element(tag, "US", &bytes)
    }

    /// Undefined-length sequence of undefined-length items.
    pub fn sequence(mut self, tag: u32, items: Vec<DatasetBuilder>) -> Self {
        self.header(tag, "SQ", UNDEFINED);
        for item in items {
            self.tag(0xFFFE_E000);
            self.u32(UNDEFINED);
            self.bytes.extend_from_slice(&item.bytes);
            self.tag(0xFFFE_E00D);
            self.u32(0);
        }
        self.tag(0xFFFE_E0DD);
        self.u32(0);
        self
    }

    /// Defined-length sequence of defined-length items.
    pub fn sequence_defined(mut self, tag: u32, items: Vec<DatasetBuilder>) -> Self {
        let content: usize = items.iter().map(|i| 8 + i.bytes.len()).sum();
        self.header(tag, "SQ", content as u32);
        for item in items {
            self.tag(0xFFFE_E000);
            self.u32(item.bytes.len() as u32);
            self.bytes.extend_from_slice(&item.bytes);
        }
        self
    }

    /// Encapsulated pixel data: an empty offset table, then `fragments`.
    pub fn encapsulated(mut self, tag: u32, fragments: &[&[u8]]) -> Self {
        self.header(tag, "OB", UNDEFINED);
        self.tag(0xFFFE_E000);
        self.u32(0);
        for fragment in fragments {
            self.tag(0xFFFE_E000);
            self.u32(fragment.len() as u32);
            self.bytes.extend_from_slice(fragment);
        }
        self.tag(0xFFFE_E0DD);
        self.u32(0);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Implicit VR little endian elements; the reader takes VRs from the dictionary.
pub fn implicit_le(elements: &[(u32, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (tag, value) in elements {
        out.extend_from_slice(&((tag >> 16) as u16).to_le_bytes());
        out.extend_from_slice(&(*tag as u16).to_le_bytes());
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value);
    }
    out
}

/// Preamble, `DICM` and a meta group naming `transfer_syntax`, then `body`.
pub fn part10(transfer_syntax: &str, body: &[u8]) -> Vec<u8> {
    let meta = DatasetBuilder::little_endian()
        .element(0x0002_0001, "OB", &[0, 1])
        .text(0x0002_0010, "UI", transfer_syntax)
        .build();
    let mut out = vec![0u8; 128];
    out.extend_from_slice(b"DICM");
    out.extend(
        DatasetBuilder::little_endian()
            .element(0x0002_0000, "UL", &(meta.len() as u32).to_le_bytes())
            .build(),
    );
    out.extend(meta);
    out.extend_from_slice(body);
    out
}

/// A dataset touching every kind of element the converter renders.
///
/// - group length (0008,0000) and private creator (0009,0010), never rendered
/// - SOP class Encapsulated PDF, so side files get `.pdf`
/// - patient name with alphabetic and phonetic groups, patient ID `PID-7`
/// - a sequence whose item carries its own patient ID
/// - encapsulated pixel data with two fragments
pub fn sample_dataset() -> Vec<u8> {
    let item = DatasetBuilder::little_endian()
        .text(0x0010_0020, "LO", "INNER")
        .us(0x0028_0010, 512);
    let body = DatasetBuilder::little_endian()
        .element(0x0008_0000, "UL", &[0, 0, 0, 0])
        .text(0x0008_0005, "CS", "ISO_IR 100")
        .text(0x0008_0008, "CS", "ORIGINAL\\PRIMARY")
        .text(0x0008_0016, "UI", ENCAPSULATED_PDF)
        .text(0x0009_0010, "LO", "ACME 1.0")
        .text(0x0009_1001, "LO", "secret")
        .text(0x0010_0010, "PN", "Doe^John==Do^Jo")
        .text(0x0010_0020, "LO", "PID-7")
        .sequence(0x0040_0275, vec![item])
        .encapsulated(0x7FE0_0010, &[&[1, 2, 3, 4], &[5, 6, 7, 8, 9, 10]])
        .build();
    part10(EXPLICIT_LE, &body)
}

pub fn write_input(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

/// Fails unless `xml` parses with balanced, matching start and end tags.
pub fn assert_well_formed(xml: &str) {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => depth -= 1,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => panic!("malformed XML at {}: {e}", reader.buffer_position()),
        }
    }
    assert_eq!(depth, 0, "unclosed elements");
}

/// Single file in `dir` whose name ends with `suffix`.
pub fn find_file(dir: &Path, suffix: &str) -> PathBuf {
    let matches: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().ends_with(suffix))
        .collect();
    assert_eq!(matches.len(), 1, "expected one *{suffix} in {dir:?}: {matches:?}");
    matches.into_iter().next().unwrap()
}
