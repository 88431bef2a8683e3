//! Event-driven writer for the Native DICOM Model XML rendition.
//!
//! [`XmlTranscoder`] is a [`ParseHandler`]: each callback writes its XML
//! element as the decoder reaches it, so the document is never held in memory.
//! Every start tag is paired with its end tag through [`XmlTranscoder::element`],
//! which closes the element even when the body failed.
//!
//! The output file name depends on the patient name and ID, which are only
//! known once the stream has been read. The document is therefore written to
//! a provisional file and renamed when the dataset ends.

use crate::bulk::BulkDataSink;
use crate::charset::SpecificCharacterSet;
use crate::config::{NATIVE_DICOM_NAMESPACE, PROVISIONAL_XML_NAME, XML_WRITE_BUFFER};
use crate::decoder::{Attributes, DicomDecoder, Fragment, Item, ParseHandler, UNDEFINED_LENGTH};
use crate::dictionary::{
    self, PATIENT_ID, PATIENT_NAME, SOP_CLASS_UID, SPECIFIC_CHARACTER_SET, TRANSFER_SYNTAX_UID,
};
use crate::error::{ConvertError, Result};
use crate::models::SubjectIdentity;
use crate::person_name::{Component, Group, PersonName};
use crate::suffix::suffix_for_sop_class;
use crate::vr::{VrExt, VR};
use base64::prelude::*;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const ROOT: &str = "NativeDicomModel";

type XmlWriter = Writer<BufWriter<File>>;

/// XML attributes of a `DicomAttribute` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementAttributes {
    pub tag: String,
    pub vr: VR,
    pub private_creator: Option<String>,
    pub keyword: Option<&'static str>,
}

impl ElementAttributes {
    pub fn collect(tag: u32, vr: VR, private_creator: Option<String>) -> Self {
        let keyword = dictionary::keyword_of(tag, private_creator.as_deref());
        let private_creator = private_creator.map(|c| xml_chars(&c).into_owned());
        Self {
            tag: dictionary::tag_hex(tag),
            vr,
            private_creator,
            keyword,
        }
    }

    pub fn pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs = vec![("tag", self.tag.as_str()), ("vr", self.vr.to_string())];
        if let Some(creator) = &self.private_creator {
            pairs.push(("privateCreator", creator.as_str()));
        }
        if let Some(keyword) = self.keyword {
            pairs.push(("keyword", keyword));
        }
        pairs
    }
}

pub struct XmlTranscoder {
    output_dir: PathBuf,
    bulk: BulkDataSink,
    identity: SubjectIdentity,
    writer: Option<XmlWriter>,
    /// Item nesting; identity is only taken from the top-level dataset
    depth: usize,
    xml_file: Option<PathBuf>,
}

impl XmlTranscoder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            bulk: BulkDataSink::new(output_dir.clone()),
            output_dir,
            identity: SubjectIdentity::default(),
            writer: None,
            depth: 0,
            xml_file: None,
        }
    }

    pub fn identity(&self) -> &SubjectIdentity {
        &self.identity
    }

    /// Final XML path, set once the dataset has ended and the file was renamed.
    pub fn xml_file(&self) -> Option<&Path> {
        self.xml_file.as_deref()
    }

    fn writer(&mut self) -> Result<&mut XmlWriter> {
        self.writer
            .as_mut()
            .ok_or_else(|| ConvertError::malformed("element outside of a dataset"))
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.writer()?.write_event(Event::Start(start))?;
        Ok(())
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.writer()?.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    /// Writes `<name attrs>`, runs `body`, then always writes `</name>`.
    /// The body's error takes precedence over a failure to close.
    fn element<F>(&mut self, name: &str, attrs: &[(&str, &str)], body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.start(name, attrs)?;
        let body = body(self);
        let end = self.end(name);
        body.and(end)
    }

    fn empty_element(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut empty = BytesStart::new(name);
        for attr in attrs {
            empty.push_attribute(*attr);
        }
        self.writer()?.write_event(Event::Empty(empty))?;
        Ok(())
    }

    fn text_element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        self.element(name, attrs, |this| {
            let text = xml_chars(text);
            this.writer()?.write_event(Event::Text(BytesText::new(&text)))?;
            Ok(())
        })
    }

    fn write_bulk_data(&mut self, decoder: &mut DicomDecoder<'_>) -> Result<()> {
        let length = decoder.length() as u64;
        let big_endian = decoder.big_endian();
        let reference = self
            .bulk
            .materialize(&self.identity, decoder, length, big_endian)?;
        self.empty_element("BulkData", &[("uri", reference.uri.as_str())])
    }

    fn write_inline_binary(&mut self, bytes: &[u8]) -> Result<()> {
        let encoded = BASE64_STANDARD.encode(bytes);
        self.text_element("InlineBinary", &[], &encoded)
    }

    /// Reads the current value inline, records identity fields and writes it
    /// as base64 or as numbered values.
    fn write_value(
        &mut self,
        decoder: &mut DicomDecoder<'_>,
        attrs: &mut Attributes,
        tag: u32,
        vr: VR,
    ) -> Result<()> {
        let mut bytes = decoder.read_value_bytes()?;
        let big_endian = decoder.big_endian();

        if tag == TRANSFER_SYNTAX_UID || tag == SPECIFIC_CHARACTER_SET {
            attrs.set_bytes(tag, vr, bytes.clone());
        }
        let charset = attrs.charset_for(vr);
        if self.depth == 0 {
            self.observe_identity(tag, vr, &bytes, big_endian, &charset);
        }

        if vr.is_inline_binary() {
            if big_endian {
                vr.toggle_endian(&mut bytes);
            }
            self.write_inline_binary(&bytes)
        } else {
            self.write_values(vr, &bytes, big_endian, &charset)
        }
    }

    fn observe_identity(
        &mut self,
        tag: u32,
        vr: VR,
        bytes: &[u8],
        big_endian: bool,
        charset: &SpecificCharacterSet,
    ) {
        let decoded = || vr.to_strings(bytes, big_endian, charset).join("\\");
        match tag {
            SOP_CLASS_UID => {
                self.identity.preferred_suffix = suffix_for_sop_class(&decoded()).to_string();
            }
            PATIENT_ID => self.identity.patient_id = Some(decoded()),
            PATIENT_NAME => self.identity.patient_name = Some(decoded()),
            _ => {}
        }
    }

    fn write_values(
        &mut self,
        vr: VR,
        bytes: &[u8],
        big_endian: bool,
        charset: &SpecificCharacterSet,
    ) -> Result<()> {
        let values = vr.to_strings(bytes, big_endian, charset);
        let mut buffer = itoa::Buffer::new();
        for (i, value) in values.iter().enumerate() {
            let number = buffer.format(i + 1);
            if vr == VR::PN {
                self.write_person_name(number, value)?;
            } else if value.is_empty() {
                self.empty_element("Value", &[("number", number)])?;
            } else {
                self.text_element("Value", &[("number", number)], value)?;
            }
        }
        Ok(())
    }

    fn write_person_name(&mut self, number: &str, value: &str) -> Result<()> {
        let name = PersonName::parse(value);
        self.element("PersonName", &[("number", number)], |this| {
            for group in Group::ALL {
                if !name.contains(group) {
                    continue;
                }
                this.element(group.element_name(), &[], |this| {
                    for component in Component::ALL {
                        if let Some(text) = name.get(group, component) {
                            this.text_element(component.element_name(), &[], text)?;
                        }
                    }
                    Ok(())
                })?;
            }
            Ok(())
        })
    }
}

/// Replaces characters XML 1.0 cannot carry (C0 controls other than tab,
/// line feed and carriage return) with U+FFFD.
fn xml_chars(text: &str) -> Cow<'_, str> {
    let forbidden = |c: char| c < '\u{20}' && !matches!(c, '\t' | '\n' | '\r');
    if !text.contains(forbidden) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.chars()
            .map(|c| if forbidden(c) { '\u{FFFD}' } else { c })
            .collect(),
    )
}

/// Closes the root element and flushes. The file handle is released when
/// this returns, on success or failure.
fn close_document(mut writer: XmlWriter) -> Result<()> {
    writer.write_event(Event::End(BytesEnd::new(ROOT)))?;
    let mut out = writer.into_inner();
    out.flush()?;
    Ok(())
}

impl ParseHandler for XmlTranscoder {
    fn on_dataset_start(&mut self, _decoder: &mut DicomDecoder<'_>) -> Result<()> {
        let path = self.output_dir.join(PROVISIONAL_XML_NAME);
        let file = File::create(&path)?;
        let mut writer = Writer::new(BufWriter::with_capacity(XML_WRITE_BUFFER, file));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let mut root = BytesStart::new(ROOT);
        root.push_attribute(("xmlns", NATIVE_DICOM_NAMESPACE));
        writer.write_event(Event::Start(root))?;
        self.writer = Some(writer);
        Ok(())
    }

    fn on_element(&mut self, decoder: &mut DicomDecoder<'_>, attrs: &mut Attributes) -> Result<()> {
        let tag = decoder.tag();
        if dictionary::is_group_length(tag) || dictionary::is_private_creator(tag) {
            return decoder.read_value(self, attrs);
        }
        let vr = decoder.vr();
        let length = decoder.length();
        let element = ElementAttributes::collect(tag, vr, attrs.private_creator(tag));

        self.element("DicomAttribute", &element.pairs(), |this| {
            if vr == VR::SQ || length == 0 || length == UNDEFINED_LENGTH {
                decoder.read_value(this, attrs)
            } else if decoder.is_bulk_data_uri() {
                this.write_bulk_data(decoder)
            } else {
                this.write_value(decoder, attrs, tag, vr)
            }
        })
    }

    fn on_item(&mut self, decoder: &mut DicomDecoder<'_>, item: &Item) -> Result<()> {
        let mut buffer = itoa::Buffer::new();
        let number = buffer.format(item.number);
        self.element("Item", &[("number", number)], |this| {
            this.depth += 1;
            let result = decoder.read_item(this, item);
            this.depth -= 1;
            result
        })
    }

    fn on_fragment(&mut self, decoder: &mut DicomDecoder<'_>, fragment: &Fragment) -> Result<()> {
        if fragment.length == 0 {
            return Ok(());
        }
        let mut buffer = itoa::Buffer::new();
        let number = buffer.format(fragment.number);
        self.element("DataFragment", &[("number", number)], |this| {
            if decoder.is_bulk_data_uri() {
                return this.write_bulk_data(decoder);
            }
            let mut bytes = decoder.read_value_bytes()?;
            if decoder.big_endian() {
                fragment.vr.toggle_endian(&mut bytes);
            }
            this.write_inline_binary(&bytes)
        })
    }

    fn on_dataset_end(&mut self, _decoder: &mut DicomDecoder<'_>) -> Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| ConvertError::malformed("dataset ended before it started"))?;
        close_document(writer)?;

        let target = self.output_dir.join(self.identity.xml_file_name());
        fs::rename(self.output_dir.join(PROVISIONAL_XML_NAME), &target)?;
        debug!(path = ?target, "XML document finalized");
        self.xml_file = Some(target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BulkDataMode;
    use tempfile::TempDir;

    fn started(dir: &Path) -> (XmlTranscoder, DicomDecoder<'static>) {
        let empty: &'static [u8] = &[];
        let mut decoder = DicomDecoder::new(empty)
            .unwrap()
            .with_bulk_data(BulkDataMode::Inline);
        let mut transcoder = XmlTranscoder::new(dir);
        transcoder.on_dataset_start(&mut decoder).unwrap();
        (transcoder, decoder)
    }

    fn finish(mut transcoder: XmlTranscoder, mut decoder: DicomDecoder<'_>) -> String {
        transcoder.on_dataset_end(&mut decoder).unwrap();
        fs::read_to_string(transcoder.xml_file().unwrap()).unwrap()
    }

    #[test]
    fn element_attributes_include_keyword_for_standard_tags() {
        let attrs = ElementAttributes::collect(PATIENT_NAME, VR::PN, None);
        assert_eq!(
            attrs.pairs(),
            vec![("tag", "00100010"), ("vr", "PN"), ("keyword", "PatientName")]
        );
    }

    #[test]
    fn element_attributes_resolve_keywords_from_the_registry() {
        let attrs = ElementAttributes::collect(0x0018_5100, VR::CS, None);
        assert_eq!(attrs.keyword, Some("PatientPosition"));
        let attrs = ElementAttributes::collect(0x0020_1041, VR::DS, None);
        assert_eq!(attrs.keyword, Some("SliceLocation"));
    }

    #[test]
    fn element_attributes_for_private_tags() {
        let attrs = ElementAttributes::collect(0x0009_1001, VR::LO, Some("ACME".to_string()));
        assert_eq!(
            attrs.pairs(),
            vec![("tag", "00091001"), ("vr", "LO"), ("privateCreator", "ACME")]
        );
    }

    #[test]
    fn empty_dataset_is_renamed_to_placeholder() {
        let dir = TempDir::new().unwrap();
        let (transcoder, decoder) = started(dir.path());
        assert!(dir.path().join(PROVISIONAL_XML_NAME).exists());

        let xml = finish(transcoder, decoder);
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(
            r#"<NativeDicomModel xmlns="http://dicom.nema.org/PS3.19/models/NativeDICOM">"#
        ));
        assert!(xml.ends_with("</NativeDicomModel>"));
        assert!(dir.path().join("_.xml").exists());
        assert!(!dir.path().join(PROVISIONAL_XML_NAME).exists());
    }

    #[test]
    fn person_name_writes_only_present_groups_and_components() {
        let dir = TempDir::new().unwrap();
        let (mut transcoder, decoder) = started(dir.path());
        transcoder
            .write_values(VR::PN, b"Doe^John==Do^Jo", false, &SpecificCharacterSet::ascii())
            .unwrap();
        let xml = finish(transcoder, decoder);

        assert!(xml.contains(
            "<PersonName number=\"1\"><Alphabetic><FamilyName>Doe</FamilyName>\
             <GivenName>John</GivenName></Alphabetic><Phonetic><FamilyName>Do</FamilyName>\
             <GivenName>Jo</GivenName></Phonetic></PersonName>"
        ));
        assert!(!xml.contains("Ideographic"));
        assert!(!xml.contains("MiddleName"));
    }

    #[test]
    fn multi_valued_strings_are_numbered() {
        let dir = TempDir::new().unwrap();
        let (mut transcoder, decoder) = started(dir.path());
        transcoder
            .write_values(VR::CS, b"DERIVED\\\\SECONDARY", false, &SpecificCharacterSet::ascii())
            .unwrap();
        let xml = finish(transcoder, decoder);
        assert!(xml.contains(concat!(
            r#"<Value number="1">DERIVED</Value><Value number="2"/>"#,
            r#"<Value number="3">SECONDARY</Value>"#
        )));
    }

    #[test]
    fn text_is_escaped() {
        let dir = TempDir::new().unwrap();
        let (mut transcoder, decoder) = started(dir.path());
        transcoder
            .write_values(VR::LO, b"a<b & c", false, &SpecificCharacterSet::ascii())
            .unwrap();
        let xml = finish(transcoder, decoder);
        assert!(xml.contains("<Value number=\"1\">a&lt;b &amp; c</Value>"));
    }

    #[test]
    fn control_characters_never_reach_the_document() {
        let dir = TempDir::new().unwrap();
        let (mut transcoder, decoder) = started(dir.path());
        transcoder
            .write_values(VR::LO, b"a\x1b(Bb\tc", false, &SpecificCharacterSet::ascii())
            .unwrap();
        let xml = finish(transcoder, decoder);
        assert!(xml.contains("<Value number=\"1\">a\u{FFFD}(Bb\tc</Value>"));
        assert!(!xml.contains('\u{1b}'));
    }

    #[test]
    fn xml_chars_borrows_clean_text() {
        assert!(matches!(xml_chars("Doe^John"), Cow::Borrowed(_)));
        assert_eq!(xml_chars("a\u{0}b\u{7}"), "a\u{FFFD}b\u{FFFD}");
    }

    #[test]
    fn failed_body_still_closes_element() {
        let dir = TempDir::new().unwrap();
        let (mut transcoder, decoder) = started(dir.path());
        let result = transcoder.element("DicomAttribute", &[("tag", "00100020")], |_| {
            Err(ConvertError::malformed("decode failed"))
        });
        assert!(result.is_err());
        let xml = finish(transcoder, decoder);
        assert!(xml.contains(r#"<DicomAttribute tag="00100020"></DicomAttribute>"#));
    }

    #[test]
    fn identity_fields_are_recorded() {
        let dir = TempDir::new().unwrap();
        let mut transcoder = XmlTranscoder::new(dir.path());
        let ascii = SpecificCharacterSet::ascii();
        transcoder.observe_identity(PATIENT_ID, VR::LO, b"A1\\B2 ", false, &ascii);
        transcoder.observe_identity(PATIENT_NAME, VR::PN, b"Doe^John", false, &ascii);
        transcoder.observe_identity(
            SOP_CLASS_UID,
            VR::UI,
            b"1.2.840.10008.5.1.4.1.1.104.1\0",
            false,
            &ascii,
        );
        let identity = transcoder.identity();
        assert_eq!(identity.patient_id.as_deref(), Some("A1\\B2"));
        assert_eq!(identity.xml_file_name(), "Doe^John_A1\\B2.xml".replace('\\', "_"));
        assert_eq!(identity.preferred_suffix, ".pdf");
    }
}
