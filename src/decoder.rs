//! Streaming DICOM Part 10 decoder with a push-style handler interface.
//!
//! The decoder walks the byte stream once, in document order, and calls back
//! into a [`ParseHandler`] for every dataset boundary, data element, sequence
//! item and encapsulated fragment. Handlers pull value bytes straight from the
//! decoder (it implements [`Read`], bounded by the current value length) or hand
//! the element back for default consumption, which recurses into items and
//! fragments. Nesting therefore follows the call stack: every `on_item` and
//! `on_fragment` happens inside the `on_element` of its parent.
//!
//! File meta information (group 0002) is consumed while constructing the
//! decoder and never reaches the handler.

use crate::charset::SpecificCharacterSet;
use crate::dictionary::{
    self, ITEM, ITEM_DELIMITATION_ITEM, SEQUENCE_DELIMITATION_ITEM, SPECIFIC_CHARACTER_SET,
    TRANSFER_SYNTAX_UID,
};
use crate::error::{ConvertError, Result};
use crate::models::BulkDataMode;
use crate::vr::{VrExt, VR};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use flate2::read::DeflateDecoder;
use rustc_hash::FxHashMap;
use std::io::{self, Cursor, Read};
use tracing::{debug, trace};

pub const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

const PREAMBLE_LEN: usize = 128;

/// Receives parse events in document order.
///
/// Every method is required so a handler cannot silently drop an event kind.
/// A handler must either consume the current value itself or hand it back via
/// [`DicomDecoder::read_value`] / [`DicomDecoder::read_item`]; unread bytes of
/// defined-length values are skipped after the callback returns.
pub trait ParseHandler {
    fn on_dataset_start(&mut self, decoder: &mut DicomDecoder<'_>) -> Result<()>;

    /// A data element header was read; `decoder.tag()`, `vr()` and `length()`
    /// describe it. `attrs` is the enclosing dataset or item.
    fn on_element(&mut self, decoder: &mut DicomDecoder<'_>, attrs: &mut Attributes) -> Result<()>;

    fn on_item(&mut self, decoder: &mut DicomDecoder<'_>, item: &Item) -> Result<()>;

    fn on_fragment(&mut self, decoder: &mut DicomDecoder<'_>, fragment: &Fragment) -> Result<()>;

    /// Called once after `on_dataset_start` succeeded, even if the body failed.
    fn on_dataset_end(&mut self, decoder: &mut DicomDecoder<'_>) -> Result<()>;
}

/// A sequence item about to be read
#[derive(Debug, Clone)]
pub struct Item {
    /// 1-based position within the sequence
    pub number: usize,
    pub length: u32,
    charset: SpecificCharacterSet,
    end: Option<u64>,
}

/// One item of an encapsulated (undefined-length) pixel data element
#[derive(Debug, Clone)]
pub struct Fragment {
    /// 1-based; the basic offset table is fragment 1
    pub number: usize,
    pub vr: VR,
    pub length: u32,
}

/// Values kept for a dataset or item while it streams past.
///
/// Only what the decoder or handler explicitly stores lands here: group
/// lengths, private creators, and whatever the handler feeds back (transfer
/// syntax, character set). The character set is inherited by nested items.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    values: FxHashMap<u32, (VR, Vec<u8>)>,
    charset: SpecificCharacterSet,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nested(charset: SpecificCharacterSet) -> Self {
        Self {
            values: FxHashMap::default(),
            charset,
        }
    }

    pub fn set_bytes(&mut self, tag: u32, vr: VR, value: Vec<u8>) {
        if tag == SPECIFIC_CHARACTER_SET {
            self.charset = SpecificCharacterSet::from_value(&value);
        }
        self.values.insert(tag, (vr, value));
    }

    pub fn bytes(&self, tag: u32) -> Option<&[u8]> {
        self.values.get(&tag).map(|(_, v)| v.as_slice())
    }

    /// First value of a stored string element, padding removed.
    pub fn string(&self, tag: u32) -> Option<String> {
        let (vr, value) = self.values.get(&tag)?;
        vr.to_strings(value, false, &self.charset)
            .into_iter()
            .next()
            .filter(|s| !s.is_empty())
    }

    pub fn charset(&self) -> SpecificCharacterSet {
        self.charset
    }

    /// Character set applicable to values of `vr`.
    pub fn charset_for(&self, vr: VR) -> SpecificCharacterSet {
        if vr.uses_specific_charset() {
            self.charset
        } else {
            SpecificCharacterSet::ascii()
        }
    }

    pub fn private_creator(&self, tag: u32) -> Option<String> {
        dictionary::private_creator_tag(tag).and_then(|creator| self.string(creator))
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.values.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Clone, Copy)]
enum Bound {
    EndOfStream,
    Position(u64),
    Delimited,
}

pub struct DicomDecoder<'r> {
    input: Box<dyn Read + 'r>,
    position: u64,
    explicit_vr: bool,
    big_endian: bool,
    bulk_data: BulkDataMode,
    file_meta: Attributes,
    transfer_syntax: String,
    pending_tag: Option<[u8; 4]>,
    tag: u32,
    vr: VR,
    length: u32,
}

impl Read for DicomDecoder<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.input.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<'r> DicomDecoder<'r> {
    /// Reads the preamble and file meta information and selects the transfer
    /// syntax for the dataset that follows.
    ///
    /// Streams without a preamble are accepted: a leading group 0002 element
    /// is read as meta information, otherwise the encoding is guessed from
    /// the first header.
    pub fn new<R: Read + 'r>(mut reader: R) -> Result<Self> {
        let mut head = Vec::with_capacity(PREAMBLE_LEN + 4);
        (&mut reader)
            .take((PREAMBLE_LEN + 4) as u64)
            .read_to_end(&mut head)?;

        let has_preamble = head.len() == PREAMBLE_LEN + 4 && &head[PREAMBLE_LEN..] == b"DICM";
        let guess = if has_preamble {
            None
        } else {
            Some(guess_encoding(&head))
        };
        let input: Box<dyn Read + 'r> = if has_preamble {
            Box::new(reader)
        } else {
            Box::new(Cursor::new(head).chain(reader))
        };

        let mut decoder = Self {
            input,
            position: 0,
            explicit_vr: true,
            big_endian: false,
            bulk_data: BulkDataMode::default(),
            file_meta: Attributes::new(),
            transfer_syntax: EXPLICIT_VR_LITTLE_ENDIAN.to_string(),
            pending_tag: None,
            tag: 0,
            vr: VR::UN,
            length: 0,
        };

        match guess {
            None | Some(Guess::FileMeta) => decoder.read_file_meta()?,
            Some(Guess::Explicit) => decoder.apply_transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN),
            Some(Guess::Implicit) => decoder.apply_transfer_syntax(IMPLICIT_VR_LITTLE_ENDIAN),
        }
        debug!(
            transfer_syntax = %decoder.transfer_syntax,
            preamble = has_preamble,
            "Opened DICOM stream"
        );
        Ok(decoder)
    }

    pub fn with_bulk_data(mut self, mode: BulkDataMode) -> Self {
        self.bulk_data = mode;
        self
    }

    pub fn set_bulk_data(&mut self, mode: BulkDataMode) {
        self.bulk_data = mode;
    }

    pub fn bulk_data(&self) -> BulkDataMode {
        self.bulk_data
    }

    pub fn is_bulk_data_uri(&self) -> bool {
        self.bulk_data == BulkDataMode::Uri
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn vr(&self) -> VR {
        self.vr
    }

    /// Declared value length; [`UNDEFINED_LENGTH`] for delimited values.
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn is_undefined_length(&self) -> bool {
        self.length == UNDEFINED_LENGTH
    }

    pub fn big_endian(&self) -> bool {
        self.big_endian
    }

    pub fn explicit_vr(&self) -> bool {
        self.explicit_vr
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn transfer_syntax(&self) -> &str {
        &self.transfer_syntax
    }

    pub fn file_meta(&self) -> &Attributes {
        &self.file_meta
    }

    /// Drives `handler` over the whole dataset.
    pub fn read_dataset(&mut self, handler: &mut dyn ParseHandler) -> Result<()> {
        handler.on_dataset_start(self)?;
        let mut attrs = Attributes::new();
        let body = self.read_attributes(handler, &mut attrs, Bound::EndOfStream);
        let end = handler.on_dataset_end(self);
        body.and(end)
    }

    /// Default consumption of the current element: sequences and encapsulated
    /// values recurse through the handler, anything else is stored in `attrs`.
    pub fn read_value(
        &mut self,
        handler: &mut dyn ParseHandler,
        attrs: &mut Attributes,
    ) -> Result<()> {
        let (tag, vr, length) = (self.tag, self.vr, self.length);
        if vr == VR::SQ {
            return self.read_sequence(handler, attrs.charset(), length);
        }
        if length == UNDEFINED_LENGTH {
            if vr == VR::UN {
                return self.read_implicit_sequence(handler, attrs.charset());
            }
            return self.read_fragments(handler, vr);
        }
        let value = self.read_value_bytes()?;
        attrs.set_bytes(tag, vr, value);
        Ok(())
    }

    /// Reads the data elements of `item` through the handler.
    pub fn read_item(&mut self, handler: &mut dyn ParseHandler, item: &Item) -> Result<()> {
        let mut attrs = Attributes::nested(item.charset);
        let bound = match item.end {
            Some(end) => Bound::Position(end),
            None => Bound::Delimited,
        };
        self.read_attributes(handler, &mut attrs, bound)
    }

    /// Reads the complete value of the current element or fragment.
    pub fn read_value_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.length;
        if length == UNDEFINED_LENGTH {
            return Err(ConvertError::malformed(format!(
                "cannot read undefined-length value of {}",
                dictionary::tag_hex(self.tag)
            )));
        }
        let mut value = Vec::with_capacity((length as usize).min(64 * 1024));
        let read = self.by_ref().take(length as u64).read_to_end(&mut value)?;
        if read != length as usize {
            return Err(ConvertError::malformed(format!(
                "value of {} truncated: expected {} bytes, got {}",
                dictionary::tag_hex(self.tag),
                length,
                read
            )));
        }
        Ok(value)
    }

    fn read_file_meta(&mut self) -> Result<()> {
        loop {
            let mut raw = [0u8; 4];
            if !self.read_tag_bytes(&mut raw)? {
                break;
            }
            if LittleEndian::read_u16(&raw[0..2]) != 0x0002 {
                self.pending_tag = Some(raw);
                break;
            }
            self.parse_header(raw)?;
            let value = self.read_value_bytes()?;
            self.file_meta.set_bytes(self.tag, self.vr, value);
        }
        let transfer_syntax = self
            .file_meta
            .string(TRANSFER_SYNTAX_UID)
            .unwrap_or_else(|| IMPLICIT_VR_LITTLE_ENDIAN.to_string());
        self.apply_transfer_syntax(&transfer_syntax);
        Ok(())
    }

    fn apply_transfer_syntax(&mut self, uid: &str) {
        let (explicit_vr, big_endian) = match uid {
            IMPLICIT_VR_LITTLE_ENDIAN => (false, false),
            EXPLICIT_VR_BIG_ENDIAN => (true, true),
            DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN => {
                self.inflate();
                (true, false)
            }
            // Encapsulated syntaxes all use explicit VR little endian
            _ => (true, false),
        };
        self.explicit_vr = explicit_vr;
        self.big_endian = big_endian;
        self.transfer_syntax = uid.to_string();
    }

    /// Everything after the meta information is a raw deflate stream.
    fn inflate(&mut self) {
        let prefix = self
            .pending_tag
            .take()
            .map(|raw| raw.to_vec())
            .unwrap_or_default();
        let inner = std::mem::replace(&mut self.input, Box::new(io::empty()));
        self.input = Box::new(DeflateDecoder::new(Cursor::new(prefix).chain(inner)));
    }

    fn read_attributes(
        &mut self,
        handler: &mut dyn ParseHandler,
        attrs: &mut Attributes,
        bound: Bound,
    ) -> Result<()> {
        loop {
            if let Bound::Position(end) = bound {
                if self.position >= end {
                    return Ok(());
                }
            }
            let mut raw = [0u8; 4];
            if !self.read_tag_bytes(&mut raw)? {
                return match bound {
                    Bound::EndOfStream => Ok(()),
                    _ => Err(ConvertError::malformed("unexpected end of stream inside item")),
                };
            }
            self.parse_header(raw)?;
            match self.tag {
                ITEM_DELIMITATION_ITEM => {
                    if let Bound::Delimited = bound {
                        return Ok(());
                    }
                    // Stray delimiter inside a defined-length item
                    continue;
                }
                ITEM | SEQUENCE_DELIMITATION_ITEM => {
                    return Err(ConvertError::malformed(format!(
                        "unexpected {} outside a sequence",
                        dictionary::tag_hex(self.tag)
                    )));
                }
                _ => {}
            }
            trace!(
                tag = %dictionary::tag_hex(self.tag),
                vr = %self.vr,
                length = self.length,
                "Element"
            );
            let value_end = self.value_end();
            handler.on_element(self, attrs)?;
            if let Some(end) = value_end {
                self.skip_to(end)?;
            }
        }
    }

    fn read_sequence(
        &mut self,
        handler: &mut dyn ParseHandler,
        charset: SpecificCharacterSet,
        length: u32,
    ) -> Result<()> {
        let end = (length != UNDEFINED_LENGTH).then(|| self.position + length as u64);
        let mut number = 0;
        loop {
            if let Some(end) = end {
                if self.position >= end {
                    return Ok(());
                }
            }
            let mut raw = [0u8; 4];
            if !self.read_tag_bytes(&mut raw)? {
                return Err(ConvertError::malformed("unexpected end of stream inside sequence"));
            }
            self.parse_header(raw)?;
            match self.tag {
                SEQUENCE_DELIMITATION_ITEM => return Ok(()),
                ITEM => {
                    number += 1;
                    let item = Item {
                        number,
                        length: self.length,
                        charset,
                        end: self.value_end(),
                    };
                    handler.on_item(self, &item)?;
                    if let Some(end) = item.end {
                        self.skip_to(end)?;
                    }
                }
                other => {
                    return Err(ConvertError::malformed(format!(
                        "expected item in sequence, found {}",
                        dictionary::tag_hex(other)
                    )));
                }
            }
        }
    }

    /// Undefined-length UN holds a sequence encoded in implicit VR little endian.
    fn read_implicit_sequence(
        &mut self,
        handler: &mut dyn ParseHandler,
        charset: SpecificCharacterSet,
    ) -> Result<()> {
        let saved = (self.explicit_vr, self.big_endian);
        self.explicit_vr = false;
        self.big_endian = false;
        let result = self.read_sequence(handler, charset, UNDEFINED_LENGTH);
        (self.explicit_vr, self.big_endian) = saved;
        result
    }

    fn read_fragments(&mut self, handler: &mut dyn ParseHandler, vr: VR) -> Result<()> {
        let mut number = 0;
        loop {
            let mut raw = [0u8; 4];
            if !self.read_tag_bytes(&mut raw)? {
                return Err(ConvertError::malformed(
                    "unexpected end of stream inside encapsulated value",
                ));
            }
            self.parse_header(raw)?;
            match self.tag {
                SEQUENCE_DELIMITATION_ITEM => return Ok(()),
                ITEM => {
                    let end = self.value_end().ok_or_else(|| {
                        ConvertError::malformed("fragment with undefined length")
                    })?;
                    number += 1;
                    let fragment = Fragment {
                        number,
                        vr,
                        length: self.length,
                    };
                    handler.on_fragment(self, &fragment)?;
                    self.skip_to(end)?;
                }
                other => {
                    return Err(ConvertError::malformed(format!(
                        "expected fragment item, found {}",
                        dictionary::tag_hex(other)
                    )));
                }
            }
        }
    }

    fn value_end(&self) -> Option<u64> {
        (self.length != UNDEFINED_LENGTH).then(|| self.position + self.length as u64)
    }

    fn skip_to(&mut self, end: u64) -> Result<()> {
        if self.position > end {
            return Err(ConvertError::malformed(format!(
                "value overran its declared length by {} bytes",
                self.position - end
            )));
        }
        let remaining = end - self.position;
        if remaining == 0 {
            return Ok(());
        }
        let skipped = io::copy(&mut self.by_ref().take(remaining), &mut io::sink())?;
        if skipped != remaining {
            return Err(ConvertError::malformed("unexpected end of stream while skipping value"));
        }
        Ok(())
    }

    /// Returns `false` on a clean end of stream before the first byte.
    fn read_tag_bytes(&mut self, raw: &mut [u8; 4]) -> Result<bool> {
        if let Some(pending) = self.pending_tag.take() {
            *raw = pending;
            return Ok(true);
        }
        let mut filled = 0;
        while filled < raw.len() {
            let n = match self.read(&mut raw[filled..]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(ConvertError::malformed("truncated element tag"));
            }
            filled += n;
        }
        Ok(true)
    }

    fn parse_header(&mut self, raw: [u8; 4]) -> Result<()> {
        let (group, element) = if self.big_endian {
            (BigEndian::read_u16(&raw[0..2]), BigEndian::read_u16(&raw[2..4]))
        } else {
            (LittleEndian::read_u16(&raw[0..2]), LittleEndian::read_u16(&raw[2..4]))
        };
        self.tag = ((group as u32) << 16) | element as u32;

        if dictionary::is_item_tag(self.tag) {
            self.vr = VR::UN;
            self.length = self.read_length32()?;
            return Ok(());
        }

        if !self.explicit_vr {
            self.vr = dictionary::vr_of(self.tag);
            self.length = self.read_length32()?;
            return Ok(());
        }

        let mut code = [0u8; 2];
        self.read_exact(&mut code).map_err(eof_as_malformed)?;
        self.vr = VR::from_binary(code).ok_or_else(|| {
            ConvertError::malformed(format!(
                "unknown VR {:?} for {}",
                String::from_utf8_lossy(&code),
                dictionary::tag_hex(self.tag)
            ))
        })?;
        if self.vr.has_long_header() {
            let mut reserved = [0u8; 2];
            self.read_exact(&mut reserved).map_err(eof_as_malformed)?;
            self.length = self.read_length32()?;
        } else {
            let length = if self.big_endian {
                ReadBytesExt::read_u16::<BigEndian>(self)
            } else {
                ReadBytesExt::read_u16::<LittleEndian>(self)
            };
            self.length = length.map_err(eof_as_malformed)? as u32;
        }
        Ok(())
    }

    fn read_length32(&mut self) -> Result<u32> {
        let length = if self.big_endian {
            ReadBytesExt::read_u32::<BigEndian>(self)
        } else {
            ReadBytesExt::read_u32::<LittleEndian>(self)
        };
        length.map_err(eof_as_malformed)
    }
}

fn eof_as_malformed(e: io::Error) -> ConvertError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ConvertError::malformed("unexpected end of stream in element header")
    } else {
        ConvertError::Io(e)
    }
}

enum Guess {
    FileMeta,
    Explicit,
    Implicit,
}

/// Encoding of a stream that lacks the preamble, judged from its first header.
fn guess_encoding(head: &[u8]) -> Guess {
    if head.len() < 6 {
        return Guess::Implicit;
    }
    if LittleEndian::read_u16(&head[0..2]) == 0x0002 {
        return Guess::FileMeta;
    }
    match VR::from_binary([head[4], head[5]]) {
        Some(_) => Guess::Explicit,
        None => Guess::Implicit,
    }
}
