//! Tag constants, tag predicates and lookups into the standard data
//! dictionary.
//!
//! The dictionary resolves keywords for the `keyword` XML attribute and
//! supplies VRs when decoding implicit VR transfer syntaxes. Unknown tags
//! fall back to `UN` and get no keyword.

use crate::vr::VR;
use dicom_core::dictionary::DataDictionary;
use dicom_core::Tag;
use dicom_dictionary_std::StandardDataDictionary;

pub const FILE_META_GROUP_LENGTH: u32 = 0x0002_0000;
pub const TRANSFER_SYNTAX_UID: u32 = 0x0002_0010;
pub const SPECIFIC_CHARACTER_SET: u32 = 0x0008_0005;
pub const SOP_CLASS_UID: u32 = 0x0008_0016;
pub const PATIENT_NAME: u32 = 0x0010_0010;
pub const PATIENT_ID: u32 = 0x0010_0020;
pub const PIXEL_DATA: u32 = 0x7FE0_0010;

pub const ITEM: u32 = 0xFFFE_E000;
pub const ITEM_DELIMITATION_ITEM: u32 = 0xFFFE_E00D;
pub const SEQUENCE_DELIMITATION_ITEM: u32 = 0xFFFE_E0DD;

pub fn group(tag: u32) -> u16 {
    (tag >> 16) as u16
}

pub fn element(tag: u32) -> u16 {
    (tag & 0xFFFF) as u16
}

/// Eight uppercase hex digits, as used by the `tag` XML attribute.
pub fn tag_hex(tag: u32) -> String {
    format!("{:08X}", tag)
}

pub fn is_group_length(tag: u32) -> bool {
    element(tag) == 0
}

pub fn is_private(tag: u32) -> bool {
    group(tag) & 1 == 1
}

/// (gggg,0010)-(gggg,00FF) in an odd group reserve a private block.
pub fn is_private_creator(tag: u32) -> bool {
    is_private(tag) && (0x0010..=0x00FF).contains(&element(tag))
}

/// Tag of the creator element owning a private data element, if any.
pub fn private_creator_tag(tag: u32) -> Option<u32> {
    if !is_private(tag) {
        return None;
    }
    let block = element(tag) >> 8;
    if block < 0x10 {
        return None;
    }
    Some((tag & 0xFFFF_0000) | block as u32)
}

pub fn is_item_tag(tag: u32) -> bool {
    matches!(
        tag,
        ITEM | ITEM_DELIMITATION_ITEM | SEQUENCE_DELIMITATION_ITEM
    )
}

static DICTIONARY: StandardDataDictionary = StandardDataDictionary;

type Entry = <StandardDataDictionary as DataDictionary>::Entry;

fn lookup(tag: u32) -> Option<&'static Entry> {
    DICTIONARY.by_tag(Tag(group(tag), element(tag)))
}

/// Keyword of a standard element. Private elements never resolve.
pub fn keyword_of(tag: u32, private_creator: Option<&str>) -> Option<&'static str> {
    if is_private(tag) || private_creator.is_some() {
        return None;
    }
    if is_group_length(tag) && tag != FILE_META_GROUP_LENGTH {
        return None;
    }
    lookup(tag).map(|entry| entry.alias)
}

/// VR implied by the dictionary for implicit VR encodings.
///
/// Context-dependent entries (US or SS, OB or OW) resolve to their relaxed
/// default.
pub fn vr_of(tag: u32) -> VR {
    if is_group_length(tag) {
        return VR::UL;
    }
    if is_private_creator(tag) {
        return VR::LO;
    }
    if is_private(tag) {
        return VR::UN;
    }
    lookup(tag).map(|entry| entry.vr.relaxed()).unwrap_or(VR::UN)
}
