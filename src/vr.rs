//! Encoding rules that `dicom_core::VR` does not carry itself: header
//! width, inline binary, charset applicability and value rendering.

use crate::charset::SpecificCharacterSet;
pub use dicom_core::VR;
use memchr::memchr_iter;

/// Rendering and layout rules per value representation.
pub trait VrExt: Copy {
    fn has_long_header(self) -> bool;
    fn is_inline_binary(self) -> bool;
    fn is_string_type(self) -> bool;
    fn uses_specific_charset(self) -> bool;
    fn element_size(self) -> usize;
    fn toggle_endian(self, bytes: &mut [u8]);
    fn to_strings(
        self,
        bytes: &[u8],
        big_endian: bool,
        charset: &SpecificCharacterSet,
    ) -> Vec<String>;
}

impl VrExt for VR {
    /// Explicit VR headers for these carry 2 reserved bytes and a 32-bit length
    fn has_long_header(self) -> bool {
        matches!(
            self,
            VR::OB
                | VR::OD
                | VR::OF
                | VR::OL
                | VR::OV
                | VR::OW
                | VR::SQ
                | VR::SV
                | VR::UC
                | VR::UN
                | VR::UR
                | VR::UT
                | VR::UV
        )
    }

    fn is_inline_binary(self) -> bool {
        matches!(
            self,
            VR::OB | VR::OD | VR::OF | VR::OL | VR::OV | VR::OW | VR::UN
        )
    }

    fn is_string_type(self) -> bool {
        matches!(
            self,
            VR::AE
                | VR::AS
                | VR::CS
                | VR::DA
                | VR::DS
                | VR::DT
                | VR::IS
                | VR::LO
                | VR::LT
                | VR::PN
                | VR::SH
                | VR::ST
                | VR::TM
                | VR::UC
                | VR::UI
                | VR::UR
                | VR::UT
        )
    }

    /// Only these VRs are affected by (0008,0005) Specific Character Set.
    fn uses_specific_charset(self) -> bool {
        matches!(
            self,
            VR::SH | VR::LO | VR::ST | VR::LT | VR::UT | VR::PN | VR::UC
        )
    }

    /// Size of one binary value, used for byte swapping and multiplicity.
    fn element_size(self) -> usize {
        match self {
            VR::AT | VR::OW | VR::SS | VR::US => 2,
            VR::FL | VR::OF | VR::OL | VR::SL | VR::UL => 4,
            VR::FD | VR::OD | VR::OV | VR::SV | VR::UV => 8,
            _ => 1,
        }
    }

    /// Reverses the byte order of every binary value in place.
    fn toggle_endian(self, bytes: &mut [u8]) {
        let size = self.element_size();
        if size < 2 {
            return;
        }
        for chunk in bytes.chunks_exact_mut(size) {
            chunk.reverse();
        }
    }

    /// Splits raw value bytes into textual components.
    ///
    /// String VRs are decoded with `charset` (or as ASCII when the VR ignores
    /// the character set), split on backslash unless single-valued and stripped
    /// of padding. Binary numeric VRs yield one component per value. Empty
    /// components are kept as empty strings so numbering stays positional.
    fn to_strings(
        self,
        bytes: &[u8],
        big_endian: bool,
        charset: &SpecificCharacterSet,
    ) -> Vec<String> {
        if self.is_string_type() {
            let text = if self.uses_specific_charset() {
                charset.decode(bytes)
            } else {
                SpecificCharacterSet::ascii().decode(bytes)
            };
            if is_single_valued_text(self) {
                return vec![trim_text(&text).to_string()];
            }
            return split_values(&text)
                .into_iter()
                .map(|v| trim_value(v).to_string())
                .collect();
        }
        match self {
            VR::AT => numbers(bytes, 4, |b| {
                let group = u16::from_le_bytes(endian_array::<2>(b, big_endian));
                let element = u16::from_le_bytes(endian_array::<2>(&b[2..], big_endian));
                format!("{:04X}{:04X}", group, element)
            }),
            VR::US => numbers(bytes, 2, |b| {
                let v = endian_array::<2>(b, big_endian);
                itoa::Buffer::new().format(u16::from_le_bytes(v)).to_string()
            }),
            VR::SS => numbers(bytes, 2, |b| {
                let v = endian_array::<2>(b, big_endian);
                itoa::Buffer::new().format(i16::from_le_bytes(v)).to_string()
            }),
            VR::UL => numbers(bytes, 4, |b| {
                let v = endian_array::<4>(b, big_endian);
                itoa::Buffer::new().format(u32::from_le_bytes(v)).to_string()
            }),
            VR::SL => numbers(bytes, 4, |b| {
                let v = endian_array::<4>(b, big_endian);
                itoa::Buffer::new().format(i32::from_le_bytes(v)).to_string()
            }),
            VR::UV => numbers(bytes, 8, |b| {
                let v = endian_array::<8>(b, big_endian);
                itoa::Buffer::new().format(u64::from_le_bytes(v)).to_string()
            }),
            VR::SV => numbers(bytes, 8, |b| {
                let v = endian_array::<8>(b, big_endian);
                itoa::Buffer::new().format(i64::from_le_bytes(v)).to_string()
            }),
            VR::FL => numbers(bytes, 4, |b| {
                f32::from_le_bytes(endian_array::<4>(b, big_endian)).to_string()
            }),
            VR::FD => numbers(bytes, 8, |b| {
                f64::from_le_bytes(endian_array::<8>(b, big_endian)).to_string()
            }),
            // Binary blobs and sequences carry no textual components
            _ => Vec::new(),
        }
    }
}

/// Text VRs hold exactly one value; a backslash is ordinary content.
fn is_single_valued_text(vr: VR) -> bool {
    matches!(vr, VR::LT | VR::ST | VR::UT | VR::UR)
}

/// Copies `N` bytes into little-endian order.
fn endian_array<const N: usize>(b: &[u8], big_endian: bool) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&b[..N]);
    if big_endian {
        out.reverse();
    }
    out
}

fn numbers(bytes: &[u8], size: usize, render: impl Fn(&[u8]) -> String) -> Vec<String> {
    bytes.chunks_exact(size).map(render).collect()
}

fn split_values(text: &str) -> Vec<&str> {
    let mut values = Vec::new();
    let mut start = 0;
    for pos in memchr_iter(b'\\', text.as_bytes()) {
        values.push(&text[start..pos]);
        start = pos + 1;
    }
    values.push(&text[start..]);
    values
}

fn trim_value(value: &str) -> &str {
    value.trim_matches(|c: char| c == ' ' || c == '\0')
}

fn trim_text(value: &str) -> &str {
    value.trim_end_matches(|c: char| c == ' ' || c == '\0')
}
