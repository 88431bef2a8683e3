use encoding_rs::Encoding;
use tracing::warn;

/// Character repertoire selected by (0008,0005) Specific Character Set.
///
/// With ISO 2022 code extensions the whole value is decoded with one
/// encoding: ISO-2022-JP when a JIS X 0208 or JIS X 0212 term is declared,
/// EUC-KR or GB18030 for the Korean and Chinese extensions. Escape sequences
/// that the chosen decoder does not interpret are removed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecificCharacterSet {
    encoding: &'static Encoding,
    code_extensions: bool,
}

impl Default for SpecificCharacterSet {
    fn default() -> Self {
        Self::ascii()
    }
}

impl SpecificCharacterSet {
    /// Default repertoire. Latin-1 is a superset of ISO 646.
    pub fn ascii() -> Self {
        Self {
            encoding: encoding_rs::WINDOWS_1252,
            code_extensions: false,
        }
    }

    pub fn from_value(value: &[u8]) -> Self {
        let text = String::from_utf8_lossy(value);
        let terms: Vec<&str> = text
            .split('\\')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        let code_extensions = terms.iter().any(|t| t.starts_with("ISO 2022"));

        // Multi-byte extensions decide the decoder regardless of position
        let term = MULTI_BYTE_EXTENSIONS
            .iter()
            .copied()
            .find(|&ext| terms.contains(&ext))
            .or_else(|| terms.first().copied())
            .unwrap_or("");
        match encoding_for_term(term) {
            Some(encoding) => Self {
                encoding,
                code_extensions,
            },
            None => {
                warn!(term, "Unsupported specific character set, falling back to Latin-1");
                Self::ascii()
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        // ISO-2022-JP interprets its own escapes
        if self.code_extensions && self.encoding != encoding_rs::ISO_2022_JP {
            let stripped = strip_escape_sequences(bytes);
            let (text, _, _) = self.encoding.decode(&stripped);
            return text.into_owned();
        }
        let (text, _, _) = self.encoding.decode(bytes);
        text.into_owned()
    }
}

const MULTI_BYTE_EXTENSIONS: &[&str] = &[
    "ISO 2022 IR 87",
    "ISO 2022 IR 159",
    "ISO 2022 IR 149",
    "ISO 2022 IR 58",
];

const ESC: u8 = 0x1B;
const SHIFT_OUT: u8 = 0x0E;
const SHIFT_IN: u8 = 0x0F;

/// Drops ISO 2022 escape sequences (ESC, intermediates 0x20-0x2F, one final
/// byte) and locking shifts.
fn strip_escape_sequences(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            ESC => {
                i += 1;
                while i < bytes.len() && (0x20..=0x2F).contains(&bytes[i]) {
                    i += 1;
                }
                i += 1;
            }
            SHIFT_OUT | SHIFT_IN => i += 1,
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

fn encoding_for_term(term: &str) -> Option<&'static Encoding> {
    let encoding = match term {
        "" | "ISO_IR 6" | "ISO 2022 IR 6" | "ISO_IR 100" | "ISO 2022 IR 100" => {
            encoding_rs::WINDOWS_1252
        }
        "ISO_IR 101" | "ISO 2022 IR 101" => encoding_rs::ISO_8859_2,
        "ISO_IR 109" | "ISO 2022 IR 109" => encoding_rs::ISO_8859_3,
        "ISO_IR 110" | "ISO 2022 IR 110" => encoding_rs::ISO_8859_4,
        "ISO_IR 144" | "ISO 2022 IR 144" => encoding_rs::ISO_8859_5,
        "ISO_IR 127" | "ISO 2022 IR 127" => encoding_rs::ISO_8859_6,
        "ISO_IR 126" | "ISO 2022 IR 126" => encoding_rs::ISO_8859_7,
        "ISO_IR 138" | "ISO 2022 IR 138" => encoding_rs::ISO_8859_8,
        "ISO_IR 148" | "ISO 2022 IR 148" => encoding_rs::WINDOWS_1254,
        "ISO_IR 166" | "ISO 2022 IR 166" => encoding_rs::WINDOWS_874,
        "ISO_IR 13" | "ISO 2022 IR 13" => encoding_rs::SHIFT_JIS,
        "ISO 2022 IR 87" | "ISO 2022 IR 159" => encoding_rs::ISO_2022_JP,
        "ISO 2022 IR 149" => encoding_rs::EUC_KR,
        "ISO 2022 IR 58" | "GB18030" => encoding_rs::GB18030,
        "GBK" => encoding_rs::GBK,
        "ISO_IR 192" => encoding_rs::UTF_8,
        _ => return None,
    };
    Some(encoding)
}
