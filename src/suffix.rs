use crate::config::DEFAULT_SUFFIX;

#[rustfmt::skip]
const SOP_CLASS_SUFFIXES: &[(&str, &str)] = &[
    ("1.2.840.10008.5.1.4.1.1.104.1", ".pdf"), // Encapsulated PDF
    ("1.2.840.10008.5.1.4.1.1.104.2", ".xml"), // Encapsulated CDA
    ("1.2.840.10008.5.1.4.1.1.104.3", ".stl"),
    ("1.2.840.10008.5.1.4.1.1.104.4", ".obj"),
    ("1.2.840.10008.5.1.4.1.1.104.5", ".mtl"),
];

/// File suffix for bulk data of the given SOP class
pub fn suffix_for_sop_class(sop_class: &str) -> &'static str {
    SOP_CLASS_SUFFIXES
        .iter()
        .find(|(uid, _)| *uid == sop_class)
        .map(|(_, suffix)| *suffix)
        .unwrap_or(DEFAULT_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encapsulated_pdf_maps_to_pdf() {
        assert_eq!(suffix_for_sop_class("1.2.840.10008.5.1.4.1.1.104.1"), ".pdf");
    }

    #[test]
    fn unmapped_classes_default_to_jpg() {
        assert_eq!(suffix_for_sop_class("1.2.840.10008.5.1.4.1.1.77.1.4"), ".jpg");
        assert_eq!(suffix_for_sop_class(""), ".jpg");
    }

    #[test]
    fn other_encapsulated_documents() {
        assert_eq!(suffix_for_sop_class("1.2.840.10008.5.1.4.1.1.104.2"), ".xml");
        assert_eq!(suffix_for_sop_class("1.2.840.10008.5.1.4.1.1.104.3"), ".stl");
    }
}
