use mountdav_core::ContentTypes;

/// Extension-based MIME lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct MimeGuessTypes;

impl ContentTypes for MimeGuessTypes {
    fn content_type_for(&self, file_name: &str) -> String {
        mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let types = MimeGuessTypes;
        assert_eq!(types.content_type_for("report.pdf"), "application/pdf");
        assert_eq!(types.content_type_for("notes.TXT"), "text/plain");
        assert_eq!(types.content_type_for("blob"), "application/octet-stream");
    }
}
