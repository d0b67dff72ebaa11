//! MIME family categorization used for pipeline routing.

/// Routing family of an incoming MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeFamily {
    Pdf,
    Image,
    /// Plain-text family: txt, csv, markdown...
    Text,
    Spreadsheet,
    WordProcessing,
    Presentation,
    Email,
    Xps,
    Other,
}

impl MimeFamily {
    /// Families that go through format-conversion before the PDF pipeline.
    pub fn needs_conversion(&self) -> bool {
        matches!(
            self,
            Self::Spreadsheet | Self::WordProcessing | Self::Presentation | Self::Email | Self::Xps
        )
    }
}

/// Categorize a MIME type into its routing family.
pub fn family(mime: &str) -> MimeFamily {
    let mime = mime.to_lowercase();

    if mime == "application/pdf" {
        return MimeFamily::Pdf;
    }
    if mime.starts_with("image/") {
        return MimeFamily::Image;
    }
    if mime.contains("spreadsheet")
        || mime.contains("ms-excel")
        || mime == "text/csv"
        || mime == "application/vnd.oasis.opendocument.spreadsheet"
    {
        return MimeFamily::Spreadsheet;
    }
    if mime.contains("wordprocessingml")
        || mime == "application/msword"
        || mime == "application/vnd.oasis.opendocument.text"
        || mime == "application/rtf"
    {
        return MimeFamily::WordProcessing;
    }
    if mime.contains("presentationml")
        || mime.contains("ms-powerpoint")
        || mime == "application/vnd.oasis.opendocument.presentation"
    {
        return MimeFamily::Presentation;
    }
    if mime == "message/rfc822" || mime.contains("rfc822") || mime == "application/vnd.ms-outlook" {
        return MimeFamily::Email;
    }
    if mime.contains("xps") || mime == "application/oxps" {
        return MimeFamily::Xps;
    }
    if mime.starts_with("text/") {
        return MimeFamily::Text;
    }
    MimeFamily::Other
}

/// File extension used when writing a blob of this MIME type to disk.
pub fn extension_for(mime: &str) -> &'static str {
    match mime.to_lowercase().as_str() {
        "application/pdf" => "pdf",
        "text/html" => "html",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.oasis.opendocument.spreadsheet" => "ods",
        "application/vnd.ms-powerpoint" => "ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "message/rfc822" => "eml",
        "application/oxps" | "application/vnd.ms-xpsdocument" => "xps",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("application/pdf"), "pdf");
        assert_eq!(extension_for("message/rfc822"), "eml");
        assert_eq!(
            extension_for("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
            "xlsx"
        );
        assert_eq!(extension_for("application/x-unknown"), "bin");
    }

    #[test]
    fn test_family_routing() {
        assert_eq!(family("application/pdf"), MimeFamily::Pdf);
        assert_eq!(family("image/png"), MimeFamily::Image);
        assert_eq!(family("IMAGE/JPEG"), MimeFamily::Image);
        assert_eq!(family("text/plain"), MimeFamily::Text);
        assert_eq!(family("text/csv"), MimeFamily::Spreadsheet);
        assert_eq!(
            family("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
            MimeFamily::Spreadsheet
        );
        assert_eq!(family("application/msword"), MimeFamily::WordProcessing);
        assert_eq!(
            family("application/vnd.openxmlformats-officedocument.presentationml.presentation"),
            MimeFamily::Presentation
        );
        assert_eq!(family("message/rfc822"), MimeFamily::Email);
        assert_eq!(family("application/oxps"), MimeFamily::Xps);
        assert_eq!(family("application/zip"), MimeFamily::Other);
    }

    #[test]
    fn test_needs_conversion() {
        assert!(family("application/msword").needs_conversion());
        assert!(family("message/rfc822").needs_conversion());
        assert!(!family("application/pdf").needs_conversion());
        assert!(!family("image/png").needs_conversion());
        assert!(!family("text/plain").needs_conversion());
    }
}
