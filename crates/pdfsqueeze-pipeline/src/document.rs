//! Document family detection for response headers.

use std::path::Path;

use serde::Serialize;

/// Bytes needed to recognise every supported signature.
pub const SNIFF_LEN: usize = 8;

const PDF_MAGIC: &[u8] = b"%PDF-";
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const TIFF_LE_MAGIC: &[u8] = b"II*\0";
const TIFF_BE_MAGIC: &[u8] = b"MM\0*";

/// Document families the service recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Portable Document Format.
    Pdf,
    /// PNG image.
    Png,
    /// JPEG image.
    Jpeg,
    /// TIFF image.
    Tiff,
    /// Anything else.
    Unknown,
}

impl DocumentKind {
    /// MIME type for the family.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Tiff => "image/tiff",
            Self::Unknown => "application/octet-stream",
        }
    }

    /// Canonical file extension.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Tiff => "tiff",
            Self::Unknown => "bin",
        }
    }

    /// File name suggested to the client for the reduced artifact.
    #[must_use]
    pub fn download_name(self) -> String {
        format!("compressed.{}", self.extension())
    }

    /// Recognise a family from leading bytes.
    #[must_use]
    pub fn sniff(head: &[u8]) -> Option<Self> {
        if head.starts_with(PDF_MAGIC) {
            Some(Self::Pdf)
        } else if head.starts_with(PNG_MAGIC) {
            Some(Self::Png)
        } else if head.starts_with(JPEG_MAGIC) {
            Some(Self::Jpeg)
        } else if head.starts_with(TIFF_LE_MAGIC) || head.starts_with(TIFF_BE_MAGIC) {
            Some(Self::Tiff)
        } else {
            None
        }
    }

    /// Infer a family from a file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "tif" | "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }

    /// Signature first, then the uploaded file name's extension, then `Unknown`.
    #[must_use]
    pub fn detect(head: &[u8], file_name: Option<&str>) -> Self {
        Self::sniff(head)
            .or_else(|| {
                file_name
                    .and_then(|name| Path::new(name).extension())
                    .and_then(|ext| ext.to_str())
                    .and_then(Self::from_extension)
            })
            .unwrap_or(Self::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_win_over_extensions() {
        assert_eq!(
            DocumentKind::detect(b"%PDF-1.7\n", Some("scan.png")),
            DocumentKind::Pdf
        );
        assert_eq!(
            DocumentKind::detect(&[0xFF, 0xD8, 0xFF, 0xE0], None),
            DocumentKind::Jpeg
        );
        assert_eq!(DocumentKind::detect(b"II*\0rest", None), DocumentKind::Tiff);
    }

    #[test]
    fn extension_fallback_then_unknown() {
        assert_eq!(
            DocumentKind::detect(b"????", Some("Report.PDF")),
            DocumentKind::Pdf
        );
        assert_eq!(
            DocumentKind::detect(b"????", Some("notes.txt")),
            DocumentKind::Unknown
        );
        assert_eq!(DocumentKind::detect(b"", None), DocumentKind::Unknown);
        assert_eq!(DocumentKind::Unknown.mime_type(), "application/octet-stream");
    }

    #[test]
    fn download_names_follow_the_family() {
        assert_eq!(DocumentKind::Pdf.download_name(), "compressed.pdf");
        assert_eq!(DocumentKind::Png.download_name(), "compressed.png");
    }
}
