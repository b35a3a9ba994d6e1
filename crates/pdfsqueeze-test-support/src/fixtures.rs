//! Payload fixtures and multipart body builders.

const PDF_HEADER: &[u8] = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n";
const PDF_TRAILER: &[u8] = b"\n%%EOF\n";
const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];

/// A PDF-looking payload of exactly `size` bytes (at least header plus trailer).
#[must_use]
pub fn sample_pdf(size: usize) -> Vec<u8> {
    let filler = size.saturating_sub(PDF_HEADER.len() + PDF_TRAILER.len());
    let mut bytes = Vec::with_capacity(PDF_HEADER.len() + filler + PDF_TRAILER.len());
    bytes.extend_from_slice(PDF_HEADER);
    bytes.extend((0..filler).map(|index| b"0123456789 obj stream\n"[index % 22]));
    bytes.extend_from_slice(PDF_TRAILER);
    bytes
}

/// A PNG-signed payload of `size` bytes.
#[must_use]
pub fn sample_png(size: usize) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.resize(size.max(PNG_SIGNATURE.len()), 0);
    bytes
}

/// Builder for `multipart/form-data` request bodies.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBody {
    /// Start an empty body with a fixed boundary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            boundary: "pdfsqueeze-test-boundary".to_string(),
            body: Vec::new(),
        }
    }

    /// Append a file part.
    #[must_use]
    pub fn file(mut self, field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Append a plain text part.
    #[must_use]
    pub fn text(mut self, field: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self
    }

    /// `Content-Type` header value for this body.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Close the body and return its bytes.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body
    }
}

impl Default for MultipartBody {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_pdf_has_exact_size_and_magic() {
        let pdf = sample_pdf(2 * 1024 * 1024);
        assert_eq!(pdf.len(), 2 * 1024 * 1024);
        assert!(pdf.starts_with(b"%PDF-"));
        assert!(pdf.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn sample_png_is_signed() {
        let png = sample_png(64);
        assert_eq!(png.len(), 64);
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn multipart_body_is_terminated() {
        let body = MultipartBody::new()
            .text("note", "hello")
            .file("file", "a.pdf", "application/pdf", b"%PDF-1.4");
        let content_type = body.content_type();
        let bytes = body.finish();
        let text = String::from_utf8_lossy(&bytes);
        assert!(content_type.ends_with("pdfsqueeze-test-boundary"));
        assert!(text.contains("filename=\"a.pdf\""));
        assert!(text.ends_with("--pdfsqueeze-test-boundary--\r\n"));
    }
}
