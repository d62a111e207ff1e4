use crate::error::IngestError;
use lopdf::Document;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    PlainText,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("pdf") => Ok(Self::Pdf),
            Some("txt") => Ok(Self::PlainText),
            _ => Err(IngestError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfText {
    pub text: String,
    pub scanned: bool,
}

pub trait PdfExtractor {
    /// Never fails: unreadable documents come back empty and flagged as scanned.
    fn extract(&self, path: &Path) -> PdfText;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract(&self, path: &Path) -> PdfText {
        let document = match Document::load(path) {
            Ok(document) => document,
            Err(error) => {
                warn!(path = %path.display(), %error, "pdf could not be parsed");
                return PdfText {
                    text: String::new(),
                    scanned: true,
                };
            }
        };

        let mut text = String::new();
        let mut scanned = false;

        for (page_no, page_id) in document.get_pages() {
            let page_text = document.extract_text(&[page_no]).unwrap_or_else(|error| {
                debug!(page = page_no, %error, "page text extraction failed");
                String::new()
            });

            if page_text.trim().is_empty() {
                let has_images = document
                    .get_page_images(page_id)
                    .map(|images| !images.is_empty())
                    .unwrap_or(false);
                if has_images {
                    debug!(page = page_no, "page has images but no text");
                    scanned = true;
                }
            } else {
                text.push_str(&page_text);
                text.push('\n');
            }
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            scanned = true;
        }

        PdfText { text, scanned }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextEncoding {
    Utf8,
    Utf16,
    Latin1,
}

const TEXT_ENCODINGS: [TextEncoding; 3] =
    [TextEncoding::Utf8, TextEncoding::Utf16, TextEncoding::Latin1];

fn try_decode(bytes: &[u8], encoding: TextEncoding) -> Option<String> {
    match encoding {
        TextEncoding::Utf8 => {
            let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            std::str::from_utf8(bytes).ok().map(str::to_string)
        }
        TextEncoding::Utf16 => {
            let (body, little_endian) = if let Some(rest) = bytes.strip_prefix(b"\xFF\xFE") {
                (rest, true)
            } else if let Some(rest) = bytes.strip_prefix(b"\xFE\xFF") {
                (rest, false)
            } else {
                return None;
            };
            if body.len() % 2 != 0 {
                return None;
            }
            let units = body
                .chunks_exact(2)
                .map(|pair| {
                    if little_endian {
                        u16::from_le_bytes([pair[0], pair[1]])
                    } else {
                        u16::from_be_bytes([pair[0], pair[1]])
                    }
                })
                .collect::<Vec<_>>();
            String::from_utf16(&units).ok()
        }
        TextEncoding::Latin1 => Some(bytes.iter().map(|&byte| char::from(byte)).collect()),
    }
}

/// Decodes with the first encoding in the fallback list that accepts the bytes.
pub fn decode_text(bytes: &[u8]) -> String {
    TEXT_ENCODINGS
        .iter()
        .find_map(|encoding| {
            let decoded = try_decode(bytes, *encoding);
            if decoded.is_some() && *encoding != TextEncoding::Utf8 {
                debug!(?encoding, "decoded text with fallback encoding");
            }
            decoded
        })
        .unwrap_or_default()
}

pub fn extract_text_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    Ok(decode_text(&bytes))
}

pub fn accept_extracted(
    filename: &str,
    text: String,
    scanned: bool,
) -> Result<String, IngestError> {
    if text.trim().is_empty() {
        if scanned {
            return Err(IngestError::ScannedDocumentUnsupported(filename.to_string()));
        }
        return Err(IngestError::EmptyDocument(filename.to_string()));
    }
    Ok(text)
}

pub fn extract_document(
    path: &Path,
    format: DocumentFormat,
    pdf: &dyn PdfExtractor,
) -> Result<String, IngestError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    match format {
        DocumentFormat::Pdf => {
            let PdfText { text, scanned } = pdf.extract(path);
            accept_extracted(filename, text, scanned)
        }
        DocumentFormat::PlainText => accept_extracted(filename, extract_text_file(path)?, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Object};
    use tempfile::tempdir;

    #[test]
    fn format_is_chosen_by_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/Report.PDF")).ok(),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("notes.txt")).ok(),
            Some(DocumentFormat::PlainText)
        );
        assert!(matches!(
            DocumentFormat::from_path(Path::new("slides.docx")),
            Err(IngestError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            DocumentFormat::from_path(Path::new("README")),
            Err(IngestError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn utf8_text_decodes_directly() {
        let text = "আমার সোনার বাংলা";
        assert_eq!(decode_text(text.as_bytes()), text);
        assert_eq!(decode_text(b"\xEF\xBB\xBFhello"), "hello");
    }

    #[test]
    fn invalid_utf8_falls_back_to_latin1() {
        assert_eq!(decode_text(b"caf\xE9 cr\xE8me"), "café crème");
    }

    #[test]
    fn utf16_with_bom_is_decoded() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hi there".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_text(&bytes), "hi there");
    }

    #[test]
    fn blank_scanned_text_is_rejected_as_scanned() {
        assert!(matches!(
            accept_extracted("scan.pdf", "  \n".to_string(), true),
            Err(IngestError::ScannedDocumentUnsupported(_))
        ));
        assert!(matches!(
            accept_extracted("blank.txt", "\n\n".to_string(), false),
            Err(IngestError::EmptyDocument(_))
        ));
        assert_eq!(
            accept_extracted("mixed.pdf", "text".to_string(), true).ok().as_deref(),
            Some("text")
        );
    }

    #[test]
    fn unreadable_pdf_is_treated_as_scanned() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let extracted = LopdfExtractor.extract(&path);
        assert!(extracted.scanned);
        assert!(extracted.text.is_empty());

        let result = extract_document(&path, DocumentFormat::Pdf, &LopdfExtractor);
        assert!(matches!(result, Err(IngestError::ScannedDocumentUnsupported(_))));
        Ok(())
    }

    #[test]
    fn pdf_without_page_text_is_treated_as_scanned() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("blank.pdf");

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(&path)?;

        let result = extract_document(&path, DocumentFormat::Pdf, &LopdfExtractor);
        assert!(matches!(result, Err(IngestError::ScannedDocumentUnsupported(_))));
        Ok(())
    }

    #[test]
    fn text_file_is_read_through_the_policy() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.txt");
        fs::write(&path, b"   \n")?;
        assert!(matches!(
            extract_document(&path, DocumentFormat::PlainText, &LopdfExtractor),
            Err(IngestError::EmptyDocument(_))
        ));

        fs::write(&path, b"some words here")?;
        let text = extract_document(&path, DocumentFormat::PlainText, &LopdfExtractor)
            .expect("text file has content");
        assert_eq!(text, "some words here");
        Ok(())
    }
}
