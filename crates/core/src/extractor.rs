use crate::error::IngestError;
use crate::models::{Document, Page};
use lopdf::Document as PdfDocument;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

const FORM_FEED: char = '\u{000c}';

pub trait PageExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PageExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, IngestError> {
        let document =
            PdfDocument::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            pages.push(Page {
                number: page_no,
                text,
            });
        }

        Ok(pages)
    }
}

/// Plain text sources; pages are separated by form feeds.
#[derive(Default)]
pub struct PlainTextExtractor;

impl PageExtractor for PlainTextExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, IngestError> {
        let raw = fs::read_to_string(path)?;
        Ok(split_form_feeds(&raw))
    }
}

fn split_form_feeds(raw: &str) -> Vec<Page> {
    raw.split(FORM_FEED)
        .enumerate()
        .map(|(index, text)| Page {
            number: (index + 1) as u32,
            text: text.to_string(),
        })
        .collect()
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<Page>, IngestError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("pdf") => LopdfExtractor.extract_pages(path),
        Some("txt") => PlainTextExtractor.extract_pages(path),
        _ => Err(IngestError::InvalidArgument(format!(
            "unsupported source file: {}",
            path.display()
        ))),
    }
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Loads one source file as a [`Document`] whose id is its path relative to `root`.
pub fn load_document(root: &Path, path: &Path) -> Result<Document, IngestError> {
    let title = path
        .file_stem()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    let pages = extract_page_texts(path)?;
    if pages.iter().all(|page| page.text.trim().is_empty()) {
        return Err(IngestError::EmptyDocument(path.display().to_string()));
    }

    Ok(Document {
        document_id: document_id(root, path),
        title: title.to_string(),
        source_path: path.to_string_lossy().to_string(),
        checksum: digest_file(path)?,
        pages,
    })
}

fn document_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
