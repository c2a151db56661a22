//! DOCX templates: placeholder discovery and substitution.
//!
//! A template is an OOXML word-processing package (a zip archive). Only the
//! main part `word/document.xml` is read and rewritten; every other part is
//! copied into the output byte for byte.

mod filler;
mod paragraph;
mod scanner;

use std::collections::BTreeSet;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::models::FormValues;

const DOCUMENT_PART: &str = "word/document.xml";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("template is not a valid document package: {0}")]
    TemplateMalformed(String),
    #[error("failed to read template: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write filled document: {0}")]
    Write(#[source] std::io::Error),
}

impl From<zip::result::ZipError> for DocumentError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::TemplateMalformed(err.to_string())
    }
}

/// An opened template held in memory.
#[derive(Debug, Clone)]
pub struct DocxPackage {
    archive: Vec<u8>,
    document_xml: String,
}

impl DocxPackage {
    pub fn open(path: &Path) -> Result<Self, DocumentError> {
        let bytes = std::fs::read(path).map_err(DocumentError::Read)?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(archive: Vec<u8>) -> Result<Self, DocumentError> {
        let document_xml = {
            let mut zip = ZipArchive::new(Cursor::new(archive.as_slice()))?;
            let mut xml = String::new();
            zip.by_name(DOCUMENT_PART)
                .map_err(|_| DocumentError::TemplateMalformed(format!("missing {DOCUMENT_PART}")))?
                .read_to_string(&mut xml)
                .map_err(|e| DocumentError::TemplateMalformed(e.to_string()))?;
            xml
        };

        // Fail on unparsable XML at open time rather than halfway through a job.
        paragraph::parse(&document_xml)?;

        Ok(Self {
            archive,
            document_xml,
        })
    }

    pub fn document_xml(&self) -> &str {
        &self.document_xml
    }

    /// Distinct placeholder names in body paragraphs and table cells.
    pub fn placeholders(&self) -> Result<BTreeSet<String>, DocumentError> {
        let part = paragraph::parse(&self.document_xml)?;
        Ok(scanner::scan_paragraphs(&part.paragraphs))
    }

    /// Substitutes `{{key}}` tokens with form values and returns how many were replaced.
    pub fn fill(&mut self, values: &FormValues) -> Result<usize, DocumentError> {
        let part = paragraph::parse(&self.document_xml)?;
        let (xml, count) = filler::fill_part(&part, values)?;
        self.document_xml = xml;
        Ok(count)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        let mut source = ZipArchive::new(Cursor::new(self.archive.as_slice()))?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for index in 0..source.len() {
            let entry = source.by_index_raw(index)?;
            if entry.name() == DOCUMENT_PART {
                writer.start_file(
                    DOCUMENT_PART,
                    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
                )?;
                writer
                    .write_all(self.document_xml.as_bytes())
                    .map_err(DocumentError::Write)?;
            } else {
                writer.raw_copy_file(entry)?;
            }
        }

        Ok(writer.finish()?.into_inner())
    }

    /// Writes the package to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(DocumentError::Write)
    }
}

/// Opens the document at `path` and lists its placeholders.
pub fn scan(path: &Path) -> Result<BTreeSet<String>, DocumentError> {
    DocxPackage::open(path)?.placeholders()
}

/// Fills the template at `source` and writes the result to `destination`.
///
/// `source` is only read.
pub fn fill(source: &Path, destination: &Path, values: &FormValues) -> Result<usize, DocumentError> {
    let mut package = DocxPackage::open(source)?;
    let count = package.fill(values)?;
    package.save(destination)?;
    Ok(count)
}
