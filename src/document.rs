//! Uploaded documents and text extraction.

use crate::error::{KihubError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    PlainText,
    Pdf,
}

impl DocumentFormat {
    /// Guess the format from a file name.
    pub fn detect(name: &str) -> Result<Self> {
        let mime = mime_guess::from_path(name).first_or_octet_stream();
        debug!(name, mime = %mime, "Detected MIME type");

        if mime.type_() == mime_guess::mime::APPLICATION && mime.subtype() == mime_guess::mime::PDF {
            Ok(DocumentFormat::Pdf)
        } else if mime.type_() == mime_guess::mime::TEXT {
            Ok(DocumentFormat::PlainText)
        } else {
            Err(KihubError::UnsupportedFormat(format!(
                "{} ({}). Only text and PDF files are supported.",
                name, mime
            )))
        }
    }
}

impl std::str::FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "txt" | "text" | "plaintext" => Ok(DocumentFormat::PlainText),
            "pdf" => Ok(DocumentFormat::Pdf),
            _ => Err(format!("Unknown document format: {}", s)),
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentFormat::PlainText => write!(f, "text"),
            DocumentFormat::Pdf => write!(f, "pdf"),
        }
    }
}

/// Raw upload as received from the caller.
#[derive(Debug, Clone)]
pub struct DocumentPayload {
    /// Display name, usually the file name.
    pub name: String,
    pub bytes: Vec<u8>,
    /// Declared format. Detected from `name` when absent.
    pub format: Option<DocumentFormat>,
    /// Stable id to reuse (re-ingestion). A fresh UUID is assigned when absent.
    pub id: Option<String>,
}

impl DocumentPayload {
    /// Create a payload from in-memory bytes.
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            format: None,
            id: None,
        }
    }

    /// Read a payload from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| KihubError::InvalidArgument(format!("Invalid file name: {}", path.display())))?
            .to_string();
        let bytes = std::fs::read(path)?;
        Ok(Self::new(name, bytes))
    }

    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A document with its extracted text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_name: String,
    pub text: String,
    pub format: DocumentFormat,
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    /// Extract the text of a payload.
    pub fn from_payload(payload: DocumentPayload) -> Result<Self> {
        let format = match payload.format {
            Some(format) => format,
            None => DocumentFormat::detect(&payload.name)?,
        };

        let text = match format {
            DocumentFormat::PlainText => String::from_utf8(payload.bytes).map_err(|e| {
                KihubError::DocumentExtraction(format!("{} is not valid UTF-8: {}", payload.name, e))
            })?,
            DocumentFormat::Pdf => {
                let raw = pdf_extract::extract_text_from_mem(&payload.bytes).map_err(|e| {
                    KihubError::DocumentExtraction(format!("{}: {}", payload.name, e))
                })?;
                let cleaned = normalize_whitespace(&raw);
                if cleaned.is_empty() {
                    warn!(name = %payload.name, "Extracted PDF content is empty");
                }
                cleaned
            }
        };

        Ok(Self {
            id: payload
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            source_name: payload.name,
            text,
            format,
            uploaded_at: Utc::now(),
        })
    }
}

/// Collapse runs of spaces and blank lines left behind by PDF extraction.
pub fn normalize_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut newlines = 0;
    let mut prev = ' ';

    for c in text.chars().filter(|c| *c != '\r') {
        if c == '\n' {
            newlines += 1;
            continue;
        }
        if newlines > 0 {
            normalized.push_str(if newlines >= 2 { "\n\n" } else { "\n" });
            newlines = 0;
            prev = '\n';
        }
        if c == ' ' && (prev == ' ' || prev == '\n') {
            continue;
        }
        normalized.push(c);
        prev = c;
    }

    normalized.trim().to_string()
}
