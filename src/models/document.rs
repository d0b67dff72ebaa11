//! Document lifecycle types shared with the persistence facade.
//!
//! The durable document rows live behind stored procedures; the engine only
//! manipulates these status enums, the per-role file slots, and the process
//! history records appended as the pipeline advances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse document status. Monotonic: queued → processing → terminal;
/// once terminal only soft-delete mutates the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Queued,
    Processing,
    Processed,
    Errored,
    Rejected,
    Deleted,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Errored => "errored",
            Self::Rejected => "rejected",
            Self::Deleted => "deleted",
        }
    }

    /// Whether the status admits no further engine transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Errored | Self::Rejected | Self::Deleted)
    }
}

/// Granular processing status mirrored into `process_history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Pending,
    PreAnalyzing,
    Splitting,
    Converting,
    Extracting,
    Scaling,
    PreFiltering,
    Classifying,
    Normalizing,
    Completed,
    Failed,
    Rejected,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PreAnalyzing => "pre_analyzing",
            Self::Splitting => "splitting",
            Self::Converting => "converting",
            Self::Extracting => "extracting",
            Self::Scaling => "scaling",
            Self::PreFiltering => "pre_filtering",
            Self::Classifying => "classifying",
            Self::Normalizing => "normalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }
}

/// Semantic slot a byte stream occupies for a document.
///
/// Files are unique per `(document, role)`; uploading to an occupied role
/// replaces the bytes and the record atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    Original,
    ConvertedPdf,
    LlmOptimized,
    ExtractedText,
    Redacted,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::ConvertedPdf => "converted_pdf",
            Self::LlmOptimized => "llm_optimized",
            Self::ExtractedText => "extracted_text",
            Self::Redacted => "redacted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "original" => Some(Self::Original),
            "converted_pdf" => Some(Self::ConvertedPdf),
            "llm_optimized" => Some(Self::LlmOptimized),
            "extracted_text" => Some(Self::ExtractedText),
            "redacted" => Some(Self::Redacted),
            _ => None,
        }
    }
}

/// Receipt returned by the storage facade after an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub storage_path: String,
    pub content_hash: String,
}

/// Provenance entry stored in a document's private metadata under
/// `sources`, keyed by a short hash of `(source_type, filepath)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub source: String,
    pub filepath: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
}

impl SourceEntry {
    /// Short key for the `sources` map: first 12 hex chars of
    /// sha256(`source_type:filepath`).
    pub fn key(source_type: &str, filepath: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(source_type.as_bytes());
        hasher.update(b":");
        hasher.update(filepath.as_bytes());
        hex::encode(hasher.finalize())[..12].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!DocumentStatus::Processing.is_terminal());
        assert!(DocumentStatus::Processed.is_terminal());
        assert!(DocumentStatus::Rejected.is_terminal());
        assert!(DocumentStatus::Errored.is_terminal());
    }

    #[test]
    fn test_file_role_round_trip() {
        for role in [
            FileRole::Original,
            FileRole::ConvertedPdf,
            FileRole::LlmOptimized,
            FileRole::ExtractedText,
            FileRole::Redacted,
        ] {
            assert_eq!(FileRole::from_str(role.as_str()), Some(role));
        }
        assert_eq!(FileRole::from_str("thumbnail"), None);
    }

    #[test]
    fn test_source_entry_key_is_stable() {
        let a = SourceEntry::key("split", "parent/doc.pdf");
        let b = SourceEntry::key("split", "parent/doc.pdf");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_ne!(a, SourceEntry::key("upload", "parent/doc.pdf"));
    }
}
