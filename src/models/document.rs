use serde::{Deserialize, Serialize};

/// Caller-supplied metadata attached to a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_owners_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_modified_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_owners_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_created_time: Option<String>,
}

impl DocumentMetadata {
    /// Fill every unset field from `other`, keeping existing values.
    pub fn merge_missing(&mut self, other: DocumentMetadata) {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.is_none() {
                *slot = value;
            }
        }
        fill(&mut self.name, other.name);
        fill(&mut self.parents, other.parents);
        fill(&mut self.mime_type, other.mime_type);
        fill(&mut self.original_file_source, other.original_file_source);
        fill(&mut self.original_owners_name, other.original_owners_name);
        fill(&mut self.original_modified_time, other.original_modified_time);
        fill(&mut self.original_owners_email, other.original_owners_email);
        fill(&mut self.original_created_time, other.original_created_time);
    }
}

/// Metadata stamped on every chunk: the document's metadata plus its id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunkMetadata {
    #[serde(flatten)]
    pub document: DocumentMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl DocumentChunkMetadata {
    pub fn get(&self, field: MetadataField) -> Option<&str> {
        let d = &self.document;
        match field {
            MetadataField::DocumentId => self.document_id.as_deref(),
            MetadataField::Name => d.name.as_deref(),
            MetadataField::Parents => d.parents.as_deref(),
            MetadataField::MimeType => d.mime_type.as_deref(),
            MetadataField::OriginalFileSource => d.original_file_source.as_deref(),
            MetadataField::OriginalOwnersName => d.original_owners_name.as_deref(),
            MetadataField::OriginalOwnersEmail => d.original_owners_email.as_deref(),
            MetadataField::OriginalCreatedTime => d.original_created_time.as_deref(),
            MetadataField::OriginalModifiedTime => d.original_modified_time.as_deref(),
        }
    }
}

/// Structured metadata fields that support equality filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataField {
    DocumentId,
    Name,
    Parents,
    MimeType,
    OriginalFileSource,
    OriginalOwnersName,
    OriginalOwnersEmail,
    OriginalCreatedTime,
    OriginalModifiedTime,
}

impl MetadataField {
    pub const ALL: [MetadataField; 9] = [
        MetadataField::DocumentId,
        MetadataField::Name,
        MetadataField::Parents,
        MetadataField::MimeType,
        MetadataField::OriginalFileSource,
        MetadataField::OriginalOwnersName,
        MetadataField::OriginalOwnersEmail,
        MetadataField::OriginalCreatedTime,
        MetadataField::OriginalModifiedTime,
    ];

    /// Key used in JSON payloads.
    pub fn key(self) -> &'static str {
        match self {
            MetadataField::DocumentId => "document_id",
            MetadataField::Name => "name",
            MetadataField::Parents => "parents",
            MetadataField::MimeType => "mimeType",
            MetadataField::OriginalFileSource => "originalFileSource",
            MetadataField::OriginalOwnersName => "originalOwnersName",
            MetadataField::OriginalOwnersEmail => "originalOwnersEmail",
            MetadataField::OriginalCreatedTime => "originalCreatedTime",
            MetadataField::OriginalModifiedTime => "originalModifiedTime",
        }
    }

    /// Column name in SQL backends.
    pub fn column(self) -> &'static str {
        match self {
            MetadataField::DocumentId => "document_id",
            MetadataField::Name => "name",
            MetadataField::Parents => "parents",
            MetadataField::MimeType => "mime_type",
            MetadataField::OriginalFileSource => "original_file_source",
            MetadataField::OriginalOwnersName => "original_owners_name",
            MetadataField::OriginalOwnersEmail => "original_owners_email",
            MetadataField::OriginalCreatedTime => "original_created_time",
            MetadataField::OriginalModifiedTime => "original_modified_time",
        }
    }
}

/// Timestamps that support range filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Created,
    Modified,
}

impl DateField {
    /// Key under which backends index the unix timestamp.
    pub fn key(self) -> &'static str {
        match self {
            DateField::Created => "created_at",
            DateField::Modified => "modified_at",
        }
    }

    /// Metadata field the timestamp is derived from.
    pub fn source(self) -> MetadataField {
        match self {
            DateField::Created => MetadataField::OriginalCreatedTime,
            DateField::Modified => MetadataField::OriginalModifiedTime,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub metadata: Option<DocumentMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    pub metadata: DocumentChunkMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunkWithScore {
    #[serde(flatten)]
    pub chunk: DocumentChunk,
    pub score: f64,
}

/// All chunks produced from one document, keyed by the document id.
#[derive(Debug, Clone)]
pub struct ChunkedDocument {
    pub document_id: String,
    pub chunks: Vec<DocumentChunk>,
}

/// Filter over chunk metadata. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadataFilter {
    #[serde(default, rename = "document_id", skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_owners_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_modified_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_owners_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_created_time: Option<String>,
    /// Any common date string format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time_start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time_end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time_start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time_end_date: Option<String>,
}

impl DocumentMetadataFilter {
    pub fn for_document(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
            ..Default::default()
        }
    }

    pub fn get(&self, field: MetadataField) -> Option<&str> {
        match field {
            MetadataField::DocumentId => self.document_id.as_deref(),
            MetadataField::Name => self.name.as_deref(),
            MetadataField::Parents => self.parents.as_deref(),
            MetadataField::MimeType => self.mime_type.as_deref(),
            MetadataField::OriginalFileSource => self.original_file_source.as_deref(),
            MetadataField::OriginalOwnersName => self.original_owners_name.as_deref(),
            MetadataField::OriginalOwnersEmail => self.original_owners_email.as_deref(),
            MetadataField::OriginalCreatedTime => self.original_created_time.as_deref(),
            MetadataField::OriginalModifiedTime => self.original_modified_time.as_deref(),
        }
    }

    /// (start, end) bounds for a date field.
    pub fn date_bounds(&self, field: DateField) -> (Option<&str>, Option<&str>) {
        match field {
            DateField::Created => (
                self.created_time_start_date.as_deref(),
                self.created_time_end_date.as_deref(),
            ),
            DateField::Modified => (
                self.modified_time_start_date.as_deref(),
                self.modified_time_end_date.as_deref(),
            ),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub query: String,
    #[serde(default)]
    pub filter: Option<DocumentMetadataFilter>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone)]
pub struct QueryWithEmbedding {
    pub query: Query,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub results: Vec<DocumentChunkWithScore>,
}
