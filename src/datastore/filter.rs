use thiserror::Error;
use tracing::warn;

use crate::models::document::{DateField, DocumentChunkMetadata, DocumentMetadataFilter, MetadataField};
use crate::services::date::{DateError, to_unix_timestamp};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid date for {field}: {source}")]
    InvalidDate {
        field: &'static str,
        #[source]
        source: DateError,
    },
}

/// Inclusive bounds on one of the indexed timestamps, in unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub field: DateField,
    pub gte: Option<i64>,
    pub lte: Option<i64>,
}

impl DateRange {
    pub fn contains(&self, ts: i64) -> bool {
        self.gte.is_none_or(|gte| ts >= gte) && self.lte.is_none_or(|lte| ts <= lte)
    }
}

/// Backend-neutral form of a `DocumentMetadataFilter`: every condition must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFilter {
    pub equals: Vec<(MetadataField, String)>,
    pub ranges: Vec<DateRange>,
}

impl DocumentMetadataFilter {
    /// Parse date bounds and collect the set equality fields.
    pub fn resolve(&self) -> Result<ResolvedFilter, FilterError> {
        let equals = MetadataField::ALL
            .iter()
            .filter_map(|&field| self.get(field).map(|v| (field, v.to_string())))
            .collect();

        let mut ranges = Vec::new();
        for field in [DateField::Created, DateField::Modified] {
            let (start, end) = self.date_bounds(field);
            if start.is_none() && end.is_none() {
                continue;
            }
            ranges.push(DateRange {
                field,
                gte: parse_bound(field, start)?,
                lte: parse_bound(field, end)?,
            });
        }

        Ok(ResolvedFilter { equals, ranges })
    }
}

fn parse_bound(field: DateField, bound: Option<&str>) -> Result<Option<i64>, FilterError> {
    bound
        .map(|s| {
            to_unix_timestamp(s).map_err(|source| FilterError::InvalidDate {
                field: field.key(),
                source,
            })
        })
        .transpose()
}

/// Resolve an optional filter, treating an empty filter as no filter.
pub fn resolve_filter(filter: Option<&DocumentMetadataFilter>) -> Result<Option<ResolvedFilter>, FilterError> {
    match filter {
        Some(f) => {
            let resolved = f.resolve()?;
            Ok((!resolved.is_empty()).then_some(resolved))
        }
        None => Ok(None),
    }
}

impl ResolvedFilter {
    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.ranges.is_empty()
    }

    /// Evaluate the filter against chunk metadata. Chunks whose date does not
    /// parse never satisfy a range on that date.
    pub fn matches(&self, metadata: &DocumentChunkMetadata) -> bool {
        let equals_ok = self
            .equals
            .iter()
            .all(|(field, value)| metadata.get(*field) == Some(value.as_str()));
        equals_ok
            && self.ranges.iter().all(|range| {
                metadata
                    .get(range.field.source())
                    .and_then(|s| to_unix_timestamp(s).ok())
                    .is_some_and(|ts| range.contains(ts))
            })
    }
}

/// Unix timestamp to index for `field`, or None when the metadata date is
/// missing or unparseable (logged, left unindexed).
pub fn indexed_timestamp(metadata: &DocumentChunkMetadata, field: DateField) -> Option<i64> {
    let raw = metadata.get(field.source())?;
    match to_unix_timestamp(raw) {
        Ok(ts) => Some(ts),
        Err(e) => {
            warn!(
                "Not indexing {} for document {}: {e}",
                field.key(),
                metadata.document_id.as_deref().unwrap_or("<unknown>")
            );
            None
        }
    }
}
