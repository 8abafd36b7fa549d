use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tracing::info;

use super::VectorStore;
use super::filter::{ResolvedFilter, indexed_timestamp, resolve_filter};
use crate::models::document::{
    ChunkedDocument, DateField, DocumentChunk, DocumentChunkMetadata, DocumentChunkWithScore, DocumentMetadata,
    DocumentMetadataFilter, MetadataField, QueryResult, QueryWithEmbedding,
};

const TABLE: &str = "document_chunks";

/// PostgreSQL with pgvector. Metadata lives in typed columns so filters
/// become plain `WHERE` clauses.
pub struct PostgresStore {
    pool: PgPool,
    ivfflat_probes: u32,
    dimensions: u32,
}

/// A bind parameter produced by filter translation.
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Text(String),
    TextArray(Vec<String>),
    Float(f64),
}

impl PostgresStore {
    pub async fn new(uri: &str, pool_size: u32, ivfflat_probes: u32, dimensions: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(uri)
            .await?;

        info!("Created Postgres store connection pool (size={pool_size})");

        Ok(Self {
            pool,
            ivfflat_probes,
            dimensions,
        })
    }
}

fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",")
    )
}

/// Translate a filter (and optional document ids) into `WHERE` conditions
/// whose placeholders start at `$first_param`.
fn build_conditions(
    filter: Option<&ResolvedFilter>,
    ids: Option<&[String]>,
    first_param: usize,
) -> (Vec<String>, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    let mut push = |clause: &dyn Fn(usize) -> String, value: SqlValue| {
        clauses.push(clause(first_param + values.len()));
        values.push(value);
    };

    if let Some(ids) = ids.filter(|ids| !ids.is_empty()) {
        push(&|n| format!("document_id = ANY(${n})"), SqlValue::TextArray(ids.to_vec()));
    }

    if let Some(filter) = filter {
        for (field, value) in &filter.equals {
            let column = field.column();
            push(&|n| format!("{column} = ${n}"), SqlValue::Text(value.clone()));
        }
        for range in &filter.ranges {
            let column = range.field.key();
            if let Some(gte) = range.gte {
                push(&|n| format!("{column} >= to_timestamp(${n})"), SqlValue::Float(gte as f64));
            }
            if let Some(lte) = range.lte {
                push(&|n| format!("{column} <= to_timestamp(${n})"), SqlValue::Float(lte as f64));
            }
        }
    }

    (clauses, values)
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    values: &'q [SqlValue],
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    for value in values {
        query = match value {
            SqlValue::Text(s) => query.bind(s),
            SqlValue::TextArray(v) => query.bind(v),
            SqlValue::Float(f) => query.bind(*f),
        };
    }
    query
}

fn row_to_chunk(row: &PgRow) -> Result<DocumentChunkWithScore, sqlx::Error> {
    let text = |col: &str| row.try_get::<Option<String>, _>(col);
    Ok(DocumentChunkWithScore {
        chunk: DocumentChunk {
            id: Some(row.try_get("id")?),
            text: row.try_get("content")?,
            metadata: DocumentChunkMetadata {
                document: DocumentMetadata {
                    name: text("name")?,
                    parents: text("parents")?,
                    mime_type: text("mime_type")?,
                    original_file_source: text("original_file_source")?,
                    original_owners_name: text("original_owners_name")?,
                    original_modified_time: text("original_modified_time")?,
                    original_owners_email: text("original_owners_email")?,
                    original_created_time: text("original_created_time")?,
                },
                document_id: text("document_id")?,
            },
            embedding: None,
        },
        score: row.try_get("similarity")?,
    })
}

#[async_trait]
impl VectorStore for PostgresStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;
        info!("Enabled pgvector extension");

        let create_sql = format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                content TEXT NOT NULL,
                name TEXT,
                parents TEXT,
                mime_type TEXT,
                original_file_source TEXT,
                original_owners_name TEXT,
                original_owners_email TEXT,
                original_created_time TEXT,
                original_modified_time TEXT,
                created_at TIMESTAMP WITH TIME ZONE,
                modified_at TIMESTAMP WITH TIME ZONE,
                embedding vector({}) NOT NULL
            )",
            self.dimensions
        );
        sqlx::query(&create_sql).execute(&self.pool).await?;

        for column in ["document_id", "created_at", "modified_at"] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{TABLE}_{column} ON {TABLE}({column})"
            ))
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{TABLE}_embedding ON {TABLE}
             USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)"
        ))
        .execute(&self.pool)
        .await?;
        info!("{TABLE} table ready with vector({})", self.dimensions);

        Ok(())
    }

    async fn upsert_chunks(&self, documents: &[ChunkedDocument]) -> anyhow::Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let mut rows = 0usize;

        for doc in documents {
            for chunk in &doc.chunks {
                let id = chunk
                    .id
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("Chunk of document {} has no id", doc.document_id))?;
                let embedding = chunk
                    .embedding
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("Chunk {id} has no embedding"))?;
                let meta = &chunk.metadata;
                let created_at = indexed_timestamp(meta, DateField::Created).map(|t| t as f64);
                let modified_at = indexed_timestamp(meta, DateField::Modified).map(|t| t as f64);

                sqlx::query(&format!(
                    "INSERT INTO {TABLE} (id, document_id, content, name, parents, mime_type,
                        original_file_source, original_owners_name, original_owners_email,
                        original_created_time, original_modified_time, created_at, modified_at, embedding)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                        to_timestamp($12), to_timestamp($13), $14::vector)
                     ON CONFLICT (id) DO UPDATE SET
                        document_id = EXCLUDED.document_id,
                        content = EXCLUDED.content,
                        name = EXCLUDED.name,
                        parents = EXCLUDED.parents,
                        mime_type = EXCLUDED.mime_type,
                        original_file_source = EXCLUDED.original_file_source,
                        original_owners_name = EXCLUDED.original_owners_name,
                        original_owners_email = EXCLUDED.original_owners_email,
                        original_created_time = EXCLUDED.original_created_time,
                        original_modified_time = EXCLUDED.original_modified_time,
                        created_at = EXCLUDED.created_at,
                        modified_at = EXCLUDED.modified_at,
                        embedding = EXCLUDED.embedding"
                ))
                .bind(id)
                .bind(&doc.document_id)
                .bind(&chunk.text)
                .bind(meta.get(MetadataField::Name))
                .bind(meta.get(MetadataField::Parents))
                .bind(meta.get(MetadataField::MimeType))
                .bind(meta.get(MetadataField::OriginalFileSource))
                .bind(meta.get(MetadataField::OriginalOwnersName))
                .bind(meta.get(MetadataField::OriginalOwnersEmail))
                .bind(meta.get(MetadataField::OriginalCreatedTime))
                .bind(meta.get(MetadataField::OriginalModifiedTime))
                .bind(created_at)
                .bind(modified_at)
                .bind(vector_literal(embedding))
                .execute(&mut *tx)
                .await?;
                rows += 1;
            }
        }

        tx.commit().await?;
        info!("Wrote {rows} chunks for {} documents", documents.len());

        Ok(documents.iter().map(|d| d.document_id.clone()).collect())
    }

    async fn query_embeddings(&self, queries: &[QueryWithEmbedding]) -> anyhow::Result<Vec<QueryResult>> {
        let mut results = Vec::with_capacity(queries.len());

        for q in queries {
            let filter = resolve_filter(q.query.filter.as_ref())?;
            let (clauses, values) = build_conditions(filter.as_ref(), None, 3);
            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", clauses.join(" AND "))
            };
            let sql = format!(
                "SELECT id, document_id, content, name, parents, mime_type, original_file_source,
                        original_owners_name, original_owners_email, original_created_time,
                        original_modified_time,
                        1 - (embedding <=> $1::vector) AS similarity
                 FROM {TABLE}
                 {where_sql}
                 ORDER BY embedding <=> $1::vector
                 LIMIT $2"
            );

            // Probes only apply inside the transaction that sets them.
            let mut tx = self.pool.begin().await?;
            sqlx::query(&format!("SET LOCAL ivfflat.probes = {}", self.ivfflat_probes))
                .execute(&mut *tx)
                .await?;

            let embedding = vector_literal(&q.embedding);
            let query = sqlx::query(&sql).bind(&embedding).bind(q.query.top_k as i64);
            let rows = bind_all(query, &values).fetch_all(&mut *tx).await?;
            tx.commit().await?;

            let chunks = rows.iter().map(row_to_chunk).collect::<Result<Vec<_>, _>>()?;
            results.push(QueryResult {
                query: q.query.query.clone(),
                results: chunks,
            });
        }

        Ok(results)
    }

    async fn delete(
        &self,
        ids: Option<&[String]>,
        filter: Option<&DocumentMetadataFilter>,
        delete_all: bool,
    ) -> anyhow::Result<bool> {
        if delete_all {
            sqlx::query(&format!("DELETE FROM {TABLE}")).execute(&self.pool).await?;
            info!("Deleted all chunks");
            return Ok(true);
        }

        let filter = resolve_filter(filter)?;
        for (filter, ids) in [(None, ids), (filter.as_ref(), None)] {
            let (clauses, values) = build_conditions(filter, ids, 1);
            if clauses.is_empty() {
                continue;
            }
            let sql = format!("DELETE FROM {TABLE} WHERE {}", clauses.join(" AND "));
            let result = bind_all(sqlx::query(&sql), &values).execute(&self.pool).await?;
            info!("Deleted {} chunks", result.rows_affected());
        }

        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "postgres"
    }
}
