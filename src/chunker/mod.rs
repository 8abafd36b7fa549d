use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::models::document::{ChunkedDocument, Document, DocumentChunk, DocumentChunkMetadata};

/// Tokens a decode may trim from either edge of a window that was cut inside
/// a multi-byte character.
const MAX_PARTIAL_TOKENS: usize = 3;

/// Tunables for token-window chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkingSettings {
    /// Target size of each chunk in tokens.
    pub chunk_token_size: usize,
    /// Tokens shared between consecutive windows.
    pub chunk_overlap: usize,
    /// A chunk is cut at its last sentence boundary only past this many characters.
    pub min_chunk_size_chars: usize,
    /// Chunks with this many characters or fewer are discarded.
    pub min_chunk_length_to_embed: usize,
    /// Upper bound on windows taken from one text; the rest becomes one chunk.
    pub max_num_chunks: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_token_size: 200,
            chunk_overlap: 0,
            min_chunk_size_chars: 350,
            min_chunk_length_to_embed: 5,
            max_num_chunks: 10_000,
        }
    }
}

/// Splits documents into token-bounded chunks using the `cl100k_base` encoding.
pub struct Chunker {
    bpe: CoreBPE,
    settings: ChunkingSettings,
}

impl Chunker {
    pub fn new(settings: ChunkingSettings) -> anyhow::Result<Self> {
        if settings.chunk_token_size == 0 {
            anyhow::bail!("chunk_token_size must be positive");
        }
        if settings.chunk_overlap >= settings.chunk_token_size {
            anyhow::bail!(
                "chunk_overlap ({}) must be smaller than chunk_token_size ({})",
                settings.chunk_overlap,
                settings.chunk_token_size
            );
        }
        let bpe = tiktoken_rs::cl100k_base()?;
        Ok(Self { bpe, settings })
    }

    /// Split a text into chunks of at most `chunk_token_size` tokens, preferring
    /// to end each chunk on a sentence or line boundary.
    pub fn get_text_chunks(&self, text: &str, chunk_token_size: Option<usize>) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        let chunk_size = chunk_token_size
            .filter(|size| *size > 0)
            .unwrap_or(self.settings.chunk_token_size);
        let overlap = self.settings.chunk_overlap.min(chunk_size - 1);

        let tokens = self.bpe.encode_ordinary(text);
        let mut chunks = Vec::new();
        let mut pos = 0;
        let mut num_chunks = 0;

        while pos < tokens.len() && num_chunks < self.settings.max_num_chunks {
            let window_end = pos.saturating_add(chunk_size).min(tokens.len());
            let Some((start, end, window_text)) = self.decode_window(&tokens[pos..window_end])
            else {
                debug!("Skipping undecodable token window at {pos}");
                pos = window_end;
                continue;
            };
            let window_start = pos + start;
            let window_len = end - start;

            if window_text.trim().is_empty() {
                pos = window_start + window_len;
                continue;
            }

            let chunk_text =
                truncate_at_boundary(&window_text, self.settings.min_chunk_size_chars);
            let cleaned = chunk_text.replace('\n', " ");
            let cleaned = cleaned.trim();
            if cleaned.chars().count() > self.settings.min_chunk_length_to_embed {
                chunks.push(cleaned.to_string());
            }

            let consumed = self
                .bpe
                .encode_ordinary(chunk_text)
                .len()
                .clamp(1, window_len);
            pos = if window_start + consumed >= tokens.len() {
                tokens.len()
            } else if consumed > overlap {
                window_start + consumed - overlap
            } else {
                window_start + consumed
            };
            num_chunks += 1;
        }

        if pos < tokens.len() {
            if let Some((_, _, rest)) = self.decode_window(&tokens[pos..]) {
                let rest = rest.replace('\n', " ");
                let rest = rest.trim();
                if rest.chars().count() > self.settings.min_chunk_length_to_embed {
                    chunks.push(rest.to_string());
                }
            }
        }

        chunks
    }

    /// Chunk one document. Returns its chunks and its id, generated when absent.
    pub fn create_document_chunks(
        &self,
        document: &Document,
        chunk_token_size: Option<usize>,
    ) -> (Vec<DocumentChunk>, String) {
        let document_id = document
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if document.text.trim().is_empty() {
            return (vec![], document_id);
        }

        let metadata = DocumentChunkMetadata {
            document: document.metadata.clone().unwrap_or_default(),
            document_id: Some(document_id.clone()),
        };

        let chunks = self
            .get_text_chunks(&document.text, chunk_token_size)
            .into_iter()
            .enumerate()
            .map(|(i, text)| DocumentChunk {
                id: Some(format!("{document_id}_{i}")),
                text,
                metadata: metadata.clone(),
                embedding: None,
            })
            .collect();

        (chunks, document_id)
    }

    /// Chunk a batch of documents, preserving input order.
    pub fn get_document_chunks(
        &self,
        documents: &[Document],
        chunk_token_size: Option<usize>,
    ) -> Vec<ChunkedDocument> {
        documents
            .iter()
            .map(|doc| {
                let (chunks, document_id) = self.create_document_chunks(doc, chunk_token_size);
                ChunkedDocument { document_id, chunks }
            })
            .collect()
    }

    /// Decode a token window, trimming up to `MAX_PARTIAL_TOKENS` from either
    /// edge when the cut splits a character. Returns the decoded range.
    fn decode_window(&self, window: &[usize]) -> Option<(usize, usize, String)> {
        for skip in 0..=MAX_PARTIAL_TOKENS {
            for trim in 0..=MAX_PARTIAL_TOKENS {
                if skip + trim >= window.len() {
                    break;
                }
                let end = window.len() - trim;
                if let Ok(text) = self.bpe.decode(window[skip..end].to_vec()) {
                    return Some((skip, end, text));
                }
            }
        }
        None
    }
}

/// Cut `text` after its last `.`, `?`, `!` or newline when that boundary lies
/// beyond `min_chars` characters.
fn truncate_at_boundary(text: &str, min_chars: usize) -> &str {
    match text.rfind(['.', '?', '!', '\n']) {
        Some(idx) if text[..idx].chars().count() > min_chars => &text[..=idx],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::DocumentMetadata;

    fn chunker(settings: ChunkingSettings) -> Chunker {
        Chunker::new(settings).unwrap()
    }

    fn long_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Sentence number {i} talks about soil, water and sunlight."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_and_whitespace() {
        let c = chunker(ChunkingSettings::default());
        assert!(c.get_text_chunks("", None).is_empty());
        assert!(c.get_text_chunks("   \n\t ", None).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let c = chunker(ChunkingSettings::default());
        let chunks = c.get_text_chunks("Hello world.\nThis is a test.", None);
        assert_eq!(chunks, vec!["Hello world. This is a test."]);
    }

    #[test]
    fn test_tiny_chunks_discarded() {
        let c = chunker(ChunkingSettings::default());
        assert!(c.get_text_chunks("hey", None).is_empty());
    }

    #[test]
    fn test_chunks_respect_token_limit() {
        let c = chunker(ChunkingSettings::default());
        let text = long_text(200);
        let chunks = c.get_text_chunks(&text, Some(50));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(c.bpe.encode_ordinary(chunk).len() <= 50);
        }
    }

    #[test]
    fn test_chunks_end_on_sentence_boundary() {
        let c = chunker(ChunkingSettings {
            min_chunk_size_chars: 20,
            ..Default::default()
        });
        let text = long_text(100);
        let chunks = c.get_text_chunks(&text, Some(60));
        // Every chunk but the trailing one is cut after a period.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.ends_with('.'), "chunk not cut at boundary: {chunk}");
        }
    }

    #[test]
    fn test_overlap_repeats_tokens() {
        let text = long_text(100);
        let plain = chunker(ChunkingSettings::default()).get_text_chunks(&text, Some(40));
        let overlapping = chunker(ChunkingSettings {
            chunk_overlap: 10,
            ..Default::default()
        })
        .get_text_chunks(&text, Some(40));
        assert!(overlapping.len() > plain.len());

        // The tail of one chunk reappears at the head of the next.
        let first_tail: String = overlapping[0]
            .split_whitespace()
            .last()
            .unwrap()
            .to_string();
        assert!(overlapping[1].contains(&first_tail));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_window() {
        let result = Chunker::new(ChunkingSettings {
            chunk_token_size: 10,
            chunk_overlap: 10,
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_max_num_chunks_keeps_remainder() {
        let c = chunker(ChunkingSettings {
            max_num_chunks: 2,
            ..Default::default()
        });
        let text = long_text(100);
        let chunks = c.get_text_chunks(&text, Some(20));
        // Two windows plus one trailing chunk holding everything else.
        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].len() > chunks[0].len());
    }

    #[test]
    fn test_multibyte_text_round_trips() {
        let c = chunker(ChunkingSettings::default());
        let text = "Cây sầu riêng cần nhiều nước và ánh nắng. ".repeat(60);
        let chunks = c.get_text_chunks(&text, Some(25));
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(!chunk.contains('\u{FFFD}'));
        }
    }

    #[test]
    fn test_multibyte_text_with_overlap_makes_progress() {
        let c = chunker(ChunkingSettings {
            chunk_overlap: 5,
            min_chunk_size_chars: 10,
            ..Default::default()
        });
        let text = "榴莲树在旱季需要每周浇水🌳💧。稻田在春天被淹没🌾。".repeat(40);
        let chunks = c.get_text_chunks(&text, Some(20));
        assert!(chunks.len() > 1);
        // Each window advances by at least one token, so the count stays bounded.
        assert!(chunks.len() <= c.bpe.encode_ordinary(&text).len());
        for chunk in &chunks {
            assert!(!chunk.is_empty());
            assert!(!chunk.contains('\u{FFFD}'), "broken character in {chunk}");
        }
    }

    #[test]
    fn test_huge_chunk_size_does_not_overflow() {
        let c = chunker(ChunkingSettings::default());
        let text = format!("{} and a trailing clause with no terminator", long_text(200));
        let chunks = c.get_text_chunks(&text, Some(usize::MAX));
        assert!(!chunks.is_empty());
        assert!(chunks.last().unwrap().ends_with("no terminator"));
    }

    #[test]
    fn test_create_document_chunks_ids_and_metadata() {
        let c = chunker(ChunkingSettings::default());
        let doc = Document {
            id: Some("doc1".to_string()),
            text: long_text(80),
            metadata: Some(DocumentMetadata {
                name: Some("notes.txt".to_string()),
                ..Default::default()
            }),
        };
        let (chunks, id) = c.create_document_chunks(&doc, Some(40));
        assert_eq!(id, "doc1");
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id.as_deref(), Some(format!("doc1_{i}").as_str()));
            assert_eq!(chunk.metadata.document_id.as_deref(), Some("doc1"));
            assert_eq!(chunk.metadata.document.name.as_deref(), Some("notes.txt"));
            assert!(chunk.embedding.is_none());
        }
    }

    #[test]
    fn test_create_document_chunks_generates_id() {
        let c = chunker(ChunkingSettings::default());
        let doc = Document {
            id: None,
            text: "   ".to_string(),
            metadata: None,
        };
        let (chunks, id) = c.create_document_chunks(&doc, None);
        assert!(chunks.is_empty());
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_get_document_chunks_preserves_order() {
        let c = chunker(ChunkingSettings::default());
        let docs = vec![
            Document {
                id: Some("b".to_string()),
                text: "Second document body text.".to_string(),
                metadata: None,
            },
            Document {
                id: Some("a".to_string()),
                text: "First document body text.".to_string(),
                metadata: None,
            },
        ];
        let chunked = c.get_document_chunks(&docs, None);
        let ids: Vec<_> = chunked.iter().map(|d| d.document_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(chunked[0].chunks.len(), 1);
    }

    #[test]
    fn test_truncate_at_boundary() {
        assert_eq!(truncate_at_boundary("abc. def", 1), "abc.");
        assert_eq!(truncate_at_boundary("abc. def", 10), "abc. def");
        assert_eq!(truncate_at_boundary("no boundary", 0), "no boundary");
    }
}
