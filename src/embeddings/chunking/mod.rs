
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::RagConfig;
use crate::embeddings::Embedding;
use crate::vector::{Metadata, VectorDocument};

/// A bounded fragment of a longer document, the unit of retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// `<parent_document_id>_chunk_<chunk_index>`
    pub id: String,
    pub parent_document_id: String,
    pub content: String,
    /// Empty until the vector store generates it
    pub embedding: Embedding,
    /// Parent metadata plus `chunkIndex` and `parentDocument`
    pub metadata: Metadata,
    /// Zero-based and contiguous within one parent
    pub chunk_index: usize,
    /// Final chunk count for the parent, identical on every chunk
    pub total_chunks: usize,
    pub timestamp: Option<i64>,
}

impl From<DocumentChunk> for VectorDocument {
    #[inline]
    fn from(chunk: DocumentChunk) -> Self {
        Self {
            id: chunk.id,
            content: chunk.content,
            embedding: chunk.embedding,
            metadata: Some(chunk.metadata),
            timestamp: chunk.timestamp,
        }
    }
}

/// Splits documents into overlapping, sentence-aligned chunks.
///
/// Sizes are measured in characters. Packing is single-pass and deterministic:
/// identical input and configuration always produce identical boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DocumentChunker {
    #[inline]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    #[inline]
    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Chunk a single document
    #[inline]
    pub fn chunk_document(&self, document: &VectorDocument) -> Vec<DocumentChunk> {
        if char_len(&document.content) <= self.chunk_size {
            return vec![self.build_chunk(document, document.content.clone(), 0, 1)];
        }

        let pieces = self.pack_sentences(&document.content);
        let mut chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(index, content)| self.build_chunk(document, content, index, 0))
            .collect();

        // Back-fill once the final count is known
        let total_chunks = chunks.len();
        for chunk in &mut chunks {
            chunk.total_chunks = total_chunks;
        }

        debug!(
            "Chunked document '{}' ({} chars) into {} chunks",
            document.id,
            char_len(&document.content),
            total_chunks
        );

        chunks
    }

    /// Chunk every document, concatenating the results in input order
    #[inline]
    pub fn chunk_documents(&self, documents: &[VectorDocument]) -> Vec<DocumentChunk> {
        documents
            .iter()
            .flat_map(|document| self.chunk_document(document))
            .collect()
    }

    /// Greedily pack sentences into chunks, seeding each new chunk with an overlap suffix
    fn pack_sentences(&self, content: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut buffer = String::new();

        for sentence in split_sentences(content) {
            let separator = usize::from(!buffer.is_empty());
            let candidate_len = char_len(&buffer) + separator + char_len(&sentence);

            if candidate_len > self.chunk_size && !buffer.is_empty() {
                let overlap = overlap_suffix(&buffer, self.chunk_overlap);
                pieces.push(std::mem::take(&mut buffer));
                if !overlap.is_empty() {
                    buffer.push_str(&overlap);
                    buffer.push(' ');
                }
                buffer.push_str(&sentence);
            } else {
                if !buffer.is_empty() {
                    buffer.push(' ');
                }
                buffer.push_str(&sentence);
            }
        }

        if !buffer.trim().is_empty() {
            pieces.push(buffer);
        }

        pieces
    }

    fn build_chunk(
        &self,
        document: &VectorDocument,
        content: String,
        chunk_index: usize,
        total_chunks: usize,
    ) -> DocumentChunk {
        let mut metadata = document.metadata.clone().unwrap_or_default();
        metadata.insert("chunkIndex".to_string(), Value::from(chunk_index));
        metadata.insert(
            "parentDocument".to_string(),
            Value::String(document.id.clone()),
        );

        DocumentChunk {
            id: format!("{}_chunk_{}", document.id, chunk_index),
            parent_document_id: document.id.clone(),
            content,
            embedding: Vec::new(),
            metadata,
            chunk_index,
            total_chunks,
            timestamp: document.timestamp,
        }
    }
}

/// Split text into sentence-like units terminated by `.`, `!` or `?`.
/// Runs of terminators stay with their sentence and a trailing unterminated
/// fragment becomes its own unit.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if is_terminator(c) {
            while let Some(&next) = chars.peek() {
                if !is_terminator(next) {
                    break;
                }
                current.push(next);
                chars.next();
            }
            push_trimmed(&mut sentences, &current);
            current.clear();
        }
    }
    push_trimmed(&mut sentences, &current);

    sentences
}

fn push_trimmed(sentences: &mut Vec<String>, sentence: &str) {
    let trimmed = sentence.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
}

const fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// At most `max_chars` from the end of `text`, starting on a word boundary.
/// Falls back to a hard character cut when the window holds no whitespace.
fn overlap_suffix(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.trim().to_string();
    }

    let start = chars.len() - max_chars;
    let window = &chars[start..];

    let aligned = if chars[start - 1].is_whitespace() {
        window
    } else {
        match window.iter().position(|c| c.is_whitespace()) {
            Some(boundary) => &window[boundary + 1..],
            None => window,
        }
    };

    aligned.iter().collect::<String>().trim().to_string()
}

#[inline]
fn char_len(text: &str) -> usize {
    text.chars().count()
}
