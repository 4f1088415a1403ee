//! External collaborator interfaces.
//!
//! The embedding model and the generative answering model are black boxes to
//! this crate: callers supply anything implementing [`Embedder`] and
//! [`Generator`], whether that wraps a local model, a remote API, or a test
//! double. Both are expected to carry their own timeouts; the pipeline treats
//! an erroring boundary call as a stage failure, never a hang.

use tracing::warn;

use crate::error::{RagError, Result};

/// Maps raw content (a text query or a content reference) to a fixed-length
/// embedding vector.
pub trait Embedder {
    /// Encode one piece of content.
    ///
    /// # Errors
    /// `EncodingFailed` when the model rejects or cannot process the content.
    fn encode_one(&self, content: &str) -> Result<Vec<f32>>;

    /// Encode a batch, tolerating individual failures.
    ///
    /// # Returns
    /// The successful embeddings in input order, plus the input indices they
    /// came from. Failed items are logged and skipped, never fatal to the
    /// batch.
    fn encode_many(&self, contents: &[String]) -> (Vec<Vec<f32>>, Vec<usize>) {
        let mut embeddings = Vec::with_capacity(contents.len());
        let mut valid_indices = Vec::with_capacity(contents.len());
        for (i, content) in contents.iter().enumerate() {
            match self.encode_one(content) {
                Ok(embedding) => {
                    embeddings.push(embedding);
                    valid_indices.push(i);
                }
                Err(e) => warn!(index = i, "skipping item that failed to embed: {e}"),
            }
        }
        (embeddings, valid_indices)
    }
}

/// Produces a generated answer for one retrieved item.
#[allow(async_fn_in_trait)]
pub trait Generator {
    /// Generate text for `content_ref` in response to `query_text`, with
    /// `context_text` describing how the item was retrieved (e.g. its
    /// similarity score).
    ///
    /// # Errors
    /// `GenerationFailed` for a per-item failure; the pipeline records it and
    /// continues with the remaining items.
    async fn generate(
        &self,
        content_ref: &str,
        query_text: &str,
        context_text: &str,
    ) -> Result<String>;
}

/// Coerce an arbitrary boundary error into the embedding-stage taxonomy.
pub(crate) fn as_encoding_failure(e: RagError) -> RagError {
    match e {
        RagError::EncodingFailed(_) => e,
        other => RagError::EncodingFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EvenOnly;

    impl Embedder for EvenOnly {
        fn encode_one(&self, content: &str) -> Result<Vec<f32>> {
            if content.len() % 2 == 0 {
                Ok(vec![content.len() as f32, 1.0])
            } else {
                Err(RagError::EncodingFailed(format!("odd length: {content}")))
            }
        }
    }

    #[test]
    fn test_encode_many_skips_failures() {
        let contents = vec!["ab".to_string(), "abc".to_string(), "abcd".to_string()];
        let (embeddings, valid) = EvenOnly.encode_many(&contents);
        assert_eq!(embeddings.len(), 2);
        assert_eq!(valid, vec![0, 2]);
        assert_eq!(embeddings[0][0], 2.0);
        assert_eq!(embeddings[1][0], 4.0);
    }
}
