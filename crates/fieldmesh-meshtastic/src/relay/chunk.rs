//! Response chunking and reassembly

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::protocol::ChunkFrame;
use crate::config::{RelayConfig, DEFAULT_MAX_CHUNKS, DEFAULT_MAX_PARTIALS};
use crate::error::{MeshtasticError, Result};

/// Split `text` into pieces of at most `max_bytes`, never inside a
/// character. A single character wider than `max_bytes` gets its own piece.
pub fn split_chunks(text: &str, max_bytes: usize) -> Vec<&str> {
    let max = max_bytes.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let mut end = rest.len().min(max);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

struct Partial {
    parts: Vec<Option<String>>,
    received: usize,
    started: Instant,
}

/// Collects chunks per `(req_id, count)` until every index is present
pub struct Reassembler {
    entries: HashMap<(String, u32), Partial>,
    timeout: Duration,
    max_chunks: u32,
    max_partials: usize,
}

impl Reassembler {
    /// Create with an expiry for incomplete responses and default limits
    pub fn new(timeout: Duration) -> Self {
        Self::with_limits(timeout, DEFAULT_MAX_CHUNKS, DEFAULT_MAX_PARTIALS)
    }

    /// Create with explicit bounds on chunk count and held responses
    pub fn with_limits(timeout: Duration, max_chunks: u32, max_partials: usize) -> Self {
        Self {
            entries: HashMap::new(),
            timeout,
            max_chunks: max_chunks.max(1),
            max_partials: max_partials.max(1),
        }
    }

    /// Create from relay settings
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::with_limits(
            config.reassembly_timeout,
            config.max_chunks,
            config.max_partials,
        )
    }

    /// Incomplete responses held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is held
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a chunk; returns the full text once the last index arrives
    pub fn accept(&mut self, chunk: ChunkFrame) -> Result<Option<String>> {
        if chunk.count == 0 || chunk.index >= chunk.count {
            return Err(MeshtasticError::RelayProtocol(format!(
                "chunk {}/{} out of range",
                chunk.index, chunk.count
            )));
        }
        if chunk.count > self.max_chunks {
            return Err(MeshtasticError::RelayProtocol(format!(
                "chunk count {} exceeds {}",
                chunk.count, self.max_chunks
            )));
        }

        let key = (chunk.req_id, chunk.count);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_partials {
            self.evict_oldest();
        }
        let partial = self.entries.entry(key.clone()).or_insert_with(|| Partial {
            parts: vec![None; chunk.count as usize],
            received: 0,
            started: Instant::now(),
        });

        let slot = &mut partial.parts[chunk.index as usize];
        if slot.is_some() {
            trace!(req_id = %key.0, index = chunk.index, "Duplicate chunk");
            return Ok(None);
        }
        *slot = Some(chunk.text);
        partial.received += 1;
        trace!(
            req_id = %key.0,
            received = partial.received,
            count = key.1,
            "Chunk stored"
        );

        if partial.received < partial.parts.len() {
            return Ok(None);
        }

        let text = self
            .entries
            .remove(&key)
            .map(|p| p.parts.into_iter().flatten().collect::<String>());
        Ok(text)
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, partial)| partial.started)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            debug!(req_id = %key.0, "Reassembly evicted, too many partial responses");
            self.entries.remove(&key);
        }
    }

    /// Drop incomplete responses older than the timeout
    pub fn expire(&mut self) -> usize {
        let timeout = self.timeout;
        let before = self.entries.len();
        self.entries.retain(|(req_id, _), partial| {
            let keep = partial.started.elapsed() < timeout;
            if !keep {
                debug!(req_id = %req_id, received = partial.received, "Reassembly expired");
            }
            keep
        });
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(req_id: &str, index: u32, count: u32, text: &str) -> ChunkFrame {
        ChunkFrame {
            req_id: req_id.into(),
            index,
            count,
            text: text.into(),
        }
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "aé€😀b";
        for max in 1..8 {
            let chunks = split_chunks(text, max);
            assert_eq!(chunks.concat(), text);
            for piece in &chunks {
                assert!(piece.len() <= max || piece.chars().count() == 1);
            }
        }
        assert!(split_chunks("", 10).is_empty());
        assert_eq!(split_chunks("abcdef", 4), vec!["abcd", "ef"]);
    }

    #[tokio::test]
    async fn test_reassembly_out_of_order() {
        let mut reassembler = Reassembler::new(Duration::from_secs(120));
        assert_eq!(reassembler.accept(chunk("r1", 2, 3, "c")).unwrap(), None);
        assert_eq!(reassembler.accept(chunk("r1", 0, 3, "a")).unwrap(), None);
        // Same request id with a different count is a separate response
        assert_eq!(reassembler.accept(chunk("r1", 0, 2, "x")).unwrap(), None);
        assert_eq!(
            reassembler.accept(chunk("r1", 1, 3, "b")).unwrap(),
            Some("abc".to_string())
        );
        assert_eq!(reassembler.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicates_idempotent() {
        let mut reassembler = Reassembler::new(Duration::from_secs(120));
        reassembler.accept(chunk("r1", 0, 2, "a")).unwrap();
        assert_eq!(reassembler.accept(chunk("r1", 0, 2, "zzz")).unwrap(), None);
        assert_eq!(
            reassembler.accept(chunk("r1", 1, 2, "b")).unwrap(),
            Some("ab".to_string())
        );
    }

    #[tokio::test]
    async fn test_out_of_range_rejected() {
        let mut reassembler = Reassembler::new(Duration::from_secs(120));
        assert!(reassembler.accept(chunk("r1", 3, 3, "a")).is_err());
        assert!(reassembler.accept(chunk("r1", 0, 0, "a")).is_err());
        assert!(reassembler.is_empty());
    }

    #[tokio::test]
    async fn test_huge_chunk_count_rejected() {
        let mut reassembler = Reassembler::new(Duration::from_secs(120));
        let frame = match crate::relay::RelayFrame::parse("HTTPCHK:r1:0/4000000000:x").unwrap() {
            Some(crate::relay::RelayFrame::Chunk(chunk)) => chunk,
            other => panic!("expected chunk, got {:?}", other),
        };
        assert!(matches!(
            reassembler.accept(frame),
            Err(MeshtasticError::RelayProtocol(_))
        ));
        assert!(reassembler.is_empty());

        let limit = chunk("r2", 0, DEFAULT_MAX_CHUNKS, "a");
        assert_eq!(reassembler.accept(limit).unwrap(), None);
        assert!(reassembler
            .accept(chunk("r3", 0, DEFAULT_MAX_CHUNKS + 1, "a"))
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partials_bounded() {
        let mut reassembler = Reassembler::with_limits(Duration::from_secs(120), 8, 2);
        reassembler.accept(chunk("a", 0, 2, "1")).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        reassembler.accept(chunk("b", 0, 2, "1")).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        reassembler.accept(chunk("c", 0, 2, "1")).unwrap();
        assert_eq!(reassembler.len(), 2);

        // "a" was the oldest and is gone; its second chunk starts over
        assert_eq!(reassembler.accept(chunk("a", 1, 2, "2")).unwrap(), None);
        assert_eq!(
            reassembler.accept(chunk("c", 1, 2, "2")).unwrap(),
            Some("12".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let mut reassembler = Reassembler::new(Duration::from_secs(120));
        reassembler.accept(chunk("old", 0, 2, "a")).unwrap();
        tokio::time::advance(Duration::from_secs(100)).await;
        reassembler.accept(chunk("new", 0, 2, "a")).unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(reassembler.expire(), 1);
        assert_eq!(reassembler.len(), 1);
        assert_eq!(
            reassembler.accept(chunk("new", 1, 2, "b")).unwrap(),
            Some("ab".to_string())
        );
    }
}
