//! Networked side of the relay: runs requests against the backend

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use super::chunk::split_chunks;
use super::protocol::{
    is_chunkable_id, salvage_request_id, ChunkFrame, RelayFrame, RelayRequest, RelayResponse,
};
use crate::central::{CentralEvent, CentralHandle};
use crate::config::RelayConfig;
use crate::error::{MeshtasticError, Result};

/// Upstream reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status
    pub status: u16,
    /// Body text
    pub body: String,
}

/// Performs relayed HTTP calls
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Execute `request` against the backend
    async fn execute(&self, request: &RelayRequest) -> Result<HttpReply>;
}

/// Sends text messages over the radio
#[async_trait]
pub trait TextSender: Send + Sync {
    /// Send `text` to node `to`
    async fn send_text(&self, to: u32, text: String) -> Result<()>;
}

#[async_trait]
impl TextSender for CentralHandle {
    async fn send_text(&self, to: u32, text: String) -> Result<()> {
        CentralHandle::send_text(self, to, text).await.map(|_| ())
    }
}

/// Relay bridge counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Requests answered
    pub requests_handled: u64,
    /// Requests answered with 400
    pub malformed_requests: u64,
    /// Requests answered with 502
    pub upstream_failures: u64,
    /// Responses sent as chunks
    pub responses_chunked: u64,
    /// Chunk messages sent
    pub chunks_sent: u64,
    /// Text sends that failed
    pub send_failures: u64,
}

/// Answers `HTTPREQ` texts by calling an [`HttpExecutor`]
pub struct RelayBridge<E: HttpExecutor, S: TextSender> {
    executor: E,
    sender: S,
    config: RelayConfig,
    stats: Arc<Mutex<RelayStats>>,
}

impl<E: HttpExecutor, S: TextSender> RelayBridge<E, S> {
    /// Create a bridge
    pub fn new(executor: E, sender: S, config: RelayConfig) -> Self {
        Self {
            executor,
            sender,
            config,
            stats: Arc::new(Mutex::new(RelayStats::default())),
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> RelayStats {
        self.stats.lock().clone()
    }

    /// Handle a received text; `None` when it was not a request
    ///
    /// The response has already been sent to `from` when this returns.
    pub async fn handle_text(&self, from: u32, text: &str) -> Option<RelayResponse> {
        let response = match RelayFrame::parse(text) {
            Ok(Some(RelayFrame::Request(request))) => match request.validate() {
                Ok(()) => self.execute(request).await,
                Err(e) => {
                    warn!(from, "Rejected relay request: {}", e);
                    self.stats.lock().malformed_requests += 1;
                    RelayResponse::bad_request(request.id, "request id must not contain ':'")
                }
            },
            Ok(_) => return None,
            Err(e) if text.starts_with(super::protocol::REQUEST_PREFIX) => {
                warn!(from, "Malformed relay request: {}", e);
                self.stats.lock().malformed_requests += 1;
                RelayResponse::bad_request(salvage_request_id(text).unwrap_or_default(), e)
            }
            Err(e) => {
                debug!(from, "Ignoring malformed relay text: {}", e);
                return None;
            }
        };

        self.stats.lock().requests_handled += 1;
        if let Err(e) = self.respond(from, &response).await {
            warn!(req_id = %response.req_id, "Failed to send relay response: {}", e);
            self.stats.lock().send_failures += 1;
        }
        Some(response)
    }

    async fn execute(&self, request: RelayRequest) -> RelayResponse {
        info!(
            req_id = %request.id,
            method = %request.method,
            path = %request.path,
            "Relaying request"
        );

        match tokio::time::timeout(self.config.http_timeout, self.executor.execute(&request)).await
        {
            Ok(Ok(reply)) => {
                debug!(req_id = %request.id, status = reply.status, "Upstream replied");
                RelayResponse::new(request.id, reply.status, reply.body)
            }
            Ok(Err(e)) => {
                warn!(req_id = %request.id, "Upstream call failed: {}", e);
                self.stats.lock().upstream_failures += 1;
                RelayResponse::bad_gateway(request.id, e)
            }
            Err(_) => {
                warn!(
                    req_id = %request.id,
                    "Upstream timed out after {}",
                    humantime::format_duration(self.config.http_timeout)
                );
                self.stats.lock().upstream_failures += 1;
                RelayResponse::bad_gateway(request.id, "timeout")
            }
        }
    }

    /// Text messages that carry `response`
    pub fn response_frames(&self, response: &RelayResponse) -> Result<Vec<String>> {
        let whole = response.to_frame()?;
        if whole.len() <= self.config.max_message_size {
            return Ok(vec![whole]);
        }

        if !is_chunkable_id(&response.req_id) {
            return Err(MeshtasticError::RelayProtocol(format!(
                "response for '{}' needs chunking but the id cannot be framed",
                response.req_id
            )));
        }

        let json = response.to_json()?;
        let pieces = split_chunks(&json, self.config.chunk_size);
        let count = pieces.len() as u32;
        Ok(pieces
            .into_iter()
            .enumerate()
            .map(|(index, text)| {
                ChunkFrame {
                    req_id: response.req_id.clone(),
                    index: index as u32,
                    count,
                    text: text.to_string(),
                }
                .to_frame()
            })
            .collect())
    }

    /// Send `response` to `to`, chunked if needed; returns messages sent
    pub async fn respond(&self, to: u32, response: &RelayResponse) -> Result<usize> {
        let frames = self.response_frames(response)?;
        let chunked = frames.len() > 1;
        if chunked {
            debug!(req_id = %response.req_id, chunks = frames.len(), "Chunking response");
            self.stats.lock().responses_chunked += 1;
        }

        let total = frames.len();
        for (i, frame) in frames.into_iter().enumerate() {
            if i > 0 && !self.config.chunk_delay.is_zero() {
                tokio::time::sleep(self.config.chunk_delay).await;
            }
            trace!(to, len = frame.len(), "Relay text out");
            self.sender.send_text(to, frame).await?;
            if chunked {
                self.stats.lock().chunks_sent += 1;
            }
        }
        Ok(total)
    }

    /// Serve requests arriving as central text events until the stream ends
    pub async fn run(self, mut events: broadcast::Receiver<CentralEvent>) {
        info!("Relay bridge running");
        loop {
            match events.recv().await {
                Ok(CentralEvent::Text { from, text }) => {
                    self.handle_text(from, &text).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Relay bridge lagged behind transport events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("Relay bridge stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Reassembler;
    use crate::test_utils::TextLoopback;
    use std::time::Duration;

    struct FixedExecutor {
        reply: HttpReply,
        delay: Duration,
    }

    #[async_trait]
    impl HttpExecutor for FixedExecutor {
        async fn execute(&self, request: &RelayRequest) -> Result<HttpReply> {
            tokio::time::sleep(self.delay).await;
            if request.path == "/fail" {
                return Err(MeshtasticError::Http("connection refused".into()));
            }
            Ok(self.reply.clone())
        }
    }

    fn bridge(body: &str, delay: Duration) -> (RelayBridge<FixedExecutor, TextLoopback>, TextLoopback) {
        let sender = TextLoopback::new();
        let executor = FixedExecutor {
            reply: HttpReply {
                status: 200,
                body: body.to_string(),
            },
            delay,
        };
        (
            RelayBridge::new(executor, sender.clone(), RelayConfig::default()),
            sender,
        )
    }

    #[tokio::test]
    async fn test_health_request_unchunked() {
        let (bridge, sent) = bridge("OK", Duration::ZERO);
        let request = r#"HTTPREQ:{"id":"r1","method":"GET","path":"/api/health"}"#;

        let response = bridge.handle_text(0x1001, request).await.unwrap();
        assert_eq!(response, RelayResponse::new("r1", 200, "OK"));
        assert_eq!(
            sent.take(),
            vec![(
                0x1001,
                r#"HTTPRES:{"req_id":"r1","status":200,"body":"OK"}"#.to_string()
            )]
        );
        assert_eq!(bridge.stats().responses_chunked, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_response_chunked() {
        let body = "x".repeat(500);
        let (bridge, sent) = bridge(&body, Duration::ZERO);
        let request = RelayRequest::new("big", "GET", "/api/incidents")
            .to_frame()
            .unwrap();

        bridge.handle_text(7, &request).await.unwrap();
        let frames = sent.take();
        assert!(frames.len() > 1);

        let mut reassembler = Reassembler::new(Duration::from_secs(120));
        let mut json = None;
        for (to, frame) in frames.into_iter().rev() {
            assert_eq!(to, 7);
            match RelayFrame::parse(&frame).unwrap() {
                Some(RelayFrame::Chunk(chunk)) => {
                    assert!(chunk.text.len() <= 180);
                    if let Some(done) = reassembler.accept(chunk).unwrap() {
                        json = Some(done);
                    }
                }
                other => panic!("expected chunk, got {:?}", other),
            }
        }
        let response: RelayResponse = serde_json::from_str(&json.unwrap()).unwrap();
        assert_eq!(response.body, body);
        assert_eq!(bridge.stats().responses_chunked, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_timeout_is_502() {
        let (bridge, sent) = bridge("late", Duration::from_secs(30));
        let request = RelayRequest::new("r2", "GET", "/slow").to_frame().unwrap();

        let response = bridge.handle_text(1, &request).await.unwrap();
        assert_eq!(response.status, 502);
        assert_eq!(response.req_id, "r2");
        assert_eq!(sent.take().len(), 1);
        assert_eq!(bridge.stats().upstream_failures, 1);
    }

    #[tokio::test]
    async fn test_upstream_error_is_502() {
        let (bridge, _) = bridge("", Duration::ZERO);
        let request = RelayRequest::new("r3", "GET", "/fail").to_frame().unwrap();
        assert_eq!(bridge.handle_text(1, &request).await.unwrap().status, 502);
    }

    #[tokio::test]
    async fn test_malformed_request_is_400() {
        let (bridge, sent) = bridge("", Duration::ZERO);
        let response = bridge
            .handle_text(1, r#"HTTPREQ:{"id":"r4","method":"GET"}"#)
            .await
            .unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.req_id, "r4");
        assert_eq!(sent.take().len(), 1);
        assert_eq!(bridge.stats().malformed_requests, 1);
    }

    #[tokio::test]
    async fn test_colon_in_request_id_is_400() {
        let body = "x".repeat(500);
        let (bridge, sent) = bridge(&body, Duration::ZERO);
        let request = RelayRequest::new("a:b", "GET", "/api/incidents")
            .to_frame()
            .unwrap();

        let response = bridge.handle_text(3, &request).await.unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.req_id, "a:b");

        // One whole frame the requester can decode, never chunks
        let frames = sent.take();
        assert_eq!(frames.len(), 1);
        match RelayFrame::parse(&frames[0].1).unwrap() {
            Some(RelayFrame::Response(parsed)) => assert_eq!(parsed, response),
            other => panic!("expected whole response, got {:?}", other),
        }
        assert_eq!(bridge.stats().malformed_requests, 1);
    }

    #[test]
    fn test_unframeable_id_never_chunked() {
        let (bridge, _) = bridge("", Duration::ZERO);
        let response = RelayResponse::new("a:b", 200, "y".repeat(500));
        assert!(matches!(
            bridge.response_frames(&response),
            Err(MeshtasticError::RelayProtocol(_))
        ));
    }

    #[tokio::test]
    async fn test_chat_text_ignored() {
        let (bridge, sent) = bridge("", Duration::ZERO);
        assert!(bridge.handle_text(1, "hello").await.is_none());
        assert!(bridge
            .handle_text(1, r#"HTTPRES:{"req_id":"x","status":200,"body":""}"#)
            .await
            .is_none());
        assert!(sent.take().is_empty());
        assert_eq!(bridge.stats().requests_handled, 0);
    }
}
