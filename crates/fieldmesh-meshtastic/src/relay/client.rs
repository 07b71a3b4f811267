//! Radio-only side of the relay: issues requests and waits for answers

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, trace, warn};

use super::bridge::TextSender;
use super::chunk::Reassembler;
use super::protocol::{RelayFrame, RelayRequest, RelayResponse};
use crate::central::CentralEvent;
use crate::config::RelayConfig;
use crate::error::{MeshtasticError, Result};

/// Sends relay requests to a gateway node and correlates the responses
pub struct RelayClient<S: TextSender> {
    sender: S,
    gateway: u32,
    config: RelayConfig,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<RelayResponse>>>>,
    reassembler: Arc<Mutex<Reassembler>>,
}

impl<S: TextSender + Clone> Clone for RelayClient<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            gateway: self.gateway,
            config: self.config.clone(),
            pending: self.pending.clone(),
            reassembler: self.reassembler.clone(),
        }
    }
}

impl<S: TextSender> RelayClient<S> {
    /// Create a client that addresses `gateway`
    pub fn new(sender: S, gateway: u32, config: RelayConfig) -> Self {
        let reassembler = Reassembler::from_config(&config);
        Self {
            sender,
            gateway,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            reassembler: Arc::new(Mutex::new(reassembler)),
        }
    }

    /// Requests awaiting a response
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send a request and wait for its response or the local timeout
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<String>,
        content_type: Option<String>,
    ) -> Result<RelayResponse> {
        let mut request = RelayRequest::new(new_request_id(), method, path);
        if let Some(body) = body {
            request = request.with_body(body, content_type);
        }
        self.send(request).await
    }

    /// Send a prepared request and wait for its response
    pub async fn send(&self, request: RelayRequest) -> Result<RelayResponse> {
        request.validate()?;
        let frame = request.to_frame()?;
        if frame.len() > self.config.max_message_size {
            return Err(MeshtasticError::MessageTooLarge {
                size: frame.len(),
                max: self.config.max_message_size,
            });
        }

        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        info!(req_id = %id, method = %request.method, path = %request.path, "Relay request");
        if let Err(e) = self.sender.send_text(self.gateway, frame).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.client_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(MeshtasticError::ChannelClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                warn!(req_id = %id, "Relay request timed out");
                Err(MeshtasticError::RelayTimeout {
                    req_id: id,
                    duration_ms: self.config.client_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Feed a received text; returns true if it was relay traffic
    pub fn handle_text(&self, text: &str) -> bool {
        let frame = match RelayFrame::parse(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return false,
            Err(e) => {
                debug!("Ignoring malformed relay text: {}", e);
                return true;
            }
        };

        match frame {
            RelayFrame::Response(response) => self.complete(response),
            RelayFrame::Chunk(chunk) => {
                let assembled = {
                    let mut reassembler = self.reassembler.lock();
                    reassembler.expire();
                    reassembler.accept(chunk)
                };
                match assembled {
                    Ok(Some(json)) => match serde_json::from_str::<RelayResponse>(&json) {
                        Ok(response) => self.complete(response),
                        Err(e) => warn!("Reassembled response did not decode: {}", e),
                    },
                    Ok(None) => {}
                    Err(e) => debug!("Rejected chunk: {}", e),
                }
            }
            RelayFrame::Request(request) => {
                trace!(req_id = %request.id, "Ignoring request seen by client");
            }
        }
        true
    }

    fn complete(&self, response: RelayResponse) {
        match self.pending.lock().remove(&response.req_id) {
            Some(tx) => {
                debug!(req_id = %response.req_id, status = response.status, "Relay response");
                let _ = tx.send(response);
            }
            None => debug!(req_id = %response.req_id, "Response for unknown request"),
        }
    }

    /// Feed central text events until the stream ends
    pub async fn run(self, mut events: broadcast::Receiver<CentralEvent>) {
        loop {
            match events.recv().await {
                Ok(CentralEvent::Text { from, text }) if from == self.gateway => {
                    self.handle_text(&text);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Relay client lagged behind transport events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Short id; never contains the chunk field separator
fn new_request_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}
