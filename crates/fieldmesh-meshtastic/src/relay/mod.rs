//! HTTP over the Meshtastic text path
//!
//! A radio-only [`RelayClient`] sends a request as one text message. The
//! networked [`RelayBridge`] performs the call and answers with one text
//! message, or with a run of chunks when the answer does not fit:
//!
//! ```text
//! HTTPREQ:{"id":"r1","method":"GET","path":"/api/health"}
//! HTTPRES:{"req_id":"r1","status":200,"body":"OK"}
//! HTTPCHK:r1:0/3:<first 180 bytes of the response JSON>
//! ```
//!
//! Every request gets an answer: upstream failures become status 502 and
//! undecodable requests status 400.

mod bridge;
mod chunk;
mod client;
mod protocol;

pub use bridge::{HttpExecutor, HttpReply, RelayBridge, RelayStats, TextSender};
pub use chunk::{split_chunks, Reassembler};
pub use client::RelayClient;
pub use protocol::{
    is_chunkable_id, ChunkFrame, RelayFrame, RelayRequest, RelayResponse, CHUNK_PREFIX,
    REQUEST_PREFIX, RESPONSE_PREFIX, STATUS_BAD_GATEWAY, STATUS_BAD_REQUEST,
};
