//! Integration tests for fieldmesh-node
//!
//! Every test runs against an in-process axum server standing in for the
//! incident backend.
//!
//! Run with: cargo test -p fieldmesh-node --test integration

mod backend_client;
mod gateway_flow;
mod mock_backend;
