//! HTTP endpoints for health checks and metrics
//!
//! Serves `/healthz`, `/readyz` and `/metrics` for the kubelet and Prometheus.

mod handlers;
mod server;

pub use server::{router, run_server, ServerState};
