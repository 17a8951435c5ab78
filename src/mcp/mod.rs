//! Model Context Protocol (MCP) server handling and JSON-RPC implementations
//!
//! Provides protocol-level specifics surrounding JSON-RPC validation, negotiation,
//! formatting and routing, the per-session message loop and its tracing shim.

pub mod rpc;
pub mod server;
pub mod session;
pub mod telemetry;
