//! HTTP Transport layer for the Model Context Protocol
//!
//! Provides the external API routing: the health probe, the SSE session endpoint and
//! the message endpoint that feeds it.

pub mod handlers;
pub mod sessions;
