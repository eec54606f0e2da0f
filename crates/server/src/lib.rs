//! HTTP and SSE surface of the ticket command service.

pub mod api;
pub mod metrics;
pub mod state;
