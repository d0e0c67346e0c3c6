//! Gatekeeper - Fixed-Window Rate Limiting for HTTP APIs
//!
//! This crate gates API route handlers behind a fixed-window request
//! counter keyed by caller and path, answering HTTP 429 once a route class's
//! quota is spent. Counters live in an injected store, so each process (or
//! test) owns its own state. A chunked TTL cache backs the export routes.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
