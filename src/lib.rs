//! Turnstile - Per-Client Rate Limiting for REST Route Groups
//!
//! This crate implements the admission gate that sits in front of a REST
//! backend's protected route groups. Every group owns a registry of token
//! buckets keyed by (client address, method, path), a background sweeper that
//! evicts idle clients, and an axum middleware that rejects over-limit
//! requests with a structured 429 body.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
