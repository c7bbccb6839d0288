//! Intake - Request Intake Service
//!
//! This crate accepts inbound HTTP calls, admits them under per-client and
//! global token bucket limits, records admitted calls durably with
//! sanitization and retry on storage contention, and serves statistics
//! behind session or HTTP Basic authentication.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod session;
pub mod stats;
pub mod storage;
pub mod sweep;
