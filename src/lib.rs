//! Ratekeeper - Token-Emitting Rate Limiting Service
//!
//! Each named limiter is an independent actor that emits tokens at a steady
//! cadence derived from its interval and count. Clients acquire tokens over
//! HTTP, limiters can be created, read, updated and deleted at runtime, and a
//! reconciler periodically aligns running limiters with definitions persisted
//! in a backing store.

pub mod config;
pub mod error;
pub mod http;
pub mod limiter;
pub mod reconciler;
pub mod registry;
pub mod store;
