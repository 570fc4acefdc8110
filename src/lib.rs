//! Ratekeeper - Sliding-Window Rate Limiting for Write Operations
//!
//! This crate limits how often each caller may run a named write operation.
//! A [`ratelimit::RateTracker`] keeps per-caller sliding windows, a
//! [`ratelimit::LimitTable`] holds per-operation limits and role multipliers,
//! and a [`guard::RateLimitedHandler`] wraps handlers so they only run when the
//! caller is within budget. The [`grpc`] module exposes one tracker to many
//! application instances so they share a single set of windows.

pub mod config;
pub mod error;
pub mod grpc;
pub mod guard;
pub mod ratelimit;
