//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Prelude module - Commonly used types for quick imports
//!
//! This module re-exports the most commonly used types from Gatewarden,
//! allowing users to import them with a single `use gatewarden::prelude::*;`
//! statement instead of importing each type individually.

// Core types - always available
pub use crate::config::AdmissionConfig;
pub use crate::error::{Decision, DenyCode, GateError};
pub use crate::gate::{AdmissionGate, RequestMeta};

// Components
pub use crate::blacklist::BlacklistGuard;
pub use crate::circuit_breaker::{CircuitBreaker, Outcome};
pub use crate::rate_limiter::RateLimiter;

// Denial rendering and events
pub use crate::events::{AdmissionEvent, EventSink};
pub use crate::response::Rejection;

// Feature-gated exports
#[cfg(feature = "monitoring")]
pub use crate::telemetry::Metrics;
