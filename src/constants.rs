//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Centralized configuration constants for Gatewarden.
//!
//! Every default the admission layer falls back to is defined here, so the
//! config structs and the tests agree on one source of truth.

// ============================================================================
// Circuit Breaker Constants
// ============================================================================

/// Maximum number of trial requests admitted while half-open.
pub const DEFAULT_BREAKER_MAX_REQUESTS: u64 = 5;

/// How long an open breaker waits after its last failure before probing (60 seconds).
///
/// Also the length of the counting window while closed.
pub const DEFAULT_BREAKER_INTERVAL_SECS: u64 = 60;

/// Request-level timeout reserved for coupling with an outer timeout layer (30 seconds).
pub const DEFAULT_BREAKER_TIMEOUT_SECS: u64 = 30;

/// Absolute failure count that opens a closed breaker once the volume threshold is met.
pub const DEFAULT_BREAKER_MAX_FAILURES: u64 = 5;

/// Failure ratio that opens a closed breaker once the volume threshold is met.
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: f64 = 0.5;

/// Success ratio among half-open trials required to close the breaker again.
pub const DEFAULT_BREAKER_SUCCESS_THRESHOLD: f64 = 0.8;

/// Minimum number of observed results before a closed breaker may open.
pub const DEFAULT_BREAKER_REQUEST_VOLUME_THRESHOLD: u64 = 10;

// ============================================================================
// Rate Limiter Constants
// ============================================================================

/// Default number of requests admitted per identity per window.
pub const DEFAULT_RATE_LIMIT: u64 = 100;

/// Default fixed window length (60 seconds).
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

/// Multiplier applied to the base limit for authenticated users.
pub const DEFAULT_USER_LIMIT_MULTIPLIER: f64 = 2.0;

/// Key prefix for anonymous (per-IP) rate windows.
pub const IP_KEY_PREFIX: &str = "ip:";

/// Key prefix for authenticated (per-user) rate windows.
pub const USER_KEY_PREFIX: &str = "user:";

// ============================================================================
// Blacklist Constants
// ============================================================================

/// Window count at which a rate-limited identity is promoted to the blacklist.
pub const DEFAULT_BLACKLIST_THRESHOLD: u64 = 1000;

/// Lifetime of an automatic blacklist entry (1 hour).
pub const DEFAULT_BLACKLIST_DURATION_SECS: u64 = 3600;

/// Maximum blacklist reason length (500 characters).
pub const MAX_BLACKLIST_REASON_LENGTH: usize = 500;

/// Maximum identity length accepted by administrative operations.
pub const MAX_IDENTITY_LENGTH: usize = 255;

/// Reason recorded on automatic promotions.
pub const AUTO_BLACKLIST_REASON: &str = "rate limit threshold exceeded";

// ============================================================================
// Maintenance Constants
// ============================================================================

/// Default sweeper tick (5 minutes).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Idle time after which a rate window is dropped by the sweeper (1 hour).
pub const DEFAULT_RATE_WINDOW_RETENTION_SECS: u64 = 3600;
