//! Domain Layer - Records, channel keys, and staleness rules.
//!
//! Pure types and computation with no I/O. Everything here can be tested
//! without a store or a runtime.

/// Update records, channel keys, and member encoding.
pub mod record;

/// Staleness policies and health events.
pub mod staleness;
