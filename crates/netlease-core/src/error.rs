// ── Core error types ──
//
// Errors surfaced by netlease-core. The mediator and rules engine never
// return these: a refused lease is `None`, an empty candidate list is a
// valid answer. Errors are reserved for malformed input and platform
// binding failures.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Parsing / validation ─────────────────────────────────────────
    #[error("Unknown request type: {value}")]
    UnknownRequestType { value: String },

    #[error("Unknown network kind: {value}")]
    UnknownNetworkKind { value: String },

    #[error("Invalid policy modifier '{value}': {reason}")]
    InvalidModifier { value: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Socket binding ───────────────────────────────────────────────
    #[error("Network {network} does not support socket binding")]
    BindUnsupported { network: String },

    #[error("Failed to bind socket to network {network}: {source}")]
    BindFailed {
        network: String,
        #[source]
        source: std::io::Error,
    },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}
