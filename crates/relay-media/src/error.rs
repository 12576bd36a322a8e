//! # Errors and status codes
//!
//! Delivery paths (`deliver_*`, `deliver_feedback`, `send_pli`) never panic
//! across the boundary: they return a [`DeliveryResult`]. `Ok(n)` means the
//! packet was accepted with `n` bytes handled; every [`DeliveryError`] maps to
//! a negative integer via [`DeliveryError::code`] for callers that speak the
//! integer status convention.

use thiserror::Error;

use crate::packet::MAX_PACKET_SIZE;

/// Outcome of a delivery-style call.
pub type DeliveryResult = Result<usize, DeliveryError>;

// ─── Delivery ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The target was closed; nothing was mutated.
    #[error("target is closed")]
    Closed,
    /// The implementer refused the packet (wrong kind, unknown SSRC, policy).
    #[error("packet rejected: {0}")]
    Rejected(&'static str),
    /// Downstream queue is saturated.
    #[error("downstream buffer full")]
    BufferFull,
    /// The packet content could not be interpreted by the implementer.
    #[error("malformed packet")]
    Malformed,
    /// No sink is registered (or the registered one has been dropped).
    #[error("no route for packet")]
    NoRoute,
    /// The operation is not supported by this implementer.
    #[error("operation not supported")]
    Unsupported,
}

impl DeliveryError {
    /// Negative status code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            DeliveryError::Closed => -1,
            DeliveryError::Rejected(_) => -2,
            DeliveryError::BufferFull => -3,
            DeliveryError::Malformed => -4,
            DeliveryError::NoRoute => -5,
            DeliveryError::Unsupported => -6,
        }
    }
}

/// Collapse a [`DeliveryResult`] into the integer convention:
/// non-negative = accepted (bytes handled, saturating), negative = failure.
pub fn status_code(result: &DeliveryResult) -> i32 {
    match result {
        Ok(n) => i32::try_from(*n).unwrap_or(i32::MAX),
        Err(e) => e.code(),
    }
}

// ─── Packet construction ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet length {length} exceeds capacity {}", MAX_PACKET_SIZE)]
    LengthExceeded { length: usize },
    #[error("packet length {length} exceeds source buffer of {available} bytes")]
    Truncated { length: usize, available: usize },
}

// ─── Identity state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// A video source must always carry at least its primary SSRC.
    #[error("video source SSRC list must not be empty")]
    EmptySsrcList,
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
