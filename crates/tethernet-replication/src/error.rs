//! Error kinds signalled by the replication core.
//!
//! Most of these are not fatal to the session: per the policy in the owning
//! module docs, transient errors are handled at the call site (drop packet,
//! schedule retransmit) and only surface here so the caller can log or
//! count them. `HeartbeatLost` and `ConnectionTimeout` are the two variants
//! that should trigger a reconnect policy upstream.

use thiserror::Error;

/// Errors the replication core can report.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReplicationError {
    /// No transport channel configured, or the channel was closed at send time.
    #[error("transport unavailable")]
    TransportUnavailable,

    /// A packet failed header parsing, had a length mismatch, or carried an
    /// unrecognized packet type.
    #[error("malformed packet: {reason}")]
    MalformedPacket {
        /// Human-readable detail for logging.
        reason: String,
    },

    /// An input or snapshot arrived with a sequence/timestamp older than the
    /// configured retention horizon.
    #[error("sequence or timestamp outside retention horizon")]
    SequenceViolation,

    /// Full reconciliation was requested without a predictor or input buffer
    /// configured.
    #[error("reconciliation unsupported: predictor or input buffer missing")]
    ReconciliationUnsupported,

    /// A reliable message exhausted its retry budget.
    #[error("reliable message timed out after {retries} retries")]
    ReliableTimeout {
        /// Number of retransmit attempts made before giving up.
        retries: u32,
    },

    /// A connection attempt did not complete within the configured timeout.
    #[error("connection attempt timed out")]
    ConnectionTimeout,

    /// No inbound traffic was observed for three heartbeat intervals.
    #[error("heartbeat lost")]
    HeartbeatLost,
}

/// Convenience alias for results carrying a [`ReplicationError`].
pub type ReplicationResult<T> = Result<T, ReplicationError>;
