// ============================================================================
// Delivery pipeline error taxonomy
// ============================================================================
//
// Duplicate   - not an error; workers report it as a `false` result
// Transient   - retried with backoff, dead-lettered once retries run out
// Poison      - dead-lettered immediately, retrying cannot help
//
// A consumer crash is not represented here: it is recovered by another
// consumer reclaiming the idle pending entry.
//
// ============================================================================

use std::fmt;
use thiserror::Error;

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Decode,
    Persist,
    Fanout,
    Push,
    Acknowledge,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Decode => "decode",
            Stage::Persist => "persist",
            Stage::Fanout => "fanout",
            Stage::Push => "push",
            Stage::Acknowledge => "ack",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code stored on every dead-letter record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadLetterReason {
    /// Payload could not be decoded into an envelope
    MalformedEnvelope,
    /// Envelope decoded but violates its invariants
    InvalidEnvelope,
    /// Transient failures outlasted the retry budget
    RetriesExhausted,
    /// Entry was redelivered across consumers too many times
    RedeliveryExhausted,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::MalformedEnvelope => "malformed_envelope",
            DeadLetterReason::InvalidEnvelope => "invalid_envelope",
            DeadLetterReason::RetriesExhausted => "retries_exhausted",
            DeadLetterReason::RedeliveryExhausted => "redelivery_exhausted",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeadLetterReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "malformed_envelope" => Ok(DeadLetterReason::MalformedEnvelope),
            "invalid_envelope" => Ok(DeadLetterReason::InvalidEnvelope),
            "retries_exhausted" => Ok(DeadLetterReason::RetriesExhausted),
            "redelivery_exhausted" => Ok(DeadLetterReason::RedeliveryExhausted),
            _ => Err(format!("Unknown dead-letter reason: {}", s)),
        }
    }
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("transient failure in {stage}: {source:#}")]
    Transient {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("poison entry ({reason}): {detail}")]
    Poison {
        reason: DeadLetterReason,
        detail: String,
    },
}

impl DeliveryError {
    pub fn transient(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        DeliveryError::Transient {
            stage,
            source: source.into(),
        }
    }

    pub fn poison(reason: DeadLetterReason, detail: impl Into<String>) -> Self {
        DeliveryError::Poison {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient { .. })
    }

    pub fn stage(&self) -> Stage {
        match self {
            DeliveryError::Transient { stage, .. } => *stage,
            DeliveryError::Poison { .. } => Stage::Decode,
        }
    }
}
