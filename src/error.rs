//! Typed failures for the measurement and sampling layers.
//!
//! The CLI layer wraps these in `anyhow` with context; the engine keeps them typed so the
//! sampler can branch on a failed call without unwinding.

use crate::model::ProviderKind;
use thiserror::Error;

/// Failure of a single provider operation (selection or one measurement call).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No usable backend was found by the capability probe.
    #[error("no speed test backend available: {reason}")]
    Unavailable { reason: String },

    /// The backend executable could not be started.
    #[error("failed to launch {kind}: {source}")]
    Launch {
        kind: ProviderKind,
        #[source]
        source: std::io::Error,
    },

    /// The backend ran but exited unsuccessfully.
    #[error("{kind} exited with status {code}: {stderr}")]
    NonZeroExit {
        kind: ProviderKind,
        code: String,
        stderr: String,
    },

    /// The backend produced output we could not turn into a sample.
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload { kind: ProviderKind, reason: String },
}

impl ProviderError {
    pub fn unavailable<S: Into<String>>(reason: S) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn malformed<S: Into<String>>(kind: ProviderKind, reason: S) -> Self {
        Self::MalformedPayload {
            kind,
            reason: reason.into(),
        }
    }
}

/// Failure of a whole sampling run.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("pass count must be at least 1 (got {0})")]
    InvalidPasses(u32),

    /// Every attempted call failed before a measured sample was collected.
    #[error("no successful results")]
    NoSuccessfulSamples {
        #[source]
        cause: Option<ProviderError>,
    },
}

/// Process exit code for an error that reached `main`.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(p) = cause.downcast_ref::<ProviderError>() {
            return match p {
                ProviderError::Unavailable { .. } => 3,
                _ => 2,
            };
        }
        if let Some(s) = cause.downcast_ref::<SamplerError>() {
            return match s {
                SamplerError::InvalidPasses(_) => 1,
                SamplerError::NoSuccessfulSamples { .. } => 2,
            };
        }
    }
    1
}
