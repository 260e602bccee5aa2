//! Error taxonomy for the monitor.
//!
//! Pure domain code returns `MonitorError` directly; orchestrators collect
//! per-database failures into a list rather than aborting a whole run.

use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Error, Debug)]
pub enum MonitorError {
    // Input validation errors
    #[error("empty or blank SQL text")]
    EmptySql,

    #[error("server-provided query hash must be exactly 8 bytes, got {0}")]
    InvalidServerHash(usize),

    #[error("invalid time window: start {start} is after end {end}")]
    InvalidWindow { start: String, end: String },

    // Store / provider errors
    #[error("store operation failed: {0}")]
    Store(String),

    #[error("stats provider unreachable for instance {instance}: {message}")]
    ProviderUnreachable { instance: String, message: String },

    #[error("feature not available on {instance}: {feature}")]
    FeatureNotAvailable { instance: String, feature: String },

    #[error("permission denied on {instance}: {message}")]
    PermissionDenied { instance: String, message: String },

    // Alerting
    #[error("alert channel {channel} failed: {message}")]
    ChannelFailed { channel: String, message: String },

    // Remediation policy - not really an "error", but surfaced when a caller
    // forces a suggestion through without checking the guard first.
    #[error("remediation denied: {reason}")]
    RemediationDenied { reason: String },

    // Configuration
    #[error("configuration error: {0}")]
    Config(String),

    // Fatal initialization failure; process should terminate after logging.
    #[error("fatal initialization failure: {0}")]
    FatalInit(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MonitorError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn provider_unreachable(instance: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderUnreachable { instance: instance.into(), message: message.into() }
    }

    pub fn feature_not_available(instance: impl Into<String>, feature: impl Into<String>) -> Self {
        Self::FeatureNotAvailable { instance: instance.into(), feature: feature.into() }
    }

    pub fn channel_failed(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ChannelFailed { channel: channel.into(), message: message.into() }
    }

    pub fn remediation_denied(reason: impl Into<String>) -> Self {
        Self::RemediationDenied { reason: reason.into() }
    }

    /// Transient errors are the ones worth retrying at the scheduler's backoff layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderUnreachable { .. } | Self::Store(_))
    }
}
