//! Errors recorded by the build pipeline.

use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

use crate::cloud::CloudError;
use crate::provision::ProvisionError;

/// Fatal error that halts a build. At most one is recorded per run.
#[derive(Debug, Error)]
pub enum RunError {
    /// A cloud API call failed.
    #[error("{context}: {source}")]
    Api {
        /// Operation that failed.
        context: String,
        /// Provider error.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// A state wait did not complete in time.
    #[error("{context}: timed out after {timeout:?}")]
    Timeout {
        /// Wait that timed out.
        context: String,
        /// Bound that was exceeded.
        timeout: Duration,
    },
    /// A resource lacks something the pipeline requires.
    #[error("{0}")]
    Structural(String),
    /// The provisioner rejected a server.
    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),
    /// A whole step ran past its deadline.
    #[error("step {step} did not finish within {timeout:?}")]
    StepDeadline {
        /// Name of the step.
        step: &'static str,
        /// Step deadline.
        timeout: Duration,
    },
    /// The run was cancelled.
    #[error("build cancelled")]
    Cancelled,
    /// An error raised by the work for one zone.
    #[error("zone {zone}: {source}")]
    Zone {
        /// Zone whose task failed.
        zone: String,
        /// Underlying failure.
        #[source]
        source: Box<RunError>,
    },
}

impl RunError {
    /// Wraps a failed provider call.
    #[must_use]
    pub fn cloud<E: CloudError>(what: impl Into<String>, err: E) -> Self {
        Self::Api {
            context: what.into(),
            source: Box::new(err),
        }
    }

    /// Classifies the failure of a bounded wait, mapping provider-side
    /// timeouts to [`RunError::Timeout`].
    #[must_use]
    pub fn wait<E: CloudError>(what: impl Into<String>, err: E, timeout: Duration) -> Self {
        if err.is_timeout() {
            tracing::debug!(error = %err, "provider wait timed out");
            return Self::Timeout {
                context: what.into(),
                timeout,
            };
        }
        Self::cloud(what, err)
    }

    /// Wraps the error with the zone it occurred in. Errors that already
    /// carry a zone, and run-wide errors, are returned unchanged.
    #[must_use]
    pub fn in_zone(self, zone: &str) -> Self {
        match self {
            Self::Zone { .. } | Self::Cancelled | Self::StepDeadline { .. } => self,
            other => Self::Zone {
                zone: zone.to_owned(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, skipping zone wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Zone { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the zone the error was raised in, if any.
    #[must_use]
    pub fn zone(&self) -> Option<&str> {
        match self {
            Self::Zone { zone, .. } => Some(zone),
            _ => None,
        }
    }
}

/// Failure to remove a resource during cleanup. Reported, never recorded.
#[derive(Debug, Error)]
#[error("failed to clean up {resource}: {source}")]
pub struct CleanupError {
    /// Resource that could not be removed, for example `server 0a1b...`.
    pub resource: String,
    /// Underlying failure.
    #[source]
    pub source: RunError,
}
