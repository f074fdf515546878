#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Observation sources.
//!
//! The engine depends on raw data only through the [`ObservationSource`]
//! trait, so real feeds ([`http::HttpSource`]) and synthetic ones
//! ([`static_source::StaticSource`]) are interchangeable. Network fetches go
//! through [`retry`] so transient failures are retried with exponential
//! backoff before a terminal error surfaces.

pub mod http;
pub mod retry;
pub mod static_source;

use async_trait::async_trait;
use climate_map_observation_models::RawObservation;

/// Errors that can occur while fetching observations.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Short description.
        message: String,
    },

    /// The response body could not be read or decoded.
    #[error("Unreadable response body: {message}")]
    Body {
        /// Description of what went wrong.
        message: String,
    },

    /// The payload had an unexpected shape.
    #[error("Unexpected payload: {message}")]
    Payload {
        /// Description of what went wrong.
        message: String,
    },

    /// Every retry attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// The final transient error.
        last_error: String,
    },
}

impl SourceError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
            }
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Body { .. } => true,
            Self::Json(_) | Self::Payload { .. } | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// A pluggable producer of raw observation batches.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Returns a unique identifier for this source (e.g., `"nasa_power"`).
    fn id(&self) -> &str;

    /// Fetches one batch of raw observations.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the batch cannot be produced. Individual
    /// malformed records are not errors here; they are passed through for
    /// the ingest step to reject.
    async fn fetch(&self) -> Result<Vec<RawObservation>, SourceError>;
}
