//! In-memory observation source for synthetic and pre-loaded batches.

use async_trait::async_trait;
use climate_map_observation_models::RawObservation;

use crate::{ObservationSource, SourceError};

/// Serves a fixed batch on every fetch.
pub struct StaticSource {
    id: String,
    batch: Vec<RawObservation>,
}

impl StaticSource {
    #[must_use]
    pub fn new(id: impl Into<String>, batch: Vec<RawObservation>) -> Self {
        Self {
            id: id.into(),
            batch,
        }
    }
}

#[async_trait]
impl ObservationSource for StaticSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self) -> Result<Vec<RawObservation>, SourceError> {
        Ok(self.batch.clone())
    }
}
