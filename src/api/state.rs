use std::sync::Arc;

use crate::detect::IncidentDetector;
use crate::ingest::Pipeline;
use crate::storage::IncidentStore;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn detector(&self) -> &Arc<IncidentDetector> {
        self.pipeline.detector()
    }

    pub fn store(&self) -> &IncidentStore {
        self.pipeline.store()
    }
}
