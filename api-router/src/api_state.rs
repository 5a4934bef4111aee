use std::sync::Arc;

use common::{storage::status::StatusTracker, utils::config::AppConfig};

use crate::{health::HealthCheck, indexer::DocumentIndexer};

#[derive(Clone)]
pub struct ApiState {
    pub config: AppConfig,
    pub indexer: Arc<DocumentIndexer>,
    pub tracker: StatusTracker,
    pub health: Arc<dyn HealthCheck>,
}

impl ApiState {
    pub fn new(
        config: AppConfig,
        indexer: Arc<DocumentIndexer>,
        tracker: StatusTracker,
        health: Arc<dyn HealthCheck>,
    ) -> Self {
        Self {
            config,
            indexer,
            tracker,
            health,
        }
    }
}
