use std::sync::Arc;

use covergen_core::CoverPipeline;
use covergen_core::config::CoverStorageConfig;

#[derive(Clone, Debug)]
pub struct AppState {
    pub pipeline: Arc<CoverPipeline>,
    pub covers: CoverStorageConfig,
    /// Seconds a client should wait before asking again for a queued cover.
    pub retry_after_secs: u64,
}

impl AppState {
    pub fn new(pipeline: Arc<CoverPipeline>) -> Self {
        let covers = pipeline.config().covers.clone();
        Self {
            pipeline,
            covers,
            retry_after_secs: 5,
        }
    }
}
