use std::sync::Arc;

use relay_common::log_store::LogStore;
use relay_common::queue::Queue;
use relay_common::store::TaskStore;

#[derive(Clone)]
pub struct AppState {
    pub task_store: Arc<dyn TaskStore>,
    pub log_store: Arc<dyn LogStore>,
    pub queue: Arc<dyn Queue>,
}
