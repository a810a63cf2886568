use std::sync::Arc;

use colony_bus::Bus;
use colony_domain::config::Config;
use colony_tasks::TaskManager;

use crate::subscribers::SubscriberTable;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bus: Arc<Bus>,
    pub subscribers: Arc<SubscriberTable>,
    pub tasks: Arc<TaskManager>,
}
