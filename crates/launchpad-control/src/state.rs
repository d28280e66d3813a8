use std::sync::Arc;

use launchpad_agent::ServerController;
use launchpad_process::ServerConfig;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub controller: ServerController,
    /// Last requested config, shown by `/api/config`. Not necessarily what is running.
    pub requested: Arc<RwLock<ServerConfig>>,
}

impl AppState {
    pub fn new(controller: ServerController) -> Self {
        Self {
            controller,
            requested: Arc::new(RwLock::new(ServerConfig::default())),
        }
    }
}
