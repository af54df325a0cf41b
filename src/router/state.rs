//! Shared application state handed to every route handler.

use std::sync::Arc;
use std::time::Instant;

use crate::manager::SessionManager;
use crate::process_manager::ProcessManager;
use crate::proxy::PortRegistry;
use crate::Configuration;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub processes: Arc<ProcessManager>,
    pub ports: Arc<PortRegistry>,
    pub config: Arc<Configuration>,
    pub http_client: reqwest::Client,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Arc<Configuration>) -> Self {
        let processes = Arc::new(ProcessManager::new());
        Self {
            sessions: Arc::new(SessionManager::new(config.clone(), processes.clone())),
            processes,
            ports: Arc::new(PortRegistry::new()),
            config,
            http_client: reqwest::Client::new(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
