use axum::extract::FromRef;

use crate::scan::{ScanManager, TaskExecutor};
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedScanManager = Arc<ScanManager>;
pub type GuardedTaskExecutor = Arc<TaskExecutor>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub scan_manager: GuardedScanManager,
    pub task_executor: GuardedTaskExecutor,
    pub hash: String,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        scan_manager: GuardedScanManager,
        task_executor: GuardedTaskExecutor,
    ) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            scan_manager,
            task_executor,
            hash: env!("GIT_HASH").to_string(),
        }
    }
}

impl FromRef<ServerState> for GuardedScanManager {
    fn from_ref(input: &ServerState) -> Self {
        input.scan_manager.clone()
    }
}

impl FromRef<ServerState> for GuardedTaskExecutor {
    fn from_ref(input: &ServerState) -> Self {
        input.task_executor.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
