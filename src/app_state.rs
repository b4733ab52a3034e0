use crate::config::SettingsHandle;
use crate::services::{cache::Cache, queue::JobQueue, scan::ScanService};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub scan: ScanService,
    pub queue: JobQueue,
    pub settings: SettingsHandle,
    pub cache: Cache,
}

impl AppState {
    pub fn new(scan: ScanService, queue: JobQueue, settings: SettingsHandle, cache: Cache) -> Self {
        Self {
            scan,
            queue,
            settings,
            cache,
        }
    }
}
