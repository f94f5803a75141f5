use std::sync::Arc;

use tokio::sync::Notify;

use crate::{config::AppConfig, scanner::Scanner, targets::TargetStore};

#[derive(Clone)]
pub struct AppContext {
    config: Arc<AppConfig>,
    shutdown: Arc<Notify>,
    targets: Arc<dyn TargetStore>,
    scanner: Arc<dyn Scanner>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        targets: Arc<dyn TargetStore>,
        scanner: Arc<dyn Scanner>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: Arc::new(Notify::new()),
            targets,
            scanner,
        }
    }

    pub fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config)
    }

    pub fn targets(&self) -> Arc<dyn TargetStore> {
        Arc::clone(&self.targets)
    }

    pub fn scanner(&self) -> Arc<dyn Scanner> {
        Arc::clone(&self.scanner)
    }

    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}
