use std::sync::Arc;

use anyhow::Result;

use crate::api::ApiClient;
use crate::config::AppConfig;
use crate::core::{NotificationChannel, ProgressTracker, VisitorIdentity, create_notifier};
use crate::db::SqliteVisitorStore;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub api: ApiClient,
    pub notifier: Arc<dyn NotificationChannel>,
    pub progress: ProgressTracker,
    pub visitor: VisitorIdentity,
}

impl AppContext {
    /// The database at `config.database_path` is only opened once the visitor
    /// id is first needed.
    pub fn new(config: AppConfig) -> Result<Self> {
        let api = ApiClient::from_config(&config)?;
        let notifier = create_notifier(&config.notifications);
        let store = SqliteVisitorStore::open_lazily(config.database_path.clone());
        let visitor = VisitorIdentity::new(Arc::new(store));

        Ok(Self {
            config: Arc::new(config),
            api,
            notifier,
            progress: ProgressTracker::new(),
            visitor,
        })
    }
}
