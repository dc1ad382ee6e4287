pub mod mapping;
pub mod sql;

use std::sync::Arc;

use crate::config::Config;
use crate::services::SqlService;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SqlService>,
    pub config: Config,
}
