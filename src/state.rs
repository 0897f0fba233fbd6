use std::sync::Arc;

use crate::{config::AppConfig, db::DbPool, gateway::PaymentGateway};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub gateway: Arc<dyn PaymentGateway>,
}
