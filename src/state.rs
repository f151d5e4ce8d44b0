use crate::config::AppConfig;
use crate::idempotency::IdempotencyCache;
use crate::orders::model::Order;
use crate::security::LoginThrottle;
use crate::store::Database;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

const OPENAPI_DOC: &str = include_str!("../docs/openapi.yaml");

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Database,
    pub login_throttle: LoginThrottle,
    pub order_replays: IdempotencyCache<Order>,
    pub openapi: Arc<Value>,
    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database, prometheus_handle: Option<PrometheusHandle>) -> Self {
        let redis = config
            .redis_url
            .as_deref()
            .and_then(|url| match redis::Client::open(url) {
                Ok(client) => Some(client),
                Err(err) => {
                    warn!(target = "storefront.idempotency", error = %err, "invalid REDIS_URL; using memory");
                    None
                }
            });
        let openapi: Value =
            serde_yaml::from_str(OPENAPI_DOC).unwrap_or(json!({"openapi": "3.0.3"}));
        Self {
            login_throttle: LoginThrottle::from_config(&config),
            order_replays: IdempotencyCache::new(redis, config.idempotency_ttl_secs),
            openapi: Arc::new(openapi),
            prometheus_handle,
            config: Arc::new(config),
            db,
        }
    }
}
