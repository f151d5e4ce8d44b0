use std::{env, path::PathBuf, str::FromStr};
use tracing::{info, warn};

const DEV_JWT_SECRET: &str = "storefront-dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub environment: Environment,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub mongodb_uri: Option<String>,
    pub mongodb_db: String,
    pub redis_url: Option<String>,
    pub upload_dir: PathBuf,
    pub request_max_bytes: usize,
    pub frontend_url: Option<String>,
    pub allowed_origins: Vec<String>,
    pub admin: AdminSeed,
    pub bcrypt_cost: u32,
    pub login_rate_per_sec: f64,
    pub login_rate_capacity: f64,
    pub idempotency_ttl_secs: u64,
    pub openapi_key: Option<String>,
    pub metrics_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV")
            .or_else(|_| env::var("NODE_ENV"))
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        };

        let jwt_secret = match non_empty("JWT_SECRET") {
            Some(secret) => secret,
            None => {
                warn!(
                    target = "storefront.config",
                    "JWT_SECRET not set; using the development secret"
                );
                DEV_JWT_SECRET.to_string()
            }
        };

        let mongodb_uri = non_empty("MONGODB_URI");
        if mongodb_uri.is_none() {
            info!(
                target = "storefront.config",
                "MONGODB_URI not set; documents are kept in memory"
            );
        }

        let admin = AdminSeed {
            username: non_empty("ADMIN_USERNAME").unwrap_or_else(|| "admin".into()),
            email: non_empty("ADMIN_EMAIL").unwrap_or_else(|| "admin@storefront.local".into()),
            password: non_empty("ADMIN_PASSWORD").unwrap_or_else(|| "admin123".into()),
            full_name: non_empty("ADMIN_FULL_NAME").unwrap_or_else(|| "Store Admin".into()),
        };

        Self {
            port: parsed("PORT", 3002),
            environment,
            jwt_secret,
            jwt_ttl_hours: parsed::<i64>("JWT_TTL_HOURS", 24 * 7).max(1),
            mongodb_uri,
            mongodb_db: non_empty("MONGODB_DB").unwrap_or_else(|| "storefront".into()),
            redis_url: non_empty("REDIS_URL"),
            upload_dir: non_empty("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("public/uploads")),
            request_max_bytes: Some(parsed::<usize>("REQUEST_MAX_BYTES", 10 * 1024 * 1024))
                .filter(|v| *v > 0)
                .unwrap_or(10 * 1024 * 1024),
            frontend_url: non_empty("FRONTEND_URL"),
            allowed_origins: non_empty("CORS_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_else(|| {
                    vec![
                        "http://localhost:5173".to_string(),
                        "http://127.0.0.1:5173".to_string(),
                    ]
                }),
            admin,
            bcrypt_cost: parsed("BCRYPT_COST", bcrypt::DEFAULT_COST).clamp(4, 31),
            login_rate_per_sec: Some(parsed("LOGIN_RATE_PER_SEC", 0.2))
                .filter(|v: &f64| *v > 0.0)
                .unwrap_or(0.2),
            login_rate_capacity: Some(parsed("LOGIN_RATE_CAPACITY", 5.0))
                .filter(|v: &f64| *v >= 1.0)
                .unwrap_or(5.0),
            idempotency_ttl_secs: parsed("IDEMPOTENCY_TTL_SECS", 3600),
            openapi_key: non_empty("OPENAPI_KEY"),
            metrics_key: non_empty("METRICS_KEY"),
        }
    }

    /// In-memory, low-cost settings for tests and local experiments.
    #[cfg(test)]
    pub fn for_tests(upload_dir: PathBuf) -> Self {
        Self {
            port: 0,
            environment: Environment::Development,
            jwt_secret: "test-secret".into(),
            jwt_ttl_hours: 1,
            mongodb_uri: None,
            mongodb_db: "storefront_test".into(),
            redis_url: None,
            upload_dir,
            request_max_bytes: 10 * 1024 * 1024,
            frontend_url: None,
            allowed_origins: vec![],
            admin: AdminSeed {
                username: "admin".into(),
                email: "admin@storefront.local".into(),
                password: "admin123".into(),
                full_name: "Store Admin".into(),
            },
            bcrypt_cost: 4,
            login_rate_per_sec: 1.0,
            login_rate_capacity: 3.0,
            idempotency_ttl_secs: 60,
            openapi_key: None,
            metrics_key: None,
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn product_upload_dir(&self) -> PathBuf {
        self.upload_dir.join("products")
    }

    pub fn cors_origins(&self) -> Vec<String> {
        let mut origins = self.allowed_origins.clone();
        if let Some(url) = &self.frontend_url {
            origins.push(url.trim_end_matches('/').to_string());
        }
        origins
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    match non_empty(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(
                target = "storefront.config",
                "invalid {key} value {raw:?}; using default"
            );
            default
        }),
        None => default,
    }
}
