use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::state::AppState;
use crate::users::{Role, User};
use axum::{
    body::Body,
    extract::State,
    http::{self, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token encoding failed: {0}")]
    Encode(String),
    #[error("token rejected: {0}")]
    Invalid(String),
}

/// Authenticated account, inserted into request extensions by
/// [`require_auth`].
#[derive(Clone, Debug)]
pub struct AuthUser(pub User);

/// Account behind an optional token; `None` for guests.
#[derive(Clone, Debug, Default)]
pub struct MaybeUser(pub Option<User>);

pub fn issue_token(user: &User, config: &AppConfig) -> Result<String, TokenError> {
    let now = Utc::now();
    let claims = Claims {
        id: user.id.clone(),
        username: user.username.clone(),
        email: user.email.clone(),
        role: user.role,
        iat: now.timestamp(),
        exp: (now + Duration::hours(config.jwt_ttl_hours)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|err| TokenError::Encode(err.to_string()))
}

pub fn verify_token(token: &str, config: &AppConfig) -> Result<Claims, TokenError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|err| TokenError::Invalid(err.to_string()))
}

/// Rejects requests without a valid session token. The token's account must
/// still exist and be active.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_token(request.headers()) else {
        return ServiceError::unauthorized("auth", "No authentication token, authorization denied")
            .into_response();
    };
    match resolve_user(&state, &token).await {
        Ok(user) => {
            request.extensions_mut().insert(AuthUser(user));
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// Attaches the account when a valid token is present; guests pass through.
pub async fn attach_user(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let user = match extract_token(request.headers()) {
        Some(token) => match resolve_user(&state, &token).await {
            Ok(user) => Some(user),
            Err(err) => return err.into_response(),
        },
        None => None,
    };
    request.extensions_mut().insert(MaybeUser(user));
    next.run(request).await
}

/// Role gate; must run inside [`require_auth`].
pub async fn require_admin(request: Request<Body>, next: Next) -> Response {
    match request.extensions().get::<AuthUser>() {
        None => ServiceError::unauthorized("auth", "Authentication required").into_response(),
        Some(AuthUser(user)) if !user.is_admin() => ServiceError::forbidden(
            "auth",
            format!(
                "User role {} is not authorized to access this route",
                user.role.as_str()
            ),
        )
        .into_response(),
        Some(_) => next.run(request).await,
    }
}

async fn resolve_user(state: &AppState, token: &str) -> Result<User, ServiceError> {
    let claims = verify_token(token, &state.config).map_err(|err| {
        debug!(target = "storefront.auth", error = %err, "token verification failed");
        ServiceError::unauthorized("auth", "Not authorized, token verification failed")
    })?;
    let user = state
        .db
        .find_user(&claims.id)
        .await
        .map_err(|err| ServiceError::from_store("auth", err))?;
    match user {
        Some(user) if user.is_active => Ok(user),
        _ => {
            warn!(target = "storefront.auth", user_id = %claims.id, "token for missing account");
            Err(ServiceError::unauthorized("auth", "User not found"))
        }
    }
}

fn extract_token(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        let token = raw[6..].trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == "token")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Per-identifier token buckets slowing down password guessing.
/// Buckets are pruned once the map outgrows this many entries.
const THROTTLE_PRUNE_FLOOR: usize = 1024;

#[derive(Clone)]
pub struct LoginThrottle {
    rate_per_sec: f64,
    capacity: f64,
    prune_floor: usize,
    buckets: Arc<Mutex<Buckets>>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

struct Buckets {
    by_key: HashMap<String, BucketState>,
    prune_at: usize,
}

impl LoginThrottle {
    pub fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self::with_prune_floor(rate_per_sec, capacity, THROTTLE_PRUNE_FLOOR)
    }

    fn with_prune_floor(rate_per_sec: f64, capacity: f64, prune_floor: usize) -> Self {
        Self {
            rate_per_sec,
            capacity,
            prune_floor,
            buckets: Arc::new(Mutex::new(Buckets {
                by_key: HashMap::new(),
                prune_at: prune_floor,
            })),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.login_rate_per_sec, config.login_rate_capacity)
    }

    /// Takes one attempt for `key`; on exhaustion returns the seconds until
    /// the next attempt is allowed.
    pub async fn consume(&self, key: &str) -> Result<(), u64> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        if guard.by_key.len() >= guard.prune_at {
            self.prune_idle(&mut guard, now);
        }
        let state = guard
            .by_key
            .entry(key.to_lowercase())
            .or_insert_with(|| BucketState {
                tokens: self.capacity,
                last_refill: now,
            });

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err((deficit / self.rate_per_sec).ceil().max(1.0) as u64)
        }
    }

    /// Drops buckets that have refilled to capacity; they behave exactly like
    /// a missing bucket. The next prune waits until the map doubles.
    fn prune_idle(&self, buckets: &mut Buckets, now: Instant) {
        let before = buckets.by_key.len();
        buckets.by_key.retain(|_, state| {
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.tokens + elapsed * self.rate_per_sec < self.capacity
        });
        buckets.prune_at = (buckets.by_key.len() * 2).max(self.prune_floor);
        debug!(
            target = "storefront.auth",
            before,
            after = buckets.by_key.len(),
            "pruned login throttle buckets"
        );
    }

    /// Forget `key` after a successful login.
    pub async fn reset(&self, key: &str) {
        self.buckets.lock().await.by_key.remove(&key.to_lowercase());
    }
}
