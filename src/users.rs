use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::models::{Rfc3339Millis, new_object_id};
use crate::store::{Database, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none};
use tracing::{info, warn};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 30;
const PASSWORD_MIN: usize = 6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Customer => "customer",
        }
    }
}

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(rename = "password")]
    pub password_hash: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default, rename = "emailVerified")]
    pub email_verified: bool,
    #[serde(default = "default_true", rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "lastLogin")]
    #[serde_as(as = "Option<Rfc3339Millis>")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt")]
    #[serde_as(as = "Rfc3339Millis")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    #[serde_as(as = "Rfc3339Millis")]
    pub updated_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub full_name: String,
    pub phone: Option<String>,
    pub address: Option<Address>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub pincode: String,
}

fn default_true() -> bool {
    true
}

/// What clients get to see of an account.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub full_name: String,
    pub profile: Profile,
    #[serde(rename = "emailVerified")]
    pub email_verified: bool,
    #[serde(rename = "lastLogin")]
    #[serde_as(as = "Option<Rfc3339Millis>")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt")]
    #[serde_as(as = "Rfc3339Millis")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn public_profile(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            full_name: self.profile.full_name.clone(),
            profile: self.profile.clone(),
            email_verified: self.email_verified,
            last_login: self.last_login,
            created_at: self.created_at,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Single-line street address, as the signup form sends it.
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// Username or email.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub address: Option<Address>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

pub async fn register(
    db: &Database,
    config: &AppConfig,
    request: RegisterRequest,
) -> Result<User, ServiceError> {
    let username = request.username.trim().to_string();
    let email = request.email.trim().to_lowercase();
    if username.is_empty() || email.is_empty() || request.password.is_empty() {
        return Err(ServiceError::invalid_input(
            "register",
            "Username, email, and password are required",
        ));
    }
    let name_len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&name_len) {
        return Err(ServiceError::invalid_input(
            "register",
            format!("Username must be {USERNAME_MIN}-{USERNAME_MAX} characters"),
        ));
    }
    if !looks_like_email(&email) {
        return Err(ServiceError::invalid_input(
            "register",
            "Please provide a valid email",
        ));
    }
    if request.password.chars().count() < PASSWORD_MIN {
        return Err(ServiceError::invalid_input(
            "register",
            format!("Password must be at least {PASSWORD_MIN} characters"),
        ));
    }

    let password_hash = hash_password(request.password, config.bcrypt_cost).await?;
    let now = Utc::now();
    let user = User {
        id: new_object_id(),
        username,
        email,
        password_hash,
        role: Role::Customer,
        profile: Profile {
            full_name: request.full_name.unwrap_or_default().trim().to_string(),
            phone: request.phone.filter(|p| !p.trim().is_empty()),
            address: request
                .address
                .filter(|a| !a.trim().is_empty())
                .map(|street| Address {
                    street,
                    ..Address::default()
                }),
            avatar: None,
        },
        email_verified: false,
        is_active: true,
        last_login: None,
        created_at: now,
        updated_at: now,
    };

    db.insert_user(&user)
        .await
        .map_err(|err| ServiceError::from_store("register", err))?;
    info!(
        target = "storefront.users",
        user_id = %user.id,
        username = %user.username,
        "user registered"
    );
    Ok(user)
}

/// Checks credentials and stamps `lastLogin`. Unknown account and wrong
/// password are indistinguishable to the caller.
pub async fn authenticate(db: &Database, request: LoginRequest) -> Result<User, ServiceError> {
    let identifier = request.username.trim();
    if identifier.is_empty() || request.password.is_empty() {
        return Err(ServiceError::invalid_input(
            "login",
            "Username and password are required",
        ));
    }
    let invalid = || ServiceError::unauthorized("login", "Invalid credentials");

    let Some(mut user) = db
        .find_user_by_login(identifier)
        .await
        .map_err(|err| ServiceError::from_store("login", err))?
    else {
        info!(target = "storefront.users", identifier, "login for unknown account");
        return Err(invalid());
    };
    if !user.is_active {
        return Err(invalid());
    }
    if !verify_password(request.password, user.password_hash.clone()).await? {
        info!(target = "storefront.users", user_id = %user.id, "login with wrong password");
        return Err(invalid());
    }

    let now = Utc::now();
    user.last_login = Some(now);
    user.updated_at = now;
    db.replace_user(&user)
        .await
        .map_err(|err| ServiceError::from_store("login", err))?;
    Ok(user)
}

pub async fn update_profile(
    db: &Database,
    config: &AppConfig,
    mut user: User,
    request: UpdateProfileRequest,
) -> Result<User, ServiceError> {
    if let Some(name) = request.full_name {
        user.profile.full_name = name.trim().to_string();
    }
    if let Some(phone) = request.phone {
        user.profile.phone = Some(phone).filter(|p| !p.trim().is_empty());
    }
    if let Some(avatar) = request.avatar {
        user.profile.avatar = Some(avatar).filter(|a| !a.trim().is_empty());
    }
    if let Some(address) = request.address {
        user.profile.address = Some(address);
    }
    if let Some(new_password) = request.new_password {
        let Some(current) = request.current_password else {
            return Err(ServiceError::invalid_input(
                "profile",
                "Current password is required to set a new one",
            ));
        };
        if !verify_password(current, user.password_hash.clone()).await? {
            return Err(ServiceError::unauthorized(
                "profile",
                "Current password is incorrect",
            ));
        }
        if new_password.chars().count() < PASSWORD_MIN {
            return Err(ServiceError::invalid_input(
                "profile",
                format!("Password must be at least {PASSWORD_MIN} characters"),
            ));
        }
        user.password_hash = hash_password(new_password, config.bcrypt_cost).await?;
    }
    user.updated_at = Utc::now();
    db.replace_user(&user)
        .await
        .map_err(|err| ServiceError::from_store("profile", err))?;
    Ok(user)
}

/// Creates the configured admin account when the store has no admin yet.
pub async fn seed_admin(db: &Database, config: &AppConfig) -> Result<(), ServiceError> {
    let admins = db
        .count_users(Some(Role::Admin))
        .await
        .map_err(|err| ServiceError::from_store("seed_admin", err))?;
    if admins > 0 {
        info!(target = "storefront.users", "admin user already exists");
        return Ok(());
    }

    let seed = &config.admin;
    let now = Utc::now();
    let admin = User {
        id: new_object_id(),
        username: seed.username.clone(),
        email: seed.email.to_lowercase(),
        password_hash: hash_password(seed.password.clone(), config.bcrypt_cost).await?,
        role: Role::Admin,
        profile: Profile {
            full_name: seed.full_name.clone(),
            ..Profile::default()
        },
        email_verified: true,
        is_active: true,
        last_login: None,
        created_at: now,
        updated_at: now,
    };
    match db.insert_user(&admin).await {
        Ok(()) => {
            warn!(
                target = "storefront.users",
                username = %admin.username,
                "default admin user created; change its password"
            );
            Ok(())
        }
        Err(StoreError::Duplicate { field }) => {
            warn!(
                target = "storefront.users",
                field = %field,
                "admin seed skipped; a non-admin account holds the same {field}"
            );
            Ok(())
        }
        Err(err) => Err(ServiceError::from_store("seed_admin", err)),
    }
}

async fn hash_password(password: String, cost: u32) -> Result<String, ServiceError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|err| ServiceError::internal("password", err.to_string()))?
        .map_err(|err| ServiceError::internal("password", err.to_string()))
}

async fn verify_password(password: String, hash: String) -> Result<bool, ServiceError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|err| ServiceError::internal("password", err.to_string()))?
        .map_err(|err| ServiceError::internal("password", err.to_string()))
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceErrorKind;
    use std::path::PathBuf;

    fn config() -> AppConfig {
        AppConfig::for_tests(PathBuf::from("/tmp/storefront-test-uploads"))
    }

    fn signup(username: &str, email: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: "yarn-and-hooks".into(),
            full_name: Some("Asha Rao".into()),
            phone: None,
            address: Some("12 Loom Street".into()),
        }
    }

    #[tokio::test]
    async fn register_then_login_by_email() {
        let db = Database::in_memory();
        let cfg = config();
        let user = register(&db, &cfg, signup("asha", "Asha@Example.com"))
            .await
            .expect("register");
        assert_eq!(user.email, "asha@example.com");
        assert_eq!(user.role, Role::Customer);
        assert_eq!(user.profile.address.as_ref().unwrap().street, "12 Loom Street");
        assert_ne!(user.password_hash, "yarn-and-hooks");

        let logged_in = authenticate(
            &db,
            LoginRequest {
                username: "asha@example.com".into(),
                password: "yarn-and-hooks".into(),
            },
        )
        .await
        .expect("login");
        assert_eq!(logged_in.id, user.id);
        assert!(logged_in.last_login.is_some());
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let db = Database::in_memory();
        let cfg = config();
        register(&db, &cfg, signup("asha", "asha@example.com"))
            .await
            .unwrap();
        let err = register(&db, &cfg, signup("asha", "other@example.com"))
            .await
            .expect_err("duplicate");
        assert_eq!(
            err.kind(),
            &ServiceErrorKind::Conflict {
                field: "username".into()
            }
        );
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let db = Database::in_memory();
        let cfg = config();
        register(&db, &cfg, signup("asha", "asha@example.com"))
            .await
            .unwrap();
        let err = authenticate(
            &db,
            LoginRequest {
                username: "asha".into(),
                password: "wrong-pass".into(),
            },
        )
        .await
        .expect_err("bad password");
        assert_eq!(err.kind(), &ServiceErrorKind::Unauthorized);
        assert_eq!(err.message(), "Invalid credentials");
    }

    #[tokio::test]
    async fn short_password_rejected() {
        let db = Database::in_memory();
        let mut request = signup("asha", "asha@example.com");
        request.password = "abc".into();
        let err = register(&db, &config(), request).await.expect_err("short");
        assert_eq!(err.kind(), &ServiceErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn password_change_requires_current_password() {
        let db = Database::in_memory();
        let cfg = config();
        let user = register(&db, &cfg, signup("asha", "asha@example.com"))
            .await
            .unwrap();
        let err = update_profile(
            &db,
            &cfg,
            user.clone(),
            UpdateProfileRequest {
                new_password: Some("new-secret".into()),
                ..UpdateProfileRequest::default()
            },
        )
        .await
        .expect_err("needs current password");
        assert_eq!(err.kind(), &ServiceErrorKind::InvalidInput);

        let updated = update_profile(
            &db,
            &cfg,
            user,
            UpdateProfileRequest {
                full_name: Some("Asha R.".into()),
                current_password: Some("yarn-and-hooks".into()),
                new_password: Some("new-secret".into()),
                ..UpdateProfileRequest::default()
            },
        )
        .await
        .expect("update");
        assert_eq!(updated.profile.full_name, "Asha R.");
        authenticate(
            &db,
            LoginRequest {
                username: "asha".into(),
                password: "new-secret".into(),
            },
        )
        .await
        .expect("login with new password");
    }

    #[tokio::test]
    async fn admin_seed_is_idempotent() {
        let db = Database::in_memory();
        let cfg = config();
        seed_admin(&db, &cfg).await.unwrap();
        seed_admin(&db, &cfg).await.unwrap();
        assert_eq!(db.count_users(Some(Role::Admin)).await.unwrap(), 1);
    }

    #[test]
    fn email_shape_check() {
        assert!(looks_like_email("a@b.co"));
        assert!(!looks_like_email("no-at-sign"));
        assert!(!looks_like_email("@b.co"));
        assert!(!looks_like_email("a@localhost"));
    }
}
