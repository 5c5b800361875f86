//! Admin authentication
//!
//! Login with username or email, opaque session tokens, login throttling
//! and first-admin bootstrap from configuration.

use crate::config::AdminConfig;
use crate::db::repositories::{SessionRepository, UserRepository};
use crate::models::{CreateUserInput, Session, User, UserRole};
use crate::services::password::{check_password_strength, hash_password, verify_password};
use crate::services::rate_limiter::LoginRateLimiter;
use anyhow::Context;
use std::sync::Arc;

/// Error types for authentication
#[derive(Debug, thiserror::Error)]
pub enum AuthServiceError {
    /// Wrong username/email or password
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Too many failed attempts for this username
    #[error("Too many failed login attempts, try again later")]
    TooManyAttempts,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Input for an admin login
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LoginInput {
    #[serde(alias = "username", alias = "email")]
    pub username_or_email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(username_or_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username_or_email: username_or_email.into(),
            password: password.into(),
        }
    }
}

pub struct AuthService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    limiter: LoginRateLimiter,
}

impl AuthService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            limiter: LoginRateLimiter::new(),
        }
    }

    /// Verify credentials and open a new session.
    ///
    /// Failures count against the account, whether it was named by
    /// username or by email; unknown names count against themselves. Five
    /// failures inside 15 minutes lock it out until the window passes.
    pub async fn login(&self, input: LoginInput) -> Result<(Session, User), AuthServiceError> {
        let login = input.username_or_email.trim();
        if login.is_empty() || input.password.is_empty() {
            return Err(AuthServiceError::InvalidCredentials);
        }

        let user = self
            .user_repo
            .get_by_login(login)
            .await
            .context("Failed to look up user")?;
        let throttle_key = user.as_ref().map_or(login, |user| user.username.as_str()).to_string();

        if self.limiter.is_username_limited(&throttle_key).await {
            tracing::warn!(login = %login, "Login blocked by rate limiter");
            return Err(AuthServiceError::TooManyAttempts);
        }

        let user = match user {
            Some(user)
                if verify_password(&input.password, &user.password_hash)
                    .context("Failed to verify password")? =>
            {
                user
            }
            _ => {
                self.limiter.record_failed_attempt(&throttle_key).await;
                return Err(AuthServiceError::InvalidCredentials);
            }
        };

        self.limiter.clear_username_attempts(&throttle_key).await;

        let session = self
            .session_repo
            .create(&Session::issue(user.id))
            .await
            .context("Failed to create session")?;

        tracing::info!(user_id = user.id, username = %user.username, "Admin logged in");
        Ok((session, user))
    }

    pub async fn logout(&self, token: &str) -> Result<(), AuthServiceError> {
        self.session_repo
            .delete(token)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Resolve a session token to its user; expired tokens are removed
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, AuthServiceError> {
        let session = match self
            .session_repo
            .get_by_id(token)
            .await
            .context("Failed to get session")?
        {
            Some(s) => s,
            None => return Ok(None),
        };

        if session.is_expired() {
            let _ = self.session_repo.delete(token).await;
            return Ok(None);
        }

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get user")?;
        Ok(user)
    }

    pub async fn create_user(&self, input: CreateUserInput) -> Result<User, AuthServiceError> {
        let username = input.username.trim();
        let email = input.email.trim();
        if username.is_empty() {
            return Err(AuthServiceError::ValidationError(
                "Username cannot be empty".to_string(),
            ));
        }
        if !email.contains('@') {
            return Err(AuthServiceError::ValidationError(
                "Invalid email address".to_string(),
            ));
        }
        check_password_strength(&input.password).map_err(AuthServiceError::ValidationError)?;

        for login in [username, email] {
            if self
                .user_repo
                .get_by_login(login)
                .await
                .context("Failed to check existing users")?
                .is_some()
            {
                return Err(AuthServiceError::UserExists(login.to_string()));
            }
        }

        let password_hash = hash_password(&input.password)?;
        let user = User::new(username.to_string(), email.to_string(), password_hash, input.role);
        let created = self
            .user_repo
            .create(&user)
            .await
            .context("Failed to create user")?;
        Ok(created)
    }

    /// Create the configured admin when the users table is empty.
    ///
    /// Returns the new user, or `None` when users already exist or no
    /// bootstrap credentials are configured.
    pub async fn bootstrap_admin(
        &self,
        config: &AdminConfig,
    ) -> Result<Option<User>, AuthServiceError> {
        let count = self.user_repo.count().await.context("Failed to count users")?;
        if count > 0 {
            return Ok(None);
        }

        let (Some(username), Some(password)) = (&config.username, &config.password) else {
            tracing::warn!("No users exist and no admin credentials are configured");
            return Ok(None);
        };
        let email = config
            .email
            .clone()
            .unwrap_or_else(|| format!("{}@localhost", username));

        let user = self
            .create_user(CreateUserInput {
                username: username.clone(),
                email,
                password: password.clone(),
                role: UserRole::Admin,
            })
            .await?;
        tracing::info!(username = %user.username, "Bootstrapped admin user");
        Ok(Some(user))
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AuthServiceError> {
        Ok(self.user_repo.list().await.context("Failed to list users")?)
    }

    /// Hourly maintenance: expired sessions and stale throttle entries
    pub async fn cleanup(&self) -> Result<u64, AuthServiceError> {
        let removed = self
            .session_repo
            .delete_expired()
            .await
            .context("Failed to delete expired sessions")?;
        self.limiter.cleanup().await;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;
    use crate::db::repositories::{SqlxSessionRepository, SqlxUserRepository};

    async fn setup_test_service() -> AuthService {
        let pool = migrated_pool().await;
        AuthService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool),
        )
    }

    fn admin_config() -> AdminConfig {
        AdminConfig {
            username: Some("admin".into()),
            email: Some("Admin@Example.com".into()),
            password: Some("password123".into()),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_admin_only_once() {
        let service = setup_test_service().await;

        let admin = service.bootstrap_admin(&admin_config()).await.unwrap().unwrap();
        assert_eq!(admin.role, UserRole::Admin);
        assert_eq!(admin.email, "admin@example.com");

        assert!(service.bootstrap_admin(&admin_config()).await.unwrap().is_none());
        assert_eq!(service.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_without_credentials_is_noop() {
        let service = setup_test_service().await;
        let created = service.bootstrap_admin(&AdminConfig::default()).await.unwrap();
        assert!(created.is_none());
    }

    #[tokio::test]
    async fn test_login_by_username_or_email_and_validate() {
        let service = setup_test_service().await;
        service.bootstrap_admin(&admin_config()).await.unwrap();

        let (session, user) = service
            .login(LoginInput::new("admin", "password123"))
            .await
            .unwrap();
        assert_eq!(user.username, "admin");

        let (_, by_email) = service
            .login(LoginInput::new("admin@example.com", "password123"))
            .await
            .unwrap();
        assert_eq!(by_email.id, user.id);

        let validated = service.validate_session(&session.id).await.unwrap();
        assert_eq!(validated.map(|u| u.id), Some(user.id));

        service.logout(&session.id).await.unwrap();
        assert!(service.validate_session(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user() {
        let service = setup_test_service().await;
        service.bootstrap_admin(&admin_config()).await.unwrap();

        let wrong = service.login(LoginInput::new("admin", "nope-nope")).await;
        assert!(matches!(wrong, Err(AuthServiceError::InvalidCredentials)));

        let unknown = service.login(LoginInput::new("ghost", "password123")).await;
        assert!(matches!(unknown, Err(AuthServiceError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_login_is_throttled_after_five_failures() {
        let service = setup_test_service().await;
        service.bootstrap_admin(&admin_config()).await.unwrap();

        for _ in 0..5 {
            let _ = service.login(LoginInput::new("admin", "bad-password")).await;
        }
        let blocked = service.login(LoginInput::new("admin", "password123")).await;
        assert!(matches!(blocked, Err(AuthServiceError::TooManyAttempts)));
    }

    #[tokio::test]
    async fn test_throttle_covers_username_and_email() {
        let service = setup_test_service().await;
        service.bootstrap_admin(&admin_config()).await.unwrap();

        for login in ["admin", "ADMIN", "admin@example.com", "Admin@Example.com", "admin"] {
            let failed = service.login(LoginInput::new(login, "bad-password")).await;
            assert!(matches!(failed, Err(AuthServiceError::InvalidCredentials)));
        }
        for login in ["admin", "admin@example.com"] {
            let blocked = service.login(LoginInput::new(login, "password123")).await;
            assert!(matches!(blocked, Err(AuthServiceError::TooManyAttempts)));
        }

        // Unknown names are throttled on their own
        let other = service.login(LoginInput::new("ghost", "password123")).await;
        assert!(matches!(other, Err(AuthServiceError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_create_user_validation() {
        let service = setup_test_service().await;
        service.bootstrap_admin(&admin_config()).await.unwrap();

        let short = service
            .create_user(CreateUserInput {
                username: "editor".into(),
                email: "editor@example.com".into(),
                password: "short".into(),
                role: UserRole::Editor,
            })
            .await;
        assert!(matches!(short, Err(AuthServiceError::ValidationError(_))));

        let duplicate = service
            .create_user(CreateUserInput {
                username: "admin".into(),
                email: "other@example.com".into(),
                password: "password123".into(),
                role: UserRole::Editor,
            })
            .await;
        assert!(matches!(duplicate, Err(AuthServiceError::UserExists(_))));
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_sessions() {
        let service = setup_test_service().await;
        let admin = service.bootstrap_admin(&admin_config()).await.unwrap().unwrap();

        let mut expired = Session::issue(admin.id);
        expired.expires_at = chrono::Utc::now() - chrono::Duration::hours(1);
        service.session_repo.create(&expired).await.unwrap();

        assert_eq!(service.cleanup().await.unwrap(), 1);
        assert!(service.validate_session(&expired.id).await.unwrap().is_none());
    }
}
