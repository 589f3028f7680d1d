use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Ordinal privilege levels. Higher values carry more privilege; checks are
/// always `>=` against a required level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum SecurityLevel {
    User = 0,
    Supervisor = 1,
    Manager = 2,
    Admin = 3,
}

impl SecurityLevel {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub security_level: i32,
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    #[serde(skip_serializing)]
    pub token_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub async fn find_by_username_or_email(
        login: &str,
        pool: &sqlx::PgPool,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1 OR email = $1")
            .bind(login)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_api_token(
        token: &str,
        pool: &sqlx::PgPool,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE api_token = $1")
            .bind(token)
            .fetch_optional(pool)
            .await
    }

    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }

    pub fn has_permission_level(&self, required: SecurityLevel) -> bool {
        self.security_level >= required.as_i32()
    }

    pub fn is_admin(&self) -> bool {
        self.has_permission_level(SecurityLevel::Admin)
    }

    /// A token is valid only when the stored value matches exactly and the
    /// expiry is still in the future. Mismatch and expiry are not
    /// distinguished to the caller.
    pub fn check_api_token(&self, presented: &str, now: DateTime<Utc>) -> bool {
        token_is_valid(
            self.api_token.as_deref(),
            self.token_expiry,
            presented,
            now,
        )
    }

    /// Serializable form for the cross-deployment user sync. Includes the
    /// password hash so the peer can authenticate the same credentials.
    pub fn to_sync_record(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "username": self.username,
            "email": self.email,
            "password_hash": self.password_hash,
            "first_name": self.first_name,
            "last_name": self.last_name,
            "security_level": self.security_level,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }
}

pub fn token_is_valid(
    stored: Option<&str>,
    expiry: Option<DateTime<Utc>>,
    presented: &str,
    now: DateTime<Utc>,
) -> bool {
    let (Some(stored), Some(expiry)) = (stored, expiry) else {
        return false;
    };
    stored == presented && now <= expiry
}

/// 64 hex characters, the same width `secrets.token_hex(32)` produces.
pub fn generate_token_value() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn token_value_is_64_hex_chars() {
        let token = generate_token_value();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token_value());
    }

    #[test]
    fn expired_token_is_rejected_even_on_exact_match() {
        let now = Utc::now();
        let expired = now - Duration::days(1);
        assert!(!token_is_valid(Some("abc"), Some(expired), "abc", now));
    }

    #[test]
    fn valid_token_requires_match_and_future_expiry() {
        let now = Utc::now();
        let future = now + Duration::days(30);
        assert!(token_is_valid(Some("abc"), Some(future), "abc", now));
        assert!(!token_is_valid(Some("abc"), Some(future), "abd", now));
        assert!(!token_is_valid(None, Some(future), "abc", now));
        assert!(!token_is_valid(Some("abc"), None, "abc", now));
    }

    #[test]
    fn security_levels_are_ordinal() {
        assert!(SecurityLevel::Admin.as_i32() > SecurityLevel::Manager.as_i32());
        assert!(SecurityLevel::Manager.as_i32() > SecurityLevel::Supervisor.as_i32());
        assert!(SecurityLevel::Supervisor.as_i32() > SecurityLevel::User.as_i32());
    }
}
