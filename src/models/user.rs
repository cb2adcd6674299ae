use super::{double_option, text_enum};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern"));

text_enum!(Role {
    Student => "STUDENT", "Student";
    Admin => "ADMIN", "Admin";
    SuperAdmin => "SUPER_ADMIN", "Super Admin";
});

impl Role {
    pub fn level(&self) -> u8 {
        match self {
            Role::Student => 0,
            Role::Admin => 1,
            Role::SuperAdmin => 2,
        }
    }

    /// STUDENT < ADMIN < SUPER_ADMIN
    pub fn satisfies(&self, required: Role) -> bool {
        self.level() >= required.level()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    #[sqlx(default)]
    pub role_display: String,
    pub library_id: Option<i64>,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn with_display(mut self) -> Self {
        self.role_display = self.role.display().to_string();
        self
    }
}

/// Credentials row used only by login and password change.
#[derive(Debug, FromRow)]
pub struct Credentials {
    pub id: i64,
    pub password_hash: String,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginResult {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct UserCreateData {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

impl UserCreateData {
    pub fn validate(&self, min_password_length: usize) -> Result<(), String> {
        if !is_valid_email(&self.email) {
            return Err("enter a valid email address".into());
        }
        if self.password.chars().count() < min_password_length {
            return Err(format!(
                "password must be at least {min_password_length} characters"
            ));
        }
        if self.full_name.trim().is_empty() {
            return Err("full_name is required".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct UserLoginData {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserAdminUpdate {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub library_id: Option<Option<i64>>,
}

impl UserAdminUpdate {
    /// Fields only a super admin may change.
    pub fn touches_privileges(&self) -> bool {
        self.role.is_some() || self.library_id.is_some()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email.trim())
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
