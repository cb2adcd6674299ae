//! Application settings.
//!
//! Layered as: built-in defaults, an optional TOML file, then `LIBRES__*`
//! environment variables. `DATABASE_URL` and `FUNCTIONS_CUSTOMHANDLER_PORT`
//! are honoured last so existing deployments keep working.

use serde::{Deserialize, Serialize};
use std::{
    env::var,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub booking: BookingConfig,
    pub reservation: ReservationConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub session_ttl_hours: i64,
    pub min_password_length: usize,
}

/// Seat booking rules. `max_hours_free` applies to users without a plan.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BookingConfig {
    pub max_hours_free: i32,
    pub max_days_ahead: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReservationConfig {
    pub loan_days: i64,
    pub max_active_free: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    pub enabled: bool,
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

impl Settings {
    pub fn new() -> Result<Self, SettingsError> {
        let file = var("LIBRES_CONFIG").unwrap_or_else(|_| "config".to_string());
        let defaults = config::Config::try_from(&Settings::default())?;

        let mut settings: Settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name(&file).required(false))
            .add_source(config::Environment::with_prefix("LIBRES").separator("__"))
            .build()?
            .try_deserialize()?;

        if let Ok(url) = var("DATABASE_URL") {
            settings.database.url = url;
        }

        if let Some(port) = var("FUNCTIONS_CUSTOMHANDLER_PORT")
            .ok()
            .and_then(|text| text.parse().ok())
        {
            settings.server.port = port;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.database.url.trim().is_empty() {
            return Err(SettingsError::Invalid("database.url", "must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(SettingsError::Invalid("database.max_connections", "must be positive".into()));
        }
        if self.auth.session_ttl_hours <= 0 {
            return Err(SettingsError::Invalid("auth.session_ttl_hours", "must be positive".into()));
        }
        if self.booking.max_hours_free <= 0 || self.booking.max_days_ahead <= 0 {
            return Err(SettingsError::Invalid("booking", "limits must be positive".into()));
        }
        if self.reservation.loan_days <= 0 || self.reservation.max_active_free <= 0 {
            return Err(SettingsError::Invalid("reservation", "limits must be positive".into()));
        }
        if self.catalog.enabled && url::Url::parse(&self.catalog.base_url).is_err() {
            return Err(SettingsError::Invalid("catalog.base_url", self.catalog.base_url.clone()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/libres".to_string(),
                max_connections: 10,
            },
            auth: AuthConfig {
                session_ttl_hours: 24 * 7,
                min_password_length: 8,
            },
            booking: BookingConfig {
                max_hours_free: 4,
                max_days_ahead: 14,
            },
            reservation: ReservationConfig {
                loan_days: 14,
                max_active_free: 2,
            },
            catalog: CatalogConfig {
                enabled: true,
                base_url: "https://iss.ndl.go.jp/api/sru".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.bind_addr().port(), 3000);
    }

    #[test]
    fn test_rejects_empty_database_url() {
        let mut settings = Settings::default();
        settings.database.url = "  ".into();
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid("database.url", _))
        ));
    }

    #[test]
    fn test_rejects_zero_limits() {
        let mut settings = Settings::default();
        settings.reservation.max_active_free = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.booking.max_hours_free = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_catalog_url_only_when_enabled() {
        let mut settings = Settings::default();
        settings.catalog.base_url = "not a url".into();
        assert!(settings.validate().is_err());

        settings.catalog.enabled = false;
        assert!(settings.validate().is_ok());
    }
}
