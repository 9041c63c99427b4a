use std::env::{self, VarError};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};

use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,
    pub admin_username: String,
    pub admin_password: SecretString,
    /// Minimum number of characters a registered password must have.
    pub password_min_length: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_owned(),
            server_port: 8080,
            admin_username: "admin".to_owned(),
            admin_password: SecretString::from("superSecretAdminPassword123".to_owned()),
            password_min_length: 9,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            server_host: var_or("SERVER_HOST", defaults.server_host)?,
            server_port: parsed_or("SERVER_PORT", defaults.server_port)?,
            admin_username: var_or("ADMIN_USERNAME", defaults.admin_username)?,
            admin_password: SecretString::from(var_or(
                "ADMIN_PASSWORD",
                defaults.admin_password.expose_secret().to_owned(),
            )?),
            password_min_length: parsed_or("PASSWORD_MIN_LENGTH", defaults.password_min_length)?,
        };

        log::info!(
            "Configuration loaded: {}:{}, admin user '{}'",
            config.server_host,
            config.server_port,
            config.admin_username
        );
        Ok(config)
    }
}

fn var_or(name: &str, default: String) -> Result<String, AppError> {
    match env::var(name) {
        Ok(value) => Ok(value),
        Err(VarError::NotPresent) => Ok(default),
        Err(e) => Err(e.into()),
    }
}

fn parsed_or<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| AppError::Config(format!("Invalid {}: {}", name, e))),
        Err(VarError::NotPresent) => Ok(default),
        Err(e) => Err(e.into()),
    }
}
