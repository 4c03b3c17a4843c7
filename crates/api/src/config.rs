//! API server configuration

use anyhow::Context;

/// Server configuration loaded from the environment at startup.
///
/// Component-specific settings (webhook secret, bypass list, pipeline
/// credentials) are read by their owning services; this struct only
/// carries what the server binary itself needs.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        Ok(Self {
            database_url,
            bind_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn missing_database_url_fails() {
        std::env::remove_var("DATABASE_URL");
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn bind_address_defaults() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/lotlens");
        std::env::remove_var("BIND_ADDRESS");
        let config = Config::from_env().unwrap();
        std::env::remove_var("DATABASE_URL");

        assert_eq!(config.bind_address, "0.0.0.0:8080");
    }
}
