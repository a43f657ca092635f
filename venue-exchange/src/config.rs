//! Exchange-side configuration (spec.md §6 "Configuration").
//!
//! Completes the TODO sketched in the teacher's `bog-core::config::mod`
//! (a commented-out `config` crate layering that was never wired up):
//! a TOML file layered with `EXCHANGE__`-prefixed environment variable
//! overrides, deserialized straight into [`ExchangeSettings`].

use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub name: String,
}

impl DbSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.name
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSection {
    pub deals_flow_file: String,
    pub trading_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSettings {
    pub http: HttpSettings,
    pub db: DbSettings,
    pub exchange: ExchangeSection,
}

impl ExchangeSettings {
    /// Loads `path` (a TOML file) layered with `EXCHANGE__SECTION__KEY`
    /// environment variable overrides (e.g. `EXCHANGE__HTTP__PORT=9000`).
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        let settings = ConfigLoader::builder()
            .set_default("http.port", 8080)?
            .set_default("db.host", "localhost")?
            .set_default("db.port", 5432)?
            .set_default("exchange.trading_interval", 1)?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("EXCHANGE").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::load("config/exchange")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_over_default() {
        std::env::set_var("EXCHANGE__HTTP__PORT", "9100");
        std::env::set_var("EXCHANGE__DB__USERNAME", "venue");
        std::env::set_var("EXCHANGE__DB__PASSWORD", "secret");
        std::env::set_var("EXCHANGE__DB__NAME", "venue_exchange");
        std::env::set_var("EXCHANGE__EXCHANGE__DEALS_FLOW_FILE", "tape.csv");

        let settings = ExchangeSettings::load("config/does-not-exist").unwrap();
        assert_eq!(settings.http.port, 9100);
        assert_eq!(settings.db.username, "venue");
        assert_eq!(settings.exchange.deals_flow_file, "tape.csv");
        assert_eq!(settings.exchange.trading_interval, 1);

        std::env::remove_var("EXCHANGE__HTTP__PORT");
        std::env::remove_var("EXCHANGE__DB__USERNAME");
        std::env::remove_var("EXCHANGE__DB__PASSWORD");
        std::env::remove_var("EXCHANGE__DB__NAME");
        std::env::remove_var("EXCHANGE__EXCHANGE__DEALS_FLOW_FILE");
    }
}
