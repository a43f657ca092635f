//! Broker-side configuration (spec.md §6): broker identity, the
//! tickers it is allowed to trade, and the exchange RPC target.

use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    pub id: i64,
    pub tickers: Vec<String>,
    pub exchange_endpoint: String,
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
pub struct BrokerSettings {
    pub broker: BrokerSection,
    pub db: DbSettings,
}

impl BrokerSettings {
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        let settings = ConfigLoader::builder()
            .set_default("db.host", "localhost")?
            .set_default("db.port", 5432)?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("BROKER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("broker.tickers"),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::load("config/broker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_broker_identity_and_tickers_from_env() {
        std::env::set_var("BROKER__BROKER__ID", "7");
        std::env::set_var("BROKER__BROKER__TICKERS", "A,B,C");
        std::env::set_var("BROKER__BROKER__EXCHANGE_ENDPOINT", "http://localhost:8080");
        std::env::set_var("BROKER__DB__USERNAME", "broker7");
        std::env::set_var("BROKER__DB__PASSWORD", "secret");
        std::env::set_var("BROKER__DB__NAME", "venue_broker");

        let settings = BrokerSettings::load("config/does-not-exist").unwrap();
        assert_eq!(settings.broker.id, 7);
        assert_eq!(settings.broker.exchange_endpoint, "http://localhost:8080");

        std::env::remove_var("BROKER__BROKER__ID");
        std::env::remove_var("BROKER__BROKER__TICKERS");
        std::env::remove_var("BROKER__BROKER__EXCHANGE_ENDPOINT");
        std::env::remove_var("BROKER__DB__USERNAME");
        std::env::remove_var("BROKER__DB__PASSWORD");
        std::env::remove_var("BROKER__DB__NAME");
    }
}
