use std::fmt::Display;

use crate::{proxy::ProxySigner, webhook_cache::DEFAULT_DB_PATH};

/// Everything the bot needs from the environment.
#[derive(Debug)]
pub struct Config {
    pub bot_token: String,
    pub signer: ProxySigner,
    /// sqlx URL of the webhook cache database.
    pub webhook_db: String,
}

#[derive(Debug)]
pub enum ConfigError {
    /// Variable is not set, or is set to nothing.
    Missing(&'static str),
    /// Variable should be hex, but isn't.
    NotHex(&'static str, hex::FromHexError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(name) => write!(f, "environment variable {name} is not set"),
            Self::NotHex(name, e) => {
                write!(f, "environment variable {name} is not a valid hex string: {e}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Read the config from the process environment.
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the config using `lookup` to get variables by name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let bot_token = required("BOT_TOKEN")?;
        let key = required("PROXY_KEY")?;
        let salt = required("PROXY_SALT")?;
        let proxy_url = required("PROXY_URL")?;

        let key = hex::decode(key.trim()).map_err(|e| ConfigError::NotHex("PROXY_KEY", e))?;
        let salt = hex::decode(salt.trim()).map_err(|e| ConfigError::NotHex("PROXY_SALT", e))?;

        let webhook_db = lookup("WEBHOOK_DB")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        Ok(Config {
            bot_token: bot_token.trim().to_string(),
            signer: ProxySigner::new(key, salt, proxy_url.trim()),
            webhook_db,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const FULL: &[(&str, &str)] = &[
        ("BOT_TOKEN", "token"),
        ("PROXY_KEY", "943b421c"),
        ("PROXY_SALT", "520f986b"),
        ("PROXY_URL", "https://proxy.example.com/"),
    ];

    #[test]
    fn everything_present() {
        let vars = env(FULL);
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.bot_token, "token");
        assert_eq!(config.signer.base_url(), "https://proxy.example.com/");
        assert_eq!(config.webhook_db, DEFAULT_DB_PATH);
    }

    #[test]
    fn missing_variables_fail() {
        for (name, _) in FULL {
            let mut vars = env(FULL);
            vars.remove(*name);
            let err = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
            assert!(matches!(err, ConfigError::Missing(n) if n == *name));

            vars.insert(name.to_string(), "  ".to_string());
            let err = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
            assert!(matches!(err, ConfigError::Missing(n) if n == *name));
        }
    }

    #[test]
    fn bad_hex_fails() {
        let mut vars = env(FULL);
        vars.insert("PROXY_SALT".to_string(), "xyz".to_string());
        let err = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::NotHex("PROXY_SALT", _)));
    }

    #[test]
    fn custom_database() {
        let mut vars = env(FULL);
        vars.insert("WEBHOOK_DB".to_string(), "sqlite:/tmp/x.sqlite".to_string());
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.webhook_db, "sqlite:/tmp/x.sqlite");
    }
}
