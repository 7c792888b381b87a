use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub checkout: CheckoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "data/prepstore.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret for bearer tokens; `SF_JWT_SECRET` wins when set.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

fn default_token_ttl_secs() -> u64 {
    60 * 60 * 12
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl AuthConfig {
    pub fn secret(&self) -> Option<&str> {
        self.jwt_secret.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutConfig {
    /// Simulated gateway round trip.
    #[serde(default = "default_gateway_latency_ms")]
    pub gateway_latency_ms: u64,
    /// Probability in `[0, 1]` that a simulated capture is declined.
    #[serde(default)]
    pub gateway_failure_rate: f64,
}

fn default_gateway_latency_ms() -> u64 {
    1500
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            gateway_latency_ms: default_gateway_latency_ms(),
            gateway_failure_rate: 0.0,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = Self::find_config_file()?;
        let config_content = std::fs::read_to_string(&config_path)?;
        let mut settings = Self::from_toml(&config_content)?;

        if let Ok(secret) = std::env::var("SF_JWT_SECRET") {
            if !secret.is_empty() {
                settings.auth.jwt_secret = Some(secret);
            }
        }

        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let settings: Settings = toml::from_str(content)?;
        if !(0.0..=1.0).contains(&settings.checkout.gateway_failure_rate) {
            return Err("checkout.gateway_failure_rate must be within [0, 1]".into());
        }
        Ok(settings)
    }

    fn find_config_file() -> Result<String, Box<dyn std::error::Error>> {
        let possible_names = ["custom-config.toml", "config.toml"];

        for name in &possible_names {
            if Path::new(name).exists() {
                return Ok(name.to_string());
            }
        }

        Err("Configuration file not found. Please create custom-config.toml or config.toml".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let settings = Settings::from_toml(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9100
            "#,
        )
        .unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.storage.database_path, "data/prepstore.db");
        assert_eq!(settings.checkout.gateway_latency_ms, 1500);
        assert!(settings.auth.secret().is_none());
    }

    #[test]
    fn failure_rate_out_of_range_is_rejected() {
        let err = Settings::from_toml(
            r#"
            [checkout]
            gateway_failure_rate = 1.5
            "#,
        );
        assert!(err.is_err());
    }
}
