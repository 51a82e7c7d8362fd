// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Service configuration.
//!
//! Supports a YAML file and environment variable overrides.

use crate::catalog::Course;
use chrono::Duration;
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "ENROLLMENT_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub payment: PaymentConfig,
    pub gateway: GatewayConfig,
    /// Seed catalog.
    pub courses: Vec<Course>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// ISO currency code recorded on every payment.
    pub currency: String,
    /// Unresolved payments older than this are failed on read.
    pub timeout_minutes: i64,
    pub reference_prefix: String,
}

impl PaymentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::minutes(self.timeout_minutes)
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            currency: "KES".to_string(),
            timeout_minutes: 5,
            reference_prefix: "MWZ".to_string(),
        }
    }
}

/// PayHero STK-push settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_username: Option<String>,
    pub api_password: Option<String>,
    pub channel_id: Option<u64>,
    pub callback_url: Option<String>,
    pub provider: String,
    pub timeout_seconds: u64,
}

impl GatewayConfig {
    /// True when every setting the HTTP adapter needs is present.
    pub fn is_configured(&self) -> bool {
        self.api_username.is_some()
            && self.api_password.is_some()
            && self.channel_id.is_some()
            && self.callback_url.is_some()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://backend.payhero.co.ke/api/v2/payments".to_string(),
            api_username: None,
            api_password: None,
            channel_id: None,
            callback_url: None,
            provider: "m-pesa".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SERVER_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("SERVER_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(currency) = std::env::var("PAYMENT_CURRENCY") {
            self.payment.currency = currency;
        }

        if let Ok(minutes) = std::env::var("PAYMENT_TIMEOUT_MINUTES") {
            if let Ok(m) = minutes.parse() {
                self.payment.timeout_minutes = m;
            }
        }

        if let Ok(url) = std::env::var("PAYHERO_BASE_URL") {
            self.gateway.base_url = url;
        }

        if let Ok(username) = std::env::var("PAYHERO_USERNAME") {
            self.gateway.api_username = Some(username);
        }

        if let Ok(password) = std::env::var("PAYHERO_PASSWORD") {
            self.gateway.api_password = Some(password);
        }

        if let Ok(channel) = std::env::var("PAYHERO_CHANNEL_ID") {
            if let Ok(c) = channel.parse() {
                self.gateway.channel_id = Some(c);
            }
        }

        if let Ok(url) = std::env::var("PAYHERO_CALLBACK_URL") {
            self.gateway.callback_url = Some(url);
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}': {1}")]
    FileRead(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}
