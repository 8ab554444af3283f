//! # Plugin configuration
//!
//! Options are assembled in code through [`PluginOptions`] because model
//! descriptors carry plugin and hook closures. The serializable subset,
//! [`PluginConfig`], can be read from Rocket's figment instead:
//!
//! ```toml
//! [default.mongodactyl]
//! url = "mongodb://localhost:27017"
//! name = "client1"
//! force_close = true
//! server_selection_timeout_ms = 5000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::schema::ModelDescriptor;

pub const DEFAULT_SERVER_SELECTION_TIMEOUT_MS: u64 = 7500;

/// Driver-level connect options. Unset fields fall back to the driver's own
/// defaults, except the server selection timeout which defaults to 7.5s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "rocket::serde", default)]
pub struct ConnectOptions {
    pub server_selection_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
    pub app_name: Option<String>,
}

impl ConnectOptions {
    /// Caller values layered over the defaults; the caller wins on conflict.
    pub fn merged_over_defaults(&self) -> Self {
        let mut merged = self.clone();
        merged
            .server_selection_timeout_ms
            .get_or_insert(DEFAULT_SERVER_SELECTION_TIMEOUT_MS);
        merged
    }

    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_millis(
            self.server_selection_timeout_ms
                .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT_MS),
        )
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

/// Everything a registration needs, minus the models.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct PluginConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub force_close: Option<bool>,
    #[serde(flatten)]
    pub connect: ConnectOptions,
}

#[derive(Debug, Clone)]
pub struct PluginOptions {
    pub url: String,
    pub models: Vec<ModelDescriptor>,
    pub name: Option<String>,
    pub force_close: Option<bool>,
    pub connect: ConnectOptions,
}

impl PluginOptions {
    pub fn new(url: impl Into<String>, models: Vec<ModelDescriptor>) -> Self {
        Self {
            url: url.into(),
            models,
            name: None,
            force_close: None,
            connect: ConnectOptions::default(),
        }
    }

    pub fn from_config(config: PluginConfig, models: Vec<ModelDescriptor>) -> Self {
        Self {
            url: config.url,
            models,
            name: config.name,
            force_close: config.force_close,
            connect: config.connect,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_force_close(mut self, force_close: bool) -> Self {
        self.force_close = Some(force_close);
        self
    }

    pub fn with_connect(mut self, connect: ConnectOptions) -> Self {
        self.connect = connect;
        self
    }

    /// Shutdown closes are forced unless the caller opted out.
    pub fn force_close(&self) -> bool {
        self.force_close.unwrap_or(true)
    }
}
