//! Runtime configuration
//!
//! Loaded from a TOML file, then overridden by `RASTRO_*` environment
//! variables. Every field has a default, so an empty file is valid.
//!
//! # Example rastro.toml
//!
//! ```toml
//! [storage]
//! request_enabled = true
//! operation_enabled = false
//! async_enabled = true
//! isolation_boundary = false
//!
//! [dispatch]
//! handler_exception_limit = 5
//!
//! [logging]
//! filter = "rastro=debug"
//! ```

use crate::context::{
    AsyncFlowStorageFactory, BoundarySafeFactory, ContextStorageFactory, OperationStorageFactory,
    RequestStorageFactory, ThreadLocalStorageFactory,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

pub const ENV_LOG: &str = "RASTRO_LOG";
pub const ENV_HANDLER_EXCEPTION_LIMIT: &str = "RASTRO_HANDLER_EXCEPTION_LIMIT";
pub const ENV_REQUEST_STORAGE: &str = "RASTRO_REQUEST_STORAGE";
pub const ENV_OPERATION_STORAGE: &str = "RASTRO_OPERATION_STORAGE";
pub const ENV_ASYNC_STORAGE: &str = "RASTRO_ASYNC_STORAGE";
pub const ENV_ISOLATION_BOUNDARY: &str = "RASTRO_ISOLATION_BOUNDARY";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub storage: StorageConfig,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
}

/// Which context storages the host supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub request_enabled: bool,
    pub operation_enabled: bool,
    pub async_enabled: bool,
    /// Box async-flow values so they can cross an isolation boundary
    pub isolation_boundary: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            request_enabled: true,
            operation_enabled: true,
            async_enabled: true,
            isolation_boundary: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// Consecutive failures after which a handler is disabled for a method
    pub handler_exception_limit: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            handler_exception_limit: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive string
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl CoreConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, or `path` when given, with environment overrides applied
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `RASTRO_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(filter) = std::env::var(ENV_LOG) {
            self.logging.filter = filter;
        }
        if let Some(limit) = env_parse(ENV_HANDLER_EXCEPTION_LIMIT)? {
            self.dispatch.handler_exception_limit = limit;
        }
        if let Some(enabled) = env_flag(ENV_REQUEST_STORAGE)? {
            self.storage.request_enabled = enabled;
        }
        if let Some(enabled) = env_flag(ENV_OPERATION_STORAGE)? {
            self.storage.operation_enabled = enabled;
        }
        if let Some(enabled) = env_flag(ENV_ASYNC_STORAGE)? {
            self.storage.async_enabled = enabled;
        }
        if let Some(enabled) = env_flag(ENV_ISOLATION_BOUNDARY)? {
            self.storage.isolation_boundary = enabled;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.handler_exception_limit == 0 {
            anyhow::bail!("dispatch.handler_exception_limit must be at least 1");
        }
        Ok(())
    }

    /// Factories for every storage the host supports, in registration order
    ///
    /// Thread-local, async flow, request, operation. Disabled request and
    /// operation storages are still registered but report themselves invalid,
    /// so probing lists them as rejected.
    pub fn storage_factories<T>(&self) -> Vec<Arc<dyn ContextStorageFactory<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut factories: Vec<Arc<dyn ContextStorageFactory<T>>> =
            vec![Arc::new(ThreadLocalStorageFactory)];

        if self.storage.async_enabled {
            if self.storage.isolation_boundary {
                factories.push(Arc::new(BoundarySafeFactory::new::<T>(AsyncFlowStorageFactory)));
            } else {
                factories.push(Arc::new(AsyncFlowStorageFactory));
            }
        }
        factories.push(Arc::new(RequestStorageFactory::new(self.storage.request_enabled)));
        factories.push(Arc::new(OperationStorageFactory::new(self.storage.operation_enabled)));

        debug!(count = factories.len(), "storage factories configured");
        factories
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {name}: {raw:?}")),
        Err(_) => Ok(None),
    }
}

fn env_flag(name: &str) -> Result<Option<bool>> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => anyhow::bail!("Invalid boolean for {name}: {raw:?}"),
        },
        Err(_) => Ok(None),
    }
}
