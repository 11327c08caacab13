use crate::middleware::DEFAULT_MAX_BODY_BYTES;
use clap::{Parser, Subcommand};
use rask_metrics_core::crypto::Padding;
use rask_metrics_core::env::{
    EnvError, load_env_opt, load_env_path_opt, load_env_secs, load_env_string, load_env_var,
};
use rask_metrics_core::net::TrustedSubnet;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to read config file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    Env(#[from] EnvError),
}

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "rask-metrics-server",
    author,
    version,
    about = "Accepts, aggregates and serves metrics reported by rask-metrics-agent",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// HTTP listen address, host:port [env: ADDRESS] [default: localhost:8080]
    #[arg(short = 'a', long = "address")]
    pub address: Option<String>,

    /// gRPC listen address, host:port [env: GRPC_ADDRESS] [default: localhost:3200]
    #[arg(short = 'g', long = "grpc-address")]
    pub grpc_address: Option<String>,

    /// Log level [env: LOG_LEVEL] [default: info]
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Seconds between dumps of the file storage, 0 dumps on every write [env: STORE_INTERVAL] [default: 300]
    #[arg(short = 'i', long = "store-interval")]
    pub store_interval: Option<u64>,

    /// Dump file for the file storage [env: FILE_STORAGE_PATH]
    #[arg(short = 'f', long = "file-storage-path")]
    pub file_storage_path: Option<PathBuf>,

    /// Restore the dump file on start [env: RESTORE] [default: true]
    #[arg(short = 'r', long = "restore")]
    pub restore: Option<bool>,

    /// PostgreSQL DSN; selects the database storage [env: DATABASE_DSN]
    #[arg(short = 'd', long = "database-dsn")]
    pub database_dsn: Option<String>,

    /// HMAC-SHA256 key for request verification and response signing [env: KEY]
    #[arg(short = 'k', long = "key")]
    pub key: Option<String>,

    /// Private key (PEM) used to decrypt payloads [env: CRYPTO_KEY]
    #[arg(long = "crypto-key")]
    pub crypto_key: Option<PathBuf>,

    /// RSA padding scheme, pkcs1v15 or oaep [env: CRYPTO_PADDING]
    #[arg(long)]
    pub padding: Option<Padding>,

    /// Only accept requests whose X-Real-IP lies in this CIDR [env: TRUSTED_SUBNET]
    #[arg(short = 't', long = "trusted-subnet")]
    pub trusted_subnet: Option<String>,

    /// TOML configuration file [env: CONFIG]
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Probe GET /ping on the configured address and exit 0 or 1
    Healthcheck,
}

/// Shape of the optional TOML configuration file. Intervals are seconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSettings {
    pub address: Option<String>,
    pub grpc_address: Option<String>,
    pub log_level: Option<String>,
    pub store_interval: Option<u64>,
    pub file_storage_path: Option<PathBuf>,
    pub restore: Option<bool>,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub padding: Option<Padding>,
    pub trusted_subnet: Option<String>,
}

impl From<&Cli> for FileSettings {
    fn from(cli: &Cli) -> Self {
        Self {
            address: cli.address.clone(),
            grpc_address: cli.grpc_address.clone(),
            log_level: cli.log_level.clone(),
            store_interval: cli.store_interval,
            file_storage_path: cli.file_storage_path.clone(),
            restore: cli.restore,
            database_dsn: cli.database_dsn.clone(),
            key: cli.key.clone(),
            crypto_key: cli.crypto_key.clone(),
            padding: cli.padding,
            trusted_subnet: cli.trusted_subnet.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub address: String,
    pub grpc_address: String,
    pub log_level: Level,
    pub store_interval: Duration,
    pub file_storage_path: Option<PathBuf>,
    pub restore: bool,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub padding: Padding,
    pub trusted_subnet: Option<TrustedSubnet>,
    /// Upper bound on draining each listener at shutdown.
    pub shutdown_timeout: Duration,
    /// Largest request body accepted after decompression.
    pub max_body_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            grpc_address: "localhost:3200".to_string(),
            log_level: Level::INFO,
            store_interval: Duration::from_secs(300),
            file_storage_path: None,
            restore: true,
            database_dsn: None,
            key: None,
            crypto_key: None,
            padding: Padding::Pkcs1v15,
            trusted_subnet: None,
            shutdown_timeout: Duration::from_secs(10),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Settings {
    /// Layers defaults, the config file, flags and environment, in increasing
    /// precedence, then validates the result.
    pub fn resolve<F>(cli: &Cli, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        let mut config_file = cli.config.clone();
        load_env_path_opt(&env, "CONFIG", &mut config_file);
        if let Some(path) = config_file {
            settings.apply(Self::read_file(&path)?)?;
        }

        settings.apply(FileSettings::from(cli))?;
        settings.apply_env(&env)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn read_file(path: &Path) -> Result<FileSettings, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    fn apply(&mut self, layer: FileSettings) -> Result<(), ConfigError> {
        if let Some(address) = layer.address {
            self.address = address;
        }
        if let Some(grpc_address) = layer.grpc_address {
            self.grpc_address = grpc_address;
        }
        if let Some(level) = layer.log_level {
            self.log_level = parse_level(&level)?;
        }
        if let Some(secs) = layer.store_interval {
            self.store_interval = Duration::from_secs(secs);
        }
        if layer.file_storage_path.is_some() {
            self.file_storage_path = layer.file_storage_path;
        }
        if let Some(restore) = layer.restore {
            self.restore = restore;
        }
        if layer.database_dsn.is_some() {
            self.database_dsn = layer.database_dsn;
        }
        if layer.key.is_some() {
            self.key = layer.key;
        }
        if layer.crypto_key.is_some() {
            self.crypto_key = layer.crypto_key;
        }
        if let Some(padding) = layer.padding {
            self.padding = padding;
        }
        if let Some(subnet) = layer.trusted_subnet {
            self.trusted_subnet = parse_subnet(&subnet)?;
        }
        Ok(())
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        load_env_string(env, "ADDRESS", &mut self.address);
        load_env_string(env, "GRPC_ADDRESS", &mut self.grpc_address);
        load_env_var(env, "LOG_LEVEL", &mut self.log_level)?;
        load_env_secs(env, "STORE_INTERVAL", &mut self.store_interval)?;
        load_env_path_opt(env, "FILE_STORAGE_PATH", &mut self.file_storage_path);
        load_env_var(env, "RESTORE", &mut self.restore)?;
        load_env_opt(env, "DATABASE_DSN", &mut self.database_dsn)?;
        load_env_opt(env, "KEY", &mut self.key)?;
        load_env_path_opt(env, "CRYPTO_KEY", &mut self.crypto_key);
        load_env_var(env, "CRYPTO_PADDING", &mut self.padding)?;
        load_env_opt(env, "TRUSTED_SUBNET", &mut self.trusted_subnet)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_listen_address("address", &self.address)?;
        validate_listen_address("gRPC address", &self.grpc_address)?;

        if let Some(dsn) = &self.database_dsn {
            if dsn.trim().is_empty() {
                return Err(ConfigError::Invalid("Database DSN cannot be empty".into()));
            }
        }
        if let Some(path) = &self.crypto_key {
            if !path.is_file() {
                return Err(ConfigError::Invalid(format!(
                    "Crypto key file does not exist: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// HMAC key, when one is configured and non-empty.
    pub fn signing_key(&self) -> Option<&[u8]> {
        self.key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(str::as_bytes)
    }
}

/// Validates that a listen address has the `host:port` shape with a usable port.
fn validate_listen_address(what: &str, address: &str) -> Result<(), ConfigError> {
    let Some((host, port)) = address.rsplit_once(':') else {
        return Err(ConfigError::Invalid(format!(
            "{what} '{address}' must be host:port"
        )));
    };
    if host.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{what} '{address}' has no host")));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::Invalid(format!(
            "{what} '{address}' has an invalid port"
        ))),
        Ok(_) => Ok(()),
    }
}

fn parse_level(raw: &str) -> Result<Level, ConfigError> {
    Level::from_str(raw.trim())
        .map_err(|e| ConfigError::Invalid(format!("Invalid log level '{raw}': {e}")))
}

fn parse_subnet(raw: &str) -> Result<Option<TrustedSubnet>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    TrustedSubnet::parse(raw)
        .map(Some)
        .map_err(|e| ConfigError::Invalid(e.to_string()))
}
