use super::{ConfigError, LogLevel, Protocol};
use clap::Parser;
use rask_metrics_core::crypto::Padding;
use rask_metrics_core::env::{
    load_env_opt, load_env_path_opt, load_env_secs, load_env_string, load_env_var,
};
use rask_metrics_core::net::TrustedSubnet;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line flags. Every flag is optional so that an unset flag can be
/// told apart from one set to its default value during layering.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "rask-metrics-agent",
    author,
    version,
    about = "Samples runtime and host metrics and ships them to rask-metrics-server",
    long_about = None
)]
pub struct Cli {
    /// Server HTTP address, host:port [env: ADDRESS] [default: localhost:8080]
    #[arg(short = 'a', long = "address")]
    pub address: Option<String>,

    /// Server gRPC address, host:port [env: GRPC_ADDRESS] [default: localhost:3200]
    #[arg(long = "grpc-address")]
    pub grpc_address: Option<String>,

    /// Delivery protocol [env: PROTOCOL] [default: http]
    #[arg(long)]
    pub protocol: Option<Protocol>,

    /// Sampler poll interval in seconds [env: POLL_INTERVAL] [default: 2]
    #[arg(short = 'p', long = "poll-interval")]
    pub poll_interval: Option<u64>,

    /// Report interval in seconds [env: REPORT_INTERVAL] [default: 10]
    #[arg(short = 'r', long = "report-interval")]
    pub report_interval: Option<u64>,

    /// Number of concurrent delivery workers [env: RATE_LIMIT] [default: 2]
    #[arg(short = 'l', long = "rate-limit")]
    pub rate_limit: Option<usize>,

    /// HMAC-SHA256 signing key [env: KEY]
    #[arg(short = 'k', long = "key")]
    pub key: Option<String>,

    /// Server public key (PEM) used to encrypt payloads [env: CRYPTO_KEY]
    #[arg(long = "crypto-key")]
    pub crypto_key: Option<PathBuf>,

    /// RSA padding scheme, pkcs1v15 or oaep [env: CRYPTO_PADDING]
    #[arg(long)]
    pub padding: Option<Padding>,

    /// Trusted subnet (CIDR) used to pick the advertised source address [env: TRUSTED_SUBNET]
    #[arg(short = 't', long = "trusted-subnet")]
    pub trusted_subnet: Option<String>,

    /// Log level [env: LOG_LEVEL] [default: info]
    #[arg(long = "log-level")]
    pub log_level: Option<LogLevel>,

    /// TOML configuration file [env: CONFIG]
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

/// Shape of the optional TOML configuration file. Intervals are seconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub address: Option<String>,
    pub grpc_address: Option<String>,
    pub protocol: Option<Protocol>,
    pub poll_interval: Option<u64>,
    pub report_interval: Option<u64>,
    pub rate_limit: Option<usize>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub padding: Option<Padding>,
    pub trusted_subnet: Option<String>,
    pub log_level: Option<LogLevel>,
}

impl From<&Cli> for FileConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            address: cli.address.clone(),
            grpc_address: cli.grpc_address.clone(),
            protocol: cli.protocol,
            poll_interval: cli.poll_interval,
            report_interval: cli.report_interval,
            rate_limit: cli.rate_limit,
            key: cli.key.clone(),
            crypto_key: cli.crypto_key.clone(),
            padding: cli.padding,
            trusted_subnet: cli.trusted_subnet.clone(),
            log_level: cli.log_level,
        }
    }
}

/// Fully resolved agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub grpc_address: String,
    pub protocol: Protocol,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub rate_limit: usize,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub padding: Padding,
    pub trusted_subnet: Option<TrustedSubnet>,
    pub log_level: LogLevel,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            grpc_address: "localhost:3200".to_string(),
            protocol: Protocol::Http,
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            rate_limit: 2,
            key: None,
            crypto_key: None,
            padding: Padding::Pkcs1v15,
            trusted_subnet: None,
            log_level: LogLevel::Info,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Layers defaults, the config file, flags and environment, in increasing
    /// precedence, then validates the result.
    pub fn resolve<F>(cli: &Cli, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        let mut config_file = cli.config.clone();
        load_env_path_opt(&env, "CONFIG", &mut config_file);
        if let Some(path) = config_file {
            config.apply(Self::read_file(&path)?)?;
        }

        config.apply(FileConfig::from(cli))?;
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    fn apply(&mut self, layer: FileConfig) -> Result<(), ConfigError> {
        if let Some(address) = layer.address {
            self.address = address;
        }
        if let Some(grpc_address) = layer.grpc_address {
            self.grpc_address = grpc_address;
        }
        if let Some(protocol) = layer.protocol {
            self.protocol = protocol;
        }
        if let Some(secs) = layer.poll_interval {
            self.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = layer.report_interval {
            self.report_interval = Duration::from_secs(secs);
        }
        if let Some(rate_limit) = layer.rate_limit {
            self.rate_limit = rate_limit;
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
        if let Some(level) = layer.log_level {
            self.log_level = level;
        }
        Ok(())
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        load_env_string(env, "ADDRESS", &mut self.address);
        load_env_string(env, "GRPC_ADDRESS", &mut self.grpc_address);
        load_env_var(env, "PROTOCOL", &mut self.protocol)?;
        load_env_secs(env, "POLL_INTERVAL", &mut self.poll_interval)?;
        load_env_secs(env, "REPORT_INTERVAL", &mut self.report_interval)?;
        load_env_var(env, "RATE_LIMIT", &mut self.rate_limit)?;
        load_env_opt(env, "KEY", &mut self.key)?;
        load_env_path_opt(env, "CRYPTO_KEY", &mut self.crypto_key);
        load_env_var(env, "CRYPTO_PADDING", &mut self.padding)?;
        load_env_opt(env, "TRUSTED_SUBNET", &mut self.trusted_subnet)?;
        load_env_var(env, "LOG_LEVEL", &mut self.log_level)?;
        Ok(())
    }

    /// Base URL of the server's HTTP surface.
    pub fn base_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            self.address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.address.trim_end_matches('/'))
        }
    }

    /// Signing key, when one is configured and non-empty.
    pub fn signing_key(&self) -> Option<&[u8]> {
        self.key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(str::as_bytes)
    }
}

fn parse_subnet(raw: &str) -> Result<Option<TrustedSubnet>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    TrustedSubnet::parse(raw)
        .map(Some)
        .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(&Cli::default(), no_env).unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.rate_limit, 2);
        assert_eq!(config.protocol, Protocol::Http);
        assert!(config.signing_key().is_none());
        assert_eq!(config.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_short_flags() {
        let key_file = tempfile::NamedTempFile::new().unwrap();
        let key_path = key_file.path().to_str().unwrap().to_string();
        let cli = Cli::try_parse_from([
            "rask-metrics-agent",
            "-a",
            "metrics:9000",
            "-p",
            "1",
            "-r",
            "5",
            "-l",
            "4",
            "-k",
            "secret",
            "-t",
            "10.0.0.0/8",
            "--crypto-key",
            key_path.as_str(),
        ])
        .unwrap();
        let config = Config::resolve(&cli, no_env).unwrap();
        assert_eq!(config.address, "metrics:9000");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.report_interval, Duration::from_secs(5));
        assert_eq!(config.rate_limit, 4);
        assert_eq!(config.signing_key(), Some(&b"secret"[..]));
        assert_eq!(
            config.trusted_subnet.map(|s| s.to_string()),
            Some("10.0.0.0/8".to_string())
        );
        assert_eq!(config.crypto_key, Some(PathBuf::from(&key_path)));
    }

    #[test]
    fn test_env_wins_over_flags() {
        let cli = Cli::try_parse_from(["rask-metrics-agent", "-a", "flag:1", "-l", "3"]).unwrap();
        let env = env_of(&[("ADDRESS", "env:2"), ("RATE_LIMIT", "7"), ("PROTOCOL", "grpc")]);
        let config = Config::resolve(&cli, env).unwrap();
        assert_eq!(config.address, "env:2");
        assert_eq!(config.rate_limit, 7);
        assert_eq!(config.protocol, Protocol::Grpc);
    }

    #[test]
    fn test_flags_win_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "address = \"file:1\"\nreport_interval = 30\npadding = \"oaep\""
        )
        .unwrap();

        let cli = Cli {
            address: Some("flag:2".to_string()),
            config: Some(file.path().to_path_buf()),
            ..Cli::default()
        };
        let config = Config::resolve(&cli, no_env).unwrap();
        assert_eq!(config.address, "flag:2");
        assert_eq!(config.report_interval, Duration::from_secs(30));
        assert_eq!(config.padding, Padding::Oaep);
    }

    #[test]
    fn test_unknown_file_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "adress = \"typo:1\"").unwrap();
        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            ..Cli::default()
        };
        assert!(matches!(
            Config::resolve(&cli, no_env),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_invalid_env_is_a_config_error() {
        let env = env_of(&[("REPORT_INTERVAL", "ten")]);
        assert!(matches!(
            Config::resolve(&Cli::default(), env),
            Err(ConfigError::EnvError(_))
        ));
        let env = env_of(&[("TRUSTED_SUBNET", "10.0.0.0")]);
        assert!(Config::resolve(&Cli::default(), env).is_err());
    }
}
