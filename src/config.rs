use std::{fs::read_to_string, str::FromStr};

use anyhow::Result;
use clap::Parser;
use engine::DatabaseOptions;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub log: Log,
    ///
    /// key database sizing
    ///
    /// Master key, salt and MKI lengths, session key lengths and window
    /// sizes per protocol, and the pool and table policies backing the
    /// database.
    ///
    #[serde(default)]
    pub database: DatabaseOptions,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: srtp-keydb --config /etc/srtp-keydb/config.json5
    ///
    #[arg(long, short)]
    pub config: Option<String>,
    ///
    /// Packet trace to replay through the database
    ///
    #[arg(long, short)]
    pub trace: String,
    ///
    /// Override the log level of the configuration file
    ///
    #[arg(long)]
    pub log_level: Option<LogLevel>,
}

impl Config {
    ///
    /// Load configure from the config file given on the command line.
    ///
    /// Without a config file the default configuration is used.
    ///
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_json5(&read_to_string(path)?)?,
            None => Self::default(),
        };

        if let Some(level) = cli.log_level {
            config.log.level = level;
        }

        Ok(config)
    }

    /// # Test
    ///
    /// ```
    /// use srtp_keydb::config::{Config, LogLevel};
    ///
    /// let config = Config::from_json5(
    ///     r#"{
    ///         log: { level: "debug" },
    ///         database: {
    ///             "mki-size": 0,
    ///             rtp: { "history-size": 10 },
    ///             "context-pool": { type: "fixed", "max-items": 100 },
    ///         },
    ///     }"#,
    /// )
    /// .unwrap();
    ///
    /// assert_eq!(config.log.level, LogLevel::Debug);
    /// assert_eq!(config.database.mki_size, 0);
    /// assert_eq!(config.database.rtp.history_size, 64);
    /// assert_eq!(config.database.rtp.encrypt_key_size, 16);
    /// assert_eq!(config.database.context_pool.max_items, 100);
    /// assert_eq!(config.database.key_pool.page_items, 10);
    ///
    /// assert!(Config::from_json5(r#"{ database: { rtp: { "replay-list-size": 8 } } }"#).is_err());
    /// ```
    pub fn from_json5(value: &str) -> Result<Self> {
        let mut config = serde_json5::from_str::<Self>(value)?;
        config.database.validate()?;
        Ok(config)
    }
}
