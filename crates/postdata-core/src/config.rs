//! Runtime configuration, assembled once at startup from environment-style
//! key/value pairs and handed to the batch driver, gateway and notifier.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::error::ErrorKind;

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LOOKUP_ATTEMPTS: u32 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("SMTP_SERVER is set but {} missing", .0.join(", "))]
    IncompleteSmtp(Vec<&'static str>),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

/// A string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directories {
    pub input: PathBuf,
    pub output: PathBuf,
    pub processed: PathBuf,
    pub log: PathBuf,
}

impl Directories {
    /// Builds the directory set, defaulting the log directory to `<output>/logs`.
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        processed: impl Into<PathBuf>,
        log: Option<PathBuf>,
    ) -> Self {
        let output = output.into();
        let log = log.unwrap_or_else(|| output.join("logs"));
        Self {
            input: input.into(),
            output,
            processed: processed.into(),
            log,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Url(Secret),
    Parts {
        host: String,
        port: Option<u16>,
        database: String,
        user: Option<String>,
        password: Option<Secret>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub target: DatabaseTarget,
    pub acquire_timeout: Duration,
    /// Total attempts per lookup when the data source is unreachable.
    pub lookup_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
    pub from: String,
    pub recipients: Vec<String>,
}

impl DatabaseSettings {
    /// Reads only the database keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| normalized(&lookup, key);
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let target = match get("DATABASE_URL") {
            Some(url) => DatabaseTarget::Url(Secret::new(url)),
            None => DatabaseTarget::Parts {
                host: require("SQL_SERVER")?,
                port: get("SQL_PORT")
                    .map(|value| parse_number("SQL_PORT", &value))
                    .transpose()?,
                database: require("SQL_DATABASE")?,
                user: get("SQL_USER"),
                password: get("SQL_PASSWORD").map(Secret::new),
            },
        };

        let acquire_timeout = get("DB_ACQUIRE_TIMEOUT_SECS")
            .map(|value| parse_number::<u64>("DB_ACQUIRE_TIMEOUT_SECS", &value))
            .transpose()?
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS);

        let lookup_attempts = get("LOOKUP_ATTEMPTS")
            .map(|value| parse_number::<u32>("LOOKUP_ATTEMPTS", &value))
            .transpose()?
            .unwrap_or(DEFAULT_LOOKUP_ATTEMPTS);
        if lookup_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "LOOKUP_ATTEMPTS",
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            target,
            acquire_timeout: Duration::from_secs(acquire_timeout),
            lookup_attempts,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub directories: Directories,
    pub database: DatabaseSettings,
    /// `None` disables notifications.
    pub smtp: Option<SmtpSettings>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| normalized(&lookup, key);
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let directories = Directories::new(
            require("INPUT_DIR")?,
            require("OUTPUT_DIR")?,
            require("PROCESSED_DIR")?,
            get("LOG_DIR").map(PathBuf::from),
        );

        let database = DatabaseSettings::from_lookup(&lookup)?;

        let smtp = match get("SMTP_SERVER") {
            None => None,
            Some(host) => Some(smtp_settings(host, &get)?),
        };

        Ok(Self {
            directories,
            database,
            smtp,
        })
    }
}

fn smtp_settings(
    host: String,
    get: &impl Fn(&str) -> Option<String>,
) -> Result<SmtpSettings, ConfigError> {
    let port = get("SMTP_PORT")
        .map(|value| parse_number::<u16>("SMTP_PORT", &value))
        .transpose()?
        .unwrap_or(DEFAULT_SMTP_PORT);

    let user = get("SMTP_USER");
    let password = get("SMTP_PASSWORD");
    let from = get("EMAIL_FROM");
    let recipients = get("EMAIL_TO").map(|value| split_recipients(&value));

    let mut missing = Vec::new();
    if user.is_none() {
        missing.push("SMTP_USER");
    }
    if password.is_none() {
        missing.push("SMTP_PASSWORD");
    }
    if from.is_none() {
        missing.push("EMAIL_FROM");
    }
    if recipients.as_ref().map_or(true, Vec::is_empty) {
        missing.push("EMAIL_TO");
    }

    match (user, password, from, recipients) {
        (Some(user), Some(password), Some(from), Some(recipients)) if missing.is_empty() => {
            Ok(SmtpSettings {
                host,
                port,
                user,
                password: Secret::new(password),
                from,
                recipients,
            })
        }
        _ => Err(ConfigError::IncompleteSmtp(missing)),
    }
}

fn normalized<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Splits a comma-separated recipient list, dropping blank entries.
pub fn split_recipients(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value.parse::<T>().map_err(|err| ConfigError::Invalid {
        key,
        message: format!("'{value}': {err}"),
    })
}
