//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use lettre::message::Mailbox;
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::modem::ModemId;

/// Placeholder in the subject template replaced by the SMS sender.
pub const NUMBER_PLACEHOLDER: &str = "%number%";

/// How the modem to poll is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemSelector {
    /// Use the first modem the service reports.
    Auto,
    Fixed(ModemId),
}

impl FromStr for ModemSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") || s == "-1" {
            return Ok(Self::Auto);
        }
        if s.parse::<u32>().is_ok() || s.starts_with('/') {
            return Ok(Self::Fixed(ModemId::new(s)));
        }
        Err(invalid(
            "MODEM_ID",
            "must be a modem index, a modem path, or \"auto\"",
        ))
    }
}

/// Relay engine configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub modem: ModemSelector,
    /// Delay between polls. Zero polls as fast as possible.
    pub poll_interval: Duration,
    /// Delete messages from the modem once relayed or suppressed.
    pub delete_after_send: bool,
    /// Never relay messages already on the modem at startup.
    pub ignore_existing: bool,
    /// Subject line, with [`NUMBER_PLACEHOLDER`] replaced by the sender.
    pub subject_template: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            modem: ModemSelector::Auto,
            poll_interval: Duration::from_secs(30),
            delete_after_send: true,
            ignore_existing: true,
            subject_template: String::new(),
        }
    }
}

/// SMTP login.
#[derive(Debug, Clone)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: SecretString,
}

/// SMTP delivery configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Upgrade the connection with STARTTLS.
    pub tls: bool,
    /// Login is skipped when absent.
    pub credentials: Option<SmtpCredentials>,
    pub sender: Mailbox,
    pub recipients: Vec<Mailbox>,
}

/// Log verbosity, named the way operators set it in `LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Read `LOG_LEVEL` through `lookup`, defaulting to `INFO`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match non_empty(&lookup, "LOG_LEVEL") {
            Some(raw) => raw.parse(),
            None => Ok(Self::default()),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `tracing` filter directive for this level.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(invalid(
                "LOG_LEVEL",
                "must be one of DEBUG, INFO, WARNING, ERROR, CRITICAL",
            )),
        }
    }
}

/// Everything the relay needs to start. The log level is read separately
/// through [`LogLevel::from_env`] so logging is up before these are parsed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub relay: RelayConfig,
    pub smtp: SmtpConfig,
    pub blacklist_path: PathBuf,
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let modem: ModemSelector = required(&lookup, "MODEM_ID")?.parse()?;

        let poll_interval = match non_empty(&lookup, "POLL_INTERVAL") {
            Some(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .map_err(|_| invalid("POLL_INTERVAL", "must be a number >= 0"))?,
            ),
            None => Duration::from_secs(30),
        };

        let delete_after_send = flag(&lookup, "DELETE_SMS", true)?;
        let ignore_existing = flag(&lookup, "IGNORE_EXISTING_SMS", true)?;
        let subject_template = lookup("SMTP_SUBJECT").unwrap_or_default();

        let host = required(&lookup, "SMTP_HOST")?;
        let port = match non_empty(&lookup, "SMTP_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| invalid("SMTP_PORT", "must be a port number"))?,
            None => 25,
        };
        let tls = flag(&lookup, "SMTP_TLS", false)?;

        let credentials = match (
            non_empty(&lookup, "SMTP_USERNAME"),
            non_empty(&lookup, "SMTP_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(SmtpCredentials {
                username,
                password: SecretString::from(password),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingEnvVar("SMTP_PASSWORD".into())),
            (None, Some(_)) => return Err(ConfigError::MissingEnvVar("SMTP_USERNAME".into())),
        };

        let sender = parse_mailbox("SMTP_SENDER", &required(&lookup, "SMTP_SENDER")?)?;
        let recipients = parse_recipients(&required(&lookup, "SMTP_RECIPIENTS")?)?;

        let blacklist_path = non_empty(&lookup, "BLACKLIST_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("blacklist.json"));

        Ok(Self {
            relay: RelayConfig {
                modem,
                poll_interval,
                delete_after_send,
                ignore_existing,
                subject_template,
            },
            smtp: SmtpConfig {
                host,
                port,
                tls,
                credentials,
                sender,
                recipients,
            },
            blacklist_path,
        })
    }
}

/// Split a comma-separated recipient list into validated mailboxes.
pub fn parse_recipients(raw: &str) -> Result<Vec<Mailbox>, ConfigError> {
    let recipients = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_mailbox("SMTP_RECIPIENTS", s))
        .collect::<Result<Vec<_>, _>>()?;

    if recipients.is_empty() {
        return Err(invalid(
            "SMTP_RECIPIENTS",
            "must contain at least one recipient",
        ));
    }
    Ok(recipients)
}

fn parse_mailbox(key: &str, raw: &str) -> Result<Mailbox, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e| invalid(key, &format!("{raw:?} is not a valid address: {e}")))
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = non_empty(lookup, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(key, "must be \"true\" or \"false\"")),
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
