//! Error types for the SMS relay.

/// Top-level error type. Every variant is fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Blacklist error: {0}")]
    Blacklist(#[from] BlacklistError),

    #[error("Modem gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("No modem available to poll")]
    NoModem,
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Blacklist loading errors.
#[derive(Debug, thiserror::Error)]
pub enum BlacklistError {
    #[error("Invalid {list} pattern {pattern:?}: {source}")]
    InvalidPattern {
        list: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Errors reported by a modem gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Modem {modem} not found")]
    ModemNotFound { modem: String },

    #[error("Message {handle} not found")]
    MessageNotFound { handle: String },

    #[error("Message {handle} is still being received")]
    NotReady { handle: String },

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Unexpected gateway output: {0}")]
    Parse(String),
}

/// Mail delivery errors. All of them are retried on the next poll.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Transport(String),

    #[error("Mail task failed: {0}")]
    Task(String),
}

/// Result type alias for startup operations.
pub type Result<T> = std::result::Result<T, Error>;
