//! SMS Relay — forwards SMS messages from a ModemManager modem to email.

pub mod blacklist;
pub mod config;
pub mod error;
pub mod logging;
pub mod mailer;
pub mod modem;
pub mod relay;
