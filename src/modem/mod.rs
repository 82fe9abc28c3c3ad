//! Modem gateway abstraction: where stored SMS messages come from.

pub mod mmcli;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::error::GatewayError;

pub use mmcli::MmcliGateway;

/// Identifier of a modem as understood by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModemId(String);

impl ModemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier of a stored SMS, stable until the message is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle(String);

impl MessageHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fetched SMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sms {
    /// Sender number or alphanumeric sender ID.
    pub sender: String,
    /// Message text.
    pub body: String,
    /// When the modem received the message.
    pub received_at: DateTime<FixedOffset>,
}

/// Access to the SMS storage of a modem.
///
/// Per-message operations take the modem ID because the service addresses
/// stored messages through the modem that holds them.
#[async_trait]
pub trait ModemGateway: Send + Sync {
    /// List the modems known to the service, in the order it reports them.
    async fn list_modem_ids(&self) -> Result<Vec<ModemId>, GatewayError>;

    /// List the handles of messages stored on `modem`.
    async fn list_message_handles(
        &self,
        modem: &ModemId,
    ) -> Result<Vec<MessageHandle>, GatewayError>;

    /// Fetch the content of one message.
    async fn get_message(
        &self,
        modem: &ModemId,
        handle: &MessageHandle,
    ) -> Result<Sms, GatewayError>;

    /// Delete one message from the modem.
    async fn delete_message(
        &self,
        modem: &ModemId,
        handle: &MessageHandle,
    ) -> Result<(), GatewayError>;
}
