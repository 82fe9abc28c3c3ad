//! The relay loop: poll the modem, filter, email, delete.
//!
//! One engine owns all loop state. It polls sequentially; there is never
//! more than one gateway or mailer call in flight.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::blacklist::Blacklist;
use crate::config::{ModemSelector, RelayConfig};
use crate::error::{Error, GatewayError, Result};
use crate::mailer::{Mailer, format_email};
use crate::modem::{MessageHandle, ModemGateway, ModemId};

/// Delay between attempts to list existing messages at startup.
pub const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(30);

/// What happened to a single new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Relayed,
    Suppressed,
    /// Not recorded; the handle is picked up again on the next poll.
    FetchFailed,
    /// Not recorded; the handle is picked up again on the next poll.
    SendFailed,
}

/// Tally of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub relayed: usize,
    pub suppressed: usize,
    pub failed: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Relayed => self.relayed += 1,
            Outcome::Suppressed => self.suppressed += 1,
            Outcome::FetchFailed | Outcome::SendFailed => self.failed += 1,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.relayed + self.suppressed + self.failed == 0
    }
}

/// Relays SMS messages from one modem to email.
pub struct RelayEngine {
    config: RelayConfig,
    gateway: Arc<dyn ModemGateway>,
    mailer: Arc<dyn Mailer>,
    blacklist: Blacklist,
    /// Resolved by [`RelayEngine::start`].
    modem: Option<ModemId>,
    /// Handles relayed or suppressed during this run.
    processed: HashSet<MessageHandle>,
    startup_retry: Duration,
}

impl RelayEngine {
    pub fn new(
        config: RelayConfig,
        gateway: Arc<dyn ModemGateway>,
        mailer: Arc<dyn Mailer>,
        blacklist: Blacklist,
    ) -> Self {
        Self {
            config,
            gateway,
            mailer,
            blacklist,
            modem: None,
            processed: HashSet::new(),
            startup_retry: STARTUP_RETRY_DELAY,
        }
    }

    /// Override the delay between startup listing attempts.
    pub fn with_startup_retry(mut self, delay: Duration) -> Self {
        self.startup_retry = delay;
        self
    }

    /// The modem being polled, once resolved.
    pub fn modem(&self) -> Option<&ModemId> {
        self.modem.as_ref()
    }

    pub fn is_processed(&self, handle: &MessageHandle) -> bool {
        self.processed.contains(handle)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start, then poll until `shutdown` resolves.
    ///
    /// Shutdown aborts whatever is in progress: startup, the inter-poll
    /// sleep, or a cycle. Only startup failures are returned as errors.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown requested during startup");
                return Ok(());
            }
            started = self.start() => started?,
        }

        info!(
            modem = %self.modem.as_ref().map(ModemId::as_str).unwrap_or_default(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            delete_after_send = self.config.delete_after_send,
            "Relay started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = self.wait_for_next_poll() => {}
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                report = self.poll_cycle() => {
                    if !report.is_idle() {
                        debug!(
                            relayed = report.relayed,
                            suppressed = report.suppressed,
                            failed = report.failed,
                            "Poll cycle finished"
                        );
                    }
                }
            }
        }

        info!("Relay shutting down");
        Ok(())
    }

    /// Resolve the modem and, if configured, record the messages already
    /// on it so they are never relayed.
    pub async fn start(&mut self) -> Result<()> {
        let modem = match &self.config.modem {
            ModemSelector::Fixed(id) => id.clone(),
            ModemSelector::Auto => match self.detect_modem().await? {
                Some(id) => {
                    info!(modem = %id, "Auto-detected modem");
                    id
                }
                None => {
                    error!("Failed to auto-detect modem: no modems found");
                    return Err(Error::NoModem);
                }
            },
        };

        if self.config.ignore_existing {
            self.seed_existing(&modem).await;
        }
        self.modem = Some(modem);
        Ok(())
    }

    async fn detect_modem(&self) -> std::result::Result<Option<ModemId>, GatewayError> {
        Ok(self.gateway.list_modem_ids().await?.into_iter().next())
    }

    /// Mark every handle currently on `modem` as processed. Retries until
    /// the listing succeeds so that a transient error cannot leak old
    /// messages.
    async fn seed_existing(&mut self, modem: &ModemId) {
        loop {
            match self.gateway.list_message_handles(modem).await {
                Ok(handles) => {
                    let existing = handles.len();
                    self.processed.extend(handles);
                    info!(modem = %modem, existing, "Ignoring existing SMS, waiting for new messages");
                    return;
                }
                Err(e) => {
                    warn!(
                        modem = %modem,
                        error = %e,
                        retry_secs = self.startup_retry.as_secs(),
                        "Initial SMS list fetch failed, retrying"
                    );
                    tokio::time::sleep(self.startup_retry).await;
                }
            }
        }
    }

    async fn wait_for_next_poll(&self) {
        if self.config.poll_interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    // ── Polling ─────────────────────────────────────────────────────

    /// List the modem's messages and process every handle not seen before.
    pub async fn poll_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let Some(modem) = self.modem.clone() else {
            return report;
        };

        let handles = match self.gateway.list_message_handles(&modem).await {
            Ok(handles) => handles,
            Err(GatewayError::ModemNotFound { .. }) if self.config.modem == ModemSelector::Auto => {
                warn!(modem = %modem, "Modem no longer exists, re-detecting modem");
                self.redetect_modem().await;
                return report;
            }
            Err(e) => {
                error!(modem = %modem, error = %e, "Failed to fetch SMS list");
                return report;
            }
        };

        if handles.is_empty() {
            debug!("Got empty SMS list");
            return report;
        }

        for handle in self.new_handles(handles) {
            let outcome = self.process(&modem, &handle).await;
            report.record(outcome);
        }
        report
    }

    /// Handles not yet processed, in gateway order, each listed once.
    fn new_handles(&self, handles: Vec<MessageHandle>) -> Vec<MessageHandle> {
        let mut seen = HashSet::new();
        handles
            .into_iter()
            .filter(|h| !self.processed.contains(h) && seen.insert(h.clone()))
            .collect()
    }

    /// Switch to whichever modem the service now reports first. The
    /// processed set is kept as is; only startup seeds it.
    async fn redetect_modem(&mut self) {
        match self.detect_modem().await {
            Ok(Some(id)) => {
                info!(modem = %id, "Re-detected modem");
                self.modem = Some(id);
            }
            Ok(None) => warn!("Modem re-detection found no modems"),
            Err(e) => warn!(error = %e, "Modem re-detection failed"),
        }
    }

    async fn process(&mut self, modem: &ModemId, handle: &MessageHandle) -> Outcome {
        let sms = match self.gateway.get_message(modem, handle).await {
            Ok(sms) => sms,
            Err(e) => {
                error!(handle = %handle, error = %e, "Failed to fetch SMS");
                return Outcome::FetchFailed;
            }
        };

        if let Some(rule) = self.blacklist.find_match(&sms) {
            warn!(
                handle = %handle,
                sender = %sms.sender,
                date = %sms.received_at,
                field = ?rule.field,
                pattern = %rule.pattern,
                message = %sms.body,
                "Received blacklisted SMS"
            );
            self.processed.insert(handle.clone());
            self.delete_if_configured(modem, handle, &sms.sender).await;
            return Outcome::Suppressed;
        }

        info!(
            handle = %handle,
            sender = %sms.sender,
            date = %sms.received_at,
            message = %sms.body,
            "Received SMS"
        );

        let email = format_email(&sms, &self.config.subject_template);
        if let Err(e) = self.mailer.send(&email).await {
            error!(handle = %handle, sender = %sms.sender, error = %e, "Failed to send email");
            return Outcome::SendFailed;
        }

        self.processed.insert(handle.clone());
        self.delete_if_configured(modem, handle, &sms.sender).await;
        Outcome::Relayed
    }

    async fn delete_if_configured(&self, modem: &ModemId, handle: &MessageHandle, sender: &str) {
        if !self.config.delete_after_send {
            return;
        }
        if let Err(e) = self.gateway.delete_message(modem, handle).await {
            error!(handle = %handle, sender = %sender, error = %e, "Failed to delete SMS");
        }
    }
}
