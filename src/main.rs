use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use sms_relay::blacklist::Blacklist;
use sms_relay::config::{LogLevel, ModemSelector, Settings};
use sms_relay::logging;
use sms_relay::mailer::SmtpMailer;
use sms_relay::modem::MmcliGateway;
use sms_relay::relay::RelayEngine;

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let log_level = match LogLevel::from_env() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(log_level);

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "SMS relay starting");

    let settings = Settings::from_env()?;

    let recipients: Vec<String> = settings
        .smtp
        .recipients
        .iter()
        .map(|r| r.to_string())
        .collect();
    info!(
        smtp_host = %settings.smtp.host,
        smtp_port = settings.smtp.port,
        tls = settings.smtp.tls,
        login = settings.smtp.credentials.is_some(),
        "Loaded {} SMTP recipients: {}",
        recipients.len(),
        recipients.join(", ")
    );
    match &settings.relay.modem {
        ModemSelector::Auto => info!("Modem: auto-detect"),
        ModemSelector::Fixed(id) => info!(modem = %id, "Modem: fixed"),
    }

    let blacklist = Blacklist::load(&settings.blacklist_path).with_context(|| {
        format!(
            "Failed to load blacklist {}",
            settings.blacklist_path.display()
        )
    })?;

    let engine = RelayEngine::new(
        settings.relay,
        Arc::new(MmcliGateway::new()),
        Arc::new(SmtpMailer::new(settings.smtp)),
        blacklist,
    );
    engine.run(shutdown_signal()).await?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received, shutting down..."),
        _ = terminate => info!("SIGTERM received, shutting down..."),
    }
}
