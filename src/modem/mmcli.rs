//! ModemManager gateway driven through the `mmcli` command-line client.
//!
//! Every call spawns `mmcli` with `--output-json` and parses its output.
//! Children are killed if the calling future is dropped, so a shutdown in
//! the middle of a call does not leave stray processes behind.

use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::modem::{MessageHandle, ModemGateway, ModemId, Sms};

/// ModemManager occasionally fails with "Couldn't delete N parts from this
/// SMS" and succeeds on a second try.
const DELETE_ATTEMPTS: u32 = 3;

static MODEM_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/org/freedesktop/ModemManager\d*/Modem/(\d+)$").expect("valid modem path regex")
});

static SMS_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/org/freedesktop/ModemManager\d*/SMS/(\d+)$").expect("valid SMS path regex")
});

#[derive(Debug, Deserialize)]
struct ModemList {
    #[serde(rename = "modem-list", default)]
    modems: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SmsList {
    #[serde(rename = "modem.messaging.sms", default)]
    messages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SmsEnvelope {
    sms: SmsDetails,
}

#[derive(Debug, Deserialize)]
struct SmsDetails {
    content: SmsContent,
    #[serde(default)]
    properties: SmsProperties,
}

#[derive(Debug, Deserialize)]
struct SmsContent {
    number: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct SmsProperties {
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    state: String,
}

/// Gateway backed by the `mmcli` binary.
#[derive(Debug, Clone)]
pub struct MmcliGateway {
    program: String,
}

impl MmcliGateway {
    pub fn new() -> Self {
        Self {
            program: "mmcli".to_string(),
        }
    }

    /// Use a different `mmcli` executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn run(&self, args: &[String]) -> Result<String, GatewayError> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| GatewayError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let command = format!("{} {}", self.program, args.join(" "));
        Err(classify_failure(command, stderr, args))
    }
}

impl Default for MmcliGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModemGateway for MmcliGateway {
    async fn list_modem_ids(&self) -> Result<Vec<ModemId>, GatewayError> {
        let out = self
            .run(&["--list-modems".into(), "--output-json".into()])
            .await?;
        parse_modem_list(&out)
    }

    async fn list_message_handles(
        &self,
        modem: &ModemId,
    ) -> Result<Vec<MessageHandle>, GatewayError> {
        let out = self
            .run(&[
                "--modem".into(),
                modem.to_string(),
                "--messaging-list-sms".into(),
                "--output-json".into(),
            ])
            .await?;
        parse_sms_list(&out)
    }

    async fn get_message(
        &self,
        modem: &ModemId,
        handle: &MessageHandle,
    ) -> Result<Sms, GatewayError> {
        let out = self
            .run(&[
                "--modem".into(),
                modem.to_string(),
                "--sms".into(),
                handle.to_string(),
                "--output-json".into(),
            ])
            .await?;
        parse_sms(handle, &out)
    }

    async fn delete_message(
        &self,
        modem: &ModemId,
        handle: &MessageHandle,
    ) -> Result<(), GatewayError> {
        let args = [
            "--modem".to_string(),
            modem.to_string(),
            format!("--messaging-delete-sms={handle}"),
        ];

        let mut attempt = 1;
        loop {
            match self.run(&args).await {
                Ok(_) => {
                    debug!(handle = %handle, attempt, "Deleted SMS");
                    return Ok(());
                }
                Err(e) if attempt < DELETE_ATTEMPTS => {
                    debug!(handle = %handle, attempt, error = %e, "SMS delete failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Map a failed `mmcli` invocation to a gateway error.
fn classify_failure(command: String, stderr: String, args: &[String]) -> GatewayError {
    let lower = stderr.to_lowercase();
    // Accepts both `--flag value` and `--flag=value`.
    let arg_after = |flag: &str| {
        args.iter().enumerate().find_map(|(i, a)| {
            if a == flag {
                args.get(i + 1).cloned()
            } else {
                a.strip_prefix(flag)
                    .and_then(|rest| rest.strip_prefix('='))
                    .map(str::to_string)
            }
        })
    };

    if lower.contains("couldn't find modem") {
        GatewayError::ModemNotFound {
            modem: arg_after("--modem").unwrap_or_default(),
        }
    } else if lower.contains("couldn't find sms") {
        GatewayError::MessageNotFound {
            handle: arg_after("--sms")
                .or_else(|| arg_after("--messaging-delete-sms"))
                .unwrap_or_default(),
        }
    } else {
        GatewayError::Command { command, stderr }
    }
}

/// Reduce a D-Bus object path to its trailing index when it has the expected shape.
fn short_id(path: &str, pattern: &Regex) -> String {
    pattern
        .captures(path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn parse_json<'a, T: Deserialize<'a>>(out: &'a str) -> Result<T, GatewayError> {
    serde_json::from_str(out).map_err(|e| GatewayError::Parse(e.to_string()))
}

pub(crate) fn parse_modem_list(out: &str) -> Result<Vec<ModemId>, GatewayError> {
    let list: ModemList = parse_json(out)?;
    Ok(list
        .modems
        .iter()
        .map(|path| ModemId::new(short_id(path, &MODEM_PATH)))
        .collect())
}

pub(crate) fn parse_sms_list(out: &str) -> Result<Vec<MessageHandle>, GatewayError> {
    let list: SmsList = parse_json(out)?;
    Ok(list
        .messages
        .iter()
        .map(|path| MessageHandle::new(short_id(path, &SMS_PATH)))
        .collect())
}

pub(crate) fn parse_sms(handle: &MessageHandle, out: &str) -> Result<Sms, GatewayError> {
    let envelope: SmsEnvelope = parse_json(out)?;
    let SmsDetails {
        content,
        properties,
    } = envelope.sms;

    if properties.state == "receiving" {
        return Err(GatewayError::NotReady {
            handle: handle.to_string(),
        });
    }

    let received_at = parse_timestamp(&properties.timestamp).unwrap_or_else(|| {
        warn!(
            handle = %handle,
            timestamp = %properties.timestamp,
            "Unparsable SMS timestamp, using current time"
        );
        Utc::now().fixed_offset()
    });

    Ok(Sms {
        sender: content.number,
        body: content.text,
        received_at,
    })
}

/// Parse a ModemManager timestamp.
///
/// ModemManager reports the offset in hours only (`2024-05-01T10:20:30+02`),
/// which needs padding to minutes before chrono accepts it.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(&format!("{raw}00"), "%Y-%m-%dT%H:%M:%S%z"))
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn modem_list_reduces_paths_to_indices() {
        let out = r#"{"modem-list":["/org/freedesktop/ModemManager1/Modem/3","/custom/path"]}"#;
        let ids = parse_modem_list(out).unwrap();
        assert_eq!(ids, vec![ModemId::new("3"), ModemId::new("/custom/path")]);
    }

    #[test]
    fn empty_modem_list() {
        let ids = parse_modem_list(r#"{"modem-list":[]}"#).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn sms_list_keeps_gateway_order() {
        let out = r#"{"modem.messaging.sms":[
            "/org/freedesktop/ModemManager1/SMS/12",
            "/org/freedesktop/ModemManager1/SMS/4"
        ]}"#;
        let handles = parse_sms_list(out).unwrap();
        assert_eq!(
            handles,
            vec![MessageHandle::new("12"), MessageHandle::new("4")]
        );
    }

    #[test]
    fn sms_list_garbage_is_parse_error() {
        assert!(matches!(
            parse_sms_list("not json"),
            Err(GatewayError::Parse(_))
        ));
    }

    #[test]
    fn sms_details_parsed() {
        let out = r#"{"sms":{
            "content":{"number":"+5511999999999","text":"hello","data":"--"},
            "properties":{"timestamp":"2024-05-01T10:20:30+02","state":"received","pdu-type":"deliver"}
        }}"#;
        let sms = parse_sms(&MessageHandle::new("1"), out).unwrap();
        assert_eq!(sms.sender, "+5511999999999");
        assert_eq!(sms.body, "hello");
        assert_eq!(sms.received_at.hour(), 10);
        assert_eq!(sms.received_at.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn sms_still_receiving_is_not_ready() {
        let out = r#"{"sms":{
            "content":{"number":"+1555","text":"par"},
            "properties":{"timestamp":"","state":"receiving"}
        }}"#;
        assert!(matches!(
            parse_sms(&MessageHandle::new("9"), out),
            Err(GatewayError::NotReady { .. })
        ));
    }

    #[test]
    fn sms_with_bad_timestamp_falls_back_to_now() {
        let out = r#"{"sms":{
            "content":{"number":"+1555","text":"hi"},
            "properties":{"timestamp":"yesterday","state":"received"}
        }}"#;
        let before = Utc::now();
        let sms = parse_sms(&MessageHandle::new("2"), out).unwrap();
        assert!(sms.received_at.with_timezone(&Utc) >= before);
    }

    #[test]
    fn timestamp_variants() {
        let padded = parse_timestamp("2023-12-31T23:59:01-05").unwrap();
        assert_eq!(padded.year(), 2023);
        assert_eq!(padded.offset().local_minus_utc(), -5 * 3600);

        let rfc = parse_timestamp("2023-12-31T23:59:01+01:00").unwrap();
        assert_eq!(rfc.offset().local_minus_utc(), 3600);

        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("31/12/2023").is_none());
    }

    #[test]
    fn missing_modem_is_classified() {
        let args: Vec<String> = vec!["--modem".into(), "7".into(), "--messaging-list-sms".into()];
        let err = classify_failure(
            "mmcli --modem 7".into(),
            "error: couldn't find modem".into(),
            &args,
        );
        assert!(matches!(err, GatewayError::ModemNotFound { modem } if modem == "7"));
    }

    #[test]
    fn missing_sms_is_classified() {
        let args: Vec<String> = vec!["--modem".into(), "0".into(), "--sms".into(), "5".into()];
        let err = classify_failure(
            "mmcli".into(),
            "error: couldn't find SMS at '/org/freedesktop/ModemManager1/SMS/5'".into(),
            &args,
        );
        assert!(matches!(err, GatewayError::MessageNotFound { handle } if handle == "5"));
    }

    #[test]
    fn missing_sms_on_delete_is_classified() {
        let args: Vec<String> = vec![
            "--modem".into(),
            "0".into(),
            "--messaging-delete-sms=7".into(),
        ];
        let err = classify_failure(
            "mmcli".into(),
            "error: couldn't delete SMS: couldn't find SMS at '/org/freedesktop/ModemManager1/SMS/7'"
                .into(),
            &args,
        );
        assert!(matches!(err, GatewayError::MessageNotFound { handle } if handle == "7"));
    }

    #[test]
    fn other_failures_keep_stderr() {
        let err = classify_failure("mmcli -L".into(), "permission denied".into(), &[]);
        match err {
            GatewayError::Command { stderr, .. } => assert_eq!(stderr, "permission denied"),
            other => panic!("Expected Command, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let gateway = MmcliGateway::new().with_program("/nonexistent/mmcli-binary");
        let err = gateway.list_modem_ids().await.unwrap_err();
        assert!(matches!(err, GatewayError::Spawn { .. }));
    }
}
