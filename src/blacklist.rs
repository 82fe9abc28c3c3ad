//! Regex blacklist over SMS senders and bodies.
//!
//! The blacklist file is a JSON object with two optional lists:
//!
//! ```json
//! { "numbers": ["^TIMInforma$"], "words": ["oferta", "(?i)promo"] }
//! ```
//!
//! Patterns are case-sensitive unanchored searches unless the pattern itself
//! says otherwise. They are compiled once at startup.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::BlacklistError;
use crate::modem::Sms;

/// On-disk shape of the blacklist file.
#[derive(Debug, Default, Deserialize)]
pub struct BlacklistFile {
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default)]
    pub numbers: Vec<String>,
}

/// Which part of the message a rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    Sender,
    Body,
}

/// The rule that caused a message to be suppressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistMatch<'a> {
    pub field: RuleField,
    pub pattern: &'a str,
}

/// Compiled blacklist. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    word_patterns: Vec<Regex>,
    number_patterns: Vec<Regex>,
}

impl Blacklist {
    /// A blacklist that suppresses nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile word (body) and number (sender) patterns.
    pub fn new<W, N>(words: &[W], numbers: &[N]) -> Result<Self, BlacklistError>
    where
        W: AsRef<str>,
        N: AsRef<str>,
    {
        Ok(Self {
            word_patterns: compile("words", words)?,
            number_patterns: compile("numbers", numbers)?,
        })
    }

    /// Load the blacklist file at `path`.
    ///
    /// A missing, unreadable or non-JSON file yields an empty blacklist.
    /// Only a malformed pattern is an error.
    pub fn load(path: &Path) -> Result<Self, BlacklistError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Blacklist file not found, not using a blacklist");
                return Ok(Self::empty());
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read blacklist file, not using a blacklist");
                return Ok(Self::empty());
            }
        };

        let file: BlacklistFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Blacklist file is not valid JSON, not using a blacklist");
                return Ok(Self::empty());
            }
        };

        let blacklist = Self::new(&file.words, &file.numbers)?;
        info!(
            words = blacklist.word_patterns.len(),
            numbers = blacklist.number_patterns.len(),
            "Loaded blacklist"
        );
        Ok(blacklist)
    }

    /// Find the first rule that suppresses `sms`. Sender rules are checked first.
    pub fn find_match(&self, sms: &Sms) -> Option<BlacklistMatch<'_>> {
        if let Some(re) = self.number_patterns.iter().find(|re| re.is_match(&sms.sender)) {
            return Some(BlacklistMatch {
                field: RuleField::Sender,
                pattern: re.as_str(),
            });
        }
        self.word_patterns
            .iter()
            .find(|re| re.is_match(&sms.body))
            .map(|re| BlacklistMatch {
                field: RuleField::Body,
                pattern: re.as_str(),
            })
    }

    pub fn should_suppress(&self, sms: &Sms) -> bool {
        self.find_match(sms).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.word_patterns.is_empty() && self.number_patterns.is_empty()
    }
}

fn compile<P: AsRef<str>>(list: &'static str, patterns: &[P]) -> Result<Vec<Regex>, BlacklistError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p.as_ref()).map_err(|source| BlacklistError::InvalidPattern {
                list,
                pattern: p.as_ref().to_string(),
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io::Write;

    fn sms(sender: &str, body: &str) -> Sms {
        Sms {
            sender: sender.into(),
            body: body.into(),
            received_at: Utc::now().fixed_offset(),
        }
    }

    const NONE: &[&str] = &[];

    #[test]
    fn empty_blacklist_passes_everything() {
        let bl = Blacklist::empty();
        assert!(bl.is_empty());
        assert!(!bl.should_suppress(&sms("TIMInforma", "oferta")));
    }

    #[test]
    fn number_pattern_suppresses_sender() {
        let bl = Blacklist::new(NONE, &["TIMInforma"]).unwrap();
        let m = bl.find_match(&sms("TIMInforma", "oferta")).unwrap();
        assert_eq!(m.field, RuleField::Sender);
        assert_eq!(m.pattern, "TIMInforma");
    }

    #[test]
    fn word_pattern_suppresses_body() {
        let bl = Blacklist::new(&["oferta"], NONE).unwrap();
        let m = bl.find_match(&sms("+5511999999999", "Grande oferta hoje")).unwrap();
        assert_eq!(m.field, RuleField::Body);
    }

    #[test]
    fn sender_rules_win_over_body_rules() {
        let bl = Blacklist::new(&["oferta"], &["TIM"]).unwrap();
        let m = bl.find_match(&sms("TIMInforma", "oferta")).unwrap();
        assert_eq!(m.field, RuleField::Sender);
    }

    #[test]
    fn matching_is_case_sensitive() {
        let bl = Blacklist::new(&["oferta"], &["timinforma"]).unwrap();
        assert!(!bl.should_suppress(&sms("TIMInforma", "OFERTA")));
    }

    #[test]
    fn matching_is_unanchored() {
        let bl = Blacklist::new(NONE, &["999"]).unwrap();
        assert!(bl.should_suppress(&sms("+5511999999999", "hello")));
    }

    #[test]
    fn word_patterns_do_not_apply_to_sender() {
        let bl = Blacklist::new(&["Promo"], NONE).unwrap();
        assert!(!bl.should_suppress(&sms("Promo", "hello")));
    }

    #[test]
    fn anchors_in_pattern_are_honored() {
        let bl = Blacklist::new(NONE, &["^\\+1"]).unwrap();
        assert!(bl.should_suppress(&sms("+15551234", "x")));
        assert!(!bl.should_suppress(&sms("+4415551234", "x")));
    }

    #[test]
    fn malformed_pattern_is_rejected() {
        let err = Blacklist::new(&["(unclosed"], NONE).unwrap_err();
        match err {
            BlacklistError::InvalidPattern { list, pattern, .. } => {
                assert_eq!(list, "words");
                assert_eq!(pattern, "(unclosed");
            }
        }
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let bl = Blacklist::load(&dir.path().join("blacklist.json")).unwrap();
        assert!(bl.is_empty());
    }

    #[test]
    fn load_reads_both_lists() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"words": ["oferta"], "numbers": ["TIMInforma", "^\\+99"]}}"#).unwrap();
        let bl = Blacklist::load(file.path()).unwrap();
        assert!(bl.should_suppress(&sms("+99123", "hi")));
        assert!(bl.should_suppress(&sms("+1", "uma oferta")));
        assert!(!bl.should_suppress(&sms("+1", "hi")));
    }

    #[test]
    fn load_tolerates_missing_lists() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"numbers": ["x"]}}"#).unwrap();
        let bl = Blacklist::load(file.path()).unwrap();
        assert!(!bl.is_empty());
    }

    #[test]
    fn load_invalid_json_is_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "words = oferta").unwrap();
        let bl = Blacklist::load(file.path()).unwrap();
        assert!(bl.is_empty());
    }

    #[test]
    fn load_malformed_pattern_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"numbers": ["[a-"]}}"#).unwrap();
        assert!(Blacklist::load(file.path()).is_err());
    }
}
