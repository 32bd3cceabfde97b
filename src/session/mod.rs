//! Session directory
//!
//! Issues the short join code a Hub advertises and translates codes to and
//! from the transport identity peers actually dial. The identity is always
//! the namespace prefix followed by the 4 digits of the code, so a Satellite
//! can derive it locally without asking anyone.

pub mod state;

pub use state::{NodeState, Role};

use crate::assets::{CODE_LEN, CODE_MAX, CODE_MIN, NAMESPACE_PREFIX};
use crate::config::Config;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid join code format: {0:?}")]
    InvalidCodeFormat(String),
    #[error("code range {min}..={max} is empty or wider than 4 digits")]
    InvalidRange { min: u16, max: u16 },
}

/// Identity of a node on the peer transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(String);

impl TransportId {
    pub fn new(id: impl Into<String>) -> Self {
        TransportId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransportId {
    fn from(value: &str) -> Self {
        TransportId::new(value)
    }
}

impl From<String> for TransportId {
    fn from(value: String) -> Self {
        TransportId(value)
    }
}

/// A 4-digit join code, always exactly [`CODE_LEN`] ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinCode(String);

impl JoinCode {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let raw = raw.trim();
        if raw.len() == CODE_LEN && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(JoinCode(raw.to_string()))
        } else {
            Err(SessionError::InvalidCodeFormat(raw.to_string()))
        }
    }

    fn from_number(n: u16) -> Self {
        JoinCode(format!("{:0width$}", n, width = CODE_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Readable form shown to the operator, e.g. `"12 34"`.
    pub fn display(&self) -> String {
        let (head, tail) = self.0.split_at(CODE_LEN / 2);
        format!("{head} {tail}")
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JoinCode {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JoinCode::parse(s)
    }
}

/// Keeps the ASCII digits of what the user typed, at most [`CODE_LEN`] of them.
pub fn sanitize_input(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit())
        .take(CODE_LEN)
        .collect()
}

#[derive(Debug, Clone)]
pub struct SessionDirectory {
    prefix: String,
    range: RangeInclusive<u16>,
}

impl Default for SessionDirectory {
    fn default() -> Self {
        SessionDirectory::new(NAMESPACE_PREFIX, CODE_MIN..=CODE_MAX)
    }
}

impl SessionDirectory {
    pub fn new(prefix: impl Into<String>, range: RangeInclusive<u16>) -> Self {
        SessionDirectory {
            prefix: prefix.into(),
            range,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        SessionDirectory::new(config.namespace.clone(), config.code_min..=config.code_max)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Draws a fresh code uniformly from the configured range.
    ///
    /// Collisions are not checked here: opening the returned identity on the
    /// transport fails if another Hub already holds it.
    pub fn issue_code(&self) -> Result<(JoinCode, TransportId), SessionError> {
        let (min, max) = (*self.range.start(), *self.range.end());
        if min > max || max > CODE_MAX {
            return Err(SessionError::InvalidRange { min, max });
        }
        let n = rand::thread_rng().gen_range(min..=max);
        let code = JoinCode::from_number(n);
        let id = self.transport_id(&code);
        log::debug!("Issued join code {} for {}", code.display(), id);
        Ok((code, id))
    }

    pub fn transport_id(&self, code: &JoinCode) -> TransportId {
        TransportId(format!("{}{}", self.prefix, code.as_str()))
    }

    /// Resolves what a Satellite entered into the Hub's transport identity.
    ///
    /// Accepts the bare code or the full identity the Hub displays.
    pub fn resolve(&self, code: &str) -> Result<TransportId, SessionError> {
        let trimmed = code.trim();
        let digits = trimmed.strip_prefix(self.prefix.as_str()).unwrap_or(trimmed);
        let code = JoinCode::parse(digits)
            .map_err(|_| SessionError::InvalidCodeFormat(code.to_string()))?;
        Ok(self.transport_id(&code))
    }

    pub fn code_of(&self, id: &TransportId) -> Option<JoinCode> {
        id.as_str()
            .strip_prefix(self.prefix.as_str())
            .and_then(|digits| JoinCode::parse(digits).ok())
    }
}
