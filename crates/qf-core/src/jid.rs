//! Phone numbers and WhatsApp addresses (JIDs)

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Server suffix for individual user accounts
pub const USER_SERVER: &str = "s.whatsapp.net";

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{8,15}$").expect("phone regex is valid"));

/// A validated phone number: 8 to 15 ASCII digits, no leading `+`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Validate user input as a phone number
    ///
    /// A trailing line ending is ignored; anything else that is not a digit
    /// (including `+`, spaces or dashes) is rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let digits = input.trim_end_matches(['\r', '\n']);
        if !PHONE_RE.is_match(digits) {
            return Err(Error::InvalidPhoneNumber(
                "must contain only digits and be between 8 and 15 characters long".to_string(),
            ));
        }
        Ok(Self(digits.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The user JID for this number
    pub fn to_jid(&self) -> Jid {
        Jid(format!("{}@{}", self.0, USER_SERVER))
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A WhatsApp address such as `15551234567@s.whatsapp.net`
///
/// Device-qualified forms (`15551234567:12@s.whatsapp.net`) are kept as-is;
/// [`Jid::user`] strips the device part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(String);

impl Jid {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        match raw.split_once('@') {
            Some((user, server)) if !user.is_empty() && !server.is_empty() => Ok(Self(raw)),
            _ => Err(Error::InvalidJid(raw)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// User part without the device suffix
    pub fn user(&self) -> &str {
        let user = self.0.split('@').next().unwrap_or_default();
        user.split(':').next().unwrap_or(user)
    }

    pub fn server(&self) -> &str {
        self.0.split_once('@').map(|(_, s)| s).unwrap_or_default()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The operator's own number and address, fixed for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorIdentity {
    phone: PhoneNumber,
    jid: Jid,
}

impl OperatorIdentity {
    pub fn new(phone: PhoneNumber) -> Self {
        let jid = phone.to_jid();
        Self { phone, jid }
    }

    /// Validate raw prompt input and derive the operator address
    pub fn from_input(input: &str) -> Result<Self> {
        PhoneNumber::parse(input).map(Self::new)
    }

    pub fn phone(&self) -> &PhoneNumber {
        &self.phone
    }

    pub fn jid(&self) -> &Jid {
        &self.jid
    }
}
