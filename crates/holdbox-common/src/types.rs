//! Common types for Holdbox

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for captured messages
pub type MessageId = Uuid;

/// Sentinel accepted wherever a message identifier is expected
pub const LATEST: &str = "latest";

/// Reference to a stored message, as addressed by API callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRef {
    /// The most recently captured message
    Latest,
    /// A specific message
    Id(MessageId),
}

impl MessageRef {
    /// Parse a path segment into a reference.
    ///
    /// Returns `None` for anything that is neither `latest` nor a UUID;
    /// such references can never resolve to a stored message.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(LATEST) {
            return Some(MessageRef::Latest);
        }
        Uuid::parse_str(s).ok().map(MessageRef::Id)
    }
}

impl std::fmt::Display for MessageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRef::Latest => write!(f, "{}", LATEST),
            MessageRef::Id(id) => write!(f, "{}", id),
        }
    }
}

impl From<MessageId> for MessageRef {
    fn from(id: MessageId) -> Self {
        MessageRef::Id(id)
    }
}

/// Email address as seen on the SMTP envelope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse a bare `local@domain` address
    pub fn parse(s: &str) -> Option<Self> {
        let (local, domain) = s.rsplit_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains(char::is_whitespace) {
            return None;
        }
        Some(Self::new(local, domain))
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation(format!("Invalid email address: {}", s)))
    }
}

/// SMTP envelope of a captured transaction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender (MAIL FROM); `None` for the null reverse-path
    pub from: Option<EmailAddress>,

    /// Recipients (RCPT TO)
    pub to: Vec<EmailAddress>,

    /// Client IP address
    pub client_ip: Option<String>,

    /// HELO/EHLO hostname
    pub helo: Option<String>,
}

impl Envelope {
    /// Clear the transaction part of the envelope (after DATA or RSET)
    pub fn reset(&mut self) {
        self.from = None;
        self.to.clear();
    }
}
