//! Relay policy
//!
//! Built once from the `[relay]` section at startup and shared read-only
//! by every release.

use crate::address::parse_address;
use crate::release::ReleaseError;
use holdbox_common::config::RelayConfig;
use holdbox_common::{Error, Result};
use lettre::Address;
use regex::Regex;

/// Recipient allowlist and envelope sender override
#[derive(Debug, Clone, Default)]
pub struct RelayPolicy {
    allowed_recipients: Option<Regex>,
    return_path: Option<Address>,
}

impl RelayPolicy {
    /// Create a policy from already validated parts
    pub fn new(allowed_recipients: Option<Regex>, return_path: Option<Address>) -> Self {
        Self {
            allowed_recipients,
            return_path,
        }
    }

    /// Compile the policy from relay configuration.
    ///
    /// An invalid pattern or return path is a configuration error.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let allowed_recipients = match config.allowed_recipients.as_deref() {
            Some(pattern) if !pattern.trim().is_empty() => Some(Regex::new(pattern).map_err(|e| {
                Error::Config(format!("Invalid relay.allowed_recipients pattern: {}", e))
            })?),
            _ => None,
        };

        let return_path = match config.return_path.as_deref() {
            Some(rp) if !rp.trim().is_empty() => Some(
                parse_address(rp)
                    .map_err(|e| Error::Config(format!("Invalid relay.return_path: {}", e)))?,
            ),
            _ => None,
        };

        Ok(Self::new(allowed_recipients, return_path))
    }

    /// Check a normalized recipient against the allowlist
    pub fn check_recipient(&self, address: &Address) -> std::result::Result<(), ReleaseError> {
        match &self.allowed_recipients {
            Some(pattern) if !pattern.is_match(address.as_ref()) => {
                Err(ReleaseError::RecipientNotAllowed(address.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Override address for the envelope sender and `Return-Path`
    pub fn return_path(&self) -> Option<&Address> {
        self.return_path.as_ref()
    }

    /// Allowlist pattern, if any
    pub fn allowed_recipients(&self) -> Option<&Regex> {
        self.allowed_recipients.as_ref()
    }
}
