//! Message release
//!
//! Re-sends a captured message to new recipients. The stored copy is only
//! ever read: each release rewrites a private buffer and hands it to the
//! [`Transport`].
//!
//! Steps run strictly in order and the first failure aborts the release:
//!
//! 1. validate every recipient (syntax, then the allowlist)
//! 2. load the raw message
//! 3. resolve the envelope sender
//! 4. strip `Bcc`
//! 5. force `Return-Path` to the configured override
//! 6. refresh `Date`
//! 7. replace `Message-Id`
//! 8. dispatch

use crate::address::parse_address;
use crate::headers::RawMessage;
use crate::ident;
use crate::policy::RelayPolicy;
use crate::transport::Transport;
use async_trait::async_trait;
use holdbox_common::types::MessageRef;
use holdbox_storage::repository::MessageRepositoryTrait;
use holdbox_storage::MessageRepository;
use lettre::Address;
use mail_parser::MessageParser;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Default deadline for loading and dispatching
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Reasons a release can fail
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReleaseError {
    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Recipient not allowed: {0}")]
    RecipientNotAllowed(String),

    #[error("No valid addresses found")]
    EmptyRecipientList,

    #[error("No sender address found")]
    NoSenderFound,

    #[error("SMTP error: {0}")]
    DeliveryFailed(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Message relaying is not configured")]
    RelayDisabled,
}

impl ReleaseError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ReleaseError::NotFound(_) => 404,
            _ => 400,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            ReleaseError::NotFound(_) => "NOT_FOUND",
            ReleaseError::InvalidAddress(_) => "INVALID_ADDRESS",
            ReleaseError::RecipientNotAllowed(_) => "RECIPIENT_NOT_ALLOWED",
            ReleaseError::EmptyRecipientList => "EMPTY_RECIPIENT_LIST",
            ReleaseError::NoSenderFound => "NO_SENDER_FOUND",
            ReleaseError::DeliveryFailed(_) => "DELIVERY_FAILED",
            ReleaseError::MalformedMessage(_) => "MALFORMED_MESSAGE",
            ReleaseError::RelayDisabled => "RELAY_DISABLED",
        }
    }
}

/// Read access to captured messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Original bytes of a message, `None` if it does not exist
    async fn load_raw(&self, reference: MessageRef) -> holdbox_common::Result<Option<Vec<u8>>>;
}

#[async_trait]
impl MessageStore for MessageRepository {
    async fn load_raw(&self, reference: MessageRef) -> holdbox_common::Result<Option<Vec<u8>>> {
        MessageRepositoryTrait::load_raw(self, reference).await
    }
}

/// A message prepared for dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    /// Envelope sender
    pub sender: Address,
    /// New `Message-Id` value
    pub message_id: String,
    /// Rewritten message bytes
    pub raw: Vec<u8>,
}

/// Outcome of a successful release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    pub sender: Address,
    pub recipients: Vec<Address>,
    pub message_id: String,
}

/// Release orchestrator
pub struct ReleasePipeline {
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn Transport>,
    policy: Arc<RelayPolicy>,
    timeout: Duration,
}

impl ReleasePipeline {
    /// Create a new pipeline
    pub fn new(
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn Transport>,
        policy: Arc<RelayPolicy>,
    ) -> Self {
        Self {
            store,
            transport,
            policy,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the deadline applied separately to loading and to dispatch
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Active relay policy
    pub fn policy(&self) -> &RelayPolicy {
        &self.policy
    }

    /// Release a stored message to `recipients`
    pub async fn release(
        &self,
        reference: MessageRef,
        recipients: &[String],
    ) -> Result<Released, ReleaseError> {
        let result = self.run(reference, recipients).await;

        match &result {
            Ok(released) => info!(
                message = %reference,
                message_id = %released.message_id,
                sender = %released.sender,
                recipients = released.recipients.len(),
                "Released message"
            ),
            Err(e) => warn!(message = %reference, code = e.code(), error = %e, "Release failed"),
        }

        result
    }

    async fn run(
        &self,
        reference: MessageRef,
        recipients: &[String],
    ) -> Result<Released, ReleaseError> {
        let recipients = self.validate_recipients(recipients)?;
        let raw = self.load(reference).await?;
        let rewritten = self.rewrite(&raw)?;
        self.dispatch(&rewritten, &recipients).await?;

        Ok(Released {
            sender: rewritten.sender,
            recipients,
            message_id: rewritten.message_id,
        })
    }

    /// Parse every recipient and check it against the allowlist
    pub fn validate_recipients(&self, recipients: &[String]) -> Result<Vec<Address>, ReleaseError> {
        if recipients.is_empty() {
            return Err(ReleaseError::EmptyRecipientList);
        }

        recipients
            .iter()
            .map(|r| {
                let address = parse_address(r)?;
                self.policy.check_recipient(&address)?;
                Ok(address)
            })
            .collect()
    }

    async fn load(&self, reference: MessageRef) -> Result<Vec<u8>, ReleaseError> {
        match timeout(self.timeout, self.store.load_raw(reference)).await {
            Ok(Ok(Some(raw))) => Ok(raw),
            Ok(Ok(None)) => Err(ReleaseError::NotFound(reference.to_string())),
            Ok(Err(e)) => {
                error!(message = %reference, error = %e, "Failed to load message");
                Err(ReleaseError::NotFound(reference.to_string()))
            }
            Err(_) => {
                error!(message = %reference, "Timed out loading message");
                Err(ReleaseError::NotFound(reference.to_string()))
            }
        }
    }

    /// Apply the header rewrites to a raw message
    pub fn rewrite(&self, raw: &[u8]) -> Result<Rewritten, ReleaseError> {
        let mut message = RawMessage::parse(raw)?;

        let mut sender = match self.policy.return_path() {
            Some(rp) => Some(rp.clone()),
            None => resolve_sender(&message),
        }
        .ok_or(ReleaseError::NoSenderFound)?;

        message.remove(&["Bcc"]);

        if let Some(rp) = self.policy.return_path() {
            let wanted = format!("<{}>", rp);
            if message.get_first("Return-Path").as_deref() != Some(wanted.as_str()) {
                message.remove(&["Return-Path"]);
                message.upsert("Return-Path", &wanted);
            }
            sender = rp.clone();
        }

        message.upsert("Date", &chrono::Utc::now().to_rfc2822());

        let message_id = ident::message_id();
        message.upsert("Message-Id", &message_id);

        Ok(Rewritten {
            sender,
            message_id,
            raw: message.to_bytes(),
        })
    }

    async fn dispatch(&self, message: &Rewritten, recipients: &[Address]) -> Result<(), ReleaseError> {
        let send = self.transport.send(&message.sender, recipients, &message.raw);

        match timeout(self.timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "Relay rejected message");
                Err(ReleaseError::DeliveryFailed(e.0))
            }
            Err(_) => {
                error!(timeout = ?self.timeout, "Timed out dispatching message");
                Err(ReleaseError::DeliveryFailed(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

/// First parseable address of the first `Sender` field, else of the
/// first `From` field
fn resolve_sender(message: &RawMessage) -> Option<Address> {
    ["Sender", "From"].iter().find_map(|name| {
        let value = message.get_first(name)?;
        first_address(name, &value)
    })
}

fn first_address(name: &str, value: &str) -> Option<Address> {
    let block = format!("{}: {}\r\n\r\n", name, value);
    let parsed = MessageParser::default().parse(block.as_bytes())?;

    let list = if name == "Sender" {
        parsed.sender()
    } else {
        parsed.from()
    }?;

    // Bound so the iterator is dropped before `parsed`.
    let found = list
        .iter()
        .filter_map(|addr| addr.address())
        .find_map(|addr| addr.parse::<Address>().ok());
    found
}
