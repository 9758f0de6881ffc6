//! Outbound transport
//!
//! Released messages leave through a [`Transport`]. Production uses
//! [`SmtpRelayTransport`], a lettre SMTP client pointed at the `[relay]`
//! host; tests substitute recording fakes.

use async_trait::async_trait;
use holdbox_common::config::{RelayConfig, RelayTls};
use holdbox_common::{Error, Result};
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, info};

/// Failure reported by a transport; the text is surfaced to the caller as is
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Hands a complete message to outbound delivery
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `raw` to `recipients` with `sender` as the envelope sender
    async fn send(
        &self,
        sender: &Address,
        recipients: &[Address],
        raw: &[u8],
    ) -> std::result::Result<(), TransportError>;
}

/// SMTP relay client
pub struct SmtpRelayTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpRelayTransport {
    /// Build the client from relay configuration
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let builder = match config.tls {
            RelayTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| Error::Config(format!("Failed to create SMTP transport: {}", e)))?,
            RelayTls::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host).map_err(
                    |e| Error::Config(format!("Failed to create SMTP transport: {}", e)),
                )?
            }
            RelayTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
        };

        let mut builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let mailer = builder
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        info!(
            host = %config.host,
            port = config.port,
            tls = ?config.tls,
            "SMTP relay configured"
        );

        Ok(Self { mailer })
    }
}

#[async_trait]
impl Transport for SmtpRelayTransport {
    async fn send(
        &self,
        sender: &Address,
        recipients: &[Address],
        raw: &[u8],
    ) -> std::result::Result<(), TransportError> {
        let envelope = Envelope::new(Some(sender.clone()), recipients.to_vec())
            .map_err(|e| TransportError(e.to_string()))?;

        let data = wire_bytes(raw);
        let response = self
            .mailer
            .send_raw(&envelope, &data)
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        debug!(?response, "Relay accepted message");
        Ok(())
    }
}

/// Message bytes as DATA content: every line ends in CRLF, and the final
/// line break is left to the `<CRLF>.<CRLF>` terminator.
///
/// lettre only dot-stuffs after CRLF, so bare LF must be converted first.
fn wire_bytes(raw: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(raw.len() + raw.len() / 64 + 2);
    let mut prev = 0u8;

    for &b in raw {
        if b == b'\n' && prev != b'\r' {
            data.push(b'\r');
        }
        data.push(b);
        prev = b;
    }

    if data.ends_with(b"\r\n") {
        data.truncate(data.len() - 2);
    }
    data
}
