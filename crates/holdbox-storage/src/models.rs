//! Database models

use chrono::{DateTime, Utc};
use holdbox_common::types::MessageId;
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Captured message summary (everything except the raw bytes)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub message_id_header: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub to_addresses: Json<Vec<String>>,
    pub size: i64,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Recipient addresses from the `To` header
    pub fn to_vec(&self) -> Vec<String> {
        self.to_addresses.0.clone()
    }
}

/// Summary fields extracted from raw bytes at capture time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateMessage {
    pub message_id_header: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub to_addresses: Vec<String>,
}

impl CreateMessage {
    /// Extract summary fields from a raw RFC 5322 message.
    ///
    /// Unparseable input yields empty fields; the raw bytes are stored
    /// regardless.
    pub fn from_raw(raw: &[u8]) -> Self {
        let Some(parsed) = MessageParser::default().parse(raw) else {
            return Self::default();
        };

        let from_address = parsed
            .from()
            .and_then(|a| a.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string());

        let to_addresses = parsed
            .to()
            .map(|list| {
                list.iter()
                    .filter_map(|a| a.address())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            message_id_header: parsed.message_id().map(|s| s.to_string()),
            subject: parsed.subject().map(|s| s.to_string()),
            from_address,
            to_addresses,
        }
    }
}
