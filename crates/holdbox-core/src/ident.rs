//! Message-ID generation for released copies

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use uuid::Uuid;

/// Domain part of every generated Message-ID, marking holdbox as the
/// origin of the relayed copy
pub const MESSAGE_ID_DOMAIN: &str = "holdbox";

/// A compact URL-safe token backed by a random v4 UUID
pub fn token() -> String {
    URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}

/// A fresh `<token@holdbox>` Message-ID
pub fn message_id() -> String {
    format!("<{}@{}>", token(), MESSAGE_ID_DOMAIN)
}
