//! Holdbox Core - message release and SMTP capture
//!
//! This crate turns captured messages back into outbound mail: address
//! validation, the relay policy, byte-preserving header rewriting and the
//! release pipeline that drives an outbound [`Transport`]. It also hosts
//! the SMTP listener that captures messages in the first place.

pub mod address;
pub mod headers;
pub mod ident;
pub mod policy;
pub mod release;
pub mod smtp;
pub mod transport;

pub use address::parse_address;
pub use headers::RawMessage;
pub use policy::RelayPolicy;
pub use release::{MessageStore, ReleaseError, ReleasePipeline, Released};
pub use smtp::SmtpServer;
pub use transport::{SmtpRelayTransport, Transport, TransportError};
