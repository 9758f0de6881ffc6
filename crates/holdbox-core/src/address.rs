//! Recipient address validation

use crate::release::ReleaseError;
use lettre::message::Mailboxes;
use lettre::Address;

/// Parse a single RFC 5322 address, with or without a display name.
///
/// Returns the address-only form (`local@domain`). Empty input, lists
/// of more than one address and anything lettre cannot parse are
/// rejected with [`ReleaseError::InvalidAddress`].
pub fn parse_address(input: &str) -> Result<Address, ReleaseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ReleaseError::InvalidAddress(input.to_string()));
    }

    let mailboxes: Mailboxes = trimmed
        .parse()
        .map_err(|_| ReleaseError::InvalidAddress(input.to_string()))?;

    let mut iter = mailboxes.iter();
    match (iter.next(), iter.next()) {
        (Some(mailbox), None) => Ok(mailbox.email.clone()),
        _ => Err(ReleaseError::InvalidAddress(input.to_string())),
    }
}
