//! Contact model: a stored email address, unique by address

use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned identifier for a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactId(pub i64);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contact seen in a From or To header
///
/// The address is matched exactly (case-sensitive). The display name is the
/// one seen the first time the address was stored and is never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    /// Email address (e.g., "john@example.com")
    pub address: String,
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => write!(f, "{} <{}>", name, self.address),
            _ => f.write_str(&self.address),
        }
    }
}
