//! Display name validation.
//!
//! The same rule runs on both ends: the client checks before it sends a
//! registration, and the server checks again because it can't trust the
//! client to have done so.

use std::fmt;

use tandem_protocol::ENTRY_SEPARATOR;

use crate::SessionError;

/// Fewest characters a display name may have.
pub const MIN_NAME_LEN: usize = 3;

/// Most characters a display name may have.
pub const MAX_NAME_LEN: usize = 20;

/// A display name that passed validation.
///
/// Length is counted in characters, not bytes, so "Zoë" is three long.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayName(String);

impl DisplayName {
    /// Validates `name` and wraps it.
    ///
    /// # Errors
    /// [`SessionError::InvalidName`] if the name is shorter than
    /// [`MIN_NAME_LEN`], longer than [`MAX_NAME_LEN`], contains a control
    /// character, or contains the roster separator `|`.
    pub fn parse(name: &str) -> Result<Self, SessionError> {
        let invalid = |reason| SessionError::InvalidName {
            name: name.to_string(),
            reason,
        };

        let len = name.chars().count();
        if len < MIN_NAME_LEN {
            return Err(invalid("too short"));
        }
        if len > MAX_NAME_LEN {
            return Err(invalid("too long"));
        }
        if name.contains(ENTRY_SEPARATOR) {
            return Err(invalid("contains the roster separator"));
        }
        if name.chars().any(char::is_control) {
            return Err(invalid("contains a control character"));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DisplayName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
