//! Guest identifier validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{WharfError, WharfResult};

/// A validated guest ID.
///
/// The guest ID doubles as the runtime container name, so it must:
/// - Be 1-128 characters long
/// - Contain only alphanumeric characters, `_`, `.` and `-`
/// - Start with an alphanumeric character
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuestId(String);

impl GuestId {
    /// Maximum length of a guest ID.
    pub const MAX_LENGTH: usize = 128;

    /// Create a new guest ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`WharfError::MissingGuestId`] for an empty id and
    /// [`WharfError::InvalidGuestId`] for any other format violation.
    pub fn new(id: impl Into<String>) -> WharfResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get the guest ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> WharfResult<()> {
        let Some(first) = id.chars().next() else {
            return Err(WharfError::MissingGuestId);
        };

        let invalid = id.len() > Self::MAX_LENGTH
            || !first.is_ascii_alphanumeric()
            || id
                .chars()
                .any(|c| !c.is_ascii_alphanumeric() && !matches!(c, '_' | '.' | '-'));
        if invalid {
            return Err(WharfError::InvalidGuestId { id: id.to_string() });
        }

        Ok(())
    }
}

impl fmt::Display for GuestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GuestId {
    type Err = WharfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for GuestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
