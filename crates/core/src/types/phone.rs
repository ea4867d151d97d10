//! Contact phone number type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`Phone`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PhoneError {
    /// The input string is empty.
    #[error("phone number is required")]
    Empty,
    /// Fewer than the minimum number of characters.
    #[error("phone number must be at least {min} characters")]
    TooShort {
        /// Minimum allowed length.
        min: usize,
    },
    /// More than the maximum number of characters.
    #[error("phone number must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// A character outside the accepted set.
    #[error("invalid phone number format")]
    InvalidCharacter,
}

/// A contact phone number as typed by the customer.
///
/// Accepts an optional leading `+` followed by digits, spaces, `-`, `(` and
/// `)`. At least one digit is required. The value is stored trimmed but
/// otherwise verbatim, since it is only ever shown to kitchen staff.
///
/// ```
/// use cloud_kitchen_core::Phone;
///
/// assert!(Phone::parse("+15551234567").is_ok());
/// assert!(Phone::parse("(555) 123-4567").is_ok());
/// assert!(Phone::parse("call me").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Phone(String);

impl Phone {
    /// Minimum length in characters.
    pub const MIN_LENGTH: usize = 10;
    /// Maximum length in characters.
    pub const MAX_LENGTH: usize = 15;

    /// Parse a `Phone` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the trimmed input is empty, outside the 10-15
    /// character range, or contains characters other than a leading `+`,
    /// digits, spaces, `-`, `(` and `)`.
    pub fn parse(s: &str) -> Result<Self, PhoneError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PhoneError::Empty);
        }

        let len = s.chars().count();
        if len < Self::MIN_LENGTH {
            return Err(PhoneError::TooShort {
                min: Self::MIN_LENGTH,
            });
        }
        if len > Self::MAX_LENGTH {
            return Err(PhoneError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        let body = s.strip_prefix('+').unwrap_or(s);
        let allowed = |c: char| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')');
        if !body.chars().all(allowed) || !body.chars().any(|c| c.is_ascii_digit()) {
            return Err(PhoneError::InvalidCharacter);
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the phone number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns only the digits, keeping a leading `+`.
    #[must_use]
    pub fn digits(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        if self.0.starts_with('+') {
            out.push('+');
        }
        out.extend(self.0.chars().filter(char::is_ascii_digit));
        out
    }
}

impl fmt::Display for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Phone {
    type Err = PhoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        assert!(Phone::parse("+15551234567").is_ok());
        assert!(Phone::parse("555 123 4567").is_ok());
        assert!(Phone::parse("(555) 123-4567").is_ok());
    }

    #[test]
    fn test_parse_length_bounds() {
        assert_eq!(
            Phone::parse("555-1234"),
            Err(PhoneError::TooShort { min: 10 })
        );
        assert_eq!(
            Phone::parse("+1 555 123 456 789"),
            Err(PhoneError::TooLong { max: 15 })
        );
    }

    #[test]
    fn test_parse_rejects_letters_and_inner_plus() {
        assert_eq!(Phone::parse("555-CALL-NOW"), Err(PhoneError::InvalidCharacter));
        assert_eq!(Phone::parse("555+1234567"), Err(PhoneError::InvalidCharacter));
        assert_eq!(Phone::parse("(--------)"), Err(PhoneError::InvalidCharacter));
    }

    #[test]
    fn test_digits() {
        let phone = Phone::parse("+1 (555) 123-45").unwrap();
        assert_eq!(phone.digits(), "+155512345");
    }
}
