//! Input rules for sign-up and checkout forms.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use cloud_kitchen_core::Role;

const FULL_NAME_MIN: usize = 2;
const FULL_NAME_MAX: usize = 50;
const PASSWORD_MIN: usize = 6;
const PASSWORD_MAX: usize = 100;
const DELIVERY_ADDRESS_MIN: usize = 10;
const DELIVERY_ADDRESS_MAX: usize = 200;
const SPECIAL_INSTRUCTIONS_MAX: usize = 500;

static FULL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z\s]+$").expect("Invalid regex"));

/// A form field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("full name must be between {min} and {max} characters")]
    FullNameLength { min: usize, max: usize },

    #[error("full name can only contain letters and spaces")]
    FullNameCharacters,

    #[error("password must be between {min} and {max} characters")]
    PasswordLength { min: usize, max: usize },

    #[error("password must contain at least one lowercase letter, one uppercase letter, and one number")]
    PasswordComplexity,

    #[error("delivery address must be between {min} and {max} characters")]
    DeliveryAddressLength { min: usize, max: usize },

    #[error("special instructions must be at most {max} characters")]
    SpecialInstructionsTooLong { max: usize },

    #[error("the {0} role cannot be chosen at sign-up")]
    RoleNotSelectable(Role),
}

/// Validate and trim a full name: 2-50 letters and spaces.
///
/// # Errors
///
/// Returns an error if the trimmed name is out of range or contains anything
/// other than ASCII letters and whitespace.
pub fn full_name(input: &str) -> Result<String, ValidationError> {
    let name = input.trim();
    let len = name.chars().count();
    if !(FULL_NAME_MIN..=FULL_NAME_MAX).contains(&len) {
        return Err(ValidationError::FullNameLength {
            min: FULL_NAME_MIN,
            max: FULL_NAME_MAX,
        });
    }
    if !FULL_NAME_RE.is_match(name) {
        return Err(ValidationError::FullNameCharacters);
    }
    Ok(name.to_string())
}

/// Validate a sign-up password: 6-100 characters with a lowercase letter, an
/// uppercase letter and a digit.
///
/// # Errors
///
/// Returns an error describing the first rule the password breaks.
pub fn password(input: &str) -> Result<(), ValidationError> {
    let len = input.chars().count();
    if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
        return Err(ValidationError::PasswordLength {
            min: PASSWORD_MIN,
            max: PASSWORD_MAX,
        });
    }

    let has_lower = input.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = input.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = input.chars().any(|c| c.is_ascii_digit());
    if !(has_lower && has_upper && has_digit) {
        return Err(ValidationError::PasswordComplexity);
    }
    Ok(())
}

/// Only customers and restaurant owners can register themselves.
///
/// # Errors
///
/// Returns [`ValidationError::RoleNotSelectable`] for [`Role::Admin`].
pub const fn sign_up_role(role: Role) -> Result<Role, ValidationError> {
    match role {
        Role::Customer | Role::RestaurantOwner => Ok(role),
        Role::Admin => Err(ValidationError::RoleNotSelectable(role)),
    }
}

/// Validate and trim a delivery address: 10-200 characters.
///
/// # Errors
///
/// Returns an error if the trimmed address is out of range.
pub fn delivery_address(input: &str) -> Result<String, ValidationError> {
    let address = input.trim();
    let len = address.chars().count();
    if !(DELIVERY_ADDRESS_MIN..=DELIVERY_ADDRESS_MAX).contains(&len) {
        return Err(ValidationError::DeliveryAddressLength {
            min: DELIVERY_ADDRESS_MIN,
            max: DELIVERY_ADDRESS_MAX,
        });
    }
    Ok(address.to_string())
}

/// Validate optional special instructions: at most 500 characters.
///
/// Blank input is treated as absent.
///
/// # Errors
///
/// Returns an error if the trimmed text is too long.
pub fn special_instructions(input: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(text) = input.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    if text.chars().count() > SPECIAL_INSTRUCTIONS_MAX {
        return Err(ValidationError::SpecialInstructionsTooLong {
            max: SPECIAL_INSTRUCTIONS_MAX,
        });
    }
    Ok(Some(text.to_string()))
}
