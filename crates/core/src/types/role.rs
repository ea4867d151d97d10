//! Application roles carried on a profile.

use serde::{Deserialize, Serialize};

/// Role claim stored on a user's profile row.
///
/// Guests are an identity mode rather than a role, so they never appear here.
/// Adding a role is a compile-time checked change: every decision point
/// matches on this enum exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A diner placing orders.
    #[default]
    Customer,
    /// A merchant managing their own menu and orders.
    RestaurantOwner,
    /// Back-office staff with access to every merchant.
    Admin,
}

impl Role {
    /// Returns `true` if this role satisfies a requirement for `required`.
    ///
    /// Admin satisfies every requirement; other roles only satisfy their own.
    #[must_use]
    pub const fn satisfies(self, required: Self) -> bool {
        match (self, required) {
            (Self::Admin, _)
            | (Self::RestaurantOwner, Self::RestaurantOwner)
            | (Self::Customer, Self::Customer) => true,
            (Self::RestaurantOwner, Self::Customer | Self::Admin)
            | (Self::Customer, Self::RestaurantOwner | Self::Admin) => false,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::RestaurantOwner => write!(f, "restaurant_owner"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "restaurant_owner" => Ok(Self::RestaurantOwner),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("invalid role: {s}")),
        }
    }
}
