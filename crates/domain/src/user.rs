//! User and address records.
//!
//! Both are collaborator data resolved during order creation and never
//! mutated by this engine.

use common::{AddressId, UserId};
use serde::{Deserialize, Serialize};

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier.
    pub id: UserId,

    /// Display name.
    pub name: String,

    /// Email address notifications are sent to.
    pub email: String,
}

impl User {
    /// Creates a new user.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            email: email.into(),
        }
    }
}

/// A shipping address owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Unique address identifier.
    pub id: AddressId,

    /// The owning user.
    pub user_id: UserId,

    /// Street line.
    pub street: String,

    /// City.
    pub city: String,

    /// Postal code.
    pub postal_code: String,

    /// Country.
    pub country: String,
}

impl Address {
    /// Creates a new address for a user.
    pub fn new(
        user_id: UserId,
        street: impl Into<String>,
        city: impl Into<String>,
        postal_code: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            id: AddressId::new(),
            user_id,
            street: street.into(),
            city: city.into(),
            postal_code: postal_code.into(),
            country: country.into(),
        }
    }

    /// Returns true if the address belongs to the given user.
    pub fn belongs_to(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}
